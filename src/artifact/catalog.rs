use std::collections::HashMap;
use std::io::Read;
use std::str::FromStr;

use anyhow::{Context, Result};

use super::walk::{self, Visit};
use super::{Artifact, ArtifactError, ArtifactKind};

/// Which artifact kinds a listing keeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TypeFilter {
    #[default]
    All,
    Only(ArtifactKind),
}

impl TypeFilter {
    pub fn accepts(self, kind: ArtifactKind) -> bool {
        match self {
            Self::All => true,
            Self::Only(wanted) => wanted == kind,
        }
    }
}

impl FromStr for TypeFilter {
    type Err = ArtifactError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" | "all" => Ok(Self::All),
            other => other.parse().map(Self::Only),
        }
    }
}

/// Inventory of an image filesystem keyed by path.
///
/// Iteration follows the order in which paths first appeared in the stream.
/// When a path shows up twice, the later entry replaces the earlier one in
/// place.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    artifacts: Vec<Artifact>,
    index: HashMap<String, usize>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, artifact: Artifact) {
        match self.index.get(&artifact.path) {
            Some(&slot) => self.artifacts[slot] = artifact,
            None => {
                self.index.insert(artifact.path.clone(), self.artifacts.len());
                self.artifacts.push(artifact);
            }
        }
    }

    pub fn get(&self, path: &str) -> Option<&Artifact> {
        self.index.get(path).map(|&slot| &self.artifacts[slot])
    }

    pub fn contains(&self, path: &str) -> bool {
        self.index.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.artifacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Artifact> {
        self.artifacts.iter()
    }

    pub fn into_vec(self) -> Vec<Artifact> {
        self.artifacts
    }
}

impl FromIterator<Artifact> for Catalog {
    fn from_iter<I: IntoIterator<Item = Artifact>>(iter: I) -> Self {
        let mut catalog = Self::new();
        for artifact in iter {
            catalog.insert(artifact);
        }
        catalog
    }
}

/// Walk the whole stream and collect every artifact accepted by `filter`.
pub fn build_catalog<R: Read>(reader: R, filter: TypeFilter) -> Result<Catalog> {
    let mut catalog = Catalog::new();

    walk::walk(reader, |entry, _| {
        if filter.accepts(entry.kind) {
            catalog.insert(Artifact::from_entry(entry));
        }
        Ok(Visit::Continue)
    })
    .context("Failed to walk the image")?;

    tracing::debug!(artifacts = catalog.len(), "catalog built");
    Ok(catalog)
}
