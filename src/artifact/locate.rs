//! First-match lookups. Every function here stops reading the stream at the
//! first entry the selector accepts.

use std::io::Read;

use anyhow::{Context, Result, bail};

use super::matcher;
use super::walk::{self, Visit};
use super::{Artifact, ArtifactError, ArtifactKind};

pub fn require_selector(selector: &str) -> Result<()> {
    if selector.is_empty() {
        return Err(ArtifactError::MissingInput("artifact").into());
    }
    Ok(())
}

/// Metadata of the first artifact matching `selector`.
pub fn find_first<R: Read>(reader: R, selector: &str) -> Result<Artifact> {
    require_selector(selector)?;

    let mut found = None;
    walk::walk(reader, |entry, _| {
        if matcher::matches(&entry.name, selector) {
            tracing::debug!(path = %entry.name, "found matching artifact");
            found = Some(Artifact::from_entry(entry));
            return Ok(Visit::Stop);
        }
        Ok(Visit::Continue)
    })
    .context("Failed to walk the image")?;

    found.ok_or_else(|| ArtifactError::NotFound(selector.to_string()).into())
}

/// Content of the first regular file matching `selector`. Directories and
/// links that match are passed over.
pub fn read_first<R: Read>(reader: R, selector: &str) -> Result<Vec<u8>> {
    require_selector(selector)?;

    let mut content = None;
    walk::walk(reader, |entry, body| {
        if entry.kind == ArtifactKind::File && matcher::matches(&entry.name, selector) {
            tracing::debug!(path = %entry.name, size = entry.size, "found artifact");
            let mut data = Vec::new();
            body.read_to_end(&mut data)
                .context("Failed to read artifact content")?;
            if (data.len() as u64) < entry.size {
                bail!(
                    "artifact {} is truncated: header declares {} bytes, stream ended after {}",
                    entry.name,
                    entry.size,
                    data.len()
                );
            }
            content = Some(data);
            return Ok(Visit::Stop);
        }
        Ok(Visit::Continue)
    })
    .context("Failed to walk the image")?;

    content.ok_or_else(|| ArtifactError::NotFound(selector.to_string()).into())
}

pub fn exists<R: Read>(reader: R, selector: &str) -> Result<bool> {
    match find_first(reader, selector) {
        Ok(_) => Ok(true),
        Err(e) if matches!(e.downcast_ref::<ArtifactError>(), Some(ArtifactError::NotFound(_))) => {
            Ok(false)
        }
        Err(e) => Err(e),
    }
}

/// Whether an error means "the artifact is not there" rather than a failure.
pub fn is_not_found(err: &anyhow::Error) -> bool {
    matches!(err.downcast_ref::<ArtifactError>(), Some(ArtifactError::NotFound(_)))
}
