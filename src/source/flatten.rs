//! Merge image layers into the single filesystem a container would see.
//!
//! Layers are read top-down. The first time a path is seen it wins; lower
//! layers can only add paths nobody above has claimed. Deletion markers are
//! consumed here and never reach the output.

use std::collections::{HashMap, HashSet};
use std::io::{Read, Write};

use anyhow::{Context, Result};

/// `.wh..wh..opq` inside a directory hides everything lower layers put there.
pub const OPAQUE_MARKER: &str = ".wh..wh..opq";
const WHITEOUT_PREFIX: &str = ".wh.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Claim {
    Dir,
    Other,
    Deleted,
}

#[derive(Default)]
struct Merge {
    claims: HashMap<String, Claim>,
    opaque: HashSet<String>,
}

impl Merge {
    /// Whether an ancestor claimed by an upper layer hides `name`.
    fn shadowed_by_ancestor(&self, name: &str) -> bool {
        let mut parent = name;
        while let Some((dir, _)) = parent.rsplit_once('/') {
            if self.opaque.contains(dir) {
                return true;
            }
            if matches!(self.claims.get(dir), Some(Claim::Deleted | Claim::Other)) {
                return true;
            }
            parent = dir;
        }
        false
    }
}

/// Lexically clean an entry name: drop `.` and empty components and a leading
/// `/`, resolve `..`. Returns `None` for names that climb above the root or
/// name the root itself.
pub fn normalize(name: &str) -> Option<String> {
    let mut parts: Vec<&str> = Vec::new();
    for component in name.split('/') {
        match component {
            "" | "." => {}
            ".." => {
                parts.pop()?;
            }
            other => parts.push(other),
        }
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

fn split_name(name: &str) -> (&str, &str) {
    match name.rsplit_once('/') {
        Some((dir, base)) => (dir, base),
        None => ("", name),
    }
}

fn join(dir: &str, base: &str) -> String {
    if dir.is_empty() {
        base.to_string()
    } else {
        format!("{dir}/{base}")
    }
}

/// Write the merged filesystem of `layers` (topmost first) to `out` as a tar
/// stream and hand the writer back.
pub fn flatten<W: Write>(layers: Vec<Box<dyn Read>>, out: W) -> Result<W> {
    let mut builder = tar::Builder::new(out);
    let mut merge = Merge::default();
    let total = layers.len();

    for (depth, layer) in layers.into_iter().enumerate() {
        let mut opaque_here = Vec::new();
        let mut archive = tar::Archive::new(layer);
        let mut emitted = 0usize;

        for entry_result in archive
            .entries()
            .with_context(|| format!("Failed to read layer {}/{total}", total - depth))?
        {
            let mut entry = entry_result.context("Failed to read layer entry")?;
            let raw = entry.path()?.to_string_lossy().into_owned();

            let Some(name) = normalize(&raw) else {
                if raw.split('/').any(|c| c == "..") {
                    tracing::warn!(path = %raw, "dropping layer entry outside the image root");
                }
                continue;
            };

            let (dir, base) = split_name(&name);

            if base == OPAQUE_MARKER {
                opaque_here.push(dir.to_string());
                continue;
            }

            let (name, deleted) = match base.strip_prefix(WHITEOUT_PREFIX) {
                Some(hidden) => (join(dir, hidden), true),
                None => (name.clone(), false),
            };

            if merge.claims.contains_key(&name) || merge.shadowed_by_ancestor(&name) {
                continue;
            }

            if deleted {
                merge.claims.insert(name, Claim::Deleted);
                continue;
            }

            let entry_type = entry.header().entry_type();
            let claim = if entry_type.is_dir() { Claim::Dir } else { Claim::Other };

            let mut header = entry.header().clone();
            header.set_size(entry.size());

            if entry_type.is_symlink() || entry_type.is_hard_link() {
                let target = entry
                    .link_name()?
                    .map(|p| p.to_string_lossy().into_owned())
                    .unwrap_or_default();
                let target = if entry_type.is_hard_link() {
                    match normalize(&target) {
                        Some(t) => t,
                        None => {
                            tracing::warn!(path = %name, target = %target, "dropping hardlink outside the image root");
                            continue;
                        }
                    }
                } else {
                    target
                };
                builder
                    .append_link(&mut header, &name, &target)
                    .with_context(|| format!("Failed to write {name}"))?;
            } else {
                builder
                    .append_data(&mut header, &name, &mut entry)
                    .with_context(|| format!("Failed to write {name}"))?;
            }

            merge.claims.insert(name, claim);
            emitted += 1;
        }

        tracing::debug!(layer = total - depth, entries = emitted, "layer merged");
        merge.opaque.extend(opaque_here);
    }

    builder.into_inner().context("Failed to finish flattened stream")
}
