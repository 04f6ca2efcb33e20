use std::io::Read;

use anyhow::{Context, Result};

use super::ArtifactKind;

/// Marker that layer tars use to record deletions from lower layers.
pub const WHITEOUT_MARKER: &str = ".wh.";

/// What the visitor wants the walker to do next. Failures travel through the
/// `Err` side of the visitor's result instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visit {
    Continue,
    Stop,
}

/// Metadata of the entry under the walk cursor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TarEntry {
    pub name: String,
    pub size: u64,
    pub mode: u32,
    pub kind: ArtifactKind,
    /// Raw tar type flag, kept for diagnostics on `Unknown` kinds.
    pub type_flag: u8,
    /// Present only for symlinks and hardlinks.
    pub link_target: Option<String>,
}

impl TarEntry {
    fn from_tar<R: Read>(entry: &tar::Entry<'_, R>) -> Result<Self> {
        let header = entry.header();
        let name = entry
            .path()
            .context("Failed to decode entry path")?
            .to_string_lossy()
            .into_owned();
        let entry_type = header.entry_type();
        let kind = ArtifactKind::from_entry_type(entry_type);

        let link_target = match kind {
            ArtifactKind::Symlink | ArtifactKind::Hardlink => entry
                .link_name()
                .with_context(|| format!("Failed to decode link target of {name}"))?
                .map(|p| p.to_string_lossy().into_owned()),
            _ => None,
        };

        Ok(Self {
            size: entry.size(),
            mode: header
                .mode()
                .with_context(|| format!("Failed to decode mode of {name}"))?,
            kind,
            type_flag: entry_type.as_byte(),
            link_target,
            name,
        })
    }
}

pub fn is_whiteout(path: &str) -> bool {
    path.contains(WHITEOUT_MARKER)
}

/// Walk a tar stream, handing every non-whiteout entry to `visit` together
/// with a reader over exactly that entry's content.
///
/// Content the visitor leaves unread is skipped before the next header.
/// `Visit::Stop` ends the walk successfully.
pub fn walk<R, F>(reader: R, mut visit: F) -> Result<()>
where
    R: Read,
    F: FnMut(&TarEntry, &mut dyn Read) -> Result<Visit>,
{
    let mut archive = tar::Archive::new(reader);

    for entry_result in archive.entries().context("Failed to read tar entries")? {
        let mut entry = entry_result.context("Failed to read tar header")?;
        let meta = TarEntry::from_tar(&entry)?;

        if is_whiteout(&meta.name) {
            tracing::trace!(path = %meta.name, "skipping whiteout entry");
            continue;
        }

        let next = visit(&meta, &mut entry)
            .with_context(|| format!("Failed to process {}", meta.name))?;
        if next == Visit::Stop {
            break;
        }
    }

    Ok(())
}
