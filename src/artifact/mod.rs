//! The tar-stream artifact model: an image's flattened filesystem treated as a
//! walkable, queryable and comparable collection of artifacts.

pub mod catalog;
pub mod diff;
pub mod extract;
pub mod locate;
pub mod matcher;
pub mod walk;

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

/// Conditions callers need to tell apart from generic I/O failures.
#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    /// A required argument was empty; raised before any stream is opened.
    #[error("no {0} provided")]
    MissingInput(&'static str),

    /// The stream was exhausted without a matching artifact.
    #[error("artifact '{0}' not found")]
    NotFound(String),

    #[error("unknown type filter '{0}' (expected one of: all, {kinds})", kinds = ArtifactKind::names().join(", "))]
    InvalidFilter(String),

    #[error("unknown diff filter '{0}' (expected one of: all, added, removed, modified)")]
    InvalidDiffFilter(String),
}

/// Kind of a tar entry, mapped from its type flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    File,
    Dir,
    Symlink,
    Hardlink,
    #[serde(rename = "chardev")]
    CharDevice,
    #[serde(rename = "blockdev")]
    BlockDevice,
    Fifo,
    Unknown,
}

const KIND_NAMES: [(ArtifactKind, &str); 8] = [
    (ArtifactKind::File, "file"),
    (ArtifactKind::Dir, "dir"),
    (ArtifactKind::Symlink, "symlink"),
    (ArtifactKind::Hardlink, "hardlink"),
    (ArtifactKind::CharDevice, "chardev"),
    (ArtifactKind::BlockDevice, "blockdev"),
    (ArtifactKind::Fifo, "fifo"),
    (ArtifactKind::Unknown, "unknown"),
];

impl ArtifactKind {
    /// Map a tar type flag. Flags the tar format defines but that carry no
    /// filesystem object of their own (PAX/GNU extension headers are consumed
    /// by the reader before we see them) fall into `Unknown`.
    pub fn from_entry_type(entry_type: tar::EntryType) -> Self {
        match entry_type {
            tar::EntryType::Regular | tar::EntryType::Continuous | tar::EntryType::GNUSparse => {
                Self::File
            }
            tar::EntryType::Directory => Self::Dir,
            tar::EntryType::Symlink => Self::Symlink,
            tar::EntryType::Link => Self::Hardlink,
            tar::EntryType::Char => Self::CharDevice,
            tar::EntryType::Block => Self::BlockDevice,
            tar::EntryType::Fifo => Self::Fifo,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(self) -> &'static str {
        KIND_NAMES
            .iter()
            .find(|(kind, _)| *kind == self)
            .map(|(_, name)| *name)
            .unwrap_or("unknown")
    }

    pub fn names() -> Vec<&'static str> {
        KIND_NAMES.iter().map(|(_, name)| *name).collect()
    }

    /// Whether the size column means anything for this kind.
    pub fn is_sized(self) -> bool {
        !matches!(self, Self::Dir | Self::Symlink | Self::Hardlink)
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ArtifactKind {
    type Err = ArtifactError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        KIND_NAMES
            .iter()
            .find(|(_, name)| *name == s)
            .map(|(kind, _)| *kind)
            .ok_or_else(|| ArtifactError::InvalidFilter(s.to_string()))
    }
}

/// A single filesystem entry found in an image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Artifact {
    pub path: String,
    pub size: u64,
    #[serde(serialize_with = "serialize_mode")]
    pub mode: u32,
    #[serde(rename = "type")]
    pub kind: ArtifactKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link_target: Option<String>,
}

impl Artifact {
    pub fn from_entry(entry: &walk::TarEntry) -> Self {
        Self {
            path: entry.name.clone(),
            size: entry.size,
            mode: entry.mode,
            kind: entry.kind,
            link_target: entry.link_target.clone(),
        }
    }

    pub fn mode_string(&self) -> String {
        format_mode(self.mode)
    }
}

/// Render permission bits as a zero-padded 4-digit octal string.
pub fn format_mode(mode: u32) -> String {
    format!("{mode:04o}")
}

fn serialize_mode<S: serde::Serializer>(mode: &u32, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&format_mode(*mode))
}

#[cfg(test)]
pub(crate) mod testutil {
    //! Synthetic tar streams for tests.

    use tar::{Builder, EntryType, Header};

    pub struct TarFixture {
        builder: Builder<Vec<u8>>,
    }

    impl TarFixture {
        pub fn new() -> Self {
            Self {
                builder: Builder::new(Vec::new()),
            }
        }

        pub fn file(mut self, path: &str, content: &[u8], mode: u32) -> Self {
            let mut header = Header::new_gnu();
            header.set_entry_type(EntryType::Regular);
            header.set_size(content.len() as u64);
            header.set_mode(mode);
            self.builder
                .append_data(&mut header, path, content)
                .expect("append file");
            self
        }

        pub fn dir(mut self, path: &str, mode: u32) -> Self {
            let mut header = Header::new_gnu();
            header.set_entry_type(EntryType::Directory);
            header.set_size(0);
            header.set_mode(mode);
            self.builder
                .append_data(&mut header, path, std::io::empty())
                .expect("append dir");
            self
        }

        pub fn symlink(mut self, path: &str, target: &str) -> Self {
            let mut header = Header::new_gnu();
            header.set_entry_type(EntryType::Symlink);
            header.set_size(0);
            header.set_mode(0o777);
            self.builder
                .append_link(&mut header, path, target)
                .expect("append symlink");
            self
        }

        pub fn hardlink(mut self, path: &str, target: &str) -> Self {
            let mut header = Header::new_gnu();
            header.set_entry_type(EntryType::Link);
            header.set_size(0);
            header.set_mode(0o644);
            self.builder
                .append_link(&mut header, path, target)
                .expect("append hardlink");
            self
        }

        pub fn fifo(mut self, path: &str) -> Self {
            let mut header = Header::new_gnu();
            header.set_entry_type(EntryType::Fifo);
            header.set_size(0);
            header.set_mode(0o644);
            self.builder
                .append_data(&mut header, path, std::io::empty())
                .expect("append fifo");
            self
        }

        /// Append a file whose name is written verbatim into the header,
        /// bypassing the builder's `..` validation.
        pub fn raw_file(mut self, path: &str, content: &[u8]) -> Self {
            let mut header = Header::new_old();
            header.as_old_mut().name[..path.len()].copy_from_slice(path.as_bytes());
            header.set_entry_type(EntryType::Regular);
            header.set_size(content.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            self.builder.append(&header, content).expect("append raw");
            self
        }

        pub fn build(self) -> Vec<u8> {
            self.builder.into_inner().expect("finish tar")
        }
    }

    #[test]
    fn kind_names_round_trip_through_from_str() {
        use super::ArtifactKind;
        for name in ArtifactKind::names() {
            let kind: ArtifactKind = name.parse().unwrap();
            assert_eq!(kind.as_str(), name);
        }
        assert!("socket".parse::<ArtifactKind>().is_err());
    }
}
