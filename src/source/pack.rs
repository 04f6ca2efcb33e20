//! Build a single-layer image from local files.

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use flate2::Compression;
use flate2::write::GzEncoder;
use oci_spec::image::MediaType;
use serde::Serialize;
use sha2::{Digest, Sha256};

/// An image ready to push: one gzip layer plus its config.
pub struct PackedImage {
    pub layer: Vec<u8>,
    pub layer_media_type: String,
    /// sha256 of the uncompressed layer tar.
    pub diff_id: String,
    pub config: Vec<u8>,
    pub config_media_type: String,
    pub entries: usize,
}

#[derive(Serialize)]
struct ImageConfig {
    created: String,
    architecture: String,
    os: String,
    config: ContainerConfig,
    rootfs: Rootfs,
    history: Vec<History>,
}

#[derive(Serialize)]
struct ContainerConfig {
    #[serde(rename = "Labels")]
    labels: BTreeMap<String, String>,
}

#[derive(Serialize)]
struct Rootfs {
    #[serde(rename = "type")]
    kind: &'static str,
    diff_ids: Vec<String>,
}

#[derive(Serialize)]
struct History {
    created: String,
    created_by: String,
}

/// Tees everything written into a sha256 hasher.
struct DigestWriter<W> {
    inner: W,
    hasher: Sha256,
}

impl<W: Write> Write for DigestWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

pub fn platform() -> (&'static str, &'static str) {
    let os = match std::env::consts::OS {
        "macos" => "darwin",
        other => other,
    };
    let arch = match std::env::consts::ARCH {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        other => other,
    };
    (os, arch)
}

fn labels(source: &Path, now: DateTime<Utc>) -> BTreeMap<String, String> {
    let (os, arch) = platform();
    let source = source.display().to_string();
    [
        ("org.opencontainers.image.created", now.to_rfc3339()),
        ("org.opencontainers.image.source", "artship".to_string()),
        ("org.opencontainers.image.title", "Packed by artship".to_string()),
        (
            "org.opencontainers.image.description",
            format!("OCI image created from {source}"),
        ),
        ("org.opencontainers.image.vendor", "artship".to_string()),
        ("org.opencontainers.image.version", "latest".to_string()),
        ("artship.source.path", source),
        ("artship.created.timestamp", now.timestamp().to_string()),
        ("artship.platform.os", os.to_string()),
        ("artship.platform.arch", arch.to_string()),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect()
}

/// Add `path` under `name`, recursing into directories in name order.
/// Sockets, devices and fifos are skipped.
fn append_tree<W: Write>(builder: &mut tar::Builder<W>, path: &Path, name: &Path) -> Result<usize> {
    let meta = fs::symlink_metadata(path)
        .with_context(|| format!("Failed to stat {}", path.display()))?;
    let file_type = meta.file_type();

    if !(file_type.is_file() || file_type.is_dir() || file_type.is_symlink()) {
        tracing::debug!(path = %path.display(), "skipping special file");
        return Ok(0);
    }

    builder
        .append_path_with_name(path, name)
        .with_context(|| format!("Failed to add {} to layer", path.display()))?;
    let mut count = 1;

    if file_type.is_dir() {
        let mut children = fs::read_dir(path)
            .with_context(|| format!("Failed to read directory {}", path.display()))?
            .collect::<io::Result<Vec<_>>>()?;
        children.sort_by_key(|e| e.file_name());
        for child in children {
            count += append_tree(builder, &child.path(), &name.join(child.file_name()))?;
        }
    }
    Ok(count)
}

/// Tar and gzip `source`. A directory's contents land at the image root; a
/// single file lands under its own name.
pub fn build_layer(source: &Path) -> Result<(Vec<u8>, String, usize)> {
    let meta = fs::symlink_metadata(source)
        .with_context(|| format!("source path '{}' does not exist", source.display()))?;

    let writer = DigestWriter {
        inner: GzEncoder::new(Vec::new(), Compression::fast()),
        hasher: Sha256::new(),
    };
    let mut builder = tar::Builder::new(writer);
    builder.follow_symlinks(false);

    let mut count = 0;
    if meta.is_dir() {
        let mut children = fs::read_dir(source)
            .with_context(|| format!("Failed to read directory {}", source.display()))?
            .collect::<io::Result<Vec<_>>>()?;
        children.sort_by_key(|e| e.file_name());
        for child in children {
            count += append_tree(&mut builder, &child.path(), Path::new(&child.file_name()))?;
        }
    } else {
        let name = source
            .file_name()
            .with_context(|| format!("source path '{}' has no file name", source.display()))?;
        count += append_tree(&mut builder, source, Path::new(name))?;
    }

    let writer = builder.into_inner().context("Failed to finish layer tar")?;
    let diff_id = format!("sha256:{:x}", writer.hasher.finalize());
    let layer = writer.inner.finish().context("Failed to finish layer compression")?;
    Ok((layer, diff_id, count))
}

pub fn pack(source: &Path) -> Result<PackedImage> {
    pack_at(source, Utc::now())
}

fn pack_at(source: &Path, now: DateTime<Utc>) -> Result<PackedImage> {
    if source.as_os_str().is_empty() {
        return Err(crate::artifact::ArtifactError::MissingInput("source path").into());
    }

    let (layer, diff_id, entries) = build_layer(source)?;
    let (os, arch) = platform();
    let created = now.to_rfc3339();

    let config = ImageConfig {
        created: created.clone(),
        architecture: arch.to_string(),
        os: os.to_string(),
        config: ContainerConfig {
            labels: labels(source, now),
        },
        rootfs: Rootfs {
            kind: "layers",
            diff_ids: vec![diff_id.clone()],
        },
        history: vec![History {
            created,
            created_by: format!("artship pack {}", source.display()),
        }],
    };

    tracing::debug!(%diff_id, entries, compressed = layer.len(), "layer built");

    Ok(PackedImage {
        layer,
        layer_media_type: MediaType::ImageLayerGzip.to_string(),
        diff_id,
        config: serde_json::to_vec(&config).context("Failed to encode image config")?,
        config_media_type: MediaType::ImageConfig.to_string(),
        entries,
    })
}

#[cfg(test)]
mod tests {
    use std::io::{Cursor, Read};

    use super::*;
    use crate::artifact::catalog::{TypeFilter, build_catalog};
    use crate::source::{ConfigFile, decode_layer};

    fn layer_paths(layer: Vec<u8>) -> Vec<String> {
        let stream = decode_layer(Cursor::new(layer)).unwrap();
        build_catalog(stream, TypeFilter::All)
            .unwrap()
            .into_vec()
            .into_iter()
            .map(|a| a.path)
            .collect()
    }

    #[test]
    fn directory_contents_land_at_root() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("bin")).unwrap();
        fs::write(dir.path().join("bin/tool"), b"#!/bin/sh\n").unwrap();
        fs::write(dir.path().join("README"), b"hi").unwrap();

        let packed = pack(dir.path()).unwrap();

        assert_eq!(packed.entries, 3);
        assert_eq!(packed.layer_media_type, "application/vnd.oci.image.layer.v1.tar+gzip");
        let paths = layer_paths(packed.layer);
        assert!(paths.iter().any(|p| p == "README"));
        assert!(paths.iter().any(|p| p.trim_end_matches('/') == "bin"));
        assert!(paths.iter().any(|p| p == "bin/tool"));
    }

    #[test]
    fn single_file_keeps_its_name() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("app.bin");
        fs::write(&file, b"payload").unwrap();

        let packed = pack(&file).unwrap();

        assert_eq!(layer_paths(packed.layer), vec!["app.bin"]);
    }

    #[test]
    fn diff_id_is_digest_of_uncompressed_tar() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a"), b"a").unwrap();

        let packed = pack(dir.path()).unwrap();

        let mut tar = Vec::new();
        decode_layer(Cursor::new(packed.layer.clone()))
            .unwrap()
            .read_to_end(&mut tar)
            .unwrap();
        assert_eq!(packed.diff_id, format!("sha256:{:x}", Sha256::digest(&tar)));

        let config = ConfigFile::parse(&packed.config).unwrap();
        assert_eq!(config.diff_ids(), [packed.diff_id.clone()]);
    }

    #[test]
    fn config_carries_labels_and_platform() {
        let dir = tempfile::tempdir().unwrap();
        let now = DateTime::parse_from_rfc3339("2024-05-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);

        let packed = pack_at(dir.path(), now).unwrap();
        let config: serde_json::Value = serde_json::from_slice(&packed.config).unwrap();

        assert_eq!(config["os"], platform().0);
        assert_eq!(config["created"], "2024-05-01T12:00:00+00:00");
        let labels = &config["config"]["Labels"];
        assert_eq!(labels["org.opencontainers.image.vendor"], "artship");
        assert_eq!(labels["artship.created.timestamp"], "1714564800");
    }

    #[test]
    fn missing_source_is_an_error() {
        assert!(pack(Path::new("/definitely/not/here")).is_err());
        assert!(pack(Path::new("")).is_err());
    }
}
