//! Where image bytes come from: local `save` archives or remote registries.

pub mod archive;
pub mod flatten;
pub mod pack;
pub mod registry;

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::artifact::ArtifactError;
use crate::config::RegistryOptions;
use crate::format::format_bytes;

/// Common interface for reading an image's filesystem from different backends.
pub trait ImageSource {
    /// All layers merged top-down with whiteouts applied, as one tar stream.
    fn fetch_flattened_filesystem(&mut self, image: &str) -> Result<Box<dyn Read>>;

    /// One layer's own tar stream, decompressed. Accepts either the blob
    /// digest or the uncompressed diff id.
    fn fetch_layer_by_digest(&mut self, image: &str, digest: &str) -> Result<Box<dyn Read>>;

    /// Manifest and config summary.
    fn fetch_meta(&mut self, image: &str) -> Result<ImageMeta>;
}

/// Pick the backend for `image`: an existing tar file is read locally,
/// anything else is treated as a registry reference.
pub fn open(image: &str, registry: &RegistryOptions) -> Result<Box<dyn ImageSource>> {
    if image.is_empty() {
        return Err(ArtifactError::MissingInput("image ref").into());
    }

    if looks_like_archive(image) && Path::new(image).is_file() {
        tracing::debug!(path = image, "reading image from local archive");
        return Ok(Box::new(archive::ArchiveSource::new(image.into())));
    }

    tracing::debug!(image, insecure = registry.insecure, "reading image from registry");
    Ok(Box::new(registry::RegistryClient::new(registry)?))
}

pub fn looks_like_archive(image: &str) -> bool {
    let p = Path::new(image);
    matches!(
        p.extension().and_then(|e| e.to_str()),
        Some("tar" | "gz" | "tgz")
    ) || image.ends_with(".tar.gz")
}

/// A layer blob spooled to an anonymous temp file, still compressed.
pub struct LayerBlob {
    pub digest: String,
    pub diff_id: Option<String>,
    pub file: File,
}

impl LayerBlob {
    pub fn matches(&self, digest: &str) -> bool {
        let wanted = digest.strip_prefix("sha256:").unwrap_or(digest);
        let same = |d: &str| d.strip_prefix("sha256:").unwrap_or(d) == wanted;
        same(&self.digest) || self.diff_id.as_deref().is_some_and(same)
    }
}

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const ZSTD_MAGIC: [u8; 4] = [0x28, 0xb5, 0x2f, 0xfd];

/// Wrap a layer blob in the decompressor its leading bytes ask for.
pub fn decode_layer<R: Read + 'static>(reader: R) -> Result<Box<dyn Read>> {
    let mut buffered = BufReader::new(reader);
    let head = buffered.fill_buf().context("Failed to read layer header")?;

    if head.starts_with(&GZIP_MAGIC) {
        Ok(Box::new(flate2::read::GzDecoder::new(buffered)))
    } else if head.starts_with(&ZSTD_MAGIC) {
        let decoder = zstd::stream::Decoder::with_buffer(buffered)
            .context("Failed to start zstd decoder")?;
        Ok(Box::new(decoder))
    } else {
        Ok(Box::new(buffered))
    }
}

/// Merge spooled layers (base first) into a rewound temp file.
pub fn flatten_layers(layers: Vec<LayerBlob>) -> Result<Box<dyn Read>> {
    let mut readers = Vec::with_capacity(layers.len());
    for mut layer in layers.into_iter().rev() {
        layer.file.seek(SeekFrom::Start(0))?;
        readers.push(decode_layer(layer.file)?);
    }

    let spool = tempfile::tempfile().context("Failed to create temp file")?;
    let mut merged = flatten::flatten(readers, spool)?;
    merged.seek(SeekFrom::Start(0))?;
    Ok(Box::new(merged))
}

/// Decompressed stream of the layer matching `digest`.
pub fn select_layer(image: &str, layers: Vec<LayerBlob>, digest: &str) -> Result<Box<dyn Read>> {
    let known: Vec<String> = layers.iter().map(|l| l.digest.clone()).collect();
    let mut layer = layers
        .into_iter()
        .find(|l| l.matches(digest))
        .with_context(|| {
            format!(
                "layer {digest} not found in {image} (layers: {})",
                known.join(", ")
            )
        })?;
    layer.file.seek(SeekFrom::Start(0))?;
    decode_layer(layer.file)
}

// ---- Image config (shared by archives and registries) ----

#[derive(Debug, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub architecture: Option<String>,
    #[serde(default)]
    pub os: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub created: Option<String>,
    #[serde(default)]
    pub config: Option<ContainerConfig>,
    #[serde(default)]
    pub rootfs: Option<Rootfs>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ContainerConfig {
    #[serde(default)]
    pub env: Option<Vec<String>>,
    #[serde(default)]
    pub cmd: Option<Vec<String>>,
    #[serde(default)]
    pub entrypoint: Option<Vec<String>>,
    #[serde(default)]
    pub working_dir: Option<String>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub labels: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Default, Deserialize)]
pub struct Rootfs {
    #[serde(default)]
    pub diff_ids: Vec<String>,
}

impl ConfigFile {
    pub fn parse(data: &[u8]) -> Result<Self> {
        serde_json::from_slice(data).context("Failed to parse image config")
    }

    pub fn diff_ids(&self) -> &[String] {
        self.rootfs.as_ref().map(|r| r.diff_ids.as_slice()).unwrap_or(&[])
    }
}

// ---- Metadata report ----

#[derive(Debug, Clone, Serialize)]
pub struct LayerMeta {
    pub digest: String,
    pub size: u64,
    #[serde(rename = "mediaType")]
    pub media_type: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    pub digest: String,
    pub media_type: String,
    pub architecture: String,
    pub os: String,
    pub size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub cmd: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub entrypoint: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    pub layers: Vec<LayerMeta>,
}

impl ImageMeta {
    /// Fill the config-derived fields. Empty strings and lists are dropped.
    pub fn with_config(mut self, config: ConfigFile) -> Self {
        let non_empty = |s: Option<String>| s.filter(|s| !s.is_empty());
        self.author = non_empty(config.author);
        self.architecture = config.architecture.unwrap_or_default();
        self.os = config.os.unwrap_or_default();
        self.created = non_empty(config.created);
        if let Some(c) = config.config {
            self.env = c.env.unwrap_or_default();
            self.cmd = c.cmd.unwrap_or_default();
            self.entrypoint = c.entrypoint.unwrap_or_default();
            self.working_dir = non_empty(c.working_dir);
            self.user = non_empty(c.user);
            self.labels = c.labels.unwrap_or_default();
        }
        self
    }

    /// `key: value` report in manifest order.
    pub fn render(&self) -> String {
        let mut out = Vec::new();
        if let Some(author) = &self.author {
            out.push(format!("Author: {author}"));
        }
        out.push(format!("Digest: {}", self.digest));
        out.push(format!("MediaType: {}", self.media_type));
        out.push(format!("Architecture: {}", self.architecture));
        out.push(format!("OS: {}", self.os));
        out.push(format!("Size: {}", format_bytes(self.size)));
        if let Some(created) = &self.created {
            out.push(format!("Created: {created}"));
        }
        push_list(&mut out, "Env", &self.env);
        push_list(&mut out, "Cmd", &self.cmd);
        push_list(&mut out, "Entrypoint", &self.entrypoint);
        if let Some(dir) = &self.working_dir {
            out.push(format!("WorkingDir: {dir}"));
        }
        if let Some(user) = &self.user {
            out.push(format!("User: {user}"));
        }
        push_map(&mut out, "Labels", "  ", &self.labels);
        push_map(&mut out, "Annotations", "  ", &self.annotations);
        out.push("Layers:".to_string());
        for layer in &self.layers {
            out.push(format!("  - Digest: {}", layer.digest));
            out.push(format!("    Size: {}", format_bytes(layer.size)));
            out.push(format!("    MediaType: {}", layer.media_type));
            push_map(&mut out, "    Annotations", "      ", &layer.annotations);
        }
        out.join("\n")
    }
}

fn push_list(out: &mut Vec<String>, key: &str, values: &[String]) {
    if values.is_empty() {
        return;
    }
    out.push(format!("{key}:"));
    out.extend(values.iter().map(|v| format!("  - {v}")));
}

fn push_map(out: &mut Vec<String>, key: &str, indent: &str, values: &BTreeMap<String, String>) {
    if values.is_empty() {
        return;
    }
    out.push(format!("{key}:"));
    out.extend(values.iter().map(|(k, v)| format!("{indent}{k}: {v}")));
}
