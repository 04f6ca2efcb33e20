use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::Deserialize;
use sha2::{Digest, Sha256};

use super::flatten::normalize;
use super::{ConfigFile, ImageMeta, ImageSource, LayerBlob, LayerMeta, decode_layer};

/// Blobs at most this large are kept in memory on the first pass.
const SMALL_BLOB: u64 = 1_000_000;

const DOCKER_MANIFEST_TYPE: &str = "application/vnd.docker.distribution.manifest.v2+json";
const DOCKER_LAYER_TYPE: &str = "application/vnd.docker.image.rootfs.diff.tar";

// ---- Docker-format archive structs (manifest.json) ----

#[derive(Deserialize)]
struct DockerManifestEntry {
    #[serde(rename = "Config")]
    config: String,
    #[serde(rename = "Layers")]
    layers: Vec<String>,
}

// ---- OCI-layout archive structs (index.json) ----

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct OciIndex {
    #[serde(default)]
    media_type: Option<String>,
    manifests: Vec<OciDescriptor>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct OciDescriptor {
    #[serde(default)]
    media_type: String,
    digest: String,
    #[serde(default)]
    size: u64,
    #[serde(default)]
    platform: Option<OciPlatform>,
    #[serde(default)]
    annotations: BTreeMap<String, String>,
}

#[derive(Deserialize)]
struct OciPlatform {
    architecture: String,
    os: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct OciManifest {
    #[serde(default)]
    media_type: Option<String>,
    config: OciDescriptor,
    layers: Vec<OciDescriptor>,
    #[serde(default)]
    annotations: BTreeMap<String, String>,
}

/// Where one layer lives inside the archive.
struct LayerRef {
    path: String,
    digest: String,
    diff_id: Option<String>,
    media_type: String,
    size: u64,
    annotations: BTreeMap<String, String>,
}

/// Everything the archive says about its image, minus the layer bytes.
struct Layout {
    digest: String,
    media_type: String,
    config: Vec<u8>,
    annotations: BTreeMap<String, String>,
    layers: Vec<LayerRef>,
}

/// Reads images from a tar archive written by `docker save`, `podman save`
/// or any OCI-layout exporter, optionally gzip-compressed.
pub struct ArchiveSource {
    archive_path: PathBuf,
}

impl ArchiveSource {
    pub fn new(archive_path: PathBuf) -> Self {
        Self { archive_path }
    }

    fn entries(&self) -> Result<tar::Archive<Box<dyn Read>>> {
        let file = File::open(&self.archive_path)
            .with_context(|| format!("Failed to open {}", self.archive_path.display()))?;
        Ok(tar::Archive::new(decode_layer(file)?))
    }

    /// First pass: manifests, configs and entry sizes.
    fn read_layout(&self) -> Result<Layout> {
        let mut archive = self.entries()?;
        let mut small_blobs: HashMap<String, Vec<u8>> = HashMap::new();
        let mut sizes: HashMap<String, u64> = HashMap::new();

        for entry_result in archive.entries().context("Failed to read tar entries")? {
            let mut entry = entry_result.context("Failed to read tar entry")?;
            let Some(entry_path) = normalize(&entry.path()?.to_string_lossy()) else {
                continue;
            };
            sizes.insert(entry_path.clone(), entry.size());

            if entry.size() < SMALL_BLOB || entry_path.ends_with(".json") {
                let mut data = Vec::new();
                entry
                    .read_to_end(&mut data)
                    .with_context(|| format!("Failed to read {entry_path}"))?;
                small_blobs.insert(entry_path, data);
            }
        }

        if let Some(data) = small_blobs.get("manifest.json") {
            docker_layout(data, &small_blobs, &sizes)
        } else if let Some(data) = small_blobs.get("index.json") {
            oci_layout(data, &small_blobs)
        } else {
            anyhow::bail!("Unrecognized archive format: no manifest.json or index.json found")
        }
    }

    /// Second pass: spool the layer blobs the layout refers to, base first.
    fn spool_layers(&self, layout: &Layout) -> Result<Vec<LayerBlob>> {
        let mut uses: HashMap<&str, usize> = HashMap::new();
        for layer in &layout.layers {
            *uses.entry(layer.path.as_str()).or_default() += 1;
        }

        let mut spooled: HashMap<String, File> = HashMap::new();
        let mut archive = self.entries()?;
        for entry_result in archive.entries().context("Failed to read tar entries")? {
            let mut entry = entry_result.context("Failed to read tar entry")?;
            let Some(entry_path) = normalize(&entry.path()?.to_string_lossy()) else {
                continue;
            };
            if !uses.contains_key(entry_path.as_str()) || spooled.contains_key(&entry_path) {
                continue;
            }
            let mut file = tempfile::tempfile().context("Failed to create temp file")?;
            io::copy(&mut entry, &mut file)
                .with_context(|| format!("Failed to read layer {entry_path}"))?;
            spooled.insert(entry_path, file);
        }

        let mut blobs = Vec::with_capacity(layout.layers.len());
        for layer in &layout.layers {
            let remaining = uses
                .get_mut(layer.path.as_str())
                .context("layer bookkeeping out of sync")?;
            *remaining -= 1;

            let file = if *remaining == 0 {
                spooled.remove(&layer.path)
            } else {
                spooled.get_mut(&layer.path).map(copy_blob).transpose()?
            }
            .with_context(|| format!("Layer {} not found in archive", layer.path))?;

            blobs.push(LayerBlob {
                digest: layer.digest.clone(),
                diff_id: layer.diff_id.clone(),
                file,
            });
        }
        Ok(blobs)
    }

    fn load(&self) -> Result<Vec<LayerBlob>> {
        let layout = self
            .read_layout()
            .with_context(|| format!("Failed to parse archive {}", self.archive_path.display()))?;
        tracing::debug!(layers = layout.layers.len(), digest = %layout.digest, "archive layout read");
        self.spool_layers(&layout)
    }
}

/// Same layer listed twice needs two independent read cursors.
fn copy_blob(file: &mut File) -> Result<File> {
    let mut copy = tempfile::tempfile().context("Failed to create temp file")?;
    file.seek(SeekFrom::Start(0))?;
    io::copy(file, &mut copy)?;
    Ok(copy)
}

fn blob_path(digest: &str) -> String {
    format!("blobs/{}", digest.replacen(':', "/", 1))
}

fn digest_from_path(path: &str) -> Option<String> {
    let rest = path.strip_prefix("blobs/")?;
    let (algorithm, hex) = rest.split_once('/')?;
    Some(format!("{algorithm}:{hex}"))
}

fn docker_layout(
    manifest: &[u8],
    blobs: &HashMap<String, Vec<u8>>,
    sizes: &HashMap<String, u64>,
) -> Result<Layout> {
    let entries: Vec<DockerManifestEntry> =
        serde_json::from_slice(manifest).context("Failed to parse manifest.json")?;
    let me = entries
        .into_iter()
        .next()
        .context("Empty manifest in archive")?;

    let config = blobs
        .get(&me.config)
        .with_context(|| format!("Config {} not found in archive", me.config))?
        .clone();
    let parsed = ConfigFile::parse(&config)?;
    let diff_ids = parsed.diff_ids();

    let layers = me
        .layers
        .iter()
        .enumerate()
        .map(|(i, path)| {
            let diff_id = diff_ids.get(i).cloned();
            let digest = digest_from_path(path)
                .or_else(|| diff_id.clone())
                .unwrap_or_else(|| path.clone());
            LayerRef {
                path: path.clone(),
                digest,
                diff_id,
                media_type: DOCKER_LAYER_TYPE.to_string(),
                size: sizes.get(path).copied().unwrap_or(0),
                annotations: BTreeMap::new(),
            }
        })
        .collect();

    Ok(Layout {
        digest: format!("sha256:{:x}", Sha256::digest(&config)),
        media_type: DOCKER_MANIFEST_TYPE.to_string(),
        config,
        annotations: BTreeMap::new(),
        layers,
    })
}

fn host_platform() -> (&'static str, &'static str) {
    let arch = match std::env::consts::ARCH {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        other => other,
    };
    ("linux", arch)
}

fn oci_layout(index: &[u8], blobs: &HashMap<String, Vec<u8>>) -> Result<Layout> {
    let blob = |digest: &str| {
        blobs
            .get(&blob_path(digest))
            .with_context(|| format!("Blob {digest} not found in archive"))
    };

    let index: OciIndex = serde_json::from_slice(index).context("Failed to parse index.json")?;
    let mut desc = index.manifests.first().context("No manifests in index.json")?;
    let mut manifest_bytes = blob(&desc.digest)?;

    // A nested image index: pick the host platform, or the first entry.
    let nested: Option<OciIndex> = serde_json::from_slice::<OciIndex>(manifest_bytes)
        .ok()
        .filter(|i| i.media_type.as_deref().is_none_or(|t| t.contains("index")));
    let nested_owned;
    if let Some(nested) = nested {
        nested_owned = nested;
        let (os, arch) = host_platform();
        desc = nested_owned
            .manifests
            .iter()
            .find(|m| m.platform.as_ref().is_some_and(|p| p.os == os && p.architecture == arch))
            .or_else(|| nested_owned.manifests.first())
            .context("Empty image index in archive")?;
        manifest_bytes = blob(&desc.digest)?;
    }

    let manifest: OciManifest =
        serde_json::from_slice(manifest_bytes).context("Failed to parse OCI manifest")?;
    let config = blob(&manifest.config.digest)?.clone();
    let parsed = ConfigFile::parse(&config)?;
    let diff_ids = parsed.diff_ids();

    let layers = manifest
        .layers
        .into_iter()
        .enumerate()
        .map(|(i, d)| LayerRef {
            path: blob_path(&d.digest),
            diff_id: diff_ids.get(i).cloned(),
            digest: d.digest,
            media_type: d.media_type,
            size: d.size,
            annotations: d.annotations,
        })
        .collect();

    Ok(Layout {
        digest: desc.digest.clone(),
        media_type: manifest
            .media_type
            .unwrap_or_else(|| desc.media_type.clone()),
        config,
        annotations: manifest.annotations,
        layers,
    })
}

impl ImageSource for ArchiveSource {
    fn fetch_flattened_filesystem(&mut self, _image: &str) -> Result<Box<dyn Read>> {
        super::flatten_layers(self.load()?)
    }

    fn fetch_layer_by_digest(&mut self, image: &str, digest: &str) -> Result<Box<dyn Read>> {
        super::select_layer(image, self.load()?, digest)
    }

    fn fetch_meta(&mut self, _image: &str) -> Result<ImageMeta> {
        let layout = self
            .read_layout()
            .with_context(|| format!("Failed to parse archive {}", self.archive_path.display()))?;

        let layers: Vec<LayerMeta> = layout
            .layers
            .into_iter()
            .map(|l| LayerMeta {
                digest: l.digest,
                size: l.size,
                media_type: l.media_type,
                annotations: l.annotations,
            })
            .collect();

        let meta = ImageMeta {
            digest: layout.digest,
            media_type: layout.media_type,
            size: layout.config.len() as u64 + layers.iter().map(|l| l.size).sum::<u64>(),
            annotations: layout.annotations,
            layers,
            ..ImageMeta::default()
        };
        Ok(meta.with_config(ConfigFile::parse(&layout.config)?))
    }
}
