//! Remote registries through `oci-distribution`.
//!
//! The client is async; every public method drives it to completion on a
//! runtime owned by the client, so callers stay synchronous.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;

use anyhow::{Context, Result};
use oci_distribution::client::{ClientConfig, ClientProtocol, Config, ImageLayer, PushResponse};
use oci_distribution::manifest::{ImageIndexEntry, OciDescriptor, OciImageManifest};
use oci_distribution::secrets::RegistryAuth;
use oci_distribution::{Client, Reference};
use tokio::io::AsyncWriteExt;
use tokio::runtime::Runtime;

use super::{ConfigFile, ImageMeta, ImageSource, LayerBlob, LayerMeta};
use crate::artifact::ArtifactError;
use crate::config::RegistryOptions;

const OCI_MANIFEST_TYPE: &str = "application/vnd.oci.image.manifest.v1+json";

/// An image fully held in memory, ready to be pushed elsewhere.
pub struct PulledImage {
    pub manifest: OciImageManifest,
    pub digest: String,
    pub config: Vec<u8>,
    pub layers: Vec<ImageLayer>,
}

impl PulledImage {
    pub fn size(&self) -> u64 {
        self.config.len() as u64 + self.layers.iter().map(|l| l.data.len() as u64).sum::<u64>()
    }
}

/// Result of mirroring one image.
#[derive(Debug, Clone, serde::Serialize)]
pub struct MirrorResult {
    pub source_image: String,
    pub dest_image: String,
    pub digest: String,
    pub size: u64,
    pub manifest_url: String,
}

pub struct RegistryClient {
    client: Client,
    auth: RegistryAuth,
    runtime: Runtime,
}

impl RegistryClient {
    pub fn new(options: &RegistryOptions) -> Result<Self> {
        let config = ClientConfig {
            protocol: if options.insecure {
                ClientProtocol::Http
            } else {
                ClientProtocol::Https
            },
            accept_invalid_certificates: options.insecure,
            platform_resolver: Some(Box::new(linux_platform_resolver)),
            ..Default::default()
        };

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .context("Failed to start async runtime")?;

        Ok(Self {
            client: Client::new(config),
            auth: to_auth(options),
            runtime,
        })
    }

    fn pull_manifest(&self, reference: &Reference) -> Result<(OciImageManifest, String, Vec<u8>)> {
        let (manifest, digest, config) = self
            .runtime
            .block_on(self.client.pull_manifest_and_config(reference, &self.auth))
            .with_context(|| format!("Failed to pull manifest for {reference}"))?;
        tracing::debug!(%reference, %digest, layers = manifest.layers.len(), "manifest pulled");
        Ok((manifest, digest, config.into_bytes()))
    }

    /// Spool every layer blob of `image` to a temp file, base first.
    fn pull_layers(&self, image: &str) -> Result<Vec<LayerBlob>> {
        let reference = parse_reference(image)?;
        let (manifest, _, config) = self.pull_manifest(&reference)?;
        let config = ConfigFile::parse(&config)?;
        let diff_ids = config.diff_ids();

        let mut blobs = Vec::with_capacity(manifest.layers.len());
        for (i, layer) in manifest.layers.iter().enumerate() {
            tracing::debug!(digest = %layer.digest, size = layer.size, "pulling layer");
            let file = self
                .runtime
                .block_on(spool_blob(&self.client, &reference, layer))?;
            blobs.push(LayerBlob {
                digest: layer.digest.clone(),
                diff_id: diff_ids.get(i).cloned(),
                file,
            });
        }
        Ok(blobs)
    }

    /// Pull manifest, config and every layer into memory.
    pub fn pull(&self, image: &str) -> Result<PulledImage> {
        let reference = parse_reference(image)?;
        let (manifest, digest, config) = self.pull_manifest(&reference)?;

        let mut layers = Vec::with_capacity(manifest.layers.len());
        for layer in &manifest.layers {
            let mut data = Vec::new();
            self.runtime
                .block_on(self.client.pull_blob(&reference, layer, &mut data))
                .with_context(|| format!("Failed to pull layer {}", layer.digest))?;
            layers.push(ImageLayer::new(data, layer.media_type.clone(), None));
        }

        Ok(PulledImage {
            manifest,
            digest,
            config,
            layers,
        })
    }

    /// Upload layers and config, then the manifest. Without a manifest one
    /// is generated from the layers.
    pub fn push(
        &self,
        image: &str,
        layers: &[ImageLayer],
        config: Config,
        manifest: Option<OciImageManifest>,
    ) -> Result<PushResponse> {
        let reference = parse_reference(image)?;
        let response = self
            .runtime
            .block_on(self.client.push(&reference, layers, config, &self.auth, manifest))
            .with_context(|| format!("Failed to push {reference}"))?;
        tracing::debug!(manifest_url = %response.manifest_url, "image pushed");
        Ok(response)
    }

    /// Tags of a repository in alphabetical order.
    pub fn tags(&self, repository: &str) -> Result<Vec<String>> {
        if repository.is_empty() {
            return Err(ArtifactError::MissingInput("repository").into());
        }
        let reference = parse_reference(repository)?;
        let response = self
            .runtime
            .block_on(self.client.list_tags(&reference, &self.auth, None, None))
            .with_context(|| format!("Failed to list tags for {repository}"))?;

        let mut tags = response.tags;
        tags.sort();
        Ok(tags)
    }
}

/// Copy `source` to `dest`. The destination client carries its own
/// credentials.
pub fn mirror(
    source_client: &RegistryClient,
    dest_client: &RegistryClient,
    source: &str,
    dest: &str,
) -> Result<MirrorResult> {
    if source.is_empty() {
        return Err(ArtifactError::MissingInput("source image").into());
    }
    if dest.is_empty() {
        return Err(ArtifactError::MissingInput("destination image").into());
    }

    let pulled = source_client
        .pull(source)
        .with_context(|| format!("Failed to fetch source image {source}"))?;
    let size = pulled.size();
    let media_type = pulled.manifest.config.media_type.clone();

    let response = dest_client
        .push(
            dest,
            &pulled.layers,
            Config::new(pulled.config, media_type, None),
            Some(pulled.manifest),
        )
        .with_context(|| format!("Failed to write image to {dest}"))?;

    Ok(MirrorResult {
        source_image: source.to_string(),
        dest_image: dest.to_string(),
        digest: pulled.digest,
        size,
        manifest_url: response.manifest_url,
    })
}

impl ImageSource for RegistryClient {
    fn fetch_flattened_filesystem(&mut self, image: &str) -> Result<Box<dyn Read>> {
        super::flatten_layers(self.pull_layers(image)?)
    }

    fn fetch_layer_by_digest(&mut self, image: &str, digest: &str) -> Result<Box<dyn Read>> {
        super::select_layer(image, self.pull_layers(image)?, digest)
    }

    fn fetch_meta(&mut self, image: &str) -> Result<ImageMeta> {
        let reference = parse_reference(image)?;
        let (manifest, digest, config) = self.pull_manifest(&reference)?;

        let layers: Vec<LayerMeta> = manifest
            .layers
            .iter()
            .map(|l| LayerMeta {
                digest: l.digest.clone(),
                size: descriptor_size(l),
                media_type: l.media_type.clone(),
                annotations: l.annotations.clone().unwrap_or_default().into_iter().collect(),
            })
            .collect();

        let meta = ImageMeta {
            digest,
            media_type: manifest
                .media_type
                .clone()
                .unwrap_or_else(|| OCI_MANIFEST_TYPE.to_string()),
            size: descriptor_size(&manifest.config) + layers.iter().map(|l| l.size).sum::<u64>(),
            annotations: manifest
                .annotations
                .clone()
                .unwrap_or_default()
                .into_iter()
                .collect::<BTreeMap<_, _>>(),
            layers,
            ..ImageMeta::default()
        };
        Ok(meta.with_config(ConfigFile::parse(&config)?))
    }
}

async fn spool_blob(client: &Client, reference: &Reference, layer: &OciDescriptor) -> Result<File> {
    let spool = tempfile::tempfile().context("Failed to create temp file")?;
    let mut file = tokio::fs::File::from_std(spool);
    client
        .pull_blob(reference, layer, &mut file)
        .await
        .with_context(|| format!("Failed to pull layer {}", layer.digest))?;
    file.flush().await?;
    Ok(file.into_std().await)
}

fn descriptor_size(descriptor: &OciDescriptor) -> u64 {
    u64::try_from(descriptor.size).unwrap_or(0)
}

pub fn parse_reference(image: &str) -> Result<Reference> {
    if image.is_empty() {
        return Err(ArtifactError::MissingInput("image ref").into());
    }
    image
        .parse::<Reference>()
        .with_context(|| format!("Invalid image reference '{image}'"))
}

fn to_auth(options: &RegistryOptions) -> RegistryAuth {
    match options.credentials() {
        Some((user, pass)) => RegistryAuth::Basic(user.to_string(), pass.to_string()),
        None => RegistryAuth::Anonymous,
    }
}

/// Pick the linux manifest for the host CPU out of a multi-platform index.
fn linux_platform_resolver(manifests: &[ImageIndexEntry]) -> Option<String> {
    let arch = match std::env::consts::ARCH {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        other => other,
    };

    manifests
        .iter()
        .find(|entry| {
            entry
                .platform
                .as_ref()
                .is_some_and(|p| p.os == "linux" && p.architecture == arch)
        })
        .map(|entry| entry.digest.clone())
}
