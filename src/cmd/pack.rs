use std::path::Path;

use anyhow::Result;
use crossterm::style::{self, Stylize};
use oci_distribution::client::{Config, ImageLayer};
use serde::Serialize;

use crate::artifact::ArtifactError;
use crate::config::AppConfig;
use crate::format::format_bytes;
use crate::progress;
use crate::source::pack;
use crate::source::registry::RegistryClient;

#[derive(Serialize)]
struct PackReport {
    image: String,
    source: String,
    entries: usize,
    diff_id: String,
    layer_size: usize,
    manifest_url: String,
}

/// Pack `source` into a single-layer image and push it as `image`.
pub fn run(cfg: &AppConfig, image: &str, source: &str) -> Result<()> {
    if image.is_empty() {
        return Err(ArtifactError::MissingInput("image ref").into());
    }

    let spinner = progress::spinner(format!("Packing {source}"), cfg.wants_json());
    let packed = pack::pack(Path::new(source))?;
    let layer_size = packed.layer.len();

    spinner.set_message(format!("Pushing {image}"));
    let client = RegistryClient::new(&cfg.registry)?;
    let response = client.push(
        image,
        &[ImageLayer::new(packed.layer, packed.layer_media_type, None)],
        Config::new(packed.config, packed.config_media_type, None),
        None,
    )?;
    spinner.finish(format!(
        "Pushed {} ({} entries, {})",
        style::style(image).cyan(),
        packed.entries,
        format_bytes(layer_size as u64)
    ));

    let report = PackReport {
        image: image.to_string(),
        source: source.to_string(),
        entries: packed.entries,
        diff_id: packed.diff_id,
        layer_size,
        manifest_url: response.manifest_url,
    };
    if cfg.wants_json() {
        return super::emit_json(cfg, &report);
    }
    println!("{}", report.manifest_url.as_str().dim());
    Ok(())
}
