use anyhow::Result;
use crossterm::style::Stylize;

use crate::artifact::catalog::{self, TypeFilter};
use crate::config::AppConfig;
use crate::format;

pub fn run(cfg: &AppConfig, image: &str, filter: &str, detailed: bool, layer: Option<&str>) -> Result<()> {
    let filter: TypeFilter = filter.parse()?;

    let (stream, spinner) = super::open_stream(cfg, image, layer)?;
    let catalog = catalog::build_catalog(stream, filter)?;
    spinner.finish(format!("Found {} artifacts in {}", catalog.len(), image.cyan()));

    if cfg.wants_json() {
        return super::emit_json(cfg, &catalog.into_vec());
    }

    println!("{}", format::section("Image artifacts:"));
    if catalog.is_empty() {
        println!("No artifacts found");
        return Ok(());
    }

    if detailed {
        println!("{}", format::artifact_header());
        for artifact in catalog.iter() {
            println!("{}", format::artifact_row(artifact));
        }
    } else {
        for artifact in catalog.iter() {
            println!("{}", artifact.path);
        }
    }

    Ok(())
}
