use anyhow::Result;
use crossterm::style::Stylize;
use serde::Serialize;

use crate::artifact::locate;
use crate::config::AppConfig;

#[derive(Serialize)]
struct HasReport<'a> {
    image: &'a str,
    artifact: &'a str,
    found: bool,
}

/// A missing artifact is an answer, not a failure: exit status stays 0.
pub fn run(cfg: &AppConfig, image: &str, artifact: &str) -> Result<()> {
    locate::require_selector(artifact)?;

    let (stream, spinner) = super::open_stream(cfg, image, None)?;
    let found = locate::exists(stream, artifact)?;
    spinner.clear();

    if cfg.wants_json() {
        return super::emit_json(cfg, &HasReport { image, artifact, found });
    }

    if found {
        println!("{} Artifact {} found in {}", "✓".green(), artifact.yellow(), image.blue());
    } else {
        println!("{} Artifact {} not found in {}", "✗".red(), artifact.yellow(), image.blue());
    }
    Ok(())
}
