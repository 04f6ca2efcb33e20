use std::path::Path;

use anyhow::Result;
use crossterm::style::{self, Stylize};

use crate::artifact::{ArtifactError, extract};
use crate::config::AppConfig;
use crate::format::format_bytes;

pub fn run(cfg: &AppConfig, image: &str, artifacts: &[String], output: &str) -> Result<()> {
    if artifacts.is_empty() {
        return Err(ArtifactError::MissingInput("artifact").into());
    }
    if output.is_empty() {
        return Err(ArtifactError::MissingInput("output").into());
    }

    let (stream, spinner) = super::open_stream(cfg, image, None)?;
    let report = extract::extract_selected(stream, artifacts, Path::new(output))?;
    spinner.finish(format!(
        "Copied {}/{} artifacts to {} ({}, {:?})",
        report.found,
        report.requested,
        style::style(output).cyan(),
        format_bytes(report.summary.total_size_bytes),
        report.summary.elapsed,
    ));

    if !report.is_complete() {
        eprintln!(
            "{} Not found in {image}: {}",
            "!".yellow().bold(),
            report.missing.join(", ")
        );
    }

    if cfg.wants_json() {
        return super::emit_json(cfg, &report);
    }
    Ok(())
}
