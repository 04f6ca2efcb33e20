use std::path::Path;

use anyhow::Result;
use crossterm::style::{self, Stylize};

use crate::artifact::{ArtifactError, extract};
use crate::config::AppConfig;
use crate::format::format_bytes;

pub fn run(cfg: &AppConfig, image: &str, output: &str) -> Result<()> {
    if output.is_empty() {
        return Err(ArtifactError::MissingInput("output").into());
    }

    let (stream, spinner) = super::open_stream(cfg, image, None)?;
    let summary = extract::extract_all(stream, Path::new(output))?;
    spinner.finish(format!(
        "Extracted {} into {}",
        image,
        style::style(output).cyan()
    ));

    if cfg.wants_json() {
        return super::emit_json(cfg, &summary);
    }

    println!("  files:       {}", summary.files_extracted);
    println!("  directories: {}", summary.dirs_created);
    println!("  links:       {}", summary.links_created);
    println!("  total size:  {}", format_bytes(summary.total_size_bytes));
    println!("  {}", format!("took {:?}", summary.elapsed).dim());
    Ok(())
}
