use std::fs::File;
use std::io::{self, BufWriter, Write};

use anyhow::{Context, Result};
use crossterm::style::{self, Stylize};

use crate::artifact::ArtifactError;
use crate::config::AppConfig;
use crate::format::format_bytes;

/// Write the flattened filesystem of `image` to `output` as a plain tar.
pub fn run(cfg: &AppConfig, image: &str, output: &str) -> Result<()> {
    if output.is_empty() {
        return Err(ArtifactError::MissingInput("output").into());
    }

    let (mut stream, spinner) = super::open_stream(cfg, image, None)?;
    let file = File::create(output).with_context(|| format!("Failed to create {output}"))?;
    let mut writer = BufWriter::new(file);
    let written = io::copy(&mut stream, &mut writer)
        .with_context(|| format!("Failed to write {output}"))?;
    writer.flush().with_context(|| format!("Failed to write {output}"))?;

    spinner.finish(format!(
        "Wrote {} ({})",
        style::style(output).cyan(),
        format_bytes(written)
    ));
    Ok(())
}
