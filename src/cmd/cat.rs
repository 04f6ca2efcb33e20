use std::io::{self, Write};

use anyhow::{Context, Result};

use crate::artifact::locate;
use crate::config::AppConfig;

pub fn run(cfg: &AppConfig, image: &str, artifact: &str) -> Result<()> {
    locate::require_selector(artifact)?;

    let (stream, spinner) = super::open_stream(cfg, image, None)?;
    let content = locate::read_first(stream, artifact)?;
    spinner.clear();

    let mut stdout = io::stdout().lock();
    stdout
        .write_all(&content)
        .and_then(|_| stdout.flush())
        .context("Failed to write artifact to stdout")
}
