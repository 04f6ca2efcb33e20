pub mod cat;
pub mod copy;
pub mod diff;
pub mod export;
pub mod extract;
pub mod has;
pub mod info;
pub mod list;
pub mod meta;
pub mod mirror;
pub mod pack;
pub mod tags;
pub mod version;

use std::fs;
use std::io::Read;

use anyhow::{Context, Result};
use crossterm::style::Stylize;
use serde::Serialize;

use crate::config::AppConfig;
use crate::progress::{self, Spinner};
use crate::source;

/// Open `image` and return its flattened filesystem, or one layer of it when
/// `layer` is given, with bytes counted on a spinner.
pub(crate) fn open_stream(
    cfg: &AppConfig,
    image: &str,
    layer: Option<&str>,
) -> Result<(Box<dyn Read>, Spinner)> {
    let spinner = progress::spinner(format!("Reading {image}"), cfg.wants_json());
    let mut src = source::open(image, &cfg.registry)?;

    let stream = match layer {
        Some(digest) => src.fetch_layer_by_digest(image, digest)?,
        None => src.fetch_flattened_filesystem(image)?,
    };
    spinner.set_message(format!("Walking {image}"));
    let stream: Box<dyn Read> = Box::new(spinner.wrap_read(stream));
    Ok((stream, spinner))
}

/// Print `value` as pretty JSON to stdout (`-`) or the `--json` file.
pub(crate) fn emit_json<T: Serialize>(cfg: &AppConfig, value: &T) -> Result<()> {
    let output = serde_json::to_string_pretty(value)?;
    match cfg.json.as_deref() {
        Some("-") | None => println!("{output}"),
        Some(dest) => {
            fs::write(dest, &output).with_context(|| format!("Failed to write JSON to {dest}"))?;
            eprintln!("{} Wrote {dest}", "✔".green());
        }
    }
    Ok(())
}
