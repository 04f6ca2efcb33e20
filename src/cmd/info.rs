use anyhow::Result;

use crate::artifact::locate;
use crate::config::AppConfig;
use crate::format;

pub fn run(cfg: &AppConfig, image: &str, artifact: &str, layer: Option<&str>) -> Result<()> {
    locate::require_selector(artifact)?;

    let (stream, spinner) = super::open_stream(cfg, image, layer)?;
    let found = locate::find_first(stream, artifact)?;
    spinner.clear();

    if cfg.wants_json() {
        return super::emit_json(cfg, &found);
    }

    println!("{}", format::section("Artifact info:"));
    println!("{}", format::artifact_header());
    println!("{}", format::artifact_row(&found));
    Ok(())
}
