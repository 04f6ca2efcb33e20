use anyhow::Result;

use crate::config::AppConfig;
use crate::format;
use crate::progress;
use crate::source;

pub fn run(cfg: &AppConfig, image: &str) -> Result<()> {
    let spinner = progress::spinner(format!("Reading metadata of {image}"), cfg.wants_json());
    let meta = source::open(image, &cfg.registry)?.fetch_meta(image)?;
    spinner.clear();

    if cfg.wants_json() {
        return super::emit_json(cfg, &meta);
    }

    println!("{}", format::section("Image metadata:"));
    println!("{}", meta.render());
    Ok(())
}
