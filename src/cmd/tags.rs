use anyhow::Result;
use crossterm::style::Stylize;

use crate::config::AppConfig;
use crate::progress;
use crate::source::registry::RegistryClient;

pub fn run(cfg: &AppConfig, repository: &str) -> Result<()> {
    let spinner = progress::spinner(format!("Listing tags of {repository}"), cfg.wants_json());
    let tags = RegistryClient::new(&cfg.registry)?.tags(repository)?;
    spinner.finish(format!("Found {} tags", tags.len()));

    if cfg.wants_json() {
        return super::emit_json(cfg, &tags);
    }

    println!("{}", "Available tags:".bold());
    for tag in &tags {
        println!(" {tag}");
    }
    Ok(())
}
