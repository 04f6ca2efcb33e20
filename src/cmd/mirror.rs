use anyhow::Result;
use crossterm::style::{self, Stylize};

use crate::config::AppConfig;
use crate::format::format_bytes;
use crate::progress;
use crate::source::registry::{self, RegistryClient};

/// Copy an image between registries. The global credentials apply to the
/// source; `--dst-username`/`--dst-password` override them for the
/// destination.
pub fn run(
    cfg: &AppConfig,
    source: &str,
    dest: &str,
    dst_username: Option<String>,
    dst_password: Option<String>,
) -> Result<()> {
    let source_client = RegistryClient::new(&cfg.registry)?;
    let dest_client = RegistryClient::new(&cfg.registry.with_credentials(dst_username, dst_password))?;

    let spinner = progress::spinner(format!("Mirroring {source} to {dest}"), cfg.wants_json());
    let result = registry::mirror(&source_client, &dest_client, source, dest)?;
    spinner.finish(format!(
        "Mirrored {} to {} ({})",
        source.cyan(),
        style::style(dest).cyan(),
        format_bytes(result.size)
    ));
    tracing::debug!(digest = %result.digest, "mirrored");

    if cfg.wants_json() {
        return super::emit_json(cfg, &result);
    }
    println!("{}", result.digest);
    Ok(())
}
