use anyhow::Result;
use serde::Serialize;

use crate::config::AppConfig;
use crate::source::pack::platform;

#[derive(Serialize)]
struct VersionInfo {
    version: &'static str,
    platform: &'static str,
    arch: &'static str,
}

pub fn run(cfg: &AppConfig) -> Result<()> {
    let (os, arch) = platform();
    let info = VersionInfo {
        version: env!("CARGO_PKG_VERSION"),
        platform: os,
        arch,
    };

    if cfg.wants_json() {
        return super::emit_json(cfg, &info);
    }
    println!("{} version {} {}/{}", env!("CARGO_PKG_NAME"), info.version, info.platform, info.arch);
    Ok(())
}
