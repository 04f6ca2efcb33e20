use anyhow::Result;

use crate::artifact::catalog::{self, Catalog, TypeFilter};
use crate::artifact::diff::{self, DiffFilter};
use crate::config::AppConfig;

fn catalog_of(cfg: &AppConfig, image: &str) -> Result<Catalog> {
    let (stream, spinner) = super::open_stream(cfg, image, None)?;
    let catalog = catalog::build_catalog(stream, TypeFilter::All)?;
    spinner.finish(format!("Indexed {} artifacts in {image}", catalog.len()));
    Ok(catalog)
}

pub fn run(
    cfg: &AppConfig,
    source: &str,
    target: &str,
    show_unchanged: bool,
    filter: &str,
) -> Result<()> {
    let filter: DiffFilter = filter.parse()?;

    let source_catalog = catalog_of(cfg, source)?;
    let target_catalog = catalog_of(cfg, target)?;

    let result = diff::compare(source, &source_catalog, target, &target_catalog, show_unchanged)
        .filtered(filter);

    if cfg.wants_json() {
        return super::emit_json(cfg, &result);
    }

    print!("{}", result.render(show_unchanged));
    Ok(())
}
