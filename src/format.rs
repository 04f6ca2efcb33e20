use crossterm::style::Stylize;

use crate::artifact::Artifact;

/// Human-readable byte count, e.g. `1.5 MB`.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB"];
    let mut size = bytes as f64;
    for unit in UNITS {
        if size < 1024.0 {
            return if size.fract() < 0.05 {
                format!("{:.0} {unit}", size)
            } else {
                format!("{:.1} {unit}", size)
            };
        }
        size /= 1024.0;
    }
    format!("{:.1} TB", size)
}

/// Bold blue title followed by a dim rule, printed before listings.
pub fn section(title: &str) -> String {
    format!("\n{}\n{}", title.blue().bold(), "─".repeat(61).dim())
}

fn size_column(artifact: &Artifact) -> String {
    if artifact.kind.is_sized() {
        format_bytes(artifact.size)
    } else {
        "-".to_string()
    }
}

/// `TYPE SIZE MODE PATH` table header.
pub fn artifact_header() -> String {
    format!(
        "{:<8} {:<10} {:<8} {}\n-------- ---------- -------- --------",
        "TYPE", "SIZE", "MODE", "PATH"
    )
}

pub fn artifact_row(artifact: &Artifact) -> String {
    let mut row = format!(
        "{:<8} {:<10} {:<8} {}",
        artifact.kind.as_str(),
        size_column(artifact),
        artifact.mode_string(),
        artifact.path
    );
    if let Some(target) = &artifact.link_target {
        row.push_str(&format!(" -> {target}"));
    }
    row
}
