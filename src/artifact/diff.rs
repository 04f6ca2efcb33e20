//! Size/mode based comparison of two image catalogs.

use std::fmt::Write as _;
use std::str::FromStr;

use crossterm::style::Stylize;
use serde::Serialize;

use super::catalog::Catalog;
use super::{Artifact, ArtifactError, ArtifactKind, format_mode};
use crate::format::format_bytes;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DiffStatus {
    Added,
    Removed,
    Modified,
    Unchanged,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiffEntry {
    pub path: String,
    pub status: DiffStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old_size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old_mode: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_mode: Option<String>,
    #[serde(rename = "type")]
    pub kind: ArtifactKind,
}

impl DiffEntry {
    fn added(new: &Artifact) -> Self {
        Self {
            path: new.path.clone(),
            status: DiffStatus::Added,
            old_size: None,
            new_size: Some(new.size),
            old_mode: None,
            new_mode: Some(format_mode(new.mode)),
            kind: new.kind,
        }
    }

    fn removed(old: &Artifact) -> Self {
        Self {
            path: old.path.clone(),
            status: DiffStatus::Removed,
            old_size: Some(old.size),
            new_size: None,
            old_mode: Some(format_mode(old.mode)),
            new_mode: None,
            kind: old.kind,
        }
    }

    fn modified(old: &Artifact, new: &Artifact) -> Self {
        Self {
            path: new.path.clone(),
            status: DiffStatus::Modified,
            old_size: Some(old.size),
            new_size: Some(new.size),
            old_mode: Some(format_mode(old.mode)),
            new_mode: Some(format_mode(new.mode)),
            kind: new.kind,
        }
    }

    fn unchanged(new: &Artifact) -> Self {
        Self {
            status: DiffStatus::Unchanged,
            ..Self::added(new)
        }
    }
}

/// Differences between a source and a target image filesystem.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DiffResult {
    pub source_image: String,
    pub target_image: String,
    pub added: Vec<DiffEntry>,
    pub removed: Vec<DiffEntry>,
    pub modified: Vec<DiffEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unchanged: Option<Vec<DiffEntry>>,
    pub total_added: usize,
    pub total_removed: usize,
    pub total_changed: usize,
}

/// Compare two catalogs by path. An artifact present in both is modified
/// when its size or mode differs; the target's kind is reported.
pub fn compare(
    source_image: &str,
    source: &Catalog,
    target_image: &str,
    target: &Catalog,
    include_unchanged: bool,
) -> DiffResult {
    let mut added = Vec::new();
    let mut removed = Vec::new();
    let mut modified = Vec::new();
    let mut unchanged = Vec::new();

    for old in source.iter() {
        match target.get(&old.path) {
            None => removed.push(DiffEntry::removed(old)),
            Some(new) if old.size != new.size || old.mode != new.mode => {
                modified.push(DiffEntry::modified(old, new));
            }
            Some(new) if include_unchanged => unchanged.push(DiffEntry::unchanged(new)),
            Some(_) => {}
        }
    }

    for new in target.iter() {
        if !source.contains(&new.path) {
            added.push(DiffEntry::added(new));
        }
    }

    for list in [&mut added, &mut removed, &mut modified, &mut unchanged] {
        list.sort_by(|a, b| a.path.cmp(&b.path));
    }

    DiffResult {
        source_image: source_image.to_string(),
        target_image: target_image.to_string(),
        total_added: added.len(),
        total_removed: removed.len(),
        total_changed: modified.len(),
        added,
        removed,
        modified,
        unchanged: include_unchanged.then_some(unchanged),
    }
}

/// Narrows a computed diff to one status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DiffFilter {
    #[default]
    All,
    Added,
    Removed,
    Modified,
}

impl FromStr for DiffFilter {
    type Err = ArtifactError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" | "all" => Ok(Self::All),
            "added" => Ok(Self::Added),
            "removed" => Ok(Self::Removed),
            "modified" => Ok(Self::Modified),
            other => Err(ArtifactError::InvalidDiffFilter(other.to_string())),
        }
    }
}

impl DiffResult {
    /// Keep only the entries (and count) of the selected status.
    pub fn filtered(self, filter: DiffFilter) -> Self {
        let base = Self {
            source_image: self.source_image.clone(),
            target_image: self.target_image.clone(),
            ..Self::default()
        };
        match filter {
            DiffFilter::All => self,
            DiffFilter::Added => Self {
                total_added: self.total_added,
                added: self.added,
                ..base
            },
            DiffFilter::Removed => Self {
                total_removed: self.total_removed,
                removed: self.removed,
                ..base
            },
            DiffFilter::Modified => Self {
                total_changed: self.total_changed,
                modified: self.modified,
                ..base
            },
        }
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.modified.is_empty()
    }

    /// Human-readable report grouped by status.
    pub fn render(&self, show_unchanged: bool) -> String {
        let rule = "─".repeat(61);
        let mut out = String::new();

        let _ = writeln!(
            out,
            "\n{}",
            format!("Comparing {} → {}", self.source_image, self.target_image)
                .blue()
                .bold()
        );
        let _ = writeln!(out, "{}\n", rule.as_str().dim());
        let _ = writeln!(out, "{}", format!("+ Added:    {} files", self.total_added).green().bold());
        let _ = writeln!(out, "{}", format!("- Removed:  {} files", self.total_removed).red().bold());
        let _ = writeln!(out, "{}", format!("~ Modified: {} files", self.total_changed).yellow().bold());
        let _ = writeln!(out, "\n{}\n", rule.as_str().dim());

        if self.is_empty() {
            let _ = writeln!(out, "{}\n", "No differences found".dim());
        }

        if !self.added.is_empty() {
            let _ = writeln!(out, "{}", "Added files:".green().bold());
            for entry in &self.added {
                let details = format!("({}, {})", entry.kind, format_bytes(entry.new_size.unwrap_or(0)));
                let _ = writeln!(out, "{}", diff_line(entry, &details));
            }
            out.push('\n');
        }

        if !self.removed.is_empty() {
            let _ = writeln!(out, "{}", "Removed files:".red().bold());
            for entry in &self.removed {
                let details = format!("({}, {})", entry.kind, format_bytes(entry.old_size.unwrap_or(0)));
                let _ = writeln!(out, "{}", diff_line(entry, &details));
            }
            out.push('\n');
        }

        if !self.modified.is_empty() {
            let _ = writeln!(out, "{}", "Modified files:".yellow().bold());
            for entry in &self.modified {
                let _ = writeln!(out, "{}", diff_line(entry, &modified_details(entry)));
            }
            out.push('\n');
        }

        if let Some(unchanged) = self.unchanged.as_ref().filter(|u| show_unchanged && !u.is_empty()) {
            let _ = writeln!(out, "{}", format!("Unchanged files: {}", unchanged.len()).dim());
            for entry in unchanged {
                let details = format!("({})", format_bytes(entry.new_size.unwrap_or(0)));
                let _ = writeln!(out, "{}", diff_line(entry, &details));
            }
        }

        out
    }
}

/// Only the attributes that actually changed are spelled out.
fn modified_details(entry: &DiffEntry) -> String {
    let mut parts = Vec::new();
    if entry.old_size != entry.new_size {
        parts.push(format!(
            "{} → {}",
            format_bytes(entry.old_size.unwrap_or(0)),
            format_bytes(entry.new_size.unwrap_or(0))
        ));
    }
    if entry.old_mode != entry.new_mode {
        parts.push(format!(
            "mode: {} → {}",
            entry.old_mode.as_deref().unwrap_or("-"),
            entry.new_mode.as_deref().unwrap_or("-")
        ));
    }
    if parts.is_empty() {
        String::new()
    } else {
        format!("({})", parts.join(", "))
    }
}

fn diff_line(entry: &DiffEntry, details: &str) -> String {
    let (symbol, path) = match entry.status {
        DiffStatus::Added => ("+ ".green(), entry.path.as_str().green()),
        DiffStatus::Removed => ("- ".red(), entry.path.as_str().red()),
        DiffStatus::Modified => ("~ ".yellow(), entry.path.as_str().yellow()),
        DiffStatus::Unchanged => ("  ".dim(), entry.path.as_str().dim()),
    };
    if details.is_empty() {
        format!("{symbol}{path}")
    } else {
        format!("{symbol}{path} {}", details.dim())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn artifact(path: &str, size: u64, mode: u32) -> Artifact {
        Artifact {
            path: path.to_string(),
            size,
            mode,
            kind: ArtifactKind::File,
            link_target: None,
        }
    }

    fn catalog(entries: &[(&str, u64, u32)]) -> Catalog {
        entries
            .iter()
            .map(|(path, size, mode)| artifact(path, *size, *mode))
            .collect()
    }

    fn paths(entries: &[DiffEntry]) -> Vec<&str> {
        entries.iter().map(|e| e.path.as_str()).collect()
    }

    #[test]
    fn added_removed_unchanged() {
        let source = catalog(&[("a", 10, 0o644), ("b", 20, 0o644)]);
        let target = catalog(&[("b", 20, 0o644), ("c", 5, 0o644)]);

        let result = compare("old", &source, "new", &target, true);

        assert_eq!(paths(&result.removed), vec!["a"]);
        assert_eq!(paths(&result.added), vec!["c"]);
        assert!(result.modified.is_empty());
        assert_eq!(paths(result.unchanged.as_ref().unwrap()), vec!["b"]);
        assert_eq!(result.total_removed, 1);
        assert_eq!(result.total_added, 1);
        assert_eq!(result.total_changed, 0);
    }

    #[test]
    fn size_or_mode_change_is_modified() {
        let source = catalog(&[("size", 1, 0o644), ("mode", 1, 0o644), ("same", 1, 0o644)]);
        let target = catalog(&[("size", 2, 0o644), ("mode", 1, 0o755), ("same", 1, 0o644)]);

        let result = compare("a", &source, "b", &target, false);

        assert_eq!(paths(&result.modified), vec!["mode", "size"]);
        let mode = &result.modified[0];
        assert_eq!(mode.old_mode.as_deref(), Some("0644"));
        assert_eq!(mode.new_mode.as_deref(), Some("0755"));
        assert!(result.unchanged.is_none());
    }

    #[test]
    fn directories_take_part_like_files() {
        let mut old_dir = artifact("var/lib", 0, 0o755);
        old_dir.kind = ArtifactKind::Dir;
        let mut new_dir = old_dir.clone();
        new_dir.mode = 0o700;

        let result = compare(
            "a",
            &[old_dir].into_iter().collect(),
            "b",
            &[new_dir].into_iter().collect(),
            false,
        );

        assert_eq!(result.total_changed, 1);
        assert_eq!(result.modified[0].kind, ArtifactKind::Dir);
    }

    #[test]
    fn output_is_sorted_regardless_of_catalog_order() {
        let source = catalog(&[("z", 1, 0o644), ("m", 1, 0o644), ("a", 1, 0o644)]);
        let target = catalog(&[("y", 1, 0o644), ("b", 1, 0o644), ("k", 1, 0o644)]);

        let result = compare("a", &source, "b", &target, false);

        assert_eq!(paths(&result.removed), vec!["a", "m", "z"]);
        assert_eq!(paths(&result.added), vec!["b", "k", "y"]);
    }

    #[test]
    fn filter_keeps_one_status() {
        let source = catalog(&[("gone", 1, 0o644), ("edit", 1, 0o644)]);
        let target = catalog(&[("new", 1, 0o644), ("edit", 9, 0o644)]);
        let result = compare("a", &source, "b", &target, false);

        let only_added = result.clone().filtered(DiffFilter::Added);
        assert_eq!(paths(&only_added.added), vec!["new"]);
        assert!(only_added.removed.is_empty() && only_added.modified.is_empty());
        assert_eq!((only_added.total_added, only_added.total_removed), (1, 0));

        let all = result.filtered("all".parse().unwrap());
        assert_eq!(all.total_changed, 1);
        assert!(matches!(
            "renamed".parse::<DiffFilter>(),
            Err(ArtifactError::InvalidDiffFilter(f)) if f == "renamed"
        ));
    }

    #[test]
    fn json_shape() {
        let source = catalog(&[("gone", 3, 0o644)]);
        let target = catalog(&[]);
        let result = compare("img:1", &source, "img:2", &target, false);

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["source_image"], "img:1");
        assert_eq!(json["total_removed"], 1);
        assert_eq!(json["removed"][0]["old_mode"], "0644");
        assert_eq!(json["removed"][0]["type"], "file");
        assert!(json["removed"][0].get("new_size").is_none());
        assert!(json.get("unchanged").is_none());
    }

    #[test]
    fn report_mentions_only_changed_attributes() {
        let source = catalog(&[("etc/app.conf", 100, 0o644)]);
        let target = catalog(&[("etc/app.conf", 100, 0o600)]);
        let report = compare("a", &source, "b", &target, false).render(false);

        assert!(report.contains("etc/app.conf"));
        assert!(report.contains("mode: 0644 → 0600"));
        assert!(!report.contains("100 B →"));
    }

    #[test]
    fn identical_catalogs_report_no_differences() {
        let both = catalog(&[("bin/sh", 10, 0o755)]);
        let result = compare("a", &both, "b", &both, false);

        assert!(result.is_empty());
        assert!(result.render(false).contains("No differences found"));

        let changed = compare("a", &both, "b", &catalog(&[]), false);
        assert!(!changed.render(false).contains("No differences found"));
    }
}
