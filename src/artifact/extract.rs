//! Materializing tar entries on the local filesystem.

use std::cmp::Reverse;
use std::fs::{self, OpenOptions};
use std::io::{self, Read};
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::{Component, Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use serde::Serialize;

use super::matcher::{self, Match};
use super::walk::{self, TarEntry, Visit};
use super::{ArtifactError, ArtifactKind};

/// Counters accumulated during one extraction pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExtractSummary {
    pub files_extracted: u64,
    pub dirs_created: u64,
    pub links_created: u64,
    pub total_size_bytes: u64,
    #[serde(serialize_with = "serialize_elapsed")]
    pub elapsed: Duration,
}

fn serialize_elapsed<S: serde::Serializer>(elapsed: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&format!("{}ms", elapsed.as_millis()))
}

/// Outcome of extracting a set of selected artifacts.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SelectionSummary {
    pub requested: usize,
    /// Selectors that matched at least one entry.
    pub found: usize,
    pub missing: Vec<String>,
    /// Paths (in the image) that were written out.
    pub copied: Vec<String>,
    #[serde(flatten)]
    pub summary: ExtractSummary,
}

impl SelectionSummary {
    pub fn is_complete(&self) -> bool {
        self.found == self.requested
    }
}

/// Resolve `name` beneath `root` without touching the filesystem.
///
/// Leading `/` and `.` components are ignored; `..` pops a component.
/// Returns `None` when the name climbs above `root`.
pub fn contained_path(root: &Path, name: &str) -> Option<PathBuf> {
    let mut parts: Vec<&std::ffi::OsStr> = Vec::new();
    for component in Path::new(name).components() {
        match component {
            Component::Normal(part) => parts.push(part),
            Component::ParentDir => {
                parts.pop()?;
            }
            Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
        }
    }

    let mut path = root.to_path_buf();
    path.extend(parts);
    Some(path)
}

/// Writes entries below a root directory and keeps the counters.
struct Writer {
    root: PathBuf,
    summary: ExtractSummary,
    /// Directory modes are applied once the walk is over so that a read-only
    /// directory can still receive its children.
    dir_modes: Vec<(PathBuf, u32)>,
}

impl Writer {
    fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            summary: ExtractSummary::default(),
            dir_modes: Vec::new(),
        }
    }

    fn write(&mut self, entry: &TarEntry, content: &mut dyn Read, target: &Path) -> Result<()> {
        if let Some(link) = symlinked_ancestor(&self.root, target) {
            tracing::warn!(
                path = %entry.name,
                via = %link.display(),
                "skipping entry below a symlink, it would land outside the output directory"
            );
            return Ok(());
        }

        match entry.kind {
            ArtifactKind::File => {
                write_file(content, entry.mode, target)
                    .with_context(|| format!("Failed to extract file {}", entry.name))?;
                self.summary.files_extracted += 1;
                self.summary.total_size_bytes += entry.size;
            }
            ArtifactKind::Dir => {
                // An earlier symlink or file at this path is replaced, not followed.
                remove_existing(target)?;
                fs::create_dir_all(target)
                    .with_context(|| format!("Failed to create directory {}", target.display()))?;
                self.dir_modes.push((target.to_path_buf(), entry.mode));
                self.summary.dirs_created += 1;
            }
            ArtifactKind::Symlink => {
                let link_target = entry.link_target.as_deref().unwrap_or_default();
                write_symlink(link_target, target).with_context(|| {
                    format!("Failed to create symlink {} -> {link_target}", entry.name)
                })?;
                self.summary.links_created += 1;
            }
            ArtifactKind::Hardlink => self.write_hardlink(entry, target)?,
            ArtifactKind::CharDevice | ArtifactKind::BlockDevice | ArtifactKind::Fifo => {
                tracing::warn!(path = %entry.name, kind = %entry.kind, "skipping unsupported file type");
            }
            ArtifactKind::Unknown => {
                tracing::warn!(
                    path = %entry.name,
                    type_flag = %char::from(entry.type_flag).escape_default(),
                    "skipping entry with unrecognized tar type flag"
                );
            }
        }
        Ok(())
    }

    /// Hardlink targets name a path inside the archive, so they resolve
    /// against the extraction root. When linking is impossible the content
    /// of the already extracted target is copied instead.
    fn write_hardlink(&mut self, entry: &TarEntry, target: &Path) -> Result<()> {
        let link_name = entry.link_target.as_deref().unwrap_or_default();
        let Some(source) = contained_path(&self.root, link_name) else {
            tracing::warn!(path = %entry.name, target = link_name, "skipping hard link pointing outside the output directory");
            return Ok(());
        };

        if let Some(link) = symlinked_ancestor(&self.root, &source) {
            tracing::warn!(path = %entry.name, via = %link.display(), "skipping hard link whose target lies below a symlink");
            return Ok(());
        }

        ensure_parent(target)?;
        remove_existing(target)?;

        match fs::hard_link(&source, target) {
            Ok(()) => {
                self.summary.links_created += 1;
            }
            Err(link_err) => match fs::copy(&source, target) {
                Ok(copied) => {
                    tracing::warn!(
                        path = %entry.name,
                        target = link_name,
                        error = %link_err,
                        "could not create hard link, copied content instead"
                    );
                    self.summary.files_extracted += 1;
                    self.summary.total_size_bytes += copied;
                }
                Err(copy_err) => {
                    tracing::warn!(
                        path = %entry.name,
                        target = link_name,
                        error = %copy_err,
                        "could not create hard link or copy its target, skipping"
                    );
                }
            },
        }
        Ok(())
    }

    fn finish(mut self, started: Instant) -> Result<ExtractSummary> {
        // Deepest first, so a parent's mode never blocks a child's chmod.
        self.dir_modes
            .sort_by_key(|(dir, _)| Reverse(dir.components().count()));
        for (dir, mode) in &self.dir_modes {
            fs::set_permissions(dir, fs::Permissions::from_mode(mode & 0o7777))
                .with_context(|| format!("Failed to set permissions on {}", dir.display()))?;
        }
        self.summary.elapsed = started.elapsed();
        Ok(self.summary)
    }
}

/// First path strictly between `root` and `target` that is a symlink on
/// disk. Writing through it could leave the output directory.
fn symlinked_ancestor(root: &Path, target: &Path) -> Option<PathBuf> {
    let relative = target.strip_prefix(root).ok()?;
    let mut current = root.to_path_buf();
    let mut components = relative.components().peekable();
    while let Some(component) = components.next() {
        if components.peek().is_none() {
            break;
        }
        current.push(component);
        if fs::symlink_metadata(&current).is_ok_and(|m| m.file_type().is_symlink()) {
            return Some(current);
        }
    }
    None
}

fn ensure_parent(target: &Path) -> Result<()> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {}", parent.display()))?;
    }
    Ok(())
}

fn remove_existing(target: &Path) -> Result<()> {
    match fs::symlink_metadata(target) {
        Ok(meta) if meta.is_dir() => Ok(()),
        Ok(_) => fs::remove_file(target)
            .with_context(|| format!("Failed to remove existing {}", target.display())),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("Failed to inspect {}", target.display())),
    }
}

fn write_file(content: &mut dyn Read, mode: u32, target: &Path) -> Result<()> {
    ensure_parent(target)?;
    // A symlink left by an earlier entry must not redirect the write.
    remove_existing(target)?;

    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(mode & 0o7777)
        .open(target)
        .with_context(|| format!("Failed to create {}", target.display()))?;
    io::copy(content, &mut file).context("Failed to copy file content")?;
    file.set_permissions(fs::Permissions::from_mode(mode & 0o7777))
        .with_context(|| format!("Failed to set permissions on {}", target.display()))?;
    Ok(())
}

fn write_symlink(link_target: &str, target: &Path) -> Result<()> {
    ensure_parent(target)?;
    remove_existing(target)?;
    std::os::unix::fs::symlink(link_target, target)
        .with_context(|| format!("Failed to create {}", target.display()))
}

/// Extract every entry of the stream below `output`.
pub fn extract_all<R: Read>(reader: R, output: &Path) -> Result<ExtractSummary> {
    if output.as_os_str().is_empty() {
        return Err(ArtifactError::MissingInput("output").into());
    }

    let started = Instant::now();
    fs::create_dir_all(output)
        .with_context(|| format!("Failed to create the output path {}", output.display()))?;

    let mut writer = Writer::new(output);
    walk::walk(reader, |entry, content| {
        let Some(target) = contained_path(output, &entry.name) else {
            tracing::warn!(path = %entry.name, "skipping path outside the output directory");
            return Ok(Visit::Continue);
        };
        if target == output {
            return Ok(Visit::Continue);
        }

        writer.write(entry, content, &target)?;
        Ok(Visit::Continue)
    })
    .with_context(|| format!("Failed to extract into {}", output.display()))?;

    writer.finish(started)
}

/// Per-selector bookkeeping during a selective extraction.
struct Selection<'a> {
    selector: &'a str,
    found: bool,
    /// Matched a directory or something below one, so more entries of the
    /// same subtree may still follow in the stream.
    open: bool,
}

/// Extract the entries matching any of `selectors`.
///
/// When `output` is an existing directory or ends with a separator, exact
/// and base-name matches land under their base name inside it, and subtree
/// matches keep their layout below the selected directory's name. Otherwise
/// `output` itself is the destination.
///
/// The walk stops as soon as every selector has matched, unless one of them
/// selects a directory whose subtree may continue later in the stream.
pub fn extract_selected<R: Read>(
    reader: R,
    selectors: &[String],
    output: &Path,
) -> Result<SelectionSummary> {
    if selectors.is_empty() || selectors.iter().all(|s| s.is_empty()) {
        return Err(ArtifactError::MissingInput("artifacts").into());
    }
    if output.as_os_str().is_empty() {
        return Err(ArtifactError::MissingInput("output").into());
    }

    let started = Instant::now();
    let into_dir = output.is_dir() || output.as_os_str().to_string_lossy().ends_with('/');
    let mut selections: Vec<Selection<'_>> = selectors
        .iter()
        .filter(|s| !s.is_empty())
        .map(|selector| Selection {
            selector: selector.as_str(),
            found: false,
            open: false,
        })
        .collect();

    let mut writer = Writer::new(output);
    let mut copied = Vec::new();

    walk::walk(reader, |entry, content| {
        let mut destination = None;
        for selection in selections.iter_mut() {
            let Some(how) = matcher::match_name(&entry.name, selection.selector) else {
                continue;
            };
            tracing::debug!(path = %entry.name, selector = selection.selector, "matched");
            selection.found = true;
            if how == Match::Prefix || entry.kind == ArtifactKind::Dir {
                selection.open = true;
            }
            if destination.is_none() {
                destination = Some(destination_for(&entry.name, selection.selector, how, output, into_dir));
            }
        }

        if let Some(destination) = destination {
            match destination {
                Some(target) => {
                    writer.write(entry, content, &target)?;
                    copied.push(entry.name.clone());
                }
                None => {
                    tracing::warn!(path = %entry.name, "skipping path outside the output directory");
                }
            }
        }

        if selections.iter().all(|s| s.found && !s.open) {
            tracing::debug!("all artifacts found, stopping search");
            return Ok(Visit::Stop);
        }
        Ok(Visit::Continue)
    })
    .context("Failed to walk the image")?;

    let summary = writer.finish(started)?;
    let missing: Vec<String> = selections
        .iter()
        .filter(|s| !s.found)
        .map(|s| s.selector.to_string())
        .collect();

    Ok(SelectionSummary {
        requested: selections.len(),
        found: selections.len() - missing.len(),
        missing,
        copied,
        summary,
    })
}

/// Where a matched entry is written. `None` means the entry would escape
/// the destination.
fn destination_for(
    name: &str,
    selector: &str,
    how: Match,
    output: &Path,
    into_dir: bool,
) -> Option<PathBuf> {
    match how {
        Match::Exact | Match::Basename if into_dir => {
            contained_path(output, matcher::basename(name))
        }
        Match::Exact | Match::Basename => Some(output.to_path_buf()),
        Match::Prefix => {
            let dir = selector.trim_end_matches('/');
            let rest = &name[dir.len()..];
            if into_dir {
                contained_path(output, &format!("{}/{rest}", matcher::basename(dir)))
            } else {
                contained_path(output, rest)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::os::unix::fs::MetadataExt;

    use super::*;
    use crate::artifact::testutil::TarFixture;

    fn mode_of(path: &Path) -> u32 {
        fs::metadata(path).unwrap().mode() & 0o7777
    }

    #[test]
    fn round_trip_regular_files() {
        let files: [(&str, &[u8], u32); 3] = [
            ("bin/tool", b"\x7fELF-ish", 0o755),
            ("etc/app/app.conf", b"listen 80;\n", 0o644),
            ("etc/app/secret", b"hunter2", 0o600),
        ];
        let mut fixture = TarFixture::new();
        for (path, content, mode) in files {
            fixture = fixture.file(path, content, mode);
        }

        let out = tempfile::tempdir().unwrap();
        let summary = extract_all(Cursor::new(fixture.build()), out.path()).unwrap();

        assert_eq!(summary.files_extracted, 3);
        let expected_size: usize = files.iter().map(|(_, c, _)| c.len()).sum();
        assert_eq!(summary.total_size_bytes, expected_size as u64);
        for (path, content, mode) in files {
            let on_disk = out.path().join(path);
            assert_eq!(fs::read(&on_disk).unwrap(), content);
            assert_eq!(mode_of(&on_disk), mode);
        }
    }

    #[test]
    fn directories_links_and_special_files() {
        let data = TarFixture::new()
            .dir("./", 0o755)
            .dir("usr/share", 0o555)
            .file("usr/share/doc.txt", b"doc", 0o444)
            .symlink("usr/doc", "share/doc.txt")
            .hardlink("usr/doc-copy", "usr/share/doc.txt")
            .fifo("run/pipe")
            .build();

        let out = tempfile::tempdir().unwrap();
        let summary = extract_all(Cursor::new(data), out.path()).unwrap();

        assert_eq!(summary.dirs_created, 1);
        assert_eq!(summary.files_extracted, 1);
        assert_eq!(summary.links_created, 2);
        assert_eq!(mode_of(&out.path().join("usr/share")), 0o555);
        assert_eq!(
            fs::read_link(out.path().join("usr/doc")).unwrap(),
            PathBuf::from("share/doc.txt")
        );
        assert_eq!(fs::read(out.path().join("usr/doc-copy")).unwrap(), b"doc");
        assert!(!out.path().join("run/pipe").exists());

        // Let the tempdir clean up.
        fs::set_permissions(out.path().join("usr/share"), fs::Permissions::from_mode(0o755)).unwrap();
    }

    #[test]
    fn path_escape_is_skipped_and_extraction_continues() {
        let data = TarFixture::new()
            .raw_file("../../etc/passwd", b"root::0:0")
            .file("ok.txt", b"fine", 0o644)
            .build();

        let parent = tempfile::tempdir().unwrap();
        let out = parent.path().join("out");
        let summary = extract_all(Cursor::new(data), &out).unwrap();

        assert_eq!(summary.files_extracted, 1);
        assert!(out.join("ok.txt").exists());
        assert!(!parent.path().join("etc/passwd").exists());
        assert!(!out.join("etc/passwd").exists());
    }

    #[test]
    fn symlinked_directory_cannot_redirect_writes() {
        let parent = tempfile::tempdir().unwrap();
        let victim = parent.path().join("victim");
        fs::create_dir(&victim).unwrap();
        let data = TarFixture::new()
            .symlink("evil", victim.to_str().unwrap())
            .file("evil/pwned", b"gotcha", 0o644)
            .hardlink("evil/linked", "ok.txt")
            .file("ok.txt", b"fine", 0o644)
            .build();

        let out = parent.path().join("out");
        let summary = extract_all(Cursor::new(data), &out).unwrap();

        assert!(!victim.join("pwned").exists());
        assert!(!victim.join("linked").exists());
        assert_eq!(summary.files_extracted, 1);
        assert_eq!(summary.links_created, 1);
        assert!(fs::symlink_metadata(out.join("evil")).unwrap().file_type().is_symlink());
        assert_eq!(fs::read(out.join("ok.txt")).unwrap(), b"fine");
    }

    #[test]
    fn directory_entry_replaces_earlier_symlink() {
        let parent = tempfile::tempdir().unwrap();
        let victim = parent.path().join("victim");
        fs::create_dir(&victim).unwrap();
        fs::set_permissions(&victim, fs::Permissions::from_mode(0o755)).unwrap();
        let data = TarFixture::new()
            .symlink("etc", victim.to_str().unwrap())
            .dir("etc", 0o700)
            .file("etc/conf", b"c", 0o644)
            .build();

        let out = parent.path().join("out");
        extract_all(Cursor::new(data), &out).unwrap();

        assert!(fs::symlink_metadata(out.join("etc")).unwrap().is_dir());
        assert_eq!(fs::read(out.join("etc/conf")).unwrap(), b"c");
        assert!(!victim.join("conf").exists());
        assert_eq!(mode_of(&victim), 0o755);
    }

    #[test]
    fn parent_modes_are_applied_after_children() {
        let data = TarFixture::new()
            .dir("a/b", 0o700)
            .file("a/b/f", b"f", 0o644)
            .dir("a", 0o500)
            .build();

        let out = tempfile::tempdir().unwrap();
        extract_all(Cursor::new(data), out.path()).unwrap();

        assert_eq!(mode_of(&out.path().join("a")), 0o500);
        assert_eq!(mode_of(&out.path().join("a/b")), 0o700);

        fs::set_permissions(out.path().join("a"), fs::Permissions::from_mode(0o755)).unwrap();
    }

    #[test]
    fn contained_path_is_lexical() {
        let root = Path::new("/out");
        assert_eq!(contained_path(root, "a/b"), Some(PathBuf::from("/out/a/b")));
        assert_eq!(contained_path(root, "/abs/x"), Some(PathBuf::from("/out/abs/x")));
        assert_eq!(contained_path(root, "./a/../b"), Some(PathBuf::from("/out/b")));
        assert_eq!(contained_path(root, "../../etc/passwd"), None);
        assert_eq!(contained_path(root, "a/../../x"), None);
    }

    #[test]
    fn hardlink_to_missing_target_is_not_fatal() {
        let data = TarFixture::new()
            .hardlink("lib/libc.so", "lib/never-extracted.so")
            .file("after", b"1", 0o644)
            .build();

        let out = tempfile::tempdir().unwrap();
        let summary = extract_all(Cursor::new(data), out.path()).unwrap();

        assert_eq!(summary.links_created, 0);
        assert_eq!(summary.files_extracted, 1);
    }

    #[test]
    fn selected_artifacts_land_by_basename_in_a_directory() {
        let data = TarFixture::new()
            .file("usr/bin/nginx", b"bin", 0o755)
            .file("etc/nginx/nginx.conf", b"conf", 0o644)
            .file("etc/other", b"x", 0o644)
            .build();

        let out = tempfile::tempdir().unwrap();
        let selectors = vec!["nginx".to_string(), "etc/nginx/nginx.conf".to_string()];
        let result = extract_selected(Cursor::new(data), &selectors, out.path()).unwrap();

        assert!(result.is_complete());
        assert_eq!(result.copied, vec!["usr/bin/nginx", "etc/nginx/nginx.conf"]);
        assert_eq!(fs::read(out.path().join("nginx")).unwrap(), b"bin");
        assert_eq!(fs::read(out.path().join("nginx.conf")).unwrap(), b"conf");
        assert!(!out.path().join("other").exists());
    }

    #[test]
    fn single_file_to_explicit_path() {
        let data = TarFixture::new().file("usr/bin/tool", b"t", 0o755).build();

        let out = tempfile::tempdir().unwrap();
        let dest = out.path().join("bin/renamed");
        let result =
            extract_selected(Cursor::new(data), &["tool".to_string()], &dest).unwrap();

        assert_eq!(result.found, 1);
        assert_eq!(fs::read(&dest).unwrap(), b"t");
        assert_eq!(mode_of(&dest), 0o755);
    }

    #[test]
    fn subtree_selection_keeps_layout_and_reads_past_first_match() {
        let data = TarFixture::new()
            .dir("app/config", 0o755)
            .file("app/config/a.yaml", b"a", 0o644)
            .file("app/main", b"m", 0o755)
            .file("app/config/nested/b.yaml", b"b", 0o644)
            .build();

        let out = tempfile::tempdir().unwrap();
        let selectors = vec!["app/config/".to_string()];
        let result = extract_selected(Cursor::new(data), &selectors, out.path()).unwrap();

        assert_eq!(result.found, 1);
        assert_eq!(fs::read(out.path().join("config/a.yaml")).unwrap(), b"a");
        assert_eq!(fs::read(out.path().join("config/nested/b.yaml")).unwrap(), b"b");
        assert!(!out.path().join("main").exists());
    }

    #[test]
    fn subtree_selection_keeps_same_named_files_apart() {
        let data = TarFixture::new()
            .file("srv/conf/a/x.yaml", b"a", 0o644)
            .file("srv/conf/b/x.yaml", b"b", 0o644)
            .build();

        let out = tempfile::tempdir().unwrap();
        extract_selected(Cursor::new(data), &["srv/conf".to_string()], out.path()).unwrap();

        assert_eq!(fs::read(out.path().join("conf/a/x.yaml")).unwrap(), b"a");
        assert_eq!(fs::read(out.path().join("conf/b/x.yaml")).unwrap(), b"b");
        assert!(!out.path().join("x.yaml").exists());
    }

    #[test]
    fn partial_match_is_reported_not_failed() {
        let data = TarFixture::new().file("etc/hosts", b"h", 0o644).build();

        let out = tempfile::tempdir().unwrap();
        let selectors = vec!["hosts".to_string(), "missing".to_string()];
        let result = extract_selected(Cursor::new(data), &selectors, out.path()).unwrap();

        assert_eq!(result.requested, 2);
        assert_eq!(result.found, 1);
        assert_eq!(result.missing, vec!["missing"]);
        assert!(!result.is_complete());
    }

    #[test]
    fn stops_once_every_file_selector_matched() {
        let mut data = TarFixture::new().file("bin/a", b"a", 0o755).build();
        // Drop the end-of-archive blocks and append garbage; reaching it would fail.
        data.truncate(1024);
        data.extend_from_slice(&[0xAB; 512]);

        let out = tempfile::tempdir().unwrap();
        let result = extract_selected(Cursor::new(data), &["a".to_string()], out.path()).unwrap();

        assert!(result.is_complete());
    }

    #[test]
    fn empty_inputs_are_rejected() {
        let out = tempfile::tempdir().unwrap();
        let err = extract_selected(Cursor::new(Vec::new()), &[], out.path()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ArtifactError>(),
            Some(ArtifactError::MissingInput(_))
        ));

        let err = extract_all(Cursor::new(Vec::new()), Path::new("")).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ArtifactError>(),
            Some(ArtifactError::MissingInput("output"))
        ));
    }
}
