//! Selector matching for artifact paths.
//!
//! A selector matches an entry path when it is equal to it, equal to its base
//! name, or names one of its ancestor directories. There is no globbing.
//!
//! A short selector such as `bin` can match both a directory prefix and a
//! file literally named `bin` somewhere else. Callers that stop at the first
//! hit get whichever comes first in the tar stream; pass a full path when the
//! result has to be deterministic.

/// Which rule made a selector match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Match {
    Exact,
    Basename,
    /// The entry lives below the selected directory.
    Prefix,
}

pub fn match_name(path: &str, selector: &str) -> Option<Match> {
    if path == selector {
        return Some(Match::Exact);
    }

    if basename(path) == selector {
        return Some(Match::Basename);
    }

    let dir = selector.trim_end_matches('/');
    if path.len() > dir.len() && path.starts_with(dir) && path.as_bytes()[dir.len()] == b'/' {
        return Some(Match::Prefix);
    }

    None
}

pub fn matches(path: &str, selector: &str) -> bool {
    match_name(path, selector).is_some()
}

/// Last path component, ignoring a trailing separator.
pub fn basename(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        return path;
    }
    trimmed.rsplit('/').next().unwrap_or(trimmed)
}
