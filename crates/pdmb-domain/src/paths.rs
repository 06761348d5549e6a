use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result};
use glob::{MatchOptions, Pattern};

use crate::BackendError;

const GLOB_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: true,
};

/// Whether a pattern contains glob metacharacters.
pub fn has_magic(pattern: &str) -> bool {
    pattern.contains(['*', '?', '['])
}

/// Lexically normalizes a relative path into forward-slash form, dropping
/// `.` components and folding `..` where possible.
pub fn normalize_relative(path: &Path) -> String {
    let mut parts: Vec<String> = Vec::new();
    for component in path.components() {
        match component {
            Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
            Component::ParentDir => {
                if parts.last().is_some_and(|last| last != "..") {
                    parts.pop();
                } else {
                    parts.push("..".to_string());
                }
            }
            Component::Normal(part) => parts.push(part.to_string_lossy().into_owned()),
        }
    }
    if parts.is_empty() {
        ".".to_string()
    } else {
        parts.join("/")
    }
}

/// Path segments of a pattern as they count for specificity.
pub fn pattern_parts(pattern: &str) -> Vec<&str> {
    pattern
        .split(['/', '\\'])
        .filter(|part| !part.is_empty() && *part != ".")
        .collect()
}

/// `target` equals `base` or lies beneath it (both relative, `/`-separated).
pub fn is_same_or_descendant(target: &str, base: &str) -> bool {
    let target = pattern_parts(target);
    let base = pattern_parts(base);
    target.len() >= base.len() && target.iter().zip(&base).all(|(a, b)| a == b)
}

/// `fnmatch`-style match of a whole relative path against a pattern, where
/// `*` may cross directory separators.
pub fn fnmatch(path: &str, pattern: &str) -> bool {
    Pattern::new(pattern).is_ok_and(|compiled| compiled.matches(path))
}

/// Resolves `pattern` against `root` and returns the matches as normalized
/// paths relative to `root`, sorted. A trailing slash restricts matches to
/// directories.
///
/// # Errors
///
/// Returns a configuration error when the pattern is malformed.
pub fn glob_relative(root: &Path, pattern: &str) -> Result<Vec<String>> {
    let dirs_only = pattern.ends_with('/') || pattern.ends_with('\\');
    let trimmed = pattern_parts(pattern).join("/");
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    let full = format!(
        "{}/{}",
        Pattern::escape(&root.to_string_lossy()),
        trimmed
    );
    let paths = glob::glob_with(&full, GLOB_OPTIONS).map_err(|err| {
        BackendError::config(format!("invalid glob pattern {pattern:?}: {}", err.msg))
    })?;
    let mut matches = Vec::new();
    for entry in paths {
        let path = entry
            .with_context(|| format!("failed to read a match of {pattern:?} under {}", root.display()))?;
        if dirs_only && !path.is_dir() {
            continue;
        }
        let relative = path.strip_prefix(root).unwrap_or(&path);
        matches.push(normalize_relative(relative));
    }
    matches.sort();
    matches.dedup();
    Ok(matches)
}

/// All files beneath `dir`, sorted, symlinks followed. A missing `dir`
/// yields nothing.
///
/// # Errors
///
/// Fails on the first entry that cannot be read, so that unreadable
/// sources never silently drop out of an artifact.
pub fn walk_files(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut files = Vec::new();
    for entry in walkdir::WalkDir::new(dir).follow_links(true).sort_by_file_name() {
        let entry = entry.with_context(|| format!("failed to walk {}", dir.display()))?;
        if entry.file_type().is_file() {
            files.push(entry.into_path());
        }
    }
    files.sort();
    Ok(files)
}
