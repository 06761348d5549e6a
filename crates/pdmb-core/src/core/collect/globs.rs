use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

use anyhow::Result;
use pdmb_domain::is_python_package;
use pdmb_domain::paths::{fnmatch, glob_relative, has_magic, is_same_or_descendant, pattern_parts};

use crate::context::{BuildContext, BuildTarget, BUILD_DIR_NAME};

/// Include and exclude patterns as declared, before resolution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct PatternSets {
    pub(crate) includes: BTreeSet<String>,
    pub(crate) excludes: BTreeSet<String>,
}

/// Concrete paths, relative to the project root, that survived merging.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct ResolvedPaths {
    pub(crate) includes: Vec<String>,
    pub(crate) excludes: Vec<String>,
}

/// Gathers the patterns for the build target.
///
/// Without declared includes, the top-level packages under the package
/// directory are used, or its top-level modules when there are none.
/// Source-only includes are always included and additionally excluded from
/// wheel-like targets, so they only ever reach the sdist.
pub(crate) fn include_and_exclude(ctx: &BuildContext) -> Result<PatternSets> {
    let config = ctx.project.build_config();
    let package_dir = config.package_dir(&ctx.root);
    let source_includes = config.source_includes();

    let mut includes = BTreeSet::new();
    let mut excludes: BTreeSet<String> = std::iter::once(BUILD_DIR_NAME.to_string()).collect();
    excludes.extend(config.excludes.iter().cloned());
    if ctx.target != BuildTarget::Sdist {
        excludes.extend(source_includes.iter().cloned());
    }

    if config.includes.is_empty() {
        let top_packages = find_top_packages(&ctx.root, &package_dir)?;
        if top_packages.is_empty() {
            includes.insert(join_pattern(&package_dir, "*.py"));
        } else {
            includes.extend(top_packages);
        }
    } else {
        includes.extend(config.includes.iter().cloned());
    }
    includes.extend(source_includes);
    Ok(PatternSets { includes, excludes })
}

/// Resolves both pattern sets against `root` and settles conflicts.
pub(crate) fn resolve(root: &Path, patterns: &PatternSets) -> Result<ResolvedPaths> {
    let include_globs = expand(root, &patterns.includes)?;
    let exclude_globs = expand(root, &patterns.excludes)?;
    Ok(merge_globs(include_globs, exclude_globs))
}

/// Whether `path` is an excluded path, lies beneath one, or matches one as
/// a pattern.
pub(crate) fn is_excluded<S: AsRef<str>>(path: &str, excludes: &[S]) -> bool {
    excludes.iter().any(|exclude| {
        let exclude = exclude.as_ref();
        is_same_or_descendant(path, exclude) || fnmatch(path, exclude)
    })
}

/// Specificity of a pattern: segment count, then fewer wildcards.
pub(crate) fn path_weight(pattern: &str) -> (usize, i64) {
    let parts = pattern_parts(pattern);
    let mut wildcards = 0;
    if has_magic(pattern) {
        for part in &parts {
            if *part == "**" {
                wildcards += 2;
            } else if has_magic(part) {
                wildcards += 1;
            }
        }
    }
    (parts.len(), -wildcards)
}

/// Maps every concrete match to the most specific pattern producing it.
fn expand(root: &Path, patterns: &BTreeSet<String>) -> Result<BTreeMap<String, String>> {
    let mut globs: BTreeMap<String, String> = BTreeMap::new();
    for pattern in patterns {
        for path in glob_relative(root, pattern)? {
            match globs.get(&path) {
                Some(existing) if path_weight(existing) >= path_weight(pattern) => {}
                _ => {
                    globs.insert(path, pattern.clone());
                }
            }
        }
    }
    Ok(globs)
}

/// For a path matched on both sides the include survives only when its
/// pattern is strictly more specific; ties go to the exclude.
fn merge_globs(
    include_globs: BTreeMap<String, String>,
    mut exclude_globs: BTreeMap<String, String>,
) -> ResolvedPaths {
    let mut includes = Vec::new();
    for (path, pattern) in include_globs {
        if let Some(exclude) = exclude_globs.get(&path) {
            if path_weight(&pattern) <= path_weight(exclude) {
                continue;
            }
            exclude_globs.remove(&path);
        }
        includes.push(path);
    }
    ResolvedPaths {
        includes,
        excludes: exclude_globs.into_keys().collect(),
    }
}

fn find_top_packages(root: &Path, package_dir: &str) -> Result<Vec<String>> {
    let dir = if package_dir.is_empty() {
        root.to_path_buf()
    } else {
        root.join(package_dir)
    };
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut packages = Vec::new();
    for entry in fs::read_dir(&dir)? {
        let entry = entry?;
        if is_python_package(&entry.path()) {
            packages.push(join_pattern(package_dir, &entry.file_name().to_string_lossy()));
        }
    }
    packages.sort();
    Ok(packages)
}

fn join_pattern(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{dir}/{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn touch(root: &Path, rel: &str) -> Result<()> {
        let path = root.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, "")?;
        Ok(())
    }

    fn patterns(includes: &[&str], excludes: &[&str]) -> PatternSets {
        PatternSets {
            includes: includes.iter().map(ToString::to_string).collect(),
            excludes: excludes.iter().map(ToString::to_string).collect(),
        }
    }

    #[test]
    fn weight_prefers_segments_then_concreteness() {
        assert_eq!(path_weight("foo/bar.py"), (2, 0));
        assert_eq!(path_weight("foo/*.py"), (2, -1));
        assert_eq!(path_weight("foo/**/*.py"), (3, -3));
        assert_eq!(path_weight("./foo"), (1, 0));
        assert!(path_weight("foo/bar.py") > path_weight("foo/*.py"));
    }

    #[test]
    fn more_specific_include_beats_exclude() -> Result<()> {
        let temp = tempdir()?;
        touch(temp.path(), "pkg/__init__.py")?;
        touch(temp.path(), "pkg/data/keep.json")?;
        touch(temp.path(), "pkg/data/drop.json")?;

        let resolved = resolve(
            temp.path(),
            &patterns(&["pkg/", "pkg/data/keep.json"], &["pkg/data/*.json"]),
        )?;
        assert_eq!(resolved.includes, vec!["pkg", "pkg/data/keep.json"]);
        assert_eq!(resolved.excludes, vec!["pkg/data/drop.json"]);
        Ok(())
    }

    #[test]
    fn equal_weight_goes_to_exclude() -> Result<()> {
        let temp = tempdir()?;
        touch(temp.path(), "pkg/a.py")?;
        let resolved = resolve(temp.path(), &patterns(&["pkg/*.py"], &["pkg/*.py"]))?;
        assert!(resolved.includes.is_empty());
        assert_eq!(resolved.excludes, vec!["pkg/a.py"]);
        Ok(())
    }

    #[test]
    fn exclusion_covers_descendants_and_patterns() {
        let excludes = ["pkg/vendor", "*.txt"];
        assert!(is_excluded("pkg/vendor", &excludes));
        assert!(is_excluded("pkg/vendor/lib/x.py", &excludes));
        assert!(is_excluded("pkg/notes.txt", &excludes));
        assert!(!is_excluded("pkg/vendored.py", &excludes));
    }
}
