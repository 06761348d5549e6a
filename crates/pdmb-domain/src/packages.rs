use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use anyhow::Result;

use crate::build_config::BuildConfig;
use crate::paths::{fnmatch, glob_relative, has_magic, pattern_parts};
use crate::BackendError;

/// A directory holding an `__init__.py`, excluding cache directories.
pub fn is_python_package(path: &Path) -> bool {
    if !path.is_dir() {
        return false;
    }
    let name = path.file_name().map(|n| n.to_string_lossy().into_owned());
    if matches!(name.as_deref(), Some("__pycache__" | "__pypackages__")) {
        return false;
    }
    path.join("__init__.py").is_file()
}

/// Dotted names of every package below `root/location`, named relative to
/// `root/src`. Directories with a `.` in their name are not descended into.
pub fn find_packages(
    root: &Path,
    location: &str,
    src: &str,
    include: &[&str],
    exclude: &[&str],
) -> Vec<String> {
    let base = join(root, location);
    let src_base = join(root, src);
    if !base.is_dir() {
        return Vec::new();
    }
    let walker = walkdir::WalkDir::new(&base)
        .follow_links(true)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            entry.file_type().is_dir() && !entry.file_name().to_string_lossy().contains('.')
        });
    let mut packages = Vec::new();
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                tracing::warn!(base = %base.display(), "skipping unreadable directory during package discovery: {err}");
                continue;
            }
        };
        let Ok(relative) = entry.path().strip_prefix(&src_base) else {
            continue;
        };
        let package = pattern_parts(&relative.to_string_lossy()).join(".");
        if entry.path().join("__init__.py").is_file()
            && include.iter().any(|pattern| fnmatch(&package, pattern))
            && !exclude.iter().any(|pattern| fnmatch(&package, pattern))
        {
            packages.push(package);
        }
    }
    packages
}

/// The setuptools view of the project layout.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PackagePaths {
    pub package_dir: Option<String>,
    pub packages: Vec<String>,
    pub py_modules: Vec<String>,
    pub package_data: BTreeMap<String, Vec<String>>,
    pub exclude_package_data: BTreeMap<String, Vec<String>>,
}

/// Derives packages, modules and package data from the build configuration.
pub fn convert_package_paths(root: &Path, config: &BuildConfig) -> Result<PackagePaths> {
    let package_dir = config.package_dir(root);
    let src = if package_dir.is_empty() { "." } else { package_dir.as_str() };
    let mut packages = BTreeSet::new();
    let mut py_modules = Vec::new();
    let mut package_data = BTreeMap::from([(String::new(), vec!["*".to_string()])]);
    let mut exclude_package_data: BTreeMap<String, Vec<String>> = BTreeMap::new();

    if config.includes.is_empty() {
        packages.extend(find_packages(root, src, src, &["*"], &["tests", "tests.*"]));
        if packages.is_empty() {
            for module in glob_relative(root, &format!("{src}/*.py"))? {
                if let Some(stem) = Path::new(&module).file_stem() {
                    py_modules.push(stem.to_string_lossy().into_owned());
                }
            }
        }
    } else {
        let mut remaining = Vec::new();
        for include in &config.includes {
            let trimmed = include
                .strip_suffix("/*")
                .or_else(|| include.strip_suffix("\\*"))
                .unwrap_or(include);
            let dir_name = pattern_parts(trimmed).join("/");
            if !has_magic(trimmed) && !dir_name.is_empty() && root.join(&dir_name).is_dir() {
                packages.extend(find_packages(root, &dir_name, src, &["*"], &[]));
                if root.join(&dir_name).join("__init__.py").is_file() {
                    let relative = relative_to(&dir_name, if package_dir.is_empty() { "" } else { &package_dir })
                        .unwrap_or(&dir_name);
                    packages.insert(relative.replace('/', "."));
                }
            } else {
                remaining.push(include.as_str());
            }
        }
        for include in remaining {
            for path in glob_relative(root, include)? {
                let stripped = path.trim_start_matches(['.', '/']);
                if !stripped.contains('/') {
                    if let Some(module) = stripped.strip_suffix(".py") {
                        py_modules.push(module.to_string());
                    }
                }
            }
            if include.ends_with(".py") {
                continue;
            }
            add_package_data(&mut package_data, &packages, &package_dir, include);
        }
        for exclude in &config.excludes {
            add_package_data(&mut exclude_package_data, &packages, &package_dir, exclude);
        }
    }

    if !packages.is_empty() && !py_modules.is_empty() {
        return Err(BackendError::config("Can't specify packages and py_modules at the same time.").into());
    }
    Ok(PackagePaths {
        package_dir: (!package_dir.is_empty()).then_some(package_dir),
        packages: packages.into_iter().collect(),
        py_modules,
        package_data,
        exclude_package_data,
    })
}

fn add_package_data(
    data: &mut BTreeMap<String, Vec<String>>,
    packages: &BTreeSet<String>,
    package_dir: &str,
    pattern: &str,
) {
    let pattern = pattern_parts(pattern).join("/");
    for package in packages {
        let package_path = if package_dir.is_empty() {
            package.replace('.', "/")
        } else {
            format!("{package_dir}/{}", package.replace('.', "/"))
        };
        if let Some(relative) = relative_to(&pattern, &package_path) {
            data.entry(package.clone()).or_default().push(relative.to_string());
        }
    }
}

fn relative_to<'a>(path: &'a str, base: &str) -> Option<&'a str> {
    if base.is_empty() {
        return Some(path);
    }
    path.strip_prefix(base)?.strip_prefix('/')
}

fn join(root: &Path, relative: &str) -> std::path::PathBuf {
    if relative.is_empty() || relative == "." {
        root.to_path_buf()
    } else {
        root.join(relative)
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use tempfile::tempdir;

    fn touch(root: &Path, relative: &str) -> Result<()> {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().expect("has parent"))?;
        fs::write(path, "")?;
        Ok(())
    }

    fn config(includes: &[&str], excludes: &[&str]) -> BuildConfig {
        BuildConfig {
            includes: includes.iter().map(ToString::to_string).collect(),
            excludes: excludes.iter().map(ToString::to_string).collect(),
            ..BuildConfig::default()
        }
    }

    #[test]
    fn discovers_packages_in_src_layout() -> Result<()> {
        let root = tempdir()?;
        touch(root.path(), "src/demo/__init__.py")?;
        touch(root.path(), "src/demo/sub/__init__.py")?;
        touch(root.path(), "src/demo/data.v1/__init__.py")?;
        touch(root.path(), "src/tests/__init__.py")?;

        let paths = convert_package_paths(root.path(), &BuildConfig::default())?;
        assert_eq!(paths.package_dir.as_deref(), Some("src"));
        assert_eq!(paths.packages, vec!["demo", "demo.sub"]);
        assert!(paths.py_modules.is_empty());
        assert_eq!(paths.package_data[""], vec!["*"]);
        Ok(())
    }

    #[test]
    fn falls_back_to_top_level_modules() -> Result<()> {
        let root = tempdir()?;
        touch(root.path(), "foo_module.py")?;
        touch(root.path(), "namespace/sub/mod.py")?;
        let paths = convert_package_paths(root.path(), &BuildConfig::default())?;
        assert!(paths.packages.is_empty());
        assert_eq!(paths.py_modules, vec!["foo_module"]);
        Ok(())
    }

    #[test]
    fn includes_map_to_packages_and_data() -> Result<()> {
        let root = tempdir()?;
        touch(root.path(), "my_package/__init__.py")?;
        touch(root.path(), "my_package/data.json")?;
        let paths = convert_package_paths(
            root.path(),
            &config(&["my_package/", "my_package/*.json"], &["my_package/*.txt"]),
        )?;
        assert_eq!(paths.packages, vec!["my_package"]);
        assert_eq!(paths.package_data["my_package"], vec!["*.json"]);
        assert_eq!(paths.exclude_package_data["my_package"], vec!["*.txt"]);
        Ok(())
    }

    #[test]
    fn packages_and_modules_are_exclusive() -> Result<()> {
        let root = tempdir()?;
        touch(root.path(), "pkg/__init__.py")?;
        touch(root.path(), "single.py")?;
        let err = convert_package_paths(root.path(), &config(&["pkg", "single.py"], &[])).unwrap_err();
        assert_eq!(err.to_string(), "Can't specify packages and py_modules at the same time.");
        Ok(())
    }
}
