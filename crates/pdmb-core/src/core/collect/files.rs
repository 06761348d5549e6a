use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use pdmb_domain::paths::{normalize_relative, walk_files};

use super::globs::{include_and_exclude, is_excluded, resolve};
use crate::context::BuildContext;

/// Archive-relative path to content. Later inserts replace earlier ones.
pub type FileMap = BTreeMap<String, FileSource>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileSource {
    Path(PathBuf),
    /// Generated content that never touched the disk.
    Bytes(Vec<u8>),
}

impl FileSource {
    pub fn read(&self) -> Result<Vec<u8>> {
        match self {
            Self::Path(path) => {
                fs::read(path).with_context(|| format!("failed to read {}", path.display()))
            }
            Self::Bytes(bytes) => Ok(bytes.clone()),
        }
    }

    /// Permission bits of the source file; generated content counts as a
    /// plain file.
    pub fn mode(&self) -> Result<u32> {
        match self {
            Self::Path(path) => file_mode(path),
            Self::Bytes(_) => Ok(0o644),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::Path(path) => Some(path),
            Self::Bytes(_) => None,
        }
    }

    pub(crate) fn describe(&self, root: &Path) -> String {
        match self {
            Self::Path(path) => path.strip_prefix(root).unwrap_or(path).display().to_string(),
            Self::Bytes(_) => "<generated>".to_string(),
        }
    }
}

impl From<PathBuf> for FileSource {
    fn from(path: PathBuf) -> Self {
        Self::Path(path)
    }
}

#[cfg(unix)]
fn file_mode(path: &Path) -> Result<u32> {
    use std::os::unix::fs::PermissionsExt;
    let meta = fs::metadata(path).with_context(|| format!("failed to stat {}", path.display()))?;
    Ok(meta.permissions().mode())
}

#[cfg(not(unix))]
fn file_mode(path: &Path) -> Result<u32> {
    let meta = fs::metadata(path).with_context(|| format!("failed to stat {}", path.display()))?;
    Ok(if meta.permissions().readonly() { 0o444 } else { 0o644 })
}

fn is_bytecode(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "pyc")
}

/// Files selected by the include and exclude rules, keyed by their path
/// relative to the project root.
pub(crate) fn collect_files(ctx: &BuildContext) -> Result<FileMap> {
    let root = &ctx.root;
    let patterns = include_and_exclude(ctx)?;
    let resolved = resolve(root, &patterns)?;
    tracing::debug!(
        includes = ?resolved.includes,
        excludes = ?resolved.excludes,
        "resolved include and exclude paths"
    );

    let mut files = FileMap::new();
    for include in &resolved.includes {
        let path = root.join(include);
        if path.is_file() {
            if !is_bytecode(&path) {
                files.insert(include.clone(), FileSource::Path(path));
            }
            continue;
        }
        for file in walk_files(&path)? {
            let relative = normalize_relative(file.strip_prefix(root).unwrap_or(&file));
            if is_bytecode(&file) || is_excluded(&relative, &resolved.excludes) {
                continue;
            }
            files.insert(relative, FileSource::Path(file));
        }
    }
    Ok(files)
}

/// Files generated into the build directory, keyed relative to it. These
/// are filtered against the exclude patterns rather than resolved paths.
pub(crate) fn collect_build_files(ctx: &BuildContext) -> Result<FileMap> {
    let mut files = FileMap::new();
    if !ctx.build_dir.is_dir() {
        return Ok(files);
    }
    let patterns = include_and_exclude(ctx)?;
    let excludes: Vec<&String> = patterns.excludes.iter().collect();
    for file in walk_files(&ctx.build_dir)? {
        let relative = normalize_relative(file.strip_prefix(&ctx.build_dir).unwrap_or(&file));
        if !is_excluded(&relative, &excludes) {
            files.insert(relative, FileSource::Path(file));
        }
    }
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::testing::context;
    use crate::context::BuildTarget;
    use tempfile::tempdir;

    fn write(root: &Path, rel: &str, contents: &str) -> Result<()> {
        let path = root.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, contents)?;
        Ok(())
    }

    fn keys(files: &FileMap) -> Vec<&str> {
        files.keys().map(String::as_str).collect()
    }

    fn demo_package(root: &Path) -> Result<()> {
        write(root, "pyproject.toml", "[project]\nname = \"demo\"\nversion = \"0.1.0\"\n")?;
        write(root, "my_package/__init__.py", "")?;
        write(root, "my_package/data.json", "{}")?;
        write(root, "my_package/__pycache__/x.cpython-311.pyc", "")?;
        write(root, "tests/test_demo.py", "")?;
        write(root, "README.md", "# demo")?;
        Ok(())
    }

    #[test]
    fn wheel_collects_packages_without_tests_or_bytecode() -> Result<()> {
        let temp = tempdir()?;
        demo_package(temp.path())?;
        let ctx = context(temp.path(), BuildTarget::Wheel, &[])?;
        let files = collect_files(&ctx)?;
        assert_eq!(keys(&files), vec!["my_package/__init__.py", "my_package/data.json"]);
        Ok(())
    }

    #[test]
    fn sdist_keeps_source_includes() -> Result<()> {
        let temp = tempdir()?;
        demo_package(temp.path())?;
        let ctx = context(temp.path(), BuildTarget::Sdist, &[])?;
        let files = collect_files(&ctx)?;
        assert_eq!(
            keys(&files),
            vec!["my_package/__init__.py", "my_package/data.json", "tests/test_demo.py"]
        );
        Ok(())
    }

    #[test]
    fn single_modules_are_found_without_packages() -> Result<()> {
        let temp = tempdir()?;
        write(temp.path(), "pyproject.toml", "[project]\nname = \"foo-module\"\nversion = \"0.1.0\"\n")?;
        write(temp.path(), "foo_module.py", "")?;
        write(temp.path(), "notes.txt", "")?;
        let ctx = context(temp.path(), BuildTarget::Wheel, &[])?;
        assert_eq!(keys(&collect_files(&ctx)?), vec!["foo_module.py"]);
        Ok(())
    }

    #[test]
    fn src_layout_keeps_prefix_until_written() -> Result<()> {
        let temp = tempdir()?;
        write(temp.path(), "pyproject.toml", "[project]\nname = \"demo\"\nversion = \"0.1.0\"\n")?;
        write(temp.path(), "src/my_package/__init__.py", "")?;
        let ctx = context(temp.path(), BuildTarget::Wheel, &[])?;
        assert_eq!(keys(&collect_files(&ctx)?), vec!["src/my_package/__init__.py"]);
        Ok(())
    }

    #[test]
    fn declared_excludes_prune_directories() -> Result<()> {
        let temp = tempdir()?;
        demo_package(temp.path())?;
        write(
            temp.path(),
            "pyproject.toml",
            "[project]\nname = \"demo\"\nversion = \"0.1.0\"\n\n[tool.pdm.build]\nexcludes = [\"**/*.json\"]\n",
        )?;
        let ctx = context(temp.path(), BuildTarget::Wheel, &[])?;
        assert_eq!(keys(&collect_files(&ctx)?), vec!["my_package/__init__.py"]);
        Ok(())
    }

    #[test]
    fn recursive_include_loses_to_flatter_exclude_only_where_both_match() -> Result<()> {
        let temp = tempdir()?;
        write(
            temp.path(),
            "pyproject.toml",
            "[project]\nname = \"demo\"\nversion = \"0.1.0\"\n\n[tool.pdm.build]\nincludes = [\"**/*.json\"]\nexcludes = [\"pkg/data/*.json\"]\n",
        )?;
        write(temp.path(), "pkg/data/y.json", "{}")?;
        write(temp.path(), "pkg/data/inner/x.json", "{}")?;
        let ctx = context(temp.path(), BuildTarget::Wheel, &[])?;
        assert_eq!(keys(&collect_files(&ctx)?), vec!["pkg/data/inner/x.json"]);
        Ok(())
    }

    #[test]
    fn build_dir_files_are_collected_relative_to_it() -> Result<()> {
        let temp = tempdir()?;
        demo_package(temp.path())?;
        let ctx = context(temp.path(), BuildTarget::Wheel, &[])?;
        write(&ctx.build_dir, "my_package/_version.py", "__version__ = '1'\n")?;
        write(&ctx.build_dir, "tests/generated.py", "")?;
        let files = collect_build_files(&ctx)?;
        assert_eq!(keys(&files), vec!["my_package/_version.py"]);
        Ok(())
    }
}
