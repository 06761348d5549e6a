use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use once_cell::unsync::OnceCell;
use toml_edit::{Array, DocumentMut, Item, TableLike, Value};

use crate::build_config::BuildConfig;
use crate::metadata::StandardMetadata;
use crate::version_config::VersionConfig;
use crate::BackendError;

pub const PYPROJECT: &str = "pyproject.toml";

/// A loaded `pyproject.toml`.
///
/// The document keeps its original formatting so it can be written back
/// into source distributions. Validated metadata is computed on first use
/// and recomputed after any mutation.
#[derive(Debug)]
pub struct PyProject {
    root: PathBuf,
    doc: DocumentMut,
    build: BuildConfig,
    version: Option<VersionConfig>,
    metadata: OnceCell<StandardMetadata>,
}

impl PyProject {
    /// Reads and validates `root/pyproject.toml`.
    ///
    /// # Errors
    ///
    /// Fails when the file is missing or malformed, or when `[project]`
    /// does not validate.
    pub fn load(root: &Path) -> Result<Self> {
        let path = root.join(PYPROJECT);
        if !path.is_file() {
            return Err(BackendError::config("pyproject.toml not found").into());
        }
        let source = fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        tracing::debug!(path = %path.display(), "loading project manifest");
        Self::from_source(root, &source)
    }

    pub fn from_source(root: &Path, source: &str) -> Result<Self> {
        let doc: DocumentMut = source
            .parse()
            .map_err(|err| BackendError::config(format!("Invalid pyproject.toml file: {err}")))?;
        let pdm = doc.get("tool").and_then(|tool| tool.get("pdm"));
        let build = BuildConfig::from_table(
            pdm.and_then(|pdm| pdm.get("build")).and_then(Item::as_table_like),
        )?;
        let version = VersionConfig::from_table(
            pdm.and_then(|pdm| pdm.get("version")).and_then(Item::as_table_like),
        )?;
        let project = Self {
            root: root.to_path_buf(),
            doc,
            build,
            version,
            metadata: OnceCell::new(),
        };
        project.metadata()?;
        Ok(project)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn build_config(&self) -> &BuildConfig {
        &self.build
    }

    pub fn version_config(&self) -> Option<&VersionConfig> {
        self.version.as_ref()
    }

    pub fn metadata(&self) -> Result<&StandardMetadata> {
        self.metadata
            .get_or_try_init(|| StandardMetadata::from_pyproject(&self.doc, &self.root))
    }

    pub fn name(&self) -> Result<&str> {
        Ok(&self.metadata()?.name)
    }

    /// Whether `project.version` is set statically.
    pub fn has_static_version(&self) -> bool {
        self.project().and_then(|p| p.get("version")).is_some()
    }

    pub fn is_dynamic(&self, field: &str) -> bool {
        self.project()
            .and_then(|p| p.get("dynamic"))
            .and_then(Item::as_array)
            .is_some_and(|dynamic| dynamic.iter().any(|v| v.as_str() == Some(field)))
    }

    pub fn set_version(&mut self, version: &str) -> Result<()> {
        self.project_mut()?
            .insert("version", toml_edit::value(version));
        self.metadata.take();
        Ok(())
    }

    pub fn remove_dynamic(&mut self, field: &str) -> Result<()> {
        if let Some(dynamic) = self
            .project_mut()?
            .get_mut("dynamic")
            .and_then(Item::as_array_mut)
        {
            dynamic.retain(|value| value.as_str() != Some(field));
        }
        self.metadata.take();
        Ok(())
    }

    /// Rewrites every dependency and optional dependency string.
    pub fn map_dependencies(&mut self, f: impl Fn(&str) -> String) -> Result<()> {
        let project = self.project_mut()?;
        if let Some(array) = project.get_mut("dependencies").and_then(Item::as_array_mut) {
            map_array(array, &f);
        }
        if let Some(groups) = project
            .get_mut("optional-dependencies")
            .and_then(Item::as_table_like_mut)
        {
            for (_, group) in groups.iter_mut() {
                if let Some(array) = group.as_array_mut() {
                    map_array(array, &f);
                }
            }
        }
        self.metadata.take();
        Ok(())
    }

    pub fn append_dependencies(&mut self, extra: &[String]) -> Result<()> {
        if extra.is_empty() {
            return Ok(());
        }
        let project = self.project_mut()?;
        if project.get("dependencies").is_none() {
            project.insert("dependencies", toml_edit::value(Array::new()));
        }
        let array = project
            .get_mut("dependencies")
            .and_then(Item::as_array_mut)
            .ok_or_else(|| BackendError::validation("Field \"project.dependencies\" has an invalid type, expecting a list of strings", "project.dependencies"))?;
        for dependency in extra {
            array.push(dependency.as_str());
        }
        self.metadata.take();
        Ok(())
    }

    /// The manifest as TOML, reflecting every mutation made so far.
    pub fn render(&self) -> String {
        self.doc.to_string()
    }

    fn project(&self) -> Option<&dyn TableLike> {
        self.doc.get("project").and_then(Item::as_table_like)
    }

    fn project_mut(&mut self) -> Result<&mut dyn TableLike> {
        self.doc
            .get_mut("project")
            .and_then(Item::as_table_like_mut)
            .ok_or_else(|| {
                BackendError::validation("Section \"project\" missing in pyproject.toml", "project").into()
            })
    }
}

fn map_array(array: &mut Array, f: &impl Fn(&str) -> String) {
    for value in array.iter_mut() {
        let Some(current) = value.as_str() else {
            continue;
        };
        let mapped = f(current);
        if mapped != current {
            let decor = value.decor().clone();
            *value = Value::from(mapped);
            *value.decor_mut() = decor;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const DYNAMIC: &str = r#"[project]
name = "demo"
dynamic = ["version"]
dependencies = ["demo-lib @ file:///${PROJECT_ROOT}/lib"]

[tool.pdm.version]
source = "file"
path = "demo/__init__.py"
"#;

    #[test]
    fn missing_manifest_is_config_error() -> Result<()> {
        let root = tempdir()?;
        let err = PyProject::load(root.path()).unwrap_err();
        assert_eq!(err.to_string(), "pyproject.toml not found");
        Ok(())
    }

    #[test]
    fn malformed_manifest_is_config_error() -> Result<()> {
        let root = tempdir()?;
        let err = PyProject::from_source(root.path(), "[project\n").unwrap_err();
        assert!(err.to_string().starts_with("Invalid pyproject.toml file:"));
        Ok(())
    }

    #[test]
    fn version_updates_are_rendered() -> Result<()> {
        let root = tempdir()?;
        let mut project = PyProject::from_source(root.path(), DYNAMIC)?;
        assert!(project.version_config().is_some());
        assert!(project.is_dynamic("version"));
        assert_eq!(project.metadata()?.version, None);

        project.set_version("1.2.0")?;
        project.remove_dynamic("version")?;
        assert_eq!(project.metadata()?.version.as_deref(), Some("1.2.0"));
        let rendered = project.render();
        assert!(rendered.contains("version = \"1.2.0\""));
        assert!(rendered.contains("dynamic = []"));
        Ok(())
    }

    #[test]
    fn dependencies_can_be_rewritten() -> Result<()> {
        let root = tempdir()?;
        let mut project = PyProject::from_source(root.path(), DYNAMIC)?;
        project.map_dependencies(|dep| dep.replace("${PROJECT_ROOT}", "/work"))?;
        project.append_dependencies(&["editables".to_string()])?;
        let deps: Vec<String> = project
            .metadata()?
            .dependencies
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(deps, vec!["demo-lib @ file:////work/lib", "editables"]);
        Ok(())
    }
}
