use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context as _, Result};
use pdmb_domain::paths::glob_relative;
use pdmb_domain::PyProject;

use crate::distribution::editable::EditableProject;
use crate::python_sys::InterpreterInfo;
use crate::settings::{ConfigSettings, EnvSnapshot};

/// Scratch directory for generated files, relative to the project root.
pub const BUILD_DIR_NAME: &str = ".pdm-build";
const BUILD_DIR_VAR: &str = "${BUILD_DIR}";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BuildTarget {
    Sdist,
    Wheel,
    Editable,
}

impl BuildTarget {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sdist => "sdist",
            Self::Wheel => "wheel",
            Self::Editable => "editable",
        }
    }

    /// Wheels and editables both produce a `.whl`.
    pub fn is_wheel_like(self) -> bool {
        !matches!(self, Self::Sdist)
    }
}

impl fmt::Display for BuildTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-build state shared with every hook.
pub struct BuildContext {
    pub target: BuildTarget,
    pub root: PathBuf,
    pub build_dir: PathBuf,
    pub dist_dir: PathBuf,
    pub project: PyProject,
    pub config_settings: ConfigSettings,
    pub env: EnvSnapshot,
    pub python: Arc<dyn InterpreterInfo>,
    /// Prepared `.dist-info` directory to reuse instead of rendering metadata.
    pub metadata_directory: Option<PathBuf>,
    pub editables: Option<EditableProject>,
    warnings: Vec<String>,
}

impl fmt::Debug for BuildContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuildContext")
            .field("target", &self.target)
            .field("root", &self.root)
            .field("build_dir", &self.build_dir)
            .field("dist_dir", &self.dist_dir)
            .field("config_settings", &self.config_settings)
            .field("metadata_directory", &self.metadata_directory)
            .field("warnings", &self.warnings)
            .finish_non_exhaustive()
    }
}

impl BuildContext {
    /// Creates the context, creating `dist_dir` when missing.
    ///
    /// # Errors
    ///
    /// Returns an error when the destination directory cannot be created.
    pub fn new(
        target: BuildTarget,
        project: PyProject,
        dist_dir: &Path,
        config_settings: ConfigSettings,
        env: EnvSnapshot,
        python: Arc<dyn InterpreterInfo>,
    ) -> Result<Self> {
        create_private_dir(dist_dir)?;
        let root = project.root().to_path_buf();
        Ok(Self {
            target,
            build_dir: root.join(BUILD_DIR_NAME),
            root,
            dist_dir: dist_dir.to_path_buf(),
            project,
            config_settings,
            env,
            python,
            metadata_directory: None,
            editables: None,
            warnings: Vec::new(),
        })
    }

    /// Logs a warning and keeps it for the caller.
    pub fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!("{message}");
        self.warnings.push(message);
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub(crate) fn take_warnings(&mut self) -> Vec<String> {
        std::mem::take(&mut self.warnings)
    }

    /// Returns the build directory, creating it on first use.
    pub fn ensure_build_dir(&self) -> Result<&Path> {
        create_private_dir(&self.build_dir)?;
        Ok(&self.build_dir)
    }

    /// Expands a glob relative to the project root, or to the build
    /// directory when it starts with `${BUILD_DIR}`. Returns absolute paths
    /// together with the base they were resolved against.
    pub fn expand_paths(&self, pattern: &str) -> Result<(PathBuf, Vec<PathBuf>)> {
        let (base, pattern) = match pattern.strip_prefix(BUILD_DIR_VAR) {
            Some(rest) => (self.build_dir.clone(), rest.trim_start_matches(['/', '\\'])),
            None => (self.root.clone(), pattern),
        };
        let matches = glob_relative(&base, pattern)?
            .into_iter()
            .map(|relative| base.join(relative))
            .collect();
        Ok((base, matches))
    }
}

fn create_private_dir(dir: &Path) -> Result<()> {
    if dir.is_dir() {
        return Ok(());
    }
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o700);
    }
    builder
        .create(dir)
        .with_context(|| format!("failed to create {}", dir.display()))
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::python_sys::testing::StubInterpreter;

    /// A context over `root` writing into `root/dist`.
    pub(crate) fn context(root: &Path, target: BuildTarget, env: &[(&str, &str)]) -> Result<BuildContext> {
        context_with(root, target, env, ConfigSettings::default())
    }

    pub(crate) fn context_with(
        root: &Path,
        target: BuildTarget,
        env: &[(&str, &str)],
        settings: ConfigSettings,
    ) -> Result<BuildContext> {
        let project = PyProject::load(root)?;
        BuildContext::new(
            target,
            project,
            &root.join("dist"),
            settings,
            EnvSnapshot::testing(env),
            Arc::new(StubInterpreter::default()),
        )
    }
}
