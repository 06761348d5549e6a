//! The build pipeline shared by every artifact kind.
//!
//! A build runs `clean`, `initialize`, file collection with
//! `update_files`, archive writing and `finalize`, calling the registered
//! hooks at each step. Metadata preparation stops after `initialize`.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context as _, Result};
use pdmb_domain::{expand_vars, PyProject};
use tracing::{debug, info};

use super::{sdist, wheel};
use crate::collect::files::{collect_build_files, collect_files, FileMap};
use crate::context::{BuildContext, BuildTarget};
use crate::hooks::{builtin_hooks, BuildHook};
use crate::python_sys::{InterpreterInfo, SystemInterpreter};
use crate::settings::{ConfigSettings, EnvSnapshot};

const NO_CLEAN_SETTING: &str = "no-clean-build";

/// What a front-end hands to a build besides the project itself.
#[derive(Clone, Debug, Default)]
pub struct BuildOptions {
    pub config_settings: ConfigSettings,
    pub env: EnvSnapshot,
}

impl BuildOptions {
    /// Options reading the current process environment.
    pub fn from_env(config_settings: ConfigSettings) -> Self {
        Self {
            config_settings,
            env: EnvSnapshot::capture(),
        }
    }
}

/// A finished artifact and the warnings raised while producing it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BuildOutput {
    pub artifact: PathBuf,
    pub warnings: Vec<String>,
}

impl BuildOutput {
    /// The artifact's file name, which is what build front-ends expect back.
    pub fn file_name(&self) -> String {
        self.artifact
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

pub struct Builder {
    root: PathBuf,
    target: BuildTarget,
    options: BuildOptions,
    python: Arc<dyn InterpreterInfo>,
    hooks: Vec<Box<dyn BuildHook>>,
}

impl Builder {
    /// A builder for the project at `root` with the built-in hooks of
    /// `target` registered.
    pub fn new(root: &Path, target: BuildTarget, options: BuildOptions) -> Result<Self> {
        let root = root
            .canonicalize()
            .with_context(|| format!("project root {} not found", root.display()))?;
        let python = Arc::new(SystemInterpreter::from_env(&options.env));
        Ok(Self {
            root,
            target,
            options,
            python,
            hooks: builtin_hooks(target),
        })
    }

    /// Registers a hook after every previously registered one.
    #[must_use]
    pub fn with_hook(mut self, hook: impl BuildHook + 'static) -> Self {
        self.hooks.push(Box::new(hook));
        self
    }

    /// Replaces the interpreter used for tags, version getters and native
    /// builds.
    #[must_use]
    pub fn with_python(mut self, python: Arc<dyn InterpreterInfo>) -> Self {
        self.python = python;
        self
    }

    pub fn target(&self) -> BuildTarget {
        self.target
    }

    /// A fresh context writing into `dist_dir`.
    pub fn context(&self, dist_dir: &Path) -> Result<BuildContext> {
        let project = PyProject::load(&self.root)?;
        let dist_dir = if dist_dir.is_absolute() {
            dist_dir.to_path_buf()
        } else {
            env::current_dir()?.join(dist_dir)
        };
        BuildContext::new(
            self.target,
            project,
            &dist_dir,
            self.options.config_settings.clone(),
            self.options.env.clone(),
            Arc::clone(&self.python),
        )
    }

    fn call_hooks(
        &self,
        ctx: &mut BuildContext,
        phase: &str,
        mut call: impl FnMut(&dyn BuildHook, &mut BuildContext) -> Result<()>,
    ) -> Result<()> {
        for hook in &self.hooks {
            if !hook.pdm_build_hook_enabled(ctx) {
                continue;
            }
            debug!(hook = hook.name(), phase, "running build hook");
            call(hook.as_ref(), ctx)?;
        }
        Ok(())
    }

    /// Lets hooks clean up, then removes the build directory.
    pub fn clean(&self, ctx: &mut BuildContext) -> Result<()> {
        self.call_hooks(ctx, "clean", |hook, ctx| hook.pdm_build_clean(ctx))?;
        if ctx.build_dir.exists() {
            fs::remove_dir_all(&ctx.build_dir)
                .with_context(|| format!("failed to remove {}", ctx.build_dir.display()))?;
        }
        Ok(())
    }

    pub fn initialize(&self, ctx: &mut BuildContext) -> Result<()> {
        if ctx.target.is_wheel_like() {
            let root = ctx.root.clone();
            let env = ctx.env.clone();
            ctx.project.map_dependencies(|dependency| {
                expand_vars(dependency, &root, |name| env.var(name).map(String::from))
            })?;
        }
        self.call_hooks(ctx, "initialize", |hook, ctx| hook.pdm_build_initialize(ctx))
    }

    /// Every file of the artifact, keyed by its path inside it.
    pub fn get_files(&self, ctx: &mut BuildContext) -> Result<FileMap> {
        let mut files = collect_files(ctx)?;
        self.call_hooks(ctx, "update_files", |hook, ctx| {
            hook.pdm_build_update_files(ctx, &mut files)
        })?;
        files.extend(collect_build_files(ctx)?);
        match ctx.target {
            BuildTarget::Sdist => sdist::sdist_files(ctx, files),
            BuildTarget::Wheel | BuildTarget::Editable => wheel::wheel_files(ctx, files),
        }
    }

    fn finalize(&self, ctx: &mut BuildContext, artifact: &Path) -> Result<()> {
        self.call_hooks(ctx, "finalize", |hook, ctx| hook.pdm_build_finalize(ctx, artifact))
    }

    fn should_clean(&self, ctx: &BuildContext) -> bool {
        !ctx.config_settings.contains(NO_CLEAN_SETTING) && !ctx.env.no_clean_requested()
    }

    /// Builds the artifact into `dist_dir`. A prepared `.dist-info`
    /// directory, when given, is shipped instead of freshly rendered
    /// metadata.
    pub fn build(&self, dist_dir: &Path, metadata_directory: Option<&Path>) -> Result<BuildOutput> {
        let mut ctx = self.context(dist_dir)?;
        ctx.metadata_directory = metadata_directory.map(Path::to_path_buf);
        if self.should_clean(&ctx) {
            self.clean(&mut ctx)?;
        }
        self.initialize(&mut ctx)?;
        let files = self.get_files(&mut ctx)?;
        let artifact = match self.target {
            BuildTarget::Sdist => sdist::write_sdist(&ctx, &files)?,
            BuildTarget::Wheel | BuildTarget::Editable => wheel::write_wheel(&ctx, &files)?,
        };
        self.finalize(&mut ctx, &artifact)?;
        info!(kind = %self.target, path = %artifact.display(), "built artifact");
        Ok(BuildOutput {
            artifact,
            warnings: ctx.take_warnings(),
        })
    }

    /// Writes the `.dist-info` directory into `metadata_directory` and
    /// returns its name.
    pub fn prepare_metadata(&self, metadata_directory: &Path) -> Result<String> {
        let mut ctx = self.context(metadata_directory)?;
        self.initialize(&mut ctx)?;
        let dist_dir = ctx.dist_dir.clone();
        let name = wheel::write_dist_info(&mut ctx, &dist_dir)?;
        info!(path = %dist_dir.join(&name).display(), "prepared metadata");
        Ok(name)
    }
}
