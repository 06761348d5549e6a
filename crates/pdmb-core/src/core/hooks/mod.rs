//! Build hooks: callbacks run at fixed points of every build.
//!
//! The built-in hooks are registered first, in a fixed order per target;
//! extra hooks added through [`crate::Builder::with_hook`] follow them.

use std::path::Path;

use anyhow::Result;

use crate::collect::files::FileMap;
use crate::context::BuildContext;

pub(crate) mod editable;
pub(crate) mod native;
pub(crate) mod scm;
pub(crate) mod version;

pub(crate) use editable::EditableHook;
pub(crate) use native::NativeBuildHook;
pub(crate) use version::DynamicVersionHook;

/// A participant in the build. Every phase defaults to doing nothing, and
/// an error from any phase aborts the build as is.
pub trait BuildHook {
    /// Short name for log lines.
    fn name(&self) -> &'static str {
        "hook"
    }

    /// Disabled hooks are skipped for every phase.
    fn pdm_build_hook_enabled(&self, _ctx: &BuildContext) -> bool {
        true
    }

    /// Runs before the build directory is removed.
    fn pdm_build_clean(&self, _ctx: &mut BuildContext) -> Result<()> {
        Ok(())
    }

    /// Runs before files are collected; the place to change metadata.
    fn pdm_build_initialize(&self, _ctx: &mut BuildContext) -> Result<()> {
        Ok(())
    }

    /// Receives the collected files, keyed by their path in the artifact.
    fn pdm_build_update_files(&self, _ctx: &mut BuildContext, _files: &mut FileMap) -> Result<()> {
        Ok(())
    }

    /// Runs once the artifact is in place.
    fn pdm_build_finalize(&self, _ctx: &mut BuildContext, _artifact: &Path) -> Result<()> {
        Ok(())
    }
}

/// Built-in hooks for a target, in invocation order.
pub(crate) fn builtin_hooks(target: crate::BuildTarget) -> Vec<Box<dyn BuildHook>> {
    use crate::BuildTarget;

    let mut hooks: Vec<Box<dyn BuildHook>> = vec![Box::new(DynamicVersionHook)];
    match target {
        BuildTarget::Sdist => {}
        BuildTarget::Wheel => hooks.push(Box::new(NativeBuildHook)),
        BuildTarget::Editable => {
            hooks.push(Box::new(NativeBuildHook));
            hooks.push(Box::new(EditableHook));
        }
    }
    hooks
}
