use std::fs;

use anyhow::{Context as _, Result};
use once_cell::sync::Lazy;
use pdmb_domain::{BackendError, VersionConfig, VersionSource};
use regex::Regex;

use super::scm::{get_version_from_scm, ScmConfig};
use super::BuildHook;
use crate::context::{BuildContext, BuildTarget};
use crate::process::ToolCommand;

const FALLBACK_VERSION: &str = "0.0.0";
const SCM_VERSION_ENV: &str = "PDM_BUILD_SCM_VERSION";

static VERSION_IN_FILE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?m)^__version__\s*=\s*["'](.+?)["']\s*(?:#.*)?$"#)
        .expect("version assignment regex is valid")
});
static GETTER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([\w.]+)\s*:\s*([\w.]+)\s*(\([^)]+\))?").expect("getter regex is valid")
});

const CALL_SCRIPT: &str = r#"import ast, functools, importlib, sys
root, module_name, attrs, args = sys.argv[1:5]
sys.path.insert(0, root)
module = importlib.import_module(module_name)
obj = functools.reduce(getattr, attrs.split("."), module)
call_args = ast.literal_eval(args.strip()[:-1] + ",)") if args else ()
sys.stdout.write(str(obj(*call_args)))
"#;

/// Resolves `project.version` from `[tool.pdm.version]`.
pub(crate) struct DynamicVersionHook;

impl BuildHook for DynamicVersionHook {
    fn name(&self) -> &'static str {
        "version"
    }

    fn pdm_build_initialize(&self, ctx: &mut BuildContext) -> Result<()> {
        let config = match ctx.project.version_config() {
            Some(config) if !ctx.project.has_static_version() => config.clone(),
            _ => {
                if !ctx.project.has_static_version() {
                    ctx.project.set_version(FALLBACK_VERSION)?;
                }
                ctx.project.remove_dynamic("version")?;
                return Ok(());
            }
        };
        if !ctx.project.is_dynamic("version") {
            return Err(BackendError::validation(
                "missing 'version' in project.dynamic",
                "The 'version' field must be present in project.dynamic to resolve it dynamically",
            )
            .into());
        }
        let source = config.source()?;
        let Some(kind) = VersionSource::parse(source) else {
            ctx.warn(format!(
                "Invalid version source {source}, must be one of file, scm, call"
            ));
            return Ok(());
        };
        let version = match kind {
            VersionSource::File => resolve_from_file(ctx, &config)?,
            VersionSource::Scm => {
                let version = resolve_from_scm(ctx, &config)?;
                write_version(ctx, &config, &version)?;
                version
            }
            VersionSource::Call => {
                let version = resolve_from_call(ctx, &config)?;
                write_version(ctx, &config, &version)?;
                version
            }
        };
        tracing::debug!(%version, source, "resolved dynamic version");
        ctx.project.set_version(&version)?;
        ctx.project.remove_dynamic("version")?;
        Ok(())
    }
}

fn resolve_from_file(ctx: &BuildContext, config: &VersionConfig) -> Result<String> {
    let relative = config
        .path
        .as_deref()
        .ok_or_else(|| BackendError::config("tool.pdm.version.path is required for the file source"))?;
    let path = ctx.root.join(relative);
    let contents =
        fs::read_to_string(&path).with_context(|| format!("failed to read {}", path.display()))?;
    VERSION_IN_FILE
        .captures(&contents)
        .map(|captures| captures[1].to_string())
        .ok_or_else(|| {
            BackendError::config(format!(
                "Couldn't find version in file {:?}, it should appear as `__version__ = 'a.b.c'`.",
                path.display().to_string()
            ))
            .into()
        })
}

fn resolve_from_scm(ctx: &mut BuildContext, config: &VersionConfig) -> Result<String> {
    if let Some(version) = ctx.env.var(SCM_VERSION_ENV) {
        return Ok(version.to_string());
    }
    let scm_config = ScmConfig::new(config.tag_regex.as_deref(), config.tag_filter.as_deref())?;
    let mut warnings = Vec::new();
    let version = get_version_from_scm(&ctx.root, &scm_config, &ctx.env, &mut warnings)?;
    for warning in warnings {
        ctx.warn(warning);
    }
    version.ok_or_else(|| {
        BackendError::config(format!(
            "Unable to determine the version from a git or hg repository at {}, \
             set {SCM_VERSION_ENV} to provide it",
            ctx.root.display()
        ))
        .into()
    })
}

fn resolve_from_call(ctx: &BuildContext, config: &VersionConfig) -> Result<String> {
    let getter = config
        .getter
        .as_deref()
        .ok_or_else(|| BackendError::config("tool.pdm.version.getter is required for the call source"))?;
    let captures = GETTER.captures(getter).ok_or_else(|| {
        BackendError::config("Invalid version getter, must be in the format of `module:attribute`.")
    })?;
    let args = captures.get(3).map_or("", |args| args.as_str());
    let python = ctx.python.executable()?;
    let output = ToolCommand::new(python.clone(), &ctx.root)
        .args(["-c", CALL_SCRIPT])
        .arg(ctx.root.display().to_string())
        .args([&captures[1], &captures[2], args])
        .run()?;
    if !output.success() {
        return Err(BackendError::Build {
            command: format!("{python} (version getter {getter})"),
            output: output.combined(),
        }
        .into());
    }
    Ok(output.stdout.trim().to_string())
}

/// Renders the version into `write_to` under the build directory so that
/// it ships with wheels; sdists rebuild it from the frozen manifest.
fn write_version(ctx: &BuildContext, config: &VersionConfig, version: &str) -> Result<()> {
    let Some(write_to) = config.write_to.as_deref() else {
        return Ok(());
    };
    if ctx.target == BuildTarget::Sdist {
        return Ok(());
    }
    let target = ctx.build_dir.join(write_to);
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    fs::write(&target, render_template(config.write_template(), version))
        .with_context(|| format!("failed to write {}", target.display()))
}

fn render_template(template: &str, version: &str) -> String {
    template
        .replace("{}", version)
        .replace("{{", "{")
        .replace("}}", "}")
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;
    use crate::context::testing::context;
    use tempfile::tempdir;

    fn project(root: &Path, pyproject: &str) -> Result<()> {
        fs::write(root.join("pyproject.toml"), pyproject)?;
        Ok(())
    }

    #[test]
    fn static_version_drops_dynamic_entry() -> Result<()> {
        let temp = tempdir()?;
        project(temp.path(), "[project]\nname = \"demo\"\nversion = \"1.0\"\n")?;
        let mut ctx = context(temp.path(), BuildTarget::Wheel, &[])?;
        DynamicVersionHook.pdm_build_initialize(&mut ctx)?;
        assert_eq!(ctx.project.metadata()?.version.as_deref(), Some("1.0"));
        Ok(())
    }

    #[test]
    fn missing_version_defaults_to_zero() -> Result<()> {
        let temp = tempdir()?;
        project(temp.path(), "[project]\nname = \"demo\"\ndynamic = [\"version\"]\n")?;
        let mut ctx = context(temp.path(), BuildTarget::Wheel, &[])?;
        DynamicVersionHook.pdm_build_initialize(&mut ctx)?;
        assert_eq!(ctx.project.metadata()?.version.as_deref(), Some("0.0.0"));
        assert!(!ctx.project.is_dynamic("version"));
        Ok(())
    }

    #[test]
    fn file_source_reads_dunder_version() -> Result<()> {
        let temp = tempdir()?;
        project(
            temp.path(),
            "[project]\nname = \"demo\"\ndynamic = [\"version\"]\n\n[tool.pdm.version]\nsource = \"file\"\npath = \"demo/__init__.py\"\n",
        )?;
        fs::create_dir_all(temp.path().join("demo"))?;
        fs::write(temp.path().join("demo/__init__.py"), "__version__ = \"2.3.4\"  # bumped\n")?;
        let mut ctx = context(temp.path(), BuildTarget::Sdist, &[])?;
        DynamicVersionHook.pdm_build_initialize(&mut ctx)?;
        assert_eq!(ctx.project.metadata()?.version.as_deref(), Some("2.3.4"));
        assert!(!ctx.project.render().contains("dynamic = [\"version\"]"));
        Ok(())
    }

    #[test]
    fn file_without_version_is_config_error() -> Result<()> {
        let temp = tempdir()?;
        project(
            temp.path(),
            "[project]\nname = \"demo\"\ndynamic = [\"version\"]\n\n[tool.pdm.version]\nsource = \"file\"\npath = \"demo.py\"\n",
        )?;
        fs::write(temp.path().join("demo.py"), "VERSION = '1'\n")?;
        let mut ctx = context(temp.path(), BuildTarget::Wheel, &[])?;
        let err = DynamicVersionHook.pdm_build_initialize(&mut ctx).unwrap_err();
        let backend = err.downcast_ref::<BackendError>().unwrap();
        assert!(matches!(backend, BackendError::Config(message) if message.starts_with("Couldn't find version in file")));
        Ok(())
    }

    #[test]
    fn version_config_requires_dynamic_entry() -> Result<()> {
        let temp = tempdir()?;
        project(
            temp.path(),
            "[project]\nname = \"demo\"\n\n[tool.pdm.version]\nsource = \"scm\"\n",
        )?;
        let mut ctx = context(temp.path(), BuildTarget::Wheel, &[])?;
        let err = DynamicVersionHook.pdm_build_initialize(&mut ctx).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BackendError>(),
            Some(BackendError::Validation { summary, .. }) if summary == "missing 'version' in project.dynamic"
        ));
        Ok(())
    }

    #[test]
    fn unknown_source_only_warns() -> Result<()> {
        let temp = tempdir()?;
        project(
            temp.path(),
            "[project]\nname = \"demo\"\ndynamic = [\"version\"]\n\n[tool.pdm.version]\nsource = \"magic\"\n",
        )?;
        let mut ctx = context(temp.path(), BuildTarget::Wheel, &[])?;
        DynamicVersionHook.pdm_build_initialize(&mut ctx)?;
        assert_eq!(
            ctx.warnings(),
            ["Invalid version source magic, must be one of file, scm, call".to_string()]
        );
        assert!(ctx.project.is_dynamic("version"));
        Ok(())
    }

    #[test]
    fn scm_override_is_written_for_wheels_only() -> Result<()> {
        let temp = tempdir()?;
        project(
            temp.path(),
            "[project]\nname = \"demo\"\ndynamic = [\"version\"]\n\n[tool.pdm.version]\nsource = \"scm\"\nwrite_to = \"demo/_version.py\"\nwrite_template = \"__version__ = '{}'\\n\"\n",
        )?;
        let env = [("PDM_BUILD_SCM_VERSION", "3.1.0")];

        let mut wheel = context(temp.path(), BuildTarget::Wheel, &env)?;
        DynamicVersionHook.pdm_build_initialize(&mut wheel)?;
        assert_eq!(wheel.project.metadata()?.version.as_deref(), Some("3.1.0"));
        assert_eq!(
            fs::read_to_string(wheel.build_dir.join("demo/_version.py"))?,
            "__version__ = '3.1.0'\n"
        );

        fs::remove_dir_all(&wheel.build_dir)?;
        let mut sdist = context(temp.path(), BuildTarget::Sdist, &env)?;
        DynamicVersionHook.pdm_build_initialize(&mut sdist)?;
        assert!(!sdist.build_dir.join("demo/_version.py").exists());
        Ok(())
    }

    #[test]
    fn malformed_getter_is_rejected() -> Result<()> {
        let temp = tempdir()?;
        project(
            temp.path(),
            "[project]\nname = \"demo\"\ndynamic = [\"version\"]\n\n[tool.pdm.version]\nsource = \"call\"\ngetter = \"not a getter\"\n",
        )?;
        let mut ctx = context(temp.path(), BuildTarget::Wheel, &[])?;
        let err = DynamicVersionHook.pdm_build_initialize(&mut ctx).unwrap_err();
        assert!(err.to_string().starts_with("Invalid version getter"));
        Ok(())
    }

    #[test]
    fn templates_substitute_version() {
        assert_eq!(render_template("{}\n", "1.0"), "1.0\n");
        assert_eq!(render_template("V = '{}'  # {{generated}}", "1.0"), "V = '1.0'  # {generated}");
    }
}
