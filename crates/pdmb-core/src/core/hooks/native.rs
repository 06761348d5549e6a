//! Compiles native extensions through setuptools.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result};
use pdmb_domain::{convert_package_paths, BackendError};

use super::BuildHook;
use crate::collect::files::FileMap;
use crate::context::{BuildContext, BuildTarget};
use crate::core::python::literal::{py_dict_block, py_dict_inline, py_list_block, py_str};
use crate::process::ToolCommand;

/// Requirement a front-end must install before native builds can run.
pub(crate) const SETUPTOOLS_REQUIREMENT: &str = "setuptools>=40.8.0";

pub(crate) struct NativeBuildHook;

impl BuildHook for NativeBuildHook {
    fn name(&self) -> &'static str {
        "native"
    }

    fn pdm_build_hook_enabled(&self, ctx: &BuildContext) -> bool {
        ctx.target != BuildTarget::Sdist && ctx.project.build_config().run_setuptools
    }

    fn pdm_build_update_files(&self, ctx: &mut BuildContext, _files: &mut FileMap) -> Result<()> {
        if ctx.target == BuildTarget::Editable {
            build_inplace(ctx)
        } else {
            build_lib(ctx)
        }
    }
}

/// `setup.py` for the duration of a build. A generated script is removed
/// again when dropped; a project's own script is left alone.
struct SetupScript {
    path: PathBuf,
    generated: bool,
}

impl Drop for SetupScript {
    fn drop(&mut self) {
        if self.generated {
            if let Err(err) = fs::remove_file(&self.path) {
                tracing::debug!(%err, path = %self.path.display(), "failed to remove generated setup.py");
            }
        }
    }
}

fn ensure_setup_py(ctx: &BuildContext) -> Result<SetupScript> {
    let path = ctx.root.join("setup.py");
    if path.is_file() {
        return Ok(SetupScript {
            path,
            generated: false,
        });
    }
    fs::write(&path, format_setup_py(ctx)?)
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(SetupScript {
        path,
        generated: true,
    })
}

fn build_lib(ctx: &BuildContext) -> Result<()> {
    let build_dir = ctx.ensure_build_dir()?.to_path_buf();
    let setup_py = ensure_setup_py(ctx)?;
    let temp = tempfile::Builder::new().prefix("pdm-build-").tempdir()?;
    let temp_path = temp.path().display().to_string();
    run_setup(
        ctx,
        &setup_py,
        &["build".to_string(), "-b".to_string(), temp_path],
    )?;
    let Some(lib_dir) = find_lib_dir(temp.path())? else {
        return Ok(());
    };
    copy_recursive(&lib_dir, &build_dir)
}

fn build_inplace(ctx: &BuildContext) -> Result<()> {
    let setup_py = ensure_setup_py(ctx)?;
    run_setup(
        ctx,
        &setup_py,
        &["build_ext".to_string(), "--inplace".to_string()],
    )
}

fn run_setup(ctx: &BuildContext, setup_py: &SetupScript, args: &[String]) -> Result<()> {
    let command = ToolCommand::new(ctx.python.executable()?, &ctx.root)
        .arg(setup_py.path.display().to_string())
        .args(args.iter().cloned())
        .echo();
    tracing::info!("running {command}");
    let output = command.run()?;
    if !output.success() {
        return Err(BackendError::Build {
            command: command.to_string(),
            output: output.combined(),
        }
        .into());
    }
    Ok(())
}

fn find_lib_dir(dir: &Path) -> Result<Option<PathBuf>> {
    let mut candidates = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("failed to read {}", dir.display()))? {
        let entry = entry?;
        if entry.file_name().to_string_lossy().starts_with("lib.") {
            candidates.push(entry.path());
        }
    }
    candidates.sort();
    Ok(candidates.into_iter().next())
}

fn copy_recursive(src: &Path, dest: &Path) -> Result<()> {
    if src.is_file() {
        fs::copy(src, dest)
            .with_context(|| format!("failed to copy {} to {}", src.display(), dest.display()))?;
        return Ok(());
    }
    fs::create_dir_all(dest).with_context(|| format!("failed to create {}", dest.display()))?;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        copy_recursive(&entry.path(), &dest.join(entry.file_name()))?;
    }
    Ok(())
}

/// A minimal `setup.py` describing the project to setuptools.
pub(crate) fn format_setup_py(ctx: &BuildContext) -> Result<String> {
    let meta = ctx.project.metadata()?;
    let paths = convert_package_paths(&ctx.root, ctx.project.build_config())?;
    let mut before = String::new();
    let mut extra = String::new();

    if !paths.packages.is_empty() {
        extra.push_str(&format!("    'packages': {},\n", py_list_block(&paths.packages, 8)));
    }
    if !paths.py_modules.is_empty() {
        extra.push_str(&format!("    'py_modules': {},\n", py_list_block(&paths.py_modules, 8)));
    }
    if let Some(package_dir) = &paths.package_dir {
        extra.push_str(&format!("    'package_dir': {{'': {}}},\n", py_str(package_dir)));
    }
    if !paths.package_data.is_empty() {
        extra.push_str(&format!("    'package_data': {},\n", py_dict_inline(&paths.package_data)));
    }
    if !paths.exclude_package_data.is_empty() {
        extra.push_str(&format!(
            "    'exclude_package_data': {},\n",
            py_dict_inline(&paths.exclude_package_data)
        ));
    }
    if !meta.dependencies.is_empty() {
        let dependencies: Vec<String> = meta.dependencies.iter().map(ToString::to_string).collect();
        before.push_str(&format!("INSTALL_REQUIRES = {}\n", py_list_block(&dependencies, 4)));
        extra.push_str("    'install_requires': INSTALL_REQUIRES,\n");
    }
    if !meta.optional_dependencies.is_empty() {
        let extras: BTreeMap<String, Vec<String>> = meta
            .optional_dependencies
            .iter()
            .map(|(name, deps)| (name.clone(), deps.iter().map(ToString::to_string).collect()))
            .collect();
        before.push_str(&format!("EXTRAS_REQUIRE = {}\n", py_dict_block(&extras, 4)));
        extra.push_str("    'extras_require': EXTRAS_REQUIRE,\n");
    }
    if let Some(requires_python) = &meta.requires_python {
        extra.push_str(&format!("    'python_requires': {},\n", py_str(requires_python)));
    }
    if !meta.entry_points.is_empty() {
        let entry_points: BTreeMap<String, Vec<String>> = meta
            .entry_points
            .iter()
            .map(|(group, items)| {
                (
                    group.clone(),
                    items.iter().map(|(name, value)| format!("{name} = {value}")).collect(),
                )
            })
            .collect();
        before.push_str(&format!("ENTRY_POINTS = {}\n", py_dict_block(&entry_points, 4)));
        extra.push_str("    'entry_points': ENTRY_POINTS,\n");
    }

    let homepage = meta
        .urls
        .iter()
        .find(|(label, _)| label.eq_ignore_ascii_case("homepage"))
        .map_or("", |(_, url)| url.as_str());
    Ok(format!(
        "# -*- coding: utf-8 -*-\nfrom setuptools import setup\n\n{before}\nsetup_kwargs = {{\n    \
         'name': {name},\n    'version': {version},\n    'description': {description},\n    \
         'url': {url},\n{extra}}}\n\nsetup(**setup_kwargs)\n",
        name = py_str(&meta.name),
        version = py_str(meta.version.as_deref().unwrap_or("0.0.0")),
        description = py_str(meta.description.as_deref().unwrap_or("UNKNOWN")),
        url = py_str(homepage),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::testing::context;
    use tempfile::tempdir;

    const NATIVE_PYPROJECT: &str = r#"[project]
name = "demo-cextension"
version = "0.1.0"
description = "A C extension"
dependencies = ["requests>=2"]
requires-python = ">=3.8"

[project.urls]
Homepage = "https://example.com"

[project.scripts]
demo = "my_package:main"

[tool.pdm.build]
run-setuptools = true
"#;

    fn native_project(root: &Path) -> Result<()> {
        fs::write(root.join("pyproject.toml"), NATIVE_PYPROJECT)?;
        fs::create_dir_all(root.join("my_package"))?;
        fs::write(root.join("my_package/__init__.py"), "")?;
        fs::write(root.join("my_package/hellomodule.c"), "")?;
        Ok(())
    }

    #[test]
    fn enabled_only_for_wheel_like_targets() -> Result<()> {
        let temp = tempdir()?;
        native_project(temp.path())?;
        let wheel = context(temp.path(), BuildTarget::Wheel, &[])?;
        let sdist = context(temp.path(), BuildTarget::Sdist, &[])?;
        assert!(NativeBuildHook.pdm_build_hook_enabled(&wheel));
        assert!(!NativeBuildHook.pdm_build_hook_enabled(&sdist));
        Ok(())
    }

    #[test]
    fn generated_setup_py_describes_project() -> Result<()> {
        let temp = tempdir()?;
        native_project(temp.path())?;
        let ctx = context(temp.path(), BuildTarget::Wheel, &[])?;
        let script = format_setup_py(&ctx)?;
        assert!(script.starts_with("# -*- coding: utf-8 -*-\nfrom setuptools import setup\n"));
        assert!(script.contains("    'name': 'demo-cextension',\n"));
        assert!(script.contains("    'url': 'https://example.com',\n"));
        assert!(script.contains("    'packages': [\n        'my_package',\n    ],\n"));
        assert!(script.contains("INSTALL_REQUIRES = [\n    'requests>=2',\n]\n"));
        assert!(script.contains("    'python_requires': '>=3.8',\n"));
        assert!(script.contains("'console_scripts': [\n        'demo = my_package:main',\n    ],"));
        assert!(script.ends_with("}\n\nsetup(**setup_kwargs)\n"));
        Ok(())
    }

    #[test]
    fn generated_setup_py_is_removed_on_drop() -> Result<()> {
        let temp = tempdir()?;
        native_project(temp.path())?;
        let ctx = context(temp.path(), BuildTarget::Wheel, &[])?;
        {
            let script = ensure_setup_py(&ctx)?;
            assert!(script.generated);
            assert!(temp.path().join("setup.py").is_file());
        }
        assert!(!temp.path().join("setup.py").exists());

        fs::write(temp.path().join("setup.py"), "# own\n")?;
        drop(ensure_setup_py(&ctx)?);
        assert_eq!(fs::read_to_string(temp.path().join("setup.py"))?, "# own\n");
        Ok(())
    }

    #[test]
    fn lib_dir_is_copied_into_build_dir() -> Result<()> {
        let temp = tempdir()?;
        let build = temp.path().join("build");
        fs::create_dir_all(build.join("lib.linux-x86_64-cpython-311/my_package"))?;
        fs::create_dir_all(build.join("temp.linux-x86_64-cpython-311"))?;
        fs::write(
            build.join("lib.linux-x86_64-cpython-311/my_package/hello.cpython-311-x86_64-linux-gnu.so"),
            b"\x7fELF",
        )?;
        let lib = find_lib_dir(&build)?.unwrap();
        let dest = temp.path().join(".pdm-build");
        fs::create_dir_all(&dest)?;
        copy_recursive(&lib, &dest)?;
        assert!(dest
            .join("my_package/hello.cpython-311-x86_64-linux-gnu.so")
            .is_file());
        Ok(())
    }
}
