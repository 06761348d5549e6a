use std::fs;
use std::path::Path;

use anyhow::{Context as _, Result};
use pdmb_domain::paths::is_same_or_descendant;
use pdmb_domain::{canonicalize_name, convert_package_paths, to_filename, EditableBackend};

use super::BuildHook;
use crate::collect::files::{FileMap, FileSource};
use crate::context::BuildContext;
use crate::distribution::editable::EditableProject;

const PROXIED_SUFFIXES: [&str; 3] = ["py", "pyc", "pyo"];

/// Turns a wheel build into an editable one: sources stay in the project
/// and the wheel only carries the redirection files.
pub(crate) struct EditableHook;

impl BuildHook for EditableHook {
    fn name(&self) -> &'static str {
        "editable"
    }

    fn pdm_build_initialize(&self, ctx: &mut BuildContext) -> Result<()> {
        let editables = prepare_editable(ctx)?;
        ctx.project.append_dependencies(&editables.dependencies())?;
        let version = ctx.project.metadata()?.require_version()?.to_string();
        ctx.project.set_version(&editable_version(&version))?;
        ctx.editables = Some(editables);
        Ok(())
    }

    fn pdm_build_update_files(&self, ctx: &mut BuildContext, files: &mut FileMap) -> Result<()> {
        let config = ctx.project.build_config();
        let package_dir = config.package_dir(&ctx.root);
        let packages = convert_package_paths(&ctx.root, config)?.packages;
        let proxied: Vec<String> = packages
            .iter()
            .map(|package| join(&package_dir, &package.replace('.', "/")))
            .collect();
        files.retain(|relpath, _| {
            let is_source = Path::new(relpath)
                .extension()
                .is_some_and(|ext| PROXIED_SUFFIXES.iter().any(|suffix| ext == *suffix));
            !is_source && !proxied.iter().any(|dir| is_same_or_descendant(relpath, dir))
        });

        let Some(editables) = ctx.editables.as_ref() else {
            return Ok(());
        };
        let build_dir = ctx.ensure_build_dir()?;
        for (name, content) in editables.files() {
            let path = build_dir.join(&name);
            fs::write(&path, content).with_context(|| format!("failed to write {}", path.display()))?;
            files.insert(name, FileSource::Path(path));
        }
        Ok(())
    }
}

fn editable_version(version: &str) -> String {
    if version.contains('+') {
        format!("{version}.editable")
    } else {
        format!("{version}+editable")
    }
}

fn join(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{dir}/{name}")
    }
}

fn prepare_editable(ctx: &mut BuildContext) -> Result<EditableProject> {
    let name = to_filename(&canonicalize_name(ctx.project.name()?));
    let mut editables = EditableProject::new(&name, &ctx.root)?;
    let config = ctx.project.build_config();
    let backend = config.editable_backend;
    let package_dir = config.package_dir(&ctx.root);
    let paths = convert_package_paths(&ctx.root, config)?;

    if backend == EditableBackend::Editables {
        for package in paths.packages.iter().filter(|package| !package.contains('.')) {
            editables.map(package, &join(&package_dir, package))?;
        }
        let search_dir = ctx.root.join(&package_dir);
        for module in paths.py_modules.iter().filter(|module| !module.contains('.')) {
            if let Some(found) = find_module_file(&search_dir, module)? {
                editables.map(module, &join(&package_dir, &found))?;
            }
        }
    }

    if editables.redirections().is_empty() {
        if backend == EditableBackend::Editables {
            ctx.warn(
                "editables backend is not available for namespace packages, fallback to path entries",
            );
        }
        editables.add_to_path(&package_dir);
    }
    Ok(editables)
}

/// A compiled extension wins over the pure-Python source of a module.
fn find_module_file(dir: &Path, module: &str) -> Result<Option<String>> {
    let extension = if cfg!(windows) { "pyd" } else { "so" };
    let mut compiled: Vec<String> = Vec::new();
    if dir.is_dir() {
        for entry in fs::read_dir(dir)? {
            let file_name = entry?.file_name().to_string_lossy().into_owned();
            let matches = file_name
                .strip_prefix(module)
                .and_then(|rest| rest.strip_prefix('.'))
                .is_some_and(|rest| rest.ends_with(&format!(".{extension}")));
            if matches {
                compiled.push(file_name);
            }
        }
    }
    compiled.sort();
    if let Some(found) = compiled.into_iter().next() {
        return Ok(Some(found));
    }
    let source = format!("{module}.py");
    Ok(dir.join(&source).is_file().then_some(source))
}
