use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Result;
use pdmb_domain::naming::{import_safe_name, is_valid_name};
use pdmb_domain::BackendError;

use crate::core::python::literal::py_str;

/// Import redirections for an editable install.
///
/// Each top-level name maps to a module file or a package `__init__.py` in
/// the source tree. When nothing can be mapped, plain `sys.path` entries
/// are used instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditableProject {
    project_name: String,
    project_dir: PathBuf,
    redirections: BTreeMap<String, PathBuf>,
    path_entries: Vec<PathBuf>,
}

impl EditableProject {
    pub fn new(project_name: &str, project_dir: &Path) -> Result<Self> {
        if !is_valid_name(project_name) {
            return Err(BackendError::config(format!(
                "Invalid project name {project_name:?} for an editable install"
            ))
            .into());
        }
        Ok(Self {
            project_name: import_safe_name(project_name),
            project_dir: project_dir.to_path_buf(),
            redirections: BTreeMap::new(),
            path_entries: Vec::new(),
        })
    }

    pub fn project_name(&self) -> &str {
        &self.project_name
    }

    /// Name of the generated bootstrap module.
    pub fn bootstrap(&self) -> String {
        format!("_editable_impl_{}", self.project_name)
    }

    pub fn redirections(&self) -> &BTreeMap<String, PathBuf> {
        &self.redirections
    }

    pub fn path_entries(&self) -> &[PathBuf] {
        &self.path_entries
    }

    /// Redirects the top-level `name` to `target`, a module file or a
    /// package directory relative to the project.
    pub fn map(&mut self, name: &str, target: &str) -> Result<()> {
        if name.contains('.') {
            return Err(BackendError::config(format!(
                "Cannot map {name} as it is not a top-level package"
            ))
            .into());
        }
        let mut absolute = self.make_absolute(target);
        if absolute.is_dir() {
            absolute = absolute.join("__init__.py");
        }
        if !absolute.is_file() {
            return Err(BackendError::config(format!(
                "{target} is not a valid Python package or module"
            ))
            .into());
        }
        self.redirections.insert(name.to_string(), absolute);
        Ok(())
    }

    pub fn add_to_path(&mut self, dir: &str) {
        let entry = self.make_absolute(dir);
        self.path_entries.push(entry);
    }

    /// Runtime requirements of the generated files.
    pub fn dependencies(&self) -> Vec<String> {
        if self.redirections.is_empty() {
            Vec::new()
        } else {
            vec!["editables".to_string()]
        }
    }

    /// The `.pth` file and, when anything is redirected, the bootstrap
    /// module it imports.
    pub fn files(&self) -> Vec<(String, String)> {
        let mut files = vec![(format!("{}.pth", self.project_name), self.pth_file())];
        if !self.redirections.is_empty() {
            files.push((format!("{}.py", self.bootstrap()), self.bootstrap_file()));
        }
        files
    }

    fn pth_file(&self) -> String {
        let mut lines = Vec::new();
        if !self.redirections.is_empty() {
            lines.push(format!("import {}", self.bootstrap()));
        }
        lines.extend(
            self.path_entries
                .iter()
                .map(|entry| entry.display().to_string()),
        );
        lines.join("\n")
    }

    fn bootstrap_file(&self) -> String {
        let mut lines = vec![
            "from editables.redirector import RedirectingFinder as F".to_string(),
            "F.install()".to_string(),
        ];
        for (name, path) in &self.redirections {
            lines.push(format!(
                "F.map_module({}, {})",
                py_str(name),
                py_str(&path.display().to_string())
            ));
        }
        let mut content = lines.join("\n");
        content.push('\n');
        content
    }

    fn make_absolute(&self, path: &str) -> PathBuf {
        let joined = self.project_dir.join(path);
        joined.canonicalize().unwrap_or(joined)
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use tempfile::tempdir;

    #[test]
    fn names_are_validated_and_normalized() -> Result<()> {
        let temp = tempdir()?;
        let project = EditableProject::new("My.Demo-Package", temp.path())?;
        assert_eq!(project.project_name(), "my_demo_package");
        assert_eq!(project.bootstrap(), "_editable_impl_my_demo_package");
        assert!(EditableProject::new("-bad-", temp.path()).is_err());
        Ok(())
    }

    #[test]
    fn packages_map_to_their_init_file() -> Result<()> {
        let temp = tempdir()?;
        let root = temp.path().canonicalize()?;
        fs::create_dir_all(root.join("src/demo"))?;
        fs::write(root.join("src/demo/__init__.py"), "")?;
        fs::write(root.join("single.py"), "")?;

        let mut project = EditableProject::new("demo", &root)?;
        project.map("demo", "src/demo")?;
        project.map("single", "single.py")?;
        assert!(project.map("demo.sub", "src/demo").is_err());
        assert!(project.map("missing", "missing.py").is_err());

        assert_eq!(project.dependencies(), vec!["editables".to_string()]);
        let files = project.files();
        assert_eq!(files[0], ("demo.pth".to_string(), "import _editable_impl_demo".to_string()));
        assert_eq!(files[1].0, "_editable_impl_demo.py");
        let expected = format!(
            "from editables.redirector import RedirectingFinder as F\nF.install()\n\
             F.map_module('demo', '{}')\nF.map_module('single', '{}')\n",
            root.join("src/demo/__init__.py").display(),
            root.join("single.py").display()
        );
        assert_eq!(files[1].1, expected);
        Ok(())
    }

    #[test]
    fn path_entries_without_redirections() -> Result<()> {
        let temp = tempdir()?;
        let root = temp.path().canonicalize()?;
        fs::create_dir_all(root.join("src"))?;
        let mut project = EditableProject::new("ns-pkg", &root)?;
        project.add_to_path("src");
        assert!(project.dependencies().is_empty());
        assert_eq!(
            project.files(),
            vec![("ns_pkg.pth".to_string(), root.join("src").display().to_string())]
        );
        Ok(())
    }
}
