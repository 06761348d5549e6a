//! Build front-end entry points.
//!
//! Each function mirrors one build backend hook. They read the process
//! environment once and query the interpreter found through `PDMB_PYTHON`
//! or `PATH`. The `*_output` variants return the full [`BuildOutput`] for
//! front-ends that want warnings and the artifact path.

use std::path::Path;

use anyhow::Result;
use pdmb_domain::PyProject;

use crate::core::hooks::native::SETUPTOOLS_REQUIREMENT;
use crate::distribution::builder::{BuildOptions, BuildOutput, Builder};
use crate::{BuildTarget, ConfigSettings};

const EDITABLES_REQUIREMENT: &str = "editables";

fn builder(root: &Path, target: BuildTarget, settings: &ConfigSettings) -> Result<Builder> {
    Builder::new(root, target, BuildOptions::from_env(settings.clone()))
}

/// Extra requirements for building a wheel: setuptools when the project
/// compiles native code.
pub fn get_requires_for_build_wheel(root: &Path, _settings: &ConfigSettings) -> Result<Vec<String>> {
    let project = PyProject::load(root)?;
    if project.build_config().run_setuptools {
        Ok(vec![SETUPTOOLS_REQUIREMENT.to_string()])
    } else {
        Ok(Vec::new())
    }
}

pub fn get_requires_for_build_sdist(_root: &Path, _settings: &ConfigSettings) -> Result<Vec<String>> {
    Ok(Vec::new())
}

pub fn get_requires_for_build_editable(root: &Path, settings: &ConfigSettings) -> Result<Vec<String>> {
    let mut requires = get_requires_for_build_wheel(root, settings)?;
    requires.push(EDITABLES_REQUIREMENT.to_string());
    Ok(requires)
}

/// Writes the wheel's `.dist-info` into `metadata_directory` and returns
/// the directory name.
pub fn prepare_metadata_for_build_wheel(
    root: &Path,
    metadata_directory: &Path,
    settings: &ConfigSettings,
) -> Result<String> {
    builder(root, BuildTarget::Wheel, settings)?.prepare_metadata(metadata_directory)
}

pub fn prepare_metadata_for_build_editable(
    root: &Path,
    metadata_directory: &Path,
    settings: &ConfigSettings,
) -> Result<String> {
    builder(root, BuildTarget::Editable, settings)?.prepare_metadata(metadata_directory)
}

pub fn build_wheel_output(
    root: &Path,
    wheel_directory: &Path,
    settings: &ConfigSettings,
    metadata_directory: Option<&Path>,
) -> Result<BuildOutput> {
    builder(root, BuildTarget::Wheel, settings)?.build(wheel_directory, metadata_directory)
}

/// Builds a wheel and returns its file name.
pub fn build_wheel(
    root: &Path,
    wheel_directory: &Path,
    settings: &ConfigSettings,
    metadata_directory: Option<&Path>,
) -> Result<String> {
    Ok(build_wheel_output(root, wheel_directory, settings, metadata_directory)?.file_name())
}

pub fn build_editable_output(
    root: &Path,
    wheel_directory: &Path,
    settings: &ConfigSettings,
    metadata_directory: Option<&Path>,
) -> Result<BuildOutput> {
    builder(root, BuildTarget::Editable, settings)?.build(wheel_directory, metadata_directory)
}

/// Builds an editable wheel and returns its file name.
pub fn build_editable(
    root: &Path,
    wheel_directory: &Path,
    settings: &ConfigSettings,
    metadata_directory: Option<&Path>,
) -> Result<String> {
    Ok(build_editable_output(root, wheel_directory, settings, metadata_directory)?.file_name())
}

pub fn build_sdist_output(
    root: &Path,
    sdist_directory: &Path,
    settings: &ConfigSettings,
) -> Result<BuildOutput> {
    builder(root, BuildTarget::Sdist, settings)?.build(sdist_directory, None)
}

/// Builds a source distribution and returns its file name.
pub fn build_sdist(root: &Path, sdist_directory: &Path, settings: &ConfigSettings) -> Result<String> {
    Ok(build_sdist_output(root, sdist_directory, settings)?.file_name())
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use serial_test::serial;
    use tempfile::tempdir;

    fn project(root: &Path, build: &str) -> Result<()> {
        fs::write(
            root.join("pyproject.toml"),
            format!("[project]\nname = \"demo\"\nversion = \"0.1.0\"\n{build}"),
        )?;
        fs::create_dir_all(root.join("demo"))?;
        fs::write(root.join("demo/__init__.py"), "")?;
        Ok(())
    }

    #[test]
    fn requirements_depend_on_native_builds() -> Result<()> {
        let temp = tempdir()?;
        let settings = ConfigSettings::default();
        project(temp.path(), "")?;
        assert!(get_requires_for_build_wheel(temp.path(), &settings)?.is_empty());
        assert!(get_requires_for_build_sdist(temp.path(), &settings)?.is_empty());
        assert_eq!(
            get_requires_for_build_editable(temp.path(), &settings)?,
            vec!["editables".to_string()]
        );

        project(temp.path(), "\n[tool.pdm.build]\nrun-setuptools = true\n")?;
        assert_eq!(
            get_requires_for_build_wheel(temp.path(), &settings)?,
            vec!["setuptools>=40.8.0".to_string()]
        );
        assert_eq!(
            get_requires_for_build_editable(temp.path(), &settings)?,
            vec!["setuptools>=40.8.0".to_string(), "editables".to_string()]
        );
        Ok(())
    }

    #[test]
    #[serial]
    fn sdist_entry_point_returns_file_name() -> Result<()> {
        let temp = tempdir()?;
        project(temp.path(), "")?;
        let name = build_sdist(temp.path(), &temp.path().join("dist"), &ConfigSettings::default())?;
        assert_eq!(name, "demo-0.1.0.tar.gz");
        assert!(temp.path().join("dist").join(&name).is_file());
        Ok(())
    }
}
