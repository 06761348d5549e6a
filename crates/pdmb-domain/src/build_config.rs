use std::path::Path;

use anyhow::Result;
use toml_edit::TableLike;

use crate::paths::pattern_parts;
use crate::toml_util::{get_bool, get_str, get_str_list, invalid_type};
use crate::BackendError;

pub const DEFAULT_CUSTOM_HOOK: &str = "pdm_build.py";
pub const WHEEL_SCHEMES: [&str; 6] = [
    "purelib",
    "platlib",
    "include",
    "platinclude",
    "scripts",
    "data",
];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum EditableBackend {
    /// Per-module import redirection through the `editables` runtime.
    #[default]
    Editables,
    /// A plain `.pth` path entry for the package directory.
    Path,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WheelDataSpec {
    pub path: String,
    pub relative_to: Option<String>,
}

/// The `[tool.pdm.build]` table.
#[derive(Clone, Debug, Default)]
pub struct BuildConfig {
    pub includes: Vec<String>,
    pub excludes: Vec<String>,
    pub source_includes: Vec<String>,
    pub package_dir: Option<String>,
    pub is_purelib: Option<bool>,
    pub run_setuptools: bool,
    pub editable_backend: EditableBackend,
    pub custom_hook: Option<String>,
    pub wheel_data: Vec<(String, Vec<WheelDataSpec>)>,
}

impl BuildConfig {
    pub fn from_table(table: Option<&dyn TableLike>) -> Result<Self> {
        let Some(table) = table else {
            return Ok(Self::default());
        };
        let editable_backend = match get_str(table, "editable-backend", "tool.pdm.build.editable-backend")? {
            None | Some("editables") => EditableBackend::Editables,
            Some("path") => EditableBackend::Path,
            Some(other) => {
                return Err(BackendError::config(format!(
                    "Invalid editable-backend {other:?}, must be one of \"editables\", \"path\""
                ))
                .into())
            }
        };
        Ok(Self {
            includes: get_str_list(table, "includes", "tool.pdm.build.includes")?.unwrap_or_default(),
            excludes: get_str_list(table, "excludes", "tool.pdm.build.excludes")?.unwrap_or_default(),
            source_includes: get_str_list(table, "source-includes", "tool.pdm.build.source-includes")?
                .unwrap_or_default(),
            package_dir: get_str(table, "package-dir", "tool.pdm.build.package-dir")?
                .map(|dir| pattern_parts(dir).join("/")),
            is_purelib: get_bool(table, "is-purelib", "tool.pdm.build.is-purelib")?,
            run_setuptools: get_bool(table, "run-setuptools", "tool.pdm.build.run-setuptools")?
                .unwrap_or(false),
            editable_backend,
            custom_hook: get_str(table, "custom-hook", "tool.pdm.build.custom-hook")?
                .map(ToString::to_string),
            wheel_data: parse_wheel_data(table)?,
        })
    }

    /// The directory packages are looked up in, `""` for the project root.
    ///
    /// Without an explicit `package-dir`, a `src/` layout is assumed when
    /// `src` exists and no includes are configured, or when an include
    /// points into `src` and `src` itself is not excluded.
    pub fn package_dir(&self, root: &Path) -> String {
        if let Some(dir) = &self.package_dir {
            return dir.clone();
        }
        let src_layout = root.join("src").is_dir() && self.includes.is_empty();
        let include_in_src = self
            .includes
            .iter()
            .any(|include| pattern_parts(include).first() == Some(&"src"))
            && !self.excludes.iter().any(|e| e == "src" || e == "src/");
        if src_layout || include_in_src {
            "src".to_string()
        } else {
            String::new()
        }
    }

    /// Paths only shipped in source distributions.
    pub fn source_includes(&self) -> Vec<String> {
        if self.source_includes.is_empty() {
            vec!["tests".to_string()]
        } else {
            self.source_includes.clone()
        }
    }

    /// The local hook script, when it exists.
    pub fn custom_hook(&self, root: &Path) -> Option<String> {
        let script = self.custom_hook.as_deref().unwrap_or(DEFAULT_CUSTOM_HOOK);
        root.join(script).exists().then(|| script.to_string())
    }

    /// Projects that compile native code are not pure unless told otherwise.
    pub fn is_purelib(&self) -> bool {
        self.is_purelib.unwrap_or(!self.run_setuptools)
    }
}

fn parse_wheel_data(table: &dyn TableLike) -> Result<Vec<(String, Vec<WheelDataSpec>)>> {
    let Some(item) = table.get("wheel-data") else {
        return Ok(Vec::new());
    };
    let field = "tool.pdm.build.wheel-data";
    let schemes = item
        .as_table_like()
        .ok_or_else(|| invalid_type(field, "a table", item))?;
    let mut result = Vec::new();
    for (scheme, specs) in schemes.iter() {
        if !WHEEL_SCHEMES.contains(&scheme) {
            return Err(BackendError::config(format!(
                "Unknown scheme name {scheme:?}, must be one of {}",
                WHEEL_SCHEMES.join(", ")
            ))
            .into());
        }
        let entry_field = format!("{field}.{scheme}");
        let array = specs
            .as_array()
            .ok_or_else(|| invalid_type(&entry_field, "a list", specs))?;
        let mut parsed = Vec::new();
        for value in array {
            if let Some(path) = value.as_str() {
                parsed.push(WheelDataSpec {
                    path: path.to_string(),
                    relative_to: None,
                });
            } else if let Some(inline) = value.as_inline_table() {
                let path = get_str(inline, "path", &entry_field)?.ok_or_else(|| {
                    BackendError::config(format!("{entry_field}: every entry needs a \"path\""))
                })?;
                let relative_to = get_str(inline, "relative-to", &entry_field)?;
                parsed.push(WheelDataSpec {
                    path: path.to_string(),
                    relative_to: relative_to.map(|p| pattern_parts(p).join("/")),
                });
            } else {
                return Err(BackendError::config(format!(
                    "{entry_field}: expected a path string or a {{ path, relative-to }} table"
                ))
                .into());
            }
        }
        result.push((scheme.to_string(), parsed));
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use tempfile::tempdir;
    use toml_edit::DocumentMut;

    fn parse(source: &str) -> Result<BuildConfig> {
        let doc: DocumentMut = source.parse()?;
        BuildConfig::from_table(doc.get("build").and_then(toml_edit::Item::as_table_like))
    }

    #[test]
    fn package_dir_defaults_follow_layout() -> Result<()> {
        let root = tempdir()?;
        let config = parse("")?;
        assert_eq!(config.package_dir(root.path()), "");

        fs::create_dir(root.path().join("src"))?;
        assert_eq!(config.package_dir(root.path()), "src");

        let with_includes = parse("[build]\nincludes = [\"demo/\"]\n")?;
        assert_eq!(with_includes.package_dir(root.path()), "");

        let into_src = parse("[build]\nincludes = [\"src/demo\"]\n")?;
        assert_eq!(into_src.package_dir(root.path()), "src");

        let excluded = parse("[build]\nincludes = [\"src/demo\"]\nexcludes = [\"src/\"]\n")?;
        assert_eq!(excluded.package_dir(root.path()), "");

        let explicit = parse("[build]\npackage-dir = \"lib/\"\n")?;
        assert_eq!(explicit.package_dir(root.path()), "lib");
        Ok(())
    }

    #[test]
    fn defaults_are_applied() -> Result<()> {
        let config = parse("[build]\nrun-setuptools = true\n")?;
        assert_eq!(config.source_includes(), vec!["tests".to_string()]);
        assert!(!config.is_purelib());
        assert_eq!(config.editable_backend, EditableBackend::Editables);
        Ok(())
    }

    #[test]
    fn wheel_data_rejects_unknown_scheme() -> Result<()> {
        let config = parse(
            "[build.wheel-data]\nscripts = [\"bin/*\", { path = \"share/**/*\", relative-to = \"share\" }]\n",
        )?;
        assert_eq!(config.wheel_data.len(), 1);
        assert_eq!(config.wheel_data[0].1[1].relative_to.as_deref(), Some("share"));

        let err = parse("[build.wheel-data]\nlibs = [\"x\"]\n").unwrap_err();
        assert!(err.to_string().contains("Unknown scheme name"));
        Ok(())
    }

    #[test]
    fn invalid_editable_backend_is_config_error() {
        let err = parse("[build]\neditable-backend = \"magic\"\n").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BackendError>(),
            Some(BackendError::Config(_))
        ));
    }
}
