use anyhow::Result;
use toml_edit::TableLike;

use crate::toml_util::get_str;
use crate::BackendError;

pub const DEFAULT_WRITE_TEMPLATE: &str = "{}\n";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VersionSource {
    File,
    Scm,
    Call,
}

impl VersionSource {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "file" => Some(Self::File),
            "scm" => Some(Self::Scm),
            "call" => Some(Self::Call),
            _ => None,
        }
    }
}

/// The `[tool.pdm.version]` table, kept close to its on-disk shape.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VersionConfig {
    pub source: Option<String>,
    pub path: Option<String>,
    pub getter: Option<String>,
    pub write_to: Option<String>,
    pub write_template: Option<String>,
    pub tag_regex: Option<String>,
    pub tag_filter: Option<String>,
}

impl VersionConfig {
    /// Returns `None` when the table is absent or empty.
    pub fn from_table(table: Option<&dyn TableLike>) -> Result<Option<Self>> {
        let Some(table) = table else {
            return Ok(None);
        };
        if table.is_empty() {
            return Ok(None);
        }
        let field = |key: &str| format!("tool.pdm.version.{key}");
        let read = |key: &str| -> Result<Option<String>> {
            Ok(get_str(table, key, &field(key))?.map(ToString::to_string))
        };
        Ok(Some(Self {
            source: read("source")?,
            path: read("path")?,
            getter: read("getter")?,
            write_to: read("write_to")?,
            write_template: read("write_template")?,
            tag_regex: read("tag_regex")?,
            tag_filter: read("tag_filter")?,
        }))
    }

    pub fn source(&self) -> Result<&str> {
        self.source.as_deref().ok_or_else(|| {
            BackendError::config("tool.pdm.version.source is required").into()
        })
    }

    pub fn write_template(&self) -> &str {
        self.write_template
            .as_deref()
            .unwrap_or(DEFAULT_WRITE_TEMPLATE)
    }
}
