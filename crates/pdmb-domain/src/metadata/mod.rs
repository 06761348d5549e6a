//! Validated `[project]` metadata.

mod render;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use pep440_rs::{Version, VersionSpecifiers};
use regex::Regex;
use toml_edit::{Item, TableLike, Value};

use crate::naming::is_valid_name;
use crate::requirements::RequirementSpec;
use crate::toml_util::{get_str, get_str_list, get_str_map, invalid_type};
use crate::BackendError;

pub use render::{render_core_metadata, render_pkg_info};

pub const DEFAULT_LICENSE_GLOBS: [&str; 5] =
    ["LICENSES/*", "LICEN[CS]E*", "COPYING*", "NOTICE*", "AUTHORS*"];

static ENTRY_POINT_GROUP_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\w+(\.\w+)*$").expect("entry point group regex is valid"));

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum License {
    /// An SPDX license expression.
    Expression(String),
    Text { text: String, file: Option<PathBuf> },
}

/// Where license files are looked up, in the form they were declared.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LicenseFiles {
    Paths(Vec<String>),
    Globs { globs: Vec<String>, declared: bool },
}

impl LicenseFiles {
    fn default_globs() -> Self {
        Self::Globs {
            globs: DEFAULT_LICENSE_GLOBS.iter().map(ToString::to_string).collect(),
            declared: false,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Readme {
    pub text: String,
    /// Path relative to the project root.
    pub file: Option<String>,
    pub content_type: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Person {
    pub name: Option<String>,
    pub email: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StandardMetadata {
    pub name: String,
    pub version: Option<String>,
    pub description: Option<String>,
    pub license: Option<License>,
    pub license_files: LicenseFiles,
    /// Whether `license-files` was spelled out in the manifest.
    pub license_files_declared: bool,
    pub readme: Option<Readme>,
    pub requires_python: Option<String>,
    pub dependencies: Vec<RequirementSpec>,
    pub optional_dependencies: BTreeMap<String, Vec<RequirementSpec>>,
    pub entry_points: BTreeMap<String, BTreeMap<String, String>>,
    pub authors: Vec<Person>,
    pub maintainers: Vec<Person>,
    pub urls: BTreeMap<String, String>,
    pub classifiers: Vec<String>,
    pub keywords: Vec<String>,
    pub dynamic: Vec<String>,
}

impl StandardMetadata {
    /// Validates the `[project]` table found in `doc`.
    pub fn from_pyproject(doc: &toml_edit::DocumentMut, root: &Path) -> Result<Self> {
        let project = doc
            .get("project")
            .and_then(Item::as_table_like)
            .ok_or_else(|| {
                BackendError::validation("Section \"project\" missing in pyproject.toml", "project")
            })?;

        let dynamic = get_str_list(project, "dynamic", "project.dynamic")?.unwrap_or_default();
        if dynamic.iter().any(|field| field == "name") {
            return Err(fail("Unsupported field \"name\" in \"project.dynamic\"", "project.dynamic"));
        }
        if let Some(field) = dynamic.iter().find(|field| project.contains_key(field.as_str())) {
            return Err(fail(
                format!("Field \"project.{field}\" declared as dynamic in \"project.dynamic\" but is defined"),
                &format!("project.{field}"),
            ));
        }

        let name = get_str(project, "name", "project.name")?
            .filter(|name| !name.is_empty())
            .ok_or_else(|| fail("Field \"project.name\" missing", "project.name"))?;
        if !is_valid_name(name) {
            return Err(fail(
                format!(
                    "Invalid project name \"{name}\". A valid name consists only of ASCII letters and \
                     numbers, period, underscore and hyphen. It must start and end with a letter or number"
                ),
                "project.name",
            ));
        }

        let version = match get_str(project, "version", "project.version")? {
            Some(raw) => Some(normalize_version(raw)?),
            None if dynamic.iter().any(|field| field == "version") => None,
            None => {
                return Err(fail(
                    "Field \"project.version\" missing and \"version\" not specified in \"project.dynamic\"",
                    "project.version",
                ))
            }
        };

        let requires_python = get_str(project, "requires-python", "project.requires-python")?
            .map(|raw| {
                VersionSpecifiers::from_str(raw).map_err(|err| {
                    fail(
                        format!("Invalid \"project.requires-python\" value \"{raw}\" ({err})"),
                        "project.requires-python",
                    )
                })?;
                Ok::<_, anyhow::Error>(raw.to_string())
            })
            .transpose()?;

        let license = parse_license(project, root)?;
        let classifiers = get_str_list(project, "classifiers", "project.classifiers")?.unwrap_or_default();
        if matches!(license, Some(License::Expression(_)))
            && classifiers.iter().any(|c| c.starts_with("License ::"))
        {
            return Err(fail(
                "Setting \"project.license\" to an SPDX license expression is not compatible with \"License ::\" classifiers",
                "project.license",
            ));
        }
        let (license_files, license_files_declared) = parse_license_files(project, license.as_ref())?;

        Ok(Self {
            name: name.to_string(),
            version,
            description: get_str(project, "description", "project.description")?.map(ToString::to_string),
            license,
            license_files,
            license_files_declared,
            readme: parse_readme(project, root)?,
            requires_python,
            dependencies: parse_dependencies(project)?,
            optional_dependencies: parse_optional_dependencies(project)?,
            entry_points: parse_entry_points(project)?,
            authors: parse_people(project, "authors")?,
            maintainers: parse_people(project, "maintainers")?,
            urls: get_str_map(project, "urls", "project.urls")?.into_iter().collect(),
            classifiers,
            keywords: get_str_list(project, "keywords", "project.keywords")?.unwrap_or_default(),
            dynamic,
        })
    }

    pub fn metadata_version(&self) -> &'static str {
        if matches!(self.license, Some(License::Expression(_))) || self.license_files_declared {
            "2.4"
        } else if !self.dynamic.is_empty() {
            "2.2"
        } else {
            "2.1"
        }
    }

    /// The version, which must be resolved by the time artifacts are written.
    pub fn require_version(&self) -> Result<&str> {
        self.version
            .as_deref()
            .ok_or_else(|| BackendError::validation("Missing version field", "project.version").into())
    }
}

/// Normalizes a version string, rejecting anything that is not PEP 440.
pub fn normalize_version(raw: &str) -> Result<String> {
    Version::from_str(raw)
        .map(|version| version.to_string())
        .map_err(|err| fail(format!("Invalid version \"{raw}\" ({err})"), "project.version"))
}

fn fail(summary: impl Into<String>, field: &str) -> anyhow::Error {
    BackendError::validation(summary, field.to_string()).into()
}

fn parse_license(project: &dyn TableLike, root: &Path) -> Result<Option<License>> {
    let Some(item) = project.get("license") else {
        return Ok(None);
    };
    if let Some(expression) = item.as_str() {
        return Ok(Some(License::Expression(expression.to_string())));
    }
    let table = item.as_table_like().ok_or_else(|| {
        invalid_type("project.license", "a string or dictionary of strings", item)
    })?;
    if let Some((key, _)) = table.iter().find(|(key, _)| !matches!(*key, "file" | "text")) {
        return Err(fail(
            format!("Unexpected field \"project.license.{key}\""),
            &format!("project.license.{key}"),
        ));
    }
    let file = get_str(table, "file", "project.license.file")?;
    let text = get_str(table, "text", "project.license.text")?;
    match (file, text) {
        (Some(file), None) => {
            let path = root.join(file);
            if !path.is_file() {
                return Err(fail(
                    format!("License file not found (\"{file}\")"),
                    "project.license.file",
                ));
            }
            let text = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            Ok(Some(License::Text {
                text,
                file: Some(PathBuf::from(file)),
            }))
        }
        (None, Some(text)) => Ok(Some(License::Text {
            text: text.to_string(),
            file: None,
        })),
        _ => Err(fail(
            format!(
                "Invalid \"project.license\" value, expecting either \"file\" or \"text\" (got \"{}\")",
                item.to_string().trim()
            ),
            "project.license",
        )),
    }
}

fn parse_license_files(
    project: &dyn TableLike,
    license: Option<&License>,
) -> Result<(LicenseFiles, bool)> {
    let license_file = match license {
        Some(License::Text { file: Some(file), .. }) => Some(file.to_string_lossy().replace('\\', "/")),
        _ => None,
    };
    let Some(item) = project.get("license-files") else {
        return Ok(match license_file {
            Some(file) => (LicenseFiles::Paths(vec![file]), false),
            None => (LicenseFiles::default_globs(), false),
        });
    };
    if matches!(license, Some(License::Text { .. })) {
        return Err(fail(
            "\"project.license-files\" must not be used when \"project.license\" is not a SPDX license expression",
            "license-files",
        ));
    }
    let files = if item.as_array().is_some() {
        let globs = get_str_list(project, "license-files", "project.license-files")?.unwrap_or_default();
        LicenseFiles::Globs { globs, declared: true }
    } else if let Some(table) = item.as_table_like() {
        let paths = get_str_list(table, "paths", "project.license-files.paths")?;
        let globs = get_str_list(table, "globs", "project.license-files.globs")?;
        match (paths, globs) {
            (Some(_), Some(_)) => return Err(fail("Can't specify both 'paths' and 'globs'", "license-files")),
            (Some(paths), None) => LicenseFiles::Paths(paths),
            (None, Some(globs)) => LicenseFiles::Globs { globs, declared: true },
            (None, None) => return Err(fail("Must specify 'paths' or 'globs'", "license-files")),
        }
    } else {
        return Err(invalid_type("project.license-files", "a list of strings", item));
    };
    if let LicenseFiles::Globs { globs, .. } = &files {
        if let Some(glob) = globs.iter().find(|g| g.starts_with("..") || g.starts_with('/')) {
            return Err(fail(
                format!(
                    "\"{glob}\" is an invalid \"project.license-files\" glob: the pattern must match files within the project directory"
                ),
                "license-files",
            ));
        }
    }
    Ok((files, true))
}

fn parse_readme(project: &dyn TableLike, root: &Path) -> Result<Option<Readme>> {
    let Some(item) = project.get("readme") else {
        return Ok(None);
    };
    let (file, text, content_type) = if let Some(file) = item.as_str() {
        let content_type = if file.ends_with(".md") {
            "text/markdown"
        } else if file.ends_with(".rst") {
            "text/x-rst"
        } else {
            return Err(fail(
                format!("Could not infer content type for readme file \"{file}\""),
                "project.readme",
            ));
        };
        (Some(file), None, content_type.to_string())
    } else if let Some(table) = item.as_table_like() {
        if let Some((key, _)) = table
            .iter()
            .find(|(key, _)| !matches!(*key, "content-type" | "file" | "text"))
        {
            return Err(fail(
                format!("Unexpected field \"project.readme.{key}\""),
                &format!("project.readme.{key}"),
            ));
        }
        let file = get_str(table, "file", "project.readme.file")?;
        let text = get_str(table, "text", "project.readme.text")?;
        if file.is_some() == text.is_some() {
            return Err(fail(
                format!(
                    "Invalid \"project.readme\" value, expecting either \"file\" or \"text\" (got \"{}\")",
                    item.to_string().trim()
                ),
                "project.readme",
            ));
        }
        let content_type = get_str(table, "content-type", "project.readme.content-type")?
            .filter(|value| !value.is_empty())
            .ok_or_else(|| fail("Field \"project.readme.content-type\" missing", "project.readme.content-type"))?;
        (file, text, content_type.to_string())
    } else {
        return Err(invalid_type(
            "project.readme",
            "either, a string or dictionary of strings",
            item,
        ));
    };

    let text = match (file, text) {
        (Some(file), _) => {
            let path = root.join(file);
            if !path.is_file() {
                return Err(fail(
                    format!("Readme file not found (\"{file}\")"),
                    "project.readme.file",
                ));
            }
            std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read {}", path.display()))?
        }
        (None, Some(text)) => text.to_string(),
        (None, None) => String::new(),
    };
    Ok(Some(Readme {
        text,
        file: file.map(|f| f.replace('\\', "/")),
        content_type,
    }))
}

fn parse_requirement(raw: &str, field: &str) -> Result<RequirementSpec> {
    RequirementSpec::parse(raw).map_err(|err| {
        fail(
            format!("Field \"{field}\" contains an invalid PEP 508 requirement string \"{raw}\" (\"{err}\")"),
            field,
        )
    })
}

fn parse_dependencies(project: &dyn TableLike) -> Result<Vec<RequirementSpec>> {
    get_str_list(project, "dependencies", "project.dependencies")?
        .unwrap_or_default()
        .iter()
        .map(|raw| parse_requirement(raw, "project.dependencies"))
        .collect()
}

fn parse_optional_dependencies(project: &dyn TableLike) -> Result<BTreeMap<String, Vec<RequirementSpec>>> {
    let Some(item) = project.get("optional-dependencies") else {
        return Ok(BTreeMap::new());
    };
    let groups = item.as_table_like().ok_or_else(|| {
        invalid_type(
            "project.optional-dependencies",
            "a dictionary of PEP 508 requirement strings",
            item,
        )
    })?;
    let mut result = BTreeMap::new();
    for (extra, _) in groups.iter() {
        let field = format!("project.optional-dependencies.{extra}");
        let requirements = get_str_list(groups, extra, &field)?
            .unwrap_or_default()
            .iter()
            .map(|raw| parse_requirement(raw, &field))
            .collect::<Result<Vec<_>>>()?;
        result.insert(extra.to_string(), requirements);
    }
    Ok(result)
}

fn parse_entry_points(project: &dyn TableLike) -> Result<BTreeMap<String, BTreeMap<String, String>>> {
    let mut result = BTreeMap::new();
    if let Some(item) = project.get("entry-points") {
        let sections = item.as_table_like().ok_or_else(|| {
            invalid_type("project.entry-points", "a dictionary of entrypoint sections", item)
        })?;
        for (section, _) in sections.iter() {
            if !ENTRY_POINT_GROUP_RE.is_match(section) {
                return Err(fail(
                    format!(
                        "Field \"project.entry-points\" has an invalid value, expecting a name \
                         containing only alphanumeric, underscore, or dot characters (got \"{section}\")"
                    ),
                    "project.entry-points",
                ));
            }
            if matches!(section, "console_scripts" | "gui_scripts") {
                let table = if section == "console_scripts" { "scripts" } else { "gui-scripts" };
                return Err(fail(
                    format!("Field \"project.entry-points.{section}\" is not allowed, use \"project.{table}\" instead"),
                    "project.entry-points",
                ));
            }
            let field = format!("project.entry-points.{section}");
            let entries = get_str_map(sections, section, &field)?;
            result.insert(section.to_string(), entries.into_iter().collect());
        }
    }
    for (key, group) in [("scripts", "console_scripts"), ("gui-scripts", "gui_scripts")] {
        let entries = get_str_map(project, key, &format!("project.{key}"))?;
        if !entries.is_empty() {
            result.insert(group.to_string(), entries.into_iter().collect());
        }
    }
    Ok(result)
}

fn parse_people(project: &dyn TableLike, key: &str) -> Result<Vec<Person>> {
    let field = format!("project.{key}");
    let Some(item) = project.get(key) else {
        return Ok(Vec::new());
    };
    let invalid = || {
        invalid_type(
            &field,
            "a list of dictionaries containing the \"name\" and/or \"email\" keys",
            item,
        )
    };
    let tables: Vec<&dyn TableLike> = if let Some(array) = item.as_array() {
        array
            .iter()
            .map(Value::as_inline_table)
            .map(|table| table.map(|t| t as &dyn TableLike))
            .collect::<Option<Vec<_>>>()
            .ok_or_else(invalid)?
    } else if let Some(array) = item.as_array_of_tables() {
        array.iter().map(|t| t as &dyn TableLike).collect()
    } else {
        return Err(invalid());
    };
    let mut people = Vec::with_capacity(tables.len());
    for table in tables {
        if table.iter().any(|(key, value)| !matches!(key, "name" | "email") || value.as_str().is_none()) {
            return Err(invalid());
        }
        people.push(Person {
            name: get_str(table, "name", &field)?.map(ToString::to_string),
            email: get_str(table, "email", &field)?.map(ToString::to_string),
        });
    }
    Ok(people)
}
