use std::collections::BTreeSet;
use std::fmt::Write as _;

use anyhow::Result;

use super::{License, Person, StandardMetadata};
use crate::naming::normalize_extra;
use crate::BackendError;

/// Accumulates `Key: value` lines, skipping empty values and folding
/// multi-line ones under the key.
#[derive(Default)]
struct Headers {
    out: String,
}

impl Headers {
    fn set(&mut self, name: &str, value: &str) {
        if value.is_empty() {
            return;
        }
        let indent = format!("\n{}", " ".repeat(name.len() + 2));
        let _ = writeln!(self.out, "{name}: {}", value.replace('\n', &indent));
    }

    fn finish(mut self, body: Option<&str>) -> String {
        self.out.push('\n');
        if let Some(body) = body {
            self.out.push_str(body);
        }
        self.out
    }
}

/// Renders the `METADATA` file shipped in wheels.
///
/// `license_files` are the resolved paths relative to the project root;
/// they are listed only for metadata 2.4.
pub fn render_core_metadata(meta: &StandardMetadata, license_files: &[String]) -> Result<String> {
    let version = meta.require_version()?;
    let metadata_version = meta.metadata_version();
    let mut headers = Headers::default();
    headers.set("Metadata-Version", metadata_version);
    headers.set("Name", &meta.name);
    headers.set("Version", version);
    headers.set("Summary", meta.description.as_deref().unwrap_or_default());
    headers.set("Keywords", &meta.keywords.join(","));
    headers.set("Home-page", meta.urls.get("homepage").map_or("", String::as_str));
    headers.set("Author", &name_list(&meta.authors));
    headers.set("Author-Email", &email_list(&meta.authors));
    headers.set("Maintainer", &name_list(&meta.maintainers));
    headers.set("Maintainer-Email", &email_list(&meta.maintainers));
    match &meta.license {
        Some(License::Text { text, .. }) => headers.set("License", text),
        Some(License::Expression(expression)) => headers.set("License-Expression", expression),
        None => {}
    }
    if metadata_version == "2.4" {
        for file in license_files.iter().collect::<BTreeSet<_>>() {
            headers.set("License-File", file);
        }
    }
    for classifier in &meta.classifiers {
        headers.set("Classifier", classifier);
    }
    for (label, url) in &meta.urls {
        headers.set("Project-URL", &format!("{}, {url}", capitalize(label)));
    }
    headers.set("Requires-Python", meta.requires_python.as_deref().unwrap_or_default());
    for dependency in &meta.dependencies {
        headers.set("Requires-Dist", &dependency.to_string());
    }
    for (extra, requirements) in &meta.optional_dependencies {
        let extra = normalize_extra(extra);
        headers.set("Provides-Extra", &extra);
        for requirement in requirements {
            headers.set("Requires-Dist", &requirement.with_extra(&extra).to_string());
        }
    }
    if let Some(readme) = &meta.readme {
        headers.set("Description-Content-Type", &readme.content_type);
    }
    if metadata_version != "2.1" {
        for field in &meta.dynamic {
            if matches!(field.as_str(), "name" | "version") {
                return Err(BackendError::validation(
                    format!("Field cannot be dynamic: {field}"),
                    "project.dynamic",
                )
                .into());
            }
            headers.set("Dynamic", field);
        }
    }
    Ok(headers.finish(meta.readme.as_ref().map(|r| r.text.as_str())))
}

/// Renders the shorter `PKG-INFO` summary embedded in source distributions.
pub fn render_pkg_info(meta: &StandardMetadata) -> String {
    let mut headers = Headers::default();
    headers.set("Metadata-Version", "2.1");
    headers.set("Name", &meta.name);
    headers.set("Version", meta.version.as_deref().unwrap_or("0.0.0"));
    headers.set("Summary", meta.description.as_deref().unwrap_or_default());
    match &meta.license {
        Some(License::Text { text, .. } | License::Expression(text)) => headers.set("License", text),
        None => {}
    }
    headers.set("Keywords", &meta.keywords.join(","));
    headers.set("Author", &name_list(&meta.authors));
    headers.set("Author-email", &email_list(&meta.authors));
    headers.set("Maintainer", &name_list(&meta.maintainers));
    headers.set("Maintainer-email", &email_list(&meta.maintainers));
    headers.set("Requires-Python", meta.requires_python.as_deref().unwrap_or_default());
    for classifier in &meta.classifiers {
        headers.set("Classifier", classifier);
    }
    let extras: BTreeSet<String> = meta.optional_dependencies.keys().map(|e| normalize_extra(e)).collect();
    for extra in &extras {
        headers.set("Provides-Extra", extra);
    }
    for (label, url) in &meta.urls {
        headers.set("Project-URL", &format!("{label}, {url}"));
    }
    match &meta.readme {
        Some(readme) => {
            headers.set("Description-Content-Type", &readme.content_type);
            headers.finish(Some(&format!("{}\n", readme.text)))
        }
        None => headers.finish(None),
    }
}

fn name_list(people: &[Person]) -> String {
    people
        .iter()
        .filter(|person| person.email.is_none())
        .filter_map(|person| person.name.as_deref())
        .collect::<Vec<_>>()
        .join(", ")
}

fn email_list(people: &[Person]) -> String {
    people
        .iter()
        .filter_map(|person| {
            let email = person.email.as_deref()?;
            Some(match person.name.as_deref() {
                Some(name) if !name.is_empty() => format_address(name, email),
                _ => email.to_string(),
            })
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// `Name <email>`, quoting the name when it holds address specials.
fn format_address(name: &str, email: &str) -> String {
    const SPECIALS: &[char] = &['(', ')', '<', '>', '[', ']', ':', ';', '@', '\\', ',', '.', '"'];
    if name.contains(SPECIALS) {
        let escaped = name.replace('\\', "\\\\").replace('"', "\\\"");
        format!("\"{escaped}\" <{email}>")
    } else {
        format!("{name} <{email}>")
    }
}

fn capitalize(label: &str) -> String {
    let mut chars = label.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}
