use std::fmt::Write as _;
use std::path::Path;
use std::str::FromStr;

use once_cell::sync::Lazy;
use pep508_rs::{MarkerTree, MarkerValue, Requirement};
use regex::{Captures, Regex};

static VAR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\{(.+?)\}").expect("variable regex is valid"));

/// A validated PEP 508 requirement. The name and specifier keep their
/// declared spelling; the marker is re-serialized in canonical form.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequirementSpec {
    base: String,
    marker: Option<String>,
}

impl RequirementSpec {
    /// Parses and validates a requirement string.
    ///
    /// # Errors
    ///
    /// Returns the parser message when `raw` is not a valid PEP 508 string.
    pub fn parse(raw: &str) -> Result<Self, String> {
        let requirement = Requirement::from_str(raw).map_err(|err| err.to_string())?;
        let (base, _) = split_marker(raw);
        Ok(Self {
            base: base.trim().to_string(),
            marker: requirement.marker.as_ref().map(render_marker),
        })
    }

    #[must_use]
    pub fn marker(&self) -> Option<&str> {
        self.marker.as_deref()
    }

    /// Returns a copy scoped to `extra`, conjoined with any existing marker.
    #[must_use]
    pub fn with_extra(&self, extra: &str) -> Self {
        Self {
            base: self.base.clone(),
            marker: Some(merge_extra_marker(self.marker.as_deref(), extra)),
        }
    }
}

impl std::fmt::Display for RequirementSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.marker {
            // a URL must be followed by whitespace before the marker separator
            Some(marker) if self.base.contains(" @ ") => write!(f, "{} ; {marker}", self.base),
            Some(marker) => write!(f, "{}; {marker}", self.base),
            None => f.write_str(&self.base),
        }
    }
}

/// Conjoins `extra == "<extra>"` with an existing marker, parenthesizing
/// markers that carry a top-level `or`.
pub fn merge_extra_marker(marker: Option<&str>, extra: &str) -> String {
    let clause = format!("extra == \"{extra}\"");
    match marker.map(str::trim).filter(|m| !m.is_empty()) {
        None => clause,
        Some(existing) if has_top_level_or(existing) => format!("({existing}) and {clause}"),
        Some(existing) => format!("{existing} and {clause}"),
    }
}

/// Serializes a marker the way core metadata spells it: values in double
/// quotes, single spaces around operators, nested groups parenthesized.
fn render_marker(tree: &MarkerTree) -> String {
    match tree {
        MarkerTree::Expression(expression) => format!(
            "{} {} {}",
            render_marker_value(&expression.l_value),
            expression.operator,
            render_marker_value(&expression.r_value)
        ),
        MarkerTree::And(items) => render_marker_group(items, " and "),
        MarkerTree::Or(items) => render_marker_group(items, " or "),
    }
}

fn render_marker_group(items: &[MarkerTree], separator: &str) -> String {
    items
        .iter()
        .map(|item| match item {
            MarkerTree::Expression(_) => render_marker(item),
            _ => format!("({})", render_marker(item)),
        })
        .collect::<Vec<_>>()
        .join(separator)
}

fn render_marker_value(value: &MarkerValue) -> String {
    match value {
        MarkerValue::QuotedString(text) => format!("\"{text}\""),
        other => other.to_string(),
    }
}

fn split_marker(raw: &str) -> (&str, Option<&str>) {
    let mut quote: Option<char> = None;
    for (idx, ch) in raw.char_indices() {
        match (quote, ch) {
            (Some(q), c) if c == q => quote = None,
            (None, '"' | '\'') => quote = Some(ch),
            (None, ';') => return (&raw[..idx], Some(&raw[idx + 1..])),
            _ => {}
        }
    }
    (raw, None)
}

fn has_top_level_or(marker: &str) -> bool {
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut word = String::new();
    for ch in marker.chars().chain(std::iter::once(' ')) {
        if let Some(q) = quote {
            if ch == q {
                quote = None;
            }
            continue;
        }
        match ch {
            '"' | '\'' => {
                quote = Some(ch);
                word.clear();
            }
            '(' | ')' | ' ' | '\t' => {
                if depth == 0 && word == "or" {
                    return true;
                }
                word.clear();
                if ch == '(' {
                    depth += 1;
                } else if ch == ')' {
                    depth = depth.saturating_sub(1);
                }
            }
            _ => word.push(ch),
        }
    }
    false
}

/// Expands `${VAR}` references in a dependency line.
///
/// `file:///${PROJECT_ROOT}` becomes the project root URI; other values come
/// from `lookup` and are percent-quoted when the line is a URL. Unknown
/// variables are left untouched.
pub fn expand_vars(line: &str, root: &Path, lookup: impl Fn(&str) -> Option<String>) -> String {
    if !line.contains('$') {
        return line.to_string();
    }
    let is_url = line.contains("://");
    let mut line = line.to_string();
    if let Ok(root_uri) = url::Url::from_file_path(root) {
        line = line.replace("file:///${PROJECT_ROOT}", root_uri.as_str().trim_end_matches('/'));
    }
    VAR_RE
        .replace_all(&line, |caps: &Captures<'_>| match lookup(&caps[1]) {
            Some(value) if is_url => quote(&value),
            Some(value) => value,
            None => caps[0].to_string(),
        })
        .into_owned()
}

fn quote(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'_' | b'.' | b'-' | b'~' | b'/') {
            out.push(char::from(byte));
        } else {
            let _ = write!(out, "%{byte:02X}");
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merges_extra_into_markers() {
        assert_eq!(merge_extra_marker(None, "be"), r#"extra == "be""#);
        assert_eq!(
            merge_extra_marker(Some(r#"python_version < "3.8""#), "be"),
            r#"python_version < "3.8" and extra == "be""#
        );
        assert_eq!(
            merge_extra_marker(
                Some(r#"sys_platform == "win32" or sys_platform == "darwin""#),
                "all"
            ),
            r#"(sys_platform == "win32" or sys_platform == "darwin") and extra == "all""#
        );
    }

    #[test]
    fn nested_or_is_not_top_level() {
        let marker = r#"(os_name == "nt" or os_name == "posix") and python_version > "3""#;
        assert!(!has_top_level_or(marker));
        assert!(has_top_level_or(r#"os_name == "nt" or os_name == "posix""#));
        assert!(!has_top_level_or(r#"platform_release == "or""#));
    }

    #[test]
    fn parses_requirement_and_marker() {
        let req = RequirementSpec::parse(r#"requests>=2.0 ; python_version >= "3.8""#).unwrap();
        assert_eq!(req.marker(), Some(r#"python_version >= "3.8""#));
        assert_eq!(req.to_string(), r#"requests>=2.0; python_version >= "3.8""#);
        assert_eq!(
            req.with_extra("http").to_string(),
            r#"requests>=2.0; python_version >= "3.8" and extra == "http""#
        );
        assert!(RequirementSpec::parse("requests >>> 2").is_err());
    }

    #[test]
    fn markers_are_rendered_with_double_quotes() {
        let req = RequirementSpec::parse("pywin32; sys_platform == 'win32'").unwrap();
        assert_eq!(req.to_string(), r#"pywin32; sys_platform == "win32""#);
        assert_eq!(
            req.with_extra("all").to_string(),
            r#"pywin32; sys_platform == "win32" and extra == "all""#
        );

        let grouped = RequirementSpec::parse(
            "colorama ; (os_name == 'nt' or os_name == 'ce') and python_version >= '3.8'",
        )
        .unwrap();
        assert_eq!(
            grouped.marker(),
            Some(r#"(os_name == "nt" or os_name == "ce") and python_version >= "3.8""#)
        );

        let either = RequirementSpec::parse("demo; os_name == 'nt' or os_name == 'posix'").unwrap();
        assert_eq!(
            either.with_extra("be").to_string(),
            r#"demo; (os_name == "nt" or os_name == "posix") and extra == "be""#
        );
    }

    #[test]
    fn url_requirements_keep_space_before_marker() {
        let req = RequirementSpec::parse("demo @ https://example.com/demo.whl").unwrap();
        assert_eq!(
            req.with_extra("x").to_string(),
            r#"demo @ https://example.com/demo.whl ; extra == "x""#
        );
    }

    #[test]
    fn expands_environment_variables() {
        let root = Path::new("/work/project");
        let lookup = |key: &str| (key == "USER").then(|| "me@home".to_string());
        assert_eq!(expand_vars("demo", root, lookup), "demo");
        assert_eq!(
            expand_vars("demo @ https://${USER}:x@example.com/demo.whl", root, lookup),
            "demo @ https://me%40home:x@example.com/demo.whl"
        );
        assert_eq!(expand_vars("demo-${USER}", root, lookup), "demo-me@home");
        assert_eq!(expand_vars("demo-${MISSING}", root, lookup), "demo-${MISSING}");
        assert_eq!(
            expand_vars("sub @ file:///${PROJECT_ROOT}/sub", root, lookup),
            "sub @ file:///work/project/sub"
        );
    }
}
