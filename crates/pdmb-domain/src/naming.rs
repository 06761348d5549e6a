use std::str::FromStr;

use once_cell::sync::Lazy;
use pep440_rs::Version;
use regex::Regex;

static NAME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^([A-Z0-9]|[A-Z0-9][A-Z0-9._-]*[A-Z0-9])$").expect("name regex is valid")
});
static SEPARATORS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[-_.]+").expect("separator regex is valid"));
static UNSAFE_VERSION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^A-Za-z0-9.]+").expect("version regex is valid"));

/// Whether `name` is a valid distribution name.
pub fn is_valid_name(name: &str) -> bool {
    NAME_RE.is_match(name)
}

/// Normalizes a distribution name (`Foo_Bar.baz` -> `foo-bar-baz`).
pub fn canonicalize_name(name: &str) -> String {
    SEPARATORS_RE.replace_all(name, "-").to_lowercase()
}

/// Normalized form of an extra name as written to `Provides-Extra`.
pub fn normalize_extra(extra: &str) -> String {
    extra.replace(['.', '_'], "-").to_lowercase()
}

/// Name variant that is also a valid import name (`foo-bar` -> `foo_bar`).
pub fn import_safe_name(name: &str) -> String {
    SEPARATORS_RE.replace_all(name, "_").to_lowercase()
}

/// Normalizes a version, falling back to a filename-safe spelling for
/// strings that are not valid versions.
pub fn safe_version(version: &str) -> String {
    match Version::from_str(version) {
        Ok(parsed) => parsed.to_string(),
        Err(_) => {
            let version = version.replace(' ', ".");
            UNSAFE_VERSION_RE.replace_all(&version, "-").into_owned()
        }
    }
}

/// Escapes a name or version for use inside an artifact filename.
pub fn to_filename(name: &str) -> String {
    name.replace('-', "_")
}

/// `{name}-{version}` as used by wheel filenames and the dist-info directory.
pub fn name_version(name: &str, version: &str) -> String {
    format!(
        "{}-{}",
        to_filename(&canonicalize_name(name)),
        to_filename(&safe_version(version))
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validates_names() {
        assert!(is_valid_name("demo-package"));
        assert!(is_valid_name("a"));
        assert!(is_valid_name("Demo.Pkg_2"));
        assert!(!is_valid_name("-demo"));
        assert!(!is_valid_name("demo_"));
        assert!(!is_valid_name("de mo"));
    }

    #[test]
    fn canonicalizes_names() {
        assert_eq!(canonicalize_name("Demo_Package.Extra"), "demo-package-extra");
        assert_eq!(canonicalize_name("a--b__c"), "a-b-c");
        assert_eq!(import_safe_name("Demo-Package.x"), "demo_package_x");
        assert_eq!(normalize_extra("Socks_Proxy.v2"), "socks-proxy-v2");
    }

    #[test]
    fn safe_version_normalizes_or_escapes() {
        assert_eq!(safe_version("1.0.0"), "1.0.0");
        assert_eq!(safe_version("1.0-rc1"), "1.0rc1");
        assert_eq!(safe_version("not a version!"), "not.a.version-");
    }

    #[test]
    fn name_version_escapes_dashes() {
        assert_eq!(name_version("demo-package", "0.1.0"), "demo_package-0.1.0");
    }
}
