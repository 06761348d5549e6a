#![warn(clippy::all)]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::must_use_candidate
)]

pub mod build_config;
pub mod error;
pub mod manifest;
pub mod metadata;
pub mod naming;
pub mod packages;
pub mod paths;
pub mod requirements;
mod toml_util;
pub mod version_config;

pub use build_config::{BuildConfig, EditableBackend, WheelDataSpec, WHEEL_SCHEMES};
pub use error::BackendError;
pub use manifest::{PyProject, PYPROJECT};
pub use metadata::{
    normalize_version, render_core_metadata, render_pkg_info, License, LicenseFiles, Person,
    Readme, StandardMetadata,
};
pub use naming::{
    canonicalize_name, import_safe_name, is_valid_name, name_version, normalize_extra,
    safe_version, to_filename,
};
pub use packages::{convert_package_paths, find_packages, is_python_package, PackagePaths};
pub use requirements::{expand_vars, merge_extra_marker, RequirementSpec};
pub use version_config::{VersionConfig, VersionSource};
