use std::collections::BTreeSet;

use anyhow::Result;
use pdmb_domain::paths::glob_relative;
use pdmb_domain::{BackendError, LicenseFiles};

use crate::context::BuildContext;

/// License files to ship, relative to the project root.
///
/// Explicit paths must all exist. Globs that match nothing only warn, and
/// only when they were declared rather than defaulted.
pub(crate) fn find_license_files(ctx: &mut BuildContext) -> Result<Vec<String>> {
    let license_files = ctx.project.metadata()?.license_files.clone();
    match license_files {
        LicenseFiles::Paths(paths) => {
            let missing: Vec<&String> = paths
                .iter()
                .filter(|path| !ctx.root.join(path.as_str()).is_file())
                .collect();
            if !missing.is_empty() {
                return Err(BackendError::validation(
                    "license-files",
                    format!("License files not found: {missing:?}"),
                )
                .into());
            }
            Ok(paths)
        }
        LicenseFiles::Globs { globs, declared } => {
            let mut found = BTreeSet::new();
            for pattern in &globs {
                for path in glob_relative(&ctx.root, pattern)? {
                    if ctx.root.join(&path).is_file() {
                        found.insert(path);
                    }
                }
            }
            if declared && !globs.is_empty() && found.is_empty() {
                ctx.warn(format!(
                    "No license files are matched with glob patterns {globs:?}."
                ));
            }
            Ok(found.into_iter().collect())
        }
    }
}
