use std::fs::{self, File};
use std::io;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;
use sha2::{Digest, Sha256};

/// Size and digest of a produced artifact.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ArtifactSummary {
    pub path: String,
    pub bytes: u64,
    pub sha256: String,
}

pub fn summarize_artifact(path: &Path) -> Result<ArtifactSummary> {
    let bytes = fs::metadata(path)
        .with_context(|| format!("failed to stat {}", path.display()))?
        .len();
    Ok(ArtifactSummary {
        path: path.display().to_string(),
        bytes,
        sha256: compute_file_sha256(path)?,
    })
}

pub(crate) fn compute_file_sha256(path: &Path) -> Result<String> {
    let mut file =
        File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn summary_reports_size_and_hex_digest() -> Result<()> {
        let temp = tempdir()?;
        let path = temp.path().join("demo-0.1.0.tar.gz");
        fs::write(&path, b"abc")?;
        let summary = summarize_artifact(&path)?;
        assert_eq!(summary.bytes, 3);
        assert_eq!(
            summary.sha256,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert!(summary.path.ends_with("demo-0.1.0.tar.gz"));
        Ok(())
    }
}
