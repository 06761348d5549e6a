#![allow(dead_code)]

use std::{
    fs::{self, File},
    io::{self, Read},
    path::{Path, PathBuf},
};

use assert_cmd::assert::Assert;
use flate2::read::GzDecoder;
use serde_json::Value;
use tempfile::TempDir;

pub fn workspace_root() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .and_then(|p| p.parent())
        .expect("workspace root")
        .to_path_buf()
}

pub fn fixture_source(name: &str) -> PathBuf {
    workspace_root().join("fixtures").join("projects").join(name)
}

/// Copies a fixture project into a fresh temp dir so builds never touch
/// the checked-in tree.
pub fn prepare_fixture(name: &str) -> (TempDir, PathBuf) {
    let temp = tempfile::Builder::new()
        .prefix(name)
        .tempdir()
        .expect("tempdir");
    let dst = temp.path().join(name);
    copy_dir_all(&fixture_source(name), &dst).expect("copy fixture");
    (temp, dst)
}

fn copy_dir_all(src: &Path, dst: &Path) -> io::Result<()> {
    fs::create_dir_all(dst)?;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let src_path = entry.path();
        let dst_path = dst.join(entry.file_name());
        if src_path.is_dir() {
            copy_dir_all(&src_path, &dst_path)?;
        } else {
            fs::copy(&src_path, &dst_path)?;
        }
    }
    Ok(())
}

pub fn parse_json(assert: &Assert) -> Value {
    serde_json::from_slice(&assert.get_output().stdout).expect("valid json")
}

/// Entry names in archive order.
pub fn wheel_entries(path: &Path) -> Vec<String> {
    let mut archive = zip::ZipArchive::new(File::open(path).expect("open wheel")).expect("zip");
    (0..archive.len())
        .map(|index| archive.by_index(index).expect("entry").name().to_string())
        .collect()
}

pub fn wheel_text(path: &Path, name: &str) -> String {
    let mut archive = zip::ZipArchive::new(File::open(path).expect("open wheel")).expect("zip");
    let mut body = String::new();
    archive
        .by_name(name)
        .expect("entry present")
        .read_to_string(&mut body)
        .expect("utf-8 entry");
    body
}

pub fn sdist_entries(path: &Path) -> Vec<String> {
    let mut archive = tar::Archive::new(GzDecoder::new(File::open(path).expect("open sdist")));
    archive
        .entries()
        .expect("entries")
        .map(|entry| {
            entry
                .expect("entry")
                .path()
                .expect("path")
                .to_string_lossy()
                .into_owned()
        })
        .collect()
}
