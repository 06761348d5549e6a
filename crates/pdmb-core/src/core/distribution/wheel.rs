use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{bail, Context, Result};
use once_cell::sync::Lazy;
use pdmb_domain::paths::{normalize_relative, walk_files};
use pdmb_domain::{name_version, render_core_metadata, BackendError};
use pep440_rs::{Version, VersionSpecifiers};
use regex::Regex;
use tempfile::NamedTempFile;
use zip::{write::FileOptions, CompressionMethod, ZipWriter};

use super::archive::{normalize_file_permissions, render_record, zip_timestamp, RecordEntry};
use super::licenses::find_license_files;
use crate::collect::files::{FileMap, FileSource};
use crate::context::BuildContext;
use crate::PDMB_VERSION;

static BUILD_NUMBER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d[\w.]*$").expect("build number regex is valid"));

/// `{name}-{version}` of the project as it currently stands.
pub(crate) fn project_name_version(ctx: &BuildContext) -> Result<String> {
    let meta = ctx.project.metadata()?;
    Ok(name_version(&meta.name, meta.require_version()?))
}

fn setting<'a>(ctx: &'a BuildContext, name: &str) -> Option<&'a str> {
    ctx.config_settings
        .option(name)
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

/// The `{python}-{abi}-{platform}` compatibility tag.
pub(crate) fn wheel_tag(ctx: &BuildContext) -> Result<String> {
    let python_tag = setting(ctx, "--python-tag");
    let limited_api = setting(ctx, "--py-limited-api");
    let plat_name = setting(ctx, "--plat-name");

    if ctx.project.build_config().is_purelib() {
        let platform = plat_name.unwrap_or("any");
        let python = match python_tag {
            Some(tag) => tag.to_string(),
            None => {
                let requires_python = ctx.project.metadata()?.requires_python.as_deref();
                if accepts_python2(requires_python)? {
                    "py2.py3".to_string()
                } else {
                    "py3".to_string()
                }
            }
        };
        return Ok(format!("{python}-none-{}", normalize_platform(platform)));
    }

    let tags = ctx.python.tags()?;
    if !tags.knows_supported_tags() {
        tracing::warn!(
            interpreter = %tags.interpreter,
            "packaging is not importable by the interpreter, checking the wheel tag against its own ABI only"
        );
    }
    let platform = normalize_platform(plat_name.unwrap_or(&tags.platform));
    let (python, abi) = match limited_api {
        Some(limited) if tags.is_cpython && tags.major == 3 => {
            (python_tag.unwrap_or(limited).to_string(), "abi3".to_string())
        }
        _ => (
            python_tag.unwrap_or(&tags.interpreter).to_string(),
            tags.abi.clone(),
        ),
    };
    if !tags.supports(&python, &abi) {
        return Err(BackendError::config(format!(
            "would build wheel with unsupported tag ('{python}', '{abi}', '{platform}')"
        ))
        .into());
    }
    Ok(format!("{python}-{abi}-{platform}"))
}

fn normalize_platform(platform: &str) -> String {
    platform.to_lowercase().replace(['-', '.'], "_")
}

fn accepts_python2(requires_python: Option<&str>) -> Result<bool> {
    let Some(spec) = requires_python.map(str::trim).filter(|spec| !spec.is_empty()) else {
        return Ok(true);
    };
    let specifiers = VersionSpecifiers::from_str(spec).map_err(|err| {
        BackendError::validation("Invalid requires-python", format!("{spec:?}: {err}"))
    })?;
    let python2 = Version::from_str("2.7").map_err(|err| anyhow::anyhow!("{err}"))?;
    Ok(specifiers.contains(&python2))
}

/// The optional `--build-number` segment of the wheel name.
pub(crate) fn build_number(ctx: &BuildContext) -> Result<Option<String>> {
    match setting(ctx, "--build-number") {
        None => Ok(None),
        Some(number) if BUILD_NUMBER_RE.is_match(number) => Ok(Some(number.to_string())),
        Some(number) => Err(BackendError::config(format!(
            "Invalid build number {number:?}, it must start with a digit"
        ))
        .into()),
    }
}

pub(crate) fn wheel_filename(ctx: &BuildContext) -> Result<String> {
    let name_version = project_name_version(ctx)?;
    let tag = wheel_tag(ctx)?;
    Ok(match build_number(ctx)? {
        Some(build) => format!("{name_version}-{build}-{tag}.whl"),
        None => format!("{name_version}-{tag}.whl"),
    })
}

fn render_wheel_file(ctx: &BuildContext) -> Result<String> {
    let mut body = format!(
        "Wheel-Version: 1.0\nGenerator: pdmb ({PDMB_VERSION})\nRoot-Is-Purelib: {}\nTag: {}\n",
        ctx.project.build_config().is_purelib(),
        wheel_tag(ctx)?
    );
    if let Some(build) = build_number(ctx)? {
        body.push_str(&format!("Build: {build}\n"));
    }
    Ok(body)
}

fn render_entry_points(entry_points: &BTreeMap<String, BTreeMap<String, String>>) -> String {
    let mut body = String::new();
    for (group, entries) in entry_points {
        body.push_str(&format!("[{group}]\n"));
        for (name, value) in entries {
            body.push_str(&format!("{name} = {value}\n"));
        }
        body.push('\n');
    }
    body
}

/// The `.dist-info` contents keyed by their path inside the wheel.
pub(crate) fn dist_info_files(ctx: &mut BuildContext) -> Result<FileMap> {
    let license_files = find_license_files(ctx)?;
    let dist_info = format!("{}.dist-info", project_name_version(ctx)?);
    let meta = ctx.project.metadata()?;

    let mut files = FileMap::new();
    if !meta.entry_points.is_empty() {
        files.insert(
            format!("{dist_info}/entry_points.txt"),
            FileSource::Bytes(render_entry_points(&meta.entry_points).into_bytes()),
        );
    }
    files.insert(
        format!("{dist_info}/WHEEL"),
        FileSource::Bytes(render_wheel_file(ctx)?.into_bytes()),
    );
    files.insert(
        format!("{dist_info}/METADATA"),
        FileSource::Bytes(render_core_metadata(meta, &license_files)?.into_bytes()),
    );
    for license in license_files {
        let source = FileSource::Path(ctx.root.join(&license));
        files.insert(format!("{dist_info}/licenses/{license}"), source);
    }
    Ok(files)
}

/// Writes the `.dist-info` directory under `parent` and returns its name.
pub(crate) fn write_dist_info(ctx: &mut BuildContext, parent: &Path) -> Result<String> {
    let files = dist_info_files(ctx)?;
    for (relpath, source) in &files {
        let target = parent.join(relpath);
        if let Some(dir) = target.parent() {
            fs::create_dir_all(dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }
        fs::write(&target, source.read()?)
            .with_context(|| format!("failed to write {}", target.display()))?;
    }
    Ok(format!("{}.dist-info", project_name_version(ctx)?))
}

fn prepared_metadata_files(dir: &Path) -> Result<FileMap> {
    let name = dir
        .file_name()
        .and_then(|name| name.to_str())
        .with_context(|| format!("invalid metadata directory {}", dir.display()))?;
    let mut files = FileMap::new();
    for file in walk_files(dir)? {
        let relative = normalize_relative(file.strip_prefix(dir).unwrap_or(&file));
        files.insert(format!("{name}/{relative}"), FileSource::Path(file));
    }
    Ok(files)
}

/// Files placed into the `.data` directory's install schemes.
fn wheel_data_files(ctx: &BuildContext, name_version: &str) -> Result<FileMap> {
    let mut files = FileMap::new();
    for (scheme, specs) in &ctx.project.build_config().wheel_data {
        for spec in specs {
            let (base, matches) = ctx.expand_paths(&spec.path)?;
            let anchor = spec.relative_to.as_ref().map(|dir| base.join(dir));
            for child in matches {
                let entries: Vec<(PathBuf, PathBuf)> = if child.is_dir() {
                    let parent = child.parent().unwrap_or(&base).to_path_buf();
                    let relative_base = anchor.clone().unwrap_or(parent);
                    walk_files(&child)?
                        .into_iter()
                        .map(|file| (relative_base.clone(), file))
                        .collect()
                } else {
                    let relative_base = anchor
                        .clone()
                        .or_else(|| child.parent().map(Path::to_path_buf))
                        .unwrap_or_else(|| base.clone());
                    vec![(relative_base, child)]
                };
                for (relative_base, file) in entries {
                    let relative = file.strip_prefix(&relative_base).map_err(|_| {
                        BackendError::config(format!(
                            "{} is not inside relative-to directory {}",
                            file.display(),
                            relative_base.display()
                        ))
                    })?;
                    files.insert(
                        format!("{name_version}.data/{scheme}/{}", normalize_relative(relative)),
                        FileSource::Path(file),
                    );
                }
            }
        }
    }
    Ok(files)
}

/// Rewrites collected files into their wheel layout: package-dir prefix
/// removed, dist-info and scheme data added.
pub(crate) fn wheel_files(ctx: &mut BuildContext, collected: FileMap) -> Result<FileMap> {
    let package_dir = ctx.project.build_config().package_dir(&ctx.root);
    let prefix = format!("{package_dir}/");
    let mut files: FileMap = collected
        .into_iter()
        .map(|(relpath, source)| {
            let relpath = if package_dir.is_empty() {
                relpath
            } else {
                relpath
                    .strip_prefix(&prefix)
                    .map(ToString::to_string)
                    .unwrap_or(relpath)
            };
            (relpath, source)
        })
        .collect();

    let metadata = match ctx.metadata_directory.clone() {
        Some(dir) => prepared_metadata_files(&dir)?,
        None => dist_info_files(ctx)?,
    };
    files.extend(metadata);
    files.extend(wheel_data_files(ctx, &project_name_version(ctx)?)?);
    Ok(files)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum WriterState {
    Empty,
    Collecting,
    MetadataWritten,
    Sealed,
}

/// Streams entries into a temporary `.whl`, enforcing that project files
/// come before dist-info files and that RECORD is written last.
pub(crate) struct WheelWriter {
    zip: ZipWriter<NamedTempFile>,
    options: FileOptions,
    dist_info: String,
    root: PathBuf,
    records: Vec<RecordEntry>,
    state: WriterState,
}

impl WheelWriter {
    pub(crate) fn new(ctx: &BuildContext, dist_info: String) -> Result<Self> {
        let file = tempfile::Builder::new()
            .suffix(".whl")
            .tempfile_in(&ctx.dist_dir)
            .with_context(|| format!("failed to create a wheel in {}", ctx.dist_dir.display()))?;
        let options = FileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .last_modified_time(zip_timestamp(&ctx.env)?);
        Ok(Self {
            zip: ZipWriter::new(file),
            options,
            dist_info,
            root: ctx.root.clone(),
            records: Vec::new(),
            state: WriterState::Empty,
        })
    }

    fn is_metadata(&self, relpath: &str) -> bool {
        relpath
            .strip_prefix(&self.dist_info)
            .is_some_and(|rest| rest.starts_with('/'))
    }

    pub(crate) fn add_project_file(&mut self, relpath: &str, source: &FileSource) -> Result<()> {
        match self.state {
            WriterState::Empty | WriterState::Collecting => {}
            state => bail!("cannot add {relpath} to a wheel in state {state:?}"),
        }
        self.state = WriterState::Collecting;
        self.write_entry(relpath, source)
    }

    pub(crate) fn add_metadata_file(&mut self, relpath: &str, source: &FileSource) -> Result<()> {
        if self.state == WriterState::Sealed {
            bail!("cannot add {relpath} to a sealed wheel");
        }
        if !self.is_metadata(relpath) {
            bail!("{relpath} is not inside {}", self.dist_info);
        }
        self.state = WriterState::MetadataWritten;
        self.write_entry(relpath, source)
    }

    fn write_entry(&mut self, relpath: &str, source: &FileSource) -> Result<()> {
        tracing::debug!(" - Adding {} -> {relpath}", source.describe(&self.root));
        let data = source.read()?;
        let options = self
            .options
            .unix_permissions(normalize_file_permissions(source.mode()?));
        self.zip.start_file(relpath, options)?;
        self.zip.write_all(&data)?;
        self.records.push(RecordEntry::for_bytes(relpath, &data));
        Ok(())
    }

    /// Writes RECORD and moves the archive to `target`, replacing any
    /// existing file.
    pub(crate) fn finish(mut self, target: &Path) -> Result<PathBuf> {
        if self.state == WriterState::Sealed {
            bail!("wheel already sealed");
        }
        let record_path = format!("{}/RECORD", self.dist_info);
        self.records.push(RecordEntry::unhashed(&record_path));
        let record = render_record(&self.records);
        tracing::debug!(" - Adding {record_path}");
        self.zip.start_file(record_path.as_str(), self.options.unix_permissions(0o644))?;
        self.zip.write_all(record.as_bytes())?;
        self.state = WriterState::Sealed;

        let file = self.zip.finish()?;
        if target.exists() {
            fs::remove_file(target)
                .with_context(|| format!("failed to replace {}", target.display()))?;
        }
        file.persist(target)
            .with_context(|| format!("failed to write {}", target.display()))?;
        Ok(target.to_path_buf())
    }
}

/// Writes the wheel for `files` into the destination directory.
pub(crate) fn write_wheel(ctx: &BuildContext, files: &FileMap) -> Result<PathBuf> {
    let dist_info = format!("{}.dist-info", project_name_version(ctx)?);
    let target = ctx.dist_dir.join(wheel_filename(ctx)?);
    let mut writer = WheelWriter::new(ctx, dist_info)?;
    let (metadata, project): (Vec<_>, Vec<_>) =
        files.iter().partition(|(relpath, _)| writer.is_metadata(relpath));
    for (relpath, source) in project {
        writer.add_project_file(relpath, source)?;
    }
    for (relpath, source) in metadata {
        writer.add_metadata_file(relpath, source)?;
    }
    writer.finish(&target)
}
