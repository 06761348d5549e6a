use std::fs;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use flate2::write::GzEncoder;
use flate2::{Compression, GzBuilder};
use pdmb_domain::{render_pkg_info, PYPROJECT};
use tar::{EntryType, Header};
use tempfile::NamedTempFile;

use super::archive::{normalize_file_permissions, source_date_epoch};
use super::licenses::find_license_files;
use super::wheel::project_name_version;
use crate::collect::files::{FileMap, FileSource};
use crate::context::BuildContext;

type TarBuilder = tar::Builder<GzEncoder<NamedTempFile>>;

/// Adds what only a source distribution carries: the regenerated
/// manifest, the local hook script, the readme and license files.
pub(crate) fn sdist_files(ctx: &mut BuildContext, mut files: FileMap) -> Result<FileMap> {
    files.insert(
        PYPROJECT.to_string(),
        FileSource::Bytes(ctx.project.render().into_bytes()),
    );

    let mut extras = Vec::new();
    if let Some(hook) = ctx.project.build_config().custom_hook(&ctx.root) {
        extras.push(hook);
    }
    if let Some(readme) = ctx
        .project
        .metadata()?
        .readme
        .as_ref()
        .and_then(|readme| readme.file.clone())
    {
        extras.push(readme);
    }
    extras.extend(find_license_files(ctx)?);

    for relpath in extras {
        let path = ctx.root.join(&relpath);
        if !files.contains_key(&relpath) && path.exists() {
            files.insert(relpath, FileSource::Path(path));
        }
    }
    Ok(files)
}

/// Writes `{name}-{version}.tar.gz` with every entry under `{name}-{version}/`
/// and PKG-INFO appended last.
pub(crate) fn write_sdist(ctx: &BuildContext, files: &FileMap) -> Result<PathBuf> {
    let name_version = project_name_version(ctx)?;
    let target = ctx.dist_dir.join(format!("{name_version}.tar.gz"));
    let epoch = source_date_epoch(&ctx.env).and_then(|epoch| u64::try_from(epoch).ok());

    let file = tempfile::Builder::new()
        .suffix(".tar.gz")
        .tempfile_in(&ctx.dist_dir)
        .with_context(|| format!("failed to create an sdist in {}", ctx.dist_dir.display()))?;
    let gzip_mtime = epoch.and_then(|epoch| u32::try_from(epoch).ok()).unwrap_or(0);
    let encoder = GzBuilder::new()
        .mtime(gzip_mtime)
        .write(file, Compression::default());
    let mut builder = tar::Builder::new(encoder);

    for (relpath, source) in files {
        tracing::debug!(" - Adding {} -> {relpath}", source.describe(&ctx.root));
        let data = source.read()?;
        let mtime = match epoch {
            Some(epoch) => epoch,
            None => source_mtime(source)?,
        };
        append_entry(
            &mut builder,
            &format!("{name_version}/{relpath}"),
            &data,
            source.mode()?,
            mtime,
        )?;
    }

    let pkg_info = render_pkg_info(ctx.project.metadata()?);
    tracing::debug!(" - Adding <generated> -> PKG-INFO");
    let mtime = match epoch {
        Some(epoch) => epoch,
        None => now()?,
    };
    append_entry(
        &mut builder,
        &format!("{name_version}/PKG-INFO"),
        pkg_info.as_bytes(),
        0o644,
        mtime,
    )?;

    let file = builder.into_inner()?.finish()?;
    if target.exists() {
        fs::remove_file(&target)
            .with_context(|| format!("failed to replace {}", target.display()))?;
    }
    file.persist(&target)
        .with_context(|| format!("failed to write {}", target.display()))?;
    Ok(target)
}

fn source_mtime(source: &FileSource) -> Result<u64> {
    let Some(path) = source.path() else {
        return now();
    };
    let modified = fs::metadata(path)
        .and_then(|meta| meta.modified())
        .with_context(|| format!("failed to stat {}", path.display()))?;
    Ok(modified
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or(0))
}

fn now() -> Result<u64> {
    Ok(SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs())
}

fn append_entry(builder: &mut TarBuilder, path: &str, data: &[u8], mode: u32, mtime: u64) -> Result<()> {
    let mut header = Header::new_ustar();
    header.set_entry_type(EntryType::Regular);
    header.set_size(data.len() as u64);
    header.set_mode(normalize_file_permissions(mode) & 0o7777);
    header.set_uid(0);
    header.set_gid(0);
    header.set_username("")?;
    header.set_groupname("")?;
    header.set_mtime(mtime);

    if !path.is_ascii() || header.set_path(path).is_err() {
        // the full name travels in a pax record, the ustar name is a fallback
        builder.append_pax_extensions([("path", path.as_bytes())])?;
        if let Some(ustar) = header.as_ustar_mut() {
            let bytes = path.as_bytes();
            let len = bytes.len().min(ustar.name.len());
            ustar.prefix = [0; 155];
            ustar.name = [0; 100];
            ustar.name[..len].copy_from_slice(&bytes[..len]);
        }
    }
    header.set_cksum();
    builder
        .append(&header, data)
        .with_context(|| format!("failed to add {path} to the sdist"))
}
