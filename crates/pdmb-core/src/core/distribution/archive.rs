//! Reproducibility helpers shared by the archive writers.

use anyhow::Result;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use sha2::{Digest, Sha256};
use time::OffsetDateTime;

use crate::settings::EnvSnapshot;

const SOURCE_DATE_EPOCH: &str = "SOURCE_DATE_EPOCH";
const DEFAULT_ZIP_TIME: (u16, u8, u8, u8, u8, u8) = (2016, 1, 1, 0, 0, 0);

/// Forces permissions to 644, or 755 for files executable by their owner.
/// Bits above the permission range are kept.
pub(crate) fn normalize_file_permissions(mode: u32) -> u32 {
    let mut normalized = (mode | 0o644) & !0o133;
    if mode & 0o100 != 0 {
        normalized |= 0o111;
    }
    normalized
}

/// `SOURCE_DATE_EPOCH` when it holds an integer.
pub(crate) fn source_date_epoch(env: &EnvSnapshot) -> Option<i64> {
    env.var(SOURCE_DATE_EPOCH)
        .and_then(|value| value.trim().parse::<i64>().ok())
}

/// Timestamp stamped on every wheel entry.
pub(crate) fn zip_timestamp(env: &EnvSnapshot) -> Result<zip::DateTime> {
    let (year, month, day, hour, minute, second) = match source_date_epoch(env)
        .and_then(|epoch| OffsetDateTime::from_unix_timestamp(epoch).ok())
    {
        Some(date) => {
            let year = u16::try_from(date.year()).unwrap_or(0);
            if year < 1980 {
                anyhow::bail!("zipinfo date can't be earlier than 1980");
            }
            (
                year,
                u8::from(date.month()),
                date.day(),
                date.hour(),
                date.minute(),
                date.second(),
            )
        }
        None => DEFAULT_ZIP_TIME,
    };
    zip::DateTime::from_date_and_time(year, month, day, hour, minute, second)
        .map_err(|()| anyhow::anyhow!("timestamp {year}-{month}-{day} can't be stored in a zip archive"))
}

/// One row of a wheel's RECORD.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct RecordEntry {
    pub(crate) path: String,
    pub(crate) hash: String,
    pub(crate) size: String,
}

impl RecordEntry {
    /// Hashes exactly the bytes that go into the archive.
    pub(crate) fn for_bytes(path: &str, data: &[u8]) -> Self {
        let digest = Sha256::digest(data);
        Self {
            path: path.to_string(),
            hash: format!("sha256={}", URL_SAFE_NO_PAD.encode(digest)),
            size: data.len().to_string(),
        }
    }

    /// The RECORD file's own row, which can't hash itself.
    pub(crate) fn unhashed(path: &str) -> Self {
        Self {
            path: path.to_string(),
            hash: String::new(),
            size: String::new(),
        }
    }

    fn row(&self) -> String {
        [&self.path, &self.hash, &self.size]
            .iter()
            .map(|field| csv_field(field))
            .collect::<Vec<_>>()
            .join(",")
    }
}

pub(crate) fn render_record(entries: &[RecordEntry]) -> String {
    entries.iter().map(|entry| entry.row() + "\n").collect()
}

fn csv_field(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permissions_collapse_to_644_or_755() {
        assert_eq!(normalize_file_permissions(0o100600), 0o100644);
        assert_eq!(normalize_file_permissions(0o100777), 0o100755);
        assert_eq!(normalize_file_permissions(0o100700), 0o100755);
        assert_eq!(normalize_file_permissions(0o100664), 0o100644);
        assert_eq!(normalize_file_permissions(0o100070), 0o100644);
    }

    #[test]
    fn zip_time_defaults_and_follows_epoch() -> Result<()> {
        let default = zip_timestamp(&EnvSnapshot::testing(&[]))?;
        assert_eq!((default.year(), default.month(), default.day()), (2016, 1, 1));

        let epoch = zip_timestamp(&EnvSnapshot::testing(&[("SOURCE_DATE_EPOCH", "1700000000")]))?;
        assert_eq!(
            (epoch.year(), epoch.month(), epoch.day(), epoch.hour(), epoch.minute()),
            (2023, 11, 14, 22, 13)
        );

        let garbage = zip_timestamp(&EnvSnapshot::testing(&[("SOURCE_DATE_EPOCH", "soon")]))?;
        assert_eq!(garbage.year(), 2016);

        let err = zip_timestamp(&EnvSnapshot::testing(&[("SOURCE_DATE_EPOCH", "0")])).unwrap_err();
        assert_eq!(err.to_string(), "zipinfo date can't be earlier than 1980");
        Ok(())
    }

    #[test]
    fn record_rows_hash_content_and_quote_commas() {
        let entry = RecordEntry::for_bytes("demo/__init__.py", b"");
        assert_eq!(
            entry.hash,
            "sha256=47DEQpj8HBSa-_TImW-5JCeuQeRkm5NMpJWZG3hSuFU"
        );
        assert_eq!(entry.size, "0");
        let record = render_record(&[
            entry,
            RecordEntry::for_bytes("odd,name.txt", b"x"),
            RecordEntry::unhashed("demo-0.1.dist-info/RECORD"),
        ]);
        let lines: Vec<&str> = record.lines().collect();
        assert_eq!(lines[0], "demo/__init__.py,sha256=47DEQpj8HBSa-_TImW-5JCeuQeRkm5NMpJWZG3hSuFU,0");
        assert!(lines[1].starts_with("\"odd,name.txt\",sha256="));
        assert_eq!(lines[2], "demo-0.1.dist-info/RECORD,,");
        assert!(record.ends_with('\n'));
    }
}
