// ABOUTME: Utility functions shared by the store layer and commands
// ABOUTME: Provides timestamp formatting, date parsing, and scratch-file cleanup

use anyhow::{bail, Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use std::path::Path;
use std::time::{Duration, SystemTime};

/// File name prefix of every decompressed scratch copy this crate creates
pub const TEMP_PREFIX: &str = "neubot-collate-";

/// Render a UNIX timestamp the way `ctime(3)` does, in UTC
///
/// # Examples
///
/// ```
/// # use neubot_collate::utils::format_timestamp;
/// assert_eq!(format_timestamp(0), "Thu Jan  1 00:00:00 1970");
/// ```
pub fn format_timestamp(timestamp: i64) -> String {
    match DateTime::<Utc>::from_timestamp(timestamp, 0) {
        Some(when) => when.format("%a %b %e %H:%M:%S %Y").to_string(),
        None => timestamp.to_string(),
    }
}

/// Parse a calendar date into a UNIX timestamp at midnight UTC
///
/// # Arguments
///
/// * `value` - Date text, e.g. "24-12-2011"
/// * `format` - strftime-style format, e.g. "%d-%m-%Y"
///
/// # Errors
///
/// Returns an error if `value` does not match `format`.
pub fn parse_date(value: &str, format: &str) -> Result<i64> {
    let date = NaiveDate::parse_from_str(value, format)
        .with_context(|| format!("Invalid date '{}' (expected format '{}')", value, format))?;
    match date.and_hms_opt(0, 0, 0) {
        Some(midnight) => Ok(midnight.and_utc().timestamp()),
        None => bail!("Invalid date '{}'", value),
    }
}

/// Remove scratch files left behind by earlier runs
///
/// Decompressed copies are normally deleted when their store is dropped, but a
/// process killed with SIGKILL leaves them behind. This removes every file in
/// `dir` whose name starts with [`TEMP_PREFIX`] and that was last modified more
/// than `max_age` ago.
///
/// # Returns
///
/// The number of files removed.
pub fn cleanup_stale_temp_files(dir: &Path, max_age: Duration) -> Result<usize> {
    let now = SystemTime::now();
    let mut removed = 0;

    let entries = std::fs::read_dir(dir)
        .with_context(|| format!("Failed to list temp directory {}", dir.display()))?;
    for entry in entries {
        let entry = entry?;
        let name = entry.file_name();
        if !name.to_string_lossy().starts_with(TEMP_PREFIX) {
            continue;
        }

        let metadata = entry.metadata()?;
        if !metadata.is_file() {
            continue;
        }
        let age = metadata
            .modified()
            .ok()
            .and_then(|modified| now.duration_since(modified).ok())
            .unwrap_or_default();
        if age <= max_age {
            continue;
        }

        match std::fs::remove_file(entry.path()) {
            Ok(()) => {
                tracing::debug!("Removed stale scratch file {}", entry.path().display());
                removed += 1;
            }
            Err(e) => {
                tracing::warn!(
                    "Failed to remove stale scratch file {}: {}",
                    entry.path().display(),
                    e
                );
            }
        }
    }

    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_parse_date() {
        assert_eq!(parse_date("01-01-1970", "%d-%m-%Y").unwrap(), 0);
        assert_eq!(parse_date("02-01-1970", "%d-%m-%Y").unwrap(), 86400);
        assert_eq!(parse_date("2011-12-24", "%Y-%m-%d").unwrap(), 1324684800);
        assert!(parse_date("31-02-2011", "%d-%m-%Y").is_err());
        assert!(parse_date("yesterday", "%d-%m-%Y").is_err());
    }

    #[test]
    fn test_format_timestamp() {
        assert_eq!(format_timestamp(1324684800), "Sat Dec 24 00:00:00 2011");
    }

    #[test]
    fn test_cleanup_only_touches_old_prefixed_files() {
        let dir = tempdir().unwrap();
        let ours = dir.path().join(format!("{}abc.sqlite3", TEMP_PREFIX));
        let theirs = dir.path().join("keep-me.sqlite3");
        std::fs::write(&ours, b"x").unwrap();
        std::fs::write(&theirs, b"x").unwrap();

        // Fresh files survive
        assert_eq!(
            cleanup_stale_temp_files(dir.path(), Duration::from_secs(3600)).unwrap(),
            0
        );
        assert!(ours.exists());

        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(
            cleanup_stale_temp_files(dir.path(), Duration::from_millis(1)).unwrap(),
            1
        );
        assert!(!ours.exists());
        assert!(theirs.exists());
    }
}
