// ABOUTME: Cut command implementation - restrict a store to a time window
// ABOUTME: Deletes rows outside [since, until) from every managed table

use crate::store::{Compression, Store, Table, ORDERING_COLUMN};
use crate::utils::parse_date;
use anyhow::{bail, Context, Result};
use std::path::Path;

/// Default date format for `--since` and `--until`
pub const DEFAULT_DATE_FORMAT: &str = "%d-%m-%Y";

/// Delete every row whose timestamp is outside `[since, until)`
///
/// # Returns
///
/// Number of rows deleted, across all managed tables.
pub fn cut_store(store: &mut Store, since: i64, until: i64) -> Result<usize> {
    if since >= until {
        bail!("Empty time window: since ({}) >= until ({})", since, until);
    }

    let conn = store.connection_mut();
    let tx = conn.transaction().context("Failed to begin transaction")?;
    let mut deleted = 0;
    for table in Table::ALL {
        let rows = tx
            .execute(
                &format!(
                    "DELETE FROM {table} WHERE {ORDERING_COLUMN} < ?1 OR {ORDERING_COLUMN} >= ?2"
                ),
                [since, until],
            )
            .with_context(|| format!("Failed to cut table '{}'", table))?;
        tracing::info!("  Deleted {} row(s) from '{}'", rows, table);
        deleted += rows;
    }
    tx.commit().context("Failed to commit cut")?;

    conn.execute_batch("VACUUM;")
        .context("Failed to vacuum store")?;
    Ok(deleted)
}

/// Cut the store at `path` to the window between two dates
///
/// # Arguments
///
/// * `since` - First day kept (default: the epoch)
/// * `until` - First day dropped (default: now)
/// * `format` - strftime-style format of both dates
pub fn cut(path: &Path, since: Option<&str>, until: Option<&str>, format: &str) -> Result<()> {
    if Compression::from_path(path).is_compressed() {
        bail!(
            "Cannot cut compressed archive {} in place; decompress it first",
            path.display()
        );
    }

    let since = since.map(|d| parse_date(d, format)).transpose()?.unwrap_or(0);
    let until = match until {
        Some(d) => parse_date(d, format)?,
        None => chrono::Utc::now().timestamp(),
    };

    let mut store = Store::open(path)?;
    tracing::info!("Cutting {} to [{}, {})", path.display(), since, until);
    let deleted = cut_store(&mut store, since, until)?;
    tracing::info!("✓ Removed {} row(s) from {}", deleted, path.display());
    Ok(())
}
