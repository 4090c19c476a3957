// ABOUTME: Digest command implementation - content checksums of measurement tables
// ABOUTME: Hashes rows without their store-local id so equal measurements hash equally

use crate::store::schema::declared_columns;
use crate::store::{Store, Table, ID_COLUMN, ORDERING_COLUMN};
use anyhow::{Context, Result};
use rusqlite::types::ValueRef;
use sha2::{Digest, Sha256};
use std::path::PathBuf;

/// Checksum of one table's measurements
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDigest {
    pub table: Table,
    pub row_count: u64,
    /// Hex SHA-256, or "empty" for a table with no rows
    pub checksum: String,
}

/// Compute a checksum of `table` that ignores row ids and column order
///
/// Columns are hashed in name order and rows in ordering-key order (ties broken
/// by the remaining columns), so two stores holding the same measurements hash
/// equally no matter how their rows were numbered or their columns declared.
pub fn compute_table_digest(store: &Store, table: Table) -> Result<TableDigest> {
    tracing::debug!("Computing digest of '{}'", table);

    let mut columns: Vec<String> = declared_columns(store.connection(), table)?
        .into_iter()
        .filter(|column| !column.eq_ignore_ascii_case(ID_COLUMN))
        .collect();
    columns.sort();
    if columns.is_empty() {
        anyhow::bail!("Table '{}' has no columns", table);
    }

    let quoted: Vec<String> = columns
        .iter()
        .map(|column| format!("\"{}\"", column.replace('"', "\"\"")))
        .collect();
    let sql = format!(
        "SELECT {} FROM {} ORDER BY {}, {}",
        quoted.join(", "),
        table,
        ORDERING_COLUMN,
        quoted.join(", ")
    );

    let mut stmt = store
        .connection()
        .prepare(&sql)
        .with_context(|| format!("Failed to read table '{}'", table))?;
    let mut rows = stmt.query([])?;

    let mut hasher = Sha256::new();
    for column in &columns {
        hasher.update(column.as_bytes());
        hasher.update([0u8]);
    }

    let mut row_count = 0u64;
    while let Some(row) = rows.next()? {
        for index in 0..columns.len() {
            hash_value(&mut hasher, row.get_ref(index)?);
        }
        row_count += 1;
    }

    let checksum = if row_count == 0 {
        "empty".to_string()
    } else {
        hasher
            .finalize()
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect()
    };

    Ok(TableDigest {
        table,
        row_count,
        checksum,
    })
}

/// Feed one value into the hash with a type tag, so 1 and "1" differ
fn hash_value(hasher: &mut Sha256, value: ValueRef<'_>) {
    match value {
        ValueRef::Null => hasher.update([0u8]),
        ValueRef::Integer(i) => {
            hasher.update([1u8]);
            hasher.update(i.to_le_bytes());
        }
        ValueRef::Real(f) => {
            hasher.update([2u8]);
            hasher.update(f.to_le_bytes());
        }
        ValueRef::Text(t) => {
            hasher.update([3u8]);
            hasher.update((t.len() as u64).to_le_bytes());
            hasher.update(t);
        }
        ValueRef::Blob(b) => {
            hasher.update([4u8]);
            hasher.update((b.len() as u64).to_le_bytes());
            hasher.update(b);
        }
    }
}

/// Print the digest of every managed table of every store in `paths`
pub fn digest(paths: &[PathBuf]) -> Result<()> {
    for path in paths {
        let store = Store::open(path)?;
        for table in Table::ALL {
            let result = compute_table_digest(&store, table)?;
            println!(
                "{}  {}:{} ({} rows)",
                result.checksum,
                path.display(),
                table,
                result.row_count
            );
        }
    }
    Ok(())
}
