// ABOUTME: Per-table high-water mark of the ordering key in a store
// ABOUTME: Rows at or below the destination watermark are treated as already merged

use anyhow::{Context, Result};
use rusqlite::types::ValueRef;
use rusqlite::Connection;
use serde::Serialize;

use crate::error::StoreError;
use crate::store::{Table, ORDERING_COLUMN};

/// Highest ordering key present in a table, or zero for an empty table
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize)]
#[serde(transparent)]
pub struct Watermark(pub i64);

impl Watermark {
    pub const EMPTY: Watermark = Watermark(0);

    pub fn value(self) -> i64 {
        self.0
    }
}

/// Compute the watermark of `table`
///
/// Read-only. Callers merging several sources must recompute this on the
/// destination before each source instead of caching it for the whole run.
/// A fractional maximum (left by an older writer) rounds up, so it never
/// admits the row it came from a second time.
///
/// # Errors
///
/// Returns a [`StoreError::SchemaMismatch`] if the maximum is text or a blob.
pub fn watermark(conn: &Connection, table: Table) -> Result<Watermark> {
    let maximum = conn
        .query_row(
            &format!("SELECT MAX({}) FROM {}", ORDERING_COLUMN, table),
            [],
            |row| {
                Ok(match row.get_ref(0)? {
                    ValueRef::Null => Ok(Watermark::EMPTY),
                    ValueRef::Integer(value) => Ok(Watermark(value)),
                    ValueRef::Real(value) => Ok(Watermark(value.ceil() as i64)),
                    other => Err(other.data_type()),
                })
            },
        )
        .with_context(|| format!("Failed to read watermark of '{}'", table))?;

    maximum.map_err(|found| {
        StoreError::schema_mismatch(
            table.as_str(),
            format!("'{}' holds a {} value", ORDERING_COLUMN, found),
        )
        .into()
    })
}
