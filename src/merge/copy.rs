// ABOUTME: Copies rows newer than a watermark from a source table to a destination table
// ABOUTME: Strips the store-local id and commits each table batch atomically

use anyhow::{Context, Result};
use rusqlite::types::{Value, ValueRef};
use rusqlite::{params_from_iter, Connection};

use super::watermark::Watermark;
use crate::error::StoreError;
use crate::store::schema::declared_columns;
use crate::store::{Table, ID_COLUMN, ORDERING_COLUMN};

/// Parameterized insert for one (source, destination, table) batch
///
/// The column list comes from the source query with the id removed; every
/// name is resolved against the destination's declared columns, so no name
/// read from a source store is ever interpolated into SQL.
#[derive(Debug, Clone, PartialEq)]
struct InsertPlan {
    /// Positions in the source row to carry over
    source_indexes: Vec<usize>,
    /// Position of the ordering key in the source row
    ordering_index: usize,
    sql: String,
}

impl InsertPlan {
    fn build(
        table: Table,
        source_columns: &[String],
        destination_columns: &[String],
    ) -> Result<Self> {
        let mut source_indexes = Vec::new();
        let mut targets = Vec::new();
        let mut ordering_index = None;

        for (index, name) in source_columns.iter().enumerate() {
            if name.eq_ignore_ascii_case(ID_COLUMN) {
                continue;
            }
            let target = destination_columns
                .iter()
                .find(|column| column.eq_ignore_ascii_case(name))
                .ok_or_else(|| {
                    StoreError::schema_mismatch(
                        table.as_str(),
                        format!("source column '{}' does not exist in destination", name),
                    )
                })?;
            if targets.contains(&target) {
                return Err(StoreError::schema_mismatch(
                    table.as_str(),
                    format!("source column '{}' appears more than once", name),
                )
                .into());
            }
            if target.eq_ignore_ascii_case(ORDERING_COLUMN) {
                ordering_index = Some(index);
            }
            source_indexes.push(index);
            targets.push(target);
        }

        let ordering_index = ordering_index.ok_or_else(|| {
            StoreError::schema_mismatch(
                table.as_str(),
                format!("source rows have no '{}' column", ORDERING_COLUMN),
            )
        })?;

        let columns: Vec<String> = targets
            .iter()
            .map(|name| format!("\"{}\"", name.replace('"', "\"\"")))
            .collect();
        let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{}", i)).collect();
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            table,
            columns.join(", "),
            placeholders.join(", ")
        );

        Ok(Self {
            source_indexes,
            ordering_index,
            sql,
        })
    }
}

/// Copy every row of `table` in `source` whose ordering key is greater than `watermark`
///
/// Rows are read in ascending ordering-key order. The id column is dropped and
/// the destination assigns its own. All inserts for the table run in one
/// destination transaction, committed only after the whole batch succeeds, so
/// a failure midway leaves the destination table unchanged.
///
/// # Returns
///
/// The number of rows copied.
///
/// # Errors
///
/// Returns a [`StoreError::SchemaMismatch`] if the source rows carry a column
/// the destination table does not declare or a row's ordering key is not an
/// integer, and propagates any SQLite error. Nothing is committed in either case.
pub fn copy_after(
    source: &Connection,
    destination: &mut Connection,
    table: Table,
    watermark: Watermark,
) -> Result<usize> {
    let destination_columns = declared_columns(destination, table)?;
    if destination_columns.is_empty() {
        return Err(StoreError::schema_mismatch(
            table.as_str(),
            "table does not exist in destination",
        )
        .into());
    }

    let mut select = source
        .prepare(&format!(
            "SELECT * FROM {table} WHERE {ORDERING_COLUMN} > ?1 ORDER BY {ORDERING_COLUMN}, rowid"
        ))
        .with_context(|| format!("Failed to query source table '{}'", table))?;
    let source_columns: Vec<String> = select
        .column_names()
        .into_iter()
        .map(String::from)
        .collect();

    let plan = InsertPlan::build(table, &source_columns, &destination_columns)?;
    tracing::debug!("Insert plan for '{}': {}", table, plan.sql);

    let tx = destination
        .transaction()
        .context("Failed to begin copy transaction")?;
    let mut copied = 0;
    {
        let mut insert = tx
            .prepare(&plan.sql)
            .with_context(|| format!("Failed to prepare insert into '{}'", table))?;
        let mut rows = select.query([watermark.value()])?;
        while let Some(row) = rows.next()? {
            let key = row.get_ref(plan.ordering_index)?;
            if !matches!(key, ValueRef::Integer(_)) {
                return Err(StoreError::schema_mismatch(
                    table.as_str(),
                    format!(
                        "'{}' must be an integer, found {} value",
                        ORDERING_COLUMN,
                        key.data_type()
                    ),
                )
                .into());
            }
            let values = plan
                .source_indexes
                .iter()
                .map(|&index| row.get::<_, Value>(index))
                .collect::<rusqlite::Result<Vec<_>>>()?;
            insert
                .execute(params_from_iter(values.iter()))
                .with_context(|| format!("Failed to insert row into '{}'", table))?;
            copied += 1;
        }
    }
    tx.commit()
        .with_context(|| format!("Failed to commit rows into '{}'", table))?;

    tracing::info!("  Merged {} row(s) into '{}'", copied, table);
    Ok(copied)
}
