// ABOUTME: DDL for a store at the current schema version
// ABOUTME: Creates the config table and every managed measurement table

use anyhow::{Context, Result};
use rusqlite::{params, Connection};
use uuid::Uuid;

use super::migrate::CURRENT_VERSION;
use super::table::Table;

/// Column list shared by every managed table at the current version
const MEASUREMENT_COLUMNS: &str = "
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp INTEGER,
    uuid TEXT,
    internal_address TEXT,
    real_address TEXT,
    remote_address TEXT,
    privacy_informed INTEGER DEFAULT 0,
    privacy_can_collect INTEGER DEFAULT 0,
    privacy_can_share INTEGER DEFAULT 0,
    connect_time REAL,
    download_speed REAL,
    upload_speed REAL,
    latency REAL,
    platform TEXT,
    neubot_version TEXT";

/// Create an empty store at the current schema version
///
/// Writes the `config` table (with `version` and a fresh `uuid`) and every
/// managed table inside one transaction.
pub fn create_current(conn: &mut Connection) -> Result<()> {
    let tx = conn
        .transaction()
        .context("Failed to begin schema transaction")?;

    tx.execute_batch("CREATE TABLE config (key TEXT PRIMARY KEY, value TEXT);")
        .context("Failed to create config table")?;
    tx.execute(
        "INSERT INTO config (key, value) VALUES ('version', ?1), ('uuid', ?2)",
        params![CURRENT_VERSION.to_string(), Uuid::new_v4().to_string()],
    )
    .context("Failed to initialize config table")?;

    for table in Table::ALL {
        tx.execute_batch(&format!(
            "CREATE TABLE {table} ({MEASUREMENT_COLUMNS});
             CREATE INDEX {table}_timestamp ON {table} (timestamp);"
        ))
        .with_context(|| format!("Failed to create table '{}'", table))?;
    }

    tx.commit().context("Failed to commit schema")?;
    Ok(())
}

/// Column names declared for `table`, in declaration order
pub fn declared_columns(conn: &Connection, table: Table) -> Result<Vec<String>> {
    let mut stmt = conn
        .prepare(&format!("PRAGMA table_info({})", table))
        .with_context(|| format!("Failed to inspect table '{}'", table))?;
    let columns = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<rusqlite::Result<Vec<_>>>()
        .with_context(|| format!("Failed to read columns of '{}'", table))?;
    Ok(columns)
}
