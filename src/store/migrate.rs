// ABOUTME: Brings a store from any supported schema version to the current one
// ABOUTME: Applies the ordered chain of schema steps inside a single transaction

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use uuid::Uuid;

use super::version::SchemaVersion;
use crate::error::StoreError;

/// Schema version written by this crate
pub const CURRENT_VERSION: SchemaVersion = SchemaVersion::new(4, 0);

/// One transformation between adjacent schema versions
struct Step {
    from: SchemaVersion,
    to: SchemaVersion,
    apply: fn(&Transaction<'_>) -> rusqlite::Result<()>,
}

const STEPS: &[Step] = &[
    Step {
        from: SchemaVersion::new(1, 0),
        to: SchemaVersion::new(1, 1),
        apply: v1_0_to_v1_1,
    },
    Step {
        from: SchemaVersion::new(1, 1),
        to: SchemaVersion::new(1, 2),
        apply: v1_1_to_v1_2,
    },
    Step {
        from: SchemaVersion::new(1, 2),
        to: SchemaVersion::new(2, 0),
        apply: v1_2_to_v2_0,
    },
    Step {
        from: SchemaVersion::new(2, 0),
        to: SchemaVersion::new(3, 0),
        apply: v2_0_to_v3_0,
    },
    Step {
        from: SchemaVersion::new(3, 0),
        to: CURRENT_VERSION,
        apply: v3_0_to_v4_0,
    },
];

/// Whether `version` is one this crate can open
pub fn is_supported(version: SchemaVersion) -> bool {
    version == CURRENT_VERSION || STEPS.iter().any(|step| step.from == version)
}

/// Read `config.version` from a store
///
/// # Errors
///
/// Returns a [`StoreError::Migration`] if the `config` table or the
/// `version` key is missing, or if the value does not parse as a version.
pub fn read_version(conn: &Connection) -> Result<SchemaVersion> {
    let has_config: bool = conn
        .query_row(
            "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type = 'table' AND name = 'config'",
            [],
            |row| row.get(0),
        )
        .context("Failed to inspect store (is this a SQLite database?)")?;
    if !has_config {
        return Err(StoreError::migration("store has no config table").into());
    }

    let raw: Option<String> = conn
        .query_row("SELECT value FROM config WHERE key = 'version'", [], |row| {
            row.get(0)
        })
        .optional()
        .context("Failed to read config.version")?;
    let raw = raw.ok_or_else(|| StoreError::migration("config has no version entry"))?;

    raw.parse::<SchemaVersion>()
        .map_err(|e| StoreError::migration(format!("unrecognized version: {}", e)).into())
}

/// Migrate a store in place to [`CURRENT_VERSION`]
///
/// Every step and the final `config.version` update run in one transaction:
/// either the store ends at the current version or it is left untouched.
/// A store that is already current is not modified.
///
/// # Returns
///
/// The version found on disk before migration.
///
/// # Errors
///
/// Returns a [`StoreError::Migration`] if the recorded version is newer than
/// [`CURRENT_VERSION`] or is not a version this crate knows how to upgrade.
pub fn migrate(conn: &mut Connection) -> Result<SchemaVersion> {
    let tx = conn
        .transaction()
        .context("Failed to begin migration transaction")?;
    let found = read_version(&tx)?;

    if found == CURRENT_VERSION {
        tracing::debug!("Schema already at version {}", found);
        return Ok(found);
    }
    if found > CURRENT_VERSION {
        return Err(StoreError::migration(format!(
            "version {} is newer than supported version {}",
            found, CURRENT_VERSION
        ))
        .into());
    }
    if !is_supported(found) {
        return Err(StoreError::migration(format!("version {} is not recognized", found)).into());
    }

    let mut version = found;
    while version < CURRENT_VERSION {
        let step = STEPS
            .iter()
            .find(|step| step.from == version)
            .ok_or_else(|| StoreError::migration(format!("no migration path from {}", version)))?;

        tracing::info!("  Migrating schema {} -> {}", step.from, step.to);
        (step.apply)(&tx)
            .with_context(|| format!("Migration {} -> {} failed", step.from, step.to))?;
        version = step.to;
    }

    tx.execute(
        "UPDATE config SET value = ?1 WHERE key = 'version'",
        params![version.to_string()],
    )
    .context("Failed to record schema version")?;
    tx.commit().context("Failed to commit migration")?;

    tracing::info!("✓ Schema migrated from {} to {}", found, version);
    Ok(found)
}

fn v1_0_to_v1_1(tx: &Transaction<'_>) -> rusqlite::Result<()> {
    tx.execute(
        "INSERT OR IGNORE INTO config (key, value) VALUES ('uuid', ?1)",
        params![Uuid::new_v4().to_string()],
    )?;
    tx.execute_batch(
        "ALTER TABLE speedtest ADD COLUMN uuid TEXT;
         UPDATE speedtest SET uuid = (SELECT value FROM config WHERE key = 'uuid');",
    )
}

fn v1_1_to_v1_2(tx: &Transaction<'_>) -> rusqlite::Result<()> {
    tx.execute_batch(
        "ALTER TABLE speedtest ADD COLUMN privacy_informed INTEGER DEFAULT 0;
         ALTER TABLE speedtest ADD COLUMN privacy_can_collect INTEGER DEFAULT 0;
         ALTER TABLE speedtest ADD COLUMN privacy_can_publish INTEGER DEFAULT 0;",
    )
}

fn v1_2_to_v2_0(tx: &Transaction<'_>) -> rusqlite::Result<()> {
    tx.execute_batch(
        "ALTER TABLE speedtest ADD COLUMN platform TEXT;
         ALTER TABLE speedtest ADD COLUMN neubot_version TEXT;
         CREATE TABLE IF NOT EXISTS bittorrent (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            timestamp INTEGER,
            uuid TEXT,
            internal_address TEXT,
            real_address TEXT,
            remote_address TEXT,
            privacy_informed INTEGER DEFAULT 0,
            privacy_can_collect INTEGER DEFAULT 0,
            privacy_can_publish INTEGER DEFAULT 0,
            connect_time REAL,
            download_speed REAL,
            upload_speed REAL,
            latency REAL,
            platform TEXT,
            neubot_version TEXT
         );",
    )
}

fn v2_0_to_v3_0(tx: &Transaction<'_>) -> rusqlite::Result<()> {
    tx.execute_batch(
        "ALTER TABLE speedtest RENAME COLUMN privacy_can_publish TO privacy_can_share;
         ALTER TABLE bittorrent RENAME COLUMN privacy_can_publish TO privacy_can_share;",
    )
}

fn v3_0_to_v4_0(tx: &Transaction<'_>) -> rusqlite::Result<()> {
    tx.execute_batch(
        "CREATE INDEX IF NOT EXISTS speedtest_timestamp ON speedtest (timestamp);
         CREATE INDEX IF NOT EXISTS bittorrent_timestamp ON bittorrent (timestamp);",
    )
}
