// ABOUTME: Info command implementation - summarize the contents of stores
// ABOUTME: Reports config entries and per-table counts, time span, and privacy state

use crate::merge::watermark;
use crate::store::schema::declared_columns;
use crate::store::{Store, Table};
use crate::utils::format_timestamp;
use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// A timestamp, either raw or rendered as a date
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Moment {
    Raw(i64),
    Date(String),
}

impl Moment {
    fn new(timestamp: i64, pretty: bool) -> Self {
        if pretty {
            Moment::Date(format_timestamp(timestamp))
        } else {
            Moment::Raw(timestamp)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableInfo {
    pub count: i64,
    pub can_share: i64,
    pub uuids: i64,
    pub first: Moment,
    pub last: Moment,
    /// No non-shareable row carries a real address
    pub anonymized: bool,
    /// Rows carry per-address location columns
    pub geolocated: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoreInfo {
    pub filename: String,
    #[serde(flatten)]
    pub config: BTreeMap<String, String>,
    #[serde(flatten)]
    pub tables: BTreeMap<Table, TableInfo>,
}

/// Gather information about one open store
pub fn collect_info(store: &Store, pretty: bool) -> Result<StoreInfo> {
    let conn = store.connection();
    let mut tables = BTreeMap::new();

    for table in Table::ALL {
        let (count, can_share, uuids, first, exposed): (i64, i64, i64, Option<i64>, i64) = conn
            .query_row(
                &format!(
                    "SELECT COUNT(*),
                            COUNT(CASE WHEN privacy_can_share = 1 THEN 1 END),
                            COUNT(DISTINCT uuid),
                            CAST(MIN(timestamp) AS INTEGER),
                            COUNT(CASE WHEN IFNULL(privacy_can_share, 0) != 1
                                        AND (IFNULL(real_address, '0.0.0.0') != '0.0.0.0'
                                          OR IFNULL(internal_address, '0.0.0.0') != '0.0.0.0')
                                       THEN 1 END)
                     FROM {}",
                    table
                ),
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?)),
            )
            .with_context(|| format!("Failed to summarize table '{}'", table))?;
        let last = watermark(conn, table)?;
        let geolocated = declared_columns(conn, table)?
            .iter()
            .any(|column| column == "city");

        tables.insert(
            table,
            TableInfo {
                count,
                can_share,
                uuids,
                first: Moment::new(first.unwrap_or(0), pretty),
                last: Moment::new(last.value(), pretty),
                anonymized: exposed == 0,
                geolocated,
            },
        );
    }

    Ok(StoreInfo {
        filename: store.path().display().to_string(),
        config: store.config()?,
        tables,
    })
}

/// Print a JSON summary of every store in `paths`
///
/// Stores are migrated to the current schema as they are opened.
pub fn info(paths: &[PathBuf], pretty: bool) -> Result<()> {
    for path in paths {
        let store = Store::open(path)?;
        let summary = collect_info(&store, pretty)?;
        let text = if pretty {
            serde_json::to_string_pretty(&summary)
        } else {
            serde_json::to_string(&summary)
        }
        .context("Failed to serialize store info")?;
        println!("{}", text);
    }
    Ok(())
}
