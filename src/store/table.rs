// ABOUTME: Closed set of measurement tables the merge engine understands
// ABOUTME: Table names reach SQL text only through Table::as_str

use std::fmt;
use std::str::FromStr;

use anyhow::bail;
use serde::Serialize;

/// Store-local row identifier, never copied between stores
pub const ID_COLUMN: &str = "id";

/// Ordering key used both as measurement identity and dedup watermark
pub const ORDERING_COLUMN: &str = "timestamp";

/// A managed measurement table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Table {
    Speedtest,
    Bittorrent,
}

impl Table {
    /// Every managed table, in merge order
    pub const ALL: [Table; 2] = [Table::Speedtest, Table::Bittorrent];

    pub const fn as_str(self) -> &'static str {
        match self {
            Table::Speedtest => "speedtest",
            Table::Bittorrent => "bittorrent",
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Table {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s {
            "speedtest" => Ok(Table::Speedtest),
            "bittorrent" => Ok(Table::Bittorrent),
            other => bail!("Unknown measurement table '{}'", other),
        }
    }
}
