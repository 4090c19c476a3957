// ABOUTME: Incremental, idempotent merge of many source stores into one destination
// ABOUTME: Sequences load, version gate, watermark, and copy for each source in order

pub mod copy;
pub mod watermark;

pub use copy::copy_after;
pub use watermark::{watermark, Watermark};

use std::path::{Path, PathBuf};

use anyhow::{bail, Result};
use serde::Serialize;

use crate::error::classify;
use crate::store::{Compression, Gated, OpenOptions, SchemaVersion, Store, Table};

/// Sources recorded at or below this version are skipped unless forced
pub const DEFAULT_MIN_VERSION: SchemaVersion = SchemaVersion::new(2, 0);

/// Knobs for a merge run
#[derive(Debug, Clone)]
pub struct MergeOptions {
    /// Skip sources whose on-disk version is `<=` this value
    pub min_version: SchemaVersion,
    /// Merge sources regardless of `min_version`
    pub force: bool,
    /// Directory for decompressed scratch copies
    pub temp_dir: Option<PathBuf>,
}

impl Default for MergeOptions {
    fn default() -> Self {
        Self {
            min_version: DEFAULT_MIN_VERSION,
            force: false,
            temp_dir: None,
        }
    }
}

/// Rows copied into one table from one source
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableCopy {
    pub table: Table,
    /// Destination watermark the copy started from
    pub watermark: Watermark,
    pub rows_copied: usize,
}

/// Terminal state of one source in a merge run
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SourceOutcome {
    Merged {
        tables: Vec<TableCopy>,
    },
    Skipped {
        version: SchemaVersion,
    },
    Failed {
        reason: String,
        kind: Option<&'static str>,
        /// Tables fully committed before the failure
        tables: Vec<TableCopy>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceReport {
    pub path: PathBuf,
    #[serde(flatten)]
    pub outcome: SourceOutcome,
}

/// Per-source results of a merge run, in submission order
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MergeReport {
    pub destination: PathBuf,
    pub sources: Vec<SourceReport>,
}

impl MergeReport {
    pub fn merged(&self) -> usize {
        self.count(|o| matches!(o, SourceOutcome::Merged { .. }))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, SourceOutcome::Skipped { .. }))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, SourceOutcome::Failed { .. }))
    }

    /// True if any source ended in `Failed`; skips do not count
    pub fn has_failures(&self) -> bool {
        self.failed() > 0
    }

    /// Rows copied into `table` across all sources
    pub fn rows_copied(&self, table: Table) -> usize {
        self.sources
            .iter()
            .filter_map(|report| match &report.outcome {
                SourceOutcome::Merged { tables } | SourceOutcome::Failed { tables, .. } => {
                    Some(tables)
                }
                SourceOutcome::Skipped { .. } => None,
            })
            .flatten()
            .filter(|copy| copy.table == table)
            .map(|copy| copy.rows_copied)
            .sum()
    }

    fn count(&self, predicate: impl Fn(&SourceOutcome) -> bool) -> usize {
        self.sources
            .iter()
            .filter(|report| predicate(&report.outcome))
            .count()
    }
}

/// A merge run holding its destination open for the run's duration
///
/// Sources are processed one at a time; each source store (and its scratch
/// copy, if compressed) is dropped before the next one is opened. Concurrent
/// runs against the same destination are not safe and must be serialized by
/// the caller.
pub struct Merger {
    destination: Store,
    options: MergeOptions,
}

impl Merger {
    /// Open (or create) and migrate the destination store
    ///
    /// # Errors
    ///
    /// Fails if the destination names a compressed archive, is not a regular
    /// file, or cannot be migrated.
    pub fn new(destination: &Path, options: MergeOptions) -> Result<Self> {
        if Compression::from_path(destination).is_compressed() {
            bail!(
                "Destination {} must be an uncompressed store",
                destination.display()
            );
        }

        let destination = OpenOptions::new().create(true).open(destination)?;
        Ok(Self {
            destination,
            options,
        })
    }

    pub fn destination(&self) -> &Store {
        &self.destination
    }

    /// Merge one source into the destination
    ///
    /// Never returns an error: failures are reported as
    /// [`SourceOutcome::Failed`] so that a bad archive does not block the
    /// rest of a batch. Tables committed before the failure stay committed.
    pub fn merge_source(&mut self, path: &Path) -> SourceOutcome {
        let mut tables = Vec::new();
        match self.try_merge_source(path, &mut tables) {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!("✗ Failed to merge {}: {:#}", path.display(), e);
                SourceOutcome::Failed {
                    reason: format!("{:#}", e),
                    kind: classify(&e).map(|err| err.kind()),
                    tables,
                }
            }
        }
    }

    fn try_merge_source(
        &mut self,
        path: &Path,
        tables: &mut Vec<TableCopy>,
    ) -> Result<SourceOutcome> {
        tracing::info!("Merging {}", path.display());
        let min_version = self.options.min_version;
        let force = self.options.force;
        let gated = OpenOptions::new()
            .temp_dir(self.options.temp_dir.clone())
            .open_gated(path, |version| force || version > min_version)?;

        let source = match gated {
            Gated::Open(source) => source,
            Gated::Rejected(version) => {
                tracing::warn!(
                    "⚠ Skipping {} (version {} <= {})",
                    path.display(),
                    version,
                    min_version
                );
                return Ok(SourceOutcome::Skipped { version });
            }
        };

        for table in Table::ALL {
            let destination = self.destination.connection_mut();
            let mark = watermark(destination, table)?;
            let rows_copied = copy_after(source.connection(), destination, table, mark)?;
            tables.push(TableCopy {
                table,
                watermark: mark,
                rows_copied,
            });
        }

        tracing::info!("✓ Merged {}", path.display());
        Ok(SourceOutcome::Merged {
            tables: tables.clone(),
        })
    }

    /// Merge every source in order and collect the report
    pub fn merge_all(&mut self, sources: &[PathBuf]) -> MergeReport {
        self.merge_all_with(sources, |_| {})
    }

    /// Like [`Merger::merge_all`], calling `on_source` after each source
    pub fn merge_all_with(
        &mut self,
        sources: &[PathBuf],
        mut on_source: impl FnMut(&SourceReport),
    ) -> MergeReport {
        let reports = sources
            .iter()
            .map(|path| {
                let report = SourceReport {
                    path: path.clone(),
                    outcome: self.merge_source(path),
                };
                on_source(&report);
                report
            })
            .collect();
        MergeReport {
            destination: self.destination.path().to_path_buf(),
            sources: reports,
        }
    }
}

/// Merge `sources`, in order, into the store at `destination`
///
/// Creates the destination if it does not exist. Each source is loaded,
/// migrated, version-gated, and then copied table by table starting from the
/// destination's current watermark, which is recomputed for every source.
/// Running the same merge twice copies nothing the second time.
///
/// # Errors
///
/// Only destination failures are returned as errors; per-source failures are
/// recorded in the report.
///
/// # Examples
///
/// ```no_run
/// # use anyhow::Result;
/// # use std::path::{Path, PathBuf};
/// # use neubot_collate::merge::{merge, MergeOptions};
/// # fn example() -> Result<()> {
/// let sources = vec![
///     PathBuf::from("neubot-2011-11.sqlite3.bz2"),
///     PathBuf::from("neubot-2011-12.sqlite3.bz2"),
/// ];
/// let report = merge(Path::new("database.sqlite3"), &sources, &MergeOptions::default())?;
/// println!(
///     "{} merged, {} skipped, {} failed",
///     report.merged(),
///     report.skipped(),
///     report.failed()
/// );
/// # Ok(())
/// # }
/// ```
pub fn merge(
    destination: &Path,
    sources: &[PathBuf],
    options: &MergeOptions,
) -> Result<MergeReport> {
    let mut merger = Merger::new(destination, options.clone())?;
    Ok(merger.merge_all(sources))
}
