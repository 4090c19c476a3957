// ABOUTME: Error taxonomy for store loading, migration, and row copying
// ABOUTME: Typed variants ride inside anyhow errors and can be recovered with downcast_ref

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by the store layer and the merge engine
///
/// Functions in this crate return `anyhow::Result` and attach context as the
/// error travels up. The variant that caused a failure can still be recovered
/// with `err.downcast_ref::<StoreError>()`.
#[derive(Error, Debug)]
pub enum StoreError {
    /// A required input path does not exist
    #[error("No such file: {}", path.display())]
    NotFound { path: PathBuf },

    /// The path exists but is not a regular file
    #[error("Not a regular file: {}", path.display())]
    NotAFile { path: PathBuf },

    /// Schema version is unrecognized, missing, or newer than supported
    #[error("Migration error: {0}")]
    Migration(String),

    /// Rows of one copy batch disagree with the insert column list
    #[error("Schema mismatch in table '{table}': {message}")]
    SchemaMismatch { table: &'static str, message: String },

    /// Decompression or file system failure
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl StoreError {
    pub fn migration(message: impl Into<String>) -> Self {
        Self::Migration(message.into())
    }

    pub fn schema_mismatch(table: &'static str, message: impl Into<String>) -> Self {
        Self::SchemaMismatch {
            table,
            message: message.into(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Short machine-readable name for the error class
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::NotAFile { .. } => "not_a_file",
            Self::Migration(_) => "migration",
            Self::SchemaMismatch { .. } => "schema_mismatch",
            Self::Io { .. } => "io",
        }
    }
}

/// Find the `StoreError` anywhere in an anyhow error chain
pub fn classify(err: &anyhow::Error) -> Option<&StoreError> {
    err.chain().find_map(|cause| cause.downcast_ref::<StoreError>())
}
