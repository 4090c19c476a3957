// ABOUTME: Store abstraction over a single Neubot measurement database
// ABOUTME: Resolves plain or compressed paths into live, migrated SQLite connections

pub mod archive;
pub mod migrate;
pub mod schema;
pub mod table;
pub mod version;

pub use archive::Compression;
pub use migrate::{migrate, read_version, CURRENT_VERSION};
pub use table::{Table, ID_COLUMN, ORDERING_COLUMN};
pub use version::SchemaVersion;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use rusqlite::{Connection, OpenFlags};
use tempfile::NamedTempFile;

use crate::error::StoreError;

/// An open, migrated measurement store
///
/// When the store was opened from a compressed archive, it owns the scratch
/// copy it reads from; the copy is removed when the store is dropped.
pub struct Store {
    // Declared before `scratch` so the connection closes before the file is unlinked
    conn: Connection,
    path: PathBuf,
    opened_version: SchemaVersion,
    scratch: Option<NamedTempFile>,
}

/// Outcome of [`OpenOptions::open_gated`]
pub enum Gated {
    /// Accepted and migrated to [`CURRENT_VERSION`]
    Open(Store),
    /// Rejected at this on-disk version; the store was closed untouched
    Rejected(SchemaVersion),
}

/// Options controlling how [`Store::open`] resolves a path
#[derive(Debug, Clone, Default)]
pub struct OpenOptions {
    create: bool,
    temp_dir: Option<PathBuf>,
}

impl OpenOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Initialize an empty store at the current version if the path is missing
    pub fn create(mut self, create: bool) -> Self {
        self.create = create;
        self
    }

    /// Directory for decompressed scratch copies (system temp dir if unset)
    pub fn temp_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.temp_dir = dir;
        self
    }

    /// Open the store at `path`
    ///
    /// Resolution order:
    /// 1. Missing path: create a new store if requested, else fail
    /// 2. Compressed archive (`.bz2`, `.gz`): decompress into a scratch file
    /// 3. Otherwise open the file directly
    ///
    /// The schema is always migrated to [`CURRENT_VERSION`] before returning.
    ///
    /// # Errors
    ///
    /// - [`StoreError::NotFound`] if the path is missing and creation was not requested
    /// - [`StoreError::NotAFile`] if the path exists but is not a regular file
    /// - [`StoreError::Io`] if decompression fails
    /// - [`StoreError::Migration`] if the schema version is unsupported
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # use anyhow::Result;
    /// # use neubot_collate::store::OpenOptions;
    /// # fn example() -> Result<()> {
    /// let destination = OpenOptions::new().create(true).open("database.sqlite3")?;
    /// let source = OpenOptions::new().open("neubot-2011-12.sqlite3.bz2")?;
    /// println!("source was at version {}", source.opened_version());
    /// # Ok(())
    /// # }
    /// ```
    pub fn open(&self, path: impl AsRef<Path>) -> Result<Store> {
        let path = path.as_ref();
        match self.open_gated(path, |_| true)? {
            Gated::Open(store) => Ok(store),
            Gated::Rejected(version) => bail!(
                "Store {} at version {} was not accepted",
                path.display(),
                version
            ),
        }
    }

    /// Open the store at `path` only if `accept` approves its on-disk version
    ///
    /// The version is read before any migration. A rejected store is closed
    /// without being modified, so an uncompressed legacy file keeps its
    /// version and is rejected again on the next run. Newly created stores
    /// are always accepted.
    ///
    /// # Errors
    ///
    /// Same as [`OpenOptions::open`].
    pub fn open_gated(
        &self,
        path: impl AsRef<Path>,
        accept: impl FnOnce(SchemaVersion) -> bool,
    ) -> Result<Gated> {
        let path = path.as_ref();
        let compression = Compression::from_path(path);

        match std::fs::metadata(path) {
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                if !self.create {
                    return Err(StoreError::NotFound {
                        path: path.to_path_buf(),
                    }
                    .into());
                }
                if compression.is_compressed() {
                    bail!("Cannot create a compressed store at {}", path.display());
                }
                return Store::create(path).map(Gated::Open);
            }
            Err(e) => return Err(StoreError::io(path, e).into()),
            Ok(metadata) if !metadata.is_file() => {
                return Err(StoreError::NotAFile {
                    path: path.to_path_buf(),
                }
                .into());
            }
            Ok(_) => {}
        }

        let (conn, scratch) = if compression.is_compressed() {
            tracing::info!("Decompressing {}", path.display());
            let scratch =
                archive::decompress_to_temp(path, compression, self.temp_dir.as_deref())?;
            let conn = open_existing(scratch.path())?;
            (conn, Some(scratch))
        } else {
            (open_existing(path)?, None)
        };

        tracing::debug!("Opened existing store {}", path.display());
        let found = read_version(&conn)
            .with_context(|| format!("Failed to migrate {}", path.display()))?;
        let mut store = Store {
            conn,
            path: path.to_path_buf(),
            opened_version: found,
            scratch,
        };
        if !accept(found) {
            return Ok(Gated::Rejected(found));
        }

        store.opened_version = migrate(&mut store.conn)
            .with_context(|| format!("Failed to migrate {}", path.display()))?;
        Ok(Gated::Open(store))
    }
}

fn open_existing(path: &Path) -> Result<Connection> {
    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
        | OpenFlags::SQLITE_OPEN_URI
        | OpenFlags::SQLITE_OPEN_NO_MUTEX;
    Connection::open_with_flags(path, flags)
        .with_context(|| format!("Failed to open {}", path.display()))
}

impl Store {
    /// Open an existing, uncompressed-or-compressed store with default options
    pub fn open(path: impl AsRef<Path>) -> Result<Store> {
        OpenOptions::new().open(path)
    }

    /// Create a new, empty store at the current schema version
    ///
    /// If initialization fails, a file created by this call is removed so the
    /// next attempt starts from a missing path again.
    pub fn create(path: &Path) -> Result<Store> {
        Self::create_with(path, schema::create_current)
    }

    fn create_with(
        path: &Path,
        init: impl FnOnce(&mut Connection) -> Result<()>,
    ) -> Result<Store> {
        tracing::info!("Creating new store {}", path.display());
        let existed = path.exists();
        let mut conn = Connection::open(path)
            .with_context(|| format!("Failed to create {}", path.display()))?;

        if let Err(e) = init(&mut conn) {
            drop(conn);
            if !existed {
                match std::fs::remove_file(path) {
                    Ok(()) => {}
                    Err(remove) if remove.kind() == std::io::ErrorKind::NotFound => {}
                    Err(remove) => tracing::warn!(
                        "Failed to remove half-created store {}: {}",
                        path.display(),
                        remove
                    ),
                }
            }
            return Err(e.context(format!("Failed to initialize {}", path.display())));
        }

        Ok(Store {
            conn,
            path: path.to_path_buf(),
            opened_version: CURRENT_VERSION,
            scratch: None,
        })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn connection_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }

    /// Path the store was opened from (the archive, for compressed stores)
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path of the scratch copy backing a compressed store
    pub fn scratch_path(&self) -> Option<&Path> {
        self.scratch.as_ref().map(|file| file.path())
    }

    /// Schema version found on disk before migration
    pub fn opened_version(&self) -> SchemaVersion {
        self.opened_version
    }

    /// All `config` entries
    pub fn config(&self) -> Result<BTreeMap<String, String>> {
        let mut stmt = self.conn.prepare("SELECT key, value FROM config")?;
        let entries = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, Option<String>>(1)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to read config table")?;
        Ok(entries
            .into_iter()
            .map(|(key, value)| (key, value.unwrap_or_default()))
            .collect())
    }

    /// Number of rows in `table`
    pub fn count(&self, table: Table) -> Result<i64> {
        self.conn
            .query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| {
                row.get(0)
            })
            .with_context(|| format!("Failed to count rows of '{}'", table))
    }
}
