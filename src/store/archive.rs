// ABOUTME: Detection and decompression of compressed store archives
// ABOUTME: Streams .bz2/.gz archives into private scratch files that delete themselves

use std::fs::File;
use std::io::{self, BufReader, Read, Write};
use std::path::Path;

use anyhow::Result;
use bzip2::read::BzDecoder;
use flate2::read::GzDecoder;
use tempfile::NamedTempFile;

use crate::error::StoreError;
use crate::utils::TEMP_PREFIX;

/// Compression applied to a store file, chosen by file-name suffix
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None,
    Gzip,
    Bzip2,
}

impl Compression {
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("bz2") => Compression::Bzip2,
            Some("gz") => Compression::Gzip,
            _ => Compression::None,
        }
    }

    pub fn is_compressed(self) -> bool {
        self != Compression::None
    }
}

/// Decompress `path` into a fresh scratch file
///
/// The scratch file lives in `temp_dir` (or the system temp directory) and is
/// removed when the returned handle is dropped, including on error paths.
///
/// # Errors
///
/// Returns a [`StoreError::Io`] if the archive cannot be read or is corrupt,
/// or if the scratch file cannot be written.
pub fn decompress_to_temp(
    path: &Path,
    compression: Compression,
    temp_dir: Option<&Path>,
) -> Result<NamedTempFile> {
    let input = File::open(path).map_err(|e| StoreError::io(path, e))?;
    let mut reader: Box<dyn Read> = match compression {
        Compression::Bzip2 => Box::new(BzDecoder::new(BufReader::new(input))),
        Compression::Gzip => Box::new(GzDecoder::new(BufReader::new(input))),
        Compression::None => Box::new(BufReader::new(input)),
    };

    let mut builder = tempfile::Builder::new();
    builder.prefix(TEMP_PREFIX).suffix(".sqlite3");
    let scratch = match temp_dir {
        Some(dir) => builder.tempfile_in(dir),
        None => builder.tempfile(),
    };
    let scratch_dir = temp_dir.unwrap_or(Path::new("."));
    let mut scratch = scratch.map_err(|e| StoreError::io(scratch_dir, e))?;

    let bytes =
        io::copy(&mut reader, scratch.as_file_mut()).map_err(|e| StoreError::io(path, e))?;
    scratch
        .as_file_mut()
        .flush()
        .map_err(|e| StoreError::io(scratch.path(), e))?;

    tracing::debug!(
        "Decompressed {} -> {} ({} bytes)",
        path.display(),
        scratch.path().display(),
        bytes
    );
    Ok(scratch)
}
