// ABOUTME: Anonymize command implementation - blank addresses of non-shareable rows
// ABOUTME: Rewrites stores in place and vacuums so erased values leave the file

use crate::store::{Compression, Store, Table};
use anyhow::{bail, Context, Result};
use dialoguer::{theme::ColorfulTheme, Confirm};
use std::path::PathBuf;

/// Address written over every non-shareable address
pub const BLANK_ADDRESS: &str = "0.0.0.0";

/// Blank `internal_address` and `real_address` of rows without share consent
///
/// Rows whose `privacy_can_share` is not 1 (including NULL) are rewritten in
/// one transaction, then the file is vacuumed.
///
/// # Returns
///
/// Number of rows rewritten, across all managed tables.
pub fn anonymize_store(store: &mut Store) -> Result<usize> {
    let conn = store.connection_mut();
    let tx = conn.transaction().context("Failed to begin transaction")?;

    let mut rewritten = 0;
    for table in Table::ALL {
        let rows = tx
            .execute(
                &format!(
                    "UPDATE {} SET internal_address = ?1, real_address = ?1
                     WHERE IFNULL(privacy_can_share, 0) != 1",
                    table
                ),
                [BLANK_ADDRESS],
            )
            .with_context(|| format!("Failed to anonymize table '{}'", table))?;
        tracing::info!("  Anonymized {} row(s) in '{}'", rows, table);
        rewritten += rows;
    }
    tx.commit().context("Failed to commit anonymization")?;

    conn.execute_batch("VACUUM;")
        .context("Failed to vacuum store")?;
    Ok(rewritten)
}

/// Anonymize every store in `paths`, in place
///
/// Asks for confirmation first unless `skip_confirmation` is set.
///
/// # Errors
///
/// Returns an error if the user declines, a path is compressed (there would
/// be nothing to write back to), or a store cannot be rewritten.
pub fn anonymize(paths: &[PathBuf], skip_confirmation: bool) -> Result<()> {
    if paths.is_empty() {
        bail!("No databases given");
    }

    if !skip_confirmation {
        let confirmed = Confirm::with_theme(&ColorfulTheme::default())
            .with_prompt(format!(
                "Irreversibly blank non-shareable addresses in {} database(s)?",
                paths.len()
            ))
            .default(false)
            .interact()
            .context("Failed to read confirmation")?;
        if !confirmed {
            bail!("Anonymization cancelled by user");
        }
    }

    for path in paths {
        if Compression::from_path(path).is_compressed() {
            bail!(
                "Cannot anonymize compressed archive {} in place; decompress it first",
                path.display()
            );
        }
        let mut store = Store::open(path)?;
        tracing::info!("Anonymizing {}", path.display());
        let rows = anonymize_store(&mut store)?;
        tracing::info!("✓ {} row(s) anonymized in {}", rows, path.display());
    }
    Ok(())
}
