// ABOUTME: Merge command implementation - collate many stores into one
// ABOUTME: Drives the merger with a progress bar and prints the per-source report

use crate::merge::{MergeOptions, MergeReport, Merger, SourceOutcome};
use crate::store::Table;
use anyhow::{bail, Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};

/// Merge `sources` into `destination` and report the outcome of each
///
/// Safe to run repeatedly against the same (or a growing) list of files:
/// only rows newer than the destination's watermark are appended.
///
/// # Arguments
///
/// * `destination` - Output store, created if missing
/// * `sources` - Plain or compressed stores, merged in the given order
/// * `options` - Version gate, force flag, and scratch directory
/// * `json` - Print the report as JSON instead of text
///
/// # Errors
///
/// Returns an error if the destination cannot be opened, or if at least one
/// source failed. Skipped sources do not cause an error.
pub fn merge(
    destination: &Path,
    sources: &[PathBuf],
    options: MergeOptions,
    json: bool,
) -> Result<()> {
    if sources.is_empty() {
        bail!("No source databases given");
    }

    tracing::info!(
        "Merging {} source(s) into {}",
        sources.len(),
        destination.display()
    );
    let mut merger = Merger::new(destination, options)
        .with_context(|| format!("Failed to open destination {}", destination.display()))?;

    let progress = ProgressBar::new(sources.len() as u64);
    progress.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")
            .context("Invalid progress bar template")?
            .progress_chars("##-"),
    );

    let report = merger.merge_all_with(sources, |source| {
        progress.set_message(source.path.display().to_string());
        progress.inc(1);
    });
    progress.finish_with_message("Merge complete");

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("Failed to serialize report")?
        );
    } else {
        for line in render_report(&report) {
            println!("{}", line);
        }
    }

    if report.has_failures() {
        bail!("{} source(s) failed to merge", report.failed());
    }
    Ok(())
}

/// Human-readable lines for a merge report
fn render_report(report: &MergeReport) -> Vec<String> {
    let mut lines = Vec::new();
    for source in &report.sources {
        let path = source.path.display();
        match &source.outcome {
            SourceOutcome::Merged { tables } => {
                let counts: Vec<String> = tables
                    .iter()
                    .map(|copy| format!("{}={}", copy.table, copy.rows_copied))
                    .collect();
                lines.push(format!("merged   {} ({})", path, counts.join(", ")));
            }
            SourceOutcome::Skipped { version } => {
                lines.push(format!("skipped  {} (version {})", path, version));
            }
            SourceOutcome::Failed { reason, .. } => {
                lines.push(format!("failed   {}: {}", path, reason));
            }
        }
    }

    let totals: Vec<String> = Table::ALL
        .iter()
        .map(|&table| format!("{}={}", table, report.rows_copied(table)))
        .collect();
    lines.push(format!(
        "{} merged, {} skipped, {} failed; rows copied: {}",
        report.merged(),
        report.skipped(),
        report.failed(),
        totals.join(", ")
    ));
    lines
}
