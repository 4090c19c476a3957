// ABOUTME: CLI entry point for neubot-collate
// ABOUTME: Parses commands, layers flags over the config file, and routes to handlers

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use neubot_collate::commands;
use neubot_collate::config::{load_config_from_file, Config};
use neubot_collate::store::SchemaVersion;

/// Scratch files older than this are left over from killed runs
const STALE_SCRATCH_AGE: Duration = Duration::from_secs(86400);

#[derive(Parser)]
#[command(name = "neubot-collate")]
#[command(about = "Collate Neubot measurement databases into one store", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to a TOML config file with merge and GeoIP settings
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Merge source databases (plain, .gz or .bz2) into one output database
    Merge {
        /// Output database (default: database.sqlite3)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Skip sources whose schema version is at or below this (default: 2.0)
        #[arg(long, value_parser = parse_version)]
        min_version: Option<SchemaVersion>,
        /// Merge sources regardless of their schema version
        #[arg(short, long)]
        force: bool,
        /// Directory for decompressed scratch copies
        #[arg(long)]
        temp_dir: Option<PathBuf>,
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
        #[arg(required = true)]
        sources: Vec<PathBuf>,
    },
    /// Print a JSON summary of each database
    Info {
        /// Indent output and render timestamps as dates
        #[arg(long)]
        pretty: bool,
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Blank addresses of rows that may not be shared, in place
    Anonymize {
        /// Skip confirmation prompt
        #[arg(short = 'y', long)]
        yes: bool,
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Keep only rows within [since, until), in place
    Cut {
        /// First day kept (default: the epoch)
        #[arg(long)]
        since: Option<String>,
        /// First day dropped (default: now)
        #[arg(long)]
        until: Option<String>,
        /// Date format of --since and --until
        #[arg(long, default_value = commands::cut::DEFAULT_DATE_FORMAT)]
        format: String,
        file: PathBuf,
    },
    /// Print per-instance network provider statistics
    Providers {
        /// Aggregate across instances, keyed by provider
        #[arg(long)]
        per_provider: bool,
        /// Indent output
        #[arg(long)]
        pretty: bool,
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Print a content checksum of each table of each database
    Digest {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
}

fn parse_version(value: &str) -> Result<SchemaVersion, String> {
    value.parse().map_err(|e: anyhow::Error| e.to_string())
}

/// Directory this run decompresses into; `merge --temp-dir` wins over the config file
fn scratch_dir(command: &Commands, config: &Config) -> PathBuf {
    let flag = match command {
        Commands::Merge { temp_dir, .. } => temp_dir.clone(),
        _ => None,
    };
    flag.or_else(|| config.merge.temp_dir.clone())
        .unwrap_or_else(std::env::temp_dir)
}

fn main() -> anyhow::Result<()> {
    // Initialize logging - default to INFO level if RUST_LOG not set
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config_from_file(path)?,
        None => Config::default(),
    };

    // Decompressed copies from runs killed with SIGKILL stay behind
    let sweep_dir = scratch_dir(&cli.command, &config);
    if let Err(e) = neubot_collate::utils::cleanup_stale_temp_files(&sweep_dir, STALE_SCRATCH_AGE)
    {
        tracing::warn!("Failed to clean up stale scratch files: {}", e);
    }

    match cli.command {
        Commands::Merge {
            output,
            min_version,
            force,
            temp_dir,
            json,
            sources,
        } => {
            let mut options = config.merge.options();
            if let Some(version) = min_version {
                options.min_version = version;
            }
            options.force |= force;
            if temp_dir.is_some() {
                options.temp_dir = temp_dir;
            }
            let output = output.unwrap_or(config.merge.output);
            commands::merge(&output, &sources, options, json)
        }
        Commands::Info { pretty, files } => commands::info(&files, pretty),
        Commands::Anonymize { yes, files } => commands::anonymize(&files, yes),
        Commands::Cut {
            since,
            until,
            format,
            file,
        } => commands::cut(&file, since.as_deref(), until.as_deref(), &format),
        Commands::Providers {
            per_provider,
            pretty,
            files,
        } => commands::providers(&files, &config.geoip, per_provider, pretty),
        Commands::Digest { files } => commands::digest(&files),
    }
}
