// ABOUTME: TOML configuration for merge defaults and GeoIP database locations
// ABOUTME: Values from the file are overridden by command-line flags

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::merge::{MergeOptions, DEFAULT_MIN_VERSION};
use crate::store::SchemaVersion;

/// Default output store for `merge`
pub const DEFAULT_OUTPUT: &str = "database.sqlite3";

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub merge: MergeConfig,
    #[serde(default)]
    pub geoip: GeoipConfig,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct MergeConfig {
    #[serde(default = "default_output")]
    pub output: PathBuf,
    #[serde(default = "default_min_version")]
    pub min_version: SchemaVersion,
    #[serde(default)]
    pub force: bool,
    pub temp_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct GeoipConfig {
    pub city_db: Option<PathBuf>,
    pub asn_db: Option<PathBuf>,
}

fn default_output() -> PathBuf {
    PathBuf::from(DEFAULT_OUTPUT)
}

fn default_min_version() -> SchemaVersion {
    DEFAULT_MIN_VERSION
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            output: default_output(),
            min_version: default_min_version(),
            force: false,
            temp_dir: None,
        }
    }
}

impl MergeConfig {
    pub fn options(&self) -> MergeOptions {
        MergeOptions {
            min_version: self.min_version,
            force: self.force,
            temp_dir: self.temp_dir.clone(),
        }
    }
}

/// Parse configuration from TOML text
pub fn parse_config(contents: &str) -> Result<Config> {
    toml::from_str(contents).context("Failed to parse configuration")
}

/// Load configuration from a TOML file
///
/// # Examples
///
/// ```no_run
/// # use neubot_collate::config::load_config_from_file;
/// # fn example() -> anyhow::Result<()> {
/// let config = load_config_from_file("collate.toml")?;
/// println!("merging into {}", config.merge.output.display());
/// # Ok(())
/// # }
/// ```
pub fn load_config_from_file(path: impl AsRef<Path>) -> Result<Config> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    parse_config(&contents).with_context(|| format!("Invalid config file {}", path.display()))
}
