// ABOUTME: Providers command implementation - per-instance and per-provider statistics
// ABOUTME: Geolocates each measurement's address and histograms speeds and connect times

use crate::config::GeoipConfig;
use crate::geo::{self, GeoLookup};
use crate::store::{Store, Table};
use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Bytes per second in one megabit per second
const BYTES_PER_MBIT: f64 = 125_000.0;

/// Occurrence counts keyed by bucket
pub type Counter<K> = BTreeMap<K, u64>;

/// Histograms of one measurement table
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Histograms {
    /// Download speed, Mbit/s
    pub dload: Counter<i64>,
    /// Upload speed, Mbit/s
    pub upload: Counter<i64>,
    /// Connect time, milliseconds in 10 ms buckets
    pub rtt: Counter<i64>,
}

impl Histograms {
    fn record(&mut self, download: Option<f64>, upload: Option<f64>, connect: Option<f64>) {
        if let Some(speed) = download {
            *self.dload.entry(speed_bucket(speed)).or_default() += 1;
        }
        if let Some(speed) = upload {
            *self.upload.entry(speed_bucket(speed)).or_default() += 1;
        }
        if let Some(seconds) = connect {
            *self.rtt.entry(rtt_bucket(seconds)).or_default() += 1;
        }
    }

    fn absorb(&mut self, other: &Histograms) {
        merge_counters(&mut self.dload, &other.dload);
        merge_counters(&mut self.upload, &other.upload);
        merge_counters(&mut self.rtt, &other.rtt);
    }
}

/// Statistics of one network provider (organization)
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProviderStats {
    pub speedtest: Histograms,
    pub bittorrent: Histograms,
    pub addresses: Counter<String>,
    pub countries: Counter<String>,
    pub cities: Counter<String>,
}

impl ProviderStats {
    fn table_mut(&mut self, table: Table) -> &mut Histograms {
        match table {
            Table::Speedtest => &mut self.speedtest,
            Table::Bittorrent => &mut self.bittorrent,
        }
    }

    fn absorb(&mut self, other: &ProviderStats) {
        self.speedtest.absorb(&other.speedtest);
        self.bittorrent.absorb(&other.bittorrent);
        merge_counters(&mut self.addresses, &other.addresses);
        merge_counters(&mut self.countries, &other.countries);
        merge_counters(&mut self.cities, &other.cities);
    }
}

/// Per-provider statistics of one Neubot instance, keyed by organization
pub type InstanceStats = BTreeMap<String, ProviderStats>;

fn merge_counters<K: Ord + Clone>(into: &mut Counter<K>, from: &Counter<K>) {
    for (key, count) in from {
        *into.entry(key.clone()).or_default() += count;
    }
}

fn speed_bucket(bytes_per_second: f64) -> i64 {
    (bytes_per_second / BYTES_PER_MBIT).round() as i64
}

fn rtt_bucket(seconds: f64) -> i64 {
    (seconds * 100.0).round() as i64 * 10
}

/// Walks stores and accumulates statistics per instance (uuid)
pub struct Collector<'a> {
    geo: &'a dyn GeoLookup,
    instances: BTreeMap<String, InstanceStats>,
}

impl<'a> Collector<'a> {
    pub fn new(geo: &'a dyn GeoLookup) -> Self {
        Self {
            geo,
            instances: BTreeMap::new(),
        }
    }

    /// Add every row of every managed table of `store`
    ///
    /// Rows without an instance id are ignored; rows whose address has no
    /// known organization count toward the instance but not toward any provider.
    pub fn add_store(&mut self, store: &Store) -> Result<()> {
        for table in Table::ALL {
            self.add_table(store, table)
                .with_context(|| format!("Failed to walk table '{}'", table))?;
        }
        Ok(())
    }

    fn add_table(&mut self, store: &Store, table: Table) -> Result<()> {
        let mut stmt = store.connection().prepare(&format!(
            "SELECT uuid, real_address, download_speed, upload_speed, connect_time FROM {}",
            table
        ))?;
        let mut rows = stmt.query([])?;

        while let Some(row) = rows.next()? {
            let uuid: Option<String> = row.get(0)?;
            let Some(uuid) = uuid.filter(|u| !u.is_empty()) else {
                continue;
            };
            let instance = self.instances.entry(uuid).or_default();

            let address: Option<String> = row.get(1)?;
            let Some(address) = address else {
                continue;
            };
            let Some(record) = self.geo.by_address(&address) else {
                continue;
            };
            let Some(organization) = record.organization else {
                continue;
            };

            let provider = instance.entry(organization).or_default();
            *provider.addresses.entry(address).or_default() += 1;
            if let Some(country) = record.country_code {
                *provider.countries.entry(country).or_default() += 1;
            }
            if let Some(city) = record.city {
                *provider.cities.entry(city).or_default() += 1;
            }
            provider
                .table_mut(table)
                .record(row.get(2)?, row.get(3)?, row.get(4)?);
        }
        Ok(())
    }

    pub fn instances(&self) -> &BTreeMap<String, InstanceStats> {
        &self.instances
    }

    /// Fold every instance into totals per provider
    pub fn per_provider(&self) -> InstanceStats {
        let mut providers = InstanceStats::new();
        for instance in self.instances.values() {
            for (organization, stats) in instance {
                providers
                    .entry(organization.clone())
                    .or_default()
                    .absorb(stats);
            }
        }
        providers
    }
}

/// Print per-instance (or, with `per_provider`, per-provider) statistics
pub fn providers(
    paths: &[PathBuf],
    geoip: &GeoipConfig,
    per_provider: bool,
    pretty: bool,
) -> Result<()> {
    let lookup = geo::from_config(geoip)?;
    let mut collector = Collector::new(lookup.as_ref());

    for path in paths {
        tracing::info!("Walking {}", path.display());
        let store = Store::open(path)?;
        collector.add_store(&store)?;
    }

    let value = if per_provider {
        serde_json::to_value(collector.per_provider())
    } else {
        serde_json::to_value(collector.instances())
    }
    .context("Failed to serialize statistics")?;

    let text = if pretty {
        serde_json::to_string_pretty(&value)
    } else {
        serde_json::to_string(&value)
    }
    .context("Failed to serialize statistics")?;
    println!("{}", text);
    Ok(())
}
