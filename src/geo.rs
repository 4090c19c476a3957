// ABOUTME: Geolocation capability used by the provider statistics pass
// ABOUTME: A MaxMind-backed lookup and a null lookup, chosen explicitly at construction

use std::net::IpAddr;
use std::path::Path;

use anyhow::{Context, Result};
use maxminddb::{geoip2, MaxMindDBError, Reader};
use serde::Serialize;

use crate::config::GeoipConfig;

/// What is known about one network address
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GeoRecord {
    pub organization: Option<String>,
    pub country_code: Option<String>,
    pub city: Option<String>,
}

/// Address-to-location lookup
pub trait GeoLookup {
    /// Look up `address`; `None` means not found
    fn by_address(&self, address: &str) -> Option<GeoRecord>;
}

/// Lookup used when no geolocation database is configured
#[derive(Debug, Clone, Copy, Default)]
pub struct NullLookup;

impl GeoLookup for NullLookup {
    fn by_address(&self, _address: &str) -> Option<GeoRecord> {
        None
    }
}

/// Lookup backed by MaxMind City and ASN databases
///
/// Either database may be absent, in which case the fields it provides are
/// always `None`.
pub struct MaxMindLookup {
    city: Option<Reader<Vec<u8>>>,
    asn: Option<Reader<Vec<u8>>>,
}

impl MaxMindLookup {
    pub fn open(city_db: Option<&Path>, asn_db: Option<&Path>) -> Result<Self> {
        Ok(Self {
            city: city_db.map(open_reader).transpose()?,
            asn: asn_db.map(open_reader).transpose()?,
        })
    }

    fn organization(&self, ip: IpAddr) -> Option<String> {
        let reader = self.asn.as_ref()?;
        let asn: geoip2::Asn = lookup_or_log(reader, ip)?;
        match (
            asn.autonomous_system_number,
            asn.autonomous_system_organization,
        ) {
            (Some(number), Some(name)) => Some(format!("AS{} {}", number, name)),
            (Some(number), None) => Some(format!("AS{}", number)),
            (None, Some(name)) => Some(name.to_string()),
            (None, None) => None,
        }
    }

    fn location(&self, ip: IpAddr) -> (Option<String>, Option<String>) {
        let Some(reader) = self.city.as_ref() else {
            return (None, None);
        };
        let Some(record) = lookup_or_log::<geoip2::City>(reader, ip) else {
            return (None, None);
        };

        let country_code = record
            .country
            .and_then(|country| country.iso_code)
            .map(str::to_string);
        let city = record
            .city
            .and_then(|city| city.names)
            .and_then(|names| names.get("en").map(|name| name.to_string()));
        (country_code, city)
    }
}

impl GeoLookup for MaxMindLookup {
    fn by_address(&self, address: &str) -> Option<GeoRecord> {
        let ip: IpAddr = address.parse().ok()?;
        if ip.is_unspecified() {
            return None;
        }

        let organization = self.organization(ip);
        let (country_code, city) = self.location(ip);
        if organization.is_none() && country_code.is_none() && city.is_none() {
            return None;
        }
        Some(GeoRecord {
            organization,
            country_code,
            city,
        })
    }
}

fn open_reader(path: &Path) -> Result<Reader<Vec<u8>>> {
    Reader::open_readfile(path)
        .with_context(|| format!("Failed to open GeoIP database {}", path.display()))
}

fn lookup_or_log<'de, T>(reader: &'de Reader<Vec<u8>>, ip: IpAddr) -> Option<T>
where
    T: serde::Deserialize<'de>,
{
    match reader.lookup::<T>(ip) {
        Ok(record) => Some(record),
        Err(MaxMindDBError::AddressNotFoundError(_)) => None,
        Err(e) => {
            tracing::debug!("GeoIP lookup of {} failed: {}", ip, e);
            None
        }
    }
}

/// Build the lookup selected by configuration
///
/// Returns [`NullLookup`] when no database path is configured.
pub fn from_config(config: &GeoipConfig) -> Result<Box<dyn GeoLookup>> {
    if config.city_db.is_none() && config.asn_db.is_none() {
        tracing::warn!("⚠ No GeoIP database configured; addresses will not be geolocated");
        return Ok(Box::new(NullLookup));
    }
    let lookup = MaxMindLookup::open(config.city_db.as_deref(), config.asn_db.as_deref())?;
    Ok(Box::new(lookup))
}
