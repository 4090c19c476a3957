// ABOUTME: Decimal schema version recorded in the config table of every store
// ABOUTME: Parses "4.0"-style text and compares numerically, so "4.10" < "4.2"

use std::fmt;
use std::str::FromStr;

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

const FRACTION_DIGITS: usize = 6;
const FRACTION_SCALE: u32 = 1_000_000;

/// Schema version of a store, compared as a decimal number
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SchemaVersion {
    major: u32,
    /// Fractional part scaled by `FRACTION_SCALE`
    fraction: u32,
}

impl SchemaVersion {
    /// Build a version with one decimal digit, e.g. `new(4, 0)` is "4.0"
    pub const fn new(major: u32, tenths: u32) -> Self {
        Self {
            major,
            fraction: tenths * (FRACTION_SCALE / 10),
        }
    }
}

impl FromStr for SchemaVersion {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let text = s.trim();
        let (major, fraction) = match text.split_once('.') {
            Some((major, fraction)) => (major, fraction),
            None => (text, ""),
        };

        if major.is_empty() || !major.bytes().all(|b| b.is_ascii_digit()) {
            bail!("Invalid schema version '{}'", s);
        }
        if !fraction.bytes().all(|b| b.is_ascii_digit()) {
            bail!("Invalid schema version '{}'", s);
        }

        let digits = fraction.trim_end_matches('0');
        if digits.len() > FRACTION_DIGITS {
            bail!("Schema version '{}' has too many decimal digits", s);
        }

        let major: u32 = major
            .parse()
            .map_err(|_| anyhow::anyhow!("Schema version '{}' is out of range", s))?;
        let fraction = if digits.is_empty() {
            0
        } else {
            let padded = format!("{:0<width$}", digits, width = FRACTION_DIGITS);
            padded
                .parse()
                .map_err(|_| anyhow::anyhow!("Invalid schema version '{}'", s))?
        };

        Ok(Self { major, fraction })
    }
}

impl fmt::Display for SchemaVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let padded = format!("{:0width$}", self.fraction, width = FRACTION_DIGITS);
        let digits = padded.trim_end_matches('0');
        if digits.is_empty() {
            write!(f, "{}.0", self.major)
        } else {
            write!(f, "{}.{}", self.major, digits)
        }
    }
}

impl TryFrom<String> for SchemaVersion {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<SchemaVersion> for String {
    fn from(version: SchemaVersion) -> Self {
        version.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> SchemaVersion {
        s.parse().unwrap()
    }

    #[test]
    fn test_parse_and_display() {
        assert_eq!(v("4.0").to_string(), "4.0");
        assert_eq!(v("2").to_string(), "2.0");
        assert_eq!(v(" 1.10 ").to_string(), "1.1");
        assert_eq!(v("3.25").to_string(), "3.25");
        assert_eq!(SchemaVersion::new(1, 2), v("1.2"));
    }

    #[test]
    fn test_decimal_ordering() {
        assert!(v("4.10") < v("4.2"));
        assert!(v("2.0") < v("10.0"));
        assert!(v("1.2") < v("2.0"));
        assert_eq!(v("2.0"), v("2.00"));
    }

    #[test]
    fn test_rejects_garbage() {
        for bad in ["", "abc", "1.x", "-1.0", ".5", "1.2.3", "1.1234567"] {
            assert!(bad.parse::<SchemaVersion>().is_err(), "accepted {:?}", bad);
        }
    }

    #[test]
    fn test_serde_as_string() {
        let json = serde_json::to_string(&v("2.0")).unwrap();
        assert_eq!(json, "\"2.0\"");
        let back: SchemaVersion = serde_json::from_str("\"3.0\"").unwrap();
        assert_eq!(back, v("3.0"));
    }
}
