//! Geo lookups used by GEOIP, GEOSITE and IP-ASN rules.
//!
//! Two backends exist. In [`GeoMode::Mmdb`] GEOIP asks a
//! [`CountryLookup`] (a MaxMind database) for the codes of an address. In
//! [`GeoMode::GeoData`] each category is a list loaded through a
//! [`GeoDataLoader`] into a shared [`GeoMatcherCache`] entry. GEOSITE
//! always uses the cache.

pub mod cache;
pub mod loader;
#[cfg(feature = "geoip")]
pub mod mmdb;

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::RulesError;

pub use cache::{GeoMatcherCache, IpMatcher, SiteMatcher};
pub use loader::{DirGeoDataLoader, GeoDataLoader, GeoSiteEntry};
#[cfg(feature = "geoip")]
pub use mmdb::GeoipDb;

/// Reserved GEOIP category for local and special-purpose addresses.
pub const LAN_CODE: &str = "lan";

/// Which backend GEOIP rules use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GeoMode {
    #[default]
    Mmdb,
    #[serde(alias = "geo-data")]
    GeoData,
}

impl FromStr for GeoMode {
    type Err = RulesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mmdb" => Ok(Self::Mmdb),
            "geodata" | "geo-data" => Ok(Self::GeoData),
            other => Err(RulesError::GeoData(format!("unknown geo mode '{other}'"))),
        }
    }
}

impl fmt::Display for GeoMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Mmdb => "mmdb",
            Self::GeoData => "geodata",
        })
    }
}

/// Country-code database keyed by address.
pub trait CountryLookup: Send + Sync {
    /// Lower-case country codes for `ip`; empty when unknown.
    fn country_codes(&self, ip: IpAddr) -> Vec<String>;
}

/// Autonomous-system record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AsnInfo {
    pub number: u32,
    pub organization: String,
}

impl fmt::Display for AsnInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.organization.is_empty() {
            write!(f, "{}", self.number)
        } else {
            write!(f, "{} {}", self.number, self.organization)
        }
    }
}

/// ASN database keyed by address.
pub trait AsnLookup: Send + Sync {
    fn asn(&self, ip: IpAddr) -> Option<AsnInfo>;
}

/// Classifier for the reserved `lan` category.
///
/// Covers private, loopback, link-local, multicast and unspecified
/// addresses of both families, plus an optional deployment-specific
/// broadcast sentinel (for example the broadcast address of a TUN
/// interface's fake-IP range).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LanClassifier {
    pub fake_broadcast: Option<IpAddr>,
}

impl LanClassifier {
    pub fn new(fake_broadcast: Option<IpAddr>) -> Self {
        Self { fake_broadcast }
    }

    pub fn contains(&self, ip: IpAddr) -> bool {
        let ip = ip.to_canonical();
        if self.fake_broadcast.map(|b| b.to_canonical()) == Some(ip) {
            return true;
        }
        match ip {
            IpAddr::V4(v4) => {
                v4.is_private()
                    || v4.is_loopback()
                    || v4.is_link_local()
                    || v4.is_multicast()
                    || v4.is_unspecified()
            }
            IpAddr::V6(v6) => {
                let first = v6.segments()[0];
                v6.is_loopback()
                    || v6.is_multicast()
                    || v6.is_unspecified()
                    // fc00::/7 unique local
                    || (first & 0xfe00) == 0xfc00
                    // fe80::/10 link local
                    || (first & 0xffc0) == 0xfe80
            }
        }
    }
}
