//! MaxMind database backend for country and ASN lookups.

use std::net::IpAddr;
use std::path::Path;

use maxminddb::Reader;
use maxminddb::geoip2;

use crate::error::RulesError;
use crate::geo::{AsnInfo, AsnLookup, CountryLookup};

/// MaxMind DB reader answering country and ASN queries.
///
/// Country databases and city databases both work for country lookups; an
/// ASN database (GeoLite2-ASN or compatible) answers [`AsnLookup`].
pub struct GeoipDb {
    reader: Reader<Vec<u8>>,
}

impl GeoipDb {
    /// Load from a local `.mmdb` file.
    pub fn from_file(path: &Path) -> Result<Self, RulesError> {
        let reader = Reader::open_readfile(path).map_err(|e| {
            RulesError::GeoIp(format!(
                "failed to open GeoIP database {}: {e}",
                path.display()
            ))
        })?;
        Ok(Self { reader })
    }

    /// Load from raw bytes.
    pub fn from_bytes(data: Vec<u8>) -> Result<Self, RulesError> {
        let reader = Reader::from_source(data)
            .map_err(|e| RulesError::GeoIp(format!("failed to parse GeoIP database: {e}")))?;
        Ok(Self { reader })
    }

    /// Database type recorded in the file metadata (e.g. `GeoLite2-Country`).
    pub fn database_type(&self) -> &str {
        &self.reader.metadata.database_type
    }

    /// ISO country code for an address, upper-case as stored.
    ///
    /// Tries the Country record first, then the City record for
    /// city-level databases.
    pub fn country_code(&self, ip: IpAddr) -> Option<String> {
        if let Ok(result) = self.reader.lookup(ip)
            && let Ok(Some(country)) = result.decode::<geoip2::Country>()
            && let Some(code) = country.country.iso_code
        {
            return Some(code.to_string());
        }
        if let Ok(result) = self.reader.lookup(ip)
            && let Ok(Some(city)) = result.decode::<geoip2::City>()
            && let Some(code) = city.country.iso_code
        {
            return Some(code.to_string());
        }
        None
    }
}

impl CountryLookup for GeoipDb {
    fn country_codes(&self, ip: IpAddr) -> Vec<String> {
        self.country_code(ip)
            .map(|code| vec![code.to_ascii_lowercase()])
            .unwrap_or_default()
    }
}

impl AsnLookup for GeoipDb {
    fn asn(&self, ip: IpAddr) -> Option<AsnInfo> {
        let result = self.reader.lookup(ip).ok()?;
        let record = result.decode::<geoip2::Asn>().ok()??;
        let number = record.autonomous_system_number?;
        Some(AsnInfo {
            number,
            organization: record
                .autonomous_system_organization
                .unwrap_or_default()
                .to_string(),
        })
    }
}

impl std::fmt::Debug for GeoipDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeoipDb")
            .field("database_type", &self.database_type())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn geoip_db_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<GeoipDb>();
    }

    #[test]
    fn from_file_missing() {
        let err = GeoipDb::from_file(Path::new("/nonexistent/country.mmdb")).unwrap_err();
        assert!(matches!(err, RulesError::GeoIp(_)));
    }

    #[test]
    fn from_bytes_garbage() {
        GeoipDb::from_bytes(b"definitely not an mmdb".to_vec()).unwrap_err();
    }
}
