//! Address predicates: IP-CIDR, IP-SUFFIX, GEOIP and IP-ASN.

use std::net::IpAddr;
use std::sync::Arc;

use ipnet::IpNet;

use crate::error::RulesError;
use crate::geo::{AsnLookup, CountryLookup, IpMatcher, LanClassifier};
use crate::matcher::parse_cidr;
use crate::metadata::Metadata;

/// Membership in a single prefix.
#[derive(Debug, Clone)]
pub struct IpCidr {
    pub net: IpNet,
    pub src: bool,
}

impl IpCidr {
    pub fn parse(payload: &str, src: bool) -> Result<Self, RulesError> {
        Ok(Self {
            net: parse_cidr(payload)?,
            src,
        })
    }

    pub fn matches(&self, meta: &Metadata) -> bool {
        meta.ip(self.src)
            .is_some_and(|ip| self.net.contains(&ip.to_canonical()))
    }
}

/// Match on the low-order bits of an address.
///
/// `IP-SUFFIX,0.0.0.7/8` matches every IPv4 address whose last octet is 7.
#[derive(Debug, Clone)]
pub struct IpSuffix {
    addr: IpAddr,
    bits: u8,
    pub src: bool,
}

impl IpSuffix {
    pub fn parse(payload: &str, src: bool) -> Result<Self, RulesError> {
        let (addr, bits) = payload
            .trim()
            .split_once('/')
            .ok_or_else(|| RulesError::InvalidCidr(payload.to_string()))?;
        let addr: IpAddr = addr
            .parse()
            .map_err(|_| RulesError::InvalidCidr(payload.to_string()))?;
        let bits: u8 = bits
            .parse()
            .map_err(|_| RulesError::InvalidCidr(payload.to_string()))?;
        let max = if addr.is_ipv4() { 32 } else { 128 };
        if bits > max {
            return Err(RulesError::InvalidCidr(payload.to_string()));
        }
        Ok(Self { addr, bits, src })
    }

    pub fn matches(&self, meta: &Metadata) -> bool {
        let Some(ip) = meta.ip(self.src).map(|ip| ip.to_canonical()) else {
            return false;
        };
        match (self.addr, ip) {
            (IpAddr::V4(want), IpAddr::V4(got)) => {
                low_bits_equal(u32::from(want).into(), u32::from(got).into(), self.bits)
            }
            (IpAddr::V6(want), IpAddr::V6(got)) => {
                low_bits_equal(u128::from(want), u128::from(got), self.bits)
            }
            _ => false,
        }
    }
}

impl std::fmt::Display for IpSuffix {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.addr, self.bits)
    }
}

fn low_bits_equal(a: u128, b: u128, bits: u8) -> bool {
    if bits == 0 {
        return true;
    }
    let mask = if bits >= 128 {
        u128::MAX
    } else {
        (1u128 << bits) - 1
    };
    a & mask == b & mask
}

/// Where a GEOIP rule gets its answer from.
#[derive(Clone)]
pub enum GeoIpBackend {
    /// The reserved `lan` category.
    Lan(LanClassifier),
    /// Country database; `None` when no database is configured.
    Database(Option<Arc<dyn CountryLookup>>),
    /// Category list shared through the geo matcher cache.
    GeoData(Arc<IpMatcher>),
}

impl std::fmt::Debug for GeoIpBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Lan(lan) => f.debug_tuple("Lan").field(lan).finish(),
            Self::Database(db) => f.debug_tuple("Database").field(&db.is_some()).finish(),
            Self::GeoData(m) => f.debug_tuple("GeoData").field(&m.code()).finish(),
        }
    }
}

/// Country membership of the destination (or source) address.
#[derive(Debug, Clone)]
pub struct GeoIp {
    /// Lower-case code, with a leading `!` for inverted geo-data categories.
    pub code: String,
    pub backend: GeoIpBackend,
    pub src: bool,
}

impl GeoIp {
    pub fn matches(&self, meta: &mut Metadata) -> bool {
        let Some(ip) = meta.ip(self.src) else {
            return false;
        };
        match &self.backend {
            GeoIpBackend::Lan(lan) => lan.contains(ip),
            GeoIpBackend::GeoData(matcher) => {
                let annotation = meta.geo_annotation(self.src);
                if !matcher.is_reverse() && annotation.matched.iter().any(|c| c == matcher.code()) {
                    return true;
                }
                let hit = matcher.matches(ip);
                if hit && !matcher.is_reverse() {
                    annotation.record_match(matcher.code());
                }
                hit
            }
            GeoIpBackend::Database(db) => {
                let annotation = meta.geo_annotation(self.src);
                if let Some(codes) = &annotation.lookup {
                    return codes.iter().any(|c| *c == self.code);
                }
                let Some(db) = db else {
                    return false;
                };
                let codes = db.country_codes(ip);
                let hit = codes.iter().any(|c| *c == self.code);
                annotation.lookup = Some(codes);
                hit
            }
        }
    }

    /// Loaded record count, for observability.
    pub fn record_count(&self) -> usize {
        match &self.backend {
            GeoIpBackend::GeoData(m) => m.count(),
            _ => 0,
        }
    }
}

/// Autonomous-system number match.
#[derive(Clone)]
pub struct Asn {
    pub number: u32,
    pub lookup: Option<Arc<dyn AsnLookup>>,
    pub src: bool,
}

impl Asn {
    pub fn parse(
        payload: &str,
        lookup: Option<Arc<dyn AsnLookup>>,
        src: bool,
    ) -> Result<Self, RulesError> {
        let digits = payload.trim();
        let digits = digits
            .strip_prefix("AS")
            .or_else(|| digits.strip_prefix("as"))
            .unwrap_or(digits);
        let number = digits
            .parse()
            .map_err(|_| RulesError::payload("IP-ASN", format!("invalid ASN '{payload}'")))?;
        Ok(Self {
            number,
            lookup,
            src,
        })
    }

    pub fn matches(&self, meta: &mut Metadata) -> bool {
        let Some(ip) = meta.ip(self.src) else {
            return false;
        };
        let cached = meta.asn_annotation(self.src);
        if cached.is_none()
            && let Some(info) = self.lookup.as_ref().and_then(|db| db.asn(ip))
        {
            *cached = Some(info.to_string());
        }
        cached
            .as_deref()
            .and_then(|s| s.split_whitespace().next())
            .and_then(|n| n.parse::<u32>().ok())
            == Some(self.number)
    }
}

impl std::fmt::Debug for Asn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Asn")
            .field("number", &self.number)
            .field("src", &self.src)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::AsnInfo;
    use crate::matcher::RangeSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingDb {
        calls: AtomicUsize,
    }

    impl CountryLookup for CountingDb {
        fn country_codes(&self, ip: IpAddr) -> Vec<String> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            if ip.to_string().starts_with("1.") {
                vec!["cn".into()]
            } else {
                vec!["us".into()]
            }
        }
    }

    struct StaticAsn;

    impl AsnLookup for StaticAsn {
        fn asn(&self, _ip: IpAddr) -> Option<AsnInfo> {
            Some(AsnInfo {
                number: 13335,
                organization: "Cloudflare, Inc.".into(),
            })
        }
    }

    fn meta_dst(ip: &str) -> Metadata {
        Metadata::for_ip(ip.parse().unwrap(), 443)
    }

    #[test]
    fn cidr_dst_and_src() {
        let rule = IpCidr::parse("10.0.0.0/8", false).unwrap();
        assert!(rule.matches(&meta_dst("10.1.2.3")));
        assert!(!rule.matches(&meta_dst("11.0.0.1")));

        let src = IpCidr::parse("192.168.0.0/16", true).unwrap();
        let mut meta = meta_dst("8.8.8.8");
        assert!(!src.matches(&meta));
        meta.src_ip = Some("192.168.1.10".parse().unwrap());
        assert!(src.matches(&meta));
    }

    #[test]
    fn cidr_matches_v4_mapped() {
        let rule = IpCidr::parse("10.0.0.0/8", false).unwrap();
        assert!(rule.matches(&meta_dst("::ffff:10.0.0.1")));
    }

    #[test]
    fn cidr_without_ip_never_matches() {
        let rule = IpCidr::parse("0.0.0.0/0", false).unwrap();
        assert!(!rule.matches(&Metadata::for_host("example.com", 443)));
    }

    #[test]
    fn suffix_low_bits() {
        let rule = IpSuffix::parse("0.0.0.7/8", false).unwrap();
        assert!(rule.matches(&meta_dst("10.20.30.7")));
        assert!(!rule.matches(&meta_dst("10.20.30.8")));
        assert!(!rule.matches(&meta_dst("::7")));
        IpSuffix::parse("1.2.3.4/33", false).unwrap_err();
        IpSuffix::parse("1.2.3.4", false).unwrap_err();
    }

    #[test]
    fn geoip_database_lookup_is_cached_per_pass() {
        let db = Arc::new(CountingDb {
            calls: AtomicUsize::new(0),
        });
        let shared: Arc<dyn CountryLookup> = db.clone();
        let rule = |code: &str| GeoIp {
            code: code.into(),
            backend: GeoIpBackend::Database(Some(shared.clone())),
            src: false,
        };
        let mut meta = meta_dst("1.2.3.4");
        assert!(!rule("us").matches(&mut meta));
        assert!(rule("cn").matches(&mut meta));
        assert_eq!(db.calls.load(Ordering::Relaxed), 1);
        assert_eq!(meta.dst_geoip.lookup.as_deref(), Some(&["cn".to_string()][..]));
    }

    #[test]
    fn geoip_without_database_never_matches() {
        let rule = GeoIp {
            code: "cn".into(),
            backend: GeoIpBackend::Database(None),
            src: false,
        };
        assert!(!rule.matches(&mut meta_dst("1.2.3.4")));
    }

    #[test]
    fn geoip_lan() {
        let lan = LanClassifier::new(Some("198.18.255.255".parse().unwrap()));
        let rule = GeoIp {
            code: "lan".into(),
            backend: GeoIpBackend::Lan(lan),
            src: false,
        };
        assert!(rule.matches(&mut meta_dst("192.168.1.1")));
        assert!(rule.matches(&mut meta_dst("198.18.255.255")));
        assert!(!rule.matches(&mut meta_dst("8.8.8.8")));
    }

    #[test]
    fn geoip_geodata_records_match() {
        let set = RangeSet::from_nets(["1.0.0.0/8".parse().unwrap()]);
        let rule = GeoIp {
            code: "cn".into(),
            backend: GeoIpBackend::GeoData(Arc::new(IpMatcher::new("cn", set, false))),
            src: false,
        };
        let mut meta = meta_dst("1.1.1.1");
        assert!(rule.matches(&mut meta));
        assert_eq!(meta.dst_geoip.matched, vec!["cn"]);
    }

    #[test]
    fn asn_match_and_cache() {
        let rule = Asn::parse("AS13335", Some(Arc::new(StaticAsn)), false).unwrap();
        let mut meta = meta_dst("1.1.1.1");
        assert!(rule.matches(&mut meta));
        assert_eq!(meta.dst_asn.as_deref(), Some("13335 Cloudflare, Inc."));

        let other = Asn::parse("15169", None, false).unwrap();
        assert!(!other.matches(&mut meta));
        Asn::parse("google", None, false).unwrap_err();
    }
}
