//! Per-connection descriptor matched against rules.

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::RulesError;

/// Transport of the connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    #[default]
    Tcp,
    Udp,
}

impl FromStr for Network {
    type Err = RulesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("tcp") {
            Ok(Self::Tcp)
        } else if s.eq_ignore_ascii_case("udp") {
            Ok(Self::Udp)
        } else {
            Err(RulesError::payload("NETWORK", format!("unknown network '{s}'")))
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Tcp => "TCP",
            Self::Udp => "UDP",
        })
    }
}

/// Protocol of the inbound listener that accepted the connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum InboundType {
    Http,
    Https,
    Socks4,
    Socks5,
    Shadowsocks,
    Vmess,
    Vless,
    Redir,
    Tproxy,
    Trojan,
    Tunnel,
    Tun,
    Tuic,
    Hysteria2,
    Anytls,
    #[default]
    Inner,
}

impl InboundType {
    pub const ALL: [InboundType; 16] = [
        Self::Http,
        Self::Https,
        Self::Socks4,
        Self::Socks5,
        Self::Shadowsocks,
        Self::Vmess,
        Self::Vless,
        Self::Redir,
        Self::Tproxy,
        Self::Trojan,
        Self::Tunnel,
        Self::Tun,
        Self::Tuic,
        Self::Hysteria2,
        Self::Anytls,
        Self::Inner,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Http => "HTTP",
            Self::Https => "HTTPS",
            Self::Socks4 => "SOCKS4",
            Self::Socks5 => "SOCKS5",
            Self::Shadowsocks => "SHADOWSOCKS",
            Self::Vmess => "VMESS",
            Self::Vless => "VLESS",
            Self::Redir => "REDIR",
            Self::Tproxy => "TPROXY",
            Self::Trojan => "TROJAN",
            Self::Tunnel => "TUNNEL",
            Self::Tun => "TUN",
            Self::Tuic => "TUIC",
            Self::Hysteria2 => "HYSTERIA2",
            Self::Anytls => "ANYTLS",
            Self::Inner => "INNER",
        }
    }

    /// Parse an IN-TYPE token. `SOCKS` expands to both SOCKS versions.
    pub fn parse_group(s: &str) -> Result<Vec<Self>, RulesError> {
        if s.eq_ignore_ascii_case("SOCKS") {
            return Ok(vec![Self::Socks4, Self::Socks5]);
        }
        Self::ALL
            .iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s))
            .map(|t| vec![*t])
            .ok_or_else(|| RulesError::payload("IN-TYPE", format!("unknown inbound type '{s}'")))
    }
}

impl fmt::Display for InboundType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Geo lookups memoized for one address during a single matching pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GeoAnnotation {
    /// Full country-code lookup from the database (first writer wins).
    pub lookup: Option<Vec<String>>,
    /// Category codes that matched in geo-data mode.
    pub matched: Vec<String>,
}

impl GeoAnnotation {
    pub fn is_empty(&self) -> bool {
        self.lookup.is_none() && self.matched.is_empty()
    }

    pub(crate) fn record_match(&mut self, code: &str) {
        if !self.matched.iter().any(|c| c == code) {
            self.matched.push(code.to_string());
        }
    }
}

/// Connection descriptor.
///
/// Built by the dispatch layer once per connection attempt; predicates only
/// write to the geo/ASN annotation caches.
#[derive(Debug, Clone, Default)]
pub struct Metadata {
    pub network: Network,
    pub inbound_type: InboundType,
    pub src_ip: Option<IpAddr>,
    pub dst_ip: Option<IpAddr>,
    pub src_port: u16,
    pub dst_port: u16,
    pub in_port: u16,
    /// Destination host name, when the client asked for one.
    pub host: Option<String>,
    /// Set once DNS resolution of `host` has been attempted for this pass.
    pub dns_resolved: bool,
    pub process: Option<String>,
    pub process_path: Option<String>,
    pub uid: Option<u32>,
    pub dscp: u8,
    pub in_name: Option<String>,
    pub in_user: Option<String>,
    pub alpn: Option<String>,
    pub user_agent: Option<String>,

    pub dst_geoip: GeoAnnotation,
    pub src_geoip: GeoAnnotation,
    pub dst_asn: Option<String>,
    pub src_asn: Option<String>,
}

impl Metadata {
    /// Descriptor for a TCP connection to `host:port`.
    pub fn for_host(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: Some(host.into()),
            dst_port: port,
            ..Default::default()
        }
    }

    /// Descriptor for a TCP connection to `ip:port`.
    pub fn for_ip(ip: IpAddr, port: u16) -> Self {
        Self {
            dst_ip: Some(ip),
            dst_port: port,
            ..Default::default()
        }
    }

    /// Host name used by domain rules; `None` for IP-only destinations.
    pub fn rule_host(&self) -> Option<&str> {
        self.host.as_deref().filter(|h| !h.is_empty())
    }

    pub(crate) fn ip(&self, source: bool) -> Option<IpAddr> {
        if source { self.src_ip } else { self.dst_ip }
    }

    pub(crate) fn geo_annotation(&mut self, source: bool) -> &mut GeoAnnotation {
        if source {
            &mut self.src_geoip
        } else {
            &mut self.dst_geoip
        }
    }

    pub(crate) fn asn_annotation(&mut self, source: bool) -> &mut Option<String> {
        if source {
            &mut self.src_asn
        } else {
            &mut self.dst_asn
        }
    }

    /// Destination rendered for logs: `host:port` or `ip:port`.
    pub fn remote_address(&self) -> String {
        match (self.rule_host(), self.dst_ip) {
            (Some(host), _) => format!("{host}:{}", self.dst_port),
            (None, Some(IpAddr::V6(ip))) => format!("[{ip}]:{}", self.dst_port),
            (None, Some(ip)) => format!("{ip}:{}", self.dst_port),
            (None, None) => format!(":{}", self.dst_port),
        }
    }

    /// Drop the per-pass geo/ASN caches before re-matching a descriptor.
    pub fn reset_annotations(&mut self) {
        self.dst_geoip = GeoAnnotation::default();
        self.src_geoip = GeoAnnotation::default();
        self.dst_asn = None;
        self.src_asn = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn network_parse_and_display() {
        assert_eq!("tcp".parse::<Network>().unwrap(), Network::Tcp);
        assert_eq!("UDP".parse::<Network>().unwrap(), Network::Udp);
        "icmp".parse::<Network>().unwrap_err();
        assert_eq!(Network::Udp.to_string(), "UDP");
    }

    #[test]
    fn inbound_type_groups() {
        assert_eq!(
            InboundType::parse_group("socks").unwrap(),
            vec![InboundType::Socks4, InboundType::Socks5]
        );
        assert_eq!(
            InboundType::parse_group("Tproxy").unwrap(),
            vec![InboundType::Tproxy]
        );
        InboundType::parse_group("carrier-pigeon").unwrap_err();
    }

    #[test]
    fn inbound_type_serde_names() {
        let json = serde_json::to_string(&InboundType::Hysteria2).unwrap();
        assert_eq!(json, "\"HYSTERIA2\"");
    }

    #[test]
    fn remote_address_forms() {
        assert_eq!(Metadata::for_host("example.com", 443).remote_address(), "example.com:443");
        let ip = IpAddr::V4(Ipv4Addr::new(1, 2, 3, 4));
        assert_eq!(Metadata::for_ip(ip, 80).remote_address(), "1.2.3.4:80");
        let v6: IpAddr = "::1".parse().unwrap();
        assert_eq!(Metadata::for_ip(v6, 53).remote_address(), "[::1]:53");
    }

    #[test]
    fn empty_host_is_not_a_rule_host() {
        let meta = Metadata::for_host("", 443);
        assert!(meta.rule_host().is_none());
    }

    #[test]
    fn annotation_records_once() {
        let mut ann = GeoAnnotation::default();
        assert!(ann.is_empty());
        ann.record_match("cn");
        ann.record_match("cn");
        assert_eq!(ann.matched, vec!["cn"]);
    }
}
