//! Configuration type definitions for rules, providers, geo data, DNS,
//! metrics and logging.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::defaults::*;

/// Rule-provider configuration.
///
/// ```yaml
/// rule-providers:
///   ads:
///     type: http
///     behavior: domain
///     format: text
///     url: https://example.com/ads.txt
///     path: ./providers/ads.txt
///     interval: 3600
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RuleProviderConfig {
    /// Vehicle: "file", "http" or "inline".
    #[serde(rename = "type")]
    pub vehicle: String,
    /// Behavior: "domain", "ipcidr" or "classical".
    pub behavior: String,
    /// Payload format: "yaml", "text" or "binary".
    #[serde(default = "default_provider_format")]
    pub format: String,
    /// Local file (file vehicle) or on-disk cache (http vehicle).
    #[serde(default)]
    pub path: Option<String>,
    /// Remote URL (http vehicle).
    #[serde(default)]
    pub url: Option<String>,
    /// Refresh interval in seconds. 0 disables background refresh.
    #[serde(default = "default_provider_interval_secs")]
    pub interval: u64,
    /// Entries carried directly in the configuration (inline vehicle).
    #[serde(default)]
    pub payload: Vec<String>,
    /// Extra request headers (http vehicle).
    #[serde(default)]
    pub header: BTreeMap<String, String>,
    /// Request timeout in seconds (http vehicle).
    #[serde(default = "default_http_timeout_secs")]
    pub timeout: u64,
}

/// Geo data configuration for GEOIP, IP-ASN and GEOSITE rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct GeoConfig {
    /// "mmdb" (country codes from a MaxMind database) or "geodata"
    /// (per-category CIDR lists under `geodata-dir`).
    #[serde(default = "default_geo_mode")]
    pub mode: String,
    /// MaxMind country database.
    #[serde(default)]
    pub mmdb_path: Option<String>,
    /// MaxMind ASN database. Falls back to `mmdb-path` when unset.
    #[serde(default)]
    pub asn_path: Option<String>,
    /// Directory holding `geoip/<code>.txt` and `geosite/<code>.txt`.
    #[serde(default = "default_geodata_dir")]
    pub geodata_dir: String,
    /// Extra address treated as local by `GEOIP,lan`.
    #[serde(default)]
    pub fake_broadcast: Option<String>,
}

impl Default for GeoConfig {
    fn default() -> Self {
        Self {
            mode: default_geo_mode(),
            mmdb_path: None,
            asn_path: None,
            geodata_dir: default_geodata_dir(),
            fake_broadcast: None,
        }
    }
}

/// Resolver used when a rule needs the destination IP.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DnsConfig {
    /// "system" (read /etc/resolv.conf) or "custom" (use `servers`).
    #[serde(default = "default_dns_strategy")]
    pub strategy: String,
    /// Upstream servers: `udp://1.1.1.1`, `tcp://8.8.8.8:53`,
    /// `tls://1.1.1.1`, `https://1.1.1.1/dns-query` or a bare address.
    #[serde(default)]
    pub servers: Vec<String>,
    /// Resolver cache capacity.
    #[serde(default = "default_dns_cache_size")]
    pub cache_size: usize,
    /// Return an IPv4 address first when both families resolve.
    #[serde(default = "default_prefer_ipv4")]
    pub prefer_ipv4: bool,
}

impl Default for DnsConfig {
    fn default() -> Self {
        Self {
            strategy: default_dns_strategy(),
            servers: Vec::new(),
            cache_size: default_dns_cache_size(),
            prefer_ipv4: default_prefer_ipv4(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MetricsConfig {
    /// Prometheus exporter listen address, e.g. `127.0.0.1:9090`.
    pub listen: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    pub level: Option<String>,
    /// Log format: json, pretty, or compact. Default: pretty.
    pub format: Option<String>,
    /// Output target: stdout or stderr. Default: stderr.
    pub output: Option<String>,
    /// Per-module log level filters (e.g., {"switchyard_rules": "debug"}).
    #[serde(default)]
    pub filters: HashMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn geo_config_defaults() {
        let cfg = GeoConfig::default();
        assert_eq!(cfg.mode, "mmdb");
        assert_eq!(cfg.geodata_dir, "./geodata");
        assert!(cfg.mmdb_path.is_none());
        assert!(cfg.fake_broadcast.is_none());
    }

    #[test]
    fn provider_defaults() {
        let cfg: RuleProviderConfig = serde_yaml::from_str(
            r#"
type: file
behavior: domain
path: ./ads.yaml
"#,
        )
        .unwrap();
        assert_eq!(cfg.vehicle, "file");
        assert_eq!(cfg.format, "yaml");
        assert_eq!(cfg.interval, 86400);
        assert_eq!(cfg.timeout, 30);
        assert!(cfg.payload.is_empty());
        assert!(cfg.header.is_empty());
    }

    #[test]
    fn provider_full() {
        let cfg: RuleProviderConfig = toml::from_str(
            r#"
type = "http"
behavior = "ipcidr"
format = "text"
url = "https://example.com/cidr.txt"
path = "./cache/cidr.txt"
interval = 600

[header]
Authorization = "Bearer x"
"#,
        )
        .unwrap();
        assert_eq!(cfg.vehicle, "http");
        assert_eq!(cfg.url.as_deref(), Some("https://example.com/cidr.txt"));
        assert_eq!(cfg.interval, 600);
        assert_eq!(cfg.header.get("Authorization").map(String::as_str), Some("Bearer x"));
    }

    #[test]
    fn geo_kebab_keys() {
        let cfg: GeoConfig = serde_yaml::from_str(
            r#"
mode: geodata
geodata-dir: /srv/geo
fake-broadcast: 198.18.0.1
"#,
        )
        .unwrap();
        assert_eq!(cfg.mode, "geodata");
        assert_eq!(cfg.geodata_dir, "/srv/geo");
        assert_eq!(cfg.fake_broadcast.as_deref(), Some("198.18.0.1"));
    }

    #[test]
    fn dns_defaults() {
        let cfg: DnsConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.strategy, "system");
        assert_eq!(cfg.cache_size, 256);
        assert!(cfg.prefer_ipv4);
        assert!(cfg.servers.is_empty());
    }
}
