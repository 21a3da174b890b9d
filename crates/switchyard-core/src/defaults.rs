//! Default configuration values.
//!
//! Centralized default constants for use across all crates.

// ============================================================================
// Rule Provider Defaults
// ============================================================================

/// Default provider refresh interval in seconds (0 = never refresh).
pub const DEFAULT_PROVIDER_INTERVAL_SECS: u64 = 86400;
/// Shortest refresh interval accepted for a provider.
pub const MIN_PROVIDER_INTERVAL_SECS: u64 = 60;
/// Default HTTP fetch timeout for rule providers.
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;
/// User agent sent by HTTP vehicles.
pub const DEFAULT_HTTP_USER_AGENT: &str = concat!("switchyard/", env!("CARGO_PKG_VERSION"));
/// Default on-disk cache directory for HTTP providers without an explicit path.
pub const DEFAULT_PROVIDER_CACHE_DIR: &str = "./providers";
/// Default payload format for rule providers.
pub const DEFAULT_PROVIDER_FORMAT: &str = "yaml";

// ============================================================================
// Geo Defaults
// ============================================================================

/// Default geo lookup mode: "mmdb" or "geodata".
pub const DEFAULT_GEO_MODE: &str = "mmdb";
/// Default directory holding `geoip/` and `geosite/` category lists.
pub const DEFAULT_GEODATA_DIR: &str = "./geodata";
/// Sub-directory of the geo-data directory holding IP category lists.
pub const GEODATA_GEOIP_DIR: &str = "geoip";
/// Sub-directory of the geo-data directory holding site category lists.
pub const GEODATA_GEOSITE_DIR: &str = "geosite";
/// File extension of geo-data category lists.
pub const GEODATA_EXTENSION: &str = "txt";

// ============================================================================
// Rule Limits
// ============================================================================

/// Maximum number of `/`-separated entries in a port rule.
pub const MAX_PORT_RANGES: usize = 28;
/// Largest DSCP value (6 bits).
pub const MAX_DSCP: u8 = 63;

// ============================================================================
// Collaborator Defaults
// ============================================================================

/// Default ARP table path used by SRC-MAC rules.
pub const DEFAULT_ARP_TABLE_PATH: &str = "/proc/net/arp";
/// How long a parsed ARP table is reused before re-reading.
pub const DEFAULT_ARP_CACHE_TTL_SECS: u64 = 30;

// ============================================================================
// Logging Defaults
// ============================================================================

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";
/// Default log format: "pretty", "compact" or "json".
pub const DEFAULT_LOG_FORMAT: &str = "pretty";
/// Default log output: "stderr" or "stdout".
pub const DEFAULT_LOG_OUTPUT: &str = "stderr";

// ============================================================================
// DNS Defaults
// ============================================================================

/// Default DNS cache capacity.
pub const DEFAULT_DNS_CACHE_SIZE: usize = 256;
