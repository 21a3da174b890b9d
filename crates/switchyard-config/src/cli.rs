//! CLI override definitions and application logic.

use clap::Parser;

use crate::Config;

#[derive(Debug, Clone, Parser, Default)]
pub struct CliOverrides {
    /// Override log level (trace/debug/info/warn/error)
    #[arg(long)]
    pub log_level: Option<String>,
    /// Override log format (pretty/compact/json)
    #[arg(long)]
    pub log_format: Option<String>,
    /// Override geo-data directory holding geoip/ and geosite/ lists
    #[arg(long)]
    pub geodata_dir: Option<String>,
    /// Override MaxMind country database path
    #[arg(long)]
    pub mmdb: Option<String>,
    /// Override geo lookup mode (mmdb/geodata)
    #[arg(long)]
    pub geodata_mode: Option<String>,
    /// Override metrics listen address
    #[arg(long)]
    pub metrics_listen: Option<String>,
}

pub fn apply_overrides(config: &mut Config, overrides: &CliOverrides) {
    if let Some(v) = &overrides.log_level {
        config.logging.level = Some(v.clone());
    }
    if let Some(v) = &overrides.log_format {
        config.logging.format = Some(v.clone());
    }
    if let Some(v) = &overrides.geodata_dir {
        config.geo.geodata_dir = v.clone();
    }
    if let Some(v) = &overrides.mmdb {
        config.geo.mmdb_path = Some(v.clone());
    }
    if let Some(v) = &overrides.geodata_mode {
        config.geo.mode = v.clone();
    }
    if let Some(v) = &overrides.metrics_listen {
        config.metrics.listen = Some(v.clone());
    }
}
