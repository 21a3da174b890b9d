//! Configuration loading and CLI definitions.
//!
//! Files are chosen by extension: `.json`/`.jsonc` (comments allowed),
//! `.yaml`/`.yml` and `.toml`. Keys use kebab-case, e.g.
//!
//! ```yaml
//! rules:
//!   - DOMAIN-SUFFIX,ads.example.com,REJECT
//!   - RULE-SET,lan,DIRECT
//!   - MATCH,PROXY
//! proxies: [PROXY]
//! rule-providers:
//!   lan:
//!     type: inline
//!     behavior: ipcidr
//!     format: text
//!     payload: [192.168.0.0/16, 10.0.0.0/8]
//! ```

mod cli;
mod defaults;
mod loader;
mod types;
mod validate;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub use cli::{CliOverrides, apply_overrides};
pub use loader::{ConfigError, load_config, parse_config};
pub use types::*;
pub use validate::validate_config;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    /// Ordered rule lines; the first match wins.
    #[serde(default)]
    pub rules: Vec<String>,
    /// Named groups referenced by `SUB-RULE`.
    #[serde(default)]
    pub sub_rules: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub rule_providers: BTreeMap<String, RuleProviderConfig>,
    /// Adapter names rules may target besides the built-ins.
    #[serde(default)]
    pub proxies: Vec<String>,
    #[serde(default)]
    pub geo: GeoConfig,
    #[serde(default)]
    pub dns: DnsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}
