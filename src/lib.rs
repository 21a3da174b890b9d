//! # switchyard
//!
//! Rule-based connection routing: ordered rule lines, hot-reloaded rule
//! providers and geo matchers decide which adapter each connection goes to.
//!
//! ## Crates
//!
//! - [`switchyard_core`] - Shared defaults and label constants
//! - [`switchyard_rules`] - Matchers, rules, rule providers and the rule list
//! - [`switchyard_config`] - Configuration loading and validation
//! - [`switchyard_dns`] - On-demand destination resolution
//! - [`switchyard_metrics`] - Prometheus-compatible metrics
//! - [`switchyard_router`] - Configuration-driven router and CLI

pub use switchyard_config as config;
pub use switchyard_core as core;
pub use switchyard_dns as dns;
pub use switchyard_metrics as metrics;
pub use switchyard_router as router;
pub use switchyard_rules as rules;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use switchyard_config::{Config, load_config, validate_config};
    pub use switchyard_dns::{DnsResolver, ResolveIp};
    pub use switchyard_router::{CancellationToken, Route, Router, RouterError, build_rule_list};
    pub use switchyard_rules::{
        Decision, HotRuleList, Metadata, Network, RuleList, RuleListBuilder, RuleProvider,
    };
}
