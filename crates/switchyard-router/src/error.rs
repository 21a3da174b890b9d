//! Router error types.

use switchyard_config::ConfigError;
use switchyard_dns::DnsError;
use switchyard_metrics::{ERROR_CONFIG, ERROR_FETCH, ERROR_RESOLVE};
use switchyard_rules::RulesError;

/// Router error type.
#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    #[error("config: {0}")]
    Config(#[from] ConfigError),
    #[error("rules: {0}")]
    Rules(#[from] RulesError),
    #[error("rule provider '{name}': {source}")]
    Provider {
        name: String,
        #[source]
        source: RulesError,
    },
    #[error("dns: {0}")]
    Dns(#[from] DnsError),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl RouterError {
    /// Get the error type string for metrics.
    pub fn error_type(&self) -> &'static str {
        match self {
            RouterError::Provider { source, .. } if source.is_fetch() => ERROR_FETCH,
            RouterError::Dns(_) => ERROR_RESOLVE,
            RouterError::Config(_)
            | RouterError::Rules(_)
            | RouterError::Provider { .. }
            | RouterError::InvalidArgument(_) => ERROR_CONFIG,
        }
    }
}
