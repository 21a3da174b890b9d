//! Error types for the rule engine.

use thiserror::Error;

/// Errors that can occur while building rules or refreshing providers.
///
/// Matching itself never fails: a predicate that cannot be evaluated
/// reports "no match".
#[derive(Error, Debug)]
pub enum RulesError {
    #[error("parse error: {0}")]
    Parse(String),

    #[error("invalid rule type: {0}")]
    InvalidRuleType(String),

    #[error("invalid CIDR: {0}")]
    InvalidCidr(String),

    #[error("invalid payload for {kind}: {reason}")]
    InvalidPayload { kind: &'static str, reason: String },

    #[error("unknown rule-set: {0}")]
    UnknownRuleSet(String),

    #[error("unknown sub-rule group: {0}")]
    UnknownSubRule(String),

    #[error("sub-rule cycle: {0}")]
    SubRuleCycle(String),

    #[error("unknown adapter '{target}' referenced by {rule}")]
    UnknownAdapter { target: String, rule: String },

    #[error("rule provider error: {0}")]
    Provider(String),

    #[error("fetch failed for {source_name}: {reason}")]
    Fetch { source_name: String, reason: String },

    #[error("http error: {0}")]
    Http(String),

    #[error("geoip error: {0}")]
    GeoIp(String),

    #[error("geodata error: {0}")]
    GeoData(String),

    #[error("invalid range-set cache: {0}")]
    Binary(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("yaml parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl RulesError {
    pub(crate) fn payload(kind: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidPayload {
            kind,
            reason: reason.into(),
        }
    }

    /// True for failures a provider refresh recovers from by keeping its
    /// last-known-good snapshot (network, file and HTTP errors).
    pub fn is_fetch(&self) -> bool {
        matches!(self, Self::Fetch { .. } | Self::Http(_) | Self::Io(_))
    }
}
