//! Metrics collection and Prometheus exporter for switchyard.
//!
//! Counters cover rule matches by rule type, provider refresh outcomes and
//! on-demand DNS resolutions. Recording is a no-op until a recorder is
//! installed, so the library crates can call these unconditionally.

use std::net::SocketAddr;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Initialize Prometheus metrics exporter.
///
/// Starts an HTTP server on the given address to expose metrics.
/// Returns an error message if binding fails.
pub fn init_prometheus(listen: &str) -> Result<(), String> {
    let addr: SocketAddr = listen
        .parse()
        .map_err(|e| format!("invalid metrics listen address: {}", e))?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| format!("failed to install prometheus exporter: {}", e))?;

    Ok(())
}

// ============================================================================
// Metric Names
// ============================================================================

/// Total number of rule matches, labelled by rule type.
pub const RULE_MATCHES_TOTAL: &str = "switchyard_rule_matches_total";
/// Total number of lookups that fell through to the implicit DIRECT target.
pub const RULE_FALLBACK_TOTAL: &str = "switchyard_rule_fallback_total";
/// Rule list evaluation time (seconds), including on-demand resolution.
pub const RULE_EVAL_DURATION_SECONDS: &str = "switchyard_rule_eval_duration_seconds";
/// Number of rules in the active rule list.
pub const RULE_LIST_RULES: &str = "switchyard_rule_list_rules";
/// Total number of rule list reloads by result.
pub const RULE_LIST_RELOADS_TOTAL: &str = "switchyard_rule_list_reloads_total";
/// Total number of provider refreshes by provider and result.
pub const PROVIDER_UPDATES_TOTAL: &str = "switchyard_provider_updates_total";
/// Number of entries a provider currently holds.
pub const PROVIDER_RULES: &str = "switchyard_provider_rules";
/// Total number of on-demand DNS resolutions by result.
pub const DNS_RESOLUTIONS_TOTAL: &str = "switchyard_dns_resolutions_total";
/// Total number of errors by type.
pub const ERRORS_TOTAL: &str = "switchyard_errors_total";

// ============================================================================
// Metric Recording Functions
// ============================================================================

/// Record a matched rule.
#[inline]
pub fn record_rule_match(rule_type: &'static str) {
    counter!(RULE_MATCHES_TOTAL, "rule_type" => rule_type).increment(1);
}

/// Record a lookup that matched no rule.
#[inline]
pub fn record_rule_fallback() {
    counter!(RULE_FALLBACK_TOTAL).increment(1);
}

#[inline]
pub fn record_rule_eval_duration(duration_secs: f64) {
    histogram!(RULE_EVAL_DURATION_SECONDS).record(duration_secs);
}

#[inline]
pub fn set_rule_list_rules(count: usize) {
    gauge!(RULE_LIST_RULES).set(count as f64);
}

/// Record a rule list reload ("updated" or an error label).
#[inline]
pub fn record_rule_list_reload(result: &'static str) {
    counter!(RULE_LIST_RELOADS_TOTAL, "result" => result).increment(1);
}

/// Record a provider refresh outcome.
///
/// `result` is one of the update labels (`updated`, `unchanged`, `skipped`)
/// or an error label (`fetch`, `parse`).
/// Note: This function allocates a String for the provider label.
#[inline]
pub fn record_provider_update(provider: &str, result: &'static str) {
    counter!(PROVIDER_UPDATES_TOTAL, "provider" => provider.to_owned(), "result" => result)
        .increment(1);
}

/// Set the number of entries a provider holds.
#[inline]
pub fn set_provider_rules(provider: &str, count: usize) {
    gauge!(PROVIDER_RULES, "provider" => provider.to_owned()).set(count as f64);
}

/// Record an on-demand resolution ("ok" or "error").
#[inline]
pub fn record_dns_resolution(result: &'static str) {
    counter!(DNS_RESOLUTIONS_TOTAL, "result" => result).increment(1);
}

/// Record an error by type.
#[inline]
pub fn record_error(error_type: &'static str) {
    counter!(ERRORS_TOTAL, "type" => error_type).increment(1);
}

// ============================================================================
// Label Constants (re-exported from switchyard-core)
// ============================================================================

pub use switchyard_core::{
    ERROR_CONFIG, ERROR_FETCH, ERROR_IO, ERROR_PARSE, ERROR_RESOLVE, UPDATE_SKIPPED,
    UPDATE_UNCHANGED, UPDATE_UPDATED,
};
