//! Label constants for metrics and logging.
//!
//! These constants keep provider refresh outcomes and error classes
//! consistent between the rules engine, the router and the exporter.

/// Provider content changed and a new snapshot was published.
pub const UPDATE_UPDATED: &str = "updated";
/// Provider content was identical to the current snapshot.
pub const UPDATE_UNCHANGED: &str = "unchanged";
/// A refresh was already in flight; this tick was skipped.
pub const UPDATE_SKIPPED: &str = "skipped";
/// Fetching the provider content failed.
pub const ERROR_FETCH: &str = "fetch";
/// Parsing fetched content failed.
pub const ERROR_PARSE: &str = "parse";
/// I/O error.
pub const ERROR_IO: &str = "io";
/// DNS/address resolution error.
pub const ERROR_RESOLVE: &str = "resolve";
/// Configuration error.
pub const ERROR_CONFIG: &str = "config";
