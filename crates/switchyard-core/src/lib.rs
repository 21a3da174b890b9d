//! Core constants shared across switchyard crates.
//!
//! This crate provides:
//! - Default configuration values
//! - Result/error label constants for metrics and logging
//! - Common project metadata

pub mod defaults;
pub mod errors;

// Re-export commonly used items at crate root
pub use defaults::*;
pub use errors::*;

/// Project name.
pub const PROJECT_NAME: &str = "switchyard";
/// Project version (from Cargo.toml).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
