//! Switchyard router library.
//!
//! Glue between configuration and the rule engine: builds a
//! [`RuleList`](switchyard_rules::RuleList) from a
//! [`Config`](switchyard_config::Config), owns provider lifecycles and
//! routes connection descriptors, resolving destinations on demand.

pub mod cli;
mod error;
mod router;
mod rules;

pub use cli::{RouterArgs, init_tracing};
pub use error::RouterError;
pub use router::{Route, Router, RuleRef, run_with_shutdown};
pub use rules::{build_context, build_provider, build_rule_list, default_cache_path, load_providers};
pub use tokio_util::sync::CancellationToken;
