//! Async DNS resolver for switchyard.
//!
//! Rules such as `IP-CIDR` or `GEOIP` need the destination address. When a
//! connection only carries a host name, the dispatch layer resolves it
//! through [`ResolveIp`] and resumes rule evaluation. [`DnsResolver`] is the
//! caching implementation backed by
//! [`hickory-resolver`](https://crates.io/crates/hickory-resolver), with
//! support for custom nameservers (UDP/TCP), DNS-over-TLS, and
//! DNS-over-HTTPS.
//!
//! # Usage
//!
//! ```rust,no_run
//! use switchyard_dns::{DnsConfig, DnsResolver, ResolveIp};
//!
//! # async fn example() -> Result<(), switchyard_dns::DnsError> {
//! let config = DnsConfig::default(); // system resolver with cache
//! let resolver = DnsResolver::new(&config)?;
//!
//! let ip = resolver.resolve_ip("example.com").await?;
//! println!("resolved: {ip}");
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod resolver;

pub use config::{DnsConfig, DnsStrategy};
pub use error::DnsError;
pub use resolver::{DnsResolver, ResolveIp};
