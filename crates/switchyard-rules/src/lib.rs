//! Rule matching and routing engine for switchyard.
//!
//! Rule lines such as `DOMAIN-SUFFIX,example.com,PROXY` or
//! `AND,((NETWORK,UDP),(DST-PORT,443)),QUIC` are parsed once into a
//! [`RuleList`]; each connection [`Metadata`] is then matched against it in
//! order and the first matching rule supplies the target adapter.
//!
//! # Architecture
//!
//! - **Matchers**: [`DomainSet`](matcher::DomainSet) (succinct suffix trie),
//!   [`RangeSet`](matcher::RangeSet) (merged address intervals),
//!   [`KeywordMatcher`](matcher::KeywordMatcher) (Aho-Corasick)
//! - **Geo**: a shared [`GeoMatcherCache`](geo::GeoMatcherCache) for
//!   GEOIP/GEOSITE categories plus MaxMind lookups
//! - **Rules**: one [`RuleKind`](rule::RuleKind) per predicate kind, with
//!   AND/OR/NOT/SUB-RULE combinators
//! - **Providers**: [`RuleProvider`] fetches rule content through a file,
//!   HTTP or inline vehicle and hot-swaps it
//!
//! # Example
//!
//! ```
//! use switchyard_rules::{Decision, Metadata, ParseContext, RuleListBuilder};
//!
//! let ctx = ParseContext::default();
//! let list = RuleListBuilder::new(&ctx)
//!     .build([
//!         "DOMAIN-SUFFIX,ads.example.com,REJECT",
//!         "AND,((NETWORK,UDP),(DST-PORT,443)),DIRECT",
//!         "MATCH,PROXY",
//!     ])
//!     .unwrap();
//!
//! let mut meta = Metadata::for_host("tracker.ads.example.com", 443);
//! assert_eq!(list.evaluate(&mut meta).target(), Some("REJECT"));
//!
//! let mut meta = Metadata::for_host("video.example.org", 443);
//! assert!(matches!(list.evaluate(&mut meta), Decision::Matched(m) if m.target == "PROXY"));
//! ```

pub mod error;
pub mod geo;
pub mod mac;
pub mod matcher;
pub mod metadata;
pub mod parser;
pub mod provider;
pub mod rule;
pub mod rule_list;

pub use error::RulesError;
pub use metadata::{InboundType, Metadata, Network};
pub use parser::{ParseContext, ProviderMap, RuleParser};
pub use provider::{Behavior, ProviderInfo, ProviderState, RuleProvider, UpdateOutcome};
pub use rule::{Rule, RuleType};
pub use rule_list::{Decision, HotRuleList, MatchedRule, RuleList, RuleListBuilder};
