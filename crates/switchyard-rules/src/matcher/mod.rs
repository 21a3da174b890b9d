//! Matching structures shared by rules and providers.

pub(crate) mod bitmap;
pub mod domain_set;
pub mod keyword;
pub mod range_set;

pub use domain_set::{DomainSet, DomainSetBuilder};
pub use keyword::KeywordMatcher;
pub use range_set::{RangeSet, parse_cidr};
