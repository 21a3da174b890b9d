//! Parsed provider content, one shape per behavior.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::RulesError;
use crate::matcher::{DomainSet, DomainSetBuilder, RangeSet, parse_cidr};
use crate::metadata::Metadata;
use crate::parser::{ParseContext, PayloadFormat, RuleParser, read_entries};
use crate::rule::Rule;

/// How a provider's entries are interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Behavior {
    /// Domain names: `+.x` also matches sub-domains, `.x` only
    /// sub-domains, and a `*` label stands for any one label.
    Domain,
    /// CIDR prefixes.
    #[serde(alias = "ip-cidr")]
    IpCidr,
    /// Target-less rule lines of any leaf or combinator kind.
    Classical,
}

impl FromStr for Behavior {
    type Err = RulesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "domain" => Ok(Self::Domain),
            "ipcidr" | "ip-cidr" => Ok(Self::IpCidr),
            "classical" => Ok(Self::Classical),
            other => Err(RulesError::Provider(format!("unsupported behavior: {other}"))),
        }
    }
}

impl fmt::Display for Behavior {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Domain => "domain",
            Self::IpCidr => "ipcidr",
            Self::Classical => "classical",
        })
    }
}

/// Immutable matching structure built from one fetch.
#[derive(Debug)]
pub enum Strategy {
    Domain(DomainSet),
    IpCidr(RangeSet),
    Classical(Classical),
}

/// Rules of a classical provider with their aggregated lookup needs.
#[derive(Debug)]
pub struct Classical {
    rules: Vec<Rule>,
    resolve_ip: bool,
    find_process: bool,
}

impl Classical {
    pub fn new(rules: Vec<Rule>) -> Self {
        let resolve_ip = rules.iter().any(Rule::should_resolve_ip);
        let find_process = rules.iter().any(Rule::should_find_process);
        Self {
            rules,
            resolve_ip,
            find_process,
        }
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }
}

impl Strategy {
    /// Parse raw content according to `behavior` and `format`.
    ///
    /// Unusable domain and classical entries are logged and skipped; a
    /// bad CIDR or a malformed document fails the whole build.
    pub fn build(
        behavior: Behavior,
        format: PayloadFormat,
        content: &[u8],
        ctx: &ParseContext,
    ) -> Result<Self, RulesError> {
        if format == PayloadFormat::Binary {
            if behavior != Behavior::IpCidr {
                return Err(RulesError::Provider(format!(
                    "binary payloads are only supported for ipcidr, not {behavior}"
                )));
            }
            return RangeSet::read_from(content).map(Self::IpCidr);
        }

        let entries = read_entries(format, content)?;
        match behavior {
            Behavior::Domain => Ok(Self::Domain(domain_set(&entries))),
            Behavior::IpCidr => {
                let mut set = RangeSet::new();
                for entry in &entries {
                    set.insert_net(&parse_cidr(entry)?);
                }
                set.merge();
                Ok(Self::IpCidr(set))
            }
            Behavior::Classical => {
                let parser = RuleParser::classical(ctx);
                let rules = entries
                    .iter()
                    .filter_map(|entry| match parser.parse_entry(entry) {
                        Ok(rule) => Some(rule),
                        Err(e) => {
                            warn!(entry = %entry, error = %e, "skipping invalid classical entry");
                            None
                        }
                    })
                    .collect();
                Ok(Self::Classical(Classical::new(rules)))
            }
        }
    }

    /// Membership test. `src` switches IP matching to the source address.
    pub fn matches(&self, meta: &mut Metadata, src: bool) -> bool {
        match self {
            Self::Domain(set) => meta.rule_host().is_some_and(|host| set.has(host)),
            Self::IpCidr(set) => meta.ip(src).is_some_and(|ip| set.contains(ip)),
            Self::Classical(classical) => classical
                .rules
                .iter()
                .any(|rule| rule.matches(meta).is_some()),
        }
    }

    pub fn behavior(&self) -> Behavior {
        match self {
            Self::Domain(_) => Behavior::Domain,
            Self::IpCidr(_) => Behavior::IpCidr,
            Self::Classical(_) => Behavior::Classical,
        }
    }

    /// Number of entries (merged ranges for ipcidr).
    pub fn count(&self) -> usize {
        match self {
            Self::Domain(set) => set.len(),
            Self::IpCidr(set) => set.len(),
            Self::Classical(classical) => classical.rules.len(),
        }
    }

    pub fn should_resolve_ip(&self) -> bool {
        match self {
            Self::Domain(_) => false,
            Self::IpCidr(_) => true,
            Self::Classical(classical) => classical.resolve_ip,
        }
    }

    pub fn should_find_process(&self) -> bool {
        match self {
            Self::Classical(classical) => classical.find_process,
            _ => false,
        }
    }
}

fn domain_set(entries: &[String]) -> DomainSet {
    let mut builder = DomainSetBuilder::new();
    for entry in entries {
        if let Err(e) = builder.add(entry) {
            warn!(entry = %entry, error = %e, "skipping invalid domain entry");
        }
    }
    builder.build()
}
