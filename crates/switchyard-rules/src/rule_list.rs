//! Ordered, first-match-wins rule lists.

use std::collections::BTreeMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use rustc_hash::FxHashSet;
use tracing::debug;

use crate::error::RulesError;
use crate::metadata::Metadata;
use crate::parser::{ParseContext, ProviderMap, RuleParser, SubRuleMap, build_sub_rule_groups};
use crate::provider::RuleProvider;
use crate::rule::{Rule, RuleKind, RuleType};

/// Adapters every configuration knows about.
pub const BUILTIN_ADAPTERS: [&str; 5] = ["DIRECT", "REJECT", "REJECT-DROP", "PASS", "COMPATIBLE"];

/// Target used when no rule matches.
pub const FALLBACK_TARGET: &str = "DIRECT";

/// The rule that produced a decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchedRule {
    pub index: usize,
    pub rule_type: RuleType,
    pub payload: String,
    pub target: String,
}

/// Outcome of evaluating a descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Matched(MatchedRule),
    /// Rule `resume_at` wants a resolved destination address the
    /// descriptor lacks. Resolve, set `dns_resolved`, and call
    /// [`RuleList::evaluate_from`] with the same index.
    NeedIp { resume_at: usize },
    /// Nothing matched; route to [`FALLBACK_TARGET`].
    NoMatch,
}

impl Decision {
    /// Target to dispatch to, or `None` while resolution is pending.
    pub fn target(&self) -> Option<&str> {
        match self {
            Self::Matched(rule) => Some(&rule.target),
            Self::NoMatch => Some(FALLBACK_TARGET),
            Self::NeedIp { .. } => None,
        }
    }
}

/// Immutable, fully built rule list.
#[derive(Debug)]
pub struct RuleList {
    rules: Vec<Rule>,
    providers: ProviderMap,
    sub_rules: SubRuleMap,
    find_process: bool,
}

impl RuleList {
    /// Evaluate from the first rule.
    pub fn evaluate(&self, meta: &mut Metadata) -> Decision {
        self.evaluate_from(meta, 0)
    }

    /// Evaluate starting at rule `start`.
    pub fn evaluate_from(&self, meta: &mut Metadata, start: usize) -> Decision {
        for (index, rule) in self.rules.iter().enumerate().skip(start) {
            if rule.should_resolve_ip()
                && meta.dst_ip.is_none()
                && meta.rule_host().is_some()
                && !meta.dns_resolved
            {
                return Decision::NeedIp { resume_at: index };
            }
            if let Some(target) = rule.matches(meta) {
                return Decision::Matched(MatchedRule {
                    index,
                    rule_type: rule.rule_type(),
                    payload: rule.payload().to_string(),
                    target: target.to_string(),
                });
            }
        }
        Decision::NoMatch
    }

    /// Evaluate synchronously, never resolving: IP rules see whatever
    /// address the descriptor already carries.
    pub fn evaluate_offline(&self, meta: &mut Metadata) -> Decision {
        let resolved = meta.dns_resolved;
        meta.dns_resolved = true;
        let decision = self.evaluate(meta);
        meta.dns_resolved = resolved;
        decision
    }

    /// True when any rule inspects process name, path or UID.
    pub fn should_find_process(&self) -> bool {
        self.find_process
    }

    /// True when any rule may ask for a resolved address.
    pub fn should_resolve_ip(&self) -> bool {
        self.rules.iter().any(Rule::should_resolve_ip)
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    pub fn providers(&self) -> impl Iterator<Item = &Arc<RuleProvider>> {
        self.providers.values()
    }

    pub fn provider(&self, name: &str) -> Option<&Arc<RuleProvider>> {
        self.providers.get(name)
    }

    pub fn provider_count(&self) -> usize {
        self.providers.len()
    }

    pub fn sub_rule_group_count(&self) -> usize {
        self.sub_rules.len()
    }
}

/// Builds a [`RuleList`] from rule lines.
pub struct RuleListBuilder<'a> {
    ctx: &'a ParseContext,
    providers: ProviderMap,
    groups: BTreeMap<String, Vec<String>>,
    adapters: Option<FxHashSet<String>>,
}

impl<'a> RuleListBuilder<'a> {
    pub fn new(ctx: &'a ParseContext) -> Self {
        Self {
            ctx,
            providers: ProviderMap::default(),
            groups: BTreeMap::new(),
            adapters: None,
        }
    }

    /// Providers visible to RULE-SET lines; they should already be loaded.
    pub fn providers(mut self, providers: ProviderMap) -> Self {
        self.providers = providers;
        self
    }

    pub fn sub_rule_groups(mut self, groups: BTreeMap<String, Vec<String>>) -> Self {
        self.groups = groups;
        self
    }

    /// Known adapter names. When set, every target must be one of these
    /// or a built-in.
    pub fn adapters<I, S>(mut self, adapters: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.adapters = Some(adapters.into_iter().map(Into::into).collect());
        self
    }

    pub fn build<I, S>(self, lines: I) -> Result<RuleList, RulesError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let sub_rules = build_sub_rule_groups(self.ctx, &self.providers, &self.groups)?;
        let parser = RuleParser::new(self.ctx)
            .with_providers(&self.providers)
            .with_sub_rules(&sub_rules);

        let mut rules: Vec<Rule> = Vec::new();
        for line in lines {
            let line = line.as_ref();
            if let Some(last) = rules.last()
                && last.is_match_all()
            {
                return Err(RulesError::Parse(format!(
                    "'{line}' follows the catch-all rule '{last}'"
                )));
            }
            rules.push(parser.parse_line(line)?);
        }

        if let Some(known) = &self.adapters {
            for rule in rules.iter().chain(sub_rules.values().flat_map(|g| g.iter())) {
                check_target(rule, known)?;
            }
        }

        let find_process = rules.iter().any(Rule::should_find_process);
        debug!(
            rules = rules.len(),
            providers = self.providers.len(),
            sub_rule_groups = sub_rules.len(),
            find_process,
            "built rule list"
        );
        Ok(RuleList {
            rules,
            providers: self.providers,
            sub_rules,
            find_process,
        })
    }
}

fn check_target(rule: &Rule, known: &FxHashSet<String>) -> Result<(), RulesError> {
    if matches!(rule.kind(), RuleKind::SubRule(_)) {
        return Ok(());
    }
    let target = rule.adapter();
    if BUILTIN_ADAPTERS.iter().any(|b| b.eq_ignore_ascii_case(target)) || known.contains(target) {
        return Ok(());
    }
    Err(RulesError::UnknownAdapter {
        target: target.to_string(),
        rule: rule.to_string(),
    })
}

/// Rule list that can be replaced while matches are running.
pub struct HotRuleList {
    inner: ArcSwap<RuleList>,
}

impl HotRuleList {
    pub fn new(list: RuleList) -> Self {
        Self {
            inner: ArcSwap::new(Arc::new(list)),
        }
    }

    /// The current list; held across an async resolution step.
    pub fn current(&self) -> Arc<RuleList> {
        self.inner.load_full()
    }

    /// Publish a new list and return the previous one.
    pub fn replace(&self, list: RuleList) -> Arc<RuleList> {
        self.inner.swap(Arc::new(list))
    }

    pub fn rule_count(&self) -> usize {
        self.inner.load().rule_count()
    }
}

impl std::fmt::Debug for HotRuleList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HotRuleList")
            .field("inner", &*self.inner.load())
            .finish()
    }
}
