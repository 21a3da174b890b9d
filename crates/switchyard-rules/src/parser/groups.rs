//! Building named sub-rule groups.

use std::collections::BTreeMap;
use std::sync::Arc;

use rustc_hash::FxHashMap;
use tracing::debug;

use crate::error::RulesError;
use crate::parser::{ParseContext, ProviderMap, RuleParser, SubRuleMap, split_line};
use crate::rule::RuleType;

/// Build every sub-rule group, dependencies first.
///
/// A group may reference other groups through SUB-RULE lines; references
/// to unknown groups and reference cycles are rejected.
pub fn build_sub_rule_groups(
    ctx: &ParseContext,
    providers: &ProviderMap,
    groups: &BTreeMap<String, Vec<String>>,
) -> Result<SubRuleMap, RulesError> {
    let order = build_order(groups)?;
    let mut built = SubRuleMap::default();
    for name in order {
        let lines = &groups[name];
        let parser = RuleParser::new(ctx)
            .with_providers(providers)
            .with_sub_rules(&built);
        let rules = lines
            .iter()
            .map(|line| parser.parse_line(line))
            .collect::<Result<Vec<_>, _>>()?;
        debug!(group = %name, rules = rules.len(), "built sub-rule group");
        built.insert(name.clone(), Arc::from(rules));
    }
    Ok(built)
}

/// Group names referenced by SUB-RULE lines of one group.
fn references(lines: &[String]) -> Result<Vec<&str>, RulesError> {
    let mut refs = Vec::new();
    for line in lines {
        let raw = split_line(line)?;
        if raw.rule_type == RuleType::SubRule {
            refs.push(raw.target);
        }
    }
    Ok(refs)
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Visiting,
    Done,
}

/// Depth-first topological order over group references.
fn build_order(groups: &BTreeMap<String, Vec<String>>) -> Result<Vec<&String>, RulesError> {
    let mut edges: FxHashMap<&str, Vec<&str>> = FxHashMap::default();
    for (name, lines) in groups {
        edges.insert(name.as_str(), references(lines)?);
    }

    let mut marks: FxHashMap<&str, Mark> = FxHashMap::default();
    let mut order = Vec::with_capacity(groups.len());
    let mut path: Vec<&str> = Vec::new();
    for name in groups.keys() {
        visit(name, groups, &edges, &mut marks, &mut path, &mut order)?;
    }
    Ok(order)
}

fn visit<'a>(
    name: &'a str,
    groups: &'a BTreeMap<String, Vec<String>>,
    edges: &FxHashMap<&'a str, Vec<&'a str>>,
    marks: &mut FxHashMap<&'a str, Mark>,
    path: &mut Vec<&'a str>,
    order: &mut Vec<&'a String>,
) -> Result<(), RulesError> {
    match marks.get(name) {
        Some(Mark::Done) => return Ok(()),
        Some(Mark::Visiting) => {
            let from = path.iter().position(|n| *n == name).unwrap_or(0);
            let mut cycle: Vec<&str> = path[from..].to_vec();
            cycle.push(name);
            return Err(RulesError::SubRuleCycle(cycle.join(" -> ")));
        }
        None => {}
    }
    let (key, _) = groups
        .get_key_value(name)
        .ok_or_else(|| RulesError::UnknownSubRule(name.to_string()))?;

    marks.insert(name, Mark::Visiting);
    path.push(name);
    for dep in edges.get(name).map(Vec::as_slice).unwrap_or_default() {
        visit(dep, groups, edges, marks, path, order)?;
    }
    path.pop();
    marks.insert(name, Mark::Done);
    order.push(key);
    Ok(())
}
