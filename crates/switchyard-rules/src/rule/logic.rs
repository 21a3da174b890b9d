//! AND / OR / NOT combinators and SUB-RULE delegation.
//!
//! Combinator payloads are written in a parenthesized mini-language:
//!
//! ```text
//! AND,((DOMAIN,example.com),(NETWORK,TCP)),PROXY
//! NOT,((DST-PORT,6000-6500)),DIRECT
//! OR,((AND,((DOMAIN,a.com),(NETWORK,UDP))),(GEOIP,CN)),DIRECT
//! ```
//!
//! [`top_level_groups`] finds the direct children of a payload; nested
//! groups are handed back to the parser and split again when their own
//! combinator is built.

use std::fmt;
use std::sync::Arc;

use crate::error::RulesError;
use crate::metadata::Metadata;
use crate::rule::Rule;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicOp {
    And,
    Or,
    Not,
}

impl LogicOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::And => "AND",
            Self::Or => "OR",
            Self::Not => "NOT",
        }
    }
}

/// A parenthesized span of the payload: byte offsets of `(` and `)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Span {
    start: usize,
    end: usize,
}

impl Span {
    fn strictly_inside(&self, outer: &Span) -> bool {
        outer.start < self.start && outer.end > self.end
    }
}

/// Record every balanced `(...)` span in opening order.
fn spans(payload: &str) -> Result<Vec<Span>, RulesError> {
    // (slot, offset) per open paren; slots keep opening order.
    let mut stack: Vec<(usize, usize)> = Vec::new();
    let mut found: Vec<Option<Span>> = Vec::new();
    for (i, c) in payload.char_indices() {
        match c {
            '(' => {
                stack.push((found.len(), i));
                found.push(None);
            }
            ')' => {
                let (slot, start) = stack
                    .pop()
                    .ok_or_else(|| RulesError::Parse(format!("missing '(' in '{payload}'")))?;
                found[slot] = Some(Span { start, end: i });
            }
            _ => {}
        }
    }
    if !stack.is_empty() {
        return Err(RulesError::Parse(format!("missing ')' in '{payload}'")));
    }
    Ok(found.into_iter().flatten().collect())
}

/// The direct child groups of a combinator payload, without their parens.
///
/// The span wrapping the whole payload is skipped; spans nested inside an
/// already selected span belong to a deeper level.
pub fn top_level_groups(payload: &str) -> Result<Vec<&str>, RulesError> {
    let payload = payload.trim();
    if !payload.contains('(') {
        return Err(RulesError::Parse(format!(
            "logic payload '{payload}' has no parenthesized rule"
        )));
    }
    let all = spans(payload)?;
    let whole = Span {
        start: 0,
        end: payload.len() - 1,
    };
    let mut selected: Vec<Span> = Vec::new();
    for span in all {
        if span == whole {
            continue;
        }
        if selected.iter().any(|outer| span.strictly_inside(outer)) {
            continue;
        }
        selected.push(span);
    }
    Ok(selected
        .into_iter()
        .map(|s| &payload[s.start + 1..s.end])
        .collect())
}

/// A boolean combinator over child rules.
///
/// Whether any child may need a resolved address or process lookup is
/// computed once at construction over all children, since evaluation
/// short-circuits.
#[derive(Debug, Clone)]
pub struct Logic {
    op: LogicOp,
    children: Vec<Rule>,
    resolve_ip: bool,
    find_process: bool,
}

impl Logic {
    pub fn new(op: LogicOp, children: Vec<Rule>) -> Result<Self, RulesError> {
        match op {
            LogicOp::Not if children.len() != 1 => {
                return Err(RulesError::Parse(format!(
                    "NOT takes exactly one rule, got {}",
                    children.len()
                )));
            }
            LogicOp::And | LogicOp::Or if children.is_empty() => {
                return Err(RulesError::Parse(format!(
                    "{} needs at least one rule",
                    op.as_str()
                )));
            }
            _ => {}
        }
        let resolve_ip = children.iter().any(Rule::may_resolve_ip);
        let find_process = children.iter().any(Rule::may_find_process);
        Ok(Self {
            op,
            children,
            resolve_ip,
            find_process,
        })
    }

    pub fn op(&self) -> LogicOp {
        self.op
    }

    pub fn children(&self) -> &[Rule] {
        &self.children
    }

    pub fn matches(&self, meta: &mut Metadata) -> bool {
        match self.op {
            LogicOp::And => self.children.iter().all(|r| r.matches(meta).is_some()),
            LogicOp::Or => self.children.iter().any(|r| r.matches(meta).is_some()),
            LogicOp::Not => self
                .children
                .first()
                .is_some_and(|r| r.matches(meta).is_none()),
        }
    }

    pub fn should_resolve_ip(&self) -> bool {
        self.resolve_ip
    }

    pub fn should_find_process(&self) -> bool {
        self.find_process
    }
}

impl fmt::Display for Logic {
    /// Normalized form: `(A && B)`, `(A || B)`, `(!(A))`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let child = |r: &Rule| format!("({},{})", r.rule_type(), r.payload());
        match self.op {
            LogicOp::Not => {
                let inner = self.children.first().map(child).unwrap_or_default();
                write!(f, "(!{inner})")
            }
            LogicOp::And | LogicOp::Or => {
                let sep = if self.op == LogicOp::And { " && " } else { " || " };
                let parts: Vec<String> = self.children.iter().map(child).collect();
                write!(f, "({})", parts.join(sep))
            }
        }
    }
}

/// Delegation to a named rule group.
///
/// Matches when the condition matches and the group then produces a
/// match; the group's own target is returned. A `None` condition is the
/// `(MATCH)` form.
#[derive(Debug, Clone)]
pub struct SubRule {
    condition: Option<Box<Rule>>,
    group: String,
    rules: Arc<[Rule]>,
    resolve_ip: bool,
    find_process: bool,
}

impl SubRule {
    pub fn new(condition: Option<Rule>, group: impl Into<String>, rules: Arc<[Rule]>) -> Self {
        let cond = condition.as_ref();
        let resolve_ip = cond.is_some_and(Rule::may_resolve_ip)
            || rules.iter().any(Rule::may_resolve_ip);
        let find_process = cond.is_some_and(Rule::may_find_process)
            || rules.iter().any(Rule::may_find_process);
        Self {
            condition: condition.map(Box::new),
            group: group.into(),
            rules,
            resolve_ip,
            find_process,
        }
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn matches(&self, meta: &mut Metadata) -> Option<&str> {
        if let Some(cond) = &self.condition
            && cond.matches(meta).is_none()
        {
            return None;
        }
        self.rules.iter().find_map(|rule| rule.matches(meta))
    }

    pub fn should_resolve_ip(&self) -> bool {
        self.resolve_ip
    }

    pub fn should_find_process(&self) -> bool {
        self.find_process
    }
}
