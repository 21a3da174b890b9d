//! Splitting rule lines into type, payload, target and parameters.

use crate::error::RulesError;
use crate::rule::RuleType;

/// A rule line split into its fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRule<'a> {
    pub rule_type: RuleType,
    pub payload: &'a str,
    /// Empty for provider entries and combinator children.
    pub target: &'a str,
    pub params: Vec<&'a str>,
}

/// Split a rule-list line: `TYPE,PAYLOAD,TARGET[,PARAM...]`.
///
/// `MATCH,TARGET` has no payload. Combinators and SUB-RULE take a balanced
/// parenthesized payload; regex kinds take everything up to the last comma
/// so patterns may contain commas.
pub fn split_line(line: &str) -> Result<RawRule<'_>, RulesError> {
    split(line, true)
}

/// Split a provider or combinator-child entry: `TYPE,PAYLOAD[,PARAM...]`.
///
/// Trailing fields beyond the payload are returned as parameters; a stray
/// policy name there is ignored by the parameter parser.
pub fn split_entry(line: &str) -> Result<RawRule<'_>, RulesError> {
    split(line, false)
}

fn split(line: &str, with_target: bool) -> Result<RawRule<'_>, RulesError> {
    let line = line.trim();
    if line.is_empty() {
        return Err(RulesError::Parse("empty rule".into()));
    }
    let (tp, rest) = match line.split_once(',') {
        Some((tp, rest)) => (tp.trim(), rest.trim()),
        None => (line, ""),
    };
    let rule_type: RuleType = tp.parse()?;

    if rule_type == RuleType::Match {
        let mut fields = rest.split(',').map(str::trim);
        let target = fields.next().unwrap_or_default();
        if with_target && target.is_empty() {
            return Err(RulesError::Parse(format!("missing target in '{line}'")));
        }
        return Ok(RawRule {
            rule_type,
            payload: "",
            target: if with_target { target } else { "" },
            params: Vec::new(),
        });
    }

    if rest.is_empty() {
        return Err(RulesError::Parse(format!("missing payload in '{line}'")));
    }

    if rule_type.is_logic() || rule_type == RuleType::SubRule {
        let end = balanced_group_end(rest)
            .ok_or_else(|| RulesError::Parse(format!("unbalanced parentheses in '{line}'")))?;
        let payload = &rest[..=end];
        let tail = rest[end + 1..].trim_start();
        if !tail.is_empty() && !tail.starts_with(',') {
            return Err(RulesError::Parse(format!(
                "unexpected text after '{payload}' in '{line}'"
            )));
        }
        let tail = tail.strip_prefix(',').unwrap_or(tail);
        if tail.contains(['(', ')']) {
            return Err(RulesError::Parse(format!(
                "unbalanced parentheses in '{line}'"
            )));
        }
        return finish(line, rule_type, payload, tail, with_target);
    }

    if rule_type.is_regex() {
        if !with_target {
            return Ok(RawRule {
                rule_type,
                payload: rest,
                target: "",
                params: Vec::new(),
            });
        }
        let (payload, target) = rest
            .rsplit_once(',')
            .ok_or_else(|| RulesError::Parse(format!("missing target in '{line}'")))?;
        return Ok(RawRule {
            rule_type,
            payload: payload.trim(),
            target: target.trim(),
            params: Vec::new(),
        });
    }

    let (payload, tail) = match rest.split_once(',') {
        Some((payload, tail)) => (payload.trim(), tail),
        None => (rest, ""),
    };
    finish(line, rule_type, payload, tail, with_target)
}

fn finish<'a>(
    line: &str,
    rule_type: RuleType,
    payload: &'a str,
    tail: &'a str,
    with_target: bool,
) -> Result<RawRule<'a>, RulesError> {
    let mut fields = tail.split(',').map(str::trim).filter(|f| !f.is_empty());
    let target = if with_target {
        fields
            .next()
            .ok_or_else(|| RulesError::Parse(format!("missing target in '{line}'")))?
    } else {
        ""
    };
    Ok(RawRule {
        rule_type,
        payload,
        target,
        params: fields.collect(),
    })
}

/// Byte offset of the `)` closing a group that starts at offset 0.
fn balanced_group_end(s: &str) -> Option<usize> {
    if !s.starts_with('(') {
        return None;
    }
    let mut depth = 0usize;
    for (i, c) in s.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}
