//! PROCESS-NAME / PROCESS-PATH predicates and their regex forms.

use regex::{Regex, RegexBuilder};

use crate::error::RulesError;
use crate::metadata::Metadata;

#[derive(Debug, Clone)]
enum Pattern {
    /// Compared ignoring ASCII case.
    Exact(String),
    Regex(Regex),
}

/// Match on the process that owns the connection.
///
/// The process name and path arrive on the descriptor from the dispatch
/// layer; a descriptor without them never matches.
#[derive(Debug, Clone)]
pub struct ProcessRule {
    by_path: bool,
    pattern: Pattern,
}

impl ProcessRule {
    pub fn parse(payload: &str, by_path: bool, regex: bool) -> Result<Self, RulesError> {
        let kind = match (by_path, regex) {
            (false, false) => "PROCESS-NAME",
            (true, false) => "PROCESS-PATH",
            (false, true) => "PROCESS-NAME-REGEX",
            (true, true) => "PROCESS-PATH-REGEX",
        };
        let payload = payload.trim();
        if payload.is_empty() {
            return Err(RulesError::payload(kind, "empty process pattern"));
        }
        let pattern = if regex {
            RegexBuilder::new(payload)
                .case_insensitive(true)
                .build()
                .map(Pattern::Regex)
                .map_err(|e| RulesError::payload(kind, e.to_string()))?
        } else {
            Pattern::Exact(payload.to_string())
        };
        Ok(Self { by_path, pattern })
    }

    pub fn matches(&self, meta: &Metadata) -> bool {
        let subject = if self.by_path {
            meta.process_path.as_deref()
        } else {
            meta.process.as_deref()
        };
        let Some(subject) = subject.filter(|s| !s.is_empty()) else {
            return false;
        };
        match &self.pattern {
            Pattern::Exact(want) => subject.eq_ignore_ascii_case(want),
            Pattern::Regex(re) => re.is_match(subject),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(name: &str, path: &str) -> Metadata {
        Metadata {
            process: Some(name.into()),
            process_path: Some(path.into()),
            ..Default::default()
        }
    }

    #[test]
    fn name_and_path() {
        let m = meta("curl", "/usr/bin/curl");
        assert!(ProcessRule::parse("CURL", false, false).unwrap().matches(&m));
        assert!(ProcessRule::parse("/usr/bin/curl", true, false).unwrap().matches(&m));
        assert!(!ProcessRule::parse("curl", true, false).unwrap().matches(&m));
    }

    #[test]
    fn regex_forms() {
        let m = meta("Telegram.exe", "C:/Apps/Telegram/Telegram.exe");
        assert!(ProcessRule::parse("^telegram", false, true).unwrap().matches(&m));
        assert!(ProcessRule::parse(r"/apps/.*\.exe$", true, true).unwrap().matches(&m));
        ProcessRule::parse("(", false, true).unwrap_err();
    }

    #[test]
    fn missing_process_never_matches() {
        let rule = ProcessRule::parse("curl", false, false).unwrap();
        assert!(!rule.matches(&Metadata::default()));
    }
}
