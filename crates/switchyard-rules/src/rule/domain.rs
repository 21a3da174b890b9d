//! Host name predicates.

use std::sync::Arc;

use regex::Regex;

use crate::error::RulesError;
use crate::geo::SiteMatcher;

/// Lower-case a configured domain and strip a trailing dot.
pub(crate) fn normalize(kind: &'static str, payload: &str) -> Result<String, RulesError> {
    let domain = payload.trim().trim_end_matches('.').to_ascii_lowercase();
    if domain.is_empty() || domain.contains(char::is_whitespace) {
        return Err(RulesError::payload(kind, format!("invalid domain '{payload}'")));
    }
    Ok(domain)
}

/// `host` equals `suffix` or is a sub-domain of it. `suffix` is lower-case.
pub fn suffix_matches(host: &str, suffix: &str) -> bool {
    let host = host.trim_end_matches('.');
    if host.len() < suffix.len() {
        return false;
    }
    let (head, tail) = host.split_at(host.len() - suffix.len());
    tail.eq_ignore_ascii_case(suffix) && (head.is_empty() || head.ends_with('.'))
}

#[derive(Debug, Clone)]
pub enum DomainRule {
    Exact(String),
    Suffix(String),
    Keyword(String),
    Regex(Regex),
    GeoSite(Arc<SiteMatcher>),
}

impl DomainRule {
    pub fn exact(payload: &str) -> Result<Self, RulesError> {
        normalize("DOMAIN", payload).map(Self::Exact)
    }

    pub fn suffix(payload: &str) -> Result<Self, RulesError> {
        let payload = payload.trim();
        let payload = payload
            .strip_prefix("+.")
            .or_else(|| payload.strip_prefix('.'))
            .unwrap_or(payload);
        normalize("DOMAIN-SUFFIX", payload).map(Self::Suffix)
    }

    pub fn keyword(payload: &str) -> Result<Self, RulesError> {
        let keyword = payload.trim().to_ascii_lowercase();
        if keyword.is_empty() {
            return Err(RulesError::payload("DOMAIN-KEYWORD", "empty keyword"));
        }
        Ok(Self::Keyword(keyword))
    }

    pub fn regex(payload: &str) -> Result<Self, RulesError> {
        Regex::new(payload)
            .map(Self::Regex)
            .map_err(|e| RulesError::payload("DOMAIN-REGEX", e.to_string()))
    }

    pub fn matches(&self, host: &str) -> bool {
        match self {
            Self::Exact(domain) => host.trim_end_matches('.').eq_ignore_ascii_case(domain),
            Self::Suffix(suffix) => suffix_matches(host, suffix),
            Self::Keyword(keyword) => host.to_ascii_lowercase().contains(keyword.as_str()),
            Self::Regex(re) => re.is_match(host),
            Self::GeoSite(site) => site.matches(host),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suffix_law() {
        assert!(suffix_matches("google.com", "google.com"));
        assert!(suffix_matches("play.google.com", "google.com"));
        assert!(suffix_matches("Play.Google.COM.", "google.com"));
        assert!(!suffix_matches("googlecom", "google.com"));
        assert!(!suffix_matches("notgoogle.com", "google.com"));
        assert!(!suffix_matches("com", "google.com"));
    }

    #[test]
    fn exact_is_case_insensitive() {
        let rule = DomainRule::exact("Example.COM").unwrap();
        assert!(rule.matches("example.com"));
        assert!(rule.matches("EXAMPLE.com."));
        assert!(!rule.matches("www.example.com"));
    }

    #[test]
    fn suffix_prefix_forms() {
        for payload in ["example.com", ".example.com", "+.example.com"] {
            let rule = DomainRule::suffix(payload).unwrap();
            assert!(rule.matches("a.b.example.com"), "{payload}");
            assert!(rule.matches("example.com"), "{payload}");
        }
    }

    #[test]
    fn keyword_and_regex() {
        let kw = DomainRule::keyword("Track").unwrap();
        assert!(kw.matches("ads.tracker.net"));
        assert!(!kw.matches("example.net"));

        let re = DomainRule::regex(r"^ad[0-9]+\.").unwrap();
        assert!(re.matches("ad12.example.com"));
        assert!(!re.matches("bad12.example.com"));
        DomainRule::regex("(").unwrap_err();
    }

    #[test]
    fn rejects_empty() {
        DomainRule::exact("  ").unwrap_err();
        DomainRule::suffix("+.").unwrap_err();
        DomainRule::keyword("").unwrap_err();
    }
}
