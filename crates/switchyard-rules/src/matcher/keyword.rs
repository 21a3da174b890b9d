//! Substring matcher for DOMAIN-KEYWORD style entries.

use aho_corasick::{AhoCorasick, AhoCorasickBuilder, MatchKind};

use crate::error::RulesError;

/// Matches when a domain contains any registered keyword.
///
/// Backed by an Aho-Corasick automaton, so a lookup is O(m) in the domain
/// length regardless of keyword count. Matching is ASCII case-insensitive.
pub struct KeywordMatcher {
    ac: AhoCorasick,
    keywords: Vec<String>,
}

impl KeywordMatcher {
    /// Build a keyword matcher; `Ok(None)` for an empty keyword list.
    pub fn new<I, S>(keywords: I) -> Result<Option<Self>, RulesError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut lower: Vec<String> = keywords
            .into_iter()
            .map(|k| k.as_ref().trim().to_ascii_lowercase())
            .filter(|k| !k.is_empty())
            .collect();
        if lower.is_empty() {
            return Ok(None);
        }
        lower.sort_unstable();
        lower.dedup();

        let ac = AhoCorasickBuilder::new()
            .ascii_case_insensitive(true)
            .match_kind(MatchKind::LeftmostFirst)
            .build(&lower)
            .map_err(|e| RulesError::payload("DOMAIN-KEYWORD", e.to_string()))?;
        Ok(Some(Self {
            ac,
            keywords: lower,
        }))
    }

    /// Check if the domain contains any keyword.
    pub fn matches(&self, domain: &str) -> bool {
        self.ac.is_match(domain)
    }

    /// Number of distinct keywords.
    pub fn len(&self) -> usize {
        self.keywords.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keywords.is_empty()
    }
}

impl std::fmt::Debug for KeywordMatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeywordMatcher")
            .field("keywords", &self.keywords)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keyword_match() {
        let m = KeywordMatcher::new(["google", "facebook"]).unwrap().unwrap();
        assert!(m.matches("www.google.com"));
        assert!(m.matches("api.facebook.com"));
        assert!(m.matches("GOOGLE.co.jp"));
        assert!(!m.matches("www.apple.com"));
    }

    #[test]
    fn keyword_empty() {
        assert!(KeywordMatcher::new(Vec::<String>::new()).unwrap().is_none());
        assert!(KeywordMatcher::new(["", "  "]).unwrap().is_none());
    }

    #[test]
    fn keyword_dedup() {
        let m = KeywordMatcher::new(["ads", "ADS", "ads"]).unwrap().unwrap();
        assert_eq!(m.len(), 1);
        assert!(m.matches("example-ads.com"));
        assert!(!m.matches("example.com"));
    }
}
