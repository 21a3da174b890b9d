//! Succinct domain trie for DOMAIN / DOMAIN-SUFFIX membership.
//!
//! Keys are stored reversed (`www.example.com` becomes `moc.elpmaxe.www`)
//! in a level-ordered trie whose shape is encoded as a bitmap: each node
//! contributes one `0` per child label followed by a terminating `1`.
//! Navigation uses rank/select over that bitmap, so the whole set costs
//! roughly one byte per distinct label position plus two bits.
//!
//! Entry forms:
//!
//! - `example.com` matches only that name.
//! - `.example.com` matches strict sub-domains. It is stored as the
//!   reversed name, a `.` and a trailing [`SUFFIX_MARK`].
//! - `+.example.com` matches the name and its sub-domains (both keys above).
//! - A `*` label matches exactly one non-empty label, e.g.
//!   `*.example.com` or `cdn.*.example.com`.

use std::collections::BTreeSet;

use crate::error::RulesError;
use crate::matcher::bitmap::{BitBuilder, RankSelect};

/// Reserved byte ending a key: "anything below this label boundary".
pub const SUFFIX_MARK: u8 = b'+';
/// Label wildcard matching one label.
pub const WILDCARD: u8 = b'*';

/// Immutable domain membership set.
#[derive(Debug, Clone)]
pub struct DomainSet {
    labels: Vec<u8>,
    branches: RankSelect,
    leaves: RankSelect,
    len: usize,
}

impl DomainSet {
    /// Build a set where every entry matches itself and its sub-domains.
    ///
    /// Leading `+.` / `.` prefixes are accepted and ignored.
    pub fn new<I, S>(domains: I) -> Result<Self, RulesError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut builder = DomainSetBuilder::new();
        for domain in domains {
            builder.add_suffix(domain.as_ref())?;
        }
        Ok(builder.build())
    }

    /// True when `domain` is covered by an entry. Case-insensitive; one
    /// trailing dot is ignored.
    pub fn has(&self, domain: &str) -> bool {
        let domain = domain.strip_suffix('.').unwrap_or(domain);
        if domain.is_empty() || self.len == 0 || domain.as_bytes().contains(&SUFFIX_MARK) {
            return false;
        }
        let query: Vec<u8> = domain
            .bytes()
            .rev()
            .map(|b| b.to_ascii_lowercase())
            .collect();

        // (node, bytes consumed); wildcard labels fork the walk.
        let mut pending = vec![(0usize, 0usize)];
        while let Some((node, at)) = pending.pop() {
            if at == query.len() {
                if self.leaves.get(node) {
                    return true;
                }
                continue;
            }
            for (pos, label) in self.children(node) {
                match label {
                    // Only ever stored right after a `.`, and `at` is short
                    // of the end, so at least one byte of sub-domain remains.
                    SUFFIX_MARK => return true,
                    WILDCARD => {
                        let end = query[at..]
                            .iter()
                            .position(|&b| b == b'.')
                            .map_or(query.len(), |n| at + n);
                        if end > at {
                            pending.push((self.branches.rank0(pos + 1), end));
                        }
                    }
                    _ if label == query[at] => {
                        pending.push((self.branches.rank0(pos + 1), at + 1));
                    }
                    _ => {}
                }
            }
        }
        false
    }

    /// Number of distinct entries held.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Approximate heap footprint in bytes.
    pub fn heap_bytes(&self) -> usize {
        self.labels.len() + self.branches.heap_bytes() + self.leaves.heap_bytes()
    }

    /// Reconstruct the entries in their `name` / `.name` / `+.name` forms.
    pub fn entries(&self) -> Vec<String> {
        let mut exact = BTreeSet::new();
        let mut below = Vec::new();
        if self.len > 0 {
            let mut stack: Vec<(usize, Vec<u8>)> = vec![(0, Vec::new())];
            while let Some((node, key)) = stack.pop() {
                if self.leaves.get(node) {
                    exact.insert(render(&key));
                }
                for (pos, label) in self.children(node) {
                    if label == SUFFIX_MARK {
                        // Drop the `.` preceding the mark.
                        below.push(render(&key[..key.len().saturating_sub(1)]));
                    } else {
                        let mut child_key = key.clone();
                        child_key.push(label);
                        stack.push((self.branches.rank0(pos + 1), child_key));
                    }
                }
            }
        }

        let mut out: Vec<String> = below
            .into_iter()
            .map(|name| {
                if exact.remove(&name) {
                    format!("+.{name}")
                } else {
                    format!(".{name}")
                }
            })
            .collect();
        out.extend(exact);
        out.sort();
        out
    }

    fn node_start(&self, node: usize) -> usize {
        if node == 0 {
            return 0;
        }
        self.branches
            .select1(node - 1)
            .map_or(self.branches.len(), |pos| pos + 1)
    }

    /// Bitmap position and label of every child of `node`.
    fn children(&self, node: usize) -> impl Iterator<Item = (usize, u8)> + '_ {
        (self.node_start(node)..self.branches.len())
            .take_while(|&pos| !self.branches.get(pos))
            .map(move |pos| (pos, self.labels[pos - node]))
    }
}

fn render(reversed: &[u8]) -> String {
    reversed.iter().rev().map(|&b| b as char).collect()
}

/// Collects entries, then builds a [`DomainSet`].
#[derive(Debug, Default, Clone)]
pub struct DomainSetBuilder {
    keys: Vec<Vec<u8>>,
}

impl DomainSetBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entry written in rule-list form: `+.x` (name and
    /// sub-domains), `.x` (sub-domains only) or a plain name.
    pub fn add(&mut self, entry: &str) -> Result<(), RulesError> {
        let entry = entry.trim();
        if let Some(name) = entry.strip_prefix("+.") {
            self.add_suffix(name)
        } else if let Some(name) = entry.strip_prefix('.') {
            self.add_subdomains(name)
        } else {
            self.add_exact(entry)
        }
    }

    /// Add an entry matching only the name itself.
    pub fn add_exact(&mut self, domain: &str) -> Result<(), RulesError> {
        let name = normalize(domain)?;
        self.keys.push(name.bytes().rev().collect());
        Ok(())
    }

    /// Add an entry matching strict sub-domains of the name.
    pub fn add_subdomains(&mut self, domain: &str) -> Result<(), RulesError> {
        let name = normalize(domain)?;
        let mut key: Vec<u8> = name.bytes().rev().collect();
        key.extend_from_slice(&[b'.', SUFFIX_MARK]);
        self.keys.push(key);
        Ok(())
    }

    /// Add an entry matching the name and all sub-domains.
    ///
    /// A leading `+.` or `.` (both common in rule lists) is stripped.
    pub fn add_suffix(&mut self, domain: &str) -> Result<(), RulesError> {
        let trimmed = domain.trim();
        let trimmed = trimmed
            .strip_prefix("+.")
            .or_else(|| trimmed.strip_prefix('.'))
            .unwrap_or(trimmed);
        self.add_exact(trimmed)?;
        self.add_subdomains(trimmed)
    }

    /// Keys added so far (before deduplication).
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn build(mut self) -> DomainSet {
        self.keys.sort_unstable();
        self.keys.dedup();
        let keys = self.keys;

        // A name stored both exactly and with a sub-domain mark is one
        // `+.` entry.
        let paired = keys
            .iter()
            .filter_map(|key| key.strip_suffix(&[b'.', SUFFIX_MARK][..]))
            .filter(|name| keys.binary_search_by(|k| k.as_slice().cmp(name)).is_ok())
            .count();

        let mut labels = Vec::new();
        let mut branches = BitBuilder::default();
        let mut leaves = BitBuilder::default();

        if !keys.is_empty() {
            // Level-order construction: each queue element is a node covering
            // keys[s..e] that share their first `col` bytes.
            let mut queue: Vec<(usize, usize, usize)> = vec![(0, keys.len(), 0)];
            let mut node = 0;
            while node < queue.len() {
                let (mut s, e, col) = queue[node];
                if keys[s].len() == col {
                    // Sorted + deduplicated: at most one key ends here, and first.
                    leaves.set(node);
                    s += 1;
                }
                let mut j = s;
                while j < e {
                    let from = j;
                    let byte = keys[j][col];
                    while j < e && keys[j][col] == byte {
                        j += 1;
                    }
                    queue.push((from, j, col + 1));
                    labels.push(byte);
                    branches.push(false);
                }
                branches.push(true);
                node += 1;
            }
        }

        DomainSet {
            labels,
            branches: branches.finish(),
            leaves: leaves.finish(),
            len: keys.len() - paired,
        }
    }
}

fn normalize(domain: &str) -> Result<String, RulesError> {
    let name = domain.trim();
    let name = name.strip_suffix('.').unwrap_or(name);
    if name.is_empty() {
        return Err(RulesError::payload("domain", "empty domain"));
    }
    let invalid = |reason: String| RulesError::payload("domain", format!("'{name}' {reason}"));
    for label in name.split('.') {
        if label.is_empty() {
            return Err(invalid("has an empty label".into()));
        }
        if label.contains('*') && label != "*" {
            return Err(invalid("uses '*' inside a label".into()));
        }
        if let Some(bad) = label
            .chars()
            .find(|c| c.is_whitespace() || matches!(c, ',' | '/' | '+'))
        {
            return Err(invalid(format!("contains invalid character {bad:?}")));
        }
    }
    Ok(name.to_ascii_lowercase())
}
