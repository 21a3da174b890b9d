//! Shared, lazily populated table of geo category matchers.

use std::net::IpAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::{Mutex, RwLock};
use regex::RegexSet;
use rustc_hash::FxHashMap;
use tracing::info;

use crate::error::RulesError;
use crate::geo::loader::{GeoDataLoader, GeoSiteEntry};
use crate::matcher::{DomainSet, DomainSetBuilder, KeywordMatcher, RangeSet};

/// Cache key: lower-case category code plus match polarity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GeoKey {
    pub code: String,
    pub reverse: bool,
}

impl GeoKey {
    /// Parse `cn` / `!cn`.
    pub fn parse(category: &str) -> Result<Self, RulesError> {
        let category = category.trim();
        let (reverse, code) = match category.strip_prefix('!') {
            Some(rest) => (true, rest.trim()),
            None => (false, category),
        };
        if code.is_empty() {
            return Err(RulesError::GeoData("empty category code".into()));
        }
        Ok(Self {
            code: code.to_ascii_lowercase(),
            reverse,
        })
    }
}

/// Address membership for one GEOIP category.
#[derive(Debug)]
pub struct IpMatcher {
    code: String,
    set: RangeSet,
    reverse: bool,
}

impl IpMatcher {
    pub fn new(code: impl Into<String>, set: RangeSet, reverse: bool) -> Self {
        Self {
            code: code.into(),
            set,
            reverse,
        }
    }

    pub fn matches(&self, ip: IpAddr) -> bool {
        self.set.contains(ip) != self.reverse
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn is_reverse(&self) -> bool {
        self.reverse
    }

    /// Number of merged address ranges.
    pub fn count(&self) -> usize {
        self.set.len()
    }
}

/// Domain membership for one GEOSITE category.
#[derive(Debug)]
pub struct SiteMatcher {
    code: String,
    domains: DomainSet,
    keywords: Option<KeywordMatcher>,
    regexes: Option<RegexSet>,
    reverse: bool,
    count: usize,
}

impl SiteMatcher {
    pub fn from_entries(
        code: impl Into<String>,
        entries: Vec<GeoSiteEntry>,
        reverse: bool,
    ) -> Result<Self, RulesError> {
        let count = entries.len();
        let mut domains = DomainSetBuilder::new();
        let mut keywords = Vec::new();
        let mut patterns = Vec::new();
        for entry in entries {
            match entry {
                GeoSiteEntry::Full(name) => domains.add_exact(&name)?,
                GeoSiteEntry::Domain(name) => domains.add_suffix(&name)?,
                GeoSiteEntry::Keyword(word) => keywords.push(word),
                GeoSiteEntry::Regex(pattern) => patterns.push(pattern),
            }
        }
        let regexes = if patterns.is_empty() {
            None
        } else {
            Some(
                RegexSet::new(&patterns)
                    .map_err(|e| RulesError::payload("GEOSITE", e.to_string()))?,
            )
        };
        Ok(Self {
            code: code.into(),
            domains: domains.build(),
            keywords: KeywordMatcher::new(keywords)?,
            regexes,
            reverse,
            count,
        })
    }

    pub fn matches(&self, domain: &str) -> bool {
        let hit = self.domains.has(domain)
            || self.keywords.as_ref().is_some_and(|k| k.matches(domain))
            || self.regexes.as_ref().is_some_and(|r| r.is_match(domain));
        hit != self.reverse
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn is_reverse(&self) -> bool {
        self.reverse
    }

    /// Number of entries the category was built from.
    pub fn count(&self) -> usize {
        self.count
    }
}

/// Insert-once slot; the mutex only serializes the first load of a key.
struct Slot<M> {
    value: OnceLock<Arc<M>>,
    init: Mutex<()>,
}

impl<M> Default for Slot<M> {
    fn default() -> Self {
        Self {
            value: OnceLock::new(),
            init: Mutex::new(()),
        }
    }
}

type SlotMap<M> = RwLock<FxHashMap<GeoKey, Arc<Slot<M>>>>;

/// Deduplicating cache of geo matchers keyed by (category, polarity).
///
/// Rules referencing the same category and polarity share one matcher and
/// the loader runs once for it. Loading a new key only blocks callers of
/// that same key; lookups of loaded keys take a read lock only.
pub struct GeoMatcherCache {
    loader: Arc<dyn GeoDataLoader>,
    ip: SlotMap<IpMatcher>,
    site: SlotMap<SiteMatcher>,
    loads: AtomicUsize,
}

impl GeoMatcherCache {
    pub fn new(loader: Arc<dyn GeoDataLoader>) -> Self {
        Self {
            loader,
            ip: RwLock::new(FxHashMap::default()),
            site: RwLock::new(FxHashMap::default()),
            loads: AtomicUsize::new(0),
        }
    }

    /// Matcher for a GEOIP category such as `cn` or `!cn`.
    pub fn ip_matcher(&self, category: &str) -> Result<Arc<IpMatcher>, RulesError> {
        let key = GeoKey::parse(category)?;
        let slot = slot_for(&self.ip, &key);
        get_or_load(&slot, || {
            let nets = self.loader.load_geoip(&key.code)?;
            let set = RangeSet::from_nets(nets);
            self.loads.fetch_add(1, Ordering::Relaxed);
            info!(
                code = %key.code,
                reverse = key.reverse,
                ranges = set.len(),
                "loaded geoip category"
            );
            Ok(IpMatcher::new(key.code.clone(), set, key.reverse))
        })
    }

    /// Matcher for a GEOSITE category such as `google` or `!cn`.
    pub fn site_matcher(&self, category: &str) -> Result<Arc<SiteMatcher>, RulesError> {
        let key = GeoKey::parse(category)?;
        let slot = slot_for(&self.site, &key);
        get_or_load(&slot, || {
            let entries = self.loader.load_geosite(&key.code)?;
            let matcher = SiteMatcher::from_entries(key.code.clone(), entries, key.reverse)?;
            self.loads.fetch_add(1, Ordering::Relaxed);
            info!(
                code = %key.code,
                reverse = key.reverse,
                entries = matcher.count(),
                "loaded geosite category"
            );
            Ok(matcher)
        })
    }

    /// Number of successful category loads performed so far.
    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::Relaxed)
    }

    /// Number of loaded (category, polarity) matchers.
    pub fn len(&self) -> usize {
        loaded(&self.ip.read()) + loaded(&self.site.read())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn loaded<M>(map: &FxHashMap<GeoKey, Arc<Slot<M>>>) -> usize {
    map.values().filter(|s| s.value.get().is_some()).count()
}

impl std::fmt::Debug for GeoMatcherCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeoMatcherCache")
            .field("loads", &self.load_count())
            .finish_non_exhaustive()
    }
}

fn slot_for<M>(map: &SlotMap<M>, key: &GeoKey) -> Arc<Slot<M>> {
    if let Some(slot) = map.read().get(key) {
        return Arc::clone(slot);
    }
    Arc::clone(map.write().entry(key.clone()).or_default())
}

fn get_or_load<M>(
    slot: &Slot<M>,
    load: impl FnOnce() -> Result<M, RulesError>,
) -> Result<Arc<M>, RulesError> {
    if let Some(value) = slot.value.get() {
        return Ok(Arc::clone(value));
    }
    let _guard = slot.init.lock();
    if let Some(value) = slot.value.get() {
        return Ok(Arc::clone(value));
    }
    // Failed loads leave the slot empty so a later build can retry.
    let value = Arc::new(load()?);
    let _ = slot.value.set(Arc::clone(&value));
    Ok(value)
}
