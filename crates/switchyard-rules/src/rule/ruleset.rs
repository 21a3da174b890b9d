//! RULE-SET: membership in a rule provider's current content.

use std::sync::Arc;

use crate::metadata::Metadata;
use crate::provider::{Behavior, RuleProvider};

/// Reference to a named provider.
///
/// Matching reads whatever snapshot the provider has published at that
/// moment. The lookup needs reported to the rule list follow the current
/// snapshot too; combinators use the `may_*` bounds instead, which hold for
/// any content the provider could load.
#[derive(Debug, Clone)]
pub struct RuleSetRef {
    provider: Arc<RuleProvider>,
    src: bool,
}

impl RuleSetRef {
    pub fn new(provider: Arc<RuleProvider>, src: bool) -> Self {
        Self { provider, src }
    }

    pub fn provider(&self) -> &Arc<RuleProvider> {
        &self.provider
    }

    pub fn name(&self) -> &str {
        self.provider.name()
    }

    pub fn matches(&self, meta: &mut Metadata) -> bool {
        self.provider.matches(meta, self.src)
    }

    pub fn should_resolve_ip(&self) -> bool {
        match self.provider.behavior() {
            Behavior::Domain => false,
            Behavior::IpCidr => !self.src,
            Behavior::Classical => self.provider.should_resolve_ip(),
        }
    }

    pub fn should_find_process(&self) -> bool {
        self.provider.behavior() == Behavior::Classical && self.provider.should_find_process()
    }

    pub(crate) fn may_resolve_ip(&self) -> bool {
        match self.provider.behavior() {
            Behavior::Domain => false,
            Behavior::IpCidr => !self.src,
            Behavior::Classical => true,
        }
    }

    pub(crate) fn may_find_process(&self) -> bool {
        self.provider.behavior() == Behavior::Classical
    }
}
