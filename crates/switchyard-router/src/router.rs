//! Connection routing over a hot-swappable rule list.

use std::net::IpAddr;
use std::sync::Arc;

use serde::Serialize;
use switchyard_dns::ResolveIp;
use switchyard_rules::{Decision, HotRuleList, MatchedRule, Metadata, RuleList};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Routing result for one connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Route {
    /// Adapter the connection goes to.
    pub target: String,
    /// Rule that decided; `None` for the implicit fallback.
    pub rule: Option<RuleRef>,
    /// Address resolved on demand while evaluating, if any.
    pub resolved_ip: Option<IpAddr>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuleRef {
    pub index: usize,
    pub rule_type: &'static str,
    pub payload: String,
}

impl From<MatchedRule> for RuleRef {
    fn from(m: MatchedRule) -> Self {
        Self {
            index: m.index,
            rule_type: m.rule_type.as_str(),
            payload: m.payload,
        }
    }
}

/// Routes descriptors through the current rule list, resolving the
/// destination when a rule asks for an address.
pub struct Router {
    rules: HotRuleList,
    resolver: Arc<dyn ResolveIp>,
}

impl Router {
    pub fn new(list: RuleList, resolver: Arc<dyn ResolveIp>) -> Self {
        switchyard_metrics::set_rule_list_rules(list.rule_count());
        Self {
            rules: HotRuleList::new(list),
            resolver,
        }
    }

    /// The rule list currently in effect.
    pub fn rules(&self) -> Arc<RuleList> {
        self.rules.current()
    }

    /// Route one descriptor.
    ///
    /// Resolution happens at most once per call; a failed lookup leaves
    /// the destination unresolved and IP rules simply do not match.
    pub async fn route(&self, meta: &mut Metadata) -> Route {
        let start = Instant::now();
        // Held across the resolution step so a reload cannot change the
        // rule list mid-evaluation.
        let list = self.rules.current();
        let mut resolved_ip = None;
        let mut decision = list.evaluate(meta);

        while let Decision::NeedIp { resume_at } = decision {
            meta.dns_resolved = true;
            if let Some(host) = meta.rule_host().map(str::to_owned) {
                match self.resolver.resolve_ip(&host).await {
                    Ok(ip) => {
                        debug!(host = %host, ip = %ip, rule = resume_at, "resolved for ip rule");
                        switchyard_metrics::record_dns_resolution("ok");
                        meta.dst_ip = Some(ip);
                        resolved_ip = Some(ip);
                    }
                    Err(e) => {
                        debug!(host = %host, error = %e, "resolution failed, ip rules will not match");
                        switchyard_metrics::record_dns_resolution("error");
                    }
                }
            }
            decision = list.evaluate_from(meta, resume_at);
        }

        let route = match decision {
            Decision::Matched(matched) => {
                switchyard_metrics::record_rule_match(matched.rule_type.as_str());
                Route {
                    target: matched.target.clone(),
                    rule: Some(matched.into()),
                    resolved_ip,
                }
            }
            other => {
                switchyard_metrics::record_rule_fallback();
                Route {
                    target: other.target().unwrap_or_default().to_string(),
                    rule: None,
                    resolved_ip,
                }
            }
        };
        switchyard_metrics::record_rule_eval_duration(start.elapsed().as_secs_f64());
        debug!(
            dst = %meta.remote_address(),
            network = %meta.network,
            target = %route.target,
            rule = ?route.rule.as_ref().map(|r| r.rule_type),
            "routed"
        );
        route
    }

    /// Start background refresh for every provider of the current list.
    pub fn start_providers(&self) {
        for provider in self.rules.current().providers() {
            provider.start();
        }
    }

    /// Swap in a new rule list, start its providers and close the old ones.
    ///
    /// Routes already holding the old list finish against it; closed
    /// providers keep serving their last snapshot.
    pub fn reload(&self, list: RuleList) {
        let rules = list.rule_count();
        let old = self.rules.replace(list);
        self.start_providers();
        for provider in old.providers() {
            provider.close();
        }
        switchyard_metrics::set_rule_list_rules(rules);
        info!(rules, providers = self.rules.current().provider_count(), "rule list reloaded");
    }

    /// Stop every provider of the current list.
    pub fn shutdown(&self) {
        for provider in self.rules.current().providers() {
            provider.close();
        }
    }
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("rules", &self.rules.rule_count())
            .finish()
    }
}

/// Start provider refresh and run until `shutdown` is cancelled.
pub async fn run_with_shutdown(router: Arc<Router>, shutdown: CancellationToken) {
    router.start_providers();
    info!(
        rules = router.rules().rule_count(),
        providers = router.rules().provider_count(),
        "router running"
    );
    shutdown.cancelled().await;
    router.shutdown();
    info!("router stopped");
}
