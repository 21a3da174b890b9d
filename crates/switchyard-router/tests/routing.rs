//! End-to-end routing: configuration in, decisions out.

use std::net::IpAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use switchyard_config::{Config, parse_config};
use switchyard_dns::{DnsError, ResolveIp};
use switchyard_router::{CancellationToken, Router, RouterError, build_rule_list, run_with_shutdown};
use switchyard_rules::{Metadata, Network, RulesError};

/// Resolver answering from a fixed table and counting lookups.
#[derive(Default)]
struct StaticResolver {
    table: Vec<(&'static str, &'static str)>,
    calls: AtomicUsize,
}

impl StaticResolver {
    fn with(table: &[(&'static str, &'static str)]) -> Arc<Self> {
        Arc::new(Self {
            table: table.to_vec(),
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ResolveIp for StaticResolver {
    async fn resolve_ip(&self, host: &str) -> Result<IpAddr, DnsError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.table
            .iter()
            .find(|(h, _)| *h == host)
            .and_then(|(_, ip)| ip.parse().ok())
            .ok_or_else(|| DnsError::NoResults(host.to_string()))
    }
}

const CONFIG: &str = r#"
rules:
  - DOMAIN-SUFFIX,ads.example.com,REJECT
  - RULE-SET,streaming,PROXY
  - SUB-RULE,(NETWORK,UDP),udp
  - IP-CIDR,10.0.0.0/8,DIRECT,no-resolve
  - RULE-SET,lan,DIRECT
  - MATCH,PROXY
sub-rules:
  udp:
    - DST-PORT,443,REJECT
    - MATCH,DIRECT
proxies: [PROXY]
rule-providers:
  streaming:
    type: inline
    behavior: domain
    payload: ["+.video.example"]
  lan:
    type: inline
    behavior: ipcidr
    payload: [192.168.0.0/16]
"#;

fn config(yaml: &str) -> Config {
    parse_config(yaml, "yaml").unwrap()
}

async fn router(resolver: Arc<StaticResolver>) -> Router {
    Router::new(build_rule_list(&config(CONFIG)).await.unwrap(), resolver)
}

#[tokio::test]
async fn domain_rules_decide_without_resolution() {
    let resolver = StaticResolver::with(&[]);
    let router = router(resolver.clone()).await;

    let route = router
        .route(&mut Metadata::for_host("tracker.ads.example.com", 443))
        .await;
    assert_eq!(route.target, "REJECT");
    assert_eq!(route.rule.as_ref().map(|r| r.index), Some(0));

    let route = router
        .route(&mut Metadata::for_host("cdn.video.example", 443))
        .await;
    assert_eq!(route.target, "PROXY");
    assert_eq!(route.rule.as_ref().map(|r| r.rule_type), Some("RULE-SET"));
    assert_eq!(resolver.calls(), 0);
}

#[tokio::test]
async fn sub_rule_group_routes_udp() {
    let router = router(StaticResolver::with(&[])).await;

    let mut meta = Metadata::for_host("quic.example.org", 443);
    meta.network = Network::Udp;
    assert_eq!(router.route(&mut meta).await.target, "REJECT");

    let mut meta = Metadata::for_host("dns.example.org", 53);
    meta.network = Network::Udp;
    assert_eq!(router.route(&mut meta).await.target, "DIRECT");
}

#[tokio::test]
async fn ip_rule_resolves_once_and_resumes() {
    let resolver = StaticResolver::with(&[("nas.home.example", "192.168.1.20")]);
    let router = router(resolver.clone()).await;

    let mut meta = Metadata::for_host("nas.home.example", 443);
    let route = router.route(&mut meta).await;
    assert_eq!(route.target, "DIRECT");
    assert_eq!(route.rule.as_ref().map(|r| r.index), Some(4));
    assert_eq!(route.resolved_ip, Some("192.168.1.20".parse().unwrap()));
    assert_eq!(meta.dst_ip, route.resolved_ip);
    assert!(meta.dns_resolved);
    assert_eq!(resolver.calls(), 1);
}

#[tokio::test]
async fn failed_resolution_falls_through() {
    let resolver = StaticResolver::with(&[]);
    let router = router(resolver.clone()).await;

    let mut meta = Metadata::for_host("unknown.example", 443);
    let route = router.route(&mut meta).await;
    assert_eq!(route.target, "PROXY");
    assert_eq!(route.rule.as_ref().map(|r| r.rule_type), Some("MATCH"));
    assert!(route.resolved_ip.is_none());
    assert_eq!(resolver.calls(), 1);
}

#[tokio::test]
async fn descriptors_with_ip_never_resolve() {
    let resolver = StaticResolver::with(&[]);
    let router = router(resolver.clone()).await;

    let mut meta = Metadata::for_ip("10.1.2.3".parse().unwrap(), 22);
    assert_eq!(router.route(&mut meta).await.target, "DIRECT");
    let mut meta = Metadata::for_ip("192.168.5.5".parse().unwrap(), 22);
    assert_eq!(router.route(&mut meta).await.target, "DIRECT");
    assert_eq!(resolver.calls(), 0);
}

#[tokio::test]
async fn no_match_falls_back_to_direct() {
    let list = build_rule_list(&config("rules: ['DOMAIN,only.example,REJECT']"))
        .await
        .unwrap();
    let router = Router::new(list, StaticResolver::with(&[]));
    let route = router
        .route(&mut Metadata::for_host("other.example", 80))
        .await;
    assert_eq!(route.target, "DIRECT");
    assert!(route.rule.is_none());
}

#[tokio::test]
async fn reload_swaps_rules_and_closes_old_providers() {
    let router = router(StaticResolver::with(&[])).await;
    router.start_providers();
    let old = router.rules();
    let old_lan = old.provider("lan").unwrap().clone();

    let list = build_rule_list(&config(
        r#"
rules: ["DOMAIN-SUFFIX,video.example,REJECT", "MATCH,DIRECT"]
"#,
    ))
    .await
    .unwrap();
    router.reload(list);

    let route = router
        .route(&mut Metadata::for_host("cdn.video.example", 443))
        .await;
    assert_eq!(route.target, "REJECT");
    assert_eq!(router.rules().provider_count(), 0);
    assert!(!old_lan.is_running());
    // Routes that captured the old list still match against it.
    assert!(old_lan.count() > 0);
}

#[tokio::test]
async fn file_provider_loads_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ads.yaml");
    std::fs::write(&path, "payload:\n  - '+.doubleclick.example'\n").unwrap();

    let yaml = format!(
        r#"
rules: ["RULE-SET,ads,REJECT", "MATCH,DIRECT"]
rule-providers:
  ads:
    type: file
    behavior: domain
    path: "{}"
"#,
        path.display()
    );
    let list = build_rule_list(&config(&yaml)).await.unwrap();
    assert_eq!(list.provider("ads").unwrap().count(), 1);
    let router = Router::new(list, StaticResolver::with(&[]));
    let route = router
        .route(&mut Metadata::for_host("ad.doubleclick.example", 443))
        .await;
    assert_eq!(route.target, "REJECT");
}

#[tokio::test]
async fn build_errors() {
    let err = build_rule_list(&config("rules: ['DOMAIN,a.example,NOWHERE']"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        RouterError::Rules(RulesError::UnknownAdapter { .. })
    ));

    let err = build_rule_list(&config("rules: ['RULE-SET,missing,DIRECT']"))
        .await
        .unwrap_err();
    assert!(matches!(err, RouterError::Rules(RulesError::UnknownRuleSet(_))));

    let err = build_rule_list(&config(
        r#"
rule-providers:
  gone:
    type: file
    behavior: domain
    path: /nonexistent/switchyard/gone.yaml
"#,
    ))
    .await
    .unwrap_err();
    assert!(matches!(err, RouterError::Provider { ref name, .. } if name == "gone"));
}

#[tokio::test]
async fn run_stops_on_cancel() {
    let router = Arc::new(router(StaticResolver::with(&[])).await);
    let shutdown = CancellationToken::new();
    let task = tokio::spawn(run_with_shutdown(router.clone(), shutdown.clone()));
    shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .unwrap()
        .unwrap();
    for provider in router.rules().providers() {
        assert!(!provider.is_running());
    }
}
