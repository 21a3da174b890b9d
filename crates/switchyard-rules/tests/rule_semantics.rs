//! End-to-end rule list behavior: combinators, geo cache sharing and
//! resolution requests.

use std::sync::Arc;

use ipnet::IpNet;

use switchyard_rules::geo::{GeoDataLoader, GeoMatcherCache, GeoMode, GeoSiteEntry};
use switchyard_rules::{Decision, Metadata, Network, ParseContext, RuleListBuilder, RulesError};

struct Fixture;

impl GeoDataLoader for Fixture {
    fn load_geoip(&self, code: &str) -> Result<Vec<IpNet>, RulesError> {
        match code {
            "cn" => Ok(vec!["1.0.1.0/24".parse().unwrap(), "1.0.2.0/23".parse().unwrap()]),
            "jp" => Ok(vec!["1.0.16.0/20".parse().unwrap()]),
            other => Err(RulesError::GeoData(format!("no list for {other}"))),
        }
    }

    fn load_geosite(&self, code: &str) -> Result<Vec<GeoSiteEntry>, RulesError> {
        match code {
            "cn" => Ok(vec![
                GeoSiteEntry::Domain("baidu.com".into()),
                GeoSiteEntry::Full("qq.com".into()),
            ]),
            other => Err(RulesError::GeoData(format!("no list for {other}"))),
        }
    }
}

fn geodata_ctx() -> (ParseContext, Arc<GeoMatcherCache>) {
    let cache = Arc::new(GeoMatcherCache::new(Arc::new(Fixture)));
    let ctx = ParseContext {
        geo_mode: GeoMode::GeoData,
        geo_cache: Some(cache.clone()),
        ..Default::default()
    };
    (ctx, cache)
}

#[test]
fn same_country_loads_once() {
    let (ctx, cache) = geodata_ctx();
    let list = RuleListBuilder::new(&ctx)
        .build([
            "GEOIP,CN,DIRECT",
            "AND,((NETWORK,UDP),(GEOIP,cn)),QUIC-CN",
            "GEOIP,CN,PROXY,no-resolve",
            "MATCH,PROXY",
        ])
        .unwrap();
    assert_eq!(cache.load_count(), 1);
    assert_eq!(list.rule_count(), 4);

    // Reverse polarity is its own entry.
    RuleListBuilder::new(&ctx)
        .build(["GEOIP,!cn,PROXY"])
        .unwrap();
    assert_eq!(cache.load_count(), 2);

    let mut meta = Metadata::for_ip("1.0.1.9".parse().unwrap(), 443);
    assert_eq!(list.evaluate(&mut meta).target(), Some("DIRECT"));
    assert!(meta.dst_geoip.matched.iter().any(|c| c == "cn"));
}

#[test]
fn geosite_and_geoip_together() {
    let (ctx, cache) = geodata_ctx();
    let list = RuleListBuilder::new(&ctx)
        .build(["GEOSITE,cn,DIRECT", "GEOIP,jp,JP", "MATCH,PROXY"])
        .unwrap();
    assert_eq!(cache.load_count(), 2);

    let mut meta = Metadata::for_host("www.baidu.com", 443);
    assert_eq!(list.evaluate(&mut meta).target(), Some("DIRECT"));
    let mut meta = Metadata::for_host("www.qq.com", 443);
    assert!(matches!(list.evaluate(&mut meta), Decision::NeedIp { resume_at: 1 }));
    meta.dst_ip = Some("1.0.16.1".parse().unwrap());
    meta.dns_resolved = true;
    assert_eq!(list.evaluate_from(&mut meta, 1).target(), Some("JP"));
}

#[test]
fn combinator_examples() {
    let ctx = ParseContext::default();
    let list = RuleListBuilder::new(&ctx)
        .build([
            "AND,((DOMAIN,baidu.com),(NETWORK,TCP),(DST-PORT,10001-65535)),AND-HIT",
            "NOT,((DST-PORT,6000-6500)),NOT-HIT",
            "MATCH,FALLTHROUGH",
        ])
        .unwrap();

    let mut meta = Metadata::for_host("baidu.com", 20000);
    assert_eq!(list.evaluate(&mut meta).target(), Some("AND-HIT"));

    let mut meta = Metadata::for_host("baidu.com", 20000);
    meta.network = Network::Udp;
    assert_eq!(list.evaluate(&mut meta).target(), Some("NOT-HIT"));

    let mut meta = Metadata::for_host("baidu.com", 6100);
    meta.network = Network::Udp;
    assert_eq!(list.evaluate(&mut meta).target(), Some("FALLTHROUGH"));
}

#[test]
fn combinator_requests_resolution() {
    let (ctx, _cache) = geodata_ctx();
    let list = RuleListBuilder::new(&ctx)
        .build(["AND,((DOMAIN,example.com),(GEOIP,CN)),CN", "MATCH,PROXY"])
        .unwrap();
    assert!(list.rules()[0].should_resolve_ip());

    // Resolution is requested even for hosts the DOMAIN child rejects,
    // since the combinator reports the union of its children.
    let mut meta = Metadata::for_host("other.org", 443);
    assert_eq!(list.evaluate(&mut meta), Decision::NeedIp { resume_at: 0 });
}

#[test]
fn unbalanced_logic_fails_the_whole_list() {
    let ctx = ParseContext::default();
    let err = RuleListBuilder::new(&ctx)
        .build([
            "DOMAIN,a.com,PROXY",
            "AND,((DOMAIN,a.com),(NETWORK,TCP),PROXY",
        ])
        .unwrap_err();
    assert!(matches!(err, RulesError::Parse(_)));
}
