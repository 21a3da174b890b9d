//! Rule parsing.
//!
//! [`RuleParser`] turns rule lines into [`Rule`]s. Geo lookups, the
//! matcher cache and other collaborators come in through a
//! [`ParseContext`]; rule providers and sub-rule groups are attached when
//! the surrounding rule list has them.

pub mod groups;
pub mod line;
pub mod payload;

use std::cell::Cell;
use std::sync::Arc;

use rustc_hash::FxHashMap;
use tracing::warn;

use crate::error::RulesError;
use crate::geo::{AsnLookup, CountryLookup, GeoMatcherCache, GeoMode, LAN_CODE, LanClassifier};
use crate::mac::MacLookup;
use crate::metadata::Network;
use crate::provider::RuleProvider;
use crate::rule::domain::DomainRule;
use crate::rule::inbound::{SrcMac, alternatives, parse_in_types};
use crate::rule::ip::{Asn, GeoIp, GeoIpBackend, IpCidr, IpSuffix};
use crate::rule::logic::{Logic, LogicOp, SubRule, top_level_groups};
use crate::rule::port::{RangeList, parse_dscp, parse_ports};
use crate::rule::process::ProcessRule;
use crate::rule::ruleset::RuleSetRef;
use crate::rule::schedule::Schedule;
use crate::rule::{PortSide, Rule, RuleKind, RuleParams, RuleType};

pub use groups::build_sub_rule_groups;
pub use line::{RawRule, split_entry, split_line};
pub use payload::{PayloadFormat, read_entries};

/// Named rule providers visible to RULE-SET lines.
pub type ProviderMap = FxHashMap<String, Arc<RuleProvider>>;

/// Built sub-rule groups visible to SUB-RULE lines.
pub type SubRuleMap = FxHashMap<String, Arc<[Rule]>>;

/// Collaborators used while building predicates.
#[derive(Clone, Default)]
pub struct ParseContext {
    pub geo_mode: GeoMode,
    /// Required for GEOSITE, and for GEOIP in geo-data mode.
    pub geo_cache: Option<Arc<GeoMatcherCache>>,
    pub country: Option<Arc<dyn CountryLookup>>,
    pub asn: Option<Arc<dyn AsnLookup>>,
    pub lan: LanClassifier,
    pub mac: Option<Arc<dyn MacLookup>>,
}

impl std::fmt::Debug for ParseContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParseContext")
            .field("geo_mode", &self.geo_mode)
            .field("geo_cache", &self.geo_cache.is_some())
            .field("country", &self.country.is_some())
            .field("asn", &self.asn.is_some())
            .field("lan", &self.lan)
            .field("mac", &self.mac.is_some())
            .finish()
    }
}

/// Builds rules from lines.
pub struct RuleParser<'a> {
    ctx: &'a ParseContext,
    providers: Option<&'a ProviderMap>,
    sub_rules: Option<&'a SubRuleMap>,
    /// Entries of a classical provider: no MATCH, SUB-RULE or RULE-SET.
    classical: bool,
    warned_no_mmdb: Cell<bool>,
}

impl<'a> RuleParser<'a> {
    pub fn new(ctx: &'a ParseContext) -> Self {
        Self {
            ctx,
            providers: None,
            sub_rules: None,
            classical: false,
            warned_no_mmdb: Cell::new(false),
        }
    }

    /// Parser for classical provider entries.
    pub fn classical(ctx: &'a ParseContext) -> Self {
        Self {
            classical: true,
            ..Self::new(ctx)
        }
    }

    pub fn with_providers(mut self, providers: &'a ProviderMap) -> Self {
        self.providers = Some(providers);
        self
    }

    pub fn with_sub_rules(mut self, sub_rules: &'a SubRuleMap) -> Self {
        self.sub_rules = Some(sub_rules);
        self
    }

    /// Parse a rule-list line with a target.
    pub fn parse_line(&self, line: &str) -> Result<Rule, RulesError> {
        let raw = split_line(line)?;
        self.parse_raw(&raw, false)
    }

    /// Parse a provider entry, which carries no target.
    pub fn parse_entry(&self, line: &str) -> Result<Rule, RulesError> {
        let raw = split_entry(line)?;
        self.parse_raw(&raw, true)
    }

    fn parse_raw(&self, raw: &RawRule<'_>, nested: bool) -> Result<Rule, RulesError> {
        let params = RuleParams::parse(raw.params.iter().copied());
        self.parse_rule(raw.rule_type, raw.payload, raw.target, params, nested)
    }

    /// Build one rule from its parts.
    ///
    /// `nested` is set for combinator children and provider entries, where
    /// MATCH and SUB-RULE are rejected.
    pub fn parse_rule(
        &self,
        rule_type: RuleType,
        payload: &str,
        target: &str,
        mut params: RuleParams,
        nested: bool,
    ) -> Result<Rule, RulesError> {
        if rule_type.is_source() {
            params.src = true;
            params.no_resolve = true;
        }
        let src = params.src;
        let mut reported = rule_type;
        let mut payload_text = payload.trim().to_string();

        let kind = match rule_type {
            RuleType::Match | RuleType::SubRule if nested || self.classical => {
                return Err(RulesError::Parse(format!(
                    "{rule_type} is only allowed at the top level of a rule list"
                )));
            }
            RuleType::RuleSet if self.classical => {
                return Err(RulesError::Parse(
                    "RULE-SET cannot be used inside a classical provider".into(),
                ));
            }
            RuleType::Domain => RuleKind::Domain(DomainRule::exact(payload)?),
            RuleType::DomainSuffix => RuleKind::Domain(DomainRule::suffix(payload)?),
            RuleType::DomainKeyword => RuleKind::Domain(DomainRule::keyword(payload)?),
            RuleType::DomainRegex => RuleKind::Domain(DomainRule::regex(payload.trim())?),
            RuleType::GeoSite => {
                let cache = self.geo_cache("GEOSITE")?;
                RuleKind::Domain(DomainRule::GeoSite(cache.site_matcher(payload)?))
            }
            RuleType::GeoIp | RuleType::SrcGeoIp => {
                let geoip = self.geoip(payload, src)?;
                payload_text = geoip.code.clone();
                RuleKind::GeoIp(geoip)
            }
            RuleType::IpAsn | RuleType::SrcIpAsn => {
                RuleKind::Asn(Asn::parse(payload, self.ctx.asn.clone(), src)?)
            }
            RuleType::IpCidr | RuleType::SrcIpCidr => {
                RuleKind::IpCidr(IpCidr::parse(payload, src)?)
            }
            RuleType::IpSuffix | RuleType::SrcIpSuffix => {
                RuleKind::IpSuffix(IpSuffix::parse(payload, src)?)
            }
            RuleType::SrcPort => self.port(PortSide::Src, rule_type, payload)?,
            RuleType::DstPort => self.port(PortSide::Dst, rule_type, payload)?,
            RuleType::InPort => self.port(PortSide::In, rule_type, payload)?,
            RuleType::Dscp => RuleKind::Dscp(parse_dscp(payload)?),
            RuleType::ProcessName => RuleKind::Process(ProcessRule::parse(payload, false, false)?),
            RuleType::ProcessPath => RuleKind::Process(ProcessRule::parse(payload, true, false)?),
            RuleType::ProcessNameRegex => {
                RuleKind::Process(ProcessRule::parse(payload, false, true)?)
            }
            RuleType::ProcessPathRegex => {
                RuleKind::Process(ProcessRule::parse(payload, true, true)?)
            }
            RuleType::Network => RuleKind::Network(payload.trim().parse::<Network>()?),
            RuleType::Uid => RuleKind::Uid(RangeList::parse("UID", payload)?),
            RuleType::InType => RuleKind::InType(parse_in_types(payload)?),
            RuleType::InUser => RuleKind::InUser(alternatives("IN-USER", payload)?),
            RuleType::InName => RuleKind::InName(alternatives("IN-NAME", payload)?),
            RuleType::SrcMac => RuleKind::SrcMac(SrcMac::parse(payload, self.ctx.mac.clone())?),
            RuleType::Schedule => {
                let schedule = Schedule::parse(payload)?;
                payload_text = schedule.to_string();
                RuleKind::Schedule(schedule)
            }
            RuleType::RuleSet => RuleKind::RuleSet(self.rule_set(payload, src)?),
            RuleType::And | RuleType::Or | RuleType::Not => {
                let op = match rule_type {
                    RuleType::And => LogicOp::And,
                    RuleType::Or => LogicOp::Or,
                    _ => LogicOp::Not,
                };
                let logic = self.logic(op, payload)?;
                payload_text = logic.to_string();
                RuleKind::Logic(logic)
            }
            RuleType::SubRule => RuleKind::SubRule(self.sub_rule(payload, target)?),
            RuleType::Match => RuleKind::Match,
        };

        if src {
            reported = reported.source_variant();
        }
        Ok(Rule::new(reported, kind, payload_text, target, params))
    }

    fn geo_cache(&self, kind: &'static str) -> Result<&Arc<GeoMatcherCache>, RulesError> {
        self.ctx
            .geo_cache
            .as_ref()
            .ok_or_else(|| RulesError::GeoData(format!("{kind} rules need a geodata directory")))
    }

    fn port(&self, side: PortSide, rule_type: RuleType, payload: &str) -> Result<RuleKind, RulesError> {
        Ok(RuleKind::Port {
            side,
            ports: parse_ports(rule_type.as_str(), payload)?,
        })
    }

    fn geoip(&self, payload: &str, src: bool) -> Result<GeoIp, RulesError> {
        let code = payload.trim().to_ascii_lowercase();
        if code.is_empty() || code == "!" {
            return Err(RulesError::payload("GEOIP", "empty country code"));
        }
        let backend = if code == LAN_CODE {
            GeoIpBackend::Lan(self.ctx.lan)
        } else {
            match self.ctx.geo_mode {
                GeoMode::GeoData => GeoIpBackend::GeoData(self.geo_cache("GEOIP")?.ip_matcher(&code)?),
                GeoMode::Mmdb => {
                    if code.starts_with('!') {
                        return Err(RulesError::payload(
                            "GEOIP",
                            format!("'{code}': inverted codes need geodata mode"),
                        ));
                    }
                    if self.ctx.country.is_none() && !self.warned_no_mmdb.replace(true) {
                        warn!("GEOIP rules are configured but no GeoIP database is loaded; they will never match");
                    }
                    GeoIpBackend::Database(self.ctx.country.clone())
                }
            }
        };
        Ok(GeoIp { code, backend, src })
    }

    fn rule_set(&self, name: &str, src: bool) -> Result<RuleSetRef, RulesError> {
        let name = name.trim();
        let provider = self
            .providers
            .and_then(|p| p.get(name))
            .ok_or_else(|| RulesError::UnknownRuleSet(name.to_string()))?;
        Ok(RuleSetRef::new(Arc::clone(provider), src))
    }

    /// Build a combinator from its parenthesized payload.
    pub fn logic(&self, op: LogicOp, payload: &str) -> Result<Logic, RulesError> {
        let children = top_level_groups(payload)?
            .into_iter()
            .map(|group| self.child(group))
            .collect::<Result<Vec<_>, _>>()?;
        Logic::new(op, children)
    }

    fn child(&self, group: &str) -> Result<Rule, RulesError> {
        if !group.contains(',') {
            return Err(RulesError::Parse(format!("'{group}': expected TYPE,VALUE")));
        }
        let raw = split_entry(group)?;
        self.parse_raw(&raw, true)
    }

    /// `SUB-RULE,(COND),group`; `(MATCH)` is an unconditional condition.
    fn sub_rule(&self, payload: &str, group: &str) -> Result<SubRule, RulesError> {
        let rules = self
            .sub_rules
            .and_then(|m| m.get(group))
            .ok_or_else(|| RulesError::UnknownSubRule(group.to_string()))?;
        let groups = top_level_groups(&format!("({payload})"))?
            .into_iter()
            .map(str::to_string)
            .collect::<Vec<_>>();
        let [cond] = groups.as_slice() else {
            return Err(RulesError::Parse(format!(
                "SUB-RULE condition must contain one rule, got {}",
                groups.len()
            )));
        };
        let condition = if cond.trim().parse::<RuleType>().ok() == Some(RuleType::Match) {
            None
        } else {
            Some(self.child(cond)?)
        };
        Ok(SubRule::new(condition, group, Arc::clone(rules)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::{GeoDataLoader, GeoSiteEntry};
    use crate::metadata::Metadata;
    use ipnet::IpNet;

    struct Loader;

    impl GeoDataLoader for Loader {
        fn load_geoip(&self, code: &str) -> Result<Vec<IpNet>, RulesError> {
            match code {
                "cn" => Ok(vec!["1.0.0.0/8".parse().unwrap()]),
                _ => Err(RulesError::GeoData(code.into())),
            }
        }

        fn load_geosite(&self, code: &str) -> Result<Vec<GeoSiteEntry>, RulesError> {
            match code {
                "google" => Ok(vec![GeoSiteEntry::Domain("google.com".into())]),
                _ => Err(RulesError::GeoData(code.into())),
            }
        }
    }

    fn geodata_ctx() -> ParseContext {
        ParseContext {
            geo_mode: GeoMode::GeoData,
            geo_cache: Some(Arc::new(GeoMatcherCache::new(Arc::new(Loader)))),
            ..Default::default()
        }
    }

    fn tcp(host: &str, port: u16) -> Metadata {
        Metadata::for_host(host, port)
    }

    #[test]
    fn and_semantics() {
        let ctx = ParseContext::default();
        let parser = RuleParser::new(&ctx);
        let rule = parser
            .parse_line("AND,((DOMAIN,baidu.com),(NETWORK,TCP),(DST-PORT,10001-65535)),DIRECT")
            .unwrap();
        let mut meta = tcp("baidu.com", 20000);
        assert_eq!(rule.matches(&mut meta), Some("DIRECT"));
        meta.network = Network::Udp;
        assert_eq!(rule.matches(&mut meta), None);
    }

    #[test]
    fn not_semantics() {
        let ctx = ParseContext::default();
        let parser = RuleParser::new(&ctx);
        let rule = parser.parse_line("NOT,((DST-PORT,6000-6500)),REJECT").unwrap();
        assert_eq!(rule.matches(&mut tcp("a.com", 6100)), None);
        assert_eq!(rule.matches(&mut tcp("a.com", 7000)), Some("REJECT"));
        assert_eq!(rule.payload(), "(!(DST-PORT,6000-6500))");
    }

    #[test]
    fn or_matches_any_child() {
        let ctx = ParseContext::default();
        let parser = RuleParser::new(&ctx);
        let rule = parser
            .parse_line("OR,((DOMAIN,a.com),(DOMAIN-SUFFIX,b.com),(DST-PORT,22)),PROXY")
            .unwrap();
        assert!(rule.matches(&mut tcp("x.b.com", 443)).is_some());
        assert!(rule.matches(&mut tcp("c.com", 22)).is_some());
        assert!(rule.matches(&mut tcp("c.com", 443)).is_none());
        assert_eq!(
            rule.payload(),
            "((DOMAIN,a.com) || (DOMAIN-SUFFIX,b.com) || (DST-PORT,22))"
        );
    }

    #[test]
    fn nested_combinators() {
        let ctx = ParseContext::default();
        let parser = RuleParser::new(&ctx);
        let rule = parser
            .parse_line("OR,((AND,((DOMAIN,a.com),(NETWORK,UDP))),(NOT,((DST-PORT,1-1024)))),X")
            .unwrap();
        let mut meta = tcp("a.com", 443);
        assert!(rule.matches(&mut meta).is_none());
        meta.network = Network::Udp;
        assert!(rule.matches(&mut meta).is_some());
        assert!(rule.matches(&mut tcp("b.com", 8080)).is_some());
    }

    #[test]
    fn resolve_ip_propagates_through_and() {
        let ctx = geodata_ctx();
        let parser = RuleParser::new(&ctx);
        let rule = parser.parse_line("AND,((DOMAIN,a.com),(GEOIP,CN)),DIRECT").unwrap();
        assert!(rule.should_resolve_ip());
        let rule = parser
            .parse_line("AND,((DOMAIN,a.com),(GEOIP,CN,no-resolve)),DIRECT")
            .unwrap();
        assert!(!rule.should_resolve_ip());
        let rule = parser.parse_line("OR,((DOMAIN,a.com),(PROCESS-NAME,curl)),DIRECT").unwrap();
        assert!(rule.should_find_process());
    }

    #[test]
    fn combinator_rejects_bad_children() {
        let ctx = ParseContext::default();
        let parser = RuleParser::new(&ctx);
        parser.parse_line("AND,((MATCH,x)),DIRECT").unwrap_err();
        parser.parse_line("AND,((SUB-RULE,(MATCH),g)),DIRECT").unwrap_err();
        parser.parse_line("NOT,((DOMAIN,a.com),(DOMAIN,b.com)),DIRECT").unwrap_err();
        parser.parse_line("AND,((DOMAIN)),DIRECT").unwrap_err();
        assert!(matches!(
            parser.logic(LogicOp::And, "(DOMAIN,a.com),(NETWORK,TCP))").unwrap_err(),
            RulesError::Parse(_)
        ));
    }

    #[test]
    fn source_kinds() {
        let ctx = ParseContext::default();
        let parser = RuleParser::new(&ctx);
        let rule = parser.parse_line("SRC-IP-CIDR,192.168.0.0/16,DIRECT").unwrap();
        assert_eq!(rule.rule_type(), RuleType::SrcIpCidr);
        assert!(!rule.should_resolve_ip());
        let rule = parser.parse_line("IP-CIDR,10.0.0.0/8,DIRECT,src").unwrap();
        assert_eq!(rule.rule_type(), RuleType::SrcIpCidr);
        let mut meta = tcp("a.com", 443);
        meta.src_ip = Some("10.1.1.1".parse().unwrap());
        assert_eq!(rule.matches(&mut meta), Some("DIRECT"));
    }

    #[test]
    fn geoip_modes() {
        let ctx = ParseContext::default();
        let parser = RuleParser::new(&ctx);
        parser.parse_line("GEOIP,!CN,DIRECT").unwrap_err();
        let lan = parser.parse_line("GEOIP,LAN,DIRECT").unwrap();
        assert_eq!(lan.payload(), "lan");
        let mut meta = Metadata::for_ip("192.168.1.1".parse().unwrap(), 80);
        assert!(lan.matches(&mut meta).is_some());

        let ctx = geodata_ctx();
        let parser = RuleParser::new(&ctx);
        let rule = parser.parse_line("GEOIP,!cn,PROXY").unwrap();
        let mut meta = Metadata::for_ip("8.8.8.8".parse().unwrap(), 53);
        assert!(rule.matches(&mut meta).is_some());
        parser.parse_line("GEOIP,zz,PROXY").unwrap_err();
    }

    #[test]
    fn geosite_needs_cache() {
        let ctx = ParseContext::default();
        RuleParser::new(&ctx)
            .parse_line("GEOSITE,google,PROXY")
            .unwrap_err();
        let ctx = geodata_ctx();
        let rule = RuleParser::new(&ctx)
            .parse_line("GEOSITE,google,PROXY")
            .unwrap();
        assert!(rule.matches(&mut tcp("mail.google.com", 443)).is_some());
    }

    #[test]
    fn unknown_references() {
        let ctx = ParseContext::default();
        let parser = RuleParser::new(&ctx);
        assert!(matches!(
            parser.parse_line("RULE-SET,ads,REJECT").unwrap_err(),
            RulesError::UnknownRuleSet(_)
        ));
        assert!(matches!(
            parser.parse_line("SUB-RULE,(NETWORK,TCP),missing").unwrap_err(),
            RulesError::UnknownSubRule(_)
        ));
    }

    #[test]
    fn sub_rule_delegates_to_group() {
        let ctx = ParseContext::default();
        let base = RuleParser::new(&ctx);
        let group: Arc<[Rule]> = vec![
            base.parse_line("DST-PORT,22,SSH").unwrap(),
            base.parse_line("DOMAIN-SUFFIX,example.com,WEB").unwrap(),
        ]
        .into();
        let mut groups = SubRuleMap::default();
        groups.insert("tcp".into(), group);
        let parser = RuleParser::new(&ctx).with_sub_rules(&groups);

        let rule = parser.parse_line("SUB-RULE,(NETWORK,TCP),tcp").unwrap();
        assert_eq!(rule.matches(&mut tcp("host.example.com", 443)), Some("WEB"));
        assert_eq!(rule.matches(&mut tcp("other.org", 22)), Some("SSH"));
        // Condition matched but the group did not.
        assert_eq!(rule.matches(&mut tcp("other.org", 443)), None);
        let mut udp = tcp("host.example.com", 443);
        udp.network = Network::Udp;
        assert_eq!(rule.matches(&mut udp), None);

        let always = parser.parse_line("SUB-RULE,(MATCH),tcp").unwrap();
        assert_eq!(always.matches(&mut udp), Some("WEB"));
    }

    #[test]
    fn classical_entries() {
        let ctx = ParseContext::default();
        let parser = RuleParser::classical(&ctx);
        let rule = parser.parse_entry("DOMAIN-SUFFIX,google.com,Proxy").unwrap();
        assert_eq!(rule.adapter(), "");
        assert!(rule.matches(&mut tcp("www.google.com", 443)).is_some());
        parser.parse_entry("MATCH").unwrap_err();
        parser.parse_entry("RULE-SET,other").unwrap_err();
        parser.parse_entry("SUB-RULE,(MATCH)").unwrap_err();
    }
}
