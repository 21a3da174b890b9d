//! Rule and predicate types.
//!
//! A [`Rule`] is one entry of a rule list: a predicate ([`RuleKind`]), the
//! payload text it was built from, the target adapter, and the optional
//! line parameters (`no-resolve`, `src`, a network or process filter, a
//! source prefix). Rules are immutable once built; matching only writes to
//! the per-pass annotation caches of the [`Metadata`].

pub mod domain;
pub mod inbound;
pub mod ip;
pub mod logic;
pub mod port;
pub mod process;
pub mod ruleset;
pub mod schedule;

use std::fmt;
use std::str::FromStr;

use ipnet::IpNet;
use tracing::debug;

use crate::error::RulesError;
use crate::matcher::parse_cidr;
use crate::metadata::{InboundType, Metadata, Network};

use self::domain::DomainRule;
use self::inbound::{SrcMac, one_of};
use self::ip::{Asn, GeoIp, IpCidr, IpSuffix};
use self::logic::{Logic, SubRule};
use self::port::RangeList;
use self::process::ProcessRule;
use self::ruleset::RuleSetRef;
use self::schedule::Schedule;

/// Rule kind tag, displayed as its configuration keyword.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuleType {
    Domain,
    DomainSuffix,
    DomainKeyword,
    DomainRegex,
    GeoSite,
    GeoIp,
    SrcGeoIp,
    IpAsn,
    SrcIpAsn,
    IpCidr,
    SrcIpCidr,
    IpSuffix,
    SrcIpSuffix,
    SrcPort,
    DstPort,
    InPort,
    Dscp,
    ProcessName,
    ProcessPath,
    ProcessNameRegex,
    ProcessPathRegex,
    Network,
    Uid,
    InType,
    InUser,
    InName,
    SrcMac,
    Schedule,
    RuleSet,
    And,
    Or,
    Not,
    SubRule,
    Match,
}

impl RuleType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Domain => "DOMAIN",
            Self::DomainSuffix => "DOMAIN-SUFFIX",
            Self::DomainKeyword => "DOMAIN-KEYWORD",
            Self::DomainRegex => "DOMAIN-REGEX",
            Self::GeoSite => "GEOSITE",
            Self::GeoIp => "GEOIP",
            Self::SrcGeoIp => "SRC-GEOIP",
            Self::IpAsn => "IP-ASN",
            Self::SrcIpAsn => "SRC-IP-ASN",
            Self::IpCidr => "IP-CIDR",
            Self::SrcIpCidr => "SRC-IP-CIDR",
            Self::IpSuffix => "IP-SUFFIX",
            Self::SrcIpSuffix => "SRC-IP-SUFFIX",
            Self::SrcPort => "SRC-PORT",
            Self::DstPort => "DST-PORT",
            Self::InPort => "IN-PORT",
            Self::Dscp => "DSCP",
            Self::ProcessName => "PROCESS-NAME",
            Self::ProcessPath => "PROCESS-PATH",
            Self::ProcessNameRegex => "PROCESS-NAME-REGEX",
            Self::ProcessPathRegex => "PROCESS-PATH-REGEX",
            Self::Network => "NETWORK",
            Self::Uid => "UID",
            Self::InType => "IN-TYPE",
            Self::InUser => "IN-USER",
            Self::InName => "IN-NAME",
            Self::SrcMac => "SRC-MAC",
            Self::Schedule => "SCHEDULE",
            Self::RuleSet => "RULE-SET",
            Self::And => "AND",
            Self::Or => "OR",
            Self::Not => "NOT",
            Self::SubRule => "SUB-RULE",
            Self::Match => "MATCH",
        }
    }

    /// Kinds that always look at the source address and never resolve.
    pub fn is_source(&self) -> bool {
        matches!(
            self,
            Self::SrcGeoIp | Self::SrcIpAsn | Self::SrcIpCidr | Self::SrcIpSuffix
        )
    }

    pub fn is_logic(&self) -> bool {
        matches!(self, Self::And | Self::Or | Self::Not)
    }

    /// Kinds whose payload is a regular expression and may contain commas.
    pub fn is_regex(&self) -> bool {
        matches!(
            self,
            Self::DomainRegex | Self::ProcessNameRegex | Self::ProcessPathRegex
        )
    }

    /// The source-address flavor reported when a `src` parameter is given.
    pub(crate) fn source_variant(self) -> Self {
        match self {
            Self::GeoIp => Self::SrcGeoIp,
            Self::IpAsn => Self::SrcIpAsn,
            Self::IpCidr => Self::SrcIpCidr,
            Self::IpSuffix => Self::SrcIpSuffix,
            other => other,
        }
    }
}

impl FromStr for RuleType {
    type Err = RulesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let rule_type = match s.trim().to_ascii_uppercase().as_str() {
            "DOMAIN" => Self::Domain,
            "DOMAIN-SUFFIX" => Self::DomainSuffix,
            "DOMAIN-KEYWORD" => Self::DomainKeyword,
            "DOMAIN-REGEX" => Self::DomainRegex,
            "GEOSITE" => Self::GeoSite,
            "GEOIP" => Self::GeoIp,
            "SRC-GEOIP" => Self::SrcGeoIp,
            "IP-ASN" => Self::IpAsn,
            "SRC-IP-ASN" => Self::SrcIpAsn,
            "IP-CIDR" | "IP-CIDR6" => Self::IpCidr,
            "SRC-IP-CIDR" => Self::SrcIpCidr,
            "IP-SUFFIX" => Self::IpSuffix,
            "SRC-IP-SUFFIX" => Self::SrcIpSuffix,
            "SRC-PORT" => Self::SrcPort,
            "DST-PORT" => Self::DstPort,
            "IN-PORT" => Self::InPort,
            "DSCP" => Self::Dscp,
            "PROCESS-NAME" => Self::ProcessName,
            "PROCESS-PATH" => Self::ProcessPath,
            "PROCESS-NAME-REGEX" => Self::ProcessNameRegex,
            "PROCESS-PATH-REGEX" => Self::ProcessPathRegex,
            "NETWORK" => Self::Network,
            "UID" => Self::Uid,
            "IN-TYPE" => Self::InType,
            "IN-USER" => Self::InUser,
            "IN-NAME" => Self::InName,
            "SRC-MAC" => Self::SrcMac,
            "SCHEDULE" => Self::Schedule,
            "RULE-SET" => Self::RuleSet,
            "AND" => Self::And,
            "OR" => Self::Or,
            "NOT" => Self::Not,
            "SUB-RULE" => Self::SubRule,
            "MATCH" | "FINAL" => Self::Match,
            _ => return Err(RulesError::InvalidRuleType(s.to_string())),
        };
        Ok(rule_type)
    }
}

impl fmt::Display for RuleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which port of the connection a port rule inspects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortSide {
    Src,
    Dst,
    In,
}

/// Trailing parameters of a rule line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleParams {
    /// Never trigger DNS resolution for this rule.
    pub no_resolve: bool,
    /// Match the source address instead of the destination.
    pub src: bool,
    /// Only match connections of this transport.
    pub network: Option<Network>,
    /// Only match connections from this process name.
    pub process: Option<String>,
    /// Only match connections whose source lies in this prefix.
    pub source_prefix: Option<IpNet>,
}

impl RuleParams {
    /// Parse parameter tokens. Unrecognized tokens are ignored.
    pub fn parse<'a>(tokens: impl IntoIterator<Item = &'a str>) -> Self {
        let mut params = Self::default();
        for token in tokens.into_iter().map(str::trim).filter(|t| !t.is_empty()) {
            if token.eq_ignore_ascii_case("no-resolve") {
                params.no_resolve = true;
            } else if token.eq_ignore_ascii_case("src") {
                params.src = true;
            } else if let Ok(network) = token.parse::<Network>() {
                params.network = Some(network);
            } else if let Some(name) = token.strip_prefix("P:").filter(|n| !n.is_empty()) {
                params.process = Some(name.to_string());
            } else if let Ok(net) = parse_cidr(token) {
                params.source_prefix = Some(net);
            } else {
                debug!(param = token, "ignoring unknown rule parameter");
            }
        }
        params
    }

    fn accepts(&self, meta: &Metadata) -> bool {
        if self.network.is_some_and(|n| n != meta.network) {
            return false;
        }
        if let Some(want) = &self.process
            && !meta
                .process
                .as_deref()
                .is_some_and(|p| p.eq_ignore_ascii_case(want))
        {
            return false;
        }
        if let Some(prefix) = &self.source_prefix
            && !meta
                .src_ip
                .is_some_and(|ip| prefix.contains(&ip.to_canonical()))
        {
            return false;
        }
        true
    }

    fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

impl fmt::Display for RuleParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        let mut put = |f: &mut fmt::Formatter<'_>, s: &dyn fmt::Display| {
            let sep = if first { "" } else { "," };
            first = false;
            write!(f, "{sep}{s}")
        };
        if self.no_resolve {
            put(f, &"no-resolve")?;
        }
        if self.src {
            put(f, &"src")?;
        }
        if let Some(network) = &self.network {
            put(f, &network.to_string().to_ascii_lowercase())?;
        }
        if let Some(process) = &self.process {
            put(f, &format_args!("P:{process}"))?;
        }
        if let Some(prefix) = &self.source_prefix {
            put(f, prefix)?;
        }
        Ok(())
    }
}

/// The predicate of a rule.
#[derive(Debug, Clone)]
pub enum RuleKind {
    Domain(DomainRule),
    GeoIp(GeoIp),
    Asn(Asn),
    IpCidr(IpCidr),
    IpSuffix(IpSuffix),
    Port { side: PortSide, ports: RangeList<u16> },
    Dscp(RangeList<u8>),
    Process(ProcessRule),
    Network(Network),
    Uid(RangeList<u32>),
    InType(Vec<InboundType>),
    InUser(Vec<String>),
    InName(Vec<String>),
    SrcMac(SrcMac),
    Schedule(Schedule),
    RuleSet(RuleSetRef),
    Logic(Logic),
    SubRule(SubRule),
    Match,
}

impl RuleKind {
    /// Evaluate the predicate. Never fails: missing inputs mean no match.
    pub fn matches(&self, meta: &mut Metadata) -> bool {
        match self {
            Self::Domain(rule) => meta.rule_host().is_some_and(|host| rule.matches(host)),
            Self::GeoIp(rule) => rule.matches(meta),
            Self::Asn(rule) => rule.matches(meta),
            Self::IpCidr(rule) => rule.matches(meta),
            Self::IpSuffix(rule) => rule.matches(meta),
            Self::Port { side, ports } => ports.contains(match side {
                PortSide::Src => meta.src_port,
                PortSide::Dst => meta.dst_port,
                PortSide::In => meta.in_port,
            }),
            Self::Dscp(list) => list.contains(meta.dscp),
            Self::Process(rule) => rule.matches(meta),
            Self::Network(network) => meta.network == *network,
            Self::Uid(list) => meta.uid.is_some_and(|uid| list.contains(uid)),
            Self::InType(types) => types.contains(&meta.inbound_type),
            Self::InUser(users) => one_of(users, meta.in_user.as_deref()),
            Self::InName(names) => one_of(names, meta.in_name.as_deref()),
            Self::SrcMac(rule) => rule.matches(meta),
            Self::Schedule(schedule) => schedule.matches_now(),
            Self::RuleSet(rule) => rule.matches(meta),
            Self::Logic(logic) => logic.matches(meta),
            Self::SubRule(sub) => sub.matches(meta).is_some(),
            Self::Match => true,
        }
    }

    fn should_resolve_ip(&self) -> bool {
        match self {
            Self::GeoIp(rule) => !rule.src,
            Self::Asn(rule) => !rule.src,
            Self::IpCidr(rule) => !rule.src,
            Self::IpSuffix(rule) => !rule.src,
            Self::RuleSet(rule) => rule.should_resolve_ip(),
            Self::Logic(logic) => logic.should_resolve_ip(),
            Self::SubRule(sub) => sub.should_resolve_ip(),
            _ => false,
        }
    }

    fn may_resolve_ip(&self) -> bool {
        match self {
            Self::RuleSet(rule) => rule.may_resolve_ip(),
            other => other.should_resolve_ip(),
        }
    }

    fn should_find_process(&self) -> bool {
        match self {
            Self::Process(_) | Self::Uid(_) => true,
            Self::RuleSet(rule) => rule.should_find_process(),
            Self::Logic(logic) => logic.should_find_process(),
            Self::SubRule(sub) => sub.should_find_process(),
            _ => false,
        }
    }

    fn may_find_process(&self) -> bool {
        match self {
            Self::RuleSet(rule) => rule.may_find_process(),
            other => other.should_find_process(),
        }
    }
}

/// One entry of a rule list.
#[derive(Debug, Clone)]
pub struct Rule {
    rule_type: RuleType,
    kind: RuleKind,
    payload: String,
    adapter: String,
    params: RuleParams,
}

impl Rule {
    pub fn new(
        rule_type: RuleType,
        kind: RuleKind,
        payload: impl Into<String>,
        adapter: impl Into<String>,
        params: RuleParams,
    ) -> Self {
        Self {
            rule_type,
            kind,
            payload: payload.into(),
            adapter: adapter.into(),
            params,
        }
    }

    pub fn rule_type(&self) -> RuleType {
        self.rule_type
    }

    pub fn kind(&self) -> &RuleKind {
        &self.kind
    }

    /// Payload as written in configuration, or the normalized form for
    /// combinators.
    pub fn payload(&self) -> &str {
        &self.payload
    }

    /// Configured target. For SUB-RULE this is the group name.
    pub fn adapter(&self) -> &str {
        &self.adapter
    }

    pub fn params(&self) -> &RuleParams {
        &self.params
    }

    /// Match the descriptor; returns the target on success.
    ///
    /// SUB-RULE returns the target chosen inside its group rather than its
    /// own adapter.
    pub fn matches(&self, meta: &mut Metadata) -> Option<&str> {
        if !self.params.accepts(meta) {
            return None;
        }
        match &self.kind {
            RuleKind::SubRule(sub) => sub.matches(meta),
            kind => kind.matches(meta).then_some(self.adapter.as_str()),
        }
    }

    /// True when this rule wants a resolved destination address.
    pub fn should_resolve_ip(&self) -> bool {
        !self.params.no_resolve && self.kind.should_resolve_ip()
    }

    /// True when this rule inspects process name, path or UID.
    pub fn should_find_process(&self) -> bool {
        self.params.process.is_some() || self.kind.should_find_process()
    }

    /// Upper bound of [`Rule::should_resolve_ip`] over any provider refresh.
    pub(crate) fn may_resolve_ip(&self) -> bool {
        !self.params.no_resolve && self.kind.may_resolve_ip()
    }

    pub(crate) fn may_find_process(&self) -> bool {
        self.params.process.is_some() || self.kind.may_find_process()
    }

    pub fn is_match_all(&self) -> bool {
        matches!(self.kind, RuleKind::Match)
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_match_all() {
            return write!(f, "{},{}", self.rule_type, self.adapter);
        }
        write!(f, "{},{}", self.rule_type, self.payload)?;
        if !self.adapter.is_empty() {
            write!(f, ",{}", self.adapter)?;
        }
        if !self.params.is_empty() {
            write!(f, ",{}", self.params)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rule_type_tokens() {
        assert_eq!("ip-cidr6".parse::<RuleType>().unwrap(), RuleType::IpCidr);
        assert_eq!("FINAL".parse::<RuleType>().unwrap(), RuleType::Match);
        assert_eq!(RuleType::SrcIpAsn.to_string(), "SRC-IP-ASN");
        assert!(matches!(
            "DOMAIN-WILDCARD".parse::<RuleType>().unwrap_err(),
            RulesError::InvalidRuleType(_)
        ));
        assert_eq!(RuleType::GeoIp.source_variant(), RuleType::SrcGeoIp);
        assert_eq!(RuleType::Domain.source_variant(), RuleType::Domain);
    }

    #[test]
    fn params_parse() {
        let p = RuleParams::parse(["no-resolve", "udp", "P:curl", "10.0.0.0/8", "PROXY"]);
        assert!(p.no_resolve);
        assert!(!p.src);
        assert_eq!(p.network, Some(Network::Udp));
        assert_eq!(p.process.as_deref(), Some("curl"));
        assert_eq!(p.source_prefix, Some("10.0.0.0/8".parse().unwrap()));
        assert_eq!(p.to_string(), "no-resolve,udp,P:curl,10.0.0.0/8");
    }

    #[test]
    fn params_filter_matches() {
        let rule = Rule::new(
            RuleType::DstPort,
            RuleKind::Port {
                side: PortSide::Dst,
                ports: port::parse_ports("DST-PORT", "443").unwrap(),
            },
            "443",
            "PROXY",
            RuleParams::parse(["udp", "192.168.0.0/16"]),
        );
        let mut meta = Metadata::for_host("example.com", 443);
        assert_eq!(rule.matches(&mut meta), None);
        meta.network = Network::Udp;
        assert_eq!(rule.matches(&mut meta), None);
        meta.src_ip = Some("192.168.3.4".parse().unwrap());
        assert_eq!(rule.matches(&mut meta), Some("PROXY"));
    }

    #[test]
    fn process_param_requests_process_lookup() {
        let rule = Rule::new(
            RuleType::Network,
            RuleKind::Network(Network::Tcp),
            "TCP",
            "DIRECT",
            RuleParams::parse(["P:ssh"]),
        );
        assert!(rule.should_find_process());
        assert!(!rule.should_resolve_ip());
    }

    #[test]
    fn no_resolve_suppresses_resolution() {
        let cidr = |params: &[&str]| {
            Rule::new(
                RuleType::IpCidr,
                RuleKind::IpCidr(ip::IpCidr::parse("10.0.0.0/8", false).unwrap()),
                "10.0.0.0/8",
                "DIRECT",
                RuleParams::parse(params.iter().copied()),
            )
        };
        assert!(cidr(&[]).should_resolve_ip());
        assert!(!cidr(&["no-resolve"]).should_resolve_ip());
    }

    #[test]
    fn display_round_trips_line_shape() {
        let rule = Rule::new(
            RuleType::Domain,
            RuleKind::Domain(DomainRule::exact("example.com").unwrap()),
            "example.com",
            "PROXY",
            RuleParams::default(),
        );
        assert_eq!(rule.to_string(), "DOMAIN,example.com,PROXY");
        let catch_all = Rule::new(
            RuleType::Match,
            RuleKind::Match,
            "",
            "DIRECT",
            RuleParams::default(),
        );
        assert_eq!(catch_all.to_string(), "MATCH,DIRECT");
    }
}
