//! Predicates on how the connection arrived: IN-TYPE, IN-USER, IN-NAME
//! and SRC-MAC.

use std::sync::Arc;

use crate::error::RulesError;
use crate::mac::{MacLookup, normalize_mac};
use crate::metadata::{InboundType, Metadata};

/// Split a `/`-separated alternative list, dropping blanks.
pub(crate) fn alternatives(kind: &'static str, payload: &str) -> Result<Vec<String>, RulesError> {
    let items: Vec<String> = payload
        .split('/')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();
    if items.is_empty() {
        return Err(RulesError::payload(kind, "empty list"));
    }
    Ok(items)
}

pub fn parse_in_types(payload: &str) -> Result<Vec<InboundType>, RulesError> {
    let mut types = Vec::new();
    for item in alternatives("IN-TYPE", payload)? {
        for t in InboundType::parse_group(&item)? {
            if !types.contains(&t) {
                types.push(t);
            }
        }
    }
    Ok(types)
}

/// `value` is one of `list`. A missing value never matches.
pub(crate) fn one_of(list: &[String], value: Option<&str>) -> bool {
    value.is_some_and(|v| list.iter().any(|item| item == v))
}

/// Match on the hardware address of the connecting neighbor.
#[derive(Clone)]
pub struct SrcMac {
    mac: String,
    lookup: Option<Arc<dyn MacLookup>>,
}

impl SrcMac {
    pub fn parse(payload: &str, lookup: Option<Arc<dyn MacLookup>>) -> Result<Self, RulesError> {
        let mac = normalize_mac(payload)
            .ok_or_else(|| RulesError::payload("SRC-MAC", format!("invalid MAC '{payload}'")))?;
        Ok(Self { mac, lookup })
    }

    pub fn mac(&self) -> &str {
        &self.mac
    }

    pub fn matches(&self, meta: &Metadata) -> bool {
        let (Some(lookup), Some(ip)) = (&self.lookup, meta.src_ip) else {
            return false;
        };
        lookup.lookup(ip).is_some_and(|mac| mac == self.mac)
    }
}

impl std::fmt::Debug for SrcMac {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SrcMac").field("mac", &self.mac).finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::IpAddr;

    struct OneNeighbor;

    impl MacLookup for OneNeighbor {
        fn lookup(&self, ip: IpAddr) -> Option<String> {
            (ip.to_string() == "192.168.1.5").then(|| "aa:bb:cc:dd:ee:ff".to_string())
        }
    }

    #[test]
    fn in_type_list() {
        let types = parse_in_types("SOCKS/http/socks5").unwrap();
        assert_eq!(
            types,
            vec![InboundType::Socks4, InboundType::Socks5, InboundType::Http]
        );
        parse_in_types("//").unwrap_err();
        parse_in_types("carrier").unwrap_err();
    }

    #[test]
    fn one_of_requires_value() {
        let users = alternatives("IN-USER", "alice/bob").unwrap();
        assert!(one_of(&users, Some("bob")));
        assert!(!one_of(&users, Some("carol")));
        assert!(!one_of(&users, None));
    }

    #[test]
    fn src_mac() {
        let rule = SrcMac::parse("AA-BB-CC-DD-EE-FF", Some(Arc::new(OneNeighbor))).unwrap();
        assert_eq!(rule.mac(), "aa:bb:cc:dd:ee:ff");
        let mut meta = Metadata::default();
        assert!(!rule.matches(&meta));
        meta.src_ip = Some("192.168.1.5".parse().unwrap());
        assert!(rule.matches(&meta));
        meta.src_ip = Some("192.168.1.6".parse().unwrap());
        assert!(!rule.matches(&meta));
        SrcMac::parse("aa:bb:cc", None).unwrap_err();
    }
}
