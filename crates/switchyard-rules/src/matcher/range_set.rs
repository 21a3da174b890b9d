//! Sorted interval set for IP/CIDR membership.
//!
//! Every address is widened to a `u128`: IPv6 addresses as-is, IPv4
//! addresses as their IPv4-mapped IPv6 form (`::ffff:a.b.c.d`), so one
//! ordered list covers both families.

use std::net::IpAddr;

use bytes::{Buf, BufMut};
use ipnet::IpNet;

use crate::error::RulesError;

/// Version byte written at the head of the binary form.
pub const BINARY_VERSION: u8 = 1;

const RANGE_BYTES: usize = 32;
const HEADER_BYTES: usize = 1 + 8;

/// Inclusive `[start, end]` address interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Range {
    pub start: u128,
    pub end: u128,
}

impl Range {
    pub fn from_net(net: &IpNet) -> Self {
        let net = net.trunc();
        Self {
            start: to_u128(net.network()),
            end: to_u128(net.broadcast()),
        }
    }

    pub fn contains(&self, value: u128) -> bool {
        self.start <= value && value <= self.end
    }
}

/// Ordered collection of address intervals.
///
/// `insert` keeps the list sorted by start; `merge` coalesces adjacent or
/// overlapping intervals. `contains` is a binary search on a merged set and
/// a linear scan otherwise, so answers are the same before and after merge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeSet {
    ranges: Vec<Range>,
    merged: bool,
}

impl RangeSet {
    pub fn new() -> Self {
        Self {
            ranges: Vec::new(),
            merged: true,
        }
    }

    /// Build a merged set from parsed networks.
    pub fn from_nets<I: IntoIterator<Item = IpNet>>(nets: I) -> Self {
        let mut set = Self::new();
        set.extend(nets);
        set.merge();
        set
    }

    /// Parse a CIDR (or a bare address, taken as a host route) and insert it.
    pub fn insert(&mut self, cidr: &str) -> Result<(), RulesError> {
        let net = parse_cidr(cidr)?;
        self.insert_net(&net);
        Ok(())
    }

    pub fn insert_net(&mut self, net: &IpNet) {
        let range = Range::from_net(net);
        let at = self.ranges.partition_point(|r| r.start <= range.start);
        self.ranges.insert(at, range);
        self.merged = self.ranges.len() <= 1;
    }

    /// Bulk insertion: append everything, then restore start order once.
    pub fn extend<I: IntoIterator<Item = IpNet>>(&mut self, nets: I) {
        let before = self.ranges.len();
        self.ranges
            .extend(nets.into_iter().map(|net| Range::from_net(&net)));
        if self.ranges.len() != before {
            self.ranges.sort_unstable();
            self.merged = self.ranges.len() <= 1;
        }
    }

    /// Coalesce adjacent or overlapping intervals. Idempotent.
    pub fn merge(&mut self) {
        loop {
            let before = self.ranges.len();
            self.merge_pass();
            if self.ranges.len() == before {
                break;
            }
        }
        self.merged = true;
    }

    fn merge_pass(&mut self) {
        let mut out: Vec<Range> = Vec::with_capacity(self.ranges.len());
        for range in self.ranges.drain(..) {
            match out.last_mut() {
                Some(last) if range.start <= last.end.saturating_add(1) => {
                    last.end = last.end.max(range.end);
                }
                _ => out.push(range),
            }
        }
        self.ranges = out;
    }

    pub fn contains(&self, ip: IpAddr) -> bool {
        self.contains_u128(to_u128(ip))
    }

    fn contains_u128(&self, value: u128) -> bool {
        if !self.merged {
            return self.ranges.iter().any(|r| r.contains(value));
        }
        let idx = self.ranges.partition_point(|r| r.end < value);
        self.ranges.get(idx).is_some_and(|r| r.start <= value)
    }

    pub fn is_merged(&self) -> bool {
        self.merged
    }

    pub fn ranges(&self) -> &[Range] {
        &self.ranges
    }

    /// Number of intervals currently held.
    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Serialize the merged interval list.
    ///
    /// Layout: version byte, big-endian `u64` count, then `count` pairs of
    /// 16-byte big-endian start/end values.
    pub fn write_to<B: BufMut>(&self, buf: &mut B) {
        let merged;
        let ranges = if self.merged {
            &self.ranges
        } else {
            let mut copy = self.clone();
            copy.merge();
            merged = copy.ranges;
            &merged
        };
        buf.put_u8(BINARY_VERSION);
        buf.put_u64(ranges.len() as u64);
        for range in ranges {
            buf.put_u128(range.start);
            buf.put_u128(range.end);
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_BYTES + self.ranges.len() * RANGE_BYTES);
        self.write_to(&mut out);
        out
    }

    /// Decode the binary form produced by [`RangeSet::write_to`].
    pub fn read_from<B: Buf>(mut buf: B) -> Result<Self, RulesError> {
        if buf.remaining() < HEADER_BYTES {
            return Err(RulesError::Binary("truncated header".into()));
        }
        let version = buf.get_u8();
        if version != BINARY_VERSION {
            return Err(RulesError::Binary(format!("unsupported version {version}")));
        }
        let count = buf.get_u64();
        let needed = usize::try_from(count)
            .ok()
            .and_then(|n| n.checked_mul(RANGE_BYTES))
            .ok_or_else(|| RulesError::Binary(format!("range count {count} too large")))?;
        if buf.remaining() < needed {
            return Err(RulesError::Binary(format!(
                "expected {count} ranges, found {} bytes",
                buf.remaining()
            )));
        }

        let mut ranges = Vec::with_capacity(needed / RANGE_BYTES);
        for _ in 0..count {
            let start = buf.get_u128();
            let end = buf.get_u128();
            if start > end {
                return Err(RulesError::Binary(format!(
                    "range start {start:#x} after end {end:#x}"
                )));
            }
            ranges.push(Range { start, end });
        }

        let ordered = ranges.windows(2).all(|w| w[0].end < w[1].start);
        let mut set = Self {
            ranges,
            merged: ordered,
        };
        if !ordered {
            set.ranges.sort_unstable();
            set.merge();
        }
        Ok(set)
    }
}

impl Default for RangeSet {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse `a.b.c.d/n`, `x::/n` or a bare address.
pub fn parse_cidr(s: &str) -> Result<IpNet, RulesError> {
    let s = s.trim();
    if let Ok(net) = s.parse::<IpNet>() {
        return Ok(net);
    }
    let ip = s
        .parse::<IpAddr>()
        .map_err(|e| RulesError::InvalidCidr(format!("{s}: {e}")))?;
    Ok(host_net(ip))
}

/// Single-address network (`/32` or `/128`).
pub fn host_net(ip: IpAddr) -> IpNet {
    match ip {
        IpAddr::V4(v4) => IpNet::V4(v4.into()),
        IpAddr::V6(v6) => IpNet::V6(v6.into()),
    }
}

pub(crate) fn to_u128(ip: IpAddr) -> u128 {
    match ip {
        IpAddr::V4(v4) => u128::from(v4.to_ipv6_mapped()),
        IpAddr::V6(v6) => u128::from(v6),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, Ipv6Addr};

    fn from_u128(value: u128) -> IpAddr {
        Ipv6Addr::from(value).to_canonical()
    }

    fn v4(a: u8, b: u8, c: u8, d: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(a, b, c, d))
    }

    #[test]
    fn merge_nested_prefixes() {
        let mut set = RangeSet::new();
        set.insert("10.0.0.0/8").unwrap();
        set.insert("10.1.0.0/16").unwrap();
        set.merge();

        assert_eq!(set.len(), 1);
        assert_eq!(from_u128(set.ranges()[0].start), v4(10, 0, 0, 0));
        assert_eq!(from_u128(set.ranges()[0].end), v4(10, 255, 255, 255));
        assert!(set.contains(v4(10, 1, 2, 3)));
        assert!(!set.contains(v4(11, 0, 0, 1)));
    }

    #[test]
    fn merge_is_idempotent() {
        let mut set = RangeSet::new();
        for cidr in ["192.168.1.0/24", "192.168.0.0/24", "172.16.0.0/12", "2001:db8::/32"] {
            set.insert(cidr).unwrap();
        }
        set.merge();
        let once = set.ranges().to_vec();
        set.merge();
        assert_eq!(set.ranges(), once.as_slice());
        // Adjacent /24s collapse into one interval.
        assert_eq!(set.len(), 3);
    }

    #[test]
    fn contains_agrees_before_and_after_merge() {
        let mut set = RangeSet::new();
        for cidr in ["10.0.0.0/8", "10.1.0.0/16", "8.8.8.8/32", "fd00::/8", "8.8.4.0/24"] {
            set.insert(cidr).unwrap();
        }
        assert!(!set.is_merged());

        let probes = [
            v4(10, 1, 2, 3),
            v4(11, 0, 0, 1),
            v4(8, 8, 8, 8),
            v4(8, 8, 8, 9),
            v4(8, 8, 4, 200),
            IpAddr::V6("fd12::1".parse().unwrap()),
            IpAddr::V6(Ipv6Addr::LOCALHOST),
        ];
        let before: Vec<bool> = probes.iter().map(|ip| set.contains(*ip)).collect();
        set.merge();
        let after: Vec<bool> = probes.iter().map(|ip| set.contains(*ip)).collect();
        assert_eq!(before, after);
        assert_eq!(after, [true, false, true, false, true, true, false]);
    }

    #[test]
    fn insert_keeps_start_order() {
        let mut set = RangeSet::new();
        set.insert("192.168.0.0/16").unwrap();
        set.insert("10.0.0.0/8").unwrap();
        set.insert("172.16.0.0/12").unwrap();
        let starts: Vec<u128> = set.ranges().iter().map(|r| r.start).collect();
        let mut sorted = starts.clone();
        sorted.sort_unstable();
        assert_eq!(starts, sorted);
    }

    #[test]
    fn ipv4_and_mapped_ipv6_are_equivalent() {
        let set = RangeSet::from_nets(["1.2.3.0/24".parse().unwrap()]);
        assert!(set.contains(v4(1, 2, 3, 4)));
        assert!(set.contains(IpAddr::V6("::ffff:1.2.3.4".parse().unwrap())));
    }

    #[test]
    fn bare_address_is_host_route() {
        let mut set = RangeSet::new();
        set.insert("1.1.1.1").unwrap();
        assert!(set.contains(v4(1, 1, 1, 1)));
        assert!(!set.contains(v4(1, 1, 1, 2)));
    }

    #[test]
    fn invalid_cidr_rejected() {
        let mut set = RangeSet::new();
        let err = set.insert("300.0.0.0/8").unwrap_err();
        assert!(matches!(err, RulesError::InvalidCidr(_)));
        assert!(set.is_empty());
    }

    #[test]
    fn full_range_does_not_overflow() {
        let mut set = RangeSet::new();
        set.insert("::/0").unwrap();
        set.insert("ffff::/16").unwrap();
        set.merge();
        assert_eq!(set.len(), 1);
        assert!(set.contains(IpAddr::V6(Ipv6Addr::from(u128::MAX))));
    }

    #[test]
    fn binary_form_restores_set() {
        let set = RangeSet::from_nets([
            "10.0.0.0/8".parse().unwrap(),
            "2001:db8::/32".parse().unwrap(),
        ]);
        let bytes = set.to_bytes();
        assert_eq!(bytes[0], BINARY_VERSION);
        assert_eq!(bytes.len(), HEADER_BYTES + 2 * RANGE_BYTES);

        let decoded = RangeSet::read_from(bytes.as_slice()).unwrap();
        assert_eq!(decoded, set);
        assert!(decoded.is_merged());
    }

    #[test]
    fn binary_rejects_unknown_version() {
        let mut bytes = RangeSet::from_nets(["10.0.0.0/8".parse().unwrap()]).to_bytes();
        bytes[0] = 9;
        let err = RangeSet::read_from(bytes.as_slice()).unwrap_err();
        assert!(matches!(err, RulesError::Binary(_)));
    }

    #[test]
    fn binary_rejects_truncation() {
        let bytes = RangeSet::from_nets(["10.0.0.0/8".parse().unwrap()]).to_bytes();
        RangeSet::read_from(&bytes[..bytes.len() - 1]).unwrap_err();
        RangeSet::read_from(&bytes[..4]).unwrap_err();
    }

    #[test]
    fn unmerged_set_serializes_merged() {
        let mut set = RangeSet::new();
        set.insert("10.0.0.0/8").unwrap();
        set.insert("10.1.0.0/16").unwrap();
        let decoded = RangeSet::read_from(set.to_bytes().as_slice()).unwrap();
        assert_eq!(decoded.len(), 1);
    }
}
