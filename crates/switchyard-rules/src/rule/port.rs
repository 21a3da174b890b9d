//! `/`-separated numeric range lists used by port, UID and DSCP rules.

use std::fmt::Display;
use std::ops::RangeInclusive;
use std::str::FromStr;

use switchyard_core::{MAX_DSCP, MAX_PORT_RANGES};

use crate::error::RulesError;

/// A list of inclusive ranges such as `80/443/8000-9000`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeList<T> {
    ranges: Vec<RangeInclusive<T>>,
}

impl<T> RangeList<T>
where
    T: FromStr + PartialOrd + Copy + Display,
{
    /// Parse a payload. Empty segments are skipped; an all-empty list is an
    /// error, as is a range whose end precedes its start.
    pub fn parse(kind: &'static str, payload: &str) -> Result<Self, RulesError> {
        let mut ranges = Vec::new();
        for part in payload.split('/') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            let mut bounds = part.split('-');
            let start = parse_bound::<T>(kind, bounds.next())?;
            let end = match bounds.next() {
                Some(end) => parse_bound::<T>(kind, Some(end))?,
                None => start,
            };
            if bounds.next().is_some() {
                return Err(RulesError::payload(kind, format!("malformed range '{part}'")));
            }
            if end < start {
                return Err(RulesError::payload(
                    kind,
                    format!("range end {end} is below start {start}"),
                ));
            }
            ranges.push(start..=end);
        }
        if ranges.is_empty() {
            return Err(RulesError::payload(kind, "empty range list"));
        }
        Ok(Self { ranges })
    }

    pub fn contains(&self, value: T) -> bool {
        self.ranges.iter().any(|r| r.contains(&value))
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }
}

fn parse_bound<T: FromStr>(kind: &'static str, s: Option<&str>) -> Result<T, RulesError> {
    let s = s.unwrap_or_default().trim_matches(|c| c == '[' || c == ']' || c == ' ');
    s.parse()
        .map_err(|_| RulesError::payload(kind, format!("invalid number '{s}'")))
}

/// Port list for SRC-PORT, DST-PORT and IN-PORT.
pub fn parse_ports(kind: &'static str, payload: &str) -> Result<RangeList<u16>, RulesError> {
    if payload.split('/').count() > MAX_PORT_RANGES {
        return Err(RulesError::payload(
            kind,
            format!("too many ports, at most {MAX_PORT_RANGES} entries are supported"),
        ));
    }
    RangeList::parse(kind, payload)
}

/// DSCP list; values are 6-bit.
pub fn parse_dscp(payload: &str) -> Result<RangeList<u8>, RulesError> {
    let list = RangeList::<u8>::parse("DSCP", payload)?;
    if list.ranges.iter().any(|r| *r.end() > MAX_DSCP) {
        return Err(RulesError::payload(
            "DSCP",
            format!("value out of range 0-{MAX_DSCP}"),
        ));
    }
    Ok(list)
}
