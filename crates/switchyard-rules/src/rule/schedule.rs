//! SCHEDULE predicate: `SMTWTFS HH:MM-HH:MM`.

use std::fmt;

use time::OffsetDateTime;

use crate::error::RulesError;

const WEEKDAY_LETTERS: &[u8; 7] = b"SMTWTFS";

/// Active weekdays plus an inclusive daily window, in local time.
///
/// Each of the first seven characters enables the day at that position
/// (Sunday first) when it is the day's letter; anything else leaves the day
/// off, so `SMTWTF-` skips Saturday.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schedule {
    days: [bool; 7],
    start: u16,
    end: u16,
    raw: String,
}

impl Schedule {
    pub fn parse(payload: &str) -> Result<Self, RulesError> {
        let raw = payload.trim().to_ascii_uppercase();
        let bytes = raw.as_bytes();
        if !raw.is_ascii() || bytes.len() != 19 || bytes[7] != b' ' || bytes[13] != b'-' {
            return Err(RulesError::payload(
                "SCHEDULE",
                format!("expected 'SMTWTFS HH:MM-HH:MM', got '{payload}'"),
            ));
        }
        let mut days = [false; 7];
        for (i, day) in days.iter_mut().enumerate() {
            *day = bytes[i] == WEEKDAY_LETTERS[i];
        }
        let start = parse_clock(&raw[8..13])?;
        let end = parse_clock(&raw[14..19])?;
        if end < start {
            return Err(RulesError::payload(
                "SCHEDULE",
                "end time is earlier than start time",
            ));
        }
        Ok(Self {
            days,
            start,
            end,
            raw,
        })
    }

    /// Evaluate against the current local time, or UTC when the local
    /// offset cannot be determined.
    pub fn matches_now(&self) -> bool {
        let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
        self.matches_at(now)
    }

    pub fn matches_at(&self, at: OffsetDateTime) -> bool {
        let day = usize::from(at.weekday().number_days_from_sunday());
        let minute = u16::from(at.hour()) * 60 + u16::from(at.minute());
        self.days[day] && (self.start..=self.end).contains(&minute)
    }
}

impl fmt::Display for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

fn parse_clock(s: &str) -> Result<u16, RulesError> {
    let invalid = || RulesError::payload("SCHEDULE", format!("invalid time '{s}'"));
    let (h, m) = s.split_once(':').ok_or_else(invalid)?;
    let h: u16 = h.parse().map_err(|_| invalid())?;
    let m: u16 = m.parse().map_err(|_| invalid())?;
    if h > 23 || m > 59 {
        return Err(invalid());
    }
    Ok(h * 60 + m)
}
