use chrono::{DateTime, FixedOffset, LocalResult, NaiveDateTime, Offset, TimeZone, Utc};
use chrono_tz::Tz;
use std::fmt;
use std::str::FromStr;

/// Time zone applied to every timestamp conversion of one invocation.
///
/// Accepts `Z`/`UTC`, fixed offsets (`+02:00`, `-0530`) and IANA names
/// (`Europe/Paris`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZoneId {
    Fixed(FixedOffset),
    Named(Tz),
}

impl ZoneId {
    pub fn utc() -> Self {
        ZoneId::Fixed(Utc.fix())
    }

    /// Interprets a wall-clock value as local time in this zone.
    ///
    /// A wall time repeated by a DST transition resolves to the earlier instant;
    /// a wall time skipped by a transition is an error.
    pub fn localize(&self, naive: NaiveDateTime) -> Result<DateTime<FixedOffset>, String> {
        match self {
            ZoneId::Fixed(offset) => offset
                .from_local_datetime(&naive)
                .single()
                .ok_or_else(|| format!("{} cannot be represented at offset {}", naive, offset)),
            ZoneId::Named(tz) => match tz.from_local_datetime(&naive) {
                LocalResult::Single(dt) => Ok(fixed(dt)),
                LocalResult::Ambiguous(earliest, _) => Ok(fixed(earliest)),
                LocalResult::None => Err(format!("{} does not exist in zone {}", naive, tz.name())),
            },
        }
    }

    /// Re-expresses an instant in this zone.
    pub fn project<T: TimeZone>(&self, instant: &DateTime<T>) -> DateTime<FixedOffset> {
        match self {
            ZoneId::Fixed(offset) => instant.with_timezone(offset),
            ZoneId::Named(tz) => fixed(instant.with_timezone(tz)),
        }
    }
}

fn fixed<T: TimeZone>(dt: DateTime<T>) -> DateTime<FixedOffset> {
    let offset = dt.offset().fix();
    dt.with_timezone(&offset)
}

impl Default for ZoneId {
    fn default() -> Self {
        Self::utc()
    }
}

impl FromStr for ZoneId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.eq_ignore_ascii_case("z") || trimmed.eq_ignore_ascii_case("utc") {
            return Ok(Self::utc());
        }
        if trimmed.starts_with('+') || trimmed.starts_with('-') {
            return parse_offset(trimmed)
                .map(ZoneId::Fixed)
                .ok_or_else(|| format!("Invalid zone offset: {}", s));
        }
        trimmed
            .parse::<Tz>()
            .map(ZoneId::Named)
            .map_err(|_| format!("Unknown time zone: {}", s))
    }
}

fn parse_offset(text: &str) -> Option<FixedOffset> {
    let sign = if text.starts_with('-') { -1 } else { 1 };
    let digits: String = text[1..].chars().filter(|c| *c != ':').collect();
    if !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let (hours, minutes) = match digits.len() {
        2 => (digits.parse::<i32>().ok()?, 0),
        4 => (digits[..2].parse::<i32>().ok()?, digits[2..].parse::<i32>().ok()?),
        _ => return None,
    };
    if hours > 18 || minutes > 59 {
        return None;
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}

impl fmt::Display for ZoneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ZoneId::Fixed(offset) if offset.local_minus_utc() == 0 => write!(f, "Z"),
            ZoneId::Fixed(offset) => write!(f, "{}", offset),
            ZoneId::Named(tz) => write!(f, "{}", tz.name()),
        }
    }
}
