//! Rotation interval strings
//!
//! Intervals are written as a positive integer followed by a single unit:
//! `d` (days), `h` (hours) or `m` (minutes). Anything else is rejected.

use std::time::Duration;

use crate::Error;

const SECS_PER_MINUTE: u64 = 60;
const SECS_PER_HOUR: u64 = 60 * SECS_PER_MINUTE;
const SECS_PER_DAY: u64 = 24 * SECS_PER_HOUR;

/// Parse an interval string such as `7d`, `24h` or `30m`
pub fn parse_duration(s: &str) -> Result<Duration, Error> {
    let s = s.trim();
    if s.is_empty() {
        return Err(Error::validation("empty duration"));
    }

    let unit_start = s
        .find(|c: char| !c.is_ascii_digit())
        .ok_or_else(|| Error::validation(format!("duration '{s}' is missing a unit (d, h, m)")))?;
    let (digits, unit) = s.split_at(unit_start);

    if digits.is_empty() {
        return Err(Error::validation(format!("duration '{s}' has no numeric value")));
    }
    let value: u64 = digits
        .parse()
        .map_err(|e| Error::validation(format!("duration '{s}': {e}")))?;
    if value == 0 {
        return Err(Error::validation(format!("duration '{s}' must be positive")));
    }

    let multiplier = match unit {
        "d" => SECS_PER_DAY,
        "h" => SECS_PER_HOUR,
        "m" => SECS_PER_MINUTE,
        other => {
            return Err(Error::validation(format!(
                "duration '{s}' has unsupported unit '{other}' (expected d, h or m)"
            )))
        }
    };

    value
        .checked_mul(multiplier)
        .map(Duration::from_secs)
        .ok_or_else(|| Error::validation(format!("duration '{s}' overflows")))
}

/// Parse an optional interval, treating absent, empty, and malformed values as "none"
pub fn parse_optional(s: Option<&str>) -> Option<Duration> {
    match s {
        Some(v) if !v.trim().is_empty() => parse_duration(v).ok(),
        _ => None,
    }
}
