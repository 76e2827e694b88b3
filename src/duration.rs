//! Duration tokens such as `2m`, `-1h` or `5d`.

use crate::error::{TransformError, TransformResult};

pub const ONE_SECOND_MS: i64 = 1_000;
pub const ONE_WEEK_MS: i64 = 7 * 24 * 60 * 60 * ONE_SECOND_MS;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeUnit {
    Second,
    Minute,
    Hour,
    Day,
    Week,
}

impl TimeUnit {
    pub fn from_suffix(raw: char) -> Option<Self> {
        match raw {
            's' => Some(Self::Second),
            'm' => Some(Self::Minute),
            'h' => Some(Self::Hour),
            'd' => Some(Self::Day),
            'w' => Some(Self::Week),
            _ => None,
        }
    }

    pub fn millis(self) -> i64 {
        match self {
            Self::Second => ONE_SECOND_MS,
            Self::Minute => 60 * ONE_SECOND_MS,
            Self::Hour => 60 * 60 * ONE_SECOND_MS,
            Self::Day => 24 * 60 * 60 * ONE_SECOND_MS,
            Self::Week => ONE_WEEK_MS,
        }
    }

    /// Largest unit boundary at or before `ts`.
    pub fn snap(self, ts: i64) -> i64 {
        ts - ts.rem_euclid(self.millis())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DurationToken {
    pub amount: i64,
    pub unit: TimeUnit,
}

impl DurationToken {
    pub fn millis(self) -> i64 {
        self.amount * self.unit.millis()
    }
}

pub fn parse_duration_token(raw: &str) -> TransformResult<DurationToken> {
    let trimmed = raw.trim();
    let mut chars = trimmed.chars();
    let suffix = chars
        .next_back()
        .ok_or_else(|| TransformError::invalid("empty duration"))?;
    let unit = TimeUnit::from_suffix(suffix.to_ascii_lowercase()).ok_or_else(|| {
        TransformError::invalid(format!("duration '{trimmed}' must end in one of s, m, h, d, w"))
    })?;
    let amount = chars
        .as_str()
        .parse::<i64>()
        .map_err(|_| TransformError::invalid(format!("duration '{trimmed}' has no integer amount")))?;
    amount
        .checked_mul(unit.millis())
        .ok_or_else(|| TransformError::invalid(format!("duration '{trimmed}' overflows")))?;

    Ok(DurationToken { amount, unit })
}

/// Duration in milliseconds; negative amounts are allowed.
pub fn parse_duration(raw: &str) -> TransformResult<i64> {
    parse_duration_token(raw).map(DurationToken::millis)
}

/// A strictly positive duration, for window sizes and intervals.
pub fn parse_window(raw: &str) -> TransformResult<i64> {
    let ms = parse_duration(raw)?;
    if ms <= 0 {
        return Err(TransformError::invalid(format!(
            "window '{}' must be positive",
            raw.trim()
        )));
    }
    Ok(ms)
}

/// Absolute epoch-ms timestamps pass through; duration tokens are read relative to `relative_to`.
pub fn parse_timestamp(raw: &str, relative_to: i64) -> TransformResult<i64> {
    let trimmed = raw.trim();
    if let Ok(ts) = trimmed.parse::<i64>() {
        return Ok(ts);
    }
    let offset = parse_duration(trimmed)?;
    relative_to.checked_add(offset).ok_or_else(|| {
        TransformError::invalid(format!("timestamp '{trimmed}' relative to {relative_to} overflows"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_units_and_sign() {
        assert_eq!(parse_duration("2s").expect("2s"), 2_000);
        assert_eq!(parse_duration("3m").expect("3m"), 180_000);
        assert_eq!(parse_duration("-1h").expect("-1h"), -3_600_000);
        assert_eq!(parse_duration("1d").expect("1d"), 86_400_000);
        assert_eq!(parse_duration("1w").expect("1w"), ONE_WEEK_MS);
    }

    #[test]
    fn rejects_malformed_tokens() {
        for raw in ["", "m", "5", "5y", "1.5h", "abc"] {
            assert!(
                matches!(parse_duration(raw), Err(TransformError::InvalidArgument(_))),
                "{raw} should be rejected"
            );
        }
        assert!(parse_window("0s").is_err());
        assert!(parse_window("-5m").is_err());
    }

    #[test]
    fn snaps_to_unit_boundary() {
        assert_eq!(TimeUnit::Hour.snap(3_600_000 + 59_000), 3_600_000);
        assert_eq!(TimeUnit::Second.snap(1_500), 1_000);
        assert_eq!(TimeUnit::Second.snap(1_000), 1_000);
    }

    #[test]
    fn timestamps_accept_absolute_or_relative() {
        assert_eq!(parse_timestamp("12345", 0).expect("absolute"), 12_345);
        assert_eq!(parse_timestamp("-1m", 100_000).expect("relative"), 40_000);
    }

    #[test]
    fn relative_timestamps_reject_overflow() {
        assert_eq!(parse_timestamp("-2s", 10_000).expect("relative"), 8_000);
        assert!(matches!(
            parse_timestamp("1w", i64::MAX - 1),
            Err(TransformError::InvalidArgument(_))
        ));
        assert!(parse_timestamp("-1s", i64::MIN).is_err());
    }
}
