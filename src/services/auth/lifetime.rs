use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, TimeDelta, Utc};
use thiserror::Error;

/// Unit of a token lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeUnit {
    Seconds,
    Minutes,
    Hours,
    Days,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown time unit: {0} (expected seconds, minutes, hours or days)")]
pub struct UnknownTimeUnit(pub String);

impl FromStr for TimeUnit {
    type Err = UnknownTimeUnit;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "seconds" | "second" | "secs" | "s" => Ok(Self::Seconds),
            "minutes" | "minute" | "mins" | "m" => Ok(Self::Minutes),
            "hours" | "hour" | "h" => Ok(Self::Hours),
            "days" | "day" | "d" => Ok(Self::Days),
            _ => Err(UnknownTimeUnit(s.to_string())),
        }
    }
}

impl TimeUnit {
    fn seconds(self) -> i64 {
        match self {
            Self::Seconds => 1,
            Self::Minutes => 60,
            Self::Hours => 60 * 60,
            Self::Days => 24 * 60 * 60,
        }
    }
}

impl fmt::Display for TimeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Seconds => "seconds",
            Self::Minutes => "minutes",
            Self::Hours => "hours",
            Self::Days => "days",
        };
        f.write_str(s)
    }
}

/// How long a token stays valid after creation or its latest refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenLifetime {
    pub magnitude: u32,
    pub unit: TimeUnit,
}

impl Default for TokenLifetime {
    fn default() -> Self {
        Self {
            magnitude: 1,
            unit: TimeUnit::Hours,
        }
    }
}

/// Longest lifetime accepted from configuration (ten years).
pub const MAX_LIFETIME_SECONDS: i64 = 10 * 365 * 24 * 60 * 60;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("token lifetime {0} exceeds the maximum of ten years")]
pub struct LifetimeOutOfRange(pub TokenLifetime);

impl TokenLifetime {
    pub fn new(magnitude: u32, unit: TimeUnit) -> Self {
        Self { magnitude, unit }
    }

    /// Like `new`, but refuses lifetimes longer than `MAX_LIFETIME_SECONDS`.
    pub fn bounded(magnitude: u32, unit: TimeUnit) -> Result<Self, LifetimeOutOfRange> {
        let lifetime = Self::new(magnitude, unit);
        if lifetime.as_seconds() > MAX_LIFETIME_SECONDS {
            return Err(LifetimeOutOfRange(lifetime));
        }
        Ok(lifetime)
    }

    // u32::MAX days still fits in i64 seconds
    pub fn as_seconds(&self) -> i64 {
        i64::from(self.magnitude) * self.unit.seconds()
    }

    pub fn as_duration(&self) -> Option<TimeDelta> {
        TimeDelta::try_seconds(self.as_seconds())
    }

    /// Absolute expiry for a token created or refreshed at `now`.
    ///
    /// `None` when the result falls outside the representable date range.
    pub fn expires_from(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        now.checked_add_signed(self.as_duration()?)
    }
}

impl fmt::Display for TokenLifetime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.magnitude, self.unit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_one_hour() {
        assert_eq!(TokenLifetime::default().as_seconds(), 3600);
    }

    #[test]
    fn parses_units_case_insensitively() {
        assert_eq!("Minutes".parse::<TimeUnit>(), Ok(TimeUnit::Minutes));
        assert_eq!(" days ".parse::<TimeUnit>(), Ok(TimeUnit::Days));
        assert_eq!("seconds".parse::<TimeUnit>(), Ok(TimeUnit::Seconds));
        assert!("weeks".parse::<TimeUnit>().is_err());
    }

    #[test]
    fn expiry_is_now_plus_duration() {
        let now = Utc::now();
        let lifetime = TokenLifetime::new(3, TimeUnit::Days);
        assert_eq!(lifetime.expires_from(now), Some(now + TimeDelta::days(3)));
        assert_eq!(lifetime.to_string(), "3 days");
    }

    #[test]
    fn huge_lifetime_does_not_overflow() {
        let lifetime = TokenLifetime::new(u32::MAX, TimeUnit::Days);
        assert_eq!(lifetime.as_seconds(), i64::from(u32::MAX) * 86_400);
        assert_eq!(lifetime.expires_from(Utc::now()), None);
    }

    #[test]
    fn bounded_rejects_lifetimes_past_ten_years() {
        assert!(TokenLifetime::bounded(3650, TimeUnit::Days).is_ok());
        assert_eq!(
            TokenLifetime::bounded(100_000_000, TimeUnit::Days),
            Err(LifetimeOutOfRange(TokenLifetime::new(100_000_000, TimeUnit::Days)))
        );
    }
}
