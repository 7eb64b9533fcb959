//! Parsing of human readable rate expressions such as `10/m` or `20/300`.

use crate::error::{ThrottleError, ThrottleResult};
use regex::Regex;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

static RATE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<count>[^/]*)/(?P<unit>[^/]*)$").expect("rate pattern is a valid regex")
});

/// Maximum number of requests admitted per window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RateSpec {
    pub max_requests: u64,
    pub window_seconds: u64,
}

/// Longest accepted window, one year. Longer windows would overflow
/// expiry deadlines and reset timestamps.
pub const MAX_WINDOW_SECONDS: u64 = 366 * 86_400;

impl RateSpec {
    /// Parse `<N>/<unit>` where unit is `s`, `m`, `h`, `d` or a number of seconds.
    pub fn parse(rate: &str) -> ThrottleResult<Self> {
        let captures = RATE_PATTERN
            .captures(rate.trim())
            .ok_or_else(|| ThrottleError::invalid_rate(rate, "expected exactly one '/' separator"))?;

        let count = captures["count"].trim();
        let max_requests = count.parse::<u64>().map_err(|_| {
            ThrottleError::invalid_rate(rate, format!("'{}' is not a positive integer", count))
        })?;

        let unit = captures["unit"].trim();
        let window_seconds = unit_seconds(unit)
            .or_else(|| unit.parse::<u64>().ok())
            .ok_or_else(|| ThrottleError::invalid_rate(rate, format!("unknown unit '{}'", unit)))?;

        Self::checked(rate, max_requests, window_seconds)
    }

    fn checked(rate: &str, max_requests: u64, window_seconds: u64) -> ThrottleResult<Self> {
        if max_requests == 0 {
            return Err(ThrottleError::invalid_rate(
                rate,
                "request count must be greater than 0",
            ));
        }
        if window_seconds == 0 {
            return Err(ThrottleError::invalid_rate(
                rate,
                "window must be greater than 0 seconds",
            ));
        }
        if window_seconds > MAX_WINDOW_SECONDS {
            return Err(ThrottleError::invalid_rate(
                rate,
                format!("window must be at most {} seconds", MAX_WINDOW_SECONDS),
            ));
        }
        Ok(Self {
            max_requests,
            window_seconds,
        })
    }
}

fn unit_seconds(unit: &str) -> Option<u64> {
    match unit {
        "s" => Some(1),
        "m" => Some(60),
        "h" => Some(3_600),
        "d" => Some(86_400),
        _ => None,
    }
}

impl FromStr for RateSpec {
    type Err = ThrottleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for RateSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.max_requests, self.window_seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unit_letters() {
        for (rate, window) in [("10/s", 1), ("10/m", 60), ("10/h", 3600), ("10/d", 86400)] {
            let spec = RateSpec::parse(rate).unwrap();
            assert_eq!(spec.max_requests, 10);
            assert_eq!(spec.window_seconds, window, "rate {}", rate);
        }
    }

    #[test]
    fn test_literal_seconds() {
        let spec: RateSpec = "20/300".parse().unwrap();
        assert_eq!(spec, RateSpec { max_requests: 20, window_seconds: 300 });
    }

    #[test]
    fn test_surrounding_whitespace_is_ignored() {
        let spec = RateSpec::parse(" 5 / m ").unwrap();
        assert_eq!(spec.max_requests, 5);
        assert_eq!(spec.window_seconds, 60);
    }

    #[test]
    fn test_rejects_malformed_rates() {
        for rate in [
            "", "10", "10/", "/m", "10/m/s", "0/m", "-1/m", "ten/m", "10/x", "10/0", "10/M",
            "1/18446744073709551615", "1/31622401",
        ] {
            let err = RateSpec::parse(rate).unwrap_err();
            assert!(
                matches!(err, ThrottleError::InvalidRateSpec { .. }),
                "rate {:?} gave {:?}",
                rate,
                err
            );
        }
    }

    #[test]
    fn test_display() {
        assert_eq!(RateSpec::parse("3/s").unwrap().to_string(), "3/1");
        assert_eq!(RateSpec::parse("20/h").unwrap().to_string(), "20/3600");
    }

    #[test]
    fn test_window_ceiling() {
        let spec = RateSpec::parse("1/31622400").unwrap();
        assert_eq!(spec.window_seconds, MAX_WINDOW_SECONDS);

        let err = RateSpec::parse("1/18446744073709551615").unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid rate spec '1/18446744073709551615': window must be at most 31622400 seconds"
        );
    }
}
