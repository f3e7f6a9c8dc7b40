//! Rollup tiers

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::core::config::RollupConfig;
use crate::utils::time::{DAY_MS, HOUR_MS, bucket_start, duration_millis};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Hourly,
    Daily,
}

impl Tier {
    pub const ALL: [Tier; 2] = [Tier::Hourly, Tier::Daily];

    pub const fn width_ms(self) -> i64 {
        match self {
            Tier::Hourly => HOUR_MS,
            Tier::Daily => DAY_MS,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Tier::Hourly => "hourly",
            Tier::Daily => "daily",
        }
    }

    /// Start of the bucket holding `millis`
    pub fn bucket_start(self, millis: i64) -> i64 {
        bucket_start(millis, self.width_ms())
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "hourly" | "hour" | "1h" => Ok(Tier::Hourly),
            "daily" | "day" | "1d" => Ok(Tier::Daily),
            other => Err(format!(
                "unknown tier '{}': expected hourly or daily",
                other
            )),
        }
    }
}

/// Retention and lateness of one tier, in milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierSpec {
    pub tier: Tier,
    pub ttl_ms: i64,
    pub lateness_ms: i64,
}

impl TierSpec {
    pub fn hourly(config: &RollupConfig) -> Self {
        Self {
            tier: Tier::Hourly,
            ttl_ms: duration_millis(config.hourly_ttl),
            lateness_ms: duration_millis(config.hourly_lateness),
        }
    }

    pub fn daily(config: &RollupConfig) -> Self {
        Self {
            tier: Tier::Daily,
            ttl_ms: duration_millis(config.daily_ttl),
            lateness_ms: duration_millis(config.daily_lateness),
        }
    }

    pub fn bucket_end(&self, bucket_start: i64) -> i64 {
        bucket_start + self.tier.width_ms()
    }

    /// A bucket is expired once its TTL has elapsed since bucket end
    pub fn is_expired(&self, bucket_start: i64, now: i64) -> bool {
        now >= self.bucket_end(bucket_start).saturating_add(self.ttl_ms)
    }

    /// Contributions are accepted until bucket end plus lateness
    pub fn accepts(&self, bucket_start: i64, now: i64) -> bool {
        now <= self.bucket_end(bucket_start).saturating_add(self.lateness_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_parse_and_display() {
        assert_eq!("hourly".parse::<Tier>().unwrap(), Tier::Hourly);
        assert_eq!("DAILY".parse::<Tier>().unwrap(), Tier::Daily);
        assert!("weekly".parse::<Tier>().is_err());
        assert_eq!(Tier::Daily.to_string(), "daily");
        assert_eq!(serde_json::to_string(&Tier::Hourly).unwrap(), r#""hourly""#);
    }

    #[test]
    fn test_bucket_start() {
        let ts = 1_704_070_800_123; // 2024-01-01T01:00:00.123Z
        assert_eq!(Tier::Hourly.bucket_start(ts), 1_704_070_800_000);
        assert_eq!(Tier::Daily.bucket_start(ts), 1_704_067_200_000);
    }

    #[test]
    fn test_spec_windows() {
        let config = RollupConfig::default();
        let hourly = TierSpec::hourly(&config);
        let start = 0;
        assert!(hourly.accepts(start, HOUR_MS + hourly.lateness_ms));
        assert!(!hourly.accepts(start, HOUR_MS + hourly.lateness_ms + 1));
        assert!(!hourly.is_expired(start, HOUR_MS + hourly.ttl_ms - 1));
        assert!(hourly.is_expired(start, HOUR_MS + hourly.ttl_ms));
    }
}
