//! Candle timeframes and bucket flooring
//!
//! Bucket flooring uses integer minutes-since-epoch arithmetic rather than
//! calendar fields, so it is robust across day boundaries as long as every
//! timestamp is normalized to UTC before it reaches the aggregator.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Supported candle timeframes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Timeframe {
    /// 1 minute
    M1,
    /// 5 minutes
    M5,
    /// 15 minutes
    M15,
    /// 30 minutes
    M30,
    /// 1 hour
    H1,
    /// 4 hours
    H4,
    /// 1 day
    D1,
}

/// Error returned when parsing an unknown timeframe label.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown timeframe: {0}")]
pub struct ParseTimeframeError(pub String);

impl Timeframe {
    /// Duration of this timeframe in whole minutes.
    pub fn minutes(&self) -> i64 {
        match self {
            Timeframe::M1 => 1,
            Timeframe::M5 => 5,
            Timeframe::M15 => 15,
            Timeframe::M30 => 30,
            Timeframe::H1 => 60,
            Timeframe::H4 => 240,
            Timeframe::D1 => 1440,
        }
    }

    /// Duration of this timeframe.
    pub fn duration(&self) -> Duration {
        Duration::minutes(self.minutes())
    }

    /// All supported timeframes, coarsest last.
    pub fn all() -> &'static [Timeframe] {
        &[
            Timeframe::M1,
            Timeframe::M5,
            Timeframe::M15,
            Timeframe::M30,
            Timeframe::H1,
            Timeframe::H4,
            Timeframe::D1,
        ]
    }

    /// Timeframes above one minute, fed by the rollup accumulator.
    pub fn aggregated() -> &'static [Timeframe] {
        &[
            Timeframe::M5,
            Timeframe::M15,
            Timeframe::M30,
            Timeframe::H1,
            Timeframe::H4,
            Timeframe::D1,
        ]
    }

    /// Label used on stored rows and in logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::M1 => "1m",
            Timeframe::M5 => "5m",
            Timeframe::M15 => "15m",
            Timeframe::M30 => "30m",
            Timeframe::H1 => "1h",
            Timeframe::H4 => "4h",
            Timeframe::D1 => "1d",
        }
    }

    /// Floor a UTC timestamp to the start of its bucket.
    pub fn floor(&self, ts: DateTime<Utc>) -> DateTime<Utc> {
        let total_min = ts.timestamp().div_euclid(60);
        let bucket_min = total_min.div_euclid(self.minutes()) * self.minutes();
        // In-range for any timestamp this service will ever see.
        Utc.timestamp_opt(bucket_min * 60, 0).unwrap()
    }

    /// Exclusive end of the bucket beginning at `bucket_start`.
    pub fn bucket_end(&self, bucket_start: DateTime<Utc>) -> DateTime<Utc> {
        bucket_start + self.duration()
    }

    /// Whether the bucket beginning at `bucket_start` has fully elapsed
    /// given the latest observed minute timestamp.
    pub fn is_closed(&self, bucket_start: DateTime<Utc>, latest_minute: DateTime<Utc>) -> bool {
        self.bucket_end(bucket_start) <= latest_minute
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Timeframe {
    type Err = ParseTimeframeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1m" => Ok(Timeframe::M1),
            "5m" => Ok(Timeframe::M5),
            "15m" => Ok(Timeframe::M15),
            "30m" => Ok(Timeframe::M30),
            "1h" => Ok(Timeframe::H1),
            "4h" => Ok(Timeframe::H4),
            "1d" => Ok(Timeframe::D1),
            other => Err(ParseTimeframeError(other.to_string())),
        }
    }
}
