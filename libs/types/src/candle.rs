//! Stored candle rows and in-memory OHLCV bars
//!
//! `OhlcvBar` is the transient accumulator shared by the minute aggregator
//! and the higher-timeframe rollup: both fold with the same rule set
//! (open set once, high = max, low = min, close = latest, volume = sum).
//! `Candle` is the row shape handed to the store.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::ids::AssetId;
use crate::timeframe::Timeframe;

/// In-memory OHLCV accumulator for a single bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OhlcvBar {
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    pub trade_count: u64,
}

impl OhlcvBar {
    /// Open a bar from the first trade in its bucket.
    pub fn from_trade(price: Decimal, size: Decimal) -> Self {
        Self {
            open: price,
            high: price,
            low: price,
            close: price,
            volume: size,
            trade_count: 1,
        }
    }

    /// Fold one more trade into the bar.
    pub fn apply_trade(&mut self, price: Decimal, size: Decimal) {
        if price > self.high {
            self.high = price;
        }
        if price < self.low {
            self.low = price;
        }
        self.close = price;
        self.volume += size;
        self.trade_count += 1;
    }

    /// Fold a finer-grained bar into this one.
    ///
    /// `other` must be chronologically later than every bar merged so far;
    /// the rollup feeds bars in minute order, which guarantees this.
    pub fn merge(&mut self, other: &OhlcvBar) {
        if other.high > self.high {
            self.high = other.high;
        }
        if other.low < self.low {
            self.low = other.low;
        }
        self.close = other.close;
        self.volume += other.volume;
        self.trade_count += other.trade_count;
    }

    /// Validate OHLCV invariants.
    pub fn is_valid(&self) -> bool {
        self.high >= self.open
            && self.high >= self.close
            && self.high >= self.low
            && self.low <= self.open
            && self.low <= self.close
            && self.volume >= Decimal::ZERO
    }
}

/// A stored candle row, unique per (asset_id, timeframe, bucket_start).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candle {
    pub asset_id: AssetId,
    pub timeframe: Timeframe,
    pub bucket_start: DateTime<Utc>,
    pub open: Option<Decimal>,
    pub high: Option<Decimal>,
    pub low: Option<Decimal>,
    pub close: Option<Decimal>,
    pub volume: Decimal,
    /// Populated by the historical pipeline; the live path leaves it unset.
    pub trade_count: Option<u64>,
    /// Populated by the historical pipeline; the live path leaves it unset.
    pub vwap: Option<Decimal>,
}

impl Candle {
    /// Build a row from a live accumulator bar.
    ///
    /// trade_count and vwap stay unset: the store coalesces, so live writes
    /// never clobber values the historical pipeline already provided.
    pub fn from_bar(
        asset_id: AssetId,
        timeframe: Timeframe,
        bucket_start: DateTime<Utc>,
        bar: &OhlcvBar,
    ) -> Self {
        Self {
            asset_id,
            timeframe,
            bucket_start,
            open: Some(bar.open),
            high: Some(bar.high),
            low: Some(bar.low),
            close: Some(bar.close),
            volume: bar.volume,
            trade_count: None,
            vwap: None,
        }
    }

    /// Uniqueness key of this row.
    pub fn key(&self) -> (AssetId, Timeframe, DateTime<Utc>) {
        (self.asset_id, self.timeframe, self.bucket_start)
    }
}
