//! Minute aggregation
//!
//! Folds a drained batch of wire trades into per-(asset, minute) OHLCV
//! bars. Symbols that miss the cache are dropped silently — during a
//! subscription race the vendor can emit trades for symbols we no longer
//! (or do not yet) track, and that is not an error. Session-bound asset
//! classes get the regular-trading-hours filter.
//!
//! The resulting minute map is persisted immediately in delta mode with no
//! backfill gating: live 1-minute data is the authoritative record and the
//! store's merge semantics reconcile overlapping writers.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::debug;
use types::candle::{Candle, OhlcvBar};
use types::ids::AssetId;
use types::tick::Tick;
use types::timeframe::Timeframe;

use crate::catalog::SymbolCache;
use crate::counters::Counters;
use crate::hours;
use crate::protocol::WireTrade;

/// Key of one minute bar: asset plus minute bucket start.
pub type MinuteKey = (AssetId, DateTime<Utc>);

/// Output of one aggregation pass.
#[derive(Debug, Default)]
pub struct MinuteBatch {
    /// Minute bars touched by this batch.
    pub bars: HashMap<MinuteKey, OhlcvBar>,
    /// Maximum minute bucket observed; drives higher-timeframe closure.
    pub latest_minute: Option<DateTime<Utc>>,
}

impl MinuteBatch {
    /// Rows for the minute upsert.
    pub fn minute_rows(&self) -> Vec<Candle> {
        self.bars
            .iter()
            .map(|((asset_id, bucket), bar)| {
                Candle::from_bar(*asset_id, Timeframe::M1, *bucket, bar)
            })
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }
}

/// Folds wire trades into minute bars.
pub struct MinuteAggregator {
    cache: Arc<SymbolCache>,
    counters: Arc<Counters>,
}

impl MinuteAggregator {
    pub fn new(cache: Arc<SymbolCache>, counters: Arc<Counters>) -> Self {
        Self { cache, counters }
    }

    /// Aggregate one batch. Per-asset arrival order must be preserved by
    /// the caller (the buffer is FIFO), so open/close derivation is exact.
    pub fn aggregate(&self, trades: &[WireTrade]) -> MinuteBatch {
        // Snapshot once; the subscription task may mutate the cache while
        // this batch is folding.
        let symbols = self.cache.snapshot();

        let mut batch = MinuteBatch::default();
        for trade in trades {
            let Some(asset_id) = symbols.get(trade.symbol.as_str()).copied() else {
                Counters::incr(&self.counters.ticks_dropped_unknown);
                debug!(symbol = %trade.symbol, "tick for unknown symbol dropped");
                continue;
            };
            let tick = Tick::new(asset_id, trade.price, trade.size, trade.trade_time);

            if let Some(class) = self.cache.class_of(tick.asset_id) {
                if !hours::admits(class, tick.trade_time) {
                    Counters::incr(&self.counters.ticks_dropped_off_hours);
                    continue;
                }
            }

            let minute = Timeframe::M1.floor(tick.trade_time);
            batch
                .bars
                .entry((tick.asset_id, minute))
                .and_modify(|bar| bar.apply_trade(tick.price, tick.size))
                .or_insert_with(|| OhlcvBar::from_trade(tick.price, tick.size));

            batch.latest_minute = Some(match batch.latest_minute {
                Some(latest) if latest >= minute => latest,
                _ => minute,
            });
        }
        batch
    }
}
