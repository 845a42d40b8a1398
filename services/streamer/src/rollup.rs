//! Higher-timeframe rollup accumulator
//!
//! Long-lived in-memory state folding completed minute bars into every
//! aggregated timeframe. Each (asset, timeframe, bucket) walks an explicit
//! state machine:
//!
//! ```text
//! absent ──first minute bar──► open ──bucket end ≤ latest minute──► closed
//! ```
//!
//! Closed is terminal: the entry is evicted and its bucket start recorded in
//! a per-(asset, timeframe) watermark, so a late minute bar can never
//! resurrect partial state. Open buckets are persisted as snapshots on a
//! per-timeframe throttle; closed buckets are persisted once on closure —
//! both only when the backfill gate approves. A closed bucket the gate
//! rejects is evicted without a write and left to the historical resampler,
//! which owns the authoritative value for buckets this process may have
//! seen only partially.
//!
//! Single-writer: only the drain task touches this state (resets from the
//! subscription task arrive as commands over a channel).

use std::collections::{BTreeSet, HashMap};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tracing::debug;
use types::candle::OhlcvBar;
use types::ids::AssetId;
use types::timeframe::Timeframe;

use crate::aggregator::MinuteKey;

/// Key of one aggregated bucket: asset plus bucket start.
pub type BucketKey = (AssetId, DateTime<Utc>);

/// Keys touched per timeframe by one rollup pass.
pub type TouchedByTimeframe = HashMap<Timeframe, BTreeSet<BucketKey>>;

/// Lifecycle of one (asset, timeframe, bucket).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BucketState {
    /// No minute bar observed for this bucket.
    Absent,
    /// Accumulating; the bucket interval has not fully elapsed.
    Open,
    /// Interval elapsed and entry evicted; terminal.
    Closed,
}

/// Tuning for the rollup flush policy.
#[derive(Debug, Clone)]
pub struct RollupConfig {
    /// Minimum interval between snapshot writes of the same timeframe's
    /// open buckets. Bounds write amplification while keeping
    /// still-forming candles fresh for readers.
    pub open_flush_interval: Duration,
}

impl Default for RollupConfig {
    fn default() -> Self {
        Self {
            open_flush_interval: Duration::from_secs(2),
        }
    }
}

/// Per-timeframe accumulators over all tracked assets.
pub struct RollupAccumulator {
    config: RollupConfig,
    acc: HashMap<Timeframe, HashMap<BucketKey, OhlcvBar>>,
    /// Latest closed bucket start per (asset, timeframe).
    closed_watermark: HashMap<(AssetId, Timeframe), DateTime<Utc>>,
    last_open_flush: HashMap<Timeframe, Instant>,
}

impl RollupAccumulator {
    pub fn new(config: RollupConfig) -> Self {
        let acc = Timeframe::aggregated()
            .iter()
            .map(|tf| (*tf, HashMap::new()))
            .collect();
        Self {
            config,
            acc,
            closed_watermark: HashMap::new(),
            last_open_flush: HashMap::new(),
        }
    }

    /// Fold a batch's minute bars into every aggregated timeframe.
    ///
    /// Returns the buckets touched per timeframe so the open-bucket flush
    /// can persist selectively. Minute bars at or below a timeframe's
    /// closure watermark are dropped for that timeframe (late-tick policy);
    /// their 1-minute rows were already written upstream.
    pub fn rollup(&mut self, minute_bars: &HashMap<MinuteKey, OhlcvBar>) -> TouchedByTimeframe {
        // Fold in minute order so `close` lands on the chronologically
        // latest minute regardless of map iteration order.
        let mut ordered: Vec<(&MinuteKey, &OhlcvBar)> = minute_bars.iter().collect();
        ordered.sort_by_key(|((asset_id, minute), _)| (*minute, *asset_id));

        let mut touched: TouchedByTimeframe = HashMap::new();
        for ((asset_id, minute), bar) in ordered {
            for tf in Timeframe::aggregated() {
                let bucket = tf.floor(*minute);
                if let Some(watermark) = self.closed_watermark.get(&(*asset_id, *tf)) {
                    if bucket <= *watermark {
                        debug!(
                            asset_id = %asset_id,
                            timeframe = %tf,
                            bucket = %bucket,
                            "minute bar for closed bucket dropped"
                        );
                        continue;
                    }
                }
                let key = (*asset_id, bucket);
                self.acc
                    .entry(*tf)
                    .or_default()
                    .entry(key)
                    .and_modify(|acc_bar| acc_bar.merge(bar))
                    .or_insert_with(|| bar.clone());
                touched.entry(*tf).or_default().insert(key);
            }
        }
        touched
    }

    /// Still-open buckets among those touched, grouped by timeframe,
    /// respecting the per-timeframe flush throttle.
    ///
    /// The throttle timestamp only advances via [`Self::note_open_flushed`],
    /// so a pass whose writes were all denied retries on the next batch.
    pub fn open_candidates(
        &self,
        touched: &TouchedByTimeframe,
        latest_minute: DateTime<Utc>,
        now: Instant,
    ) -> Vec<(Timeframe, Vec<(BucketKey, OhlcvBar)>)> {
        let mut out = Vec::new();
        for (tf, keys) in touched {
            if let Some(last) = self.last_open_flush.get(tf) {
                if now.duration_since(*last) < self.config.open_flush_interval {
                    continue;
                }
            }
            let Some(entries) = self.acc.get(tf) else {
                continue;
            };
            let mut buckets: Vec<(BucketKey, OhlcvBar)> = keys
                .iter()
                .filter(|(_, bucket)| !tf.is_closed(*bucket, latest_minute))
                .filter_map(|key| entries.get(key).map(|bar| (*key, bar.clone())))
                .collect();
            if !buckets.is_empty() {
                buckets.sort_by_key(|((asset_id, bucket), _)| (*asset_id, *bucket));
                out.push((*tf, buckets));
            }
        }
        out.sort_by_key(|(tf, _)| *tf);
        out
    }

    /// Record that open buckets for a timeframe were actually written.
    pub fn note_open_flushed(&mut self, timeframe: Timeframe, now: Instant) {
        self.last_open_flush.insert(timeframe, now);
    }

    /// Evict every bucket whose interval has fully elapsed.
    ///
    /// Eviction is unconditional; the caller decides (via the gate) whether
    /// each evicted bucket's final snapshot is written or ceded.
    pub fn drain_closed(
        &mut self,
        latest_minute: DateTime<Utc>,
    ) -> Vec<(Timeframe, BucketKey, OhlcvBar)> {
        let mut out = Vec::new();
        for tf in Timeframe::aggregated() {
            let Some(entries) = self.acc.get_mut(tf) else {
                continue;
            };
            let closed: Vec<BucketKey> = entries
                .keys()
                .filter(|(_, bucket)| tf.is_closed(*bucket, latest_minute))
                .copied()
                .collect();
            for key in closed {
                if let Some(bar) = entries.remove(&key) {
                    let (asset_id, bucket) = key;
                    self.closed_watermark
                        .entry((asset_id, *tf))
                        .and_modify(|w| {
                            if bucket > *w {
                                *w = bucket;
                            }
                        })
                        .or_insert(bucket);
                    out.push((*tf, key, bar));
                }
            }
        }
        out.sort_by_key(|(tf, (asset_id, bucket), _)| (*tf, *asset_id, *bucket));
        out
    }

    /// Purge all state for an asset: open buckets and closure watermarks.
    ///
    /// Called when the asset is unsubscribed or a backfill is (re)scheduled,
    /// so live partial state never fights the resampler and a re-add starts
    /// clean. Returns the number of open buckets removed.
    pub fn reset_for_asset(&mut self, asset_id: AssetId) -> usize {
        let mut removed = 0;
        for entries in self.acc.values_mut() {
            let before = entries.len();
            entries.retain(|(aid, _), _| *aid != asset_id);
            removed += before - entries.len();
        }
        self.closed_watermark.retain(|(aid, _), _| *aid != asset_id);
        removed
    }

    /// Lifecycle state of one bucket.
    pub fn bucket_state(&self, timeframe: Timeframe, key: BucketKey) -> BucketState {
        if self
            .acc
            .get(&timeframe)
            .is_some_and(|entries| entries.contains_key(&key))
        {
            return BucketState::Open;
        }
        let (asset_id, bucket) = key;
        match self.closed_watermark.get(&(asset_id, timeframe)) {
            Some(watermark) if bucket <= *watermark => BucketState::Closed,
            _ => BucketState::Absent,
        }
    }

    /// Total open buckets across all timeframes.
    pub fn open_len(&self) -> usize {
        self.acc.values().map(|entries| entries.len()).sum()
    }
}
