//! Read-through candle cache contract
//!
//! The get/put/invalidate surface consumed by the store and the read API.
//! The store invalidates on every write so readers never serve a candle
//! older than the row just upserted; the read API warms entries with
//! `put`. Anything beyond this contract (range queries, warming policy)
//! lives with the read API.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;
use types::candle::Candle;
use types::ids::AssetId;
use types::timeframe::Timeframe;

use crate::keys;
use crate::kv::KvStore;

/// Per-timeframe TTLs for cached candle ranges.
///
/// Finer timeframes churn faster and expire sooner.
#[derive(Debug, Clone)]
pub struct CacheTtlPolicy;

impl CacheTtlPolicy {
    pub fn ttl(timeframe: Timeframe) -> Duration {
        const HOUR: u64 = 60 * 60;
        const DAY: u64 = 24 * HOUR;
        Duration::from_secs(match timeframe {
            Timeframe::M1 => 6 * HOUR,
            Timeframe::M5 => 12 * HOUR,
            Timeframe::M15 => DAY,
            Timeframe::M30 => DAY,
            Timeframe::H1 => 3 * DAY,
            Timeframe::H4 => 7 * DAY,
            Timeframe::D1 => 14 * DAY,
        })
    }
}

/// Read-through cache of recent candle ranges.
///
/// Every operation is best-effort: a cache failure costs a stale or slow
/// read, never correctness.
#[async_trait]
pub trait CandleCache: Send + Sync {
    /// Cached range for an (asset, timeframe) pair, if present.
    async fn get(&self, asset_id: AssetId, timeframe: Timeframe) -> Option<Vec<Candle>>;

    /// Replace the cached range for an (asset, timeframe) pair.
    async fn put(&self, asset_id: AssetId, timeframe: Timeframe, candles: &[Candle]);

    /// Drop cached ranges for an asset; `None` means every timeframe.
    async fn invalidate(&self, asset_id: AssetId, timeframe: Option<Timeframe>);
}

/// Cache stored as JSON blobs in the shared key-value backend.
pub struct KvCandleCache {
    kv: Arc<dyn KvStore>,
}

impl KvCandleCache {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }
}

#[async_trait]
impl CandleCache for KvCandleCache {
    async fn get(&self, asset_id: AssetId, timeframe: Timeframe) -> Option<Vec<Candle>> {
        let key = keys::candles(asset_id, timeframe);
        match self.kv.get(&key).await {
            Ok(Some(raw)) => match serde_json::from_str(&raw) {
                Ok(candles) => Some(candles),
                Err(err) => {
                    debug!(%asset_id, timeframe = %timeframe, %err, "corrupt cache entry dropped");
                    let _ = self.kv.delete(&key).await;
                    None
                }
            },
            Ok(None) => None,
            Err(err) => {
                debug!(%asset_id, timeframe = %timeframe, %err, "cache read failed");
                None
            }
        }
    }

    async fn put(&self, asset_id: AssetId, timeframe: Timeframe, candles: &[Candle]) {
        let key = keys::candles(asset_id, timeframe);
        let raw = match serde_json::to_string(candles) {
            Ok(raw) => raw,
            Err(err) => {
                debug!(%asset_id, timeframe = %timeframe, %err, "cache serialization failed");
                return;
            }
        };
        if let Err(err) = self
            .kv
            .put_ttl(&key, &raw, CacheTtlPolicy::ttl(timeframe))
            .await
        {
            debug!(%asset_id, timeframe = %timeframe, %err, "cache write failed");
        }
    }

    async fn invalidate(&self, asset_id: AssetId, timeframe: Option<Timeframe>) {
        let targets: Vec<Timeframe> = match timeframe {
            Some(tf) => vec![tf],
            None => Timeframe::all().to_vec(),
        };
        for tf in targets {
            let key = keys::candles(asset_id, tf);
            // Best-effort: a missed delete only means one stale read until
            // the TTL expires.
            if let Err(err) = self.kv.delete(&key).await {
                debug!(%asset_id, timeframe = %tf, %err, "cache invalidation failed");
            }
        }
    }
}

/// No-op cache for wiring without a read cache.
#[derive(Debug, Default)]
pub struct NoopCache;

#[async_trait]
impl CandleCache for NoopCache {
    async fn get(&self, _asset_id: AssetId, _timeframe: Timeframe) -> Option<Vec<Candle>> {
        None
    }

    async fn put(&self, _asset_id: AssetId, _timeframe: Timeframe, _candles: &[Candle]) {}

    async fn invalidate(&self, _asset_id: AssetId, _timeframe: Option<Timeframe>) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryKvStore;
    use chrono::{TimeZone, Utc};
    use rust_decimal::Decimal;

    fn sample(asset: i64, tf: Timeframe) -> Candle {
        Candle {
            asset_id: AssetId::new(asset),
            timeframe: tf,
            bucket_start: Utc.with_ymd_and_hms(2024, 1, 15, 14, 30, 0).unwrap(),
            open: Some(Decimal::from(150)),
            high: Some(Decimal::from(151)),
            low: Some(Decimal::from(149)),
            close: Some(Decimal::from(150)),
            volume: Decimal::from(35),
            trade_count: Some(3),
            vwap: None,
        }
    }

    #[tokio::test]
    async fn test_put_get_roundtrip() {
        let cache = KvCandleCache::new(Arc::new(MemoryKvStore::new()));
        let rows = vec![sample(1, Timeframe::M5)];

        assert!(cache.get(AssetId::new(1), Timeframe::M5).await.is_none());
        cache.put(AssetId::new(1), Timeframe::M5, &rows).await;
        assert_eq!(cache.get(AssetId::new(1), Timeframe::M5).await, Some(rows));
    }

    #[tokio::test]
    async fn test_invalidate_single_timeframe() {
        let cache = KvCandleCache::new(Arc::new(MemoryKvStore::new()));
        cache
            .put(AssetId::new(1), Timeframe::M5, &[sample(1, Timeframe::M5)])
            .await;
        cache
            .put(AssetId::new(1), Timeframe::H1, &[sample(1, Timeframe::H1)])
            .await;

        cache.invalidate(AssetId::new(1), Some(Timeframe::M5)).await;

        assert!(cache.get(AssetId::new(1), Timeframe::M5).await.is_none());
        assert!(cache.get(AssetId::new(1), Timeframe::H1).await.is_some());
    }

    #[tokio::test]
    async fn test_invalidate_all_timeframes() {
        let cache = KvCandleCache::new(Arc::new(MemoryKvStore::new()));
        for tf in Timeframe::all() {
            cache.put(AssetId::new(2), *tf, &[sample(2, *tf)]).await;
        }

        cache.invalidate(AssetId::new(2), None).await;

        for tf in Timeframe::all() {
            assert!(cache.get(AssetId::new(2), *tf).await.is_none());
        }
    }

    #[tokio::test]
    async fn test_corrupt_entry_dropped() {
        let kv = Arc::new(MemoryKvStore::new());
        kv.put_ttl(
            &keys::candles(AssetId::new(3), Timeframe::M1),
            "not json",
            Duration::from_secs(60),
        )
        .await
        .unwrap();

        let cache = KvCandleCache::new(kv.clone());
        assert!(cache.get(AssetId::new(3), Timeframe::M1).await.is_none());
        // The bad entry was evicted.
        assert_eq!(
            kv.get(&keys::candles(AssetId::new(3), Timeframe::M1))
                .await
                .unwrap(),
            None
        );
    }

    #[test]
    fn test_ttl_policy_widens_with_timeframe() {
        assert!(CacheTtlPolicy::ttl(Timeframe::M1) < CacheTtlPolicy::ttl(Timeframe::H1));
        assert!(CacheTtlPolicy::ttl(Timeframe::H1) < CacheTtlPolicy::ttl(Timeframe::D1));
    }
}
