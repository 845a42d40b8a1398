//! In-memory candle store
//!
//! Reference implementation of the [`CandleStore`] contract backed by a
//! concurrent map. Used by tests and local wiring; it exists to pin down the
//! merge and invalidation semantics a relational backend must reproduce.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::debug;
use types::candle::Candle;
use types::ids::AssetId;
use types::timeframe::Timeframe;

use crate::cache::{CandleCache, NoopCache};
use crate::error::StoreError;
use crate::merge::{merge_candle, WriteMode};
use crate::store::CandleStore;

type RowKey = (AssetId, Timeframe, DateTime<Utc>);

/// Concurrent-map store with read-cache invalidation on every write.
pub struct MemoryCandleStore {
    rows: DashMap<RowKey, Candle>,
    cache: Arc<dyn CandleCache>,
}

impl MemoryCandleStore {
    pub fn new() -> Self {
        Self::with_cache(Arc::new(NoopCache))
    }

    pub fn with_cache(cache: Arc<dyn CandleCache>) -> Self {
        Self {
            rows: DashMap::new(),
            cache,
        }
    }

    /// Number of stored rows across all timeframes.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Fetch one row by key (test helper).
    pub fn get(
        &self,
        asset_id: AssetId,
        timeframe: Timeframe,
        bucket_start: DateTime<Utc>,
    ) -> Option<Candle> {
        self.rows
            .get(&(asset_id, timeframe, bucket_start))
            .map(|r| r.value().clone())
    }

    async fn upsert(&self, rows: &[Candle], mode: WriteMode) -> Result<usize, StoreError> {
        let mut touched: Vec<(AssetId, Timeframe)> = Vec::new();
        for row in rows {
            self.rows
                .entry(row.key())
                .and_modify(|existing| merge_candle(existing, row, mode))
                .or_insert_with(|| row.clone());
            if !touched.contains(&(row.asset_id, row.timeframe)) {
                touched.push((row.asset_id, row.timeframe));
            }
        }
        for (asset_id, timeframe) in touched {
            self.cache.invalidate(asset_id, Some(timeframe)).await;
        }
        Ok(rows.len())
    }
}

impl Default for MemoryCandleStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CandleStore for MemoryCandleStore {
    async fn upsert_minute(&self, rows: &[Candle], mode: WriteMode) -> Result<usize, StoreError> {
        debug_assert!(rows.iter().all(|r| r.timeframe == Timeframe::M1));
        self.upsert(rows, mode).await
    }

    async fn upsert_aggregated(
        &self,
        timeframe: Timeframe,
        rows: &[Candle],
        mode: WriteMode,
    ) -> Result<usize, StoreError> {
        debug_assert!(rows.iter().all(|r| r.timeframe == timeframe));
        debug!(
            timeframe = %timeframe,
            rows = rows.len(),
            mode = mode.as_str(),
            "upserting aggregated candles"
        );
        self.upsert(rows, mode).await
    }

    async fn latest(
        &self,
        asset_id: AssetId,
        timeframe: Timeframe,
    ) -> Result<Option<Candle>, StoreError> {
        Ok(self
            .rows
            .iter()
            .filter(|e| e.key().0 == asset_id && e.key().1 == timeframe)
            .max_by_key(|e| e.key().2)
            .map(|e| e.value().clone()))
    }

    async fn earliest_minute(
        &self,
        asset_id: AssetId,
    ) -> Result<Option<DateTime<Utc>>, StoreError> {
        Ok(self
            .rows
            .iter()
            .filter(|e| e.key().0 == asset_id && e.key().1 == Timeframe::M1)
            .map(|e| e.key().2)
            .min())
    }

    async fn has_aggregated_before(
        &self,
        asset_id: AssetId,
        timeframe: Timeframe,
        cutoff: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        Ok(self
            .rows
            .iter()
            .any(|e| e.key().0 == asset_id && e.key().1 == timeframe && e.key().2 < cutoff))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys;
    use crate::kv::{KvStore, MemoryKvStore};
    use crate::cache::KvCandleCache;
    use chrono::TimeZone;
    use rust_decimal::Decimal;
    use std::time::Duration;

    fn minute_row(asset: i64, minute: u32, close: i64, volume: i64) -> Candle {
        Candle {
            asset_id: AssetId::new(asset),
            timeframe: Timeframe::M1,
            bucket_start: Utc.with_ymd_and_hms(2024, 1, 15, 14, minute, 0).unwrap(),
            open: Some(Decimal::from(close)),
            high: Some(Decimal::from(close)),
            low: Some(Decimal::from(close)),
            close: Some(Decimal::from(close)),
            volume: Decimal::from(volume),
            trade_count: None,
            vwap: None,
        }
    }

    #[tokio::test]
    async fn test_upsert_creates_then_merges() {
        let store = MemoryCandleStore::new();
        let row = minute_row(1, 30, 150, 10);

        store.upsert_minute(&[row.clone()], WriteMode::Delta).await.unwrap();
        store.upsert_minute(&[row.clone()], WriteMode::Delta).await.unwrap();

        let stored = store
            .get(AssetId::new(1), Timeframe::M1, row.bucket_start)
            .unwrap();
        // Delta replay adds volume but leaves OHLC alone.
        assert_eq!(stored.close, Some(Decimal::from(150)));
        assert_eq!(stored.volume, Decimal::from(20));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_snapshot_upsert_is_idempotent() {
        let store = MemoryCandleStore::new();
        let mut row = minute_row(1, 30, 150, 10);
        row.timeframe = Timeframe::M5;

        for _ in 0..2 {
            store
                .upsert_aggregated(Timeframe::M5, &[row.clone()], WriteMode::Snapshot)
                .await
                .unwrap();
        }
        let stored = store
            .get(AssetId::new(1), Timeframe::M5, row.bucket_start)
            .unwrap();
        assert_eq!(stored.volume, Decimal::from(10));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_latest_and_earliest() {
        let store = MemoryCandleStore::new();
        store
            .upsert_minute(
                &[minute_row(1, 30, 150, 10), minute_row(1, 35, 152, 5)],
                WriteMode::Delta,
            )
            .await
            .unwrap();

        let latest = store.latest(AssetId::new(1), Timeframe::M1).await.unwrap().unwrap();
        assert_eq!(
            latest.bucket_start,
            Utc.with_ymd_and_hms(2024, 1, 15, 14, 35, 0).unwrap()
        );
        let earliest = store.earliest_minute(AssetId::new(1)).await.unwrap().unwrap();
        assert_eq!(earliest, Utc.with_ymd_and_hms(2024, 1, 15, 14, 30, 0).unwrap());
        assert!(store.latest(AssetId::new(9), Timeframe::M1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_has_aggregated_before() {
        let store = MemoryCandleStore::new();
        let mut row = minute_row(1, 30, 150, 10);
        row.timeframe = Timeframe::H1;
        row.bucket_start = Utc.with_ymd_and_hms(2024, 1, 10, 14, 0, 0).unwrap();
        store
            .upsert_aggregated(Timeframe::H1, &[row], WriteMode::Snapshot)
            .await
            .unwrap();

        let cutoff = Utc.with_ymd_and_hms(2024, 1, 14, 0, 0, 0).unwrap();
        assert!(store
            .has_aggregated_before(AssetId::new(1), Timeframe::H1, cutoff)
            .await
            .unwrap());
        assert!(!store
            .has_aggregated_before(AssetId::new(1), Timeframe::H4, cutoff)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_write_invalidates_cache() {
        let kv = Arc::new(MemoryKvStore::new());
        kv.put_ttl(
            &keys::candles(AssetId::new(1), Timeframe::M1),
            "[]",
            Duration::from_secs(60),
        )
        .await
        .unwrap();

        let store = MemoryCandleStore::with_cache(Arc::new(KvCandleCache::new(kv.clone())));
        store
            .upsert_minute(&[minute_row(1, 30, 150, 10)], WriteMode::Delta)
            .await
            .unwrap();

        assert_eq!(
            kv.get(&keys::candles(AssetId::new(1), Timeframe::M1)).await.unwrap(),
            None
        );
    }
}
