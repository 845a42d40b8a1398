//! The candle store contract consumed by the live pipeline
//!
//! Minute rows and aggregated rows are distinct row families for
//! write-density reasons, but both are unique per
//! (asset_id, timeframe, bucket_start) and obey the merge rules in
//! [`crate::merge`]. Every successful write must invalidate the read-through
//! cache entry for the touched (asset, timeframe) pair.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use types::candle::Candle;
use types::ids::AssetId;
use types::timeframe::Timeframe;

use crate::error::StoreError;
use crate::merge::WriteMode;

/// Idempotent upsert and read contract for candle persistence.
#[async_trait]
pub trait CandleStore: Send + Sync {
    /// Upsert a batch of 1-minute candles. Returns rows affected.
    async fn upsert_minute(&self, rows: &[Candle], mode: WriteMode) -> Result<usize, StoreError>;

    /// Upsert a batch of aggregated candles for one timeframe.
    /// Returns rows affected.
    async fn upsert_aggregated(
        &self,
        timeframe: Timeframe,
        rows: &[Candle],
        mode: WriteMode,
    ) -> Result<usize, StoreError>;

    /// Most recent candle for an (asset, timeframe) pair.
    async fn latest(
        &self,
        asset_id: AssetId,
        timeframe: Timeframe,
    ) -> Result<Option<Candle>, StoreError>;

    /// Bucket start of the oldest durable 1-minute candle for an asset.
    async fn earliest_minute(&self, asset_id: AssetId)
        -> Result<Option<DateTime<Utc>>, StoreError>;

    /// Whether the asset has at least one durable row for this timeframe
    /// with a bucket start strictly before `cutoff`.
    async fn has_aggregated_before(
        &self,
        asset_id: AssetId,
        timeframe: Timeframe,
        cutoff: DateTime<Utc>,
    ) -> Result<bool, StoreError>;
}
