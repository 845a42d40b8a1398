//! Centralized cache-key schema
//!
//! One module owns every key format shared between this process and the
//! historical backfill job, so both sides agree byte-for-byte. Key layout:
//! `backfill:<state>:<asset_id>` for markers, `candles:<asset_id>:<tf>` for
//! cached candle ranges.

use types::ids::AssetId;
use types::timeframe::Timeframe;

/// Key guarding against duplicate queued backfill requests.
pub fn backfill_queued(asset_id: AssetId) -> String {
    format!("backfill:queued:{asset_id}")
}

/// Key held while a backfill execution is in progress.
pub fn backfill_running(asset_id: AssetId) -> String {
    format!("backfill:running:{asset_id}")
}

/// Key marking historical coverage as established for an asset.
pub fn backfill_completed(asset_id: AssetId) -> String {
    format!("backfill:completed:{asset_id}")
}

/// Key for the cached candle range of one (asset, timeframe) pair.
pub fn candles(asset_id: AssetId, timeframe: Timeframe) -> String {
    format!("candles:{asset_id}:{timeframe}")
}

/// Short-TTL liveness marker refreshed as trade frames arrive.
pub fn ticks_received() -> String {
    "ticks_received".to_string()
}
