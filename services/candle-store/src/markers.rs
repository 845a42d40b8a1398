//! Backfill state markers
//!
//! Three advisory markers per asset, all TTL'd entries in the key-value
//! backend rather than transactional locks:
//! - *queued*: a backfill request has been dispatched and not yet cleared
//! - *running*: an execution is in progress (acquired set-if-absent)
//! - *completed*: historical coverage has been established
//!
//! Absence of *running* does not prove there is no concurrent writer; the
//! upsert merge semantics carry the rest of the safety argument.

use std::sync::Arc;
use std::time::Duration;

use types::ids::AssetId;

use crate::error::KvError;
use crate::keys;
use crate::kv::KvStore;

/// Marker lifetimes.
#[derive(Debug, Clone)]
pub struct MarkerTtls {
    /// How long a queued request suppresses duplicates.
    pub queued: Duration,
    /// Mutual-exclusion window for one backfill execution.
    pub running: Duration,
}

impl Default for MarkerTtls {
    fn default() -> Self {
        Self {
            queued: Duration::from_secs(60 * 60),
            running: Duration::from_secs(60 * 90),
        }
    }
}

/// Typed access to the per-asset backfill markers.
#[derive(Clone)]
pub struct BackfillMarkers {
    kv: Arc<dyn KvStore>,
    ttls: MarkerTtls,
}

impl BackfillMarkers {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self::with_ttls(kv, MarkerTtls::default())
    }

    pub fn with_ttls(kv: Arc<dyn KvStore>, ttls: MarkerTtls) -> Self {
        Self { kv, ttls }
    }

    /// Whether a backfill execution currently holds the running marker.
    pub async fn is_running(&self, asset_id: AssetId) -> Result<bool, KvError> {
        Ok(self.kv.get(&keys::backfill_running(asset_id)).await?.is_some())
    }

    /// Whether historical coverage has been marked established.
    pub async fn is_completed(&self, asset_id: AssetId) -> Result<bool, KvError> {
        Ok(self
            .kv
            .get(&keys::backfill_completed(asset_id))
            .await?
            .is_some())
    }

    /// Record a queued request; `false` when one is already pending.
    pub async fn try_mark_queued(&self, asset_id: AssetId) -> Result<bool, KvError> {
        self.kv
            .add_ttl(&keys::backfill_queued(asset_id), "1", self.ttls.queued)
            .await
    }

    /// Acquire the running marker; `false` when another execution holds it.
    pub async fn try_acquire_running(&self, asset_id: AssetId) -> Result<bool, KvError> {
        self.kv
            .add_ttl(&keys::backfill_running(asset_id), "1", self.ttls.running)
            .await
    }

    /// Mark coverage established. No TTL pressure here, but the marker is
    /// still advisory, so a long lifetime stands in for permanence.
    pub async fn mark_completed(&self, asset_id: AssetId) -> Result<(), KvError> {
        self.kv
            .put_ttl(
                &keys::backfill_completed(asset_id),
                "1",
                Duration::from_secs(60 * 60 * 24 * 365),
            )
            .await
    }

    /// Release the running and queued markers after an execution ends.
    pub async fn release(&self, asset_id: AssetId) -> Result<(), KvError> {
        self.kv.delete(&keys::backfill_running(asset_id)).await?;
        self.kv.delete(&keys::backfill_queued(asset_id)).await
    }
}
