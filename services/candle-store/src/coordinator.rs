//! Backfill coordinator
//!
//! Single entry point for "please backfill asset X" requests from any caller
//! (the streamer's staleness check, watchlist additions, operators). Dedup
//! happens here via the queued marker so concurrent processes do not enqueue
//! the same asset twice; the job itself additionally takes the running
//! marker for double safety.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{info, warn};
use types::ids::{AssetId, BackfillJobId};

use crate::error::KvError;
use crate::markers::BackfillMarkers;

/// A dispatched backfill job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackfillRequest {
    pub job_id: BackfillJobId,
    pub asset_id: AssetId,
    /// Caller label for logs ("subscription-manager", "watchlist-api", ...).
    pub source: String,
}

/// Transport that hands a request to the backfill worker.
#[async_trait]
pub trait BackfillDispatcher: Send + Sync {
    async fn dispatch(&self, request: BackfillRequest) -> Result<(), String>;
}

/// Dispatcher backed by an in-process channel; the worker end drains it.
pub struct ChannelDispatcher {
    tx: mpsc::UnboundedSender<BackfillRequest>,
}

impl ChannelDispatcher {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<BackfillRequest>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl BackfillDispatcher for ChannelDispatcher {
    async fn dispatch(&self, request: BackfillRequest) -> Result<(), String> {
        self.tx.send(request).map_err(|e| e.to_string())
    }
}

/// Deduplicating front door for backfill requests.
pub struct BackfillCoordinator<D: BackfillDispatcher> {
    markers: BackfillMarkers,
    dispatcher: D,
}

impl<D: BackfillDispatcher> BackfillCoordinator<D> {
    pub fn new(markers: BackfillMarkers, dispatcher: D) -> Self {
        Self {
            markers,
            dispatcher,
        }
    }

    /// Request a backfill for an asset.
    ///
    /// Returns `true` when a job was scheduled, `false` when suppressed by
    /// an existing queued marker. A marker-store failure suppresses the
    /// request: better to retry on the caller's next pass than to flood the
    /// queue while the dedup guard is blind.
    pub async fn request_backfill(
        &self,
        asset_id: AssetId,
        source: &str,
    ) -> Result<bool, KvError> {
        if !self.markers.try_mark_queued(asset_id).await? {
            info!(%asset_id, source, "backfill already queued, skipping");
            return Ok(false);
        }

        let request = BackfillRequest {
            job_id: BackfillJobId::new(),
            asset_id,
            source: source.to_string(),
        };
        let job_id = request.job_id;
        if let Err(err) = self.dispatcher.dispatch(request).await {
            warn!(%asset_id, source, %err, "backfill dispatch failed");
            // Free the queued marker so the next caller can retry.
            self.markers.release(asset_id).await?;
            return Ok(false);
        }

        info!(%asset_id, %job_id, source, "backfill scheduled");
        Ok(true)
    }

    pub fn markers(&self) -> &BackfillMarkers {
        &self.markers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryKvStore;
    use std::sync::Arc;

    fn coordinator() -> (
        BackfillCoordinator<ChannelDispatcher>,
        mpsc::UnboundedReceiver<BackfillRequest>,
    ) {
        let markers = BackfillMarkers::new(Arc::new(MemoryKvStore::new()));
        let (dispatcher, rx) = ChannelDispatcher::new();
        (BackfillCoordinator::new(markers, dispatcher), rx)
    }

    #[tokio::test]
    async fn test_request_dispatches_once() {
        let (coord, mut rx) = coordinator();
        let asset = AssetId::new(1);

        assert!(coord.request_backfill(asset, "test").await.unwrap());
        // Duplicate while queued is suppressed.
        assert!(!coord.request_backfill(asset, "test").await.unwrap());

        let job = rx.try_recv().unwrap();
        assert_eq!(job.asset_id, asset);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_release_allows_requeue() {
        let (coord, mut rx) = coordinator();
        let asset = AssetId::new(2);

        assert!(coord.request_backfill(asset, "test").await.unwrap());
        coord.markers().release(asset).await.unwrap();
        assert!(coord.request_backfill(asset, "test").await.unwrap());

        assert_eq!(rx.try_recv().unwrap().asset_id, asset);
        assert_eq!(rx.try_recv().unwrap().asset_id, asset);
    }

    #[tokio::test]
    async fn test_distinct_assets_do_not_interfere() {
        let (coord, mut rx) = coordinator();
        assert!(coord.request_backfill(AssetId::new(3), "a").await.unwrap());
        assert!(coord.request_backfill(AssetId::new(4), "b").await.unwrap());
        assert_eq!(rx.try_recv().unwrap().asset_id, AssetId::new(3));
        assert_eq!(rx.try_recv().unwrap().asset_id, AssetId::new(4));
    }
}
