//! Backfill gate
//!
//! Arbitrates between the live rollup path and the historical backfill
//! pipeline before any higher-timeframe write. Decision order:
//!
//! 1. Backfill *running* for the asset → deny (never race the resampler)
//! 2. Backfill *completed* → approve
//! 3. Heuristic: approve only when durable 1-minute history already spans
//!    the minimum lookback AND the target timeframe has at least one row
//!    older than yesterday's UTC midnight — an asset with well-established
//!    history that one more live aggregate cannot corrupt. The fallback
//!    exists because long-lived assets predate the explicit completion
//!    marker.
//!
//! Marker reads are advisory cache lookups. An unreadable running marker is
//! treated as not-running and an unreadable completed marker as
//! not-complete, so a cache outage degrades toward skipping writes rather
//! than corrupting aggregates. 1-minute writes never consult this gate.

use std::sync::Arc;

use candle_store::{BackfillMarkers, CandleStore};
use chrono::{DateTime, Duration, Utc};
use tracing::{debug, warn};
use types::ids::AssetId;
use types::timeframe::Timeframe;

/// Thresholds for the heuristic fallback. Empirically tuned policy, not a
/// contract.
#[derive(Debug, Clone)]
pub struct GateConfig {
    /// Minimum span of durable 1-minute history before the live path may
    /// write aggregates without an explicit completion marker.
    pub min_coverage: Duration,
    /// How far before today's UTC midnight a timeframe row must exist to
    /// count as historical rather than freshly live-written.
    pub historical_slack: Duration,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            min_coverage: Duration::days(4),
            historical_slack: Duration::days(1),
        }
    }
}

/// Gate consulted before every higher-timeframe write.
pub struct BackfillGate {
    markers: BackfillMarkers,
    store: Arc<dyn CandleStore>,
    config: GateConfig,
}

impl BackfillGate {
    pub fn new(markers: BackfillMarkers, store: Arc<dyn CandleStore>, config: GateConfig) -> Self {
        Self {
            markers,
            store,
            config,
        }
    }

    /// Whether the live path may write aggregates for this (asset,
    /// timeframe) as of `now`.
    pub async fn approves(
        &self,
        asset_id: AssetId,
        timeframe: Timeframe,
        now: DateTime<Utc>,
    ) -> bool {
        match self.markers.is_running(asset_id).await {
            Ok(true) => {
                debug!(%asset_id, timeframe = %timeframe, "backfill running, write denied");
                return false;
            }
            Ok(false) => {}
            Err(err) => {
                // Cannot confirm; fall through to the remaining checks.
                warn!(%asset_id, %err, "running-marker lookup failed");
            }
        }

        match self.markers.is_completed(asset_id).await {
            Ok(true) => return true,
            Ok(false) => {}
            Err(err) => {
                warn!(%asset_id, %err, "completed-marker lookup failed");
            }
        }

        self.heuristic_complete(asset_id, timeframe, now).await
    }

    /// Store-backed fallback for assets without an explicit marker.
    async fn heuristic_complete(
        &self,
        asset_id: AssetId,
        timeframe: Timeframe,
        now: DateTime<Utc>,
    ) -> bool {
        match self.store.latest(asset_id, Timeframe::M1).await {
            Ok(Some(_)) => {}
            Ok(None) => return false,
            Err(err) => {
                warn!(%asset_id, %err, "latest-minute lookup failed, write denied");
                return false;
            }
        }

        let coverage_threshold = now - self.config.min_coverage;
        match self.store.earliest_minute(asset_id).await {
            Ok(Some(earliest)) if earliest <= coverage_threshold => {}
            Ok(_) => return false,
            Err(err) => {
                warn!(%asset_id, %err, "earliest-minute lookup failed, write denied");
                return false;
            }
        }

        let midnight = now
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .map(|dt| dt.and_utc())
            .unwrap_or(now);
        let cutoff = midnight - self.config.historical_slack;
        match self
            .store
            .has_aggregated_before(asset_id, timeframe, cutoff)
            .await
        {
            Ok(exists) => exists,
            Err(err) => {
                warn!(%asset_id, %err, "historical-row lookup failed, write denied");
                false
            }
        }
    }
}
