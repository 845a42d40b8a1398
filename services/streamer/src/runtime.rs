//! Service runtime
//!
//! Wires the components together and runs the task set: one connection
//! task, one reconciliation task, one drain/aggregate/rollup task, plus a
//! periodic counters log line. Tasks
//! communicate only through the tick buffer, the shared symbol cache, and
//! the command channels; the rollup accumulator is owned exclusively by
//! the drain task.
//!
//! Batch N's writes complete before batch N+1 starts aggregating, so a
//! given bucket is never written concurrently by two batches of this
//! process. Cross-process concurrency with the backfill job is handled by
//! the gate plus idempotent merge semantics, not locks.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use candle_store::{BackfillCoordinator, BackfillDispatcher, CandleStore, KvStore, WriteMode};
use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info};
use types::candle::Candle;
use types::ids::AssetId;
use types::timeframe::Timeframe;

use crate::aggregator::MinuteAggregator;
use crate::buffer::tick_buffer;
use crate::catalog::{AssetCatalog, SymbolCache, WatchlistProvider};
use crate::config::{Credentials, StreamerConfig};
use crate::connection::{Connection, SessionState};
use crate::counters::Counters;
use crate::gate::BackfillGate;
use crate::protocol::WireTrade;
use crate::rollup::RollupAccumulator;
use crate::subscriptions::{PipelineCommand, SubscriptionManager};

/// The drain-task half of the service: aggregate, persist, roll up.
///
/// Public so integration tests can drive batches without a socket.
pub struct Pipeline {
    aggregator: MinuteAggregator,
    rollup: RollupAccumulator,
    gate: BackfillGate,
    store: Arc<dyn CandleStore>,
    counters: Arc<Counters>,
    commands: mpsc::UnboundedReceiver<PipelineCommand>,
}

impl Pipeline {
    pub fn new(
        aggregator: MinuteAggregator,
        rollup: RollupAccumulator,
        gate: BackfillGate,
        store: Arc<dyn CandleStore>,
        counters: Arc<Counters>,
        commands: mpsc::UnboundedReceiver<PipelineCommand>,
    ) -> Self {
        Self {
            aggregator,
            rollup,
            gate,
            store,
            counters,
            commands,
        }
    }

    /// Process one drained batch end to end.
    pub async fn process_batch(&mut self, trades: &[WireTrade]) {
        self.apply_pending_commands();
        if trades.is_empty() {
            return;
        }

        let batch = self.aggregator.aggregate(trades);
        if batch.is_empty() {
            return;
        }
        Counters::incr(&self.counters.batches_processed);

        // 1-minute rows: delta mode, unconditional. Live minute data is the
        // authoritative record regardless of backfill state.
        let minute_rows = batch.minute_rows();
        match self
            .store
            .upsert_minute(&minute_rows, WriteMode::Delta)
            .await
        {
            Ok(_) => {
                Counters::add(&self.counters.minute_rows_written, minute_rows.len() as u64);
                debug!(rows = minute_rows.len(), "minute candles upserted");
            }
            Err(err) => {
                // Dropped, not retried: the next batch's accumulators
                // re-cover still-open buckets.
                error!(%err, rows = minute_rows.len(), "minute upsert failed, dropping batch");
                return;
            }
        }

        let Some(latest_minute) = batch.latest_minute else {
            return;
        };
        let touched = self.rollup.rollup(&batch.bars);
        let now = Utc::now();
        let mut approvals: HashMap<(AssetId, Timeframe), bool> = HashMap::new();

        self.persist_open(&touched, latest_minute, now, &mut approvals)
            .await;
        self.flush_closed(latest_minute, now, &mut approvals).await;
    }

    /// Snapshot still-forming buckets touched by this batch, throttled and
    /// gated.
    async fn persist_open(
        &mut self,
        touched: &crate::rollup::TouchedByTimeframe,
        latest_minute: DateTime<Utc>,
        now: DateTime<Utc>,
        approvals: &mut HashMap<(AssetId, Timeframe), bool>,
    ) {
        let candidates = self
            .rollup
            .open_candidates(touched, latest_minute, Instant::now());
        for (timeframe, buckets) in candidates {
            let mut rows = Vec::new();
            for ((asset_id, bucket), bar) in buckets {
                if self.approved(approvals, asset_id, timeframe, now).await {
                    rows.push(Candle::from_bar(asset_id, timeframe, bucket, &bar));
                } else {
                    Counters::incr(&self.counters.gate_denials);
                    debug!(%asset_id, %timeframe, "open bucket write denied by gate");
                }
            }
            if rows.is_empty() {
                continue;
            }
            match self
                .store
                .upsert_aggregated(timeframe, &rows, WriteMode::Snapshot)
                .await
            {
                Ok(_) => {
                    self.rollup.note_open_flushed(timeframe, Instant::now());
                    Counters::add(&self.counters.aggregated_rows_written, rows.len() as u64);
                }
                Err(err) => {
                    error!(%timeframe, %err, rows = rows.len(), "open-bucket upsert failed, dropping");
                }
            }
        }
    }

    /// Evict fully-elapsed buckets; write the final snapshot only where the
    /// gate approves, cede the rest to the historical resampler.
    async fn flush_closed(
        &mut self,
        latest_minute: DateTime<Utc>,
        now: DateTime<Utc>,
        approvals: &mut HashMap<(AssetId, Timeframe), bool>,
    ) {
        let closed = self.rollup.drain_closed(latest_minute);
        if closed.is_empty() {
            return;
        }

        let mut by_timeframe: HashMap<Timeframe, Vec<Candle>> = HashMap::new();
        for (timeframe, (asset_id, bucket), bar) in closed {
            if self.approved(approvals, asset_id, timeframe, now).await {
                by_timeframe
                    .entry(timeframe)
                    .or_default()
                    .push(Candle::from_bar(asset_id, timeframe, bucket, &bar));
            } else {
                Counters::incr(&self.counters.closed_ceded);
                debug!(
                    %asset_id,
                    %timeframe,
                    %bucket,
                    "closed bucket ceded to historical resampler"
                );
            }
        }

        for (timeframe, rows) in by_timeframe {
            match self
                .store
                .upsert_aggregated(timeframe, &rows, WriteMode::Snapshot)
                .await
            {
                Ok(_) => {
                    Counters::add(&self.counters.aggregated_rows_written, rows.len() as u64);
                    info!(%timeframe, rows = rows.len(), "closed buckets persisted");
                }
                Err(err) => {
                    // Not retried; a later resampling pass reconciles.
                    error!(%timeframe, %err, rows = rows.len(), "closed-bucket upsert failed");
                }
            }
        }
    }

    /// Gate decision memoized per (asset, timeframe) for this batch.
    async fn approved(
        &self,
        approvals: &mut HashMap<(AssetId, Timeframe), bool>,
        asset_id: AssetId,
        timeframe: Timeframe,
        now: DateTime<Utc>,
    ) -> bool {
        if let Some(decision) = approvals.get(&(asset_id, timeframe)) {
            return *decision;
        }
        let decision = self.gate.approves(asset_id, timeframe, now).await;
        approvals.insert((asset_id, timeframe), decision);
        decision
    }

    /// Apply reconciler commands between batches (single-writer rule).
    fn apply_pending_commands(&mut self) {
        while let Ok(command) = self.commands.try_recv() {
            match command {
                PipelineCommand::ResetAsset(asset_id) => {
                    let removed = self.rollup.reset_for_asset(asset_id);
                    if removed > 0 {
                        info!(%asset_id, removed, "rollup accumulators reset");
                    }
                }
            }
        }
    }
}

/// Everything the service needs that lives outside this process.
pub struct Collaborators<D: BackfillDispatcher> {
    pub store: Arc<dyn CandleStore>,
    pub kv: Arc<dyn KvStore>,
    pub catalog: Arc<dyn AssetCatalog>,
    pub watchlists: Arc<dyn WatchlistProvider>,
    pub coordinator: Arc<BackfillCoordinator<D>>,
}

/// Build and run the full task set until shutdown is signaled.
pub async fn run<D: BackfillDispatcher + 'static>(
    config: StreamerConfig,
    credentials: Credentials,
    collaborators: Collaborators<D>,
    mut shutdown: watch::Receiver<bool>,
) {
    let counters = Arc::new(Counters::new());
    let cache = Arc::new(SymbolCache::new());
    let session = Arc::new(SessionState::new());

    let (producer, mut drainer) = tick_buffer(config.drain.clone(), counters.clone());
    let (control_tx, control_rx) = mpsc::unbounded_channel();
    let (pipeline_tx, pipeline_rx) = mpsc::unbounded_channel();

    let markers = collaborators.coordinator.markers().clone();
    let gate = BackfillGate::new(markers, collaborators.store.clone(), config.gate.clone());
    let mut pipeline = Pipeline::new(
        MinuteAggregator::new(cache.clone(), counters.clone()),
        RollupAccumulator::new(config.rollup.clone()),
        gate,
        collaborators.store.clone(),
        counters.clone(),
        pipeline_rx,
    );

    let connection = Connection::new(
        config.endpoint.url(),
        credentials.key,
        credentials.secret,
        config.connection.clone(),
        session.clone(),
        producer,
        control_rx,
        collaborators.kv.clone(),
        counters.clone(),
        shutdown.clone(),
    );
    let connection_task = tokio::spawn(connection.run());

    let mut manager = SubscriptionManager::new(
        collaborators.watchlists,
        collaborators.catalog,
        collaborators.store.clone(),
        collaborators.coordinator,
        cache.clone(),
        session.clone(),
        control_tx,
        pipeline_tx,
        config.reconcile.clone(),
    );
    let mut reconcile_shutdown = shutdown.clone();
    let reconcile_session = session.clone();
    let reconcile_task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(manager.interval());
        loop {
            tokio::select! {
                _ = reconcile_shutdown.changed() => break,
                _ = ticker.tick() => {
                    if reconcile_session.is_authenticated() {
                        manager.reconcile().await;
                    }
                }
            }
        }
        debug!("reconcile task stopped");
    });

    let mut drain_shutdown = shutdown.clone();
    let drain_task = tokio::spawn(async move {
        loop {
            if *drain_shutdown.borrow() {
                break;
            }
            let batch = drainer.drain();
            if batch.is_empty() {
                tokio::select! {
                    _ = drain_shutdown.changed() => break,
                    _ = tokio::time::sleep(drainer.idle_sleep()) => {}
                }
                continue;
            }
            debug!(ticks = batch.len(), "processing batch");
            pipeline.process_batch(&batch).await;
        }
        debug!("drain task stopped");
    });

    let stats_counters = counters.clone();
    let mut stats_shutdown = shutdown.clone();
    let stats_task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(60));
        ticker.tick().await; // skip the immediate first tick
        loop {
            tokio::select! {
                _ = stats_shutdown.changed() => break,
                _ = ticker.tick() => {
                    let snap = stats_counters.snapshot();
                    info!(
                        ticks = snap.ticks_received,
                        dropped_buffer = snap.ticks_dropped_buffer,
                        dropped_unknown = snap.ticks_dropped_unknown,
                        dropped_off_hours = snap.ticks_dropped_off_hours,
                        batches = snap.batches_processed,
                        minute_rows = snap.minute_rows_written,
                        aggregated_rows = snap.aggregated_rows_written,
                        gate_denials = snap.gate_denials,
                        ceded = snap.closed_ceded,
                        reconnects = snap.reconnects,
                        "service counters"
                    );
                }
            }
        }
    });

    let _ = shutdown.changed().await;
    info!("shutdown signaled, draining tasks");
    let _ = tokio::join!(connection_task, reconcile_task, drain_task, stats_task);
}
