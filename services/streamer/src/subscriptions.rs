//! Subscription reconciliation
//!
//! Periodically diffs the watchlist-derived desired symbol set against the
//! currently-subscribed set and converges: subscribe commands for
//! additions, unsubscribe for removals, symbol-cache maintenance, and the
//! backfill side effects. Runs only while the session is authenticated.
//!
//! This task never touches the rollup accumulator directly — the drain
//! task is its single writer — so resets travel as [`PipelineCommand`]s
//! over a channel and are applied between batches.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use candle_store::{BackfillCoordinator, BackfillDispatcher, CandleStore};
use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use types::ids::AssetId;
use types::timeframe::Timeframe;

use crate::catalog::{AssetCatalog, SymbolCache, WatchlistProvider};
use crate::connection::SessionState;

/// Commands sent to the connection task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlCommand {
    Subscribe(Vec<String>),
    Unsubscribe(Vec<String>),
}

/// Commands sent to the drain task, applied before the next batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineCommand {
    /// Purge all rollup state for an asset.
    ResetAsset(AssetId),
}

/// Reconciler tuning.
#[derive(Debug, Clone)]
pub struct ReconcileConfig {
    /// Delay between reconciliation passes.
    pub interval: Duration,
    /// A latest 1-minute candle older than this signals a gap.
    pub stale_after: chrono::Duration,
    /// In-process rate limit on backfill requests per asset, on top of the
    /// coordinator's queued-marker dedup.
    pub backfill_cooldown: Duration,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            stale_after: chrono::Duration::seconds(300),
            backfill_cooldown: Duration::from_secs(900),
        }
    }
}

/// Watchlist-driven subscription manager.
pub struct SubscriptionManager<D: BackfillDispatcher> {
    watchlists: Arc<dyn WatchlistProvider>,
    catalog: Arc<dyn AssetCatalog>,
    store: Arc<dyn CandleStore>,
    coordinator: Arc<BackfillCoordinator<D>>,
    cache: Arc<SymbolCache>,
    session: Arc<SessionState>,
    control_tx: mpsc::UnboundedSender<ControlCommand>,
    pipeline_tx: mpsc::UnboundedSender<PipelineCommand>,
    /// Last backfill consideration per asset, for the cooldown.
    last_backfill_check: HashMap<AssetId, Instant>,
    config: ReconcileConfig,
}

impl<D: BackfillDispatcher> SubscriptionManager<D> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        watchlists: Arc<dyn WatchlistProvider>,
        catalog: Arc<dyn AssetCatalog>,
        store: Arc<dyn CandleStore>,
        coordinator: Arc<BackfillCoordinator<D>>,
        cache: Arc<SymbolCache>,
        session: Arc<SessionState>,
        control_tx: mpsc::UnboundedSender<ControlCommand>,
        pipeline_tx: mpsc::UnboundedSender<PipelineCommand>,
        config: ReconcileConfig,
    ) -> Self {
        Self {
            watchlists,
            catalog,
            store,
            coordinator,
            cache,
            session,
            control_tx,
            pipeline_tx,
            last_backfill_check: HashMap::new(),
            config,
        }
    }

    pub fn interval(&self) -> Duration {
        self.config.interval
    }

    /// One reconciliation pass. Returns the added and removed symbol sets.
    pub async fn reconcile(&mut self) -> (BTreeSet<String>, BTreeSet<String>) {
        let desired = match self.watchlists.active_symbols().await {
            Ok(symbols) => symbols,
            Err(err) => {
                warn!(%err, "watchlist lookup failed, skipping reconcile pass");
                return (BTreeSet::new(), BTreeSet::new());
            }
        };
        let current = self.session.subscribed_snapshot();

        let added: BTreeSet<String> = desired.difference(&current).cloned().collect();
        let removed: BTreeSet<String> = current.difference(&desired).cloned().collect();

        if !added.is_empty() {
            self.handle_added(&added).await;
        }
        if !removed.is_empty() {
            self.handle_removed(&removed);
        }
        self.stale_sweep().await;

        (added, removed)
    }

    async fn handle_added(&mut self, added: &BTreeSet<String>) {
        let symbols: Vec<String> = added.iter().cloned().collect();
        info!(?symbols, "subscribing to new watchlist symbols");
        if self
            .control_tx
            .send(ControlCommand::Subscribe(symbols.clone()))
            .is_err()
        {
            warn!("connection task gone, subscribe command dropped");
            return;
        }
        self.session.add_subscribed(symbols.clone());

        let infos = match self.catalog.resolve(&symbols).await {
            Ok(infos) => infos,
            Err(err) => {
                warn!(%err, "asset catalog lookup failed");
                return;
            }
        };
        for info in infos {
            self.cache.insert(&info);
            // A fresh addition never trusts leftover accumulator state:
            // the asset may have been dropped and re-added mid-bucket.
            self.send_reset(info.id);
            self.warn_if_stale(info.id, &info.symbol).await;
            self.request_backfill(info.id, "subscription-add").await;
        }
    }

    fn handle_removed(&mut self, removed: &BTreeSet<String>) {
        let symbols: Vec<String> = removed.iter().cloned().collect();
        info!(?symbols, "unsubscribing from removed watchlist symbols");
        if self
            .control_tx
            .send(ControlCommand::Unsubscribe(symbols.clone()))
            .is_err()
        {
            warn!("connection task gone, unsubscribe command dropped");
        }
        self.session.remove_subscribed(removed.iter());

        for symbol in removed {
            if let Some(asset_id) = self.cache.remove_symbol(symbol) {
                self.send_reset(asset_id);
                self.last_backfill_check.remove(&asset_id);
            }
        }
    }

    /// Check still-subscribed assets for data gaps, one store query per
    /// asset per cooldown window at most.
    async fn stale_sweep(&mut self) {
        let snapshot = self.cache.snapshot();
        for (symbol, asset_id) in snapshot {
            let due = match self.last_backfill_check.get(&asset_id) {
                Some(last) => last.elapsed() >= self.config.backfill_cooldown,
                None => true,
            };
            if !due {
                continue;
            }
            if self.warn_if_stale(asset_id, &symbol).await {
                self.send_reset(asset_id);
                self.request_backfill(asset_id, "stale-sweep").await;
            } else {
                self.last_backfill_check.insert(asset_id, Instant::now());
            }
        }
    }

    /// Log a warning when the latest durable 1-minute candle is missing or
    /// older than the staleness threshold. Returns whether it was.
    async fn warn_if_stale(&self, asset_id: AssetId, symbol: &str) -> bool {
        match self.store.latest(asset_id, Timeframe::M1).await {
            Ok(Some(candle)) => {
                let age = Utc::now() - candle.bucket_start;
                if age > self.config.stale_after {
                    warn!(
                        %asset_id,
                        symbol,
                        age_secs = age.num_seconds(),
                        "latest 1m candle is stale, historical fetch may be needed"
                    );
                    true
                } else {
                    false
                }
            }
            Ok(None) => {
                warn!(%asset_id, symbol, "no 1m candles stored yet");
                true
            }
            Err(err) => {
                warn!(%asset_id, symbol, %err, "latest-candle lookup failed");
                false
            }
        }
    }

    async fn request_backfill(&mut self, asset_id: AssetId, source: &str) {
        self.last_backfill_check.insert(asset_id, Instant::now());
        match self.coordinator.request_backfill(asset_id, source).await {
            Ok(true) => debug!(%asset_id, source, "backfill requested"),
            Ok(false) => debug!(%asset_id, source, "backfill request suppressed"),
            Err(err) => warn!(%asset_id, source, %err, "backfill request failed"),
        }
    }

    fn send_reset(&self, asset_id: AssetId) {
        if self
            .pipeline_tx
            .send(PipelineCommand::ResetAsset(asset_id))
            .is_err()
        {
            warn!(%asset_id, "drain task gone, reset command dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_store::{
        BackfillMarkers, BackfillRequest, ChannelDispatcher, MemoryCandleStore, MemoryKvStore,
        WriteMode,
    };
    use chrono::{Duration as ChronoDuration, TimeZone};
    use rust_decimal::Decimal;
    use types::asset::{AssetClass, AssetInfo};
    use types::candle::Candle;

    use crate::catalog::{StaticCatalog, StaticWatchlist};

    struct Fixture {
        manager: SubscriptionManager<ChannelDispatcher>,
        watchlist: Arc<StaticWatchlist>,
        cache: Arc<SymbolCache>,
        session: Arc<SessionState>,
        store: Arc<MemoryCandleStore>,
        control_rx: mpsc::UnboundedReceiver<ControlCommand>,
        pipeline_rx: mpsc::UnboundedReceiver<PipelineCommand>,
        backfill_rx: mpsc::UnboundedReceiver<BackfillRequest>,
    }

    fn fixture(symbols: &[&str]) -> Fixture {
        let watchlist = Arc::new(StaticWatchlist::new(
            symbols.iter().map(|s| s.to_string()),
        ));
        let catalog = Arc::new(StaticCatalog::new([
            AssetInfo::new(AssetId::new(1), "AAPL", AssetClass::UsEquity),
            AssetInfo::new(AssetId::new(2), "MSFT", AssetClass::UsEquity),
        ]));
        let store = Arc::new(MemoryCandleStore::new());
        let markers = BackfillMarkers::new(Arc::new(MemoryKvStore::new()));
        let (dispatcher, backfill_rx) = ChannelDispatcher::new();
        let coordinator = Arc::new(BackfillCoordinator::new(markers, dispatcher));
        let cache = Arc::new(SymbolCache::new());
        let session = Arc::new(SessionState::new());
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (pipeline_tx, pipeline_rx) = mpsc::unbounded_channel();

        let manager = SubscriptionManager::new(
            watchlist.clone(),
            catalog,
            store.clone(),
            coordinator,
            cache.clone(),
            session.clone(),
            control_tx,
            pipeline_tx,
            ReconcileConfig::default(),
        );
        Fixture {
            manager,
            watchlist,
            cache,
            session,
            store,
            control_rx,
            pipeline_rx,
            backfill_rx,
        }
    }

    fn fresh_minute(asset: i64) -> Candle {
        Candle {
            asset_id: AssetId::new(asset),
            timeframe: Timeframe::M1,
            bucket_start: Utc::now() - ChronoDuration::seconds(30),
            open: Some(Decimal::from(100)),
            high: Some(Decimal::from(100)),
            low: Some(Decimal::from(100)),
            close: Some(Decimal::from(100)),
            volume: Decimal::ONE,
            trade_count: None,
            vwap: None,
        }
    }

    #[tokio::test]
    async fn test_additions_subscribe_and_cache() {
        let mut fx = fixture(&["AAPL", "MSFT"]);
        let (added, removed) = fx.manager.reconcile().await;

        assert_eq!(added.len(), 2);
        assert!(removed.is_empty());
        assert_eq!(
            fx.control_rx.try_recv().unwrap(),
            ControlCommand::Subscribe(vec!["AAPL".to_string(), "MSFT".to_string()])
        );
        assert_eq!(fx.cache.resolve("AAPL"), Some(AssetId::new(1)));
        assert_eq!(fx.cache.resolve("MSFT"), Some(AssetId::new(2)));
        assert_eq!(fx.session.subscribed_snapshot().len(), 2);
        // Each addition resets accumulator state and requests a backfill.
        assert!(matches!(
            fx.pipeline_rx.try_recv().unwrap(),
            PipelineCommand::ResetAsset(_)
        ));
        assert!(fx.backfill_rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_second_pass_is_stable() {
        let mut fx = fixture(&["AAPL"]);
        fx.manager.reconcile().await;
        let (added, removed) = fx.manager.reconcile().await;
        assert!(added.is_empty());
        assert!(removed.is_empty());
    }

    #[tokio::test]
    async fn test_removal_unsubscribes_and_purges() {
        let mut fx = fixture(&["AAPL"]);
        fx.manager.reconcile().await;
        while fx.pipeline_rx.try_recv().is_ok() {}

        fx.watchlist.set_symbols([] as [String; 0]);
        let (added, removed) = fx.manager.reconcile().await;

        assert!(added.is_empty());
        assert_eq!(removed.len(), 1);
        // Skip the subscribe from pass one, then expect the unsubscribe.
        let mut saw_unsubscribe = false;
        while let Ok(cmd) = fx.control_rx.try_recv() {
            if cmd == ControlCommand::Unsubscribe(vec!["AAPL".to_string()]) {
                saw_unsubscribe = true;
            }
        }
        assert!(saw_unsubscribe);
        assert_eq!(fx.cache.resolve("AAPL"), None);
        assert!(fx.session.subscribed_snapshot().is_empty());
        assert_eq!(
            fx.pipeline_rx.try_recv().unwrap(),
            PipelineCommand::ResetAsset(AssetId::new(1))
        );
    }

    #[tokio::test]
    async fn test_duplicate_backfill_suppressed_by_queued_marker() {
        let mut fx = fixture(&["AAPL"]);
        fx.manager.reconcile().await;
        assert!(fx.backfill_rx.try_recv().is_ok());

        // Remove and immediately re-add: the queued marker from the first
        // request is still live, so no second job is dispatched.
        fx.watchlist.set_symbols([] as [String; 0]);
        fx.manager.reconcile().await;
        fx.watchlist.set_symbols(["AAPL".to_string()]);
        fx.manager.reconcile().await;

        assert!(fx.backfill_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_fresh_data_suppresses_stale_request() {
        let mut fx = fixture(&["AAPL"]);
        fx.store
            .upsert_minute(&[fresh_minute(1)], WriteMode::Delta)
            .await
            .unwrap();

        fx.manager.reconcile().await;
        // Addition still requests a backfill once...
        assert!(fx.backfill_rx.try_recv().is_ok());
        // ...but the sweep does not pile on while data is fresh.
        fx.manager.reconcile().await;
        assert!(fx.backfill_rx.try_recv().is_err());
    }
}
