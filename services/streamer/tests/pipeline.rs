//! End-to-end pipeline tests: drained batches through aggregation,
//! persistence, rollup, and the backfill gate, against the in-memory
//! backends.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use tokio::sync::mpsc;

use candle_store::{
    BackfillMarkers, CandleStore, MemoryCandleStore, MemoryKvStore,
};
use streamer::aggregator::MinuteAggregator;
use streamer::catalog::SymbolCache;
use streamer::counters::Counters;
use streamer::gate::{BackfillGate, GateConfig};
use streamer::protocol::WireTrade;
use streamer::rollup::{RollupAccumulator, RollupConfig};
use streamer::runtime::Pipeline;
use streamer::subscriptions::PipelineCommand;
use types::asset::{AssetClass, AssetInfo};
use types::ids::AssetId;
use types::timeframe::Timeframe;

const AAPL: AssetId = AssetId::new(1);

struct Harness {
    pipeline: Pipeline,
    store: Arc<MemoryCandleStore>,
    markers: BackfillMarkers,
    commands: mpsc::UnboundedSender<PipelineCommand>,
}

fn harness() -> Harness {
    let store = Arc::new(MemoryCandleStore::new());
    let kv = Arc::new(MemoryKvStore::new());
    let markers = BackfillMarkers::new(kv);
    let counters = Arc::new(Counters::new());

    let cache = Arc::new(SymbolCache::new());
    cache.insert(&AssetInfo::new(AAPL, "AAPL", AssetClass::UsEquity));

    let (commands, commands_rx) = mpsc::unbounded_channel();
    let pipeline = Pipeline::new(
        MinuteAggregator::new(cache, counters.clone()),
        // No throttle so every batch may snapshot its open buckets.
        RollupAccumulator::new(RollupConfig {
            open_flush_interval: Duration::ZERO,
        }),
        BackfillGate::new(markers.clone(), store.clone(), GateConfig::default()),
        store.clone(),
        counters,
        commands_rx,
    );
    Harness {
        pipeline,
        store,
        markers,
        commands,
    }
}

fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
    // A Monday, inside the New York session for the times used here.
    Utc.with_ymd_and_hms(2024, 1, 15, h, m, s).unwrap()
}

fn tick(price: &str, size: i64, time: DateTime<Utc>) -> WireTrade {
    WireTrade {
        symbol: "AAPL".to_string(),
        price: price.parse().unwrap(),
        size: Decimal::from(size),
        trade_time: time,
    }
}

/// Three ticks inside one minute produce the expected 1m candle.
#[tokio::test]
async fn minute_candle_from_live_ticks() {
    let mut h = harness();
    h.pipeline
        .process_batch(&[
            tick("150.0", 10, at(14, 30, 5)),
            tick("151.0", 5, at(14, 30, 40)),
            tick("149.5", 20, at(14, 30, 55)),
        ])
        .await;

    let row = h.store.get(AAPL, Timeframe::M1, at(14, 30, 0)).unwrap();
    assert_eq!(row.open, Some(Decimal::from(150)));
    assert_eq!(row.high, Some(Decimal::from(151)));
    assert_eq!(row.low, Some("149.5".parse().unwrap()));
    assert_eq!(row.close, Some("149.5".parse().unwrap()));
    assert_eq!(row.volume, Decimal::from(35));
}

/// Two batches contributing to the same minute merge in delta mode.
#[tokio::test]
async fn minute_delta_merge_across_batches() {
    let mut h = harness();
    h.pipeline
        .process_batch(&[tick("150.0", 10, at(14, 30, 5))])
        .await;
    h.pipeline
        .process_batch(&[tick("152.0", 5, at(14, 30, 30))])
        .await;

    let row = h.store.get(AAPL, Timeframe::M1, at(14, 30, 0)).unwrap();
    assert_eq!(row.open, Some(Decimal::from(150)));
    assert_eq!(row.high, Some(Decimal::from(152)));
    assert_eq!(row.close, Some(Decimal::from(152)));
    assert_eq!(row.volume, Decimal::from(15));
}

/// A 5m bucket closes exactly when its end minute is observed and the
/// final snapshot lands once the asset's backfill is complete.
#[tokio::test]
async fn closed_bucket_flushed_when_backfill_complete() {
    let mut h = harness();
    h.markers.mark_completed(AAPL).await.unwrap();

    h.pipeline
        .process_batch(&[
            tick("150.0", 10, at(14, 30, 5)),
            tick("151.0", 5, at(14, 30, 40)),
            tick("149.5", 20, at(14, 30, 55)),
        ])
        .await;
    // Bucket 14:30 is still open: 14:30 + 5m > 14:30.
    let open_row = h.store.get(AAPL, Timeframe::M5, at(14, 30, 0)).unwrap();
    assert_eq!(open_row.volume, Decimal::from(35));

    // The 14:35 minute closes it.
    h.pipeline
        .process_batch(&[tick("152.0", 1, at(14, 35, 10))])
        .await;

    let closed = h.store.get(AAPL, Timeframe::M5, at(14, 30, 0)).unwrap();
    assert_eq!(closed.open, Some(Decimal::from(150)));
    assert_eq!(closed.high, Some(Decimal::from(151)));
    assert_eq!(closed.low, Some("149.5".parse().unwrap()));
    assert_eq!(closed.close, Some("149.5".parse().unwrap()));
    assert_eq!(closed.volume, Decimal::from(35));

    // The 14:35 tick opened the next bucket.
    let next = h.store.get(AAPL, Timeframe::M5, at(14, 35, 0)).unwrap();
    assert_eq!(next.volume, Decimal::ONE);
}

/// After closure, a late tick updates the minute row but can never touch
/// the evicted higher-timeframe bucket again.
#[tokio::test]
async fn late_tick_cannot_reopen_closed_bucket() {
    let mut h = harness();
    h.markers.mark_completed(AAPL).await.unwrap();

    h.pipeline
        .process_batch(&[tick("150.0", 35, at(14, 30, 5))])
        .await;
    h.pipeline
        .process_batch(&[tick("152.0", 1, at(14, 35, 10))])
        .await;
    assert_eq!(
        h.store
            .get(AAPL, Timeframe::M5, at(14, 30, 0))
            .unwrap()
            .volume,
        Decimal::from(35)
    );

    // Straggler for minute 14:31, inside the closed 5m bucket.
    h.pipeline
        .process_batch(&[tick("999.0", 99, at(14, 31, 0))])
        .await;

    // Its minute row is written (1m is authoritative live data)...
    let minute = h.store.get(AAPL, Timeframe::M1, at(14, 31, 0)).unwrap();
    assert_eq!(minute.volume, Decimal::from(99));
    // ...but the closed 5m snapshot is untouched.
    let closed = h.store.get(AAPL, Timeframe::M5, at(14, 30, 0)).unwrap();
    assert_eq!(closed.volume, Decimal::from(35));
    assert_eq!(closed.high, Some(Decimal::from(150)));
}

/// Without completion markers or established history the gate denies all
/// higher-timeframe writes; closed buckets are evicted unwritten while
/// minute rows flow unaffected.
#[tokio::test]
async fn ungated_asset_writes_minutes_only() {
    let mut h = harness();
    h.pipeline
        .process_batch(&[tick("150.0", 10, at(14, 30, 5))])
        .await;
    h.pipeline
        .process_batch(&[tick("152.0", 1, at(14, 35, 10))])
        .await;

    assert!(h.store.get(AAPL, Timeframe::M1, at(14, 30, 0)).is_some());
    assert!(h.store.get(AAPL, Timeframe::M1, at(14, 35, 0)).is_some());
    for tf in Timeframe::aggregated() {
        assert!(
            h.store.latest(AAPL, *tf).await.unwrap().is_none(),
            "unexpected {tf} row"
        );
    }
}

/// A running backfill suspends higher-timeframe writes until it releases.
#[tokio::test]
async fn running_backfill_suspends_aggregated_writes() {
    let mut h = harness();
    h.markers.mark_completed(AAPL).await.unwrap();
    h.markers.try_acquire_running(AAPL).await.unwrap();

    h.pipeline
        .process_batch(&[tick("150.0", 10, at(14, 30, 5))])
        .await;
    assert!(h.store.get(AAPL, Timeframe::M1, at(14, 30, 0)).is_some());
    assert!(h.store.get(AAPL, Timeframe::M5, at(14, 30, 0)).is_none());

    h.markers.release(AAPL).await.unwrap();
    h.pipeline
        .process_batch(&[tick("151.0", 5, at(14, 31, 10))])
        .await;
    let open_row = h.store.get(AAPL, Timeframe::M5, at(14, 30, 0)).unwrap();
    // Only the post-release accumulator state is visible; the denied
    // minute's volume reappears because the accumulator still held it.
    assert_eq!(open_row.volume, Decimal::from(15));
}

/// Resetting an asset between batches discards its accumulator state, so
/// a re-subscribed asset starts clean.
#[tokio::test]
async fn reset_between_batches_clears_accumulators() {
    let mut h = harness();
    h.markers.mark_completed(AAPL).await.unwrap();

    h.pipeline
        .process_batch(&[tick("150.0", 35, at(14, 30, 5))])
        .await;
    assert_eq!(
        h.store
            .get(AAPL, Timeframe::M5, at(14, 30, 0))
            .unwrap()
            .volume,
        Decimal::from(35)
    );

    h.commands.send(PipelineCommand::ResetAsset(AAPL)).unwrap();
    h.pipeline
        .process_batch(&[tick("151.0", 5, at(14, 31, 10))])
        .await;

    // Snapshot mode replaced the stored volume with the fresh
    // accumulator's 5 — the pre-reset 35 is gone.
    let row = h.store.get(AAPL, Timeframe::M5, at(14, 30, 0)).unwrap();
    assert_eq!(row.volume, Decimal::from(5));
    // First-writer-wins open is retained from the original write.
    assert_eq!(row.open, Some(Decimal::from(150)));
}
