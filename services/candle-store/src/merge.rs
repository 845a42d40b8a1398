//! Candle merge semantics
//!
//! One rule set governs every upsert, minute or aggregated:
//! - `open` is first-writer-wins (only a null open is ever filled in)
//! - `high`/`low` merge via max/min across old and new
//! - `close` is last-writer-wins
//! - `volume` adds in delta mode, replaces in snapshot mode
//! - `trade_count`/`vwap` keep the existing value unless it is null
//!
//! Delta mode serves live 1-minute writes, where successive batches each
//! contribute partial volume to the same still-forming minute. Snapshot mode
//! serves higher-timeframe buckets, where the in-memory accumulator already
//! holds the full running total and adding again would double-count.

use types::candle::Candle;

/// How an upsert combines volume with an existing row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Volume adds to the existing row.
    Delta,
    /// Volume replaces the existing row.
    Snapshot,
}

impl WriteMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            WriteMode::Delta => "delta",
            WriteMode::Snapshot => "snapshot",
        }
    }
}

/// Merge an incoming candle into an existing stored row in place.
///
/// Backends that push merging into the storage engine must match this
/// function exactly; the in-memory store calls it directly.
pub fn merge_candle(existing: &mut Candle, incoming: &Candle, mode: WriteMode) {
    if existing.open.is_none() {
        existing.open = incoming.open;
    }
    existing.high = match (existing.high, incoming.high) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, b) => a.or(b),
    };
    existing.low = match (existing.low, incoming.low) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    };
    if incoming.close.is_some() {
        existing.close = incoming.close;
    }
    existing.volume = match mode {
        WriteMode::Delta => existing.volume + incoming.volume,
        WriteMode::Snapshot => incoming.volume,
    };
    existing.trade_count = existing.trade_count.or(incoming.trade_count);
    existing.vwap = existing.vwap.or(incoming.vwap);
}
