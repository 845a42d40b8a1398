//! Live candle streaming service
//!
//! Consumes the vendor trade stream and maintains OHLCV candles across
//! every configured timeframe, reconciling with the historical backfill
//! pipeline that populates the same store:
//! - Session management (auth, heartbeat, reconnect, watchdog)
//! - Watchlist-driven subscription reconciliation
//! - Tick batching and minute aggregation with a trading-hours filter
//! - Higher-timeframe rollup with an open/closed flush policy
//! - Backfill-aware write arbitration for aggregated candles
//!
//! # Architecture
//!
//! ```text
//! Vendor WebSocket
//!        │
//!   ┌────▼─────┐     ┌──────────────┐
//!   │Connection│◄────│Subscriptions │◄── watchlists
//!   └────┬─────┘     └──────┬───────┘
//!        │ ticks            │ resets
//!   ┌────▼─────┐            │
//!   │TickBuffer│            │
//!   └────┬─────┘            │
//!   ┌────▼─────────────┐    │
//!   │Drain → Aggregate │◄───┘
//!   └────┬─────────────┘
//!        │ minute bars (delta upsert, ungated)
//!   ┌────▼─────┐   ┌────────────┐
//!   │ Rollup   ├──►│BackfillGate│
//!   └────┬─────┘   └────────────┘
//!        │ open/closed snapshots (gated)
//!   ┌────▼──────┐
//!   │CandleStore│
//!   └───────────┘
//! ```

pub mod aggregator;
pub mod buffer;
pub mod catalog;
pub mod config;
pub mod connection;
pub mod counters;
pub mod error;
pub mod gate;
pub mod hours;
pub mod protocol;
pub mod rollup;
pub mod runtime;
pub mod subscriptions;

// Library version
pub const SERVICE_VERSION: &str = "0.1.0";
