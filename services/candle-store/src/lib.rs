//! Candle persistence contract and advisory marker store
//!
//! This crate owns every interface the live streamer shares with the
//! historical backfill pipeline:
//! - The `CandleStore` upsert/read contract with its delta/snapshot merge
//!   semantics
//! - The read-through `CandleCache` invalidation contract and key schema
//! - The `KvStore` advisory key-value capability (TTL'd markers, set-if-absent)
//! - Backfill markers (queued/running/completed) and the idempotent
//!   `BackfillCoordinator`
//!
//! The in-memory backends exist for tests and local wiring; a relational
//! store satisfies the same traits in deployment.

pub mod cache;
pub mod coordinator;
pub mod error;
pub mod keys;
pub mod kv;
pub mod markers;
pub mod memory;
pub mod merge;
pub mod store;

pub use cache::{CacheTtlPolicy, CandleCache, KvCandleCache, NoopCache};
pub use coordinator::{BackfillCoordinator, BackfillDispatcher, BackfillRequest, ChannelDispatcher};
pub use error::{KvError, StoreError};
pub use kv::{KvStore, MemoryKvStore};
pub use markers::{BackfillMarkers, MarkerTtls};
pub use memory::MemoryCandleStore;
pub use merge::{merge_candle, WriteMode};
pub use store::CandleStore;
