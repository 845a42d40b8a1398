//! Advisory key-value capability
//!
//! The backfill markers and the read cache both sit on a small key-value
//! contract: TTL'd puts, atomic set-if-absent, delete. The markers are
//! advisory by construction — a TTL expiry silently releases them — so
//! every consumer must tolerate a stale or missing answer.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;

use crate::error::KvError;

/// Minimal key-value capability the core logic depends on.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Fetch a value; `None` when absent or expired.
    async fn get(&self, key: &str) -> Result<Option<String>, KvError>;

    /// Store a value with a TTL, overwriting any existing entry.
    async fn put_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<(), KvError>;

    /// Atomically store a value with a TTL only if the key is absent.
    ///
    /// Returns `true` when this call created the entry. This is the
    /// acquisition primitive behind the advisory locks.
    async fn add_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, KvError>;

    /// Remove a key if present.
    async fn delete(&self, key: &str) -> Result<(), KvError>;
}

/// In-memory `KvStore` with per-entry expiry.
///
/// Expired entries are dropped lazily on access, which is enough for tests
/// and single-process wiring.
#[derive(Debug, Default)]
pub struct MemoryKvStore {
    entries: DashMap<String, (String, Instant)>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn live(&self, key: &str) -> Option<String> {
        let expired = match self.entries.get(key) {
            Some(entry) => {
                let (value, deadline) = entry.value();
                if *deadline > Instant::now() {
                    return Some(value.clone());
                }
                true
            }
            None => false,
        };
        if expired {
            self.entries.remove(key);
        }
        None
    }
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        Ok(self.live(key))
    }

    async fn put_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<(), KvError> {
        self.entries
            .insert(key.to_string(), (value.to_string(), Instant::now() + ttl));
        Ok(())
    }

    async fn add_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, KvError> {
        if self.live(key).is_some() {
            return Ok(false);
        }
        self.entries
            .insert(key.to_string(), (value.to_string(), Instant::now() + ttl));
        Ok(true)
    }

    async fn delete(&self, key: &str) -> Result<(), KvError> {
        self.entries.remove(key);
        Ok(())
    }
}
