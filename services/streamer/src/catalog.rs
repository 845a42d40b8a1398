//! Asset catalog access and the shared symbol caches
//!
//! The external catalog resolves vendor symbols to asset ids and classes;
//! watchlists define the desired subscription set. Both are consumed
//! read-only. The resolved mappings live in [`SymbolCache`], written by the
//! subscription task and read by the drain task, so the cache is the one
//! piece of shared mutable state between them.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use candle_store::StoreError;
use dashmap::DashMap;
use types::asset::{AssetClass, AssetInfo};
use types::ids::AssetId;

/// External asset catalog lookup.
#[async_trait]
pub trait AssetCatalog: Send + Sync {
    /// Resolve vendor symbols to catalog entries. Unknown symbols are
    /// silently absent from the result.
    async fn resolve(&self, symbols: &[String]) -> Result<Vec<AssetInfo>, StoreError>;
}

/// Union of all active watchlists.
#[async_trait]
pub trait WatchlistProvider: Send + Sync {
    async fn active_symbols(&self) -> Result<HashSet<String>, StoreError>;
}

/// Shared symbol→asset-id and asset-id→class cache.
///
/// Reads take a cheap snapshot so the drain task never holds a lock while
/// folding a batch.
#[derive(Debug, Default)]
pub struct SymbolCache {
    by_symbol: DashMap<String, AssetId>,
    class_by_id: DashMap<AssetId, AssetClass>,
}

impl SymbolCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge a resolved catalog entry.
    pub fn insert(&self, info: &AssetInfo) {
        self.by_symbol.insert(info.symbol.clone(), info.id);
        self.class_by_id.insert(info.id, info.class);
    }

    /// Remove a symbol and its class entry. Returns the asset id if the
    /// symbol was cached.
    pub fn remove_symbol(&self, symbol: &str) -> Option<AssetId> {
        let (_, asset_id) = self.by_symbol.remove(symbol)?;
        self.class_by_id.remove(&asset_id);
        Some(asset_id)
    }

    pub fn resolve(&self, symbol: &str) -> Option<AssetId> {
        self.by_symbol.get(symbol).map(|e| *e.value())
    }

    pub fn class_of(&self, asset_id: AssetId) -> Option<AssetClass> {
        self.class_by_id.get(&asset_id).map(|e| *e.value())
    }

    /// Copy of the symbol→id mapping for one batch's processing.
    pub fn snapshot(&self) -> HashMap<String, AssetId> {
        self.by_symbol
            .iter()
            .map(|e| (e.key().clone(), *e.value()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.by_symbol.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_symbol.is_empty()
    }
}

/// Fixed in-memory catalog for tests and local wiring.
#[derive(Debug, Default)]
pub struct StaticCatalog {
    assets: HashMap<String, AssetInfo>,
}

impl StaticCatalog {
    pub fn new(assets: impl IntoIterator<Item = AssetInfo>) -> Self {
        Self {
            assets: assets
                .into_iter()
                .map(|a| (a.symbol.clone(), a))
                .collect(),
        }
    }
}

#[async_trait]
impl AssetCatalog for StaticCatalog {
    async fn resolve(&self, symbols: &[String]) -> Result<Vec<AssetInfo>, StoreError> {
        Ok(symbols
            .iter()
            .filter_map(|s| self.assets.get(s).cloned())
            .collect())
    }
}

/// Fixed in-memory watchlist for tests and local wiring.
#[derive(Debug, Default)]
pub struct StaticWatchlist {
    symbols: std::sync::Mutex<HashSet<String>>,
}

impl StaticWatchlist {
    pub fn new(symbols: impl IntoIterator<Item = String>) -> Self {
        Self {
            symbols: std::sync::Mutex::new(symbols.into_iter().collect()),
        }
    }

    /// Replace the active set (simulates watchlist edits in tests).
    pub fn set_symbols(&self, symbols: impl IntoIterator<Item = String>) {
        let mut guard = self.symbols.lock().unwrap_or_else(|e| e.into_inner());
        *guard = symbols.into_iter().collect();
    }
}

#[async_trait]
impl WatchlistProvider for StaticWatchlist {
    async fn active_symbols(&self) -> Result<HashSet<String>, StoreError> {
        Ok(self
            .symbols
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone())
    }
}
