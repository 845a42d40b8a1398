//! Unique identifier types for service entities
//!
//! Asset identifiers come from the external asset catalog and are plain
//! integers there; the newtype keeps them from being confused with other
//! numeric fields. Backfill job identifiers use UUID v7 for time-sortable
//! ordering in logs and queues.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for an asset in the external catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AssetId(i64);

impl AssetId {
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Get the raw catalog identifier.
    pub const fn as_i64(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a dispatched backfill job.
///
/// Uses UUID v7 so job ids sort chronologically in queues and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BackfillJobId(Uuid);

impl BackfillJobId {
    /// Create a new BackfillJobId with current timestamp.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Create from existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get inner UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for BackfillJobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for BackfillJobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_asset_id_roundtrip() {
        let id = AssetId::new(42);
        assert_eq!(id.as_i64(), 42);

        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "42");
        let back: AssetId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn test_backfill_job_ids_unique() {
        let a = BackfillJobId::new();
        let b = BackfillJobId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn test_asset_id_display() {
        assert_eq!(AssetId::new(7).to_string(), "7");
    }
}
