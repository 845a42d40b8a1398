//! Ephemeral trade ticks
//!
//! A tick lives from the protocol decoder to the minute aggregator and is
//! never stored; durable tick archival is a separate concern.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::ids::AssetId;

/// A single resolved trade tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tick {
    pub asset_id: AssetId,
    pub price: Decimal,
    pub size: Decimal,
    pub trade_time: DateTime<Utc>,
}

impl Tick {
    pub fn new(
        asset_id: AssetId,
        price: Decimal,
        size: Decimal,
        trade_time: DateTime<Utc>,
    ) -> Self {
        Self {
            asset_id,
            price,
            size,
            trade_time,
        }
    }
}
