//! Asset classes and catalog entries
//!
//! The external asset catalog resolves a vendor symbol to an asset id plus an
//! asset class. The class decides whether the regular-trading-hours filter
//! applies: exchange-session instruments only produce official candles inside
//! the session window, while crypto trades around the clock.

use serde::{Deserialize, Serialize};

use crate::ids::AssetId;

/// Asset class as reported by the vendor catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetClass {
    /// U.S. listed equity
    UsEquity,
    /// U.S. listed option
    UsOption,
    /// Cryptocurrency pair
    Crypto,
}

impl AssetClass {
    /// Whether candles for this class are bound to an exchange session.
    ///
    /// Session-bound classes get the regular-trading-hours filter; always-on
    /// classes aggregate every tick.
    pub fn session_bound(&self) -> bool {
        match self {
            AssetClass::UsEquity | AssetClass::UsOption => true,
            AssetClass::Crypto => false,
        }
    }

    /// Label used in logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetClass::UsEquity => "us_equity",
            AssetClass::UsOption => "us_option",
            AssetClass::Crypto => "crypto",
        }
    }
}

/// A resolved catalog entry: vendor symbol plus id and class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetInfo {
    pub id: AssetId,
    pub symbol: String,
    pub class: AssetClass,
}

impl AssetInfo {
    pub fn new(id: AssetId, symbol: impl Into<String>, class: AssetClass) -> Self {
        Self {
            id,
            symbol: symbol.into(),
            class,
        }
    }
}
