//! Vendor wire protocol
//!
//! Outbound control messages and inbound events, decoded once at this
//! boundary into a closed enum. Inbound frames arrive as a JSON array of
//! objects tagged by `"T"`; anything unrecognized becomes
//! [`InboundEvent::Unknown`] and is dropped by the caller at debug level.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Outbound control messages sent over the socket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum OutboundMessage {
    Auth {
        key: String,
        secret: String,
    },
    Subscribe {
        trades: Vec<String>,
    },
    Unsubscribe {
        trades: Vec<String>,
    },
}

impl OutboundMessage {
    /// Serialize for the wire. Infallible for these shapes.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// A trade event as carried on the wire.
///
/// Only the fields this service consumes are modeled; the vendor sends
/// more and serde ignores them.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct WireTrade {
    /// Vendor symbol
    #[serde(rename = "S")]
    pub symbol: String,
    /// Trade price
    #[serde(rename = "p")]
    pub price: Decimal,
    /// Trade size; some venues omit it for odd lots
    #[serde(rename = "s", default)]
    pub size: Decimal,
    /// Trade timestamp (RFC 3339)
    #[serde(rename = "t")]
    pub trade_time: DateTime<Utc>,
}

/// Raw inbound frame, tagged by the `"T"` discriminator.
#[derive(Debug, Deserialize)]
#[serde(tag = "T")]
enum Frame {
    #[serde(rename = "success")]
    Success {
        #[serde(default)]
        msg: String,
    },
    #[serde(rename = "error")]
    Error {
        #[serde(default)]
        code: Option<i64>,
        #[serde(default)]
        msg: String,
    },
    #[serde(rename = "subscription")]
    Subscription {
        #[serde(default)]
        trades: Vec<String>,
    },
    #[serde(rename = "t")]
    Trade(WireTrade),
    #[serde(other)]
    Unknown,
}

/// Decoded inbound events consumed by the connection task.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    /// Transport-level hello before authentication.
    Connected,
    /// Authentication acknowledged; subscriptions may be sent.
    AuthOk,
    /// Authentication rejected; fatal to this session.
    AuthError(String),
    /// Current subscription set as acknowledged by the vendor.
    SubscriptionAck { trades: Vec<String> },
    /// Non-fatal vendor error.
    Error { code: Option<i64>, msg: String },
    /// A trade tick.
    Trade(WireTrade),
    /// Unrecognized frame kind; dropped.
    Unknown,
}

/// Decode one text frame into its events.
///
/// The vendor batches events into a JSON array; a bare object is accepted
/// too and treated as a one-element batch.
pub fn decode_frame(raw: &str) -> Result<Vec<InboundEvent>, serde_json::Error> {
    let frames: Vec<Frame> = if raw.trim_start().starts_with('[') {
        serde_json::from_str(raw)?
    } else {
        vec![serde_json::from_str(raw)?]
    };
    Ok(frames.into_iter().map(InboundEvent::from).collect())
}

impl From<Frame> for InboundEvent {
    fn from(frame: Frame) -> Self {
        match frame {
            Frame::Success { msg } => {
                if msg.to_lowercase().contains("authenticated") {
                    InboundEvent::AuthOk
                } else {
                    InboundEvent::Connected
                }
            }
            Frame::Error { code, msg } => {
                if msg.to_lowercase().contains("auth") {
                    InboundEvent::AuthError(msg)
                } else {
                    InboundEvent::Error { code, msg }
                }
            }
            Frame::Subscription { trades } => InboundEvent::SubscriptionAck { trades },
            Frame::Trade(trade) => InboundEvent::Trade(trade),
            Frame::Unknown => InboundEvent::Unknown,
        }
    }
}
