//! Service configuration
//!
//! Aggregates the per-component tuning structs plus the connection
//! bootstrap inputs (endpoint selection and credentials). Credentials come
//! from the environment; the CLI only picks the endpoint and feed.

use crate::buffer::DrainConfig;
use crate::connection::ConnectionConfig;
use crate::gate::GateConfig;
use crate::rollup::RollupConfig;
use crate::subscriptions::ReconcileConfig;

/// Which vendor endpoint to connect to.
#[derive(Debug, Clone)]
pub struct EndpointConfig {
    /// Use the sandbox stream instead of production.
    pub sandbox: bool,
    /// Data feed segment of the stream path.
    pub feed: String,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            sandbox: false,
            feed: "iex".to_string(),
        }
    }
}

impl EndpointConfig {
    /// WebSocket URL for the chosen environment.
    pub fn url(&self) -> String {
        let domain = if self.sandbox {
            "stream.data.sandbox.alpaca.markets"
        } else {
            "stream.data.alpaca.markets"
        };
        format!("wss://{domain}/v2/{}", self.feed)
    }
}

/// Stream credentials, resolved from the environment at startup.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub key: String,
    pub secret: String,
}

/// Full service configuration.
#[derive(Debug, Clone, Default)]
pub struct StreamerConfig {
    pub endpoint: EndpointConfig,
    pub connection: ConnectionConfig,
    pub drain: DrainConfig,
    pub rollup: RollupConfig,
    pub gate: GateConfig,
    pub reconcile: ReconcileConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_url() {
        let prod = EndpointConfig::default();
        assert_eq!(prod.url(), "wss://stream.data.alpaca.markets/v2/iex");

        let sandbox = EndpointConfig {
            sandbox: true,
            feed: "sip".to_string(),
        };
        assert_eq!(
            sandbox.url(),
            "wss://stream.data.sandbox.alpaca.markets/v2/sip"
        );
    }
}
