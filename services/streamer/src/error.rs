//! Error taxonomy for the streaming service
//!
//! Everything here is recoverable at the connection loop: transport and
//! handshake failures tear down the current session and hand control back
//! to the reconnect loop.

/// Errors that end the current connection session.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("transport error: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("authentication rejected: {0}")]
    AuthRejected(String),

    #[error("authentication not acknowledged within {0:?}")]
    AuthTimeout(std::time::Duration),

    #[error("no traffic within {0:?}, connection presumed dead")]
    Stale(std::time::Duration),

    #[error("stream closed by remote")]
    Closed,
}
