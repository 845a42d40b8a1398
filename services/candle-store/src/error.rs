//! Error taxonomy for the store and advisory-cache contracts

/// Errors raised by a candle store backend.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("store backend unavailable: {0}")]
    Unavailable(String),

    #[error("write rejected: {0}")]
    WriteRejected(String),
}

/// Errors raised by an advisory key-value backend.
///
/// These are expected to be transient; callers treat a failed lookup as
/// "cannot confirm" rather than propagating.
#[derive(Debug, Clone, thiserror::Error)]
pub enum KvError {
    #[error("kv backend unavailable: {0}")]
    Unavailable(String),
}
