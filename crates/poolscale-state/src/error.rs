//! Error types for the poolscale history store.

use thiserror::Error;

/// Result type alias for history store operations.
pub type StateResult<T> = Result<T, StateError>;

/// Errors that can occur during history store operations.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("failed to open database: {0}")]
    Open(String),

    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("table error: {0}")]
    Table(String),

    #[error("read error: {0}")]
    Read(String),

    #[error("write error: {0}")]
    Write(String),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("deserialization error: {0}")]
    Deserialize(String),

    /// A stored policy config exists but could not be decoded.
    ///
    /// Distinct from an absent config so that callers can fall back to
    /// hard-coded defaults with a warning instead of treating first run
    /// and corruption the same way.
    #[error("stored policy config is corrupt: {0}")]
    ConfigCorrupt(String),
}
