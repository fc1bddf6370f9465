//! Error types for the autoscaler controller.

use thiserror::Error;

use poolscale_state::StateError;

/// Errors surfaced by controller operations.
#[derive(Debug, Error)]
pub enum ControlError {
    /// A manual request arrived while an apply was already in flight.
    /// The request is rejected, never queued.
    #[error("another limit apply is already in progress")]
    ConcurrentApplyConflict,

    #[error("limit apply failed: {0}")]
    LimitApplyFailed(String),

    #[error(transparent)]
    State(#[from] StateError),
}
