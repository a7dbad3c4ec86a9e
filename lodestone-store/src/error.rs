//! Error types for store operations.

use lodestone_types::FilterError;
use thiserror::Error;

/// Errors surfaced to store callers.
///
/// Peer and transport failures never appear here; they are recovered
/// inside the peer machinery (logged, peer scheduled for resync).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("unknown area: {0}")]
    UnknownArea(String),

    #[error("subscription cancelled: subscriber lagged")]
    Lagged,

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<FilterError> for StoreError {
    fn from(e: FilterError) -> Self {
        StoreError::InvalidArgument(e.to_string())
    }
}
