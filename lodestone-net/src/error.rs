//! Error types for the lodestone-net crate.

use thiserror::Error;

/// Transport-layer errors. These never reach local store callers; peer
/// machinery maps them onto resync scheduling.
#[derive(Debug, Error)]
pub enum NetError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protobuf decode error: {0}")]
    Decode(#[from] prost::DecodeError),

    #[error("connect timed out: {0}")]
    ConnectTimeout(std::net::SocketAddr),

    #[error("request timed out")]
    ProcessTimeout,

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("connection closed")]
    Closed,
}

impl NetError {
    /// True when the failure is the peer being unreachable rather than a
    /// malformed exchange.
    pub fn is_unreachable(&self) -> bool {
        matches!(
            self,
            NetError::Io(_) | NetError::ConnectTimeout(_) | NetError::ProcessTimeout | NetError::Closed
        )
    }
}
