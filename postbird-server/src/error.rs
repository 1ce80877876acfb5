//! Server error types.

use thiserror::Error;

/// Server errors.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] postbird_protocol::ProtocolError),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("accept failed: {0}")]
    Accept(#[source] std::io::Error),

    #[error("peer {0} is closed")]
    PeerClosed(String),
}

impl ServerError {
    /// Returns whether the error came from an undecodable or truncated
    /// stream, which ends only the connection that produced it.
    pub fn is_decode_failure(&self) -> bool {
        matches!(self, ServerError::Protocol(_))
    }

    /// Returns whether the error stops the whole listener.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ServerError::Bind { .. } | ServerError::Accept(_))
    }
}
