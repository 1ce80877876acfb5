//! Protocol error types.

use thiserror::Error;

/// Errors that can occur while encoding or decoding records.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("frame too large: {size} bytes buffered (max {max})")]
    FrameTooLarge { size: usize, max: usize },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid UTF-8 in payload")]
    InvalidUtf8,

    #[error("truncated frame: {0} bytes left when the stream closed")]
    Truncated(usize),
}

impl ProtocolError {
    /// Returns whether the error was caused by the peer sending bytes that
    /// can never decode, as opposed to a transport failure.
    pub fn is_malformed(&self) -> bool {
        matches!(
            self,
            ProtocolError::Json(_) | ProtocolError::InvalidUtf8 | ProtocolError::FrameTooLarge { .. }
        )
    }
}
