//! Error types for the broker wire protocol

use thiserror::Error;

/// Wire-level error types
#[derive(Debug, Error)]
pub enum WireError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("connection closed")]
    ConnectionClosed,

    #[error("frame too large: {size} bytes exceeds maximum {max}")]
    FrameTooLarge { size: usize, max: usize },

    #[error("buffer underflow: need {needed} bytes, have {have}")]
    BufferUnderflow { needed: usize, have: usize },

    #[error("invalid value tag: 0x{0:02x}")]
    InvalidTag(u8),

    #[error("invalid response kind: 0x{0:02x}")]
    InvalidResponseKind(u8),

    #[error("invalid UTF-8 in string field")]
    InvalidUtf8,

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("malformed message: {0}")]
    Malformed(String),

    #[error("{0} trailing bytes after message")]
    TrailingBytes(usize),

    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),
}

impl WireError {
    /// True when the error came from decoding a frame rather than the stream itself.
    ///
    /// A decode failure leaves the connection usable; the peer can be told
    /// about it and the next frame read normally.
    pub fn is_decode_error(&self) -> bool {
        matches!(
            self,
            WireError::BufferUnderflow { .. }
                | WireError::InvalidTag(_)
                | WireError::InvalidResponseKind(_)
                | WireError::InvalidUtf8
                | WireError::InvalidAddress(_)
                | WireError::Malformed(_)
                | WireError::TrailingBytes(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, WireError>;
