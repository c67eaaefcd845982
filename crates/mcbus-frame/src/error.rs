/// Errors that can occur during frame encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The header alone does not fit in one datagram, so it cannot be chunked.
    #[error("frame header too large ({header_len} bytes, max datagram {max})")]
    FrameTooLarge { header_len: usize, max: usize },

    /// The message would need more chunks than the configured limit.
    #[error("message needs {chunks} chunks, limit is {max}")]
    MessageTooLarge { chunks: usize, max: usize },

    /// A value cannot be represented in the wire encoding.
    #[error("cannot serialize frame: {0}")]
    Serialization(String),

    /// A received datagram is not a valid frame.
    #[error("malformed frame: {0}")]
    Malformed(String),

    /// The underlying transport failed.
    #[error("frame transport error: {0}")]
    Transport(#[from] mcbus_transport::TransportError),
}

impl FrameError {
    /// Returns true if the underlying transport has been closed.
    pub fn is_shutdown(&self) -> bool {
        matches!(self, FrameError::Transport(err) if err.is_shutdown())
    }
}

pub type Result<T> = std::result::Result<T, FrameError>;
