use std::net::SocketAddr;

/// Errors that can occur in datagram transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Failed to bind to the specified address.
    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },

    /// Failed to join the multicast group.
    #[error("failed to join multicast group {group}: {source}")]
    Join {
        group: std::net::IpAddr,
        source: std::io::Error,
    },

    /// The configured group address is not a multicast address.
    #[error("{0} is not a multicast address")]
    NotMulticast(std::net::IpAddr),

    /// An I/O error occurred on the endpoint.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The datagram exceeds the endpoint's maximum size.
    #[error("datagram too large ({size} bytes, max {max})")]
    DatagramTooLarge { size: usize, max: usize },

    /// The transport has been shut down.
    #[error("transport shut down")]
    Shutdown,
}

impl TransportError {
    /// Returns true if this error means the endpoint has been closed.
    pub fn is_shutdown(&self) -> bool {
        matches!(self, TransportError::Shutdown)
    }
}

pub type Result<T> = std::result::Result<T, TransportError>;
