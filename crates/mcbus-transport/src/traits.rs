use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use crate::error::Result;

/// A bus endpoint: sends datagrams to, and receives datagrams from, a shared
/// broadcast medium.
///
/// Implementations are shared between one receiving thread and any number of
/// sending threads, so every method takes `&self`.
pub trait DatagramTransport: Send + Sync {
    /// Send one datagram to every participant on the medium.
    ///
    /// Returns `Err(TransportError::Shutdown)` after [`close`](Self::close).
    fn send(&self, datagram: &[u8]) -> Result<()>;

    /// Wait up to `timeout` for the next datagram.
    ///
    /// Returns `Ok(None)` when the wait expires. A concurrent [`close`](Self::close)
    /// interrupts the wait immediately with `Err(TransportError::Shutdown)`.
    fn recv_timeout(&self, timeout: Duration) -> Result<Option<Bytes>>;

    /// Close the endpoint and wake any blocked receive wait. Idempotent.
    fn close(&self);

    /// Whether [`close`](Self::close) has been called.
    fn is_closed(&self) -> bool;

    /// Largest datagram this endpoint sends or receives.
    fn max_datagram_size(&self) -> usize;
}

impl<T: DatagramTransport + ?Sized> DatagramTransport for Arc<T> {
    fn send(&self, datagram: &[u8]) -> Result<()> {
        (**self).send(datagram)
    }

    fn recv_timeout(&self, timeout: Duration) -> Result<Option<Bytes>> {
        (**self).recv_timeout(timeout)
    }

    fn close(&self) {
        (**self).close()
    }

    fn is_closed(&self) -> bool {
        (**self).is_closed()
    }

    fn max_datagram_size(&self) -> usize {
        (**self).max_datagram_size()
    }
}
