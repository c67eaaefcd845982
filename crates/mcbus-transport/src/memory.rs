use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::Mutex;
use tracing::debug;

use crate::error::{Result, TransportError};
use crate::multicast::DEFAULT_MAX_DATAGRAM;
use crate::traits::DatagramTransport;

/// An in-process broadcast medium.
///
/// Every datagram sent by any attached endpoint is delivered to every attached
/// endpoint, the sender included, the same way a multicast group with loopback
/// enabled behaves. Cloning the hub yields another handle to the same medium.
#[derive(Clone)]
pub struct MemoryHub {
    shared: Arc<HubShared>,
}

struct HubShared {
    members: Mutex<Vec<Member>>,
    next_id: AtomicU64,
    max_datagram_size: usize,
}

struct Member {
    id: u64,
    tx: Sender<Bytes>,
}

impl MemoryHub {
    /// Create a hub with the default maximum datagram size.
    pub fn new() -> Self {
        Self::with_max_datagram_size(DEFAULT_MAX_DATAGRAM)
    }

    /// Create a hub with an explicit maximum datagram size.
    pub fn with_max_datagram_size(max_datagram_size: usize) -> Self {
        Self {
            shared: Arc::new(HubShared {
                members: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(1),
                max_datagram_size,
            }),
        }
    }

    /// Attach a new endpoint to the medium.
    pub fn endpoint(&self) -> MemoryEndpoint {
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = channel::unbounded();
        self.shared.members.lock().push(Member { id, tx });
        let (cancel_tx, cancel_rx) = channel::bounded(1);

        MemoryEndpoint {
            id,
            hub: self.clone(),
            rx,
            cancel_tx,
            cancel_rx,
            closed: AtomicBool::new(false),
        }
    }

    /// Number of endpoints currently attached.
    pub fn endpoint_count(&self) -> usize {
        self.shared.members.lock().len()
    }

    fn detach(&self, id: u64) {
        self.shared.members.lock().retain(|member| member.id != id);
    }

    fn broadcast(&self, datagram: &[u8]) {
        let targets: Vec<Sender<Bytes>> = self
            .shared
            .members
            .lock()
            .iter()
            .map(|member| member.tx.clone())
            .collect();

        let datagram = Bytes::copy_from_slice(datagram);
        for tx in targets {
            // A member detached between snapshot and send simply misses the datagram.
            let _ = tx.send(datagram.clone());
        }
    }
}

impl Default for MemoryHub {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryHub")
            .field("endpoints", &self.endpoint_count())
            .field("max_datagram_size", &self.shared.max_datagram_size)
            .finish()
    }
}

/// One participant on a [`MemoryHub`].
///
/// The receive wait selects over the datagram channel and a dedicated
/// cancellation channel, so [`close`](DatagramTransport::close) wakes it at once.
pub struct MemoryEndpoint {
    id: u64,
    hub: MemoryHub,
    rx: Receiver<Bytes>,
    cancel_tx: Sender<()>,
    cancel_rx: Receiver<()>,
    closed: AtomicBool,
}

impl DatagramTransport for MemoryEndpoint {
    fn send(&self, datagram: &[u8]) -> Result<()> {
        if self.is_closed() {
            return Err(TransportError::Shutdown);
        }
        let max = self.hub.shared.max_datagram_size;
        if datagram.len() > max {
            return Err(TransportError::DatagramTooLarge {
                size: datagram.len(),
                max,
            });
        }
        self.hub.broadcast(datagram);
        Ok(())
    }

    fn recv_timeout(&self, timeout: Duration) -> Result<Option<Bytes>> {
        if self.is_closed() {
            return Err(TransportError::Shutdown);
        }
        channel::select! {
            recv(self.rx) -> datagram => match datagram {
                Ok(datagram) => Ok(Some(datagram)),
                Err(_) => Err(TransportError::Shutdown),
            },
            recv(self.cancel_rx) -> _ => Err(TransportError::Shutdown),
            default(timeout) => Ok(None),
        }
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.hub.detach(self.id);
        let _ = self.cancel_tx.try_send(());
        debug!(endpoint = self.id, "memory endpoint closed");
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn max_datagram_size(&self) -> usize {
        self.hub.shared.max_datagram_size
    }
}

impl Drop for MemoryEndpoint {
    fn drop(&mut self) {
        self.hub.detach(self.id);
    }
}

impl std::fmt::Debug for MemoryEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryEndpoint")
            .field("id", &self.id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;

    #[test]
    fn broadcast_reaches_every_endpoint_including_sender() {
        let hub = MemoryHub::new();
        let a = hub.endpoint();
        let b = hub.endpoint();

        a.send(b"hello").unwrap();

        let at_a = a.recv_timeout(Duration::from_secs(1)).unwrap();
        let at_b = b.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(at_a.as_deref(), Some(&b"hello"[..]));
        assert_eq!(at_b.as_deref(), Some(&b"hello"[..]));
    }

    #[test]
    fn receive_times_out_when_idle() {
        let hub = MemoryHub::new();
        let a = hub.endpoint();
        let start = Instant::now();
        assert!(a.recv_timeout(Duration::from_millis(30)).unwrap().is_none());
        assert!(start.elapsed() >= Duration::from_millis(25));
    }

    #[test]
    fn close_wakes_blocked_receive() {
        let hub = MemoryHub::new();
        let endpoint = Arc::new(hub.endpoint());

        let waiter = {
            let endpoint = Arc::clone(&endpoint);
            std::thread::spawn(move || {
                let start = Instant::now();
                let result = endpoint.recv_timeout(Duration::from_secs(30));
                (result, start.elapsed())
            })
        };

        std::thread::sleep(Duration::from_millis(50));
        endpoint.close();
        let (result, waited) = waiter.join().unwrap();
        assert!(matches!(result, Err(TransportError::Shutdown)));
        assert!(waited < Duration::from_secs(5));
    }

    #[test]
    fn closed_endpoint_detaches_and_rejects_sends() {
        let hub = MemoryHub::new();
        let a = hub.endpoint();
        let b = hub.endpoint();
        assert_eq!(hub.endpoint_count(), 2);

        b.close();
        b.close();
        assert_eq!(hub.endpoint_count(), 1);
        assert!(matches!(b.send(b"x"), Err(TransportError::Shutdown)));

        a.send(b"still works").unwrap();
        assert!(a.recv_timeout(Duration::from_secs(1)).unwrap().is_some());
    }

    #[test]
    fn drop_detaches_endpoint() {
        let hub = MemoryHub::new();
        {
            let _endpoint = hub.endpoint();
            assert_eq!(hub.endpoint_count(), 1);
        }
        assert_eq!(hub.endpoint_count(), 0);
    }

    #[test]
    fn oversized_datagram_rejected() {
        let hub = MemoryHub::with_max_datagram_size(8);
        let a = hub.endpoint();
        let err = a.send(b"123456789").unwrap_err();
        assert!(matches!(
            err,
            TransportError::DatagramTooLarge { size: 9, max: 8 }
        ));
    }
}
