use std::collections::HashMap;
use std::time::Duration;

use crossbeam::channel::{self, Receiver, Sender, TrySendError};
use mcbus_frame::Message;
use parking_lot::Mutex;
use tracing::debug;

/// Outstanding requests, keyed by correlation id.
///
/// Each request owns a single-slot rendezvous channel. The receive loop
/// [`deliver`](Self::deliver)s replies into it; the requesting thread waits on it.
#[derive(Default)]
pub struct Correlator {
    pending: Mutex<HashMap<String, Sender<Message>>>,
}

impl Correlator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a slot for `correlation_id`. Dropping the returned guard unregisters it.
    pub fn begin(&self, correlation_id: &str) -> PendingRequest<'_> {
        let (tx, rx) = channel::bounded(1);
        self.pending.lock().insert(correlation_id.to_string(), tx);
        PendingRequest {
            correlator: self,
            correlation_id: correlation_id.to_string(),
            rx,
        }
    }

    /// Hand a reply to the request waiting on its correlation id.
    ///
    /// Returns false when no request is waiting, or when the slot already holds a reply.
    pub fn deliver(&self, reply: Message) -> bool {
        let pending = self.pending.lock();
        let Some(slot) = pending.get(&reply.correlation_id) else {
            return false;
        };
        match slot.try_send(reply) {
            Ok(()) => true,
            Err(TrySendError::Full(reply)) => {
                debug!(correlation_id = %reply.correlation_id, "dropping duplicate reply");
                false
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }

    /// Number of requests currently waiting.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }
}

/// A registered request slot.
pub struct PendingRequest<'a> {
    correlator: &'a Correlator,
    correlation_id: String,
    rx: Receiver<Message>,
}

impl PendingRequest<'_> {
    /// Wait up to `timeout` for the reply.
    pub fn wait(&self, timeout: Duration) -> Option<Message> {
        self.rx.recv_timeout(timeout).ok()
    }
}

impl Drop for PendingRequest<'_> {
    fn drop(&mut self) {
        self.correlator.pending.lock().remove(&self.correlation_id);
    }
}
