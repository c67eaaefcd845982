use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use mcbus_frame::{Channel, FrameConfig, FrameReader, FrameWriter, Header, Message};
use mcbus_transport::{DatagramTransport, MulticastConfig, MulticastSocket, TransportError};
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use crate::config::{ClientConfig, RequestOptions};
use crate::correlator::Correlator;
use crate::dispatch::{Delivery, Execution, Handler, WorkerPool};
use crate::error::{ClientError, Result};
use crate::registry::{InterfaceTable, SubscriptionRegistry};

type SharedTransport = Arc<dyn DatagramTransport>;

/// A participant on the bus.
///
/// Cloning is cheap and yields another handle to the same session.
#[derive(Clone)]
pub struct Client {
    inner: Arc<Inner>,
}

struct Inner {
    id: String,
    config: ClientConfig,
    reader: FrameReader<SharedTransport>,
    writer: FrameWriter<SharedTransport>,
    subscriptions: SubscriptionRegistry,
    interfaces: InterfaceTable,
    correlator: Correlator,
    pool: WorkerPool,
    closed: AtomicBool,
}

impl Client {
    /// Join the multicast group described by `config.transport`.
    ///
    /// The socket's datagram limit is taken from `config.frame.max_datagram_size`.
    pub fn connect(config: ClientConfig) -> Result<Self> {
        validate_client_id(&config.client_id)?;
        let transport = MulticastSocket::bind(MulticastConfig {
            max_datagram_size: config.frame.max_datagram_size,
            ..config.transport.clone()
        })?;
        Self::with_transport(config, Arc::new(transport))
    }

    /// Run a session over an existing transport, such as a
    /// [`MemoryEndpoint`](mcbus_transport::MemoryEndpoint).
    ///
    /// The transport's datagram limit overrides `config.frame.max_datagram_size`.
    pub fn with_transport(config: ClientConfig, transport: SharedTransport) -> Result<Self> {
        validate_client_id(&config.client_id)?;
        let frame = FrameConfig {
            max_datagram_size: transport.max_datagram_size(),
            ..config.frame.clone()
        };
        let pool = WorkerPool::new(
            &format!("mcbus-{}", config.client_id),
            config.workers,
            config.worker_queue,
        )
        .map_err(TransportError::Io)?;

        info!(
            client_id = %config.client_id,
            max_datagram_size = frame.max_datagram_size,
            "client session opened"
        );

        Ok(Self {
            inner: Arc::new(Inner {
                id: config.client_id.clone(),
                reader: FrameReader::with_config(Arc::clone(&transport), frame.clone())
                    .ignore_sender(config.client_id.clone()),
                writer: FrameWriter::with_config(transport, frame),
                subscriptions: SubscriptionRegistry::new(),
                interfaces: InterfaceTable::new(),
                correlator: Correlator::new(),
                pool,
                closed: AtomicBool::new(false),
                config,
            }),
        })
    }

    /// This client's id.
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Publish `body` on `topic`. Returns the correlation id used.
    pub fn publish(&self, body: &str, topic: &str) -> Result<String> {
        let correlation_id = new_correlation_id();
        self.send(&Channel::publication(topic), &correlation_id, body)?;
        Ok(correlation_id)
    }

    /// Send a request and block for the reply, using the configured timeout and retries.
    pub fn request(&self, target: &str, signal: &str, body: &str) -> Result<String> {
        self.request_with(target, signal, body, RequestOptions::default())
    }

    /// Send a request and block for the reply.
    ///
    /// Each attempt waits up to the timeout. Retries re-send under the same
    /// correlation id, so a reply to any attempt completes the request.
    pub fn request_with(
        &self,
        target: &str,
        signal: &str,
        body: &str,
        options: RequestOptions,
    ) -> Result<String> {
        let timeout = options.timeout.unwrap_or(self.inner.config.request_timeout);
        let retries = options.retries.unwrap_or(self.inner.config.request_retries);
        let attempts = retries.saturating_add(1);

        let correlation_id = new_correlation_id();
        let pending = self.inner.correlator.begin(&correlation_id);
        let channel = Channel::request(target, signal);

        for attempt in 1..=attempts {
            self.send(&channel, &correlation_id, body)?;
            if let Some(reply) = pending.wait(timeout) {
                debug!(%correlation_id, attempt, "reply received");
                return Ok(reply.body);
            }
            if attempt < attempts {
                debug!(%correlation_id, attempt, peer = target, signal, "request timed out, retrying");
            }
        }

        Err(ClientError::RequestTimeout {
            target: target.to_string(),
            signal: signal.to_string(),
            attempts,
            timeout,
        })
    }

    /// Answer the request `correlation_id` that `target` sent on `signal`. Fire-and-forget.
    pub fn reply(&self, body: &str, target: &str, signal: &str, correlation_id: &str) -> Result<()> {
        self.send(&Channel::reply(target, signal), correlation_id, body)?;
        Ok(())
    }

    /// Handle requests sent to this client on `signal`, replacing any previous handler.
    pub fn register_bus_interface(&self, signal: &str, handler: Handler) {
        if self.inner.interfaces.register(signal, handler).is_some() {
            debug!(signal, "bus interface replaced");
        }
    }

    pub fn unregister_bus_interface(&self, signal: &str) -> Result<()> {
        self.inner.interfaces.unregister(signal)
    }

    /// Invoke `handler` for every publication whose topic fully matches the
    /// regular expression `pattern`.
    pub fn subscribe(&self, pattern: &str, handler: Handler) -> Result<()> {
        self.inner.subscriptions.subscribe(pattern, handler)
    }

    pub fn unsubscribe(&self, pattern: &str) -> Result<()> {
        self.inner.subscriptions.unsubscribe(pattern)
    }

    /// Run the receive loop until [`close`](Self::close) is called.
    pub fn run(&self) -> Result<()> {
        debug!(client_id = %self.inner.id, "receive loop started");
        while !self.is_closed() {
            match self.inner.reader.read_message(self.inner.config.receive_wait) {
                Ok(Some(message)) => self.dispatch(message),
                Ok(None) => {}
                Err(err) if err.is_shutdown() || self.is_closed() => break,
                Err(err) => return Err(err.into()),
            }
        }
        debug!(client_id = %self.inner.id, "receive loop stopped");
        Ok(())
    }

    /// Run the receive loop on a background thread.
    pub fn spawn_receiver(&self) -> io::Result<JoinHandle<Result<()>>> {
        let client = self.clone();
        thread::Builder::new()
            .name(format!("mcbus-recv-{}", self.inner.id))
            .spawn(move || client.run())
    }

    /// Close the session. Idempotent.
    ///
    /// Wakes the receive loop at once. Later sends fail with
    /// [`ClientError::TransportClosed`]; requests already waiting run out their timeout.
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.writer.get_ref().close();
        self.inner.pool.shutdown();
        info!(client_id = %self.inner.id, "client session closed");
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Number of requests waiting for a reply.
    pub fn pending_requests(&self) -> usize {
        self.inner.correlator.pending_count()
    }

    fn send(&self, channel: &Channel, correlation_id: &str, body: &str) -> Result<usize> {
        if self.is_closed() {
            return Err(ClientError::TransportClosed);
        }
        let header = Header::new(self.inner.id.as_str(), channel.to_string(), correlation_id);
        Ok(self.inner.writer.send(&header, body.as_bytes())?)
    }

    fn dispatch(&self, message: Message) {
        let id = self.inner.id.as_str();
        match Channel::parse(&message.channel) {
            Channel::Request { target, signal } if target == id => {
                let Some(handler) = self.inner.interfaces.get(&signal) else {
                    debug!(%signal, sender = %message.sender_id, "no bus interface for request");
                    return;
                };
                let delivery = Delivery {
                    sender_id: message.sender_id,
                    subject: signal,
                    correlation_id: message.correlation_id,
                    body: message.body,
                };
                self.invoke(&handler, delivery);
            }
            Channel::Publication { topic } => {
                let handlers = self.inner.subscriptions.match_all(&topic);
                if handlers.is_empty() {
                    trace!(%topic, "no subscription matched");
                    return;
                }
                let delivery = Delivery {
                    sender_id: message.sender_id,
                    subject: topic,
                    correlation_id: message.correlation_id,
                    body: message.body,
                };
                for handler in &handlers {
                    self.invoke(handler, delivery.clone());
                }
            }
            Channel::Reply { target, .. } if target == id => {
                let correlation_id = message.correlation_id.clone();
                if !self.inner.correlator.deliver(message) {
                    debug!(%correlation_id, "discarding late or orphaned reply");
                }
            }
            _ => trace!(channel = %message.channel, "message not addressed to this client"),
        }
    }

    fn invoke(&self, handler: &Handler, delivery: Delivery) {
        match handler.execution() {
            Execution::Inline => match handler.call_guarded(self, &delivery) {
                Ok(Some(body)) if !body.is_empty() => {
                    if let Err(err) = self.reply(
                        &body,
                        &delivery.sender_id,
                        &delivery.subject,
                        &delivery.correlation_id,
                    ) {
                        warn!(error = %err, subject = %delivery.subject, "failed to send reply");
                    }
                }
                Ok(_) => {}
                Err(panic) => {
                    error!(subject = %delivery.subject, %panic, "handler panicked");
                }
            },
            Execution::Pooled => {
                let handler = handler.clone();
                let client = self.clone();
                self.inner.pool.submit(move || {
                    handler.call(&client, &delivery);
                });
            }
        }
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("id", &self.inner.id)
            .field("closed", &self.is_closed())
            .field("subscriptions", &self.inner.subscriptions.len())
            .finish()
    }
}

fn validate_client_id(id: &str) -> Result<()> {
    if id.is_empty() || id.contains(',') || id.contains('/') {
        return Err(ClientError::InvalidClientId(id.to_string()));
    }
    Ok(())
}

fn new_correlation_id() -> String {
    Uuid::new_v4().simple().to_string()
}
