use std::time::Duration;

use mcbus_frame::FrameConfig;
use mcbus_transport::MulticastConfig;
use uuid::Uuid;

/// Default time a request waits for its reply, per attempt.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Default number of re-sends after the first attempt times out.
pub const DEFAULT_REQUEST_RETRIES: u32 = 0;

/// Default upper bound on a single receive wait in the receive loop.
pub const DEFAULT_RECEIVE_WAIT: Duration = Duration::from_secs(10);

/// Default number of threads running pooled handlers.
pub const DEFAULT_WORKERS: usize = 4;

/// Default capacity of the pooled handler queue.
pub const DEFAULT_WORKER_QUEUE: usize = 256;

/// Session configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// This client's identity on the bus. Must be non-empty and free of `,` and `/`.
    pub client_id: String,
    /// Multicast group membership, used by [`Client::connect`](crate::Client::connect).
    pub transport: MulticastConfig,
    /// Framing and reassembly settings.
    pub frame: FrameConfig,
    /// Per-attempt reply timeout for requests.
    pub request_timeout: Duration,
    /// Re-sends after the first attempt times out.
    pub request_retries: u32,
    /// Upper bound on one receive wait. `close()` interrupts it early.
    pub receive_wait: Duration,
    /// Threads running pooled handlers.
    pub workers: usize,
    /// Pooled jobs that may wait for a worker before new ones are dropped.
    pub worker_queue: usize,
}

impl ClientConfig {
    /// Default configuration with an explicit client id.
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            ..Self::default()
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        let suffix = Uuid::new_v4().simple().to_string();
        Self {
            client_id: format!("client-{}", &suffix[..8]),
            transport: MulticastConfig::default(),
            frame: FrameConfig::default(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            request_retries: DEFAULT_REQUEST_RETRIES,
            receive_wait: DEFAULT_RECEIVE_WAIT,
            workers: DEFAULT_WORKERS,
            worker_queue: DEFAULT_WORKER_QUEUE,
        }
    }
}

/// Per-call overrides for [`Client::request_with`](crate::Client::request_with).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestOptions {
    /// Reply timeout per attempt. Falls back to `ClientConfig::request_timeout`.
    pub timeout: Option<Duration>,
    /// Re-sends after a timed-out attempt. Falls back to `ClientConfig::request_retries`.
    pub retries: Option<u32>,
}

impl RequestOptions {
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = Some(retries);
        self
    }
}
