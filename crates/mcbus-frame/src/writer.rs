use mcbus_transport::DatagramTransport;
use tracing::debug;

use crate::codec::{encode_message, FrameConfig, Header};
use crate::error::Result;

/// Sends logical messages, chunked as needed, over a datagram transport.
pub struct FrameWriter<T> {
    inner: T,
    config: FrameConfig,
}

impl<T: DatagramTransport> FrameWriter<T> {
    /// Create a new frame writer sized to the transport's datagram limit.
    pub fn new(inner: T) -> Self {
        let config = FrameConfig {
            max_datagram_size: inner.max_datagram_size(),
            ..FrameConfig::default()
        };
        Self::with_config(inner, config)
    }

    /// Create a new frame writer with explicit configuration.
    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self { inner, config }
    }

    /// Encode and send one logical message. Returns the number of datagrams sent.
    ///
    /// Every chunk goes to the same destination, in order. Encoding failures are
    /// reported before anything is sent.
    pub fn send(&self, header: &Header, body: &[u8]) -> Result<usize> {
        let datagrams = encode_message(header, body, &self.config)?;
        for datagram in &datagrams {
            self.inner.send(datagram)?;
        }
        debug!(
            channel = %header.channel,
            correlation_id = %header.correlation_id,
            chunks = datagrams.len(),
            size = body.len(),
            "message sent"
        );
        Ok(datagrams.len())
    }

    /// Borrow the underlying transport.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Current frame writer configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}
