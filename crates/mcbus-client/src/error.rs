use std::time::Duration;

use mcbus_frame::FrameError;
use mcbus_transport::TransportError;

/// Errors that can occur in client operations.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(TransportError),

    /// Frame-level error, including oversized headers and unencodable fields.
    #[error("frame error: {0}")]
    Frame(FrameError),

    /// No reply arrived after every attempt.
    #[error("request {signal:?} to {target:?} timed out after {attempts} attempt(s) of {timeout:?}")]
    RequestTimeout {
        target: String,
        signal: String,
        attempts: u32,
        timeout: Duration,
    },

    /// `unsubscribe` of a pattern that was never subscribed.
    #[error("not subscribed to pattern {0:?}")]
    NotSubscribed(String),

    /// `unregister_bus_interface` of a signal with no handler.
    #[error("no bus interface registered for signal {0:?}")]
    NotRegistered(String),

    /// The client has been closed.
    #[error("transport closed")]
    TransportClosed,

    /// Subscription pattern is not a valid regular expression.
    #[error("invalid subscription pattern {pattern:?}: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    /// Client id would break the header or channel grammar.
    #[error("invalid client id {0:?}: must be non-empty and contain neither ',' nor '/'")]
    InvalidClientId(String),
}

impl ClientError {
    /// Returns true for [`ClientError::RequestTimeout`].
    pub fn is_timeout(&self) -> bool {
        matches!(self, ClientError::RequestTimeout { .. })
    }
}

impl From<TransportError> for ClientError {
    fn from(err: TransportError) -> Self {
        if err.is_shutdown() {
            ClientError::TransportClosed
        } else {
            ClientError::Transport(err)
        }
    }
}

impl From<FrameError> for ClientError {
    fn from(err: FrameError) -> Self {
        match err {
            FrameError::Transport(err) => err.into(),
            other => ClientError::Frame(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shutdown_maps_to_transport_closed() {
        let from_transport: ClientError = TransportError::Shutdown.into();
        assert!(matches!(from_transport, ClientError::TransportClosed));

        let from_frame: ClientError = FrameError::Transport(TransportError::Shutdown).into();
        assert!(matches!(from_frame, ClientError::TransportClosed));
    }

    #[test]
    fn frame_errors_stay_frame_errors() {
        let err: ClientError = FrameError::FrameTooLarge {
            header_len: 10,
            max: 8,
        }
        .into();
        assert!(matches!(
            err,
            ClientError::Frame(FrameError::FrameTooLarge { .. })
        ));
        assert!(!err.is_timeout());
    }
}
