use std::fmt;
use std::io;

use mcbus_client::ClientError;
use mcbus_frame::FrameError;
use mcbus_transport::TransportError;

pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::NotFound | io::ErrorKind::InvalidInput => USAGE,
        io::ErrorKind::AddrInUse | io::ErrorKind::AddrNotAvailable => TRANSPORT_ERROR,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn transport_error(context: &str, err: TransportError) -> CliError {
    match err {
        TransportError::Io(source) => io_error(context, source),
        TransportError::NotMulticast(_) => CliError::new(USAGE, format!("{context}: {err}")),
        TransportError::Shutdown => CliError::new(FAILURE, format!("{context}: {err}")),
        other => CliError::new(TRANSPORT_ERROR, format!("{context}: {other}")),
    }
}

pub fn frame_error(context: &str, err: FrameError) -> CliError {
    match err {
        FrameError::Transport(err) => transport_error(context, err),
        other => CliError::new(DATA_INVALID, format!("{context}: {other}")),
    }
}

pub fn client_error(context: &str, err: ClientError) -> CliError {
    match err {
        ClientError::Transport(err) => transport_error(context, err),
        ClientError::Frame(err) => frame_error(context, err),
        ClientError::RequestTimeout { .. } => CliError::new(TIMEOUT, format!("{context}: {err}")),
        ClientError::TransportClosed => CliError::new(FAILURE, format!("{context}: {err}")),
        ClientError::NotSubscribed(_)
        | ClientError::NotRegistered(_)
        | ClientError::InvalidPattern { .. }
        | ClientError::InvalidClientId(_) => CliError::new(USAGE, format!("{context}: {err}")),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn request_timeout_maps_to_timeout_code() {
        let err = client_error(
            "request failed",
            ClientError::RequestTimeout {
                target: "a".into(),
                signal: "b".into(),
                attempts: 1,
                timeout: Duration::from_secs(1),
            },
        );
        assert_eq!(err.code, TIMEOUT);
        assert!(err.message.starts_with("request failed: "));
    }

    #[test]
    fn oversized_header_is_invalid_data() {
        let err = client_error(
            "publish failed",
            ClientError::Frame(FrameError::FrameTooLarge {
                header_len: 100,
                max: 64,
            }),
        );
        assert_eq!(err.code, DATA_INVALID);
    }

    #[test]
    fn bind_failure_is_transport_error() {
        let err = transport_error(
            "connect failed",
            TransportError::Bind {
                addr: "[::]:26000".parse().unwrap(),
                source: io::Error::from(io::ErrorKind::AddrInUse),
            },
        );
        assert_eq!(err.code, TRANSPORT_ERROR);
    }

    #[test]
    fn bad_client_id_is_usage() {
        let err = client_error("connect failed", ClientError::InvalidClientId("a/b".into()));
        assert_eq!(err.code, USAGE);
    }
}
