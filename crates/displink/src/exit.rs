use std::fmt;
use std::io;

use displink_transport::{ConnectError, SendError};

pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
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
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied => FAILURE,
        io::ErrorKind::InvalidData => DATA_INVALID,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn connect_error(context: &str, err: ConnectError) -> CliError {
    let code = match &err {
        ConnectError::Timeout { .. } => TIMEOUT,
        ConnectError::InvalidConfig(_) => USAGE,
        ConnectError::NotFound { .. }
        | ConnectError::Busy { .. }
        | ConnectError::HandshakeFailed { .. }
        | ConnectError::Unknown { .. } => TRANSPORT_ERROR,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn send_error(context: &str, err: SendError) -> CliError {
    let code = match &err {
        SendError::NotConnected => TRANSPORT_ERROR,
        SendError::Write { source, .. } => match source.kind() {
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
            _ => TRANSPORT_ERROR,
        },
    };
    CliError::new(code, format!("{context}: {err}"))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn connect_errors_map_to_exit_codes() {
        let timeout = ConnectError::Timeout {
            target: "tcp://h:1".to_string(),
            timeout: Duration::from_secs(5),
        };
        assert_eq!(connect_error("connect", timeout).code, TIMEOUT);
        assert_eq!(
            connect_error("connect", ConnectError::InvalidConfig("bad".into())).code,
            USAGE
        );
        let refused = ConnectError::NotFound {
            target: "tcp://h:1".to_string(),
            source: io::Error::from(io::ErrorKind::ConnectionRefused),
        };
        let err = connect_error("connect failed", refused);
        assert_eq!(err.code, TRANSPORT_ERROR);
        assert!(err.message.starts_with("connect failed: tcp://h:1"));
    }

    #[test]
    fn send_errors_map_to_exit_codes() {
        assert_eq!(
            send_error("send", SendError::NotConnected).code,
            TRANSPORT_ERROR
        );
        let timed_out = SendError::Write {
            attempts: 3,
            source: io::Error::from(io::ErrorKind::TimedOut),
        };
        assert_eq!(send_error("send", timed_out).code, TIMEOUT);
    }
}
