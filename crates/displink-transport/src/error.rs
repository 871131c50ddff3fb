use std::io;
use std::time::Duration;

/// Errors that can occur while opening a transport.
#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    /// The port or host does not exist or refused the connection.
    #[error("{target}: not found: {source}")]
    NotFound { target: String, source: io::Error },

    /// The port is held by another process or access was denied.
    #[error("{target}: busy: {source}")]
    Busy { target: String, source: io::Error },

    /// No connection could be established within the configured timeout.
    #[error("{target}: timed out after {timeout:?}")]
    Timeout { target: String, timeout: Duration },

    /// The TLS handshake did not complete.
    #[error("{target}: handshake failed: {reason}")]
    HandshakeFailed { target: String, reason: String },

    /// The configuration was rejected before any I/O took place.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Any other failure while opening the resource.
    #[error("{target}: {source}")]
    Unknown { target: String, source: io::Error },
}

impl ConnectError {
    /// Classify an I/O error raised while opening `target`.
    pub fn from_io(target: impl Into<String>, source: io::Error, timeout: Duration) -> Self {
        let target = target.into();
        match source.kind() {
            io::ErrorKind::NotFound
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::AddrNotAvailable => Self::NotFound { target, source },
            io::ErrorKind::PermissionDenied | io::ErrorKind::ResourceBusy => {
                Self::Busy { target, source }
            }
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => Self::Timeout { target, timeout },
            io::ErrorKind::InvalidInput => Self::InvalidConfig(format!("{target}: {source}")),
            _ => Self::Unknown { target, source },
        }
    }
}

/// Errors that can occur while sending a payload.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    /// No transport is connected.
    #[error("no active connection")]
    NotConnected,

    /// Every write attempt failed.
    #[error("write failed after {attempts} attempt(s): {source}")]
    Write { attempts: u32, source: io::Error },
}

/// Outcome of a failed read in the background reader.
#[derive(Debug, thiserror::Error)]
pub enum ReadError {
    /// The per-iteration timeout elapsed with no data. Not an error condition.
    #[error("read timed out")]
    Timeout,

    /// The stream is unusable; the reader terminates.
    #[error("read failed: {0}")]
    Fatal(io::Error),
}

impl ReadError {
    /// Split an I/O error into the transient and fatal cases.
    pub fn classify(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted => {
                Self::Timeout
            }
            _ => Self::Fatal(err),
        }
    }
}

/// Write errors after which the link cannot carry further traffic.
pub(crate) fn is_link_fatal(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
            | io::ErrorKind::UnexpectedEof
    )
}

pub type Result<T> = std::result::Result<T, ConnectError>;
