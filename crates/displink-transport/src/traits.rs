use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{ConnectError, SendError};
use crate::stats::ConnectionStats;

/// Which medium a transport drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    #[default]
    None,
    Serial,
    Tcp,
}

impl TransportKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TransportKind::None => "none",
            TransportKind::Serial => "serial",
            TransportKind::Tcp => "tcp",
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A connectable link to the display.
///
/// Implementations own their OS handle exclusively and take `&self`
/// everywhere, so one instance can be shared as `Arc<dyn Transport>` between
/// the owner and its health checks. The configuration is fixed at
/// construction; `connect` may be called again after a failure to reopen the
/// same endpoint.
pub trait Transport: Send + Sync {
    /// The medium this transport drives.
    fn kind(&self) -> TransportKind;

    /// Open the endpoint and start the background reader.
    ///
    /// Any previous session is torn down first.
    fn connect(&self) -> Result<(), ConnectError>;

    /// Write `payload` in full, retrying up to `max_attempts` times.
    fn send(&self, payload: &[u8], max_attempts: u32) -> Result<(), SendError>;

    /// True while the handle is open and the reader is still running.
    fn is_connected(&self) -> bool;

    /// True while the transport is running its own reconnect sequence.
    fn is_reconnecting(&self) -> bool {
        false
    }

    /// Stop the reader and release the handle. Safe to call repeatedly.
    fn disconnect(&self);

    /// Human-readable endpoint description for logs and status lines.
    fn describe(&self) -> String;

    /// Snapshot of this transport's counters.
    fn stats(&self) -> ConnectionStats;

    /// Zero this transport's counters.
    fn reset_stats(&self);
}
