//! Serial and TCP links to an LED display panel.
//!
//! Both transports implement [`Transport`]:
//! - [`SerialTransport`] over RS-232/RS-485 via `serialport`
//! - [`TcpTransport`] over plain TCP or TLS, with optional self-reconnect
//!
//! Each open session runs one background reader thread that feeds
//! [`TransportHooks`] and the per-transport [`ConnectionStats`]. This is the
//! lowest layer of displink; the manager crate builds on it.

use std::sync::{Mutex, MutexGuard, PoisonError};

pub mod cancel;
pub mod config;
pub mod error;
pub mod event;
pub mod reader;
pub mod serial;
pub mod stats;
pub mod tcp;
pub mod traits;
pub mod writer;

mod tls;

pub use cancel::CancelToken;
pub use config::{DataBits, FlowControl, Parity, SerialConfig, StopBits, TcpConfig};
pub use error::{ConnectError, ReadError, Result, SendError};
pub use event::{ConnectionEvent, EventKind, TransportHooks};
pub use reader::{escape_for_log, ReaderExit, READER_JOIN_TIMEOUT};
pub use serial::{list_ports, PortInfo, SerialTransport};
pub use stats::{ConnectionStats, StatsCounters};
pub use tcp::{backoff_delay, TcpTransport, MAX_AUTO_RECONNECT_ATTEMPTS};
pub use traits::{Transport, TransportKind};
pub use writer::{write_with_retry, RETRY_PAUSE};

/// Lock a mutex, recovering the data if a holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
