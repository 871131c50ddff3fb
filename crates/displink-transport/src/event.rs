use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::traits::TransportKind;

/// What happened to a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Connected,
    Disconnected,
    ConnectionLost,
    Reconnecting,
    Reconnected,
    SendSuccess,
    SendFailure,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Connected => "connected",
            EventKind::Disconnected => "disconnected",
            EventKind::ConnectionLost => "connection_lost",
            EventKind::Reconnecting => "reconnecting",
            EventKind::Reconnected => "reconnected",
            EventKind::SendSuccess => "send_success",
            EventKind::SendFailure => "send_failure",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Connection status notification delivered to listeners.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionEvent {
    pub kind: EventKind,
    pub transport: TransportKind,
    pub message: String,
}

impl ConnectionEvent {
    pub fn new(kind: EventKind, transport: TransportKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            transport,
            message: message.into(),
        }
    }
}

impl fmt::Display for ConnectionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.transport, self.kind, self.message)
    }
}

pub type DataCallback = Arc<dyn Fn(TransportKind, &[u8]) + Send + Sync>;
pub type ErrorCallback = Arc<dyn Fn(TransportKind, &str) + Send + Sync>;
pub type EventCallback = Arc<dyn Fn(ConnectionEvent) + Send + Sync>;

/// Callbacks a transport invokes from its background threads.
///
/// All callbacks are optional; a transport without hooks still logs every
/// read and failure through `tracing`.
#[derive(Clone, Default)]
pub struct TransportHooks {
    on_data: Option<DataCallback>,
    on_error: Option<ErrorCallback>,
    on_event: Option<EventCallback>,
}

impl TransportHooks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called with every non-empty chunk the reader receives.
    pub fn on_data(mut self, f: impl Fn(TransportKind, &[u8]) + Send + Sync + 'static) -> Self {
        self.on_data = Some(Arc::new(f));
        self
    }

    /// Called with a description of every read or write failure.
    pub fn on_error(mut self, f: impl Fn(TransportKind, &str) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(f));
        self
    }

    /// Called for connection-state changes the transport detects itself.
    pub fn on_event(mut self, f: impl Fn(ConnectionEvent) + Send + Sync + 'static) -> Self {
        self.on_event = Some(Arc::new(f));
        self
    }

    /// Deliver a received chunk to the data callback, if any.
    pub fn data(&self, kind: TransportKind, data: &[u8]) {
        if let Some(cb) = &self.on_data {
            cb(kind, data);
        }
    }

    pub fn error(&self, kind: TransportKind, message: &str) {
        if let Some(cb) = &self.on_error {
            cb(kind, message);
        }
    }

    pub fn event(&self, event: ConnectionEvent) {
        if let Some(cb) = &self.on_event {
            cb(event);
        }
    }
}

impl fmt::Debug for TransportHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportHooks")
            .field("on_data", &self.on_data.is_some())
            .field("on_error", &self.on_error.is_some())
            .field("on_event", &self.on_event.is_some())
            .finish()
    }
}
