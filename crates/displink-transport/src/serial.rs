//! RS-232/RS-485 transport over [`serialport`].

use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use serialport::{SerialPort, SerialPortType};
use tracing::{info, warn};

use crate::config::SerialConfig;
use crate::error::{ConnectError, SendError};
use crate::event::{ConnectionEvent, EventKind, TransportHooks};
use crate::lock;
use crate::reader::{spawn_reader, ReaderContext, ReaderExit, READER_JOIN_TIMEOUT};
use crate::stats::{ConnectionStats, StatsCounters};
use crate::traits::{Transport, TransportKind};
use crate::writer::Session;

/// Per-read timeout on the port; also bounds how quickly a stop is observed.
pub const SERIAL_READ_TIMEOUT: Duration = Duration::from_millis(100);

type SerialSession = Session<Box<dyn SerialPort>>;

/// A serial line to the display.
///
/// The writer owns the opened port and the reader runs on a `try_clone` of
/// it.
pub struct SerialTransport {
    config: SerialConfig,
    hooks: TransportHooks,
    stats: Arc<StatsCounters>,
    send_gate: Mutex<()>,
    transition: Mutex<()>,
    session: Mutex<Option<Arc<SerialSession>>>,
}

impl SerialTransport {
    pub fn new(config: SerialConfig) -> Self {
        Self::with_hooks(config, TransportHooks::new())
    }

    pub fn with_hooks(config: SerialConfig, hooks: TransportHooks) -> Self {
        Self {
            config,
            hooks,
            stats: Arc::new(StatsCounters::new()),
            send_gate: Mutex::new(()),
            transition: Mutex::new(()),
            session: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &SerialConfig {
        &self.config
    }

    fn current(&self) -> Option<Arc<SerialSession>> {
        lock(&self.session).clone()
    }

    fn close_session(&self) {
        let session = lock(&self.session).take();
        if let Some(session) = session {
            if !session.close(READER_JOIN_TIMEOUT) {
                warn!(port = %self.config.port_name, "serial reader detached");
            }
            info!(port = %self.config.port_name, "serial port closed");
        }
    }

    fn open_port(&self, target: &str) -> Result<Box<dyn SerialPort>, ConnectError> {
        let config = &self.config;
        serialport::new(config.port_name.as_str(), config.baud_rate)
            .data_bits(config.data_bits.into())
            .stop_bits(config.stop_bits.into())
            .parity(config.parity.into())
            .flow_control(config.flow_control.into())
            .timeout(SERIAL_READ_TIMEOUT)
            .open()
            .map_err(|err| map_open_error(target, err))
    }
}

impl Transport for SerialTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Serial
    }

    fn connect(&self) -> Result<(), ConnectError> {
        self.config.validate()?;
        let _transition = lock(&self.transition);
        self.close_session();

        let label = self.describe();
        info!(target_label = %label, "opening serial port");
        let port = self.open_port(&label)?;
        let reader_port = port
            .try_clone()
            .map_err(|err| map_open_error(&label, err))?;

        let ctx = ReaderContext {
            kind: TransportKind::Serial,
            label: label.clone(),
            stats: self.stats.clone(),
            hooks: self.hooks.clone(),
        };
        let hooks = self.hooks.clone();
        let exit_label = label.clone();
        let reader = spawn_reader(
            "displink-serial-reader".to_string(),
            reader_port,
            ctx,
            move |exit| {
                if !matches!(exit, ReaderExit::Stopped) {
                    hooks.event(ConnectionEvent::new(
                        EventKind::ConnectionLost,
                        TransportKind::Serial,
                        format!("{exit_label}: {}", exit.describe()),
                    ));
                }
            },
        )
        .map_err(|source| ConnectError::Unknown {
            target: label.clone(),
            source,
        })?;

        *lock(&self.session) = Some(Arc::new(Session::new(
            TransportKind::Serial,
            label.clone(),
            port,
            reader,
        )));
        info!(target_label = %label, "serial port open");
        Ok(())
    }

    fn send(&self, payload: &[u8], max_attempts: u32) -> Result<(), SendError> {
        let outcome = {
            let _gate = lock(&self.send_gate);
            let session = self
                .current()
                .filter(|session| session.is_usable())
                .ok_or(SendError::NotConnected)?;
            session.send(payload, max_attempts, &self.stats)
        };
        outcome.finish(&self.hooks)
    }

    fn is_connected(&self) -> bool {
        self.current().is_some_and(|session| session.is_usable())
    }

    fn disconnect(&self) {
        let _transition = lock(&self.transition);
        self.close_session();
    }

    fn describe(&self) -> String {
        format!(
            "serial:{}@{} {}",
            self.config.port_name,
            self.config.baud_rate,
            self.config.line_settings()
        )
    }

    fn stats(&self) -> ConnectionStats {
        self.stats.snapshot()
    }

    fn reset_stats(&self) {
        let _gate = lock(&self.send_gate);
        self.stats.reset();
    }
}

impl Drop for SerialTransport {
    fn drop(&mut self) {
        self.disconnect();
    }
}

fn map_open_error(target: &str, err: serialport::Error) -> ConnectError {
    let target = target.to_string();
    match err.kind {
        serialport::ErrorKind::NoDevice => ConnectError::NotFound {
            target,
            source: io::Error::new(io::ErrorKind::NotFound, err.description),
        },
        serialport::ErrorKind::InvalidInput => {
            ConnectError::InvalidConfig(format!("{target}: {}", err.description))
        }
        serialport::ErrorKind::Io(kind) => ConnectError::from_io(
            target,
            io::Error::new(kind, err.description),
            SERIAL_READ_TIMEOUT,
        ),
        serialport::ErrorKind::Unknown => ConnectError::Unknown {
            target,
            source: io::Error::other(err.description),
        },
    }
}

/// A serial port the OS reports as present.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PortInfo {
    pub name: String,
    pub port_type: String,
}

/// Enumerate the serial ports currently available.
pub fn list_ports() -> Result<Vec<PortInfo>, ConnectError> {
    let ports = serialport::available_ports().map_err(|err| ConnectError::Unknown {
        target: "serial ports".to_string(),
        source: io::Error::other(err.description),
    })?;
    Ok(ports
        .into_iter()
        .map(|port| PortInfo {
            name: port.port_name,
            port_type: describe_port_type(&port.port_type),
        })
        .collect())
}

fn describe_port_type(port_type: &SerialPortType) -> String {
    match port_type {
        SerialPortType::UsbPort(usb) => match (&usb.manufacturer, &usb.product) {
            (Some(manufacturer), Some(product)) => format!("usb ({manufacturer} {product})"),
            (None, Some(product)) => format!("usb ({product})"),
            _ => format!("usb ({:04x}:{:04x})", usb.vid, usb.pid),
        },
        SerialPortType::PciPort => "pci".to_string(),
        SerialPortType::BluetoothPort => "bluetooth".to_string(),
        SerialPortType::Unknown => "unknown".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Parity, StopBits};

    #[test]
    fn describe_includes_line_settings() {
        let mut config = SerialConfig::new("/dev/ttyS1", 9600);
        config.parity = Parity::Even;
        config.stop_bits = StopBits::Two;
        let transport = SerialTransport::new(config);
        assert_eq!(transport.describe(), "serial:/dev/ttyS1@9600 8E2");
        assert_eq!(transport.kind(), TransportKind::Serial);
    }

    #[test]
    fn empty_port_name_is_rejected_before_io() {
        let transport = SerialTransport::new(SerialConfig::new("  ", 19_200));
        let err = transport.connect().unwrap_err();
        assert!(matches!(err, ConnectError::InvalidConfig(_)), "got {err:?}");
        assert!(!transport.is_connected());
    }

    #[cfg(unix)]
    #[test]
    fn missing_device_is_not_found() {
        let transport =
            SerialTransport::new(SerialConfig::new("/dev/displink-no-such-tty", 19_200));
        let err = transport.connect().unwrap_err();
        assert!(matches!(err, ConnectError::NotFound { .. }), "got {err:?}");
        assert!(!transport.is_connected());
    }

    #[test]
    fn send_without_connection_fails_fast() {
        let transport = SerialTransport::new(SerialConfig::default());
        let err = transport.send(b"X", 3).unwrap_err();
        assert!(matches!(err, SendError::NotConnected));
        assert_eq!(transport.stats(), ConnectionStats::default());
    }

    #[test]
    fn disconnect_is_idempotent() {
        let transport = SerialTransport::new(SerialConfig::default());
        transport.disconnect();
        transport.disconnect();
        assert!(!transport.is_connected());
    }

    #[test]
    fn open_errors_map_to_taxonomy() {
        let busy = map_open_error(
            "p",
            serialport::Error::new(
                serialport::ErrorKind::Io(io::ErrorKind::PermissionDenied),
                "denied",
            ),
        );
        assert!(matches!(busy, ConnectError::Busy { .. }));

        let missing = map_open_error(
            "p",
            serialport::Error::new(serialport::ErrorKind::NoDevice, "gone"),
        );
        assert!(matches!(missing, ConnectError::NotFound { .. }));

        let invalid = map_open_error(
            "p",
            serialport::Error::new(serialport::ErrorKind::InvalidInput, "bad baud"),
        );
        assert!(matches!(invalid, ConnectError::InvalidConfig(_)));
    }
}
