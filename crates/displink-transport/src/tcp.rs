//! TCP transport, optionally wrapped in TLS, with its own reconnect
//! supervisor.

use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::thread;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::cancel::CancelToken;
use crate::config::TcpConfig;
use crate::error::{ConnectError, SendError};
use crate::event::{ConnectionEvent, EventKind, TransportHooks};
use crate::lock;
use crate::reader::{spawn_reader, ReaderContext, ReaderExit, READER_JOIN_TIMEOUT};
use crate::stats::{ConnectionStats, StatsCounters};
use crate::tls::{self, TlsStream};
use crate::traits::{Transport, TransportKind};
use crate::writer::{LinkWriter, Session};

/// Upper bound on one TLS read, so writers get the shared session in time.
const TLS_READ_POLL: Duration = Duration::from_millis(250);

/// Attempts per auto-reconnect episode.
pub const MAX_AUTO_RECONNECT_ATTEMPTS: u32 = 5;

const BACKOFF_BASE: Duration = Duration::from_secs(1);
const BACKOFF_CAP: Duration = Duration::from_secs(30);

/// Delay before auto-reconnect `attempt` (1-based): 1 s doubling, capped at
/// 30 s.
pub fn backoff_delay(attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(16);
    BACKOFF_BASE.saturating_mul(1 << exponent).min(BACKOFF_CAP)
}

/// One direction of an open TCP link.
enum TcpLink {
    Plain(TcpStream),
    Tls(TlsStream),
}

impl Read for TcpLink {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            TcpLink::Plain(stream) => stream.read(buf),
            TcpLink::Tls(stream) => stream.read(buf),
        }
    }
}

impl Write for TcpLink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            TcpLink::Plain(stream) => stream.write(buf),
            TcpLink::Tls(stream) => stream.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            TcpLink::Plain(stream) => stream.flush(),
            TcpLink::Tls(stream) => stream.flush(),
        }
    }
}

impl LinkWriter for TcpLink {
    fn close(&mut self) {
        match self {
            TcpLink::Plain(stream) => {
                let _ = stream.shutdown(Shutdown::Both);
            }
            TcpLink::Tls(stream) => stream.close(),
        }
    }
}

type TcpSession = Session<TcpLink>;

struct TcpInner {
    config: TcpConfig,
    hooks: TransportHooks,
    stats: Arc<StatsCounters>,
    send_gate: Mutex<()>,
    transition: Mutex<()>,
    session: Mutex<Option<Arc<TcpSession>>>,
    /// Stop signal of the running reconnect supervisor, if any.
    supervisor: Mutex<Option<CancelToken>>,
    closed_by_user: AtomicBool,
}

/// A TCP (or TLS over TCP) connection to the display.
///
/// With [`TcpConfig::auto_reconnect`] the transport restores a lost link by
/// itself with exponential backoff, reporting progress through the
/// `on_event` hook.
pub struct TcpTransport {
    inner: Arc<TcpInner>,
}

impl TcpTransport {
    pub fn new(config: TcpConfig) -> Self {
        Self::with_hooks(config, TransportHooks::new())
    }

    pub fn with_hooks(config: TcpConfig, hooks: TransportHooks) -> Self {
        Self {
            inner: Arc::new(TcpInner {
                config,
                hooks,
                stats: Arc::new(StatsCounters::new()),
                send_gate: Mutex::new(()),
                transition: Mutex::new(()),
                session: Mutex::new(None),
                supervisor: Mutex::new(None),
                closed_by_user: AtomicBool::new(false),
            }),
        }
    }

    pub fn config(&self) -> &TcpConfig {
        &self.inner.config
    }
}

impl TcpInner {
    fn label(&self) -> String {
        let scheme = if self.config.use_tls { "tls" } else { "tcp" };
        format!("{scheme}://{}", self.config.address())
    }

    fn current(&self) -> Option<Arc<TcpSession>> {
        lock(&self.session).clone()
    }

    fn close_session(&self) {
        let session = lock(&self.session).take();
        if let Some(session) = session {
            if !session.close(READER_JOIN_TIMEOUT) {
                warn!(address = %self.config.address(), "tcp reader detached");
            }
            info!(address = %self.config.address(), "tcp connection closed");
        }
    }

    fn cancel_supervisor(&self) {
        if let Some(stop) = lock(&self.supervisor).take() {
            debug!(address = %self.config.address(), "cancelling auto-reconnect");
            stop.cancel();
        }
    }

    /// Replace the current session with a freshly dialled one. The caller
    /// holds the transition lock.
    fn open_locked(self: &Arc<Self>) -> Result<(), ConnectError> {
        self.close_session();

        let label = self.label();
        info!(target_label = %label, "connecting");
        let (writer, reader_link) = self.dial(&label)?;

        let ctx = ReaderContext {
            kind: TransportKind::Tcp,
            label: label.clone(),
            stats: self.stats.clone(),
            hooks: self.hooks.clone(),
        };
        let weak = Arc::downgrade(self);
        let reader = spawn_reader(
            "displink-tcp-reader".to_string(),
            reader_link,
            ctx,
            move |exit| {
                if let Some(inner) = weak.upgrade() {
                    inner.reader_exited(exit);
                }
            },
        )
        .map_err(|source| ConnectError::Unknown {
            target: label.clone(),
            source,
        })?;

        *lock(&self.session) = Some(Arc::new(Session::new(
            TransportKind::Tcp,
            label.clone(),
            writer,
            reader,
        )));
        info!(target_label = %label, "connected");
        Ok(())
    }

    fn dial(&self, label: &str) -> Result<(TcpLink, TcpLink), ConnectError> {
        let config = &self.config;
        let io_err = |err: io::Error| ConnectError::from_io(label, err, config.connect_timeout);

        let addrs: Vec<SocketAddr> = (config.host.as_str(), config.port)
            .to_socket_addrs()
            .map_err(|source| ConnectError::NotFound {
                target: label.to_string(),
                source,
            })?
            .collect();
        let stream = connect_any(&addrs, config.connect_timeout).map_err(io_err)?;
        stream.set_nodelay(true).map_err(io_err)?;
        stream
            .set_write_timeout(Some(config.connect_timeout))
            .map_err(io_err)?;

        if config.use_tls {
            stream
                .set_read_timeout(Some(config.connect_timeout))
                .map_err(io_err)?;
            let tls = tls::handshake(label, &config.host, stream)?;
            tls.set_read_timeout(Some(config.read_timeout.min(TLS_READ_POLL)))
                .map_err(io_err)?;
            Ok((TcpLink::Tls(tls.clone()), TcpLink::Tls(tls)))
        } else {
            stream
                .set_read_timeout(Some(config.read_timeout))
                .map_err(io_err)?;
            let reader = stream.try_clone().map_err(io_err)?;
            Ok((TcpLink::Plain(stream), TcpLink::Plain(reader)))
        }
    }

    fn reader_exited(self: &Arc<Self>, exit: ReaderExit) {
        if matches!(exit, ReaderExit::Stopped) {
            return;
        }
        let message = format!("{}: {}", self.label(), exit.describe());
        if self.config.auto_reconnect && !self.closed_by_user.load(Ordering::Acquire) {
            warn!("{message}; reconnecting");
            self.start_supervisor(message);
        } else {
            warn!("{message}");
            self.hooks.event(ConnectionEvent::new(
                EventKind::ConnectionLost,
                TransportKind::Tcp,
                message,
            ));
        }
    }

    fn start_supervisor(self: &Arc<Self>, reason: String) {
        let stop = {
            let mut supervisor = lock(&self.supervisor);
            if supervisor.as_ref().is_some_and(|stop| !stop.is_cancelled()) {
                return;
            }
            let stop = CancelToken::new();
            *supervisor = Some(stop.clone());
            stop
        };

        let weak = Arc::downgrade(self);
        let thread_stop = stop.clone();
        let spawned = thread::Builder::new()
            .name("displink-tcp-reconnect".to_string())
            .spawn(move || supervise(weak, thread_stop));
        if let Err(err) = spawned {
            error!(error = %err, "failed to start reconnect supervisor");
            self.finish_supervisor(&stop);
            self.hooks.event(ConnectionEvent::new(
                EventKind::ConnectionLost,
                TransportKind::Tcp,
                reason,
            ));
        }
    }

    fn finish_supervisor(&self, stop: &CancelToken) {
        let mut supervisor = lock(&self.supervisor);
        if supervisor.as_ref().is_some_and(|current| current.same_as(stop)) {
            *supervisor = None;
        }
    }
}

fn connect_any(addrs: &[SocketAddr], timeout: Duration) -> io::Result<TcpStream> {
    let mut last_err = None;
    for addr in addrs {
        match TcpStream::connect_timeout(addr, timeout) {
            Ok(stream) => return Ok(stream),
            Err(err) => {
                debug!(%addr, error = %err, "connect attempt failed");
                last_err = Some(err);
            }
        }
    }
    Err(last_err.unwrap_or_else(|| {
        io::Error::new(io::ErrorKind::NotFound, "host resolved to no addresses")
    }))
}

/// Reconnect loop for one loss episode.
fn supervise(weak: Weak<TcpInner>, stop: CancelToken) {
    for attempt in 1..=MAX_AUTO_RECONNECT_ATTEMPTS {
        let delay = backoff_delay(attempt);
        {
            let Some(inner) = weak.upgrade() else { return };
            if stop.is_cancelled() {
                break;
            }
            inner.stats.record_reconnect_attempt();
            info!(
                address = %inner.config.address(),
                attempt,
                ?delay,
                "scheduling reconnect"
            );
            inner.hooks.event(ConnectionEvent::new(
                EventKind::Reconnecting,
                TransportKind::Tcp,
                format!("attempt {attempt}/{MAX_AUTO_RECONNECT_ATTEMPTS} in {delay:?}"),
            ));
        }

        if stop.wait_timeout(delay) {
            break;
        }

        let Some(inner) = weak.upgrade() else { return };
        let result = {
            let _transition = lock(&inner.transition);
            if stop.is_cancelled() {
                break;
            }
            inner.open_locked()
        };
        match result {
            Ok(()) => {
                inner.finish_supervisor(&stop);
                info!(address = %inner.config.address(), attempt, "reconnected");
                inner.hooks.event(ConnectionEvent::new(
                    EventKind::Reconnected,
                    TransportKind::Tcp,
                    format!("{} after {attempt} attempt(s)", inner.label()),
                ));
                return;
            }
            Err(err) => warn!(attempt, error = %err, "reconnect attempt failed"),
        }
    }

    let Some(inner) = weak.upgrade() else { return };
    inner.finish_supervisor(&stop);
    if !stop.is_cancelled() {
        error!(address = %inner.config.address(), "giving up on reconnect");
        inner.hooks.event(ConnectionEvent::new(
            EventKind::Disconnected,
            TransportKind::Tcp,
            format!(
                "{}: gave up after {MAX_AUTO_RECONNECT_ATTEMPTS} attempts",
                inner.label()
            ),
        ));
    }
}

impl Transport for TcpTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Tcp
    }

    fn connect(&self) -> Result<(), ConnectError> {
        self.inner.config.validate()?;
        self.inner.cancel_supervisor();
        self.inner.closed_by_user.store(false, Ordering::Release);
        let _transition = lock(&self.inner.transition);
        self.inner.open_locked()
    }

    fn send(&self, payload: &[u8], max_attempts: u32) -> Result<(), SendError> {
        let inner = &self.inner;
        let outcome = {
            let _gate = lock(&inner.send_gate);
            let session = inner
                .current()
                .filter(|session| session.is_usable())
                .ok_or(SendError::NotConnected)?;
            session.send(payload, max_attempts, &inner.stats)
        };
        outcome.finish(&inner.hooks)
    }

    fn is_connected(&self) -> bool {
        self.inner
            .current()
            .is_some_and(|session| session.is_usable())
    }

    fn is_reconnecting(&self) -> bool {
        let inner = &self.inner;
        if lock(&inner.supervisor).is_some() {
            return true;
        }
        // The reader is gone but its exit hook has not started the
        // supervisor yet.
        inner.config.auto_reconnect
            && !inner.closed_by_user.load(Ordering::Acquire)
            && inner
                .current()
                .is_some_and(|session| session.reader_lost())
    }

    fn disconnect(&self) {
        let inner = &self.inner;
        inner.closed_by_user.store(true, Ordering::Release);
        inner.cancel_supervisor();
        let _transition = lock(&inner.transition);
        inner.close_session();
    }

    fn describe(&self) -> String {
        self.inner.label()
    }

    fn stats(&self) -> ConnectionStats {
        self.inner.stats.snapshot()
    }

    fn reset_stats(&self) {
        let _gate = lock(&self.inner.send_gate);
        self.inner.stats.reset();
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        self.disconnect();
    }
}
