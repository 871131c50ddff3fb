use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::thread::{self, JoinHandle};

use displink_transport::{
    CancelToken, ConnectError, ConnectionEvent, ConnectionStats, EventKind, SendError,
    SerialConfig, SerialTransport, StatsCounters, TcpConfig, TcpTransport, Transport,
    TransportHooks, TransportKind,
};
use tracing::{debug, error, info, warn};

use crate::config::ManagerConfig;
use crate::listeners::{DataListener, EventListener, ListenerId, ListenerSet};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn same_transport(a: &Arc<dyn Transport>, b: &Arc<dyn Transport>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

#[derive(Clone)]
struct Active {
    transport: Arc<dyn Transport>,
    kind: TransportKind,
}

struct Inner {
    config: ManagerConfig,
    /// Serializes every change of the active transport.
    transition: Mutex<()>,
    active: Mutex<Option<Active>>,
    send_gate: Mutex<()>,
    stats: StatsCounters,
    next_listener_id: AtomicU64,
    listeners: ListenerSet<EventListener>,
    data_listeners: ListenerSet<DataListener>,
    /// Stop signal of the pending reconnect episode, if any.
    reconnect: Mutex<Option<CancelToken>>,
    health_stop: CancelToken,
    shut_down: AtomicBool,
}

/// Owns the one active display link and keeps it alive.
///
/// At most one transport is active at a time; connecting a new one tears the
/// previous one down first. A background health check polls the active
/// transport, and a lost link is reconnected according to
/// [`ManagerConfig`]. All state changes are reported to the registered
/// listeners as [`ConnectionEvent`]s.
pub struct ConnectionManager {
    inner: Arc<Inner>,
    health: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionManager {
    pub fn new(config: ManagerConfig) -> Self {
        let interval = config.health_check_interval;
        let inner = Arc::new(Inner {
            config,
            transition: Mutex::new(()),
            active: Mutex::new(None),
            send_gate: Mutex::new(()),
            stats: StatsCounters::new(),
            next_listener_id: AtomicU64::new(1),
            listeners: ListenerSet::new(),
            data_listeners: ListenerSet::new(),
            reconnect: Mutex::new(None),
            health_stop: CancelToken::new(),
            shut_down: AtomicBool::new(false),
        });

        let weak = Arc::downgrade(&inner);
        let stop = inner.health_stop.clone();
        let health = thread::Builder::new()
            .name("displink-health".to_string())
            .spawn(move || health_check(weak, stop, interval));
        let health = match health {
            Ok(handle) => Some(handle),
            Err(err) => {
                error!(error = %err, "failed to start health check; loss is only detected by sends and events");
                None
            }
        };

        Self {
            inner,
            health: Mutex::new(health),
        }
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.inner.config
    }

    /// Hooks that route a transport's background activity into this manager.
    fn hooks(&self) -> TransportHooks {
        let on_data = Arc::downgrade(&self.inner);
        let on_event = Arc::downgrade(&self.inner);
        TransportHooks::new()
            .on_data(move |kind, data| {
                if let Some(inner) = on_data.upgrade() {
                    inner.stats.record_received(data.len());
                    inner
                        .data_listeners
                        .notify("data", |listener| listener(kind, data));
                }
            })
            .on_event(move |event| {
                if let Some(inner) = on_event.upgrade() {
                    inner.transport_event(event);
                }
            })
    }

    /// Open a serial link and make it the active transport.
    pub fn connect_serial(&self, config: SerialConfig) -> Result<(), ConnectError> {
        let transport = SerialTransport::with_hooks(config, self.hooks());
        self.connect_transport(Arc::new(transport))
    }

    /// Open a TCP link and make it the active transport.
    pub fn connect_tcp(&self, config: TcpConfig) -> Result<(), ConnectError> {
        let transport = TcpTransport::with_hooks(config, self.hooks());
        self.connect_transport(Arc::new(transport))
    }

    /// Connect `transport` and make it the active one.
    ///
    /// A transport built elsewhere does not feed inbound data or its own loss
    /// notifications to this manager; the health check still watches it.
    pub fn connect_transport(&self, transport: Arc<dyn Transport>) -> Result<(), ConnectError> {
        self.inner.connect_transport(transport)
    }

    pub fn send(&self, payload: &[u8]) -> Result<(), SendError> {
        self.send_with_attempts(payload, self.inner.config.default_send_attempts)
    }

    pub fn send_text(&self, text: &str) -> Result<(), SendError> {
        self.send(text.as_bytes())
    }

    pub fn send_with_attempts(&self, payload: &[u8], max_attempts: u32) -> Result<(), SendError> {
        self.inner.send(payload, max_attempts)
    }

    /// Ask the active transport whether it is still up. A transport found
    /// down starts connection-loss handling.
    pub fn is_connected(&self) -> bool {
        self.inner.is_connected()
    }

    pub fn active_kind(&self) -> TransportKind {
        self.inner
            .active()
            .map_or(TransportKind::None, |active| active.kind)
    }

    /// Description of the active transport.
    pub fn describe(&self) -> Option<String> {
        self.inner
            .active()
            .map(|active| active.transport.describe())
    }

    /// True while a reconnect episode is pending.
    pub fn is_reconnecting(&self) -> bool {
        lock(&self.inner.reconnect).is_some()
    }

    /// Tear down the active transport and any pending reconnect.
    pub fn disconnect_all(&self) {
        self.inner.disconnect_all();
    }

    pub fn add_listener(
        &self,
        listener: impl Fn(&ConnectionEvent) + Send + Sync + 'static,
    ) -> ListenerId {
        let id = self.inner.next_listener_id();
        self.inner.listeners.insert(id, Arc::new(listener));
        id
    }

    /// Receive every chunk read by transports this manager opened.
    pub fn add_data_listener(
        &self,
        listener: impl Fn(TransportKind, &[u8]) + Send + Sync + 'static,
    ) -> ListenerId {
        let id = self.inner.next_listener_id();
        self.inner.data_listeners.insert(id, Arc::new(listener));
        id
    }

    /// Remove an event or data listener. Returns `false` if it was not
    /// registered.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.inner.listeners.remove(id) || self.inner.data_listeners.remove(id)
    }

    pub fn listener_count(&self) -> usize {
        self.inner.listeners.len() + self.inner.data_listeners.len()
    }

    pub fn stats(&self) -> ConnectionStats {
        self.inner.stats.snapshot()
    }

    pub fn reset_stats(&self) {
        let _gate = lock(&self.inner.send_gate);
        self.inner.stats.reset();
    }

    /// Stop the health check, cancel reconnects and disconnect. Safe to call
    /// more than once.
    pub fn shutdown(&self) {
        if self.inner.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("shutting down connection manager");
        self.inner.health_stop.cancel();
        if let Some(handle) = lock(&self.health).take() {
            // A listener may call shutdown from the health thread itself.
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
        self.inner.disconnect_all();
    }
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new(ManagerConfig::default())
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl Inner {
    fn next_listener_id(&self) -> ListenerId {
        ListenerId(self.next_listener_id.fetch_add(1, Ordering::Relaxed))
    }

    fn active(&self) -> Option<Active> {
        lock(&self.active).clone()
    }

    fn emit(&self, event: ConnectionEvent) {
        debug!(%event, "connection event");
        self.listeners.notify("event", |listener| listener(&event));
    }

    /// Cancel the pending reconnect episode. Caller holds the transition lock.
    fn cancel_reconnect(&self) {
        if let Some(stop) = lock(&self.reconnect).take() {
            debug!("cancelling pending reconnect");
            stop.cancel();
        }
    }

    fn connect_transport(self: &Arc<Self>, transport: Arc<dyn Transport>) -> Result<(), ConnectError> {
        let kind = transport.kind();
        let label = transport.describe();
        let (previous, result) = {
            let _transition = lock(&self.transition);
            self.cancel_reconnect();
            let previous = lock(&self.active).take();
            if let Some(previous) = &previous {
                info!(target_label = %previous.transport.describe(), "replacing active transport");
                previous.transport.disconnect();
            }
            let result = transport.connect();
            if result.is_ok() {
                *lock(&self.active) = Some(Active {
                    transport: transport.clone(),
                    kind,
                });
            }
            (previous, result)
        };

        if let Some(previous) = previous {
            self.emit(ConnectionEvent::new(
                EventKind::Disconnected,
                previous.kind,
                format!("{} replaced by {label}", previous.transport.describe()),
            ));
        }
        match &result {
            Ok(()) => {
                info!(target_label = %label, "connected");
                self.emit(ConnectionEvent::new(EventKind::Connected, kind, label));
            }
            Err(err) => error!(target_label = %label, error = %err, "connect failed"),
        }
        result
    }

    fn send(self: &Arc<Self>, payload: &[u8], max_attempts: u32) -> Result<(), SendError> {
        let Some(active) = self.active() else {
            warn!(bytes = payload.len(), "send without an active connection");
            return Err(SendError::NotConnected);
        };
        // No manager lock across this call: the transport may raise loss
        // events from inside it.
        let result = active.transport.send(payload, max_attempts);
        {
            let _gate = lock(&self.send_gate);
            match &result {
                Ok(()) => self.stats.record_send(payload.len()),
                Err(_) => self.stats.record_send_failure(),
            }
        }

        match &result {
            Ok(()) => self.emit(ConnectionEvent::new(
                EventKind::SendSuccess,
                active.kind,
                format!("{} bytes", payload.len()),
            )),
            Err(err) => {
                self.emit(ConnectionEvent::new(
                    EventKind::SendFailure,
                    active.kind,
                    err.to_string(),
                ));
                if !active.transport.is_connected() && !active.transport.is_reconnecting() {
                    self.handle_loss(&active.transport, &format!("send failed: {err}"));
                }
            }
        }
        result
    }

    fn is_connected(self: &Arc<Self>) -> bool {
        let Some(active) = self.active() else {
            return false;
        };
        if active.transport.is_connected() {
            return true;
        }
        if !active.transport.is_reconnecting() {
            self.handle_loss(&active.transport, "transport reports disconnected");
        }
        false
    }

    fn disconnect_all(&self) {
        let previous = {
            let _transition = lock(&self.transition);
            self.cancel_reconnect();
            let previous = lock(&self.active).take();
            if let Some(previous) = &previous {
                previous.transport.disconnect();
            }
            previous
        };
        if let Some(previous) = previous {
            let label = previous.transport.describe();
            info!(target_label = %label, "disconnected");
            self.emit(ConnectionEvent::new(
                EventKind::Disconnected,
                previous.kind,
                label,
            ));
        }
    }

    /// Events a transport raises on its own threads.
    fn transport_event(self: &Arc<Self>, event: ConnectionEvent) {
        match event.kind {
            EventKind::ConnectionLost => {
                if let Some(active) = self.active() {
                    if !active.transport.is_connected() && !active.transport.is_reconnecting() {
                        self.handle_loss(&active.transport, &event.message);
                    }
                }
            }
            EventKind::Reconnecting => {
                self.stats.record_reconnect_attempt();
                self.emit(event);
            }
            EventKind::Disconnected => {
                // The transport gave up its own reconnect sequence.
                self.emit(event);
                if let Some(active) = self.active() {
                    if !active.transport.is_connected() && !active.transport.is_reconnecting() {
                        self.release(&active.transport);
                    }
                }
            }
            _ => self.emit(event),
        }
    }

    /// Drop `lost` from the active slot without starting a new episode.
    fn release(&self, lost: &Arc<dyn Transport>) {
        let _transition = lock(&self.transition);
        let mut active = lock(&self.active);
        if active
            .as_ref()
            .is_some_and(|current| same_transport(&current.transport, lost))
        {
            *active = None;
        }
    }

    /// Connection-loss handling for `lost`, if it is still the active
    /// transport. Raises `ConnectionLost` once per episode.
    fn handle_loss(self: &Arc<Self>, lost: &Arc<dyn Transport>, reason: &str) {
        let episode = {
            let _transition = lock(&self.transition);
            let mut active = lock(&self.active);
            let Some(current) = active.as_ref() else {
                return;
            };
            if !same_transport(&current.transport, lost) {
                return;
            }
            let Some(current) = active.take() else {
                return;
            };
            drop(active);

            let stop = (self.config.auto_reconnect
                && self.config.max_reconnect_attempts > 0
                && !self.shut_down.load(Ordering::Acquire))
            .then(|| {
                let stop = CancelToken::new();
                *lock(&self.reconnect) = Some(stop.clone());
                stop
            });
            (current, stop)
        };

        let (current, stop) = episode;
        warn!(target_label = %current.transport.describe(), reason, "connection lost");
        current.transport.disconnect();
        self.emit(ConnectionEvent::new(
            EventKind::ConnectionLost,
            current.kind,
            format!("{}: {reason}", current.transport.describe()),
        ));

        if let Some(stop) = stop {
            let weak = Arc::downgrade(self);
            let thread_stop = stop.clone();
            let kind = current.kind;
            let transport = current.transport;
            let spawned = thread::Builder::new()
                .name("displink-reconnect".to_string())
                .spawn(move || reconnect_episode(weak, transport, kind, thread_stop));
            if let Err(err) = spawned {
                error!(error = %err, "failed to start reconnect");
                self.finish_episode(&stop);
                self.emit(ConnectionEvent::new(
                    EventKind::Disconnected,
                    kind,
                    "reconnect could not be started",
                ));
            }
        }
    }

    fn finish_episode(&self, stop: &CancelToken) {
        let mut reconnect = lock(&self.reconnect);
        if reconnect.as_ref().is_some_and(|current| current.same_as(stop)) {
            *reconnect = None;
        }
    }
}

fn health_check(weak: Weak<Inner>, stop: CancelToken, interval: std::time::Duration) {
    debug!(?interval, "health check started");
    while !stop.wait_timeout(interval) {
        let Some(inner) = weak.upgrade() else { break };
        inner.is_connected();
    }
    debug!("health check stopped");
}

/// Supervised reconnect of one lost transport.
fn reconnect_episode(
    weak: Weak<Inner>,
    transport: Arc<dyn Transport>,
    kind: TransportKind,
    stop: CancelToken,
) {
    let (max_attempts, delay) = match weak.upgrade() {
        Some(inner) => (inner.config.max_reconnect_attempts, inner.config.reconnect_delay),
        None => return,
    };
    let label = transport.describe();

    for attempt in 1..=max_attempts {
        if stop.wait_timeout(delay) {
            debug!(target_label = %label, "reconnect cancelled");
            return;
        }
        let Some(inner) = weak.upgrade() else { return };
        inner.stats.record_reconnect_attempt();
        info!(target_label = %label, attempt, max_attempts, "reconnecting");
        inner.emit(ConnectionEvent::new(
            EventKind::Reconnecting,
            kind,
            format!("{label}: attempt {attempt}/{max_attempts}"),
        ));

        match transport.connect() {
            Ok(()) => {
                let activated = {
                    let _transition = lock(&inner.transition);
                    if stop.is_cancelled() {
                        false
                    } else {
                        *lock(&inner.active) = Some(Active {
                            transport: transport.clone(),
                            kind,
                        });
                        inner.finish_episode(&stop);
                        true
                    }
                };
                if activated {
                    info!(target_label = %label, attempt, "reconnected");
                    inner.emit(ConnectionEvent::new(
                        EventKind::Reconnected,
                        kind,
                        format!("{label} after {attempt} attempt(s)"),
                    ));
                } else {
                    // Superseded while connecting.
                    transport.disconnect();
                }
                return;
            }
            Err(err) => warn!(target_label = %label, attempt, error = %err, "reconnect failed"),
        }
    }

    let Some(inner) = weak.upgrade() else { return };
    let exhausted = {
        let _transition = lock(&inner.transition);
        let current = !stop.is_cancelled();
        inner.finish_episode(&stop);
        current
    };
    if exhausted {
        error!(target_label = %label, max_attempts, "giving up on reconnect");
        inner.emit(ConnectionEvent::new(
            EventKind::Disconnected,
            kind,
            format!("{label}: gave up after {max_attempts} attempt(s)"),
        ));
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::io;
    use std::sync::atomic::AtomicU32;
    use std::time::{Duration, Instant};

    use super::*;

    /// In-memory transport with scripted connect outcomes and write failures.
    struct MockTransport {
        kind: TransportKind,
        name: String,
        up: AtomicBool,
        connect_failures: Mutex<VecDeque<bool>>,
        write_failures: AtomicU32,
        connects: AtomicU32,
        disconnects: AtomicU32,
        sent: Mutex<Vec<Vec<u8>>>,
        stats: StatsCounters,
        /// Set to make a failed write drop the link and report it.
        hooks: Mutex<Option<TransportHooks>>,
    }

    impl MockTransport {
        fn new(name: &str) -> Arc<Self> {
            Arc::new(Self {
                kind: TransportKind::Tcp,
                name: name.to_string(),
                up: AtomicBool::new(false),
                connect_failures: Mutex::new(VecDeque::new()),
                write_failures: AtomicU32::new(0),
                connects: AtomicU32::new(0),
                disconnects: AtomicU32::new(0),
                sent: Mutex::new(Vec::new()),
                stats: StatsCounters::new(),
                hooks: Mutex::new(None),
            })
        }

        /// Outcomes for the next connects: `true` fails.
        fn script_connects(&self, failures: &[bool]) {
            lock(&self.connect_failures).extend(failures.iter().copied());
        }

        fn drop_link(&self) {
            self.up.store(false, Ordering::SeqCst);
        }
    }

    impl Transport for MockTransport {
        fn kind(&self) -> TransportKind {
            self.kind
        }

        fn connect(&self) -> Result<(), ConnectError> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            if lock(&self.connect_failures).pop_front().unwrap_or(false) {
                self.up.store(false, Ordering::SeqCst);
                return Err(ConnectError::NotFound {
                    target: self.name.clone(),
                    source: io::Error::from(io::ErrorKind::ConnectionRefused),
                });
            }
            self.up.store(true, Ordering::SeqCst);
            Ok(())
        }

        fn send(&self, payload: &[u8], max_attempts: u32) -> Result<(), SendError> {
            if !self.up.load(Ordering::SeqCst) {
                return Err(SendError::NotConnected);
            }
            let max_attempts = max_attempts.max(1);
            for attempt in 1..=max_attempts {
                let failing = self
                    .write_failures
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                    .is_ok();
                if !failing {
                    lock(&self.sent).push(payload.to_vec());
                    self.stats.record_send(payload.len());
                    return Ok(());
                }
                if attempt == max_attempts {
                    break;
                }
            }
            self.stats.record_send_failure();
            let hooks = lock(&self.hooks).clone();
            if let Some(hooks) = hooks {
                self.up.store(false, Ordering::SeqCst);
                hooks.event(ConnectionEvent::new(
                    EventKind::ConnectionLost,
                    self.kind,
                    format!("{}: broken pipe", self.describe()),
                ));
            }
            Err(SendError::Write {
                attempts: max_attempts,
                source: io::Error::from(io::ErrorKind::BrokenPipe),
            })
        }

        fn is_connected(&self) -> bool {
            self.up.load(Ordering::SeqCst)
        }

        fn disconnect(&self) {
            self.disconnects.fetch_add(1, Ordering::SeqCst);
            self.up.store(false, Ordering::SeqCst);
        }

        fn describe(&self) -> String {
            format!("mock://{}", self.name)
        }

        fn stats(&self) -> ConnectionStats {
            self.stats.snapshot()
        }

        fn reset_stats(&self) {
            self.stats.reset();
        }
    }

    fn quiet_config() -> ManagerConfig {
        ManagerConfig::default()
            .with_health_check_interval(Duration::from_secs(3600))
            .with_auto_reconnect(false)
    }

    fn record_events(manager: &ConnectionManager) -> Arc<Mutex<Vec<EventKind>>> {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        manager.add_listener(move |event| lock(&sink).push(event.kind));
        events
    }

    fn count(events: &Mutex<Vec<EventKind>>, kind: EventKind) -> usize {
        lock(events).iter().filter(|k| **k == kind).count()
    }

    fn wait_for(condition: impl Fn() -> bool, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        condition()
    }

    #[test]
    fn send_without_connection_fails_fast() {
        let manager = ConnectionManager::new(quiet_config());
        assert!(matches!(manager.send(b"x"), Err(SendError::NotConnected)));
        assert!(matches!(
            manager.send_text("hello"),
            Err(SendError::NotConnected)
        ));
        assert_eq!(manager.stats(), ConnectionStats::default());
        assert_eq!(manager.active_kind(), TransportKind::None);
    }

    #[test]
    fn connect_activates_transport() {
        let manager = ConnectionManager::new(quiet_config());
        let events = record_events(&manager);
        let mock = MockTransport::new("a");

        manager
            .connect_transport(mock.clone())
            .expect("connect should succeed");

        assert!(manager.is_connected());
        assert_eq!(manager.active_kind(), TransportKind::Tcp);
        assert_eq!(manager.describe().as_deref(), Some("mock://a"));
        assert_eq!(lock(&events).as_slice(), &[EventKind::Connected]);
    }

    #[test]
    fn failed_connect_leaves_manager_disconnected() {
        let manager = ConnectionManager::new(quiet_config());
        let mock = MockTransport::new("a");
        mock.script_connects(&[true]);

        assert!(manager.connect_transport(mock.clone()).is_err());
        assert!(!manager.is_connected());
        assert_eq!(manager.active_kind(), TransportKind::None);
        assert_eq!(manager.stats().reconnect_attempts, 0);
    }

    #[cfg(unix)]
    #[test]
    fn bad_serial_port_leaves_manager_disconnected() {
        let manager = ConnectionManager::new(quiet_config());
        let result = manager.connect_serial(SerialConfig::new("/dev/displink-missing-port", 19_200));
        assert!(result.is_err());
        assert!(!manager.is_connected());
        assert_eq!(manager.stats().reconnect_attempts, 0);
    }

    #[test]
    fn connecting_replaces_previous_transport() {
        let manager = ConnectionManager::new(quiet_config());
        let events = record_events(&manager);
        let first = MockTransport::new("first");
        let second = MockTransport::new("second");

        manager.connect_transport(first.clone()).expect("first");
        manager.connect_transport(second.clone()).expect("second");

        assert_eq!(first.disconnects.load(Ordering::SeqCst), 1);
        assert!(!first.is_connected());
        assert_eq!(manager.describe().as_deref(), Some("mock://second"));
        assert_eq!(
            lock(&events).as_slice(),
            &[
                EventKind::Connected,
                EventKind::Disconnected,
                EventKind::Connected
            ]
        );
    }

    #[test]
    fn retried_send_counts_one_success() {
        let manager = ConnectionManager::new(quiet_config());
        let mock = MockTransport::new("a");
        manager.connect_transport(mock.clone()).expect("connect");
        mock.write_failures.store(2, Ordering::SeqCst);

        manager
            .send_with_attempts(b"frame", 3)
            .expect("third attempt should succeed");

        let stats = manager.stats();
        assert_eq!(stats.successful_sends, 1);
        assert_eq!(stats.failed_sends, 0);
        assert_eq!(stats.bytes_sent, 5);
        assert_eq!(lock(&mock.sent).len(), 1);
    }

    #[test]
    fn failed_send_on_dead_link_raises_loss() {
        let manager = ConnectionManager::new(quiet_config());
        let events = record_events(&manager);
        let mock = MockTransport::new("a");
        manager.connect_transport(mock.clone()).expect("connect");
        mock.drop_link();

        assert!(manager.send(b"x").is_err());

        assert_eq!(manager.stats().failed_sends, 1);
        assert_eq!(count(&events, EventKind::SendFailure), 1);
        assert_eq!(count(&events, EventKind::ConnectionLost), 1);
        assert_eq!(manager.active_kind(), TransportKind::None);
        assert_eq!(mock.disconnects.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn loss_is_reported_exactly_once() {
        let manager = ConnectionManager::new(quiet_config());
        let events = record_events(&manager);
        let mock = MockTransport::new("a");
        manager.connect_transport(mock.clone()).expect("connect");

        mock.drop_link();
        assert!(!manager.is_connected());
        assert!(!manager.is_connected());

        assert_eq!(count(&events, EventKind::ConnectionLost), 1);
        assert_eq!(manager.active_kind(), TransportKind::None);
        assert_eq!(mock.disconnects.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn health_check_detects_loss() {
        let manager = ConnectionManager::new(
            quiet_config().with_health_check_interval(Duration::from_millis(20)),
        );
        let events = record_events(&manager);
        let mock = MockTransport::new("a");
        manager.connect_transport(mock.clone()).expect("connect");

        mock.drop_link();
        assert!(wait_for(
            || count(&events, EventKind::ConnectionLost) == 1,
            Duration::from_secs(2)
        ));
        thread::sleep(Duration::from_millis(100));
        assert_eq!(count(&events, EventKind::ConnectionLost), 1);
    }

    #[test]
    fn supervised_reconnect_reactivates_transport() {
        let manager = ConnectionManager::new(
            quiet_config()
                .with_auto_reconnect(true)
                .with_reconnect(3, Duration::from_millis(10)),
        );
        let events = record_events(&manager);
        let mock = MockTransport::new("a");
        manager.connect_transport(mock.clone()).expect("connect");

        mock.script_connects(&[true, false]);
        mock.drop_link();
        assert!(!manager.is_connected());

        assert!(wait_for(
            || count(&events, EventKind::Reconnected) == 1,
            Duration::from_secs(2)
        ));
        assert_eq!(
            lock(&events).as_slice(),
            &[
                EventKind::Connected,
                EventKind::ConnectionLost,
                EventKind::Reconnecting,
                EventKind::Reconnecting,
                EventKind::Reconnected,
            ]
        );
        assert!(manager.is_connected());
        assert!(!manager.is_reconnecting());
        assert_eq!(manager.active_kind(), TransportKind::Tcp);
        assert_eq!(manager.stats().reconnect_attempts, 2);
    }

    #[test]
    fn reconnect_exhaustion_ends_episode() {
        let manager = ConnectionManager::new(
            quiet_config()
                .with_auto_reconnect(true)
                .with_reconnect(3, Duration::from_millis(10)),
        );
        let events = record_events(&manager);
        let mock = MockTransport::new("a");
        manager.connect_transport(mock.clone()).expect("connect");

        mock.script_connects(&[true, true, true]);
        mock.drop_link();
        assert!(!manager.is_connected());

        assert!(wait_for(
            || count(&events, EventKind::Disconnected) == 1,
            Duration::from_secs(2)
        ));
        assert_eq!(count(&events, EventKind::Reconnecting), 3);
        assert_eq!(count(&events, EventKind::Reconnected), 0);
        assert_eq!(mock.connects.load(Ordering::SeqCst), 4);
        assert!(!manager.is_reconnecting());
        assert_eq!(manager.active_kind(), TransportKind::None);
    }

    #[test]
    fn disconnect_all_cancels_pending_reconnect() {
        let manager = ConnectionManager::new(
            quiet_config()
                .with_auto_reconnect(true)
                .with_reconnect(3, Duration::from_secs(10)),
        );
        let events = record_events(&manager);
        let mock = MockTransport::new("a");
        manager.connect_transport(mock.clone()).expect("connect");

        mock.drop_link();
        assert!(!manager.is_connected());
        assert!(manager.is_reconnecting());

        manager.disconnect_all();
        assert!(!manager.is_reconnecting());
        thread::sleep(Duration::from_millis(50));
        assert_eq!(mock.connects.load(Ordering::SeqCst), 1);
        assert_eq!(count(&events, EventKind::Reconnecting), 0);
    }

    #[test]
    fn disconnect_all_twice_is_a_no_op() {
        let manager = ConnectionManager::new(quiet_config());
        let events = record_events(&manager);
        let mock = MockTransport::new("a");
        manager.connect_transport(mock.clone()).expect("connect");

        manager.disconnect_all();
        manager.disconnect_all();

        assert_eq!(count(&events, EventKind::Disconnected), 1);
        assert_eq!(mock.disconnects.load(Ordering::SeqCst), 1);
        assert!(!manager.is_connected());
    }

    #[test]
    fn listener_panic_does_not_stop_delivery() {
        let manager = ConnectionManager::new(quiet_config());
        manager.add_listener(|_| panic!("listener bug"));
        let events = record_events(&manager);

        manager
            .connect_transport(MockTransport::new("a"))
            .expect("connect");
        assert_eq!(lock(&events).as_slice(), &[EventKind::Connected]);
    }

    #[test]
    fn removed_listener_stops_receiving() {
        let manager = ConnectionManager::new(quiet_config());
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let id = manager.add_listener(move |event| lock(&sink).push(event.kind));
        assert_eq!(manager.listener_count(), 1);

        assert!(manager.remove_listener(id));
        assert!(!manager.remove_listener(id));
        manager
            .connect_transport(MockTransport::new("a"))
            .expect("connect");
        assert!(lock(&events).is_empty());
    }

    #[test]
    fn reset_stats_zeroes_counters() {
        let manager = ConnectionManager::new(quiet_config());
        manager
            .connect_transport(MockTransport::new("a"))
            .expect("connect");
        manager.send(b"abc").expect("send");
        assert_eq!(manager.stats().bytes_sent, 3);

        manager.reset_stats();
        assert_eq!(manager.stats(), ConnectionStats::default());
    }

    #[test]
    fn shutdown_is_idempotent() {
        let manager = ConnectionManager::new(quiet_config());
        let mock = MockTransport::new("a");
        manager.connect_transport(mock.clone()).expect("connect");

        let start = Instant::now();
        manager.shutdown();
        manager.shutdown();
        assert!(start.elapsed() < Duration::from_secs(1));
        assert!(!manager.is_connected());
        assert!(!mock.is_connected());
    }

    #[test]
    fn loss_listener_may_call_back_into_manager() {
        let manager = Arc::new(ConnectionManager::new(quiet_config()));
        let events = record_events(&manager);
        let weak = Arc::downgrade(&manager);
        manager.add_listener(move |event| {
            if event.kind == EventKind::ConnectionLost {
                if let Some(manager) = weak.upgrade() {
                    manager.reset_stats();
                    let _ = manager.send(b"again");
                }
            }
        });
        let mock = MockTransport::new("a");
        *lock(&mock.hooks) = Some(manager.hooks());
        manager.connect_transport(mock.clone()).expect("connect");
        mock.write_failures.store(1, Ordering::SeqCst);

        let (done_tx, done_rx) = std::sync::mpsc::channel();
        let sender = manager.clone();
        thread::spawn(move || {
            let _ = done_tx.send(sender.send(b"frame").is_err());
        });

        let failed = done_rx
            .recv_timeout(Duration::from_secs(2))
            .expect("send should return while the listener runs");
        assert!(failed);
        assert_eq!(count(&events, EventKind::ConnectionLost), 1);
        assert_eq!(mock.disconnects.load(Ordering::SeqCst), 1);
        assert_eq!(manager.active_kind(), TransportKind::None);
        lock(&mock.hooks).take();
    }

    #[test]
    fn tcp_peer_close_is_reported_once() {
        use std::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let port = listener.local_addr().expect("addr").port();
        let server = thread::spawn(move || {
            let (stream, _) = listener.accept().expect("accept");
            drop(stream);
        });

        let manager = ConnectionManager::new(
            quiet_config().with_health_check_interval(Duration::from_millis(10)),
        );
        let events = record_events(&manager);
        manager
            .connect_tcp(TcpConfig::new("127.0.0.1", port))
            .expect("connect");
        server.join().expect("server thread");

        assert!(wait_for(
            || count(&events, EventKind::ConnectionLost) >= 1,
            Duration::from_secs(3)
        ));
        thread::sleep(Duration::from_millis(200));
        assert_eq!(count(&events, EventKind::ConnectionLost), 1);
        assert_eq!(manager.active_kind(), TransportKind::None);
        assert!(!manager.is_connected());
    }

    #[test]
    fn tcp_transport_data_reaches_data_listeners() {
        use std::io::Write;
        use std::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let port = listener.local_addr().expect("addr").port();
        let server = thread::spawn(move || {
            let (mut stream, _) = listener.accept().expect("accept");
            stream.write_all(b"READY\r\n").expect("write");
            thread::sleep(Duration::from_millis(300));
        });

        let manager = ConnectionManager::new(quiet_config());
        let (tx, rx) = std::sync::mpsc::channel();
        manager.add_data_listener(move |kind, data| {
            let _ = tx.send((kind, data.to_vec()));
        });
        manager
            .connect_tcp(TcpConfig::new("127.0.0.1", port))
            .expect("connect");

        let (kind, data) = rx
            .recv_timeout(Duration::from_secs(2))
            .expect("data should arrive");
        assert_eq!(kind, TransportKind::Tcp);
        assert_eq!(data, b"READY\r\n");
        assert_eq!(manager.stats().bytes_received, 7);

        manager.disconnect_all();
        server.join().expect("server thread");
    }
}
