use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use tracing::{debug, error, warn};

use crate::error::{is_link_fatal, SendError};
use crate::event::{ConnectionEvent, EventKind, TransportHooks};
use crate::lock;
use crate::reader::{escape_for_log, ReaderHandle};
use crate::stats::StatsCounters;
use crate::traits::TransportKind;

/// Pause between two write attempts of the same payload.
pub const RETRY_PAUSE: Duration = Duration::from_millis(100);

/// Write side of a session.
pub(crate) trait LinkWriter: Write + Send {
    /// Wake a reader blocked on the other half of the link and end the
    /// conversation. Errors are irrelevant at this point.
    fn close(&mut self) {}
}

/// Write and flush `payload`, retrying up to `max_attempts` times with a
/// fixed pause. Zero attempts is treated as one.
///
/// A retry resumes at the first byte the link has not accepted, so a
/// partial write followed by a failure never repeats the prefix.
pub fn write_with_retry<W: Write + ?Sized>(
    writer: &mut W,
    payload: &[u8],
    max_attempts: u32,
    pause: Duration,
) -> Result<(), SendError> {
    let max_attempts = max_attempts.max(1);
    let mut attempt = 1;
    let mut written = 0;
    loop {
        match write_from(writer, payload, &mut written) {
            Ok(()) => return Ok(()),
            Err(err) if attempt < max_attempts => {
                warn!(attempt, max_attempts, written, error = %err, "write failed; retrying");
                thread::sleep(pause);
                attempt += 1;
            }
            Err(err) => {
                return Err(SendError::Write {
                    attempts: attempt,
                    source: err,
                })
            }
        }
    }
}

fn write_from<W: Write + ?Sized>(
    writer: &mut W,
    payload: &[u8],
    written: &mut usize,
) -> io::Result<()> {
    while *written < payload.len() {
        match writer.write(&payload[*written..]) {
            Ok(0) => return Err(io::Error::from(io::ErrorKind::WriteZero)),
            Ok(n) => *written += n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(err) => return Err(err),
        }
    }
    writer.flush()
}

/// Result of one session write whose notifications are still pending.
///
/// Stats are already recorded. The error and link-loss hooks fire from
/// [`SendOutcome::finish`], which callers invoke once their own send locks
/// are released so a listener may call back into the transport.
#[must_use]
pub(crate) struct SendOutcome {
    result: Result<(), SendError>,
    kind: TransportKind,
    error: Option<String>,
    lost: Option<ConnectionEvent>,
}

impl SendOutcome {
    pub fn finish(self, hooks: &TransportHooks) -> Result<(), SendError> {
        if let Some(message) = &self.error {
            hooks.error(self.kind, message);
        }
        if let Some(event) = self.lost {
            hooks.event(event);
        }
        self.result
    }
}

/// One open connection: the writer half plus the reader running on the other.
pub(crate) struct Session<W> {
    kind: TransportKind,
    label: String,
    writer: Mutex<W>,
    reader: ReaderHandle,
    broken: AtomicBool,
}

impl<W: LinkWriter> Session<W> {
    pub fn new(kind: TransportKind, label: String, writer: W, reader: ReaderHandle) -> Self {
        Self {
            kind,
            label,
            writer: Mutex::new(writer),
            reader,
            broken: AtomicBool::new(false),
        }
    }

    /// Open, reader alive, and no fatal write seen.
    pub fn is_usable(&self) -> bool {
        self.reader.is_alive() && !self.broken.load(Ordering::Acquire)
    }

    /// The reader ended without being asked to.
    pub fn reader_lost(&self) -> bool {
        !self.reader.is_alive() && !self.reader.stop_requested()
    }

    pub fn send(&self, payload: &[u8], max_attempts: u32, stats: &StatsCounters) -> SendOutcome {
        let result = {
            let mut writer = lock(&self.writer);
            write_with_retry(&mut *writer, payload, max_attempts, RETRY_PAUSE)
        };
        let mut outcome = SendOutcome {
            result: Ok(()),
            kind: self.kind,
            error: None,
            lost: None,
        };
        match result {
            Ok(()) => {
                stats.record_send(payload.len());
                debug!("{} >> {}", self.label, escape_for_log(payload));
            }
            Err(err) => {
                stats.record_send_failure();
                let message = format!("{}: {err}", self.label);
                error!("{message}");
                if let SendError::Write { source, .. } = &err {
                    if is_link_fatal(source) && !self.broken.swap(true, Ordering::AcqRel) {
                        outcome.lost = Some(ConnectionEvent::new(
                            EventKind::ConnectionLost,
                            self.kind,
                            message.clone(),
                        ));
                    }
                }
                outcome.error = Some(message);
                outcome.result = Err(err);
            }
        }
        outcome
    }

    /// Stop the reader, close the link, and wait a bounded time for the
    /// reader to report exit.
    pub fn close(&self, timeout: Duration) -> bool {
        self.reader.signal_stop();
        lock(&self.writer).close();
        self.reader.wait(timeout)
    }
}

impl LinkWriter for Box<dyn serialport::SerialPort> {}
