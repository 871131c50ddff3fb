use std::io::{self, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::cancel::CancelToken;
use crate::error::ReadError;
use crate::event::TransportHooks;
use crate::lock;
use crate::stats::StatsCounters;
use crate::traits::TransportKind;

const READ_BUFFER_SIZE: usize = 4 * 1024;

/// How long `disconnect` waits for a reader before detaching it.
pub const READER_JOIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Why a reader loop ended.
#[derive(Debug)]
pub enum ReaderExit {
    /// The owner asked the reader to stop.
    Stopped,
    /// The peer closed the stream.
    Eof,
    /// A non-transient I/O error.
    Failed(io::Error),
}

impl ReaderExit {
    pub fn describe(&self) -> String {
        match self {
            ReaderExit::Stopped => "reader stopped".to_string(),
            ReaderExit::Eof => "connection closed by peer".to_string(),
            ReaderExit::Failed(err) => format!("read failed: {err}"),
        }
    }
}

/// Everything the reader thread needs besides the stream itself.
#[derive(Clone)]
pub(crate) struct ReaderContext {
    pub kind: TransportKind,
    pub label: String,
    pub stats: Arc<StatsCounters>,
    pub hooks: TransportHooks,
}

/// Owner's side of a running reader thread.
#[derive(Debug)]
pub(crate) struct ReaderHandle {
    stop: CancelToken,
    alive: Arc<AtomicBool>,
    done: Mutex<Option<mpsc::Receiver<()>>>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl ReaderHandle {
    /// True until the read loop has returned.
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// True once the owner asked the reader to stop.
    pub fn stop_requested(&self) -> bool {
        self.stop.is_cancelled()
    }

    pub fn signal_stop(&self) {
        self.stop.cancel();
    }

    /// Wait for the loop to finish. Returns `false` if the reader was still
    /// running at the deadline; it is then left to finish on its own.
    pub fn wait(&self, timeout: Duration) -> bool {
        let done = lock(&self.done).take();
        let exited = match done {
            Some(rx) => match rx.recv_timeout(timeout) {
                Ok(()) | Err(RecvTimeoutError::Disconnected) => true,
                Err(RecvTimeoutError::Timeout) => false,
            },
            None => !self.is_alive(),
        };

        let thread = lock(&self.thread).take();
        if let Some(thread) = thread {
            if exited && thread.is_finished() {
                let _ = thread.join();
            } else if !exited {
                warn!(?timeout, "reader did not stop in time; detaching");
            }
        }
        exited
    }
}

/// Start the background read loop over `source`.
///
/// `on_exit` runs on the reader thread after the loop has finished and the
/// handle already reports the reader as gone.
pub(crate) fn spawn_reader<R, F>(
    name: String,
    source: R,
    ctx: ReaderContext,
    on_exit: F,
) -> io::Result<ReaderHandle>
where
    R: Read + Send + 'static,
    F: FnOnce(ReaderExit) + Send + 'static,
{
    let stop = CancelToken::new();
    let alive = Arc::new(AtomicBool::new(true));
    let (done_tx, done_rx) = mpsc::channel();

    let thread_stop = stop.clone();
    let thread_alive = alive.clone();
    let thread = thread::Builder::new().name(name).spawn(move || {
        debug!(target_label = %ctx.label, "reader started");
        let exit = read_loop(source, &ctx, &thread_stop);
        debug!(target_label = %ctx.label, exit = %exit.describe(), "reader finished");
        thread_alive.store(false, Ordering::Release);
        let _ = done_tx.send(());
        on_exit(exit);
    })?;

    Ok(ReaderHandle {
        stop,
        alive,
        done: Mutex::new(Some(done_rx)),
        thread: Mutex::new(Some(thread)),
    })
}

fn read_loop<R: Read>(mut source: R, ctx: &ReaderContext, stop: &CancelToken) -> ReaderExit {
    let mut buf = [0u8; READ_BUFFER_SIZE];
    loop {
        if stop.is_cancelled() {
            return ReaderExit::Stopped;
        }

        match source.read(&mut buf) {
            Ok(0) => {
                if stop.is_cancelled() {
                    return ReaderExit::Stopped;
                }
                info!(target_label = %ctx.label, "connection closed by peer");
                return ReaderExit::Eof;
            }
            Ok(n) => {
                let chunk = &buf[..n];
                ctx.stats.record_received(n);
                debug!("{} << {}", ctx.label, escape_for_log(chunk));
                ctx.hooks.data(ctx.kind, chunk);
            }
            Err(err) => match ReadError::classify(err) {
                ReadError::Timeout => continue,
                ReadError::Fatal(err) => {
                    if stop.is_cancelled() {
                        return ReaderExit::Stopped;
                    }
                    let message = format!("{}: read error: {err}", ctx.label);
                    error!("{message}");
                    ctx.hooks.error(ctx.kind, &message);
                    return ReaderExit::Failed(err);
                }
            },
        }
    }
}

/// Render received bytes for a log line: lossy UTF-8 with control characters
/// spelled out, so `\r\n` shows up literally.
pub fn escape_for_log(data: &[u8]) -> String {
    let text = String::from_utf8_lossy(data);
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\r' => out.push_str("\\r"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => out.push_str(&format!("\\x{:02X}", c as u32)),
            c => out.push(c),
        }
    }
    out
}
