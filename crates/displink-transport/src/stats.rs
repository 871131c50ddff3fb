use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Point-in-time copy of transfer counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ConnectionStats {
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub successful_sends: u64,
    pub failed_sends: u64,
    pub reconnect_attempts: u64,
}

impl ConnectionStats {
    /// Percentage of sends that succeeded; 100.0 before the first send.
    pub fn success_rate(&self) -> f64 {
        let total = self.successful_sends + self.failed_sends;
        if total == 0 {
            100.0
        } else {
            self.successful_sends as f64 * 100.0 / total as f64
        }
    }
}

impl fmt::Display for ConnectionStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "sent={} received={} success={:.1}% errors={} reconnects={}",
            self.bytes_sent,
            self.bytes_received,
            self.success_rate(),
            self.failed_sends,
            self.reconnect_attempts
        )
    }
}

/// Live counters shared between a sender and its reader.
///
/// Each field is only incremented by the operation that owns it; callers
/// see them through [`StatsCounters::snapshot`].
#[derive(Debug, Default)]
pub struct StatsCounters {
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
    successful_sends: AtomicU64,
    failed_sends: AtomicU64,
    reconnect_attempts: AtomicU64,
}

impl StatsCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_send(&self, bytes: usize) {
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
        self.successful_sends.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_send_failure(&self) {
        self.failed_sends.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_received(&self, bytes: usize) {
        self.bytes_received
            .fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_reconnect_attempt(&self) {
        self.reconnect_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ConnectionStats {
        ConnectionStats {
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            successful_sends: self.successful_sends.load(Ordering::Relaxed),
            failed_sends: self.failed_sends.load(Ordering::Relaxed),
            reconnect_attempts: self.reconnect_attempts.load(Ordering::Relaxed),
        }
    }

    /// Zero every counter. Callers hold their send lock while doing this.
    pub fn reset(&self) {
        self.bytes_sent.store(0, Ordering::Relaxed);
        self.bytes_received.store(0, Ordering::Relaxed);
        self.successful_sends.store(0, Ordering::Relaxed);
        self.failed_sends.store(0, Ordering::Relaxed);
        self.reconnect_attempts.store(0, Ordering::Relaxed);
    }
}
