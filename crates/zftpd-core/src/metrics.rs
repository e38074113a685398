//! Atomic server-wide counters and a point-in-time snapshot, mirroring the
//! shape of this codebase's other protocol crates' `metrics` modules.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;

#[derive(Default)]
struct Counters {
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
    files_sent: AtomicU64,
    files_received: AtomicU64,
    commands_processed: AtomicU64,
    errors: AtomicU64,
    sessions_accepted: AtomicU64,
    sessions_rejected: AtomicU64,
}

/// Shared, cheaply-cloned handle to the server's aggregate statistics.
#[derive(Clone, Default)]
pub struct Metrics {
    counters: Arc<Counters>,
}

/// A consistent-per-field (not cross-field-atomic) reading of [`Metrics`].
#[derive(Debug, Clone, Copy, Serialize)]
pub struct MetricsSnapshot {
    /// Total bytes sent to clients across all sessions.
    pub bytes_sent: u64,
    /// Total bytes received from clients across all sessions.
    pub bytes_received: u64,
    /// Total files successfully sent (RETR completions).
    pub files_sent: u64,
    /// Total files successfully received (STOR/APPE completions).
    pub files_received: u64,
    /// Total commands dispatched across all sessions.
    pub commands_processed: u64,
    /// Total errors observed across all sessions.
    pub errors: u64,
    /// Total sessions accepted since startup.
    pub sessions_accepted: u64,
    /// Total sessions rejected due to pool exhaustion.
    pub sessions_rejected: u64,
}

impl Metrics {
    /// Create a fresh, zeroed set of counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `n` to the sent-bytes counter.
    pub fn add_bytes_sent(&self, n: u64) {
        self.counters.bytes_sent.fetch_add(n, Ordering::Relaxed);
    }

    /// Add `n` to the received-bytes counter.
    pub fn add_bytes_received(&self, n: u64) {
        self.counters.bytes_received.fetch_add(n, Ordering::Relaxed);
    }

    /// Increment the successfully-sent-files counter.
    pub fn inc_files_sent(&self) {
        self.counters.files_sent.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment the successfully-received-files counter.
    pub fn inc_files_received(&self) {
        self.counters.files_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment the processed-commands counter.
    pub fn inc_commands_processed(&self) {
        self.counters.commands_processed.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment the error counter.
    pub fn inc_errors(&self) {
        self.counters.errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment the accepted-sessions counter.
    pub fn inc_sessions_accepted(&self) {
        self.counters.sessions_accepted.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment the rejected-sessions counter.
    pub fn inc_sessions_rejected(&self) {
        self.counters.sessions_rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Take a point-in-time snapshot of every counter.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            bytes_sent: self.counters.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.counters.bytes_received.load(Ordering::Relaxed),
            files_sent: self.counters.files_sent.load(Ordering::Relaxed),
            files_received: self.counters.files_received.load(Ordering::Relaxed),
            commands_processed: self.counters.commands_processed.load(Ordering::Relaxed),
            errors: self.counters.errors.load(Ordering::Relaxed),
            sessions_accepted: self.counters.sessions_accepted.load(Ordering::Relaxed),
            sessions_rejected: self.counters.sessions_rejected.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate_and_never_decrease() {
        let m = Metrics::new();
        m.add_bytes_sent(100);
        m.inc_commands_processed();
        let first = m.snapshot();
        m.add_bytes_sent(50);
        m.inc_commands_processed();
        let second = m.snapshot();
        assert!(second.bytes_sent >= first.bytes_sent);
        assert!(second.commands_processed >= first.commands_processed);
        assert_eq!(second.bytes_sent, 150);
        assert_eq!(second.commands_processed, 2);
    }

    #[test]
    fn clone_shares_the_same_counters() {
        let m = Metrics::new();
        let m2 = m.clone();
        m2.inc_errors();
        assert_eq!(m.snapshot().errors, 1);
    }
}
