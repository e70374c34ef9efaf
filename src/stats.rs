//! Process-wide traffic counters
//!
//! Diagnostic only: nothing in the data path branches on these values.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Counters shared by every session
#[derive(Debug, Default)]
pub struct ServerStats {
    active_downloads: AtomicU64,
    download_sessions: AtomicU64,
    bytes_sent: AtomicU64,
    uploads_accepted: AtomicU64,
    uploads_rejected: AtomicU64,
    bytes_absorbed: AtomicU64,
    throttled_micros: AtomicU64,
    probes: AtomicU64,
}

/// Point-in-time copy of [`ServerStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Download sessions currently streaming
    pub active_downloads: u64,
    /// Download sessions started since boot
    pub download_sessions: u64,
    /// Bytes handed to the transport by download sessions
    pub bytes_sent: u64,
    /// Uploads fully absorbed
    pub uploads_accepted: u64,
    /// Uploads rejected for size or read failure
    pub uploads_rejected: u64,
    /// Bytes read and discarded by upload sessions
    pub bytes_absorbed: u64,
    /// Total time uploads spent in throttle delays
    pub throttled: Duration,
    /// Probe requests answered
    pub probes: u64,
}

impl ServerStats {
    /// Create zeroed counters
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn download_started(&self) {
        self.active_downloads.fetch_add(1, Ordering::Relaxed);
        self.download_sessions.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn download_finished(&self, bytes: u64) {
        self.active_downloads.fetch_sub(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes, Ordering::Relaxed);
    }

    pub(crate) fn upload_accepted(&self, bytes: u64, throttled: Duration) {
        self.uploads_accepted.fetch_add(1, Ordering::Relaxed);
        self.bytes_absorbed.fetch_add(bytes, Ordering::Relaxed);
        self.add_throttle(throttled);
    }

    pub(crate) fn upload_rejected(&self) {
        self.uploads_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn probe(&self) {
        self.probes.fetch_add(1, Ordering::Relaxed);
    }

    fn add_throttle(&self, throttled: Duration) {
        let micros = u64::try_from(throttled.as_micros()).unwrap_or(u64::MAX);
        self.throttled_micros.fetch_add(micros, Ordering::Relaxed);
    }

    /// Read all counters
    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            active_downloads: self.active_downloads.load(Ordering::Relaxed),
            download_sessions: self.download_sessions.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            uploads_accepted: self.uploads_accepted.load(Ordering::Relaxed),
            uploads_rejected: self.uploads_rejected.load(Ordering::Relaxed),
            bytes_absorbed: self.bytes_absorbed.load(Ordering::Relaxed),
            throttled: Duration::from_micros(self.throttled_micros.load(Ordering::Relaxed)),
            probes: self.probes.load(Ordering::Relaxed),
        }
    }
}
