//! I/O byte accounting.
//!
//! Byte counters are owned by whoever wants them and injected into the
//! stores; the stores never keep process-wide counters of their own.

use std::sync::atomic::{AtomicU64, Ordering};

/// Sink for bytes read and written by the durability layer.
pub trait IoStats: Send + Sync {
    /// Record bytes read from storage
    fn record_read(&self, bytes: u64);
    /// Record bytes written to storage
    fn record_write(&self, bytes: u64);
}

/// Discards all accounting.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopIoStats;

impl IoStats for NoopIoStats {
    fn record_read(&self, _bytes: u64) {}
    fn record_write(&self, _bytes: u64) {}
}

/// Cumulative counters, never reset.
#[derive(Debug, Default)]
pub struct IoCounters {
    read: AtomicU64,
    wrote: AtomicU64,
}

impl IoCounters {
    /// Create zeroed counters
    pub fn new() -> Self {
        Self::default()
    }

    /// Total bytes read
    pub fn bytes_read(&self) -> u64 {
        self.read.load(Ordering::Relaxed)
    }

    /// Total bytes written
    pub fn bytes_written(&self) -> u64 {
        self.wrote.load(Ordering::Relaxed)
    }
}

impl IoStats for IoCounters {
    fn record_read(&self, bytes: u64) {
        self.read.fetch_add(bytes, Ordering::Relaxed);
    }

    fn record_write(&self, bytes: u64) {
        self.wrote.fetch_add(bytes, Ordering::Relaxed);
    }
}
