//! Connection counters
//!
//! Lock-free counters updated from the writer loop, reader loop and
//! lifecycle manager; read as a plain snapshot.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct ClientStats {
    requests_sent: AtomicU64,
    replies_matched: AtomicU64,
    unmatched: AtomicU64,
    write_failures: AtomicU64,
    drained: AtomicU64,
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
}

/// Point-in-time copy of [`ClientStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub requests_sent: u64,
    pub replies_matched: u64,
    pub unmatched: u64,
    pub write_failures: u64,
    pub drained: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
}

impl ClientStats {
    #[inline]
    pub(crate) fn record_sent(&self, bytes: usize) {
        self.requests_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_received(&self, bytes: usize) {
        self.bytes_received.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_matched(&self) {
        self.replies_matched.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_unmatched(&self) {
        self.unmatched.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_write_failure(&self) {
        self.write_failures.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_drained(&self, count: usize) {
        self.drained.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            requests_sent: self.requests_sent.load(Ordering::Relaxed),
            replies_matched: self.replies_matched.load(Ordering::Relaxed),
            unmatched: self.unmatched.load(Ordering::Relaxed),
            write_failures: self.write_failures.load(Ordering::Relaxed),
            drained: self.drained.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
        }
    }
}
