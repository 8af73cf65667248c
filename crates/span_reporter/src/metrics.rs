//! Reporter metrics sink.
//!
//! The reporter calls these hooks at every accept, reject, send and drop
//! point. Implementations must be cheap and must not block: they run on
//! producer threads as well as on the flusher.

use crate::sender::{SendError, SendErrorKind};
use crossbeam_utils::CachePadded;
use std::sync::atomic::{AtomicU64, Ordering};

/// Receives counter updates from the reporter.
///
/// Every method has a no-op default so sinks only implement what they store.
pub trait ReporterMetrics: Send + Sync {
    /// Spans accepted into the queue.
    fn increment_records_queued(&self, _n: u64) {}

    /// Encoded bytes of spans accepted into the queue.
    fn increment_record_bytes(&self, _n: u64) {}

    /// Spans that will never be delivered: rejected, oversized, in a failed
    /// message, or discarded at close.
    fn increment_records_dropped(&self, _n: u64) {}

    /// Messages the sender accepted.
    fn increment_messages_sent(&self, _n: u64) {}

    /// Framed bytes of messages the sender accepted.
    fn increment_message_bytes(&self, _n: u64) {}

    /// A message failed to send and was discarded.
    fn increment_messages_dropped(&self, _cause: &SendError) {}

    /// Gauge: records currently queued.
    fn update_queued_records(&self, _n: u64) {}

    /// Gauge: bytes currently queued.
    fn update_queued_bytes(&self, _n: u64) {}
}

/// Discards all updates.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl ReporterMetrics for NoopMetrics {}

/// Point-in-time copy of [`InMemoryReporterMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub records_queued: u64,
    pub record_bytes: u64,
    pub records_dropped: u64,
    pub messages_sent: u64,
    pub message_bytes: u64,
    pub messages_dropped: u64,
    pub queued_records: u64,
    pub queued_bytes: u64,
}

/// Atomic in-process counters.
///
/// Counters are cache-padded: producers bump `records_queued` while the
/// flusher bumps `messages_sent`, and they should not share a line.
#[derive(Debug, Default)]
pub struct InMemoryReporterMetrics {
    records_queued: CachePadded<AtomicU64>,
    record_bytes: CachePadded<AtomicU64>,
    records_dropped: CachePadded<AtomicU64>,
    messages_sent: CachePadded<AtomicU64>,
    message_bytes: CachePadded<AtomicU64>,
    messages_dropped: CachePadded<AtomicU64>,
    queued_records: AtomicU64,
    queued_bytes: AtomicU64,
    dropped_by_cause: [AtomicU64; SendErrorKind::COUNT],
}

// All counters use `Ordering::Relaxed`: they are statistics, nothing else
// is published through them, and slightly stale reads are fine.
impl InMemoryReporterMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records_queued(&self) -> u64 {
        self.records_queued.load(Ordering::Relaxed)
    }

    pub fn record_bytes(&self) -> u64 {
        self.record_bytes.load(Ordering::Relaxed)
    }

    pub fn records_dropped(&self) -> u64 {
        self.records_dropped.load(Ordering::Relaxed)
    }

    pub fn messages_sent(&self) -> u64 {
        self.messages_sent.load(Ordering::Relaxed)
    }

    pub fn message_bytes(&self) -> u64 {
        self.message_bytes.load(Ordering::Relaxed)
    }

    pub fn messages_dropped(&self) -> u64 {
        self.messages_dropped.load(Ordering::Relaxed)
    }

    pub fn queued_records(&self) -> u64 {
        self.queued_records.load(Ordering::Relaxed)
    }

    pub fn queued_bytes(&self) -> u64 {
        self.queued_bytes.load(Ordering::Relaxed)
    }

    /// Dropped messages attributed to one failure kind.
    pub fn messages_dropped_by(&self, kind: SendErrorKind) -> u64 {
        self.dropped_by_cause[kind.index()].load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            records_queued: self.records_queued(),
            record_bytes: self.record_bytes(),
            records_dropped: self.records_dropped(),
            messages_sent: self.messages_sent(),
            message_bytes: self.message_bytes(),
            messages_dropped: self.messages_dropped(),
            queued_records: self.queued_records(),
            queued_bytes: self.queued_bytes(),
        }
    }

    /// Resets every counter, e.g. between measurement iterations.
    pub fn clear(&self) {
        for counter in [
            &self.records_queued,
            &self.record_bytes,
            &self.records_dropped,
            &self.messages_sent,
            &self.message_bytes,
            &self.messages_dropped,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        self.queued_records.store(0, Ordering::Relaxed);
        self.queued_bytes.store(0, Ordering::Relaxed);
        for counter in &self.dropped_by_cause {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

impl ReporterMetrics for InMemoryReporterMetrics {
    fn increment_records_queued(&self, n: u64) {
        self.records_queued.fetch_add(n, Ordering::Relaxed);
    }

    fn increment_record_bytes(&self, n: u64) {
        self.record_bytes.fetch_add(n, Ordering::Relaxed);
    }

    fn increment_records_dropped(&self, n: u64) {
        self.records_dropped.fetch_add(n, Ordering::Relaxed);
    }

    fn increment_messages_sent(&self, n: u64) {
        self.messages_sent.fetch_add(n, Ordering::Relaxed);
    }

    fn increment_message_bytes(&self, n: u64) {
        self.message_bytes.fetch_add(n, Ordering::Relaxed);
    }

    fn increment_messages_dropped(&self, cause: &SendError) {
        self.messages_dropped.fetch_add(1, Ordering::Relaxed);
        self.dropped_by_cause[cause.kind().index()].fetch_add(1, Ordering::Relaxed);
    }

    fn update_queued_records(&self, n: u64) {
        self.queued_records.store(n, Ordering::Relaxed);
    }

    fn update_queued_bytes(&self, n: u64) {
        self.queued_bytes.store(n, Ordering::Relaxed);
    }
}
