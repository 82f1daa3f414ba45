//! Exchange counters, mirrored to the `metrics` facade.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

#[derive(Debug, Default)]
pub struct ExchangeStats {
    frames_committed: AtomicU64,
    frames_dropped: AtomicU64,
    dimension_mismatches: AtomicU64,
    reads: AtomicU64,
    reads_unavailable: AtomicU64,
    reader_underflows: AtomicU64,
}

/// Point-in-time copy of [`ExchangeStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub frames_committed: u64,
    pub frames_dropped: u64,
    pub dimension_mismatches: u64,
    pub reads: u64,
    pub reads_unavailable: u64,
    pub reader_underflows: u64,
}

impl ExchangeStats {
    pub(crate) fn record_commit(&self) {
        self.frames_committed.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("triframe.frames_committed").increment(1);
    }

    pub(crate) fn record_drop(&self) {
        self.frames_dropped.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("triframe.frames_dropped").increment(1);
    }

    pub(crate) fn record_mismatch(&self) {
        self.dimension_mismatches.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("triframe.dimension_mismatches").increment(1);
    }

    pub(crate) fn record_read(&self) {
        self.reads.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("triframe.reads").increment(1);
    }

    pub(crate) fn record_unavailable(&self) {
        self.reads_unavailable.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("triframe.reads_unavailable").increment(1);
    }

    pub(crate) fn record_underflow(&self) {
        self.reader_underflows.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("triframe.reader_underflows").increment(1);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            frames_committed: self.frames_committed.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            dimension_mismatches: self.dimension_mismatches.load(Ordering::Relaxed),
            reads: self.reads.load(Ordering::Relaxed),
            reads_unavailable: self.reads_unavailable.load(Ordering::Relaxed),
            reader_underflows: self.reader_underflows.load(Ordering::Relaxed),
        }
    }
}
