//! Fixed pool of frame slots and the atomics that guard them.
//!
//! State and reader counts live in arrays parallel to the slots so the
//! atomics stay independent of the (large) buffers. Each atomic sits on its
//! own cache line; the writer hammers the state words while readers bump the
//! counts.

use std::sync::atomic::{AtomicIsize, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam::utils::{Backoff, CachePadded};
use tracing::{debug, warn};

use super::slot::{FrameGeometry, Slot, SlotIndex, SlotState, SLOT_COUNT};
use super::stats::ExchangeStats;
use crate::error::AllocError;

/// Sentinel stored in `published` before the first commit.
pub(super) const NOT_PUBLISHED: usize = usize::MAX;

/// All state belonging to one `initialize` call.
pub(crate) struct SlotPool {
    pub(super) slots: Box<[Slot]>,
    pub(super) states: [CachePadded<AtomicU8>; SLOT_COUNT],
    pub(super) readers: [CachePadded<AtomicIsize>; SLOT_COUNT],
    /// Index of the latest readable slot, or `NOT_PUBLISHED`.
    pub(super) published: CachePadded<AtomicUsize>,
    pub(super) sequence: CachePadded<AtomicU64>,
    pub(super) stats: Arc<ExchangeStats>,
    geometry: FrameGeometry,
}

impl SlotPool {
    pub(crate) fn new(
        width: u32,
        height: u32,
        stats: Arc<ExchangeStats>,
    ) -> Result<Self, AllocError> {
        let geometry = FrameGeometry::rgba(width, height)?;

        let mut slots = Vec::with_capacity(SLOT_COUNT);
        for _ in 0..SLOT_COUNT {
            slots.push(Slot::allocate(geometry)?);
        }

        debug!(
            "Allocated {} slots of {} bytes ({}x{}, stride {})",
            SLOT_COUNT, geometry.len, width, height, geometry.stride
        );

        Ok(Self {
            slots: slots.into_boxed_slice(),
            states: std::array::from_fn(|_| CachePadded::new(AtomicU8::new(SlotState::Free as u8))),
            readers: std::array::from_fn(|_| CachePadded::new(AtomicIsize::new(0))),
            published: CachePadded::new(AtomicUsize::new(NOT_PUBLISHED)),
            sequence: CachePadded::new(AtomicU64::new(0)),
            stats,
            geometry,
        })
    }

    pub(crate) fn geometry(&self) -> FrameGeometry {
        self.geometry
    }

    /// Maps a raw published value to its slot, `None` for the sentinel or
    /// anything outside the pool.
    pub(crate) fn lookup_index(&self, raw: usize) -> Option<SlotIndex> {
        SlotIndex::new(raw).filter(|index| index.get() < self.slots.len())
    }

    pub(super) fn slot(&self, index: SlotIndex) -> &Slot {
        &self.slots[index.get()]
    }

    pub(crate) fn state(&self, index: SlotIndex) -> SlotState {
        SlotState::from_raw(self.states[index.get()].load(Ordering::Acquire))
    }

    pub(crate) fn reader_count(&self, index: SlotIndex) -> isize {
        self.readers[index.get()].load(Ordering::Acquire)
    }

    pub(crate) fn published(&self) -> Option<SlotIndex> {
        self.lookup_index(self.published.load(Ordering::Acquire))
    }

    /// Sequence number of the published frame, 0 when nothing is published.
    pub(crate) fn latest_sequence(&self) -> u64 {
        self.published()
            .map(|index| self.slot(index).sequence())
            .unwrap_or(0)
    }

    /// Next frame sequence number. Strictly increasing, starts at 1.
    pub(super) fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Waits until no slot is being written or read.
    ///
    /// Yields while waiting and never gives up; logs once if the wait
    /// exceeds `warn_after`, which usually means a handle is being held by
    /// the thread doing the teardown.
    pub(crate) fn drain(&self, warn_after: Duration) {
        let started = Instant::now();
        let mut warned = false;

        for index in SlotIndex::all() {
            let backoff = Backoff::new();
            while self.state(index) == SlotState::Writing || self.reader_count(index) > 0 {
                if !warned && started.elapsed() >= warn_after {
                    warn!(
                        slot = index.get(),
                        readers = self.reader_count(index),
                        "Release still waiting on slot after {:?}",
                        started.elapsed()
                    );
                    warned = true;
                }
                backoff.snooze();
            }
        }
    }
}
