//! Writer side: claim a slot, fill it, publish it.
//!
//! Single producer only. Two threads writing at once will not corrupt
//! memory (slots are claimed by CAS) but publication order, and therefore
//! sequence order as seen by readers, is no longer defined.

use std::fmt;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use tracing::trace;

use super::pool::SlotPool;
use super::slot::{FrameGeometry, SlotIndex, SlotState};
use crate::capture::frame::PixelView;
use crate::error::DropReason;

/// Sequence number stamped on a committed frame. Never zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FrameSequence(u64);

impl FrameSequence {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for FrameSequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl SlotPool {
    /// Claims a slot the writer may overwrite, `None` if every slot is
    /// published, reserved, or already being written.
    pub(crate) fn acquire_write_slot(&self) -> Option<SlotIndex> {
        let published = self.published.load(Ordering::Acquire);

        for index in SlotIndex::all() {
            let i = index.get();

            // The latest frame stays readable until a newer one replaces it
            if i == published {
                continue;
            }
            if self.readers[i].load(Ordering::Acquire) > 0 {
                continue;
            }

            if self.states[i]
                .compare_exchange(
                    SlotState::Free as u8,
                    SlotState::Writing as u8,
                    Ordering::SeqCst,
                    Ordering::Relaxed,
                )
                .is_err()
            {
                continue;
            }

            if !self.confirm_claim(index) {
                continue;
            }

            return Some(index);
        }

        None
    }

    /// Second look at a slot just moved to `Writing`. Reverts it to `Free`
    /// and returns `false` if a reader reserved it or it became published
    /// after the first checks.
    fn confirm_claim(&self, index: SlotIndex) -> bool {
        let i = index.get();

        // A reader may have reserved between the count check and the CAS.
        // It saw the slot published, so it wins.
        if self.readers[i].load(Ordering::SeqCst) > 0 {
            trace!(slot = i, "Reader raced write claim, backing off");
            self.states[i].store(SlotState::Free as u8, Ordering::Release);
            return false;
        }

        if self.published.load(Ordering::SeqCst) == i {
            trace!(slot = i, "Slot became published during claim, backing off");
            self.states[i].store(SlotState::Free as u8, Ordering::Release);
            return false;
        }

        true
    }

    /// Publishes `index` and hands it back to readers.
    ///
    /// The pointer is stored before the state flips back to `Free`: a reader
    /// that already sees the new pointer still sees `Writing` and waits for
    /// the buffer stores to land. Do not reorder.
    pub(crate) fn commit_write(&self, index: SlotIndex) {
        let i = index.get();
        self.published.store(i, Ordering::SeqCst);
        self.states[i].store(SlotState::Free as u8, Ordering::Release);
    }

    /// Returns an unpublished slot to `Free`.
    pub(crate) fn abandon_write(&self, index: SlotIndex) {
        self.states[index.get()].store(SlotState::Free as u8, Ordering::Release);
    }
}

/// Exclusive write access to one slot.
///
/// Dropped without [`copy_into`](WriteSlot::copy_into) succeeding, the slot
/// goes back to `Free` unpublished.
pub struct WriteSlot {
    pool: Arc<SlotPool>,
    index: SlotIndex,
    armed: bool,
}

impl WriteSlot {
    pub(crate) fn new(pool: Arc<SlotPool>, index: SlotIndex) -> Self {
        Self {
            pool,
            index,
            armed: true,
        }
    }

    pub fn slot(&self) -> SlotIndex {
        self.index
    }

    pub fn geometry(&self) -> FrameGeometry {
        self.pool.geometry()
    }

    /// Copies `source` into the slot and stamps it with `timestamp_ns` and
    /// the next sequence number.
    ///
    /// Geometry is validated before anything is written; on error nothing is
    /// copied and no sequence number is consumed.
    pub fn copy_into(
        self,
        source: PixelView<'_>,
        timestamp_ns: u64,
    ) -> Result<FilledSlot, DropReason> {
        let geometry = self.geometry();
        if let Err(reason) = validate_source(&source, &geometry) {
            if matches!(reason, DropReason::DimensionMismatch { .. }) {
                self.pool.stats.record_mismatch();
            }
            return Err(reason);
        }

        let slot = self.pool.slot(self.index);
        // SAFETY: this guard owns the slot in `Writing` with no reservations.
        let dst = unsafe { slot.bytes_mut() };
        copy_rows(
            source.data,
            source.stride,
            dst,
            geometry.stride,
            geometry.row_bytes(),
            geometry.height as usize,
        );

        let sequence = self.pool.next_sequence();
        slot.stamp(sequence, timestamp_ns);

        Ok(FilledSlot {
            slot: self,
            sequence: FrameSequence(sequence),
        })
    }
}

impl Drop for WriteSlot {
    fn drop(&mut self) {
        if self.armed {
            self.pool.abandon_write(self.index);
        }
    }
}

impl fmt::Debug for WriteSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WriteSlot")
            .field("index", &self.index)
            .field("armed", &self.armed)
            .finish()
    }
}

/// A filled slot waiting to be published.
#[derive(Debug)]
pub struct FilledSlot {
    slot: WriteSlot,
    sequence: FrameSequence,
}

impl FilledSlot {
    pub fn sequence(&self) -> FrameSequence {
        self.sequence
    }

    /// Makes this frame the latest one visible to readers.
    pub fn commit(mut self) -> FrameSequence {
        self.slot.pool.commit_write(self.slot.index);
        self.slot.armed = false;
        self.slot.pool.stats.record_commit();
        trace!(slot = self.slot.index.get(), "Committed frame {}", self.sequence);
        self.sequence
    }
}

fn validate_source(source: &PixelView<'_>, geometry: &FrameGeometry) -> Result<(), DropReason> {
    if source.width != geometry.width || source.height != geometry.height {
        return Err(DropReason::DimensionMismatch {
            expected_width: geometry.width,
            expected_height: geometry.height,
            actual_width: source.width,
            actual_height: source.height,
        });
    }

    let row_bytes = geometry.row_bytes();
    if source.stride < row_bytes {
        return Err(DropReason::InvalidStride {
            stride: source.stride,
            row_bytes,
        });
    }

    // A stride this large cannot be backed by any slice
    let needed = rows_span(source.stride, geometry.height as usize, row_bytes).unwrap_or(usize::MAX);
    if source.data.len() < needed {
        return Err(DropReason::SourceTooShort {
            needed,
            actual: source.data.len(),
        });
    }

    Ok(())
}

/// Bytes spanned by `rows` rows at `stride`, the last one unpadded.
/// `None` on overflow.
pub(crate) fn rows_span(stride: usize, rows: usize, row_bytes: usize) -> Option<usize> {
    stride
        .checked_mul(rows.saturating_sub(1))?
        .checked_add(row_bytes)
}

/// Copies `rows` rows of `row_bytes` each. One memcpy when strides match.
pub(crate) fn copy_rows(
    src: &[u8],
    src_stride: usize,
    dst: &mut [u8],
    dst_stride: usize,
    row_bytes: usize,
    rows: usize,
) {
    if src_stride == dst_stride && src_stride == row_bytes {
        let len = row_bytes * rows;
        dst[..len].copy_from_slice(&src[..len]);
        return;
    }

    for (dst_row, src_row) in dst
        .chunks_mut(dst_stride)
        .zip(src.chunks(src_stride))
        .take(rows)
    {
        dst_row[..row_bytes].copy_from_slice(&src_row[..row_bytes]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::stats::ExchangeStats;

    fn pool() -> Arc<SlotPool> {
        Arc::new(SlotPool::new(2, 2, Arc::new(ExchangeStats::default())).unwrap())
    }

    #[test]
    fn test_acquire_scans_in_index_order() {
        let pool = pool();
        let first = pool.acquire_write_slot().unwrap();
        assert_eq!(first.get(), 0);
        assert_eq!(pool.state(first), SlotState::Writing);

        let second = pool.acquire_write_slot().unwrap();
        assert_eq!(second.get(), 1);
    }

    #[test]
    fn test_acquire_skips_published_slot() {
        let pool = pool();
        let index = pool.acquire_write_slot().unwrap();
        pool.commit_write(index);

        assert_eq!(pool.published(), Some(index));
        assert_eq!(pool.state(index), SlotState::Free);
        for _ in 0..10 {
            let next = pool.acquire_write_slot().unwrap();
            assert_ne!(next, index);
            pool.abandon_write(next);
        }
    }

    #[test]
    fn test_acquire_skips_reserved_slot() {
        let pool = pool();
        pool.readers[0].fetch_add(1, Ordering::SeqCst);
        let index = pool.acquire_write_slot().unwrap();
        assert_eq!(index.get(), 1);
        assert_eq!(pool.state(SlotIndex::new(0).unwrap()), SlotState::Free);
    }

    #[test]
    fn test_acquire_reports_exhaustion() {
        let pool = pool();
        let held: Vec<_> = (0..3).map(|_| pool.acquire_write_slot().unwrap()).collect();
        assert_eq!(held.len(), 3);
        assert!(pool.acquire_write_slot().is_none());
    }

    #[test]
    fn test_dropped_guard_reverts_slot() {
        let pool = pool();
        let index = pool.acquire_write_slot().unwrap();
        let guard = WriteSlot::new(pool.clone(), index);
        drop(guard);
        assert_eq!(pool.state(index), SlotState::Free);
        assert!(pool.published().is_none());
    }

    #[test]
    fn test_copy_then_commit_publishes() {
        let pool = pool();
        let index = pool.acquire_write_slot().unwrap();
        let data = [0xABu8; 16];
        let filled = WriteSlot::new(pool.clone(), index)
            .copy_into(PixelView::packed(&data, 2, 2), 42)
            .unwrap();
        assert_eq!(pool.published(), None);

        let sequence = filled.commit();
        assert_eq!(sequence.get(), 1);
        assert_eq!(pool.published(), Some(index));
        assert_eq!(pool.state(index), SlotState::Free);
        assert_eq!(pool.latest_sequence(), 1);
        assert_eq!(pool.slot(index).timestamp_ns(), 42);
        assert_eq!(unsafe { pool.slot(index).bytes() }, &data[..]);
        assert_eq!(pool.stats.snapshot().frames_committed, 1);
    }

    #[test]
    fn test_mismatch_reverts_without_sequence() {
        let pool = pool();
        let index = pool.acquire_write_slot().unwrap();
        let data = [0u8; 36];
        let err = WriteSlot::new(pool.clone(), index)
            .copy_into(PixelView::packed(&data, 3, 3), 0)
            .unwrap_err();

        assert_eq!(
            err,
            DropReason::DimensionMismatch {
                expected_width: 2,
                expected_height: 2,
                actual_width: 3,
                actual_height: 3,
            }
        );
        assert_eq!(pool.state(index), SlotState::Free);
        assert_eq!(pool.sequence.load(Ordering::SeqCst), 0);
        assert_eq!(pool.stats.snapshot().dimension_mismatches, 1);
    }

    #[test]
    fn test_short_source_rejected() {
        let pool = pool();
        let index = pool.acquire_write_slot().unwrap();
        let data = [0u8; 19];
        let err = WriteSlot::new(pool.clone(), index)
            .copy_into(PixelView::new(&data, 2, 2, 12), 0)
            .unwrap_err();
        assert_eq!(
            err,
            DropReason::SourceTooShort {
                needed: 20,
                actual: 19
            }
        );
        assert_eq!(pool.state(index), SlotState::Free);
    }

    #[test]
    fn test_overflowing_stride_rejected() {
        let pool = Arc::new(SlotPool::new(4, 4, Arc::new(ExchangeStats::default())).unwrap());
        for _ in 0..2 {
            let index = pool.acquire_write_slot().unwrap();
            WriteSlot::new(pool.clone(), index)
                .copy_into(PixelView::packed(&[0x11; 64], 4, 4), 0)
                .unwrap()
                .commit();
        }

        // 3 * stride wraps past usize::MAX
        let mut data = vec![0xAAu8; 16];
        data.extend_from_slice(&[0xBB; 48]);
        let index = pool.acquire_write_slot().unwrap();
        let err = WriteSlot::new(pool.clone(), index)
            .copy_into(PixelView::new(&data, 4, 4, usize::MAX / 3 + 1), 0)
            .unwrap_err();

        assert_eq!(
            err,
            DropReason::SourceTooShort {
                needed: usize::MAX,
                actual: 64
            }
        );
        assert_eq!(pool.state(index), SlotState::Free);
        assert_eq!(pool.latest_sequence(), 2);
        assert_eq!(pool.sequence.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_rows_span() {
        assert_eq!(rows_span(12, 2, 8), Some(20));
        assert_eq!(rows_span(12, 1, 8), Some(8));
        assert_eq!(rows_span(usize::MAX / 3 + 1, 4, 16), None);
        assert_eq!(rows_span(usize::MAX, 2, 1), None);
    }

    #[test]
    fn test_claim_backs_off_for_late_reader() {
        let pool = pool();
        let index = SlotIndex::new(1).unwrap();
        pool.states[1].store(SlotState::Writing as u8, Ordering::SeqCst);
        pool.readers[1].fetch_add(1, Ordering::SeqCst);

        assert!(!pool.confirm_claim(index));
        assert_eq!(pool.state(index), SlotState::Free);
        assert_eq!(pool.reader_count(index), 1);
    }

    #[test]
    fn test_claim_backs_off_for_published_slot() {
        let pool = pool();
        let index = SlotIndex::new(2).unwrap();
        pool.states[2].store(SlotState::Writing as u8, Ordering::SeqCst);
        pool.published.store(2, Ordering::SeqCst);

        assert!(!pool.confirm_claim(index));
        assert_eq!(pool.state(index), SlotState::Free);
    }

    #[test]
    fn test_claim_confirmed_when_untouched() {
        let pool = pool();
        let index = SlotIndex::new(0).unwrap();
        pool.states[0].store(SlotState::Writing as u8, Ordering::SeqCst);

        assert!(pool.confirm_claim(index));
        assert_eq!(pool.state(index), SlotState::Writing);
    }

    #[test]
    fn test_claims_settle_under_reader_churn() {
        use std::sync::atomic::AtomicBool;

        let pool = pool();
        let stop = Arc::new(AtomicBool::new(false));
        let churn = std::thread::spawn({
            let pool = pool.clone();
            let stop = stop.clone();
            move || {
                while !stop.load(Ordering::Relaxed) {
                    pool.readers[0].fetch_add(1, Ordering::SeqCst);
                    std::hint::spin_loop();
                    pool.readers[0].fetch_sub(1, Ordering::SeqCst);
                }
            }
        });

        for _ in 0..20_000 {
            if let Some(index) = pool.acquire_write_slot() {
                assert_eq!(pool.state(index), SlotState::Writing);
                pool.abandon_write(index);
            }
        }

        stop.store(true, Ordering::Relaxed);
        churn.join().unwrap();
        assert_eq!(pool.reader_count(SlotIndex::new(0).unwrap()), 0);
        for index in SlotIndex::all() {
            assert_eq!(pool.state(index), SlotState::Free);
        }
    }

    #[test]
    fn test_narrow_stride_rejected() {
        let pool = pool();
        let index = pool.acquire_write_slot().unwrap();
        let data = [0u8; 64];
        let err = WriteSlot::new(pool, index)
            .copy_into(PixelView::new(&data, 2, 2, 4), 0)
            .unwrap_err();
        assert_eq!(
            err,
            DropReason::InvalidStride {
                stride: 4,
                row_bytes: 8
            }
        );
    }

    #[test]
    fn test_copy_rows_strips_padding() {
        // 2 rows of 4 bytes with 2 bytes of padding each
        let src = [1, 2, 3, 4, 0xEE, 0xEE, 5, 6, 7, 8, 0xEE, 0xEE];
        let mut dst = [0u8; 8];
        copy_rows(&src, 6, &mut dst, 4, 4, 2);
        assert_eq!(dst, [1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn test_copy_rows_tolerates_unpadded_last_row() {
        let src = [1, 2, 0xEE, 3, 4];
        let mut dst = [0u8; 4];
        copy_rows(&src, 3, &mut dst, 2, 2, 2);
        assert_eq!(dst, [1, 2, 3, 4]);
    }
}
