//! Reader side: reserve the published slot, read it, release it.

use std::fmt;
use std::ops::Deref;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use crossbeam::utils::Backoff;
use tracing::{error, trace};

use super::pool::SlotPool;
use super::slot::{SlotIndex, SlotState};
use super::writer::{copy_rows, rows_span};
use crate::capture::frame::{Frame, FrameMetadata, PixelFormat};
use crate::error::Unavailable;

impl SlotPool {
    /// Reserves the latest published slot.
    ///
    /// Never blocks the writer. Retries up to `attempts` times if the
    /// publication moves while reserving, and waits at most `commit_wait`
    /// for an in-flight commit to become visible.
    pub(crate) fn acquire_read_frame(
        &self,
        attempts: u32,
        commit_wait: Duration,
    ) -> Result<SlotIndex, Unavailable> {
        for _ in 0..attempts {
            let published = self.published.load(Ordering::Acquire);
            let Some(index) = self.lookup_index(published) else {
                return Err(Unavailable::NoFrame);
            };
            if self.slot(index).sequence() == 0 {
                return Err(Unavailable::NoFrame);
            }

            let i = index.get();
            // Reserve first, validate after
            self.readers[i].fetch_add(1, Ordering::SeqCst);

            if self.published.load(Ordering::SeqCst) != i {
                self.readers[i].fetch_sub(1, Ordering::Release);
                trace!(slot = i, "Publication moved while reserving, retrying");
                continue;
            }

            // Pointer is stored before the state is released, so a fresh
            // commit can still read as `Writing` here.
            if !self.wait_for_commit(index, commit_wait) {
                self.readers[i].fetch_sub(1, Ordering::Release);
                return Err(Unavailable::CommitTimeout);
            }

            return Ok(index);
        }

        Err(Unavailable::Contended)
    }

    fn wait_for_commit(&self, index: SlotIndex, budget: Duration) -> bool {
        if self.state(index) != SlotState::Writing {
            return true;
        }

        let deadline = Instant::now() + budget;
        let backoff = Backoff::new();
        loop {
            backoff.spin();
            if self.state(index) != SlotState::Writing {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
        }
    }

    /// Drops one reservation on `index`.
    ///
    /// Releasing more often than acquiring is a caller bug. The count is
    /// restored instead of going negative so the writer is not locked out of
    /// the slot for good. Returns `false` on underflow.
    pub(crate) fn release_read_frame(&self, index: SlotIndex) -> bool {
        let i = index.get();
        let previous = self.readers[i].fetch_sub(1, Ordering::AcqRel);
        if previous <= 0 {
            self.readers[i].fetch_add(1, Ordering::AcqRel);
            self.stats.record_underflow();
            error!(
                slot = i,
                previous, "Reader count underflow: frame released more than once"
            );
            return false;
        }
        true
    }
}

/// Read-only access to a published frame.
///
/// The slot cannot be overwritten while this handle lives. Dropping it
/// releases the reservation.
pub struct FrameHandle {
    pool: Arc<SlotPool>,
    index: SlotIndex,
    sequence: u64,
    timestamp_ns: u64,
}

impl FrameHandle {
    pub(crate) fn new(pool: Arc<SlotPool>, index: SlotIndex) -> Self {
        let slot = pool.slot(index);
        let sequence = slot.sequence();
        let timestamp_ns = slot.timestamp_ns();
        Self {
            pool,
            index,
            sequence,
            timestamp_ns,
        }
    }

    pub fn slot(&self) -> SlotIndex {
        self.index
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn timestamp_ns(&self) -> u64 {
        self.timestamp_ns
    }

    pub fn width(&self) -> u32 {
        self.pool.geometry().width
    }

    pub fn height(&self) -> u32 {
        self.pool.geometry().height
    }

    /// Row stride in bytes.
    pub fn stride(&self) -> usize {
        self.pool.geometry().stride
    }

    /// Buffer size in bytes.
    pub fn len(&self) -> usize {
        self.pool.geometry().len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: this handle holds a reservation validated against a
        // published, non-`Writing` slot.
        unsafe { self.pool.slot(self.index).bytes() }
    }

    /// Pointer to the first pixel. Valid until the handle is dropped.
    pub fn as_ptr(&self) -> *const u8 {
        self.as_slice().as_ptr()
    }

    /// Copies the frame into `dst` with row stride `dst_stride`.
    ///
    /// Returns `false` if `dst` is too small or `dst_stride` cannot hold a row.
    pub fn copy_to(&self, dst: &mut [u8], dst_stride: usize) -> bool {
        let geometry = self.pool.geometry();
        let row_bytes = geometry.row_bytes();
        let rows = geometry.height as usize;
        let fits = rows_span(dst_stride, rows, row_bytes).is_some_and(|needed| dst.len() >= needed);
        if dst_stride < row_bytes || !fits {
            return false;
        }

        copy_rows(
            self.as_slice(),
            geometry.stride,
            dst,
            dst_stride,
            row_bytes,
            rows,
        );
        true
    }

    /// Owned, tightly packed copy of the frame.
    pub fn to_frame(&self) -> Frame {
        let geometry = self.pool.geometry();
        let row_bytes = geometry.row_bytes();
        let mut data = vec![0u8; row_bytes * geometry.height as usize];
        self.copy_to(&mut data, row_bytes);

        Frame {
            data: Bytes::from(data),
            meta: Arc::new(FrameMetadata {
                sequence: self.sequence,
                width: geometry.width,
                height: geometry.height,
                stride: row_bytes as u32,
                format: PixelFormat::Rgba8888,
                capture_timestamp_ns: self.timestamp_ns,
            }),
        }
    }
}

impl Deref for FrameHandle {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl AsRef<[u8]> for FrameHandle {
    fn as_ref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl Drop for FrameHandle {
    fn drop(&mut self) {
        self.pool.release_read_frame(self.index);
    }
}

impl fmt::Debug for FrameHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameHandle")
            .field("slot", &self.index)
            .field("sequence", &self.sequence)
            .field("width", &self.width())
            .field("height", &self.height())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::frame::PixelView;
    use crate::exchange::stats::ExchangeStats;
    use crate::exchange::writer::WriteSlot;

    const WAIT: Duration = Duration::from_micros(50);

    fn pool() -> Arc<SlotPool> {
        Arc::new(SlotPool::new(2, 2, Arc::new(ExchangeStats::default())).unwrap())
    }

    fn publish(pool: &Arc<SlotPool>, fill: u8) -> SlotIndex {
        let index = pool.acquire_write_slot().unwrap();
        let data = [fill; 16];
        WriteSlot::new(pool.clone(), index)
            .copy_into(PixelView::packed(&data, 2, 2), 0)
            .unwrap()
            .commit();
        index
    }

    #[test]
    fn test_no_frame_before_publish() {
        let pool = pool();
        assert_eq!(pool.acquire_read_frame(3, WAIT), Err(Unavailable::NoFrame));
    }

    #[test]
    fn test_acquire_and_release_balance() {
        let pool = pool();
        let index = publish(&pool, 0x11);

        let reserved = pool.acquire_read_frame(3, WAIT).unwrap();
        assert_eq!(reserved, index);
        assert_eq!(pool.reader_count(index), 1);

        let again = pool.acquire_read_frame(3, WAIT).unwrap();
        assert_eq!(again, index);
        assert_eq!(pool.reader_count(index), 2);

        assert!(pool.release_read_frame(index));
        assert!(pool.release_read_frame(index));
        assert_eq!(pool.reader_count(index), 0);
    }

    #[test]
    fn test_underflow_is_clamped() {
        let pool = pool();
        let index = publish(&pool, 0x11);

        assert!(!pool.release_read_frame(index));
        assert_eq!(pool.reader_count(index), 0);
        assert_eq!(pool.stats.snapshot().reader_underflows, 1);

        // The writer can still claim the slot once it is no longer published
        let newer = publish(&pool, 0x22);
        assert_ne!(newer, index);
        assert_eq!(pool.acquire_write_slot(), Some(index));
    }

    #[test]
    fn test_writing_slot_times_out() {
        let pool = pool();
        let index = publish(&pool, 0x11);
        pool.states[index.get()].store(SlotState::Writing as u8, Ordering::SeqCst);

        assert_eq!(
            pool.acquire_read_frame(3, WAIT),
            Err(Unavailable::CommitTimeout)
        );
        assert_eq!(pool.reader_count(index), 0);
    }

    #[test]
    fn test_handle_exposes_frame() {
        let pool = pool();
        let index = publish(&pool, 0x5A);
        let reserved = pool.acquire_read_frame(3, WAIT).unwrap();
        let handle = FrameHandle::new(pool.clone(), reserved);

        assert_eq!(handle.slot(), index);
        assert_eq!(handle.sequence(), 1);
        assert_eq!((handle.width(), handle.height()), (2, 2));
        assert_eq!(handle.stride(), 8);
        assert_eq!(handle.len(), 16);
        assert!(handle.iter().all(|&b| b == 0x5A));
        assert_eq!(handle.as_ptr(), handle.as_slice().as_ptr());

        drop(handle);
        assert_eq!(pool.reader_count(index), 0);
    }

    #[test]
    fn test_waits_for_in_flight_commit() {
        let pool = pool();
        let index = publish(&pool, 0x11);
        pool.states[index.get()].store(SlotState::Writing as u8, Ordering::SeqCst);

        let committer = std::thread::spawn({
            let pool = pool.clone();
            move || {
                std::thread::sleep(Duration::from_micros(10));
                pool.states[index.get()].store(SlotState::Free as u8, Ordering::Release);
            }
        });

        let reserved = pool.acquire_read_frame(3, Duration::from_secs(5));
        committer.join().unwrap();

        assert_eq!(reserved, Ok(index));
        assert_eq!(pool.reader_count(index), 1);
        assert!(pool.release_read_frame(index));
    }

    #[test]
    fn test_copy_to_rejects_overflowing_stride() {
        let pool = pool();
        publish(&pool, 0x33);
        let handle = FrameHandle::new(pool.clone(), pool.acquire_read_frame(3, WAIT).unwrap());

        let mut dst = [0u8; 32];
        assert!(!handle.copy_to(&mut dst, usize::MAX));
        assert!(dst.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_copy_to_padded_destination() {
        let pool = pool();
        publish(&pool, 0x33);
        let handle = FrameHandle::new(pool.clone(), pool.acquire_read_frame(3, WAIT).unwrap());

        let mut dst = [0u8; 10 + 8];
        assert!(handle.copy_to(&mut dst, 10));
        assert!(dst[..8].iter().all(|&b| b == 0x33));
        assert_eq!(&dst[8..10], &[0, 0]);
        assert!(dst[10..].iter().all(|&b| b == 0x33));

        let mut small = [0u8; 15];
        assert!(!handle.copy_to(&mut small, 8));
    }

    #[test]
    fn test_to_frame_snapshot() {
        let pool = pool();
        publish(&pool, 0x44);
        let handle = FrameHandle::new(pool.clone(), pool.acquire_read_frame(3, WAIT).unwrap());

        let frame = handle.to_frame();
        drop(handle);
        assert_eq!(frame.meta.sequence, 1);
        assert_eq!(frame.meta.stride, 8);
        assert_eq!(frame.data.len(), 16);
        assert!(frame.data.iter().all(|&b| b == 0x44));
    }
}
