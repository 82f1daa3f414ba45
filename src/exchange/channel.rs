//! The owned channel object tying the pool, writer and readers together.

use std::sync::Arc;

use arc_swap::ArcSwapOption;
use tracing::{debug, info, instrument};

use super::pool::SlotPool;
use super::reader::FrameHandle;
use super::slot::{FrameGeometry, SLOT_COUNT};
use super::stats::{ExchangeStats, StatsSnapshot};
use super::writer::{FrameSequence, WriteSlot};
use crate::capture::frame::{Frame, PixelView};
use crate::error::{AllocError, DropReason, Unavailable};
use crate::utils::now_ns;
use crate::{ExchangeConfig, CONFIG};

/// Lock-free single-writer / multi-reader frame exchange.
///
/// One producer thread submits frames; any number of reader threads borrow
/// the latest one. Neither side ever blocks the other. Only one thread may
/// submit at a time.
pub struct FrameExchange {
    pool: ArcSwapOption<SlotPool>,
    config: ExchangeConfig,
    stats: Arc<ExchangeStats>,
}

impl FrameExchange {
    /// Creates an uninitialized channel.
    pub fn new(config: ExchangeConfig) -> Self {
        Self {
            pool: ArcSwapOption::empty(),
            config,
            stats: Arc::new(ExchangeStats::default()),
        }
    }

    /// Creates a channel already initialized for `width` x `height`.
    pub fn with_geometry(
        width: u32,
        height: u32,
        config: ExchangeConfig,
    ) -> Result<Self, AllocError> {
        let exchange = Self::new(config);
        exchange.initialize(width, height)?;
        Ok(exchange)
    }

    pub fn config(&self) -> &ExchangeConfig {
        &self.config
    }

    /// Allocates the slot pool. Releases the previous pool first, waiting
    /// for its in-flight reads and writes.
    ///
    /// On error the channel is left uninitialized.
    #[instrument(skip(self))]
    pub fn initialize(&self, width: u32, height: u32) -> Result<(), AllocError> {
        if self.is_initialized() {
            self.release();
        }

        let pool = SlotPool::new(width, height, self.stats.clone())?;
        let geometry = pool.geometry();
        if let Some(previous) = self.pool.swap(Some(Arc::new(pool))) {
            // Lost a race with another initialize
            previous.drain(self.config.release_warn());
        }

        info!(
            "Frame exchange initialized: {}x{}, {} bytes x {} slots",
            width, height, geometry.len, SLOT_COUNT
        );
        Ok(())
    }

    /// Tears down the slot pool.
    ///
    /// New reads and writes fail immediately; this call then waits for every
    /// outstanding write and reservation on the old pool. Calling it while
    /// holding a [`FrameHandle`] on the same thread never returns. No-op when
    /// already released.
    #[instrument(skip(self))]
    pub fn release(&self) {
        let Some(pool) = self.pool.swap(None) else {
            debug!("Release on uninitialized exchange, nothing to do");
            return;
        };

        pool.drain(self.config.release_warn());
        drop(pool);
        info!("Frame exchange released");
    }

    pub fn is_initialized(&self) -> bool {
        self.pool.load().is_some()
    }

    pub fn geometry(&self) -> Option<FrameGeometry> {
        self.pool.load_full().map(|pool| pool.geometry())
    }

    /// Claims a slot for the writer to fill.
    pub fn acquire_write_slot(&self) -> Result<WriteSlot, DropReason> {
        let pool = self.pool.load_full().ok_or(DropReason::NotInitialized)?;
        match pool.acquire_write_slot() {
            Some(index) => Ok(WriteSlot::new(pool, index)),
            None => {
                self.stats.record_drop();
                debug!("All slots busy, dropping frame");
                Err(DropReason::NoSlotAvailable)
            }
        }
    }

    /// Copies `source` into a free slot and publishes it, stamped with the
    /// current wall-clock time.
    pub fn submit_frame(&self, source: PixelView<'_>) -> Result<FrameSequence, DropReason> {
        self.submit_frame_at(source, now_ns())
    }

    /// Like [`submit_frame`](Self::submit_frame) with an explicit capture
    /// timestamp in nanoseconds.
    pub fn submit_frame_at(
        &self,
        source: PixelView<'_>,
        timestamp_ns: u64,
    ) -> Result<FrameSequence, DropReason> {
        let slot = self.acquire_write_slot()?;
        let filled = slot.copy_into(source, timestamp_ns)?;
        Ok(filled.commit())
    }

    /// Borrows the latest published frame.
    pub fn borrow_current_frame(&self) -> Result<FrameHandle, Unavailable> {
        let pool = self.pool.load_full().ok_or(Unavailable::NotInitialized)?;
        match pool.acquire_read_frame(self.config.read_attempts, self.config.commit_wait()) {
            Ok(index) => {
                self.stats.record_read();
                Ok(FrameHandle::new(pool, index))
            }
            Err(reason) => {
                self.stats.record_unavailable();
                Err(reason)
            }
        }
    }

    /// Gives a borrowed frame back. Same as dropping the handle.
    pub fn return_frame(&self, handle: FrameHandle) {
        drop(handle);
    }

    /// Owned copy of the latest frame.
    pub fn snapshot(&self) -> Result<Frame, Unavailable> {
        let handle = self.borrow_current_frame()?;
        Ok(handle.to_frame())
    }

    /// Sequence number of the latest published frame, 0 if none.
    pub fn latest_sequence(&self) -> u64 {
        self.pool
            .load_full()
            .map(|pool| pool.latest_sequence())
            .unwrap_or(0)
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }
}

impl Default for FrameExchange {
    /// Uninitialized channel using the global runtime configuration.
    fn default() -> Self {
        Self::new(CONFIG.load().exchange.clone())
    }
}
