//! Error types for the frame exchange.
//!
//! Only [`AllocError`] is a real failure. [`DropReason`] and [`Unavailable`]
//! describe the normal backpressure outcomes of the write and read paths and
//! are expected to show up under load.

use thiserror::Error;

/// Failure to set up the slot pool.
///
/// The channel is left uninitialized when `initialize` returns one of these.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AllocError {
    /// Width or height is zero.
    #[error("frame geometry {width}x{height} is empty")]
    EmptyGeometry { width: u32, height: u32 },

    /// `width * height * 4` does not fit in `usize`.
    #[error("frame geometry {width}x{height} overflows the address space")]
    CapacityOverflow { width: u32, height: u32 },

    /// The allocator refused a slot buffer.
    #[error("failed to allocate {bytes} bytes for a frame slot")]
    OutOfMemory { bytes: usize },
}

/// Why a submitted frame was not published.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DropReason {
    /// The channel has not been initialized, or has been released.
    #[error("frame exchange is not initialized")]
    NotInitialized,

    /// Every slot is published, reserved by a reader, or being written.
    #[error("no free slot, frame dropped")]
    NoSlotAvailable,

    /// Source dimensions differ from the configured slot geometry.
    #[error("source is {actual_width}x{actual_height}, slots are {expected_width}x{expected_height}")]
    DimensionMismatch {
        expected_width: u32,
        expected_height: u32,
        actual_width: u32,
        actual_height: u32,
    },

    /// Source row stride is smaller than one row of pixels.
    #[error("source stride {stride} is smaller than a row ({row_bytes} bytes)")]
    InvalidStride { stride: usize, row_bytes: usize },

    /// Source slice does not cover `height` rows at the given stride.
    #[error("source holds {actual} bytes, {needed} required")]
    SourceTooShort { needed: usize, actual: usize },
}

impl DropReason {
    /// True for contention drops the caller should simply retry next tick.
    pub fn is_backpressure(&self) -> bool {
        matches!(self, DropReason::NoSlotAvailable)
    }
}

/// Why no frame could be borrowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Unavailable {
    /// The channel has not been initialized, or has been released.
    #[error("frame exchange is not initialized")]
    NotInitialized,

    /// Nothing has been published yet.
    #[error("no frame has been published")]
    NoFrame,

    /// The published frame kept moving for every retry.
    #[error("published frame changed on every attempt")]
    Contended,

    /// The writer's commit did not become visible within the wait budget.
    #[error("timed out waiting for an in-flight commit")]
    CommitTimeout,
}
