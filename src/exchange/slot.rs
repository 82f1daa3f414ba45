//! Slot storage: one fixed-size RGBA buffer plus its frame metadata.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::capture::frame::PixelFormat;
use crate::error::AllocError;

/// Number of slots in every pool.
pub const SLOT_COUNT: usize = 3;

/// Position of a slot inside its pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotIndex(u8);

impl SlotIndex {
    /// Returns the index for `raw`, or `None` when it is outside the pool.
    pub fn new(raw: usize) -> Option<Self> {
        (raw < SLOT_COUNT).then_some(Self(raw as u8))
    }

    pub fn get(self) -> usize {
        self.0 as usize
    }

    /// All slot indices in scan order.
    pub(crate) fn all() -> impl Iterator<Item = SlotIndex> {
        (0..SLOT_COUNT as u8).map(SlotIndex)
    }
}

/// Per-slot lifecycle state. Published-ness is tracked separately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SlotState {
    /// Contents are stable; readers may hold it.
    Free = 0,
    /// The writer owns the slot exclusively.
    Writing = 1,
}

impl SlotState {
    pub(crate) fn from_raw(raw: u8) -> Self {
        match raw {
            0 => SlotState::Free,
            _ => SlotState::Writing,
        }
    }
}

/// Layout shared by every slot in a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameGeometry {
    pub width: u32,
    pub height: u32,
    /// Row stride in bytes.
    pub stride: usize,
    /// Total buffer size in bytes.
    pub len: usize,
}

impl FrameGeometry {
    /// Tightly packed RGBA geometry for `width` x `height`.
    pub fn rgba(width: u32, height: u32) -> Result<Self, AllocError> {
        if width == 0 || height == 0 {
            return Err(AllocError::EmptyGeometry { width, height });
        }

        let overflow = AllocError::CapacityOverflow { width, height };
        let stride = (width as usize)
            .checked_mul(PixelFormat::Rgba8888.bytes_per_pixel())
            .ok_or_else(|| overflow.clone())?;
        let len = stride.checked_mul(height as usize).ok_or(overflow)?;

        Ok(Self {
            width,
            height,
            stride,
            len,
        })
    }

    /// Bytes of pixel data in one row (excluding padding).
    pub fn row_bytes(&self) -> usize {
        self.width as usize * PixelFormat::Rgba8888.bytes_per_pixel()
    }
}

/// One reusable frame buffer.
///
/// The buffer is allocated once and overwritten in place. Access to it is
/// governed by the pool's state and reader-count atomics, not by the slot.
pub(crate) struct Slot {
    buffer: UnsafeCell<Box<[u8]>>,
    geometry: FrameGeometry,
    sequence: AtomicU64,
    timestamp_ns: AtomicU64,
}

// SAFETY: the buffer is only mutated by the writer while the pool holds the
// slot in `Writing` with no reservations, and only read by holders of a
// reservation taken while the slot was published and not `Writing`.
unsafe impl Sync for Slot {}

impl Slot {
    pub(crate) fn allocate(geometry: FrameGeometry) -> Result<Self, AllocError> {
        let mut buffer = Vec::new();
        buffer
            .try_reserve_exact(geometry.len)
            .map_err(|_| AllocError::OutOfMemory {
                bytes: geometry.len,
            })?;
        buffer.resize(geometry.len, 0);

        Ok(Self {
            buffer: UnsafeCell::new(buffer.into_boxed_slice()),
            geometry,
            sequence: AtomicU64::new(0),
            timestamp_ns: AtomicU64::new(0),
        })
    }

    pub(crate) fn geometry(&self) -> FrameGeometry {
        self.geometry
    }

    pub(crate) fn sequence(&self) -> u64 {
        self.sequence.load(Ordering::Relaxed)
    }

    pub(crate) fn timestamp_ns(&self) -> u64 {
        self.timestamp_ns.load(Ordering::Relaxed)
    }

    /// Stamps frame metadata. Published by the state release in `commit`.
    pub(crate) fn stamp(&self, sequence: u64, timestamp_ns: u64) {
        self.timestamp_ns.store(timestamp_ns, Ordering::Relaxed);
        self.sequence.store(sequence, Ordering::Relaxed);
    }

    /// # Safety
    ///
    /// The caller must hold a validated reader reservation on this slot.
    pub(crate) unsafe fn bytes(&self) -> &[u8] {
        &(&*self.buffer.get())[..]
    }

    /// # Safety
    ///
    /// The caller must own this slot in `Writing` state with no reservations.
    #[allow(clippy::mut_from_ref)]
    pub(crate) unsafe fn bytes_mut(&self) -> &mut [u8] {
        &mut (&mut *self.buffer.get())[..]
    }
}
