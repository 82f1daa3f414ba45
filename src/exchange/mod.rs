//! Lock-free triple-buffer frame exchange.
//!
//! A single writer copies captured frames into one of [`SLOT_COUNT`] fixed
//! slots and publishes it; readers reserve the latest published slot by
//! bumping its reader count. Coordination is entirely atomic: per-slot state,
//! per-slot reader counts, and one published index.

pub mod channel;
mod pool;
pub mod reader;
pub mod slot;
pub mod stats;
pub mod writer;

pub use channel::FrameExchange;
pub use reader::FrameHandle;
pub use slot::{FrameGeometry, SlotIndex, SlotState, SLOT_COUNT};
pub use stats::StatsSnapshot;
pub use writer::{FilledSlot, FrameSequence, WriteSlot};
