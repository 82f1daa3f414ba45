pub mod consumer;
pub mod latency;
pub mod producer;

use std::time::Duration;

use serde::Serialize;

pub use consumer::Consumer;
pub use latency::LatencyWindow;
pub use producer::{Producer, ProducerReport};

/// Running totals of one reader, sent periodically to the supervisor
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReaderReport {
    pub reader: usize,
    pub frames_seen: u64,
    pub repeats: u64,
    pub unavailable: u64,
    pub torn: u64,
    pub out_of_order: u64,
    pub last_sequence: u64,
    pub avg_latency: Option<Duration>,
    pub p99_latency: Option<Duration>,
}

impl ReaderReport {
    pub fn new(reader: usize) -> Self {
        Self {
            reader,
            ..Self::default()
        }
    }

    /// A reader that saw torn or reordered frames broke the exchange contract
    pub fn is_healthy(&self) -> bool {
        self.torn == 0 && self.out_of_order == 0
    }
}
