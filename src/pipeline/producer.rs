//! Capture loop feeding the frame exchange

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use color_eyre::{eyre::eyre, Result};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::capture::FrameSource;
use crate::exchange::FrameExchange;
use crate::utils;
use crate::CaptureConfig;

/// Totals reported when the producer stops
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProducerReport {
    pub captured: u64,
    pub submitted: u64,
    pub dropped: u64,
    pub last_sequence: u64,
}

/// The single writer of an exchange
pub struct Producer<S: FrameSource> {
    source: S,
    exchange: Arc<FrameExchange>,
    interval: Duration,
    pin_core: Option<usize>,
}

impl<S: FrameSource> Producer<S> {
    pub fn new(source: S, exchange: Arc<FrameExchange>, config: &CaptureConfig) -> Result<Self> {
        if config.fps == 0 {
            return Err(eyre!("capture fps must be positive"));
        }

        Ok(Self {
            source,
            exchange,
            interval: Duration::from_secs(1) / config.fps,
            pin_core: config.pin_core,
        })
    }

    /// Capture and submit frames at the configured rate until `stop` is set.
    ///
    /// Dropped frames are counted, not retried; the next tick captures a
    /// fresh one. Any other submit failure ends the loop.
    #[instrument(skip_all)]
    pub fn run(mut self, stop: &AtomicBool) -> Result<ProducerReport> {
        if let Some(core) = self.pin_core {
            utils::pin_current_thread(core);
        }

        info!("Producer started, frame interval {:?}", self.interval);
        let mut report = ProducerReport::default();
        let mut next_tick = Instant::now();

        while !stop.load(Ordering::Relaxed) {
            let frame = self.source.next_frame()?;
            report.captured += 1;

            match self.exchange.submit_frame(frame) {
                Ok(sequence) => {
                    report.submitted += 1;
                    report.last_sequence = sequence.get();
                }
                Err(reason) if reason.is_backpressure() => {
                    report.dropped += 1;
                    debug!("Frame dropped: {}", reason);
                }
                Err(reason) => {
                    warn!("Producer stopping: {}", reason);
                    return Err(reason.into());
                }
            }

            next_tick += self.interval;
            let now = Instant::now();
            if next_tick > now {
                std::thread::sleep(next_tick - now);
            } else {
                // Fell behind, don't try to catch up with a burst
                next_tick = now;
            }
        }

        info!(
            "Producer stopped: {} submitted, {} dropped",
            report.submitted, report.dropped
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::PatternSource;
    use crate::ExchangeConfig;

    fn capture_config(fps: u32) -> CaptureConfig {
        CaptureConfig {
            width: 4,
            height: 4,
            fps,
            row_padding: 8,
            pin_core: None,
        }
    }

    #[test]
    fn test_zero_fps_rejected() {
        let exchange = Arc::new(FrameExchange::new(ExchangeConfig::default()));
        let source = PatternSource::new(4, 4, 0).unwrap();
        assert!(Producer::new(source, exchange, &capture_config(0)).is_err());
    }

    #[test]
    fn test_producer_publishes_until_stopped() {
        let exchange = Arc::new(FrameExchange::with_geometry(4, 4, ExchangeConfig::default()).unwrap());
        let source = PatternSource::new(4, 4, 8).unwrap();
        let producer = Producer::new(source, exchange.clone(), &capture_config(1000)).unwrap();
        let stop = Arc::new(AtomicBool::new(false));

        let handle = std::thread::spawn({
            let stop = stop.clone();
            move || producer.run(&stop)
        });
        std::thread::sleep(Duration::from_millis(50));
        stop.store(true, Ordering::Relaxed);
        let report = handle.join().unwrap().unwrap();

        assert!(report.submitted > 0);
        assert_eq!(report.captured, report.submitted + report.dropped);
        assert_eq!(exchange.latest_sequence(), report.last_sequence);
    }

    #[test]
    fn test_geometry_mismatch_stops_producer() {
        let exchange = Arc::new(FrameExchange::with_geometry(8, 8, ExchangeConfig::default()).unwrap());
        let source = PatternSource::new(4, 4, 0).unwrap();
        let producer = Producer::new(source, exchange, &capture_config(1000)).unwrap();
        let stop = AtomicBool::new(false);
        assert!(producer.run(&stop).is_err());
    }
}
