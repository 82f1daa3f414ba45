//! Rolling latency window for frame pipeline readers

use std::time::Duration;

use ringbuf::traits::{Consumer, Observer, RingBuffer};
use ringbuf::HeapRb;

/// Fixed-size window of the most recent latency samples.
/// Old samples are overwritten once the window is full.
pub struct LatencyWindow {
    ring: HeapRb<Duration>,
    total_samples: u64,
}

impl LatencyWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            ring: HeapRb::new(capacity.max(1)),
            total_samples: 0,
        }
    }

    pub fn record(&mut self, latency: Duration) {
        self.ring.push_overwrite(latency);
        self.total_samples += 1;
    }

    /// Samples currently in the window
    pub fn len(&self) -> usize {
        self.ring.occupied_len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    /// Samples recorded since creation, including overwritten ones
    pub fn total_samples(&self) -> u64 {
        self.total_samples
    }

    pub fn average(&self) -> Option<Duration> {
        let len = self.len();
        if len == 0 {
            return None;
        }
        let sum: Duration = self.ring.iter().sum();
        Some(sum / len as u32)
    }

    /// Nearest-rank percentile, `p` in 0.0..=1.0
    pub fn percentile(&self, p: f64) -> Option<Duration> {
        let mut samples: Vec<Duration> = self.ring.iter().copied().collect();
        if samples.is_empty() {
            return None;
        }
        samples.sort_unstable();
        let rank = ((p.clamp(0.0, 1.0) * samples.len() as f64).ceil() as usize).max(1);
        Some(samples[rank - 1])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_window() {
        let window = LatencyWindow::new(4);
        assert!(window.is_empty());
        assert_eq!(window.average(), None);
        assert_eq!(window.percentile(0.99), None);
    }

    #[test]
    fn test_average_and_percentile() {
        let mut window = LatencyWindow::new(10);
        for ms in 1..=10 {
            window.record(Duration::from_millis(ms));
        }
        assert_eq!(window.len(), 10);
        assert_eq!(window.average(), Some(Duration::from_micros(5500)));
        assert_eq!(window.percentile(0.5), Some(Duration::from_millis(5)));
        assert_eq!(window.percentile(0.99), Some(Duration::from_millis(10)));
        assert_eq!(window.percentile(0.0), Some(Duration::from_millis(1)));
    }

    #[test]
    fn test_window_overwrites_oldest() {
        let mut window = LatencyWindow::new(2);
        window.record(Duration::from_millis(100));
        window.record(Duration::from_millis(1));
        window.record(Duration::from_millis(3));
        assert_eq!(window.len(), 2);
        assert_eq!(window.total_samples(), 3);
        assert_eq!(window.average(), Some(Duration::from_millis(2)));
    }
}
