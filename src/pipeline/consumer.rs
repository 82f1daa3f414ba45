//! Reader loop: borrow the latest frame, verify it, track latency

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use color_eyre::Result;
use flume::Sender;
use tracing::{debug, error, instrument};

use super::latency::LatencyWindow;
use super::ReaderReport;
use crate::capture::pattern::is_uniform;
use crate::exchange::FrameExchange;
use crate::utils::now_ns;
use crate::PipelineConfig;

/// One of many concurrent readers of an exchange
pub struct Consumer {
    id: usize,
    exchange: Arc<FrameExchange>,
    reports: Sender<ReaderReport>,
    window: LatencyWindow,
    poll_interval: Duration,
    report_interval: Duration,
}

impl Consumer {
    pub fn new(
        id: usize,
        exchange: Arc<FrameExchange>,
        reports: Sender<ReaderReport>,
        config: &PipelineConfig,
    ) -> Self {
        Self {
            id,
            exchange,
            reports,
            window: LatencyWindow::new(config.latency_window),
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            report_interval: Duration::from_millis(config.report_interval_ms),
        }
    }

    /// Poll until `stop` is set, sending a report every report interval and
    /// a final one on exit.
    #[instrument(skip_all, fields(reader = self.id))]
    pub fn run(mut self, stop: &AtomicBool) -> Result<ReaderReport> {
        let mut report = ReaderReport::new(self.id);
        let mut last_report = Instant::now();

        while !stop.load(Ordering::Relaxed) {
            self.poll(&mut report);

            if last_report.elapsed() >= self.report_interval {
                self.fill_latency(&mut report);
                if self.reports.send(report.clone()).is_err() {
                    debug!("Report channel closed, stopping reader");
                    break;
                }
                last_report = Instant::now();
            }

            std::thread::sleep(self.poll_interval);
        }

        self.fill_latency(&mut report);
        let _ = self.reports.send(report.clone());
        Ok(report)
    }

    fn poll(&mut self, report: &mut ReaderReport) {
        let handle = match self.exchange.borrow_current_frame() {
            Ok(handle) => handle,
            Err(reason) => {
                report.unavailable += 1;
                debug!("No frame: {}", reason);
                return;
            }
        };

        if handle.sequence() == report.last_sequence {
            report.repeats += 1;
            return;
        }
        if handle.sequence() < report.last_sequence {
            report.out_of_order += 1;
            error!(
                "Sequence went backwards: {} after {}",
                handle.sequence(),
                report.last_sequence
            );
        }

        if !is_uniform(&handle) {
            report.torn += 1;
            error!("Torn frame #{} on slot {:?}", handle.sequence(), handle.slot());
        }

        let latency = Duration::from_nanos(now_ns().saturating_sub(handle.timestamp_ns()));
        self.window.record(latency);
        report.frames_seen += 1;
        report.last_sequence = handle.sequence();
    }

    fn fill_latency(&self, report: &mut ReaderReport) {
        report.avg_latency = self.window.average();
        report.p99_latency = self.window.percentile(0.99);
    }
}
