//! Triframe demo: one synthetic producer, several verifying readers

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use color_eyre::{eyre::eyre, Result};
use tracing::{error, info, warn};
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use triframe::capture::PatternSource;
use triframe::pipeline::{Consumer, Producer, ProducerReport, ReaderReport};
use triframe::{Config, FrameExchange};

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("triframe=debug"));
    let fmt = tracing_subscriber::fmt::layer().with_timer(tracing_subscriber::fmt::time::uptime());
    let registry = tracing_subscriber::registry().with(filter).with(fmt);

    #[cfg(feature = "profiling")]
    let registry = registry.with(tracing_tracy::TracyLayer::default());

    registry.init();
}

fn join<T>(handle: JoinHandle<Result<T>>) -> Result<T> {
    handle
        .join()
        .map_err(|_| eyre!("worker thread panicked"))?
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize error handling and logging
    color_eyre::install()?;
    init_tracing();

    info!("Triframe launching...");

    // Load configuration
    let config_path = std::env::var_os("TRIFRAME_CONFIG").map(PathBuf::from);
    let config = Config::load(config_path.as_deref())?;
    triframe::CONFIG.store(Arc::new(config.clone()));

    let exchange = Arc::new(FrameExchange::default());
    exchange.initialize(config.capture.width, config.capture.height)?;

    let stop = Arc::new(AtomicBool::new(false));

    // Spawn the single writer
    let source = PatternSource::new(
        config.capture.width,
        config.capture.height,
        config.capture.row_padding,
    )?;
    let producer = Producer::new(source, exchange.clone(), &config.capture)?;
    let producer_handle = std::thread::Builder::new()
        .name("triframe-producer".into())
        .spawn({
            let stop = stop.clone();
            move || producer.run(&stop)
        })?;

    // Spawn readers
    let (tx, rx) = flume::unbounded::<ReaderReport>();
    let mut reader_handles = Vec::with_capacity(config.pipeline.readers);
    for id in 0..config.pipeline.readers {
        let consumer = Consumer::new(id, exchange.clone(), tx.clone(), &config.pipeline);
        let stop = stop.clone();
        reader_handles.push(
            std::thread::Builder::new()
                .name(format!("triframe-reader-{}", id))
                .spawn(move || consumer.run(&stop))?,
        );
    }
    drop(tx);

    // Supervise until timeout, Ctrl-C, or all readers gone
    let deadline = async {
        match config.pipeline.run_secs {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(deadline);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("Interrupted");
                break;
            }
            _ = &mut deadline => {
                info!("Run time elapsed");
                break;
            }
            report = rx.recv_async() => match report {
                Ok(report) => log_report(&report),
                Err(_) => {
                    warn!("All readers exited");
                    break;
                }
            },
        }
    }

    stop.store(true, Ordering::Relaxed);
    let producer_report = join(producer_handle)?;
    let mut readers = Vec::with_capacity(reader_handles.len());
    for handle in reader_handles {
        readers.push(join(handle)?);
    }

    summarize(&exchange, &producer_report, &readers);

    if let Some(path) = &config.pipeline.dump_path {
        match exchange.snapshot() {
            Ok(frame) => {
                frame.to_rgba_image()?.save(path)?;
                info!("Dumped frame #{} to {}", frame.meta.sequence, path.display());
            }
            Err(reason) => warn!("Nothing to dump: {}", reason),
        }
    }

    exchange.release();

    if readers.iter().any(|r| !r.is_healthy()) {
        return Err(eyre!("readers observed torn or reordered frames"));
    }

    info!("Triframe shutting down");
    Ok(())
}

fn log_report(report: &ReaderReport) {
    info!(
        "reader {}: {} frames, {} repeats, {} unavailable, avg {:?}, p99 {:?}",
        report.reader,
        report.frames_seen,
        report.repeats,
        report.unavailable,
        report.avg_latency.unwrap_or_default(),
        report.p99_latency.unwrap_or_default(),
    );
    if !report.is_healthy() {
        error!(
            "reader {}: {} torn, {} out of order",
            report.reader, report.torn, report.out_of_order
        );
    }
}

fn summarize(exchange: &FrameExchange, producer: &ProducerReport, readers: &[ReaderReport]) {
    let stats = exchange.stats();
    info!(
        "producer: {} captured, {} submitted, {} dropped, last #{}",
        producer.captured, producer.submitted, producer.dropped, producer.last_sequence
    );
    info!(
        "exchange: {} committed, {} dropped, {} reads, {} unavailable, {} underflows",
        stats.frames_committed,
        stats.frames_dropped,
        stats.reads,
        stats.reads_unavailable,
        stats.reader_underflows
    );
    for report in readers {
        log_report(report);
    }
}
