pub mod capture;
pub mod error;
pub mod exchange;
pub mod pipeline;
pub mod utils;

use std::path::{Path, PathBuf};
use std::time::Duration;

use arc_swap::ArcSwap;
use color_eyre::Result;
use serde::{Deserialize, Serialize};
use tracing::info;

pub use capture::{Frame, FrameMetadata, PixelFormat, PixelView};
pub use error::{AllocError, DropReason, Unavailable};
pub use exchange::{FrameExchange, FrameHandle, FrameSequence, SLOT_COUNT};

/// Global configuration that can be atomically swapped at runtime
pub static CONFIG: once_cell::sync::Lazy<ArcSwap<Config>> =
    once_cell::sync::Lazy::new(|| ArcSwap::from_pointee(Config::default()));

/// Default config file looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "triframe.toml";

/// System configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub exchange: ExchangeConfig,
    pub capture: CaptureConfig,
    pub pipeline: PipelineConfig,
}

/// Tuning knobs for the exchange protocol
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExchangeConfig {
    /// Reservation attempts before a reader gives up
    pub read_attempts: u32,
    /// How long a reader waits for an in-flight commit to land
    pub commit_wait_us: u64,
    /// Teardown logs a warning once it has waited this long
    pub release_warn_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    /// Extra bytes at the end of each source row
    pub row_padding: usize,
    /// Pin the producer thread to this core
    pub pin_core: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub readers: usize,
    pub poll_interval_ms: u64,
    pub report_interval_ms: u64,
    pub latency_window: usize,
    /// Stop after this many seconds; run until Ctrl-C when unset
    pub run_secs: Option<u64>,
    /// Write the last frame here as PNG on shutdown
    pub dump_path: Option<PathBuf>,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            read_attempts: 3,
            commit_wait_us: 50,
            release_warn_ms: 1000,
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            width: 800,
            height: 600,
            fps: 60,
            row_padding: 0,
            pin_core: None,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            readers: 3,
            poll_interval_ms: 4,
            report_interval_ms: 1000,
            latency_window: 256,
            run_secs: Some(10),
            dump_path: None,
        }
    }
}

impl ExchangeConfig {
    pub fn commit_wait(&self) -> Duration {
        Duration::from_micros(self.commit_wait_us)
    }

    pub fn release_warn(&self) -> Duration {
        Duration::from_millis(self.release_warn_ms)
    }
}

impl Config {
    /// Layered load: defaults, then the TOML file (if present), then
    /// `TRIFRAME_*` environment variables (`__` between sections, e.g.
    /// `TRIFRAME_CAPTURE__FPS=30`).
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_FILE));
        info!("Loading configuration from {}", path.display());

        let config = config::Config::builder()
            .add_source(config::File::from(path).required(false))
            .add_source(
                config::Environment::with_prefix("TRIFRAME")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        Ok(config)
    }
}
