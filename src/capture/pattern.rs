//! Synthetic RGBA source for demos and soak tests

use color_eyre::{eyre::eyre, Result};
use tracing::info;

use super::frame::{PixelFormat, PixelView};
use super::source::FrameSource;

/// Byte written into row padding. Never produced as a fill value.
pub const PADDING_BYTE: u8 = 0x00;

/// Fills every pixel byte of frame `n` with the same value derived from `n`,
/// so a reader can detect torn frames by checking uniformity.
pub struct PatternSource {
    width: u32,
    height: u32,
    stride: usize,
    frames: u64,
    buffer: Vec<u8>,
}

impl PatternSource {
    pub fn new(width: u32, height: u32, row_padding: usize) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(eyre!("pattern source needs a non-empty frame, got {}x{}", width, height));
        }

        let row_bytes = width as usize * PixelFormat::Rgba8888.bytes_per_pixel();
        let stride = row_bytes + row_padding;
        let buffer = vec![PADDING_BYTE; stride * height as usize];

        info!(
            "Pattern source {}x{} (stride {}, {} bytes padding)",
            width, height, stride, row_padding
        );

        Ok(Self {
            width,
            height,
            stride,
            frames: 0,
            buffer,
        })
    }

    /// Fill value for the `n`th frame (1-based). Cycles through 1..=255;
    /// frame 0 maps to 1 like frame 1.
    pub fn fill_value(n: u64) -> u8 {
        (n.saturating_sub(1) % 255 + 1) as u8
    }

    pub fn frames_generated(&self) -> u64 {
        self.frames
    }
}

impl FrameSource for PatternSource {
    fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn next_frame(&mut self) -> Result<PixelView<'_>> {
        self.frames += 1;
        let value = Self::fill_value(self.frames);
        let row_bytes = self.width as usize * PixelFormat::Rgba8888.bytes_per_pixel();

        for row in self.buffer.chunks_mut(self.stride) {
            row[..row_bytes].fill(value);
        }

        Ok(PixelView::new(&self.buffer, self.width, self.height, self.stride))
    }
}

/// True if every byte of `data` has the same value (an untorn pattern frame).
pub fn is_uniform(data: &[u8]) -> bool {
    match data.split_first() {
        Some((first, rest)) => rest.iter().all(|b| b == first),
        None => true,
    }
}
