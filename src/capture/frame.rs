use bytes::Bytes;
use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Owned frame snapshot - can be shared across threads without copying
#[derive(Clone)]
pub struct Frame {
    /// Tightly packed pixel data (stride == width * 4)
    pub data: Bytes,

    /// Frame metadata
    pub meta: Arc<FrameMetadata>,
}

/// Frame metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameMetadata {
    pub sequence: u64,
    pub width: u32,
    pub height: u32,
    pub stride: u32,
    pub format: PixelFormat,
    pub capture_timestamp_ns: u64,
}

/// Pixel formats we support
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    Rgba8888,
}

impl PixelFormat {
    pub const fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Rgba8888 => 4,
        }
    }
}

impl Frame {
    /// Convert into an `image` buffer, e.g. for PNG export.
    pub fn to_rgba_image(&self) -> Result<image::RgbaImage> {
        image::RgbaImage::from_raw(self.meta.width, self.meta.height, self.data.to_vec())
            .ok_or_else(|| eyre!("frame #{} is not tightly packed", self.meta.sequence))
    }
}

/// Borrowed RGBA pixels as handed over by a capture adapter.
#[derive(Debug, Clone, Copy)]
pub struct PixelView<'a> {
    pub data: &'a [u8],
    pub width: u32,
    pub height: u32,
    /// Row stride in bytes; may exceed `width * 4`.
    pub stride: usize,
}

impl<'a> PixelView<'a> {
    pub fn new(data: &'a [u8], width: u32, height: u32, stride: usize) -> Self {
        Self {
            data,
            width,
            height,
            stride,
        }
    }

    /// Tightly packed view (`stride == width * 4`).
    pub fn packed(data: &'a [u8], width: u32, height: u32) -> Self {
        Self::new(
            data,
            width,
            height,
            width as usize * PixelFormat::Rgba8888.bytes_per_pixel(),
        )
    }
}
