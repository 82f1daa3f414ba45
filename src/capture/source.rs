//! Capture adapter boundary

use color_eyre::Result;

use super::frame::PixelView;

/// Anything that can hand over raw RGBA frames.
///
/// Implementations own the conversion from whatever the platform delivers
/// into contiguous RGBA rows; the exchange only copies the returned view.
pub trait FrameSource: Send {
    /// Width and height of every frame this source produces
    fn dimensions(&self) -> (u32, u32);

    /// Capture the next frame. The view stays valid until the next call.
    fn next_frame(&mut self) -> Result<PixelView<'_>>;
}
