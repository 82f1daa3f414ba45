pub mod frame;
pub mod pattern;
pub mod source;

pub use frame::{Frame, FrameMetadata, PixelFormat, PixelView};
pub use pattern::PatternSource;
pub use source::FrameSource;
