//! Camera capture backends

pub mod decode;
pub mod frame;
pub mod session;
pub mod source;
pub mod synthetic;
pub mod v4l2;

pub use frame::{Frame, FrameMetadata, PixelFormat};
pub use session::CaptureHandle;
pub use source::{CapturePreset, DeviceDescriptor, Facing, FrameSource, OnFrame};
pub use synthetic::SyntheticSource;
pub use v4l2::V4l2Source;

/// Pixel layout every frame is delivered in
pub const FRAME_PIXEL_FORMAT: PixelFormat = PixelFormat::Bgra8;
