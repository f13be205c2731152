use std::fmt;

use serde::{Deserialize, Serialize};

use crate::capture::frame::{Frame, PixelFormat};
use crate::capture::session::CaptureHandle;
use crate::error::StartError;

/// Which way a capture device points
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Facing {
    Front,
    Back,
    External,
}

/// A capture device discovered by a [`FrameSource`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    /// Backend-specific identifier (a device node path for V4L2)
    pub id: String,
    pub name: String,
    pub facing: Facing,
}

/// Capture quality preset requested from the session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapturePreset {
    Low,
    #[default]
    Medium,
    High,
    Vga640x480,
    Hd1280x720,
    Hd1920x1080,
}

impl CapturePreset {
    /// Frame size requested for this preset.
    pub const fn resolution(self) -> (u32, u32) {
        match self {
            CapturePreset::Low => (192, 144),
            CapturePreset::Medium => (480, 360),
            CapturePreset::High | CapturePreset::Hd1280x720 => (1280, 720),
            CapturePreset::Vga640x480 => (640, 480),
            CapturePreset::Hd1920x1080 => (1920, 1080),
        }
    }
}

impl fmt::Display for CapturePreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (w, h) = self.resolution();
        write!(f, "{self:?} ({w}x{h})")
    }
}

/// Frame callback. Invoked on the session's delivery thread.
pub type OnFrame = Box<dyn FnMut(Frame<'_>) + Send + 'static>;

/// A camera backend that can enumerate devices and stream frames.
///
/// Implemented by the V4L2 backend, the synthetic test-pattern backend and
/// test doubles.
pub trait FrameSource: Send {
    /// Devices pointing the requested way. An empty list is not an error.
    fn list_devices(&self, facing: Facing) -> Vec<DeviceDescriptor>;

    /// Configure and start continuous capture on `device`.
    ///
    /// `on_frame` runs for every delivered frame on a background thread until
    /// the returned handle is stopped. Late frames are discarded, never queued.
    fn start(
        &mut self,
        device: &DeviceDescriptor,
        format: PixelFormat,
        on_frame: OnFrame,
    ) -> Result<CaptureHandle, StartError>;

    /// Tear the session down. No `on_frame` call happens after this returns.
    fn stop(&mut self, handle: CaptureHandle) {
        handle.stop();
    }
}

impl FrameSource for Box<dyn FrameSource> {
    fn list_devices(&self, facing: Facing) -> Vec<DeviceDescriptor> {
        (**self).list_devices(facing)
    }

    fn start(
        &mut self,
        device: &DeviceDescriptor,
        format: PixelFormat,
        on_frame: OnFrame,
    ) -> Result<CaptureHandle, StartError> {
        (**self).start(device, format, on_frame)
    }

    fn stop(&mut self, handle: CaptureHandle) {
        (**self).stop(handle)
    }
}
