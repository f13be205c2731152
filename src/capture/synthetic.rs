//! Test-pattern frame source
//!
//! Generates moving colour bars at the preset resolution. Used for headless
//! runs and anywhere a real camera is not available.

use std::time::{Duration, Instant};

use bytes::Bytes;
use tracing::info;

use crate::capture::frame::PixelFormat;
use crate::capture::session::{spawn_session, CaptureHandle, FrameProducer, FramePublisher};
use crate::capture::source::{CapturePreset, DeviceDescriptor, Facing, FrameSource, OnFrame};
use crate::error::StartError;

pub const SYNTHETIC_DEVICE_ID: &str = "synthetic://colour-bars";

/// BGRA colour bars, left to right
const BARS: [[u8; 4]; 8] = [
    [255, 255, 255, 255], // white
    [0, 255, 255, 255],   // yellow
    [255, 255, 0, 255],   // cyan
    [0, 255, 0, 255],     // green
    [255, 0, 255, 255],   // magenta
    [0, 0, 255, 255],     // red
    [255, 0, 0, 255],     // blue
    [0, 0, 0, 255],       // black
];

/// A frame source with one simulated rear camera.
#[derive(Debug, Clone)]
pub struct SyntheticSource {
    preset: CapturePreset,
    fps: u32,
    facing: Facing,
}

impl SyntheticSource {
    pub fn new(preset: CapturePreset, fps: u32) -> Self {
        Self {
            preset,
            fps: fps.max(1),
            facing: Facing::Back,
        }
    }

    /// Report the simulated camera as facing `facing` instead.
    pub fn with_facing(mut self, facing: Facing) -> Self {
        self.facing = facing;
        self
    }

    pub fn device(&self) -> DeviceDescriptor {
        DeviceDescriptor {
            id: SYNTHETIC_DEVICE_ID.to_string(),
            name: "Synthetic colour bars".to_string(),
            facing: self.facing,
        }
    }
}

impl FrameSource for SyntheticSource {
    fn list_devices(&self, facing: Facing) -> Vec<DeviceDescriptor> {
        if facing == self.facing {
            vec![self.device()]
        } else {
            Vec::new()
        }
    }

    fn start(
        &mut self,
        device: &DeviceDescriptor,
        format: PixelFormat,
        on_frame: OnFrame,
    ) -> Result<CaptureHandle, StartError> {
        if device.id != SYNTHETIC_DEVICE_ID {
            return Err(StartError::DeviceUnavailable(device.id.clone()));
        }

        let (width, height) = self.preset.resolution();
        let interval = Duration::from_secs(1) / self.fps;
        info!(
            "Starting synthetic source {}x{} @ {} fps",
            width, height, self.fps
        );

        spawn_session(
            "synthetic",
            format,
            move || {
                Ok(ColourBars {
                    width,
                    height,
                    format,
                    interval,
                    phase: 0,
                    next_due: Instant::now(),
                })
            },
            on_frame,
        )
    }
}

struct ColourBars {
    width: u32,
    height: u32,
    format: PixelFormat,
    interval: Duration,
    phase: u32,
    next_due: Instant,
}

impl ColourBars {
    fn render(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity((self.width * self.height * 4) as usize);
        let bar_width = (self.width / BARS.len() as u32).max(1);
        for _y in 0..self.height {
            for x in 0..self.width {
                let bar = (((x + self.phase) % self.width) / bar_width) as usize;
                let [b, g, r, a] = BARS[bar.min(BARS.len() - 1)];
                match self.format {
                    PixelFormat::Bgra8 => data.extend_from_slice(&[b, g, r, a]),
                    PixelFormat::Rgba8 => data.extend_from_slice(&[r, g, b, a]),
                }
            }
        }
        data
    }
}

impl FrameProducer for ColourBars {
    fn produce(&mut self, out: &mut FramePublisher) -> std::io::Result<()> {
        let now = Instant::now();
        if self.next_due > now {
            std::thread::sleep(self.next_due - now);
        }
        self.next_due += self.interval;

        let frame = self.render();
        out.publish(Bytes::from(frame), self.width, self.height);
        self.phase = (self.phase + 4) % self.width.max(1);
        Ok(())
    }
}
