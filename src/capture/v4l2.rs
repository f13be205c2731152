//! V4L2 frame source
//!
//! Opens a capture node, negotiates a raw format the node offers (YUYV or
//! MJPEG) at the preset resolution and converts every buffer to BGRA before
//! it reaches the pipeline.

use std::path::Path;
use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, info, instrument, warn};
use v4l::buffer::Type;
use v4l::capability::Flags as CapFlags;
use v4l::framesize::FrameSizeEnum;
use v4l::io::traits::CaptureStream;
use v4l::prelude::MmapStream;
use v4l::video::Capture;
use v4l::{Device, FourCC};

use crate::capture::decode::{decode_to_bgra, DeviceFormat};
use crate::capture::frame::PixelFormat;
use crate::capture::session::{spawn_session, CaptureHandle, FrameProducer, FramePublisher};
use crate::capture::source::{CapturePreset, DeviceDescriptor, Facing, FrameSource, OnFrame};
use crate::error::StartError;
use crate::CaptureConfig;

/// Card name fragments that mark a user-facing camera
const FRONT_HINTS: [&str; 3] = ["front", "user", "selfie"];

/// Preference order when a node offers several raw formats
const FORMAT_PREFERENCE: [DeviceFormat; 2] = [DeviceFormat::Yuyv, DeviceFormat::Mjpeg];

pub struct V4l2Source {
    preset: CapturePreset,
    buffer_count: u32,
    front_devices: Vec<String>,
}

impl V4l2Source {
    pub fn new(config: &CaptureConfig) -> Self {
        Self {
            preset: config.preset,
            buffer_count: config.buffer_count.max(2),
            front_devices: config.front_devices.clone(),
        }
    }

    /// V4L2 carries no mounting information, so guess from the card name
    /// unless the node is listed explicitly.
    fn facing_of(&self, path: &str, card: &str) -> Facing {
        let card = card.to_lowercase();
        if self.front_devices.iter().any(|p| p == path)
            || FRONT_HINTS.iter().any(|hint| card.contains(hint))
        {
            Facing::Front
        } else {
            Facing::Back
        }
    }
}

impl FrameSource for V4l2Source {
    fn list_devices(&self, facing: Facing) -> Vec<DeviceDescriptor> {
        info!("Enumerating V4L2 capture devices...");

        let mut devices = Vec::new();
        for node in v4l::context::enum_devices() {
            let path = node.path().to_string_lossy().into_owned();
            let dev = match Device::with_path(&path) {
                Ok(dev) => dev,
                Err(e) => {
                    debug!("Skipping {}: {}", path, e);
                    continue;
                }
            };
            let caps = match dev.query_caps() {
                Ok(caps) => caps,
                Err(e) => {
                    warn!("Failed to query {}: {}", path, e);
                    continue;
                }
            };
            if !caps.capabilities.contains(CapFlags::VIDEO_CAPTURE) {
                continue;
            }

            let descriptor = DeviceDescriptor {
                facing: self.facing_of(&path, &caps.card),
                name: caps.card.clone(),
                id: path,
            };
            debug!("Found {:?}", descriptor);
            if descriptor.facing == facing {
                devices.push(descriptor);
            }
        }

        devices.sort_by(|a, b| a.id.cmp(&b.id));
        devices
    }

    #[instrument(skip(self, on_frame))]
    fn start(
        &mut self,
        device: &DeviceDescriptor,
        format: PixelFormat,
        on_frame: OnFrame,
    ) -> Result<CaptureHandle, StartError> {
        if format != PixelFormat::Bgra8 {
            return Err(StartError::SessionConfigError(format!(
                "V4L2 source only delivers Bgra8, not {format:?}"
            )));
        }

        let path = device.id.clone();
        let preset = self.preset;
        let buffer_count = self.buffer_count;

        spawn_session(
            "v4l2",
            format,
            move || V4l2Producer::open(&path, preset, buffer_count),
            on_frame,
        )
    }
}

/// Whether `sizes` contains `width`x`height`.
fn supports_size(sizes: &[FrameSizeEnum], width: u32, height: u32) -> bool {
    sizes.iter().any(|size| match size {
        FrameSizeEnum::Discrete(d) => d.width == width && d.height == height,
        FrameSizeEnum::Stepwise(s) => {
            let step_w = s.step_width.max(1);
            let step_h = s.step_height.max(1);
            (s.min_width..=s.max_width).contains(&width)
                && (s.min_height..=s.max_height).contains(&height)
                && (width - s.min_width) % step_w == 0
                && (height - s.min_height) % step_h == 0
        }
    })
}

struct V4l2Producer {
    _device: Device,
    stream: MmapStream<'static>,
    format: DeviceFormat,
    width: u32,
    height: u32,
    stride: u32,
    scratch: Vec<u8>,
}

impl V4l2Producer {
    /// Runs on the capture thread.
    fn open(path: &str, preset: CapturePreset, buffer_count: u32) -> Result<Self, StartError> {
        if !Path::new(path).exists() {
            return Err(StartError::DeviceUnavailable(format!("{path} does not exist")));
        }

        let device = Device::with_path(path)
            .map_err(|e| StartError::DeviceUnavailable(format!("{path}: {e}")))?;
        let caps = device
            .query_caps()
            .map_err(|e| StartError::DeviceUnavailable(format!("{path}: {e}")))?;
        info!("Device: {} ({})", caps.card, caps.driver);

        if !caps.capabilities.contains(CapFlags::VIDEO_CAPTURE) {
            return Err(StartError::DeviceUnavailable(format!(
                "{path} does not support video capture"
            )));
        }

        let offered = device
            .enum_formats()
            .map_err(|e| StartError::SessionConfigError(format!("format query: {e}")))?;
        let raw = FORMAT_PREFERENCE
            .into_iter()
            .find(|f| offered.iter().any(|o| o.fourcc == FourCC::new(f.fourcc())))
            .ok_or_else(|| {
                StartError::SessionConfigError(format!("{path} offers neither YUYV nor MJPEG"))
            })?;

        let (width, height) = preset.resolution();
        let sizes: Vec<FrameSizeEnum> = device
            .enum_framesizes(FourCC::new(raw.fourcc()))
            .map_err(|e| StartError::SessionConfigError(format!("frame size query: {e}")))?
            .into_iter()
            .map(|fs| fs.size)
            .collect();
        let unsupported = || StartError::PresetUnsupported {
            preset: preset.to_string(),
            device: path.to_string(),
        };
        if !supports_size(&sizes, width, height) {
            return Err(unsupported());
        }

        let mut fmt = device
            .format()
            .map_err(|e| StartError::SessionConfigError(format!("get format: {e}")))?;
        fmt.width = width;
        fmt.height = height;
        fmt.fourcc = FourCC::new(raw.fourcc());
        let fmt = device
            .set_format(&fmt)
            .map_err(|e| StartError::SessionConfigError(format!("set format: {e}")))?;
        if fmt.width != width || fmt.height != height {
            return Err(unsupported());
        }

        let mut stream = MmapStream::with_buffers(&device, Type::VideoCapture, buffer_count)
            .map_err(|e| StartError::SessionConfigError(format!("buffer setup: {e}")))?;
        stream.set_timeout(Duration::from_millis(500));

        info!(
            "Capture stream started: {:?} {}x{} with {} buffers",
            raw, width, height, buffer_count
        );

        Ok(Self {
            _device: device,
            stream,
            format: raw,
            width,
            height,
            stride: fmt.stride,
            scratch: Vec::new(),
        })
    }
}

impl FrameProducer for V4l2Producer {
    fn produce(&mut self, out: &mut FramePublisher) -> std::io::Result<()> {
        let (buf, meta) = self.stream.next()?;
        let used = (meta.bytesused as usize).min(buf.len());
        let used = if used == 0 { buf.len() } else { used };

        decode_to_bgra(
            &buf[..used],
            self.format,
            self.width,
            self.height,
            self.stride,
            &mut self.scratch,
        )
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

        let data = Bytes::copy_from_slice(&self.scratch);
        out.publish(data, self.width, self.height);
        Ok(())
    }
}
