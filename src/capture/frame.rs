use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Borrowed view of one captured frame.
///
/// The lifetime is tied to the `on_frame` callback that receives it, so the
/// pixel data cannot outlive the call; the source reclaims the buffer as soon
/// as the callback returns.
#[derive(Debug, Clone, Copy)]
pub struct Frame<'a> {
    pub data: &'a [u8],
    pub meta: FrameMetadata,
}

impl Frame<'_> {
    pub fn width(&self) -> u32 {
        self.meta.width
    }

    pub fn height(&self) -> u32 {
        self.meta.height
    }

    /// Presentation timestamp relative to the start of the capture session.
    pub fn timestamp(&self) -> Duration {
        self.meta.timestamp
    }
}

/// Frame metadata
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameMetadata {
    pub sequence: u64,
    pub width: u32,
    pub height: u32,
    /// Bytes per row
    pub stride: u32,
    pub format: PixelFormat,
    pub timestamp: Duration,
}

/// Pixel formats frames can be delivered in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    /// Interleaved B, G, R, A bytes
    Bgra8,
    /// Interleaved R, G, B, A bytes
    Rgba8,
}

impl PixelFormat {
    pub const fn bytes_per_pixel(self) -> u32 {
        match self {
            PixelFormat::Bgra8 | PixelFormat::Rgba8 => 4,
        }
    }
}

/// A frame owned by the capture session while it waits in the mailbox.
#[derive(Debug, Clone)]
pub(crate) struct CapturedFrame {
    pub data: Bytes,
    pub meta: FrameMetadata,
}

impl CapturedFrame {
    pub fn as_frame(&self) -> Frame<'_> {
        Frame {
            data: &self.data,
            meta: self.meta,
        }
    }
}

/// Hands out strictly increasing presentation timestamps for one session.
#[derive(Debug)]
pub(crate) struct FrameClock {
    started: std::time::Instant,
    last: Option<Duration>,
    sequence: u64,
}

impl FrameClock {
    pub fn new() -> Self {
        Self {
            started: std::time::Instant::now(),
            last: None,
            sequence: 0,
        }
    }

    /// Returns the next (sequence, timestamp) pair.
    pub fn tick(&mut self) -> (u64, Duration) {
        let mut now = self.started.elapsed();
        if let Some(last) = self.last {
            if now <= last {
                now = last + Duration::from_nanos(1);
            }
        }
        self.last = Some(now);
        self.sequence += 1;
        (self.sequence, now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clock_timestamps_strictly_increase() {
        let mut clock = FrameClock::new();
        let mut previous = Duration::ZERO;
        for expected_seq in 1..=100 {
            let (seq, ts) = clock.tick();
            assert_eq!(seq, expected_seq);
            assert!(ts > previous || (seq == 1 && ts >= previous));
            previous = ts;
        }
    }

    #[test]
    fn captured_frame_borrows_its_buffer() {
        let captured = CapturedFrame {
            data: Bytes::from(vec![1u8; 16]),
            meta: FrameMetadata {
                sequence: 1,
                width: 2,
                height: 2,
                stride: 8,
                format: PixelFormat::Bgra8,
                timestamp: Duration::from_millis(5),
            },
        };
        let frame = captured.as_frame();
        assert_eq!(frame.data.len(), 16);
        assert_eq!(frame.width(), 2);
        assert_eq!(frame.timestamp(), Duration::from_millis(5));
    }
}
