use image::RgbaImage;

use crate::capture::frame::{Frame, PixelFormat};
use crate::error::InvalidGeometry;
use crate::pipeline::crop::Rect;

/// Image type flowing through the filter chain: RGBA8 with straight alpha.
pub type Image = RgbaImage;

/// Copy a frame into an owned [`Image`], honouring its stride and byte order.
///
/// Frames with a zero dimension or a buffer too short for their metadata are
/// rejected so nothing degenerate enters the filter chain.
pub fn image_from_frame(frame: &Frame<'_>) -> Result<Image, InvalidGeometry> {
    let meta = frame.meta;
    let invalid = InvalidGeometry {
        width: meta.width as f64,
        height: meta.height as f64,
        aspect: 0.0,
    };
    if meta.width == 0 || meta.height == 0 {
        return Err(invalid);
    }

    let row = meta.width as usize * meta.format.bytes_per_pixel() as usize;
    let stride = (meta.stride as usize).max(row);
    let need = stride * (meta.height as usize - 1) + row;
    if frame.data.len() < need {
        return Err(invalid);
    }

    let mut pixels = Vec::with_capacity(row * meta.height as usize);
    for line in frame.data.chunks(stride).take(meta.height as usize) {
        let line = &line[..row];
        match meta.format {
            PixelFormat::Rgba8 => pixels.extend_from_slice(line),
            PixelFormat::Bgra8 => {
                for px in line.chunks_exact(4) {
                    pixels.extend_from_slice(&[px[2], px[1], px[0], px[3]]);
                }
            }
        }
    }

    RgbaImage::from_raw(meta.width, meta.height, pixels).ok_or(invalid)
}

/// Full extent of an image as a rectangle at the origin.
pub fn extent(image: &Image) -> Rect {
    Rect::new(0.0, 0.0, image.width() as f64, image.height() as f64)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::capture::frame::FrameMetadata;

    fn meta(width: u32, height: u32, stride: u32, format: PixelFormat) -> FrameMetadata {
        FrameMetadata {
            sequence: 1,
            width,
            height,
            stride,
            format,
            timestamp: Duration::ZERO,
        }
    }

    #[test]
    fn bgra_is_swizzled_to_rgba() {
        let data = [1, 2, 3, 4, 5, 6, 7, 8];
        let frame = Frame {
            data: &data,
            meta: meta(2, 1, 8, PixelFormat::Bgra8),
        };
        let img = image_from_frame(&frame).unwrap();
        assert_eq!(img.as_raw(), &vec![3, 2, 1, 4, 7, 6, 5, 8]);
    }

    #[test]
    fn stride_padding_is_skipped() {
        let data = [
            9, 9, 9, 9, 0, 0, 0, 0, //
            8, 8, 8, 8,
        ];
        let frame = Frame {
            data: &data,
            meta: meta(1, 2, 8, PixelFormat::Rgba8),
        };
        let img = image_from_frame(&frame).unwrap();
        assert_eq!(img.dimensions(), (1, 2));
        assert_eq!(img.as_raw(), &vec![9, 9, 9, 9, 8, 8, 8, 8]);
    }

    #[test]
    fn zero_sized_frame_is_rejected() {
        let frame = Frame {
            data: &[],
            meta: meta(0, 10, 0, PixelFormat::Bgra8),
        };
        assert!(image_from_frame(&frame).is_err());
    }

    #[test]
    fn truncated_buffer_is_rejected() {
        let data = [0u8; 12];
        let frame = Frame {
            data: &data,
            meta: meta(2, 2, 8, PixelFormat::Bgra8),
        };
        assert!(image_from_frame(&frame).is_err());
    }
}
