//! Conversion of raw device formats into the fixed BGRA frame layout

/// Raw formats a V4L2 node may hand us
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceFormat {
    Yuyv,
    Mjpeg,
}

impl DeviceFormat {
    pub fn fourcc(self) -> &'static [u8; 4] {
        match self {
            DeviceFormat::Yuyv => b"YUYV",
            DeviceFormat::Mjpeg => b"MJPG",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("buffer too short: got {got} bytes, need {need}")]
    ShortBuffer { got: usize, need: usize },

    #[error("jpeg decode failed: {0}")]
    Jpeg(String),

    #[error("decoded size {got_w}x{got_h} does not match {want_w}x{want_h}")]
    SizeMismatch {
        got_w: usize,
        got_h: usize,
        want_w: u32,
        want_h: u32,
    },
}

/// Decode one raw device buffer into tightly packed BGRA.
pub fn decode_to_bgra(
    data: &[u8],
    format: DeviceFormat,
    width: u32,
    height: u32,
    stride: u32,
    out: &mut Vec<u8>,
) -> Result<(), DecodeError> {
    match format {
        DeviceFormat::Yuyv => yuyv_to_bgra(data, width, height, stride, out),
        DeviceFormat::Mjpeg => {
            let mut decoder = zune_jpeg::JpegDecoder::new(data);
            let rgb = decoder
                .decode()
                .map_err(|e| DecodeError::Jpeg(format!("{e:?}")))?;
            let (w, h) = decoder
                .dimensions()
                .ok_or_else(|| DecodeError::Jpeg("missing dimensions".into()))?;
            if w != width as usize || h != height as usize {
                return Err(DecodeError::SizeMismatch {
                    got_w: w,
                    got_h: h,
                    want_w: width,
                    want_h: height,
                });
            }
            rgb_to_bgra(&rgb, out);
            Ok(())
        }
    }
}

/// BT.601 limited-range YUYV 4:2:2 to BGRA. `stride` is the device row pitch in bytes.
pub fn yuyv_to_bgra(
    data: &[u8],
    width: u32,
    height: u32,
    stride: u32,
    out: &mut Vec<u8>,
) -> Result<(), DecodeError> {
    let row = width as usize * 2;
    let pitch = (stride as usize).max(row);
    let need = pitch * (height as usize).saturating_sub(1) + row;
    if height == 0 || data.len() < need {
        return Err(DecodeError::ShortBuffer {
            got: data.len(),
            need,
        });
    }

    out.clear();
    out.reserve(width as usize * height as usize * 4);

    for line in data.chunks(pitch).take(height as usize) {
        for chunk in line[..row].chunks_exact(4) {
            let (y0, u, y1, v) = (chunk[0], chunk[1], chunk[2], chunk[3]);
            push_yuv(out, y0, u, v);
            push_yuv(out, y1, u, v);
        }
    }
    Ok(())
}

fn push_yuv(out: &mut Vec<u8>, y: u8, u: u8, v: u8) {
    let c = (y as i32 - 16).max(0);
    let d = u as i32 - 128;
    let e = v as i32 - 128;

    let r = (298 * c + 409 * e + 128) >> 8;
    let g = (298 * c - 100 * d - 208 * e + 128) >> 8;
    let b = (298 * c + 516 * d + 128) >> 8;

    out.push(b.clamp(0, 255) as u8);
    out.push(g.clamp(0, 255) as u8);
    out.push(r.clamp(0, 255) as u8);
    out.push(255);
}

fn rgb_to_bgra(rgb: &[u8], out: &mut Vec<u8>) {
    out.clear();
    out.reserve(rgb.len() / 3 * 4);
    for px in rgb.chunks_exact(3) {
        out.extend_from_slice(&[px[2], px[1], px[0], 255]);
    }
}
