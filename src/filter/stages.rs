//! Per-pixel implementations of the filter catalog

use std::sync::OnceLock;

use super::Image;

/// Sepia colour matrix, rows produce R, G, B
const SEPIA: [[f32; 3]; 3] = [
    [0.393, 0.769, 0.189],
    [0.349, 0.686, 0.168],
    [0.272, 0.534, 0.131],
];

/// Map colours towards sepia. `intensity` 0 leaves the image untouched, 1 is
/// full sepia.
pub fn tone_map(mut image: Image, intensity: f32) -> Image {
    let t = intensity.clamp(0.0, 1.0);
    if t == 0.0 {
        return image;
    }

    for px in image.pixels_mut() {
        let [r, g, b, a] = px.0;
        let src = [r as f32, g as f32, b as f32];
        for (channel, row) in SEPIA.iter().enumerate() {
            let sepia = row[0] * src[0] + row[1] * src[1] + row[2] * src[2];
            let mixed = src[channel] + (sepia - src[channel]) * t;
            px.0[channel] = mixed.round().clamp(0.0, 255.0) as u8;
        }
        px.0[3] = a;
    }
    image
}

/// Per-channel lookup tables for the instant-film look: lifted blacks, a
/// warm cast and slightly compressed highlights.
fn instant_curves() -> &'static [[u8; 256]; 3] {
    static CURVES: OnceLock<[[u8; 256]; 3]> = OnceLock::new();
    CURVES.get_or_init(|| {
        // (black lift, white point, gamma) per channel
        let params = [(0.09, 0.98, 0.92), (0.07, 0.95, 0.97), (0.06, 0.86, 1.06)];
        let mut curves = [[0u8; 256]; 3];
        for (curve, (lift, white, gamma)) in curves.iter_mut().zip(params) {
            for (i, out) in curve.iter_mut().enumerate() {
                let x = i as f32 / 255.0;
                let y = lift + (white - lift) * x.powf(gamma);
                *out = (y * 255.0).round().clamp(0.0, 255.0) as u8;
            }
        }
        curves
    })
}

/// Parameterless stylisation: instant-film tone curves plus a mild
/// desaturation.
pub fn stylize(mut image: Image) -> Image {
    let curves = instant_curves();
    for px in image.pixels_mut() {
        let [r, g, b, a] = px.0;
        let curved = [
            curves[0][r as usize] as f32,
            curves[1][g as usize] as f32,
            curves[2][b as usize] as f32,
        ];
        let luma = 0.299 * curved[0] + 0.587 * curved[1] + 0.114 * curved[2];
        for (channel, value) in curved.iter().enumerate() {
            let v = luma + (value - luma) * 0.85;
            px.0[channel] = v.round().clamp(0.0, 255.0) as u8;
        }
        px.0[3] = a;
    }
    image
}

/// Darken towards the edges. `radius` is a fraction of the half-diagonal at
/// which darkening reaches `intensity`.
pub fn vignette(mut image: Image, radius: f32, intensity: f32) -> Image {
    let (w, h) = image.dimensions();
    let cx = w as f32 / 2.0;
    let cy = h as f32 / 2.0;
    let reach = (cx.hypot(cy) * radius).max(f32::EPSILON);
    let strength = intensity.clamp(0.0, 1.0);

    for (x, y, px) in image.enumerate_pixels_mut() {
        let d = ((x as f32 + 0.5 - cx).hypot(y as f32 + 0.5 - cy) / reach).min(1.0);
        // smoothstep falloff
        let falloff = d * d * (3.0 - 2.0 * d);
        let scale = 1.0 - strength * falloff;
        for channel in 0..3 {
            px.0[channel] = (px.0[channel] as f32 * scale).round() as u8;
        }
    }
    image
}

#[cfg(test)]
mod tests {
    use image::Rgba;

    use super::*;

    fn solid(color: [u8; 4]) -> Image {
        Image::from_pixel(4, 4, Rgba(color))
    }

    #[test]
    fn tone_map_zero_intensity_is_identity() {
        let img = solid([10, 200, 30, 255]);
        assert_eq!(tone_map(img.clone(), 0.0), img);
    }

    #[test]
    fn tone_map_full_intensity_is_sepia() {
        let out = tone_map(solid([100, 100, 100, 255]), 1.0);
        let px = out.get_pixel(0, 0).0;
        // 100 * (0.393 + 0.769 + 0.189) = 135.1
        assert_eq!(px, [135, 120, 94, 255]);
        assert!(px[0] > px[1] && px[1] > px[2], "sepia is warm");
    }

    #[test]
    fn tone_map_preserves_alpha() {
        let out = tone_map(solid([50, 60, 70, 128]), 0.8);
        assert_eq!(out.get_pixel(2, 2).0[3], 128);
    }

    #[test]
    fn stylize_lifts_blacks_and_keeps_alpha() {
        let out = stylize(solid([0, 0, 0, 200]));
        let px = out.get_pixel(0, 0).0;
        assert!(px[0] > 0 && px[1] > 0 && px[2] > 0);
        assert_eq!(px[3], 200);
    }

    #[test]
    fn stylize_is_deterministic() {
        let img = solid([120, 80, 40, 255]);
        assert_eq!(stylize(img.clone()), stylize(img));
    }

    #[test]
    fn vignette_darkens_corners_more_than_centre() {
        let img = Image::from_pixel(64, 64, Rgba([200, 200, 200, 255]));
        let out = vignette(img, 1.0, 0.8);
        let centre = out.get_pixel(32, 32).0[0];
        let corner = out.get_pixel(0, 0).0[0];
        assert!(corner < centre);
        assert!(centre >= 195);
    }
}
