//! Aspect-fit crop computation

use serde::{Deserialize, Serialize};

use crate::error::InvalidGeometry;

/// Axis-aligned rectangle, origin at the top-left.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub const fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn aspect(&self) -> f64 {
        self.width / self.height
    }

    pub fn max_x(&self) -> f64 {
        self.x + self.width
    }

    pub fn max_y(&self) -> f64 {
        self.y + self.height
    }

    /// Whether `other` lies entirely inside `self`, allowing `eps` slack.
    pub fn contains_rect(&self, other: &Rect, eps: f64) -> bool {
        other.x >= self.x - eps
            && other.y >= self.y - eps
            && other.max_x() <= self.max_x() + eps
            && other.max_y() <= self.max_y() + eps
    }

    fn is_degenerate(&self) -> bool {
        !(self.width.is_finite()
            && self.height.is_finite()
            && self.x.is_finite()
            && self.y.is_finite()
            && self.width > 0.0
            && self.height > 0.0)
    }
}

/// Largest centred sub-rectangle of `source` with aspect ratio `dest_aspect`.
///
/// A source wider than the destination keeps its full height and loses width
/// evenly on both sides; otherwise it keeps its full width and loses height.
pub fn compute_crop_rect(source: Rect, dest_aspect: f64) -> Result<Rect, InvalidGeometry> {
    let invalid = InvalidGeometry {
        width: source.width,
        height: source.height,
        aspect: dest_aspect,
    };
    if source.is_degenerate() || !dest_aspect.is_finite() || dest_aspect <= 0.0 {
        return Err(invalid);
    }

    // Clamped so rounding never pushes the crop past the source edges
    let mut crop = source;
    if source.aspect() > dest_aspect {
        crop.width = (source.height * dest_aspect).min(source.width);
        crop.x += (source.width - crop.width) / 2.0;
    } else {
        crop.height = (source.width / dest_aspect).min(source.height);
        crop.y += (source.height - crop.height) / 2.0;
    }

    // Extreme aspects can underflow to an empty crop
    if crop.is_degenerate() {
        return Err(invalid);
    }
    Ok(crop)
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-9;

    #[test]
    fn widescreen_into_four_by_three() {
        let crop = compute_crop_rect(Rect::new(0.0, 0.0, 1280.0, 720.0), 4.0 / 3.0).unwrap();
        assert!((crop.width - 960.0).abs() < EPS);
        assert_eq!(crop.height, 720.0);
        assert!((crop.x - 160.0).abs() < EPS);
        assert_eq!(crop.y, 0.0);
    }

    #[test]
    fn tall_source_is_cropped_vertically() {
        let crop = compute_crop_rect(Rect::new(0.0, 0.0, 720.0, 1280.0), 1.0).unwrap();
        assert_eq!(crop, Rect::new(0.0, 280.0, 720.0, 720.0));
    }

    #[test]
    fn offset_source_keeps_its_origin() {
        let crop = compute_crop_rect(Rect::new(10.0, 20.0, 400.0, 100.0), 2.0).unwrap();
        assert_eq!(crop, Rect::new(110.0, 20.0, 200.0, 100.0));
    }

    #[test]
    fn matching_aspect_is_untouched() {
        let source = Rect::new(0.0, 0.0, 1920.0, 1080.0);
        assert_eq!(compute_crop_rect(source, 16.0 / 9.0).unwrap(), source);
    }

    #[test]
    fn aspect_that_underflows_the_crop_fails() {
        let source = Rect::new(0.0, 0.0, 1.0, 0.1);
        assert!(compute_crop_rect(source, 5e-324).is_err());
        assert!(compute_crop_rect(Rect::new(0.0, 0.0, 1e-300, 1.0), f64::MAX).is_err());

        let tiny = compute_crop_rect(source, 1e-300).unwrap();
        assert!(tiny.width > 0.0 && tiny.height > 0.0);
    }

    #[test]
    fn near_equal_aspect_never_exceeds_source() {
        for (w, h) in [(640.0, 480.0), (1280.0, 720.0), (3.0, 7.0), (1920.0, 1080.0)] {
            let source = Rect::new(0.0, 0.0, w, h);
            let exact: f64 = w / h;
            for aspect in [
                exact,
                f64::from_bits(exact.to_bits() - 1),
                f64::from_bits(exact.to_bits() + 1),
            ] {
                let crop = compute_crop_rect(source, aspect).unwrap();
                assert!(crop.width <= w && crop.height <= h, "{crop:?} at {aspect}");
                assert!(crop.x >= 0.0 && crop.y >= 0.0, "{crop:?} at {aspect}");
            }
        }
    }

    #[test]
    fn degenerate_inputs_fail() {
        let ok = Rect::new(0.0, 0.0, 640.0, 480.0);
        for aspect in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            assert!(compute_crop_rect(ok, aspect).is_err(), "aspect {aspect}");
        }
        for source in [
            Rect::new(0.0, 0.0, 0.0, 480.0),
            Rect::new(0.0, 0.0, 640.0, 0.0),
            Rect::new(0.0, 0.0, -640.0, 480.0),
            Rect::new(0.0, 0.0, f64::NAN, 480.0),
        ] {
            assert!(compute_crop_rect(source, 1.5).is_err(), "source {source:?}");
        }
    }
}
