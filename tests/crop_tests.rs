//! Aspect-fit crop properties over a grid of sources and destinations

use lumen::pipeline::{compute_crop_rect, Rect};

const EPS: f64 = 1e-6;

fn sources() -> Vec<Rect> {
    let mut out = Vec::new();
    for (w, h) in [
        (1.0, 1.0),
        (192.0, 144.0),
        (480.0, 360.0),
        (1280.0, 720.0),
        (720.0, 1280.0),
        (1920.0, 1080.0),
        (3.0, 1000.0),
        (4096.0, 17.0),
    ] {
        for (x, y) in [(0.0, 0.0), (12.5, -40.0)] {
            out.push(Rect::new(x, y, w, h));
        }
    }
    out
}

const ASPECTS: [f64; 8] = [0.01, 0.5, 9.0 / 16.0, 0.75, 1.0, 4.0 / 3.0, 16.0 / 9.0, 50.0];

#[test]
fn crop_is_contained_in_source_with_requested_aspect() {
    for source in sources() {
        for aspect in ASPECTS {
            let crop = compute_crop_rect(source, aspect).unwrap();
            assert!(
                source.contains_rect(&crop, EPS),
                "{crop:?} escapes {source:?} at {aspect}"
            );
            assert!(
                (crop.aspect() - aspect).abs() <= aspect * 1e-9,
                "{crop:?} has aspect {} not {aspect}",
                crop.aspect()
            );
        }
    }
}

#[test]
fn crop_keeps_one_full_dimension_and_is_centred() {
    for source in sources() {
        for aspect in ASPECTS {
            let crop = compute_crop_rect(source, aspect).unwrap();
            let full_width = (crop.width - source.width).abs() < EPS;
            let full_height = (crop.height - source.height).abs() < EPS;
            assert!(full_width || full_height, "{crop:?} from {source:?}");

            let left = crop.x - source.x;
            let right = source.max_x() - crop.max_x();
            let top = crop.y - source.y;
            let bottom = source.max_y() - crop.max_y();
            assert!((left - right).abs() < EPS * source.width.max(1.0));
            assert!((top - bottom).abs() < EPS * source.height.max(1.0));
        }
    }
}

#[test]
fn crop_is_idempotent() {
    for source in sources() {
        for aspect in ASPECTS {
            let once = compute_crop_rect(source, aspect).unwrap();
            let twice = compute_crop_rect(once, aspect).unwrap();
            assert!((once.x - twice.x).abs() < EPS, "{once:?} vs {twice:?}");
            assert!((once.y - twice.y).abs() < EPS);
            assert!((once.width - twice.width).abs() < EPS);
            assert!((once.height - twice.height).abs() < EPS);
        }
    }
}

#[test]
fn widescreen_into_four_by_three_drops_side_bars() {
    let crop = compute_crop_rect(Rect::new(0.0, 0.0, 1280.0, 720.0), 4.0 / 3.0).unwrap();
    assert!((crop.x - 160.0).abs() < EPS);
    assert_eq!(crop.y, 0.0);
    assert!((crop.width - 960.0).abs() < EPS);
    assert_eq!(crop.height, 720.0);
}

#[test]
fn degenerate_geometry_is_rejected() {
    let source = Rect::new(0.0, 0.0, 640.0, 480.0);
    assert!(compute_crop_rect(source, 0.0).is_err());
    assert!(compute_crop_rect(source, -4.0 / 3.0).is_err());
    assert!(compute_crop_rect(Rect::new(0.0, 0.0, 0.0, 0.0), 1.0).is_err());
    assert!(compute_crop_rect(Rect::new(0.0, 0.0, 640.0, 0.0), 1.0).is_err());
}
