//! CPU render surface
//!
//! Composites into an in-memory RGBA framebuffer with the same clear, blend and
//! crop semantics as the GPU surface. Backs the headless runner and the tests.

use std::path::Path;
use std::thread::ThreadId;

use image::{Rgba, RgbaImage};
use tracing::{debug, info};

use super::{BlendMode, Color, ContextScope, RenderSurface, SurfaceGeometry};
use crate::error::RenderError;
use crate::filter::Image;
use crate::pipeline::crop::Rect;

#[derive(Debug)]
pub struct SoftwareSurface {
    width: u32,
    height: u32,
    target: RgbaImage,
    presented: Option<RgbaImage>,
    blend: BlendMode,
    current_thread: Option<ThreadId>,
    stats: SoftwareStats,
}

/// Call counters, useful to assert on what a render did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SoftwareStats {
    pub binds: u64,
    pub clears: u64,
    pub draws: u64,
    pub presents: u64,
    pub context_switches: u64,
}

impl SoftwareSurface {
    /// A drawable of `width`x`height` device pixels.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            target: RgbaImage::new(width, height),
            presented: None,
            blend: BlendMode::default(),
            current_thread: None,
            stats: SoftwareStats::default(),
        }
    }

    /// Change the drawable size; takes effect on the next [`RenderSurface::bind`].
    pub fn resize(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
    }

    pub fn stats(&self) -> SoftwareStats {
        self.stats
    }

    /// Last presented frame.
    pub fn presented(&self) -> Option<&RgbaImage> {
        self.presented.as_ref()
    }

    /// Write the last presented frame as a PNG.
    pub fn save_snapshot(&self, path: &Path) -> Result<bool, RenderError> {
        match &self.presented {
            Some(frame) => {
                frame.save(path)?;
                info!("Snapshot written to {}", path.display());
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

fn blend_pixel(dst: &mut Rgba<u8>, src: Rgba<u8>, mode: BlendMode) {
    match mode {
        BlendMode::Replace => *dst = src,
        BlendMode::SourceOver => {
            let a = src.0[3] as f32 / 255.0;
            for c in 0..4 {
                let s = src.0[c] as f32;
                let d = dst.0[c] as f32;
                // alpha channel composites as a + da(1 - a)
                let s = if c == 3 { s } else { s * a };
                dst.0[c] = (s + d * (1.0 - a)).round().clamp(0.0, 255.0) as u8;
            }
        }
    }
}

impl RenderSurface for SoftwareSurface {
    fn bind(&mut self) -> Result<SurfaceGeometry, RenderError> {
        let geometry = SurfaceGeometry::new(self.width, self.height)
            .map_err(|e| RenderError::Surface(e.to_string()))?;
        if self.target.dimensions() != (self.width, self.height) {
            self.target = RgbaImage::new(self.width, self.height);
            self.presented = None;
        }
        self.stats.binds += 1;
        debug!("Software surface bound at {}x{}", self.width, self.height);
        Ok(geometry)
    }

    fn make_current(&mut self, scope: &ContextScope) -> Result<(), RenderError> {
        if self.current_thread != Some(scope.thread()) {
            if self.current_thread.is_some() {
                debug!("Rebinding software context to {:?}", scope.thread());
            }
            self.current_thread = Some(scope.thread());
            self.stats.context_switches += 1;
        }
        Ok(())
    }

    fn clear(&mut self, _scope: &ContextScope, color: Color) {
        let px = Rgba(color.to_rgba8());
        for p in self.target.pixels_mut() {
            *p = px;
        }
        self.stats.clears += 1;
    }

    fn set_blend(&mut self, _scope: &ContextScope, mode: BlendMode) {
        self.blend = mode;
    }

    fn draw(
        &mut self,
        _scope: &ContextScope,
        image: &Image,
        dest: Rect,
        src: Rect,
    ) -> Result<(), RenderError> {
        self.stats.draws += 1;
        if dest.width <= 0.0 || dest.height <= 0.0 || src.width <= 0.0 || src.height <= 0.0 {
            return Ok(());
        }

        let (img_w, img_h) = image.dimensions();
        if img_w == 0 || img_h == 0 {
            return Ok(());
        }

        // The framebuffer only takes a pending resize at bind
        let (target_w, target_h) = self.target.dimensions();
        let x0 = dest.x.max(0.0).floor() as u32;
        let y0 = dest.y.max(0.0).floor() as u32;
        let x1 = (dest.max_x().min(target_w as f64)).ceil().max(0.0) as u32;
        let y1 = (dest.max_y().min(target_h as f64)).ceil().max(0.0) as u32;
        let sx = src.width / dest.width;
        let sy = src.height / dest.height;

        for y in y0..y1 {
            let cy = y as f64 + 0.5;
            if cy < dest.y || cy > dest.max_y() {
                continue;
            }
            let v = (src.y + (cy - dest.y) * sy).floor().clamp(0.0, img_h as f64 - 1.0) as u32;
            for x in x0..x1 {
                let cx = x as f64 + 0.5;
                if cx < dest.x || cx > dest.max_x() {
                    continue;
                }
                let u = (src.x + (cx - dest.x) * sx).floor().clamp(0.0, img_w as f64 - 1.0) as u32;
                let src_px = *image.get_pixel(u, v);
                blend_pixel(self.target.get_pixel_mut(x, y), src_px, self.blend);
            }
        }
        Ok(())
    }

    fn present(&mut self, _scope: &ContextScope) -> Result<(), RenderError> {
        self.presented = Some(self.target.clone());
        self.stats.presents += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::display::FALLBACK_COLOR;

    const GRAY: [u8; 4] = [128, 128, 128, 255];

    #[test]
    fn render_without_image_clears_to_gray_and_does_not_draw() {
        let mut surface = SoftwareSurface::new(8, 4);
        let g = surface.bind().unwrap();
        surface.render(None, g.dest_rect(), g.dest_rect()).unwrap();

        let stats = surface.stats();
        assert_eq!(stats.clears, 1);
        assert_eq!(stats.draws, 0);
        assert_eq!(stats.presents, 1);
        let frame = surface.presented().unwrap();
        assert!(frame.pixels().all(|p| p.0 == FALLBACK_COLOR.to_rgba8()));
    }

    #[test]
    fn crop_region_is_scaled_to_fill_destination() {
        // Left half red, right half blue; crop the right half only
        let image = Image::from_fn(4, 2, |x, _| {
            if x < 2 {
                Rgba([255, 0, 0, 255])
            } else {
                Rgba([0, 0, 255, 255])
            }
        });
        let mut surface = SoftwareSurface::new(6, 3);
        let g = surface.bind().unwrap();
        surface
            .render(Some(&image), g.dest_rect(), Rect::new(2.0, 0.0, 2.0, 2.0))
            .unwrap();

        let frame = surface.presented().unwrap();
        assert!(frame.pixels().all(|p| p.0 == [0, 0, 255, 255]));
    }

    #[test]
    fn translucent_image_blends_over_gray() {
        let image = Image::from_pixel(2, 2, Rgba([255, 255, 255, 128]));
        let mut surface = SoftwareSurface::new(2, 2);
        let g = surface.bind().unwrap();
        surface
            .render(Some(&image), g.dest_rect(), Rect::new(0.0, 0.0, 2.0, 2.0))
            .unwrap();

        let px = surface.presented().unwrap().get_pixel(0, 0).0;
        // 255 * 0.502 + 128 * 0.498 = 191.8
        assert_eq!(px, [192, 192, 192, 255]);
    }

    #[test]
    fn logical_point_rect_misses_part_of_the_drawable() {
        // A 2x display: 4x3 points are 8x6 pixels
        let image = Image::from_pixel(4, 3, Rgba([0, 255, 0, 255]));
        let pixels = SurfaceGeometry::from_logical(4.0, 3.0, 2.0).unwrap();
        let mut surface = SoftwareSurface::new(pixels.width, pixels.height);
        surface.bind().unwrap();

        let logical = Rect::new(0.0, 0.0, 4.0, 3.0);
        surface
            .render(Some(&image), logical, Rect::new(0.0, 0.0, 4.0, 3.0))
            .unwrap();
        let frame = surface.presented().unwrap();
        assert_eq!(frame.get_pixel(1, 1).0, [0, 255, 0, 255]);
        assert_eq!(frame.get_pixel(7, 5).0, GRAY, "bottom-right left uncovered");

        surface
            .render(Some(&image), pixels.dest_rect(), Rect::new(0.0, 0.0, 4.0, 3.0))
            .unwrap();
        let frame = surface.presented().unwrap();
        assert!(frame.pixels().all(|p| p.0 == [0, 255, 0, 255]));
    }

    #[test]
    fn context_follows_the_rendering_thread() {
        let mut surface = SoftwareSurface::new(2, 2);
        let g = surface.bind().unwrap();
        surface.render(None, g.dest_rect(), g.dest_rect()).unwrap();
        surface.render(None, g.dest_rect(), g.dest_rect()).unwrap();
        assert_eq!(surface.stats().context_switches, 1);

        let mut surface = std::thread::spawn(move || {
            surface.render(None, g.dest_rect(), g.dest_rect()).unwrap();
            surface
        })
        .join()
        .unwrap();
        assert_eq!(surface.stats().context_switches, 2);

        surface.render(None, g.dest_rect(), g.dest_rect()).unwrap();
        assert_eq!(surface.stats().context_switches, 3);
    }

    #[test]
    fn empty_image_draws_nothing() {
        let mut surface = SoftwareSurface::new(4, 4);
        let g = surface.bind().unwrap();
        surface
            .render(Some(&Image::new(0, 0)), g.dest_rect(), Rect::new(0.0, 0.0, 1.0, 1.0))
            .unwrap();
        surface
            .render(Some(&Image::new(3, 0)), g.dest_rect(), Rect::new(0.0, 0.0, 1.0, 1.0))
            .unwrap();

        let frame = surface.presented().unwrap();
        assert!(frame.pixels().all(|p| p.0 == GRAY));
    }

    #[test]
    fn resize_before_rebind_stays_within_old_framebuffer() {
        let image = Image::from_pixel(8, 8, Rgba([0, 0, 255, 255]));
        let mut surface = SoftwareSurface::new(4, 4);
        surface.bind().unwrap();
        surface.resize(8, 8);

        let dest = Rect::new(0.0, 0.0, 8.0, 8.0);
        surface
            .render(Some(&image), dest, Rect::new(0.0, 0.0, 8.0, 8.0))
            .unwrap();
        let frame = surface.presented().unwrap();
        assert_eq!(frame.dimensions(), (4, 4));
        assert!(frame.pixels().all(|p| p.0 == [0, 0, 255, 255]));

        surface.bind().unwrap();
        surface
            .render(Some(&image), dest, Rect::new(0.0, 0.0, 8.0, 8.0))
            .unwrap();
        assert_eq!(surface.presented().unwrap().dimensions(), (8, 8));
    }

    #[test]
    fn rebind_picks_up_new_size() {
        let mut surface = SoftwareSurface::new(4, 4);
        surface.bind().unwrap();
        surface.resize(8, 2);
        let g = surface.bind().unwrap();
        assert_eq!((g.width, g.height), (8, 2));
        assert_eq!(g.aspect, 4.0);
        assert_eq!(surface.stats().binds, 2);
    }

    #[test]
    fn snapshot_is_written_as_png() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frame.png");

        let mut surface = SoftwareSurface::new(3, 3);
        assert!(!surface.save_snapshot(&path).unwrap());

        let g = surface.bind().unwrap();
        surface.render(None, g.dest_rect(), g.dest_rect()).unwrap();
        assert!(surface.save_snapshot(&path).unwrap());

        let loaded = image::open(&path).unwrap().to_rgba8();
        assert_eq!(loaded.get_pixel(1, 1).0, GRAY);
    }
}
