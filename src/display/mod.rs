//! Render surfaces
//!
//! A [`RenderSurface`] owns a drawable and the context used to draw into it.
//! Drawing primitives take a [`ContextScope`], which only [`RenderSurface::render`]
//! creates and which cannot leave the thread that made the context current.

pub mod gpu;
pub mod software;
pub mod window;

use std::marker::PhantomData;
use std::thread::ThreadId;
use std::time::Instant;

use tracing::trace;

use crate::error::{InvalidGeometry, RenderError};
use crate::filter::Image;
use crate::pipeline::crop::Rect;

pub use gpu::GpuSurface;
pub use software::SoftwareSurface;

/// Opaque mid-gray shown whenever no image is drawn
pub const FALLBACK_COLOR: Color = Color::rgba(0.5, 0.5, 0.5, 1.0);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Color {
    pub const fn rgba(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }

    pub fn to_rgba8(self) -> [u8; 4] {
        [self.r, self.g, self.b, self.a].map(|c| (c.clamp(0.0, 1.0) * 255.0).round() as u8)
    }
}

/// How drawn images combine with what is already in the drawable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BlendMode {
    /// Overwrite the destination
    #[default]
    Replace,
    /// `dst = src * src_alpha + dst * (1 - src_alpha)`
    SourceOver,
}

/// Drawable size in device pixels
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SurfaceGeometry {
    pub width: u32,
    pub height: u32,
    pub aspect: f64,
}

impl SurfaceGeometry {
    pub fn new(width: u32, height: u32) -> Result<Self, InvalidGeometry> {
        if width == 0 || height == 0 {
            return Err(InvalidGeometry {
                width: width as f64,
                height: height as f64,
                aspect: 0.0,
            });
        }
        Ok(Self {
            width,
            height,
            aspect: width as f64 / height as f64,
        })
    }

    /// Geometry of a view measured in logical points on a display with the
    /// given scale factor.
    pub fn from_logical(
        width_points: f64,
        height_points: f64,
        scale_factor: f64,
    ) -> Result<Self, InvalidGeometry> {
        let invalid = InvalidGeometry {
            width: width_points,
            height: height_points,
            aspect: scale_factor,
        };
        if !(scale_factor.is_finite() && scale_factor > 0.0) {
            return Err(invalid);
        }
        let w = (width_points * scale_factor).round();
        let h = (height_points * scale_factor).round();
        if !(w.is_finite() && h.is_finite() && w >= 1.0 && h >= 1.0) {
            return Err(invalid);
        }
        Self::new(w as u32, h as u32)
    }

    /// The whole drawable, in device pixels.
    pub fn dest_rect(&self) -> Rect {
        Rect::new(0.0, 0.0, self.width as f64, self.height as f64)
    }
}

/// Proof that a surface's rendering context is current on this thread.
///
/// Not `Send`: a scope made on one thread cannot be used to draw from another.
#[derive(Debug)]
pub struct ContextScope {
    thread: ThreadId,
    _not_send: PhantomData<*const ()>,
}

impl ContextScope {
    fn enter() -> Self {
        Self {
            thread: std::thread::current().id(),
            _not_send: PhantomData,
        }
    }

    /// Thread the context is current on.
    pub fn thread(&self) -> ThreadId {
        self.thread
    }
}

/// A drawable plus the context that renders into it.
pub trait RenderSurface: Send {
    /// (Re)acquire the drawable and report its size in device pixels.
    fn bind(&mut self) -> Result<SurfaceGeometry, RenderError>;

    /// Make this surface's context current on the scope's thread, switching
    /// away from any thread it was current on before.
    fn make_current(&mut self, scope: &ContextScope) -> Result<(), RenderError>;

    /// Fill the whole drawable with `color`.
    fn clear(&mut self, scope: &ContextScope, color: Color);

    fn set_blend(&mut self, scope: &ContextScope, mode: BlendMode);

    /// Draw the `src` region of `image` scaled into `dest` (device pixels).
    fn draw(
        &mut self,
        scope: &ContextScope,
        image: &Image,
        dest: Rect,
        src: Rect,
    ) -> Result<(), RenderError>;

    /// Show the drawable.
    fn present(&mut self, scope: &ContextScope) -> Result<(), RenderError>;

    /// Give up the context at the end of a render.
    fn release(&mut self, _scope: ContextScope) {}

    /// Clear, composite `image` (if any) with source-over blending, present.
    ///
    /// With no image only the fallback colour is shown.
    fn render(&mut self, image: Option<&Image>, dest: Rect, src: Rect) -> Result<(), RenderError> {
        let start = Instant::now();
        let scope = ContextScope::enter();

        let result = (|| -> Result<(), RenderError> {
            self.make_current(&scope)?;
            self.clear(&scope, FALLBACK_COLOR);
            self.set_blend(&scope, BlendMode::SourceOver);
            if let Some(image) = image {
                self.draw(&scope, image, dest, src)?;
            }
            self.present(&scope)
        })();

        self.release(scope);
        trace!(drawn = image.is_some(), "render pass done");
        metrics::histogram!("render_time_us").record(start.elapsed().as_micros() as f64);
        result
    }
}
