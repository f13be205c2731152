//! Pipeline coordinator
//!
//! Owns the frame source, filter chain and render surface and runs
//! crop → filter → render for each delivered frame on the source's delivery
//! thread. Surface geometry is measured on the UI thread and published to the
//! delivery thread as an immutable snapshot.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use crossbeam::utils::CachePadded;
use parking_lot::Mutex;
use tracing::{debug, error, info, instrument, trace, warn};

use crate::capture::{CaptureHandle, Facing, Frame, FrameSource, FRAME_PIXEL_FORMAT};
use crate::display::{RenderSurface, SurfaceGeometry};
use crate::error::{FilterError, InvalidGeometry, PipelineError};
use crate::filter::{extent, image_from_frame, FilterChain, FilterSpec};
use crate::pipeline::crop::compute_crop_rect;

/// The only camera facing this pipeline will start on
pub const REQUIRED_FACING: Facing = Facing::Back;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Starting,
    Running,
    Stopping,
}

/// Why a frame was not rendered
#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    InvalidGeometry(InvalidGeometry),
    FilterChainEmptyResult(FilterError),
    /// No surface geometry has been published yet
    Unbound,
    Render(String),
}

/// What happened to one delivered frame
#[derive(Debug, Clone, PartialEq)]
pub enum FrameOutcome {
    Rendered,
    /// Not rendered; whatever was on screen stays there
    Skipped(SkipReason),
    /// Discarded because another frame was in flight or the surface was busy
    Dropped,
}

#[derive(Debug, Default)]
struct Counters {
    rendered: AtomicU64,
    skipped: AtomicU64,
    dropped: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub rendered: u64,
    pub skipped: u64,
    pub dropped: u64,
}

/// Frame-thread half of the pipeline
struct FrameProcessor<S> {
    chain: FilterChain,
    surface: Mutex<S>,
    geometry: ArcSwapOption<SurfaceGeometry>,
    in_flight: AtomicBool,
    counters: CachePadded<Counters>,
}

/// Releases the in-flight slot on every exit path.
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl<S: RenderSurface> FrameProcessor<S> {
    #[instrument(level = "trace", skip_all, fields(seq = frame.meta.sequence))]
    fn process(&self, frame: Frame<'_>) -> FrameOutcome {
        let outcome = match self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => {
                let _slot = InFlight(&self.in_flight);
                self.run(frame)
            }
            Err(_) => FrameOutcome::Dropped,
        };

        let counter = match &outcome {
            FrameOutcome::Rendered => &self.counters.rendered,
            FrameOutcome::Skipped(reason) => {
                debug!(seq = frame.meta.sequence, ?reason, "frame skipped");
                metrics::counter!("frames_skipped").increment(1);
                &self.counters.skipped
            }
            FrameOutcome::Dropped => {
                metrics::counter!("frames_dropped").increment(1);
                &self.counters.dropped
            }
        };
        counter.fetch_add(1, Ordering::Relaxed);
        outcome
    }

    fn run(&self, frame: Frame<'_>) -> FrameOutcome {
        let image = match image_from_frame(&frame) {
            Ok(image) => image,
            Err(e) => return FrameOutcome::Skipped(SkipReason::InvalidGeometry(e)),
        };

        let Some(geometry) = self.geometry.load_full() else {
            return FrameOutcome::Skipped(SkipReason::Unbound);
        };

        let crop = match compute_crop_rect(extent(&image), geometry.aspect) {
            Ok(crop) => crop,
            Err(e) => return FrameOutcome::Skipped(SkipReason::InvalidGeometry(e)),
        };

        let filtered = match self.chain.apply(image) {
            Ok(filtered) => filtered,
            Err(e) => return FrameOutcome::Skipped(SkipReason::FilterChainEmptyResult(e)),
        };

        // Never wait on the UI thread; a rebind in progress costs one frame.
        let Some(mut surface) = self.surface.try_lock() else {
            return FrameOutcome::Dropped;
        };

        match surface.render(Some(&filtered), geometry.dest_rect(), crop) {
            Ok(()) => {
                trace!(seq = frame.meta.sequence, ?crop, "frame rendered");
                FrameOutcome::Rendered
            }
            Err(e) => {
                warn!("Render error: {}", e);
                FrameOutcome::Skipped(SkipReason::Render(e.to_string()))
            }
        }
    }
}

/// Camera → filter → screen pipeline
pub struct Pipeline<F: FrameSource, S: RenderSurface + 'static> {
    source: F,
    processor: Arc<FrameProcessor<S>>,
    state: PipelineState,
    handle: Option<CaptureHandle>,
}

impl<F: FrameSource, S: RenderSurface + 'static> Pipeline<F, S> {
    pub fn new(source: F, surface: S, filters: FilterSpec) -> Self {
        Self {
            source,
            processor: Arc::new(FrameProcessor {
                chain: FilterChain::new(filters),
                surface: Mutex::new(surface),
                geometry: ArcSwapOption::empty(),
                in_flight: AtomicBool::new(false),
                counters: CachePadded::new(Counters::default()),
            }),
            state: PipelineState::Idle,
            handle: None,
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Geometry the frame thread currently renders with.
    pub fn geometry(&self) -> Option<SurfaceGeometry> {
        self.processor.geometry.load_full().map(|g| *g)
    }

    pub fn stats(&self) -> PipelineStats {
        let c = &self.processor.counters;
        PipelineStats {
            rendered: c.rendered.load(Ordering::Relaxed),
            skipped: c.skipped.load(Ordering::Relaxed),
            dropped: c.dropped.load(Ordering::Relaxed),
        }
    }

    /// (Re)bind the surface and publish its geometry to the frame thread.
    ///
    /// Call from the UI thread before starting and whenever the drawable was
    /// invalidated (resize, resume). Waits for at most one in-flight render.
    pub fn bind_surface(&self) -> Result<SurfaceGeometry, PipelineError> {
        let geometry = self.processor.surface.lock().bind()?;
        info!(
            "Surface bound at {}x{} px (aspect {:.3})",
            geometry.width, geometry.height, geometry.aspect
        );
        self.processor.geometry.store(Some(Arc::new(geometry)));
        Ok(geometry)
    }

    /// Re-measure the drawable after it changed while frames may be flowing.
    ///
    /// The frame thread never waits for this: a frame that finds the surface
    /// held is dropped.
    pub fn rebind_surface(&self) -> Result<SurfaceGeometry, PipelineError> {
        debug!(state = ?self.state, "Rebinding surface");
        self.bind_surface()
    }

    /// Mailbox counters of the running capture session: (posted, taken, discarded).
    pub fn capture_stats(&self) -> Option<(u64, u64, u64)> {
        self.handle.as_ref().map(CaptureHandle::stats)
    }

    /// Show the fallback colour with no image, e.g. while nothing is captured.
    pub fn show_fallback(&self) -> Result<(), PipelineError> {
        let geometry = match self.geometry() {
            Some(g) => g,
            None => self.bind_surface()?,
        };
        let full = geometry.dest_rect();
        self.processor.surface.lock().render(None, full, full)?;
        Ok(())
    }

    /// Run one frame through crop → filter → render on the calling thread.
    pub fn process_frame(&self, frame: Frame<'_>) -> FrameOutcome {
        self.processor.process(frame)
    }

    /// Borrow the surface, waiting for any in-flight render.
    pub fn with_surface<R>(&self, f: impl FnOnce(&mut S) -> R) -> R {
        f(&mut self.processor.surface.lock())
    }

    /// Select the rear camera and start streaming into the surface.
    ///
    /// Failures leave the pipeline `Idle` and are returned for reporting;
    /// none of them are fatal.
    pub fn start(&mut self) -> Result<(), PipelineError> {
        if self.state != PipelineState::Idle {
            return Err(PipelineError::AlreadyActive);
        }
        self.state = PipelineState::Starting;

        match self.try_start() {
            Ok(handle) => {
                info!("Pipeline running on {}", handle.label());
                self.handle = Some(handle);
                self.state = PipelineState::Running;
                Ok(())
            }
            Err(e) => {
                error!("Pipeline failed to start: {}", e);
                self.state = PipelineState::Idle;
                Err(e)
            }
        }
    }

    fn try_start(&mut self) -> Result<CaptureHandle, PipelineError> {
        if self.geometry().is_none() {
            self.bind_surface()?;
        }

        let devices = self.source.list_devices(REQUIRED_FACING);
        let Some(device) = devices.into_iter().next() else {
            warn!("No capture device facing {:?}", REQUIRED_FACING);
            return Err(PipelineError::EnumerationEmpty);
        };
        info!("Using capture device: {} ({})", device.name, device.id);

        let processor = self.processor.clone();
        let handle = self.source.start(
            &device,
            FRAME_PIXEL_FORMAT,
            Box::new(move |frame| {
                processor.process(frame);
            }),
        )?;
        Ok(handle)
    }

    /// Stop capture. Returns once the last frame callback has finished.
    pub fn stop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        self.state = PipelineState::Stopping;
        self.source.stop(handle);
        self.state = PipelineState::Idle;

        let stats = self.stats();
        info!(
            rendered = stats.rendered,
            skipped = stats.skipped,
            dropped = stats.dropped,
            "Pipeline stopped"
        );
    }
}

impl<F: FrameSource, S: RenderSurface + 'static> Drop for Pipeline<F, S> {
    fn drop(&mut self) {
        self.stop();
    }
}
