//! Preview window
//!
//! Hosts a [`Pipeline`] rendering into a [`GpuSurface`] inside a winit window.
//! Frames are presented from the capture delivery thread; the event loop only
//! handles lifecycle: building the surface, rebinding on resize, and stopping
//! capture on close.

use std::sync::Arc;

use color_eyre::Result;
use tracing::{error, info, instrument, warn};
use winit::application::ApplicationHandler;
use winit::dpi::LogicalSize;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::window::{Window, WindowId};

use super::GpuSurface;
use crate::capture::FrameSource;
use crate::filter::FilterSpec;
use crate::pipeline::{Pipeline, PipelineState};
use crate::DisplayConfig;

/// Application handler for the winit event loop
pub struct PreviewApp<F: FrameSource> {
    config: DisplayConfig,
    filters: FilterSpec,
    source: Option<F>,
    pipeline: Option<Pipeline<F, GpuSurface>>,
    window: Option<Arc<Window>>,
}

impl<F: FrameSource> PreviewApp<F> {
    pub fn new(config: DisplayConfig, filters: FilterSpec, source: F) -> Self {
        Self {
            config,
            filters,
            source: Some(source),
            pipeline: None,
            window: None,
        }
    }

    #[instrument(skip_all)]
    fn create_pipeline(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let attrs = Window::default_attributes()
            .with_title(self.config.title.clone())
            .with_inner_size(LogicalSize::new(self.config.width, self.config.height));
        let window = Arc::new(event_loop.create_window(attrs)?);

        let surface = pollster::block_on(GpuSurface::new(window.clone(), self.config.vsync))?;
        let Some(source) = self.source.take() else {
            return Ok(());
        };
        let mut pipeline = Pipeline::new(source, surface, self.filters.clone());

        pipeline.show_fallback()?;
        if let Err(e) = pipeline.start() {
            // The window stays up showing the fallback colour
            warn!("Preview unavailable: {}", e);
        }

        self.window = Some(window);
        self.pipeline = Some(pipeline);
        Ok(())
    }
}

impl<F: FrameSource> ApplicationHandler for PreviewApp<F> {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if let Some(pipeline) = self.pipeline.as_mut() {
            if let Err(e) = pipeline.rebind_surface() {
                error!("Rebind on resume failed: {}", e);
            } else if pipeline.state() == PipelineState::Idle {
                if let Err(e) = pipeline.start() {
                    warn!("Preview unavailable: {}", e);
                }
            }
            return;
        }

        if let Err(e) = self.create_pipeline(event_loop) {
            error!("Failed to create preview window: {}", e);
            event_loop.exit();
        }
    }

    fn suspended(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(pipeline) = self.pipeline.as_mut() {
            info!("Suspended, stopping capture");
            pipeline.stop();
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _window_id: WindowId,
        event: WindowEvent,
    ) {
        let Some(pipeline) = self.pipeline.as_mut() else {
            return;
        };

        match event {
            WindowEvent::CloseRequested => {
                info!("Window close requested");
                pipeline.stop();
                event_loop.exit();
            }
            WindowEvent::Resized(size) => {
                if size.width == 0 || size.height == 0 {
                    return;
                }
                if let Err(e) = pipeline.rebind_surface() {
                    error!("Resize error: {}", e);
                }
                if pipeline.state() == PipelineState::Idle {
                    if let Some(window) = &self.window {
                        window.request_redraw();
                    }
                }
            }
            WindowEvent::RedrawRequested => {
                // Running pipelines present on their own
                if pipeline.state() == PipelineState::Idle {
                    if let Err(e) = pipeline.show_fallback() {
                        error!("Display error: {}", e);
                    }
                }
            }
            _ => {}
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(mut pipeline) = self.pipeline.take() {
            pipeline.stop();
        }
        self.window = None;
    }
}

/// Run the preview window until it is closed.
pub fn run_preview<F: FrameSource>(
    config: DisplayConfig,
    filters: FilterSpec,
    source: F,
) -> Result<()> {
    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Wait);

    let mut app = PreviewApp::new(config, filters, source);

    event_loop.run_app(&mut app)?;
    Ok(())
}
