//! Lumen live filter preview

use std::time::Duration;

use color_eyre::{eyre::eyre, Result};
use tracing::{info, warn};

use lumen::capture::FrameSource;
use lumen::display::window::run_preview;
use lumen::display::SoftwareSurface;
use lumen::pipeline::{Pipeline, PipelineState};
use lumen::{utils, Config, DisplayBackend};

fn main() -> Result<()> {
    color_eyre::install()?;
    utils::init_tracing();

    info!("Lumen launching...");

    let config = Config::load().map_err(|e| eyre!("Failed to load configuration: {}", e))?;
    let source = utils::make_source(&config.capture);

    match config.display.backend {
        DisplayBackend::Window => run_preview(config.display, config.filters, source)?,
        DisplayBackend::Headless => {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()?;
            runtime.block_on(run_headless(config, source))?;
        }
    }

    info!("Lumen shutting down");
    Ok(())
}

/// Render into an offscreen framebuffer until enough frames went through or
/// the process is interrupted, then optionally write the last frame out.
async fn run_headless(config: Config, source: Box<dyn FrameSource>) -> Result<()> {
    let display = &config.display;
    let surface = SoftwareSurface::new(display.width, display.height);
    let mut pipeline = Pipeline::new(source, surface, config.filters.clone());

    pipeline.show_fallback()?;
    if let Err(e) = pipeline.start() {
        warn!("Preview unavailable: {}", e);
    }

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut stats_tick = tokio::time::interval(Duration::from_millis(
        config.pipeline.stats_interval_ms.max(100),
    ));
    let mut poll = tokio::time::interval(Duration::from_millis(10));

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("Interrupted");
                break;
            }
            _ = stats_tick.tick() => {
                let stats = pipeline.stats();
                let (posted, taken, discarded) = pipeline.capture_stats().unwrap_or_default();
                info!(
                    rendered = stats.rendered,
                    skipped = stats.skipped,
                    dropped = stats.dropped,
                    posted,
                    taken,
                    discarded,
                    "Frame statistics"
                );
            }
            _ = poll.tick() => {
                if pipeline.state() != PipelineState::Running {
                    break;
                }
                let stats = pipeline.stats();
                let handled = stats.rendered + stats.skipped;
                if display.headless_frames > 0 && handled >= display.headless_frames {
                    break;
                }
            }
        }
    }

    pipeline.stop();

    if let Some(path) = &display.snapshot_path {
        if !pipeline.with_surface(|surface| surface.save_snapshot(path))? {
            warn!("Nothing was presented, no snapshot written");
        }
    }
    Ok(())
}
