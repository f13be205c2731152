use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::capture::{FrameSource, SyntheticSource, V4l2Source};
use crate::{CaptureBackend, CaptureConfig};

/// Default log filter when `RUST_LOG` is unset
pub const DEFAULT_LOG_FILTER: &str = "lumen=debug";

/// Install the global tracing subscriber.
pub fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let fmt = tracing_subscriber::fmt::layer().with_timer(tracing_subscriber::fmt::time::uptime());

    let registry = tracing_subscriber::registry().with(filter).with(fmt);
    #[cfg(feature = "profiling")]
    let registry = registry.with(tracing_tracy::TracyLayer::default());
    registry.init();
}

/// Build the frame source selected by configuration.
pub fn make_source(config: &CaptureConfig) -> Box<dyn FrameSource> {
    match config.backend {
        CaptureBackend::V4l2 => {
            info!("Capture backend: V4L2 ({})", config.preset);
            Box::new(V4l2Source::new(config))
        }
        CaptureBackend::Synthetic => {
            info!("Capture backend: synthetic ({} @ {} fps)", config.preset, config.fps);
            Box::new(SyntheticSource::new(config.preset, config.fps))
        }
    }
}
