pub mod capture;
pub mod display;
pub mod error;
pub mod filter;
pub mod pipeline;
pub mod utils;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

pub use capture::{
    CapturePreset, DeviceDescriptor, Facing, Frame, FrameSource, PixelFormat, SyntheticSource,
    V4l2Source,
};
pub use display::{GpuSurface, RenderSurface, SoftwareSurface, SurfaceGeometry};
pub use error::{FilterError, InvalidGeometry, PipelineError, RenderError, StartError};
pub use filter::{FilterChain, FilterSpec, FilterStage};
pub use pipeline::{FrameOutcome, Pipeline, PipelineState, Rect};

/// Default configuration file, looked up in the working directory
pub const CONFIG_FILE: &str = "lumen.toml";

/// Prefix of environment overrides, e.g. `LUMEN__CAPTURE__BACKEND=synthetic`
pub const ENV_PREFIX: &str = "LUMEN";

/// System configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub capture: CaptureConfig,
    pub display: DisplayConfig,
    pub filters: FilterSpec,
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureBackend {
    #[default]
    V4l2,
    Synthetic,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub backend: CaptureBackend,
    pub preset: CapturePreset,
    /// Synthetic source frame rate
    pub fps: u32,
    pub buffer_count: u32,
    /// Device nodes to treat as user-facing regardless of their card name
    pub front_devices: Vec<String>,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            backend: CaptureBackend::default(),
            preset: CapturePreset::default(),
            fps: 30,
            buffer_count: 4,
            front_devices: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisplayBackend {
    #[default]
    Window,
    Headless,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    pub backend: DisplayBackend,
    /// Window size in logical points, or headless framebuffer size in pixels
    pub width: u32,
    pub height: u32,
    pub title: String,
    pub vsync: bool,
    /// Frames to render before a headless run ends; 0 runs until interrupted
    pub headless_frames: u64,
    /// Where a headless run writes its last presented frame
    pub snapshot_path: Option<PathBuf>,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            backend: DisplayBackend::default(),
            width: 800,
            height: 600,
            title: "Lumen".to_string(),
            vsync: true,
            headless_frames: 120,
            snapshot_path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// How often frame statistics are logged
    pub stats_interval_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            stats_interval_ms: 5000,
        }
    }
}

impl Config {
    /// Defaults, overlaid by [`CONFIG_FILE`] if present, overlaid by environment.
    pub fn load() -> Result<Self, config::ConfigError> {
        Self::load_from(Path::new(CONFIG_FILE))
    }

    pub fn load_from(path: &Path) -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(config::File::from(path).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.capture.backend, CaptureBackend::V4l2);
        assert_eq!(config.capture.preset, CapturePreset::Medium);
        assert_eq!(config.display.backend, DisplayBackend::Window);
        assert_eq!(config.filters, FilterSpec::default());
    }

    #[test]
    fn file_overrides_individual_fields() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[capture]
backend = "synthetic"
preset = "vga640x480"

[display]
backend = "headless"
headless_frames = 10
snapshot_path = "out.png"

[[filters]]
kind = "tone_map"
intensity = 0.3

[[filters]]
kind = "vignette"
"#
        )
        .unwrap();

        let config = Config::load_from(file.path()).unwrap();
        assert_eq!(config.capture.backend, CaptureBackend::Synthetic);
        assert_eq!(config.capture.preset, CapturePreset::Vga640x480);
        assert_eq!(config.capture.buffer_count, 4);
        assert_eq!(config.display.backend, DisplayBackend::Headless);
        assert_eq!(config.display.headless_frames, 10);
        assert_eq!(config.display.width, 800);
        assert_eq!(config.display.snapshot_path, Some(PathBuf::from("out.png")));
        assert_eq!(
            config.filters.stages,
            vec![
                FilterStage::ToneMap { intensity: 0.3 },
                FilterStage::Vignette {
                    radius: 1.0,
                    intensity: 0.6
                },
            ]
        );
    }
}
