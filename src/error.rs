//! Error taxonomy for the frame pipeline

use thiserror::Error;

/// A geometry computation was asked to work on a degenerate rectangle or aspect.
#[derive(Debug, Clone, Copy, PartialEq, Error)]
#[error("invalid geometry: {width}x{height} with aspect {aspect}")]
pub struct InvalidGeometry {
    pub width: f64,
    pub height: f64,
    pub aspect: f64,
}

/// Capture session setup failures.
#[derive(Debug, Error)]
pub enum StartError {
    #[error("capture device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("capture preset {preset} not supported by {device}")]
    PresetUnsupported { preset: String, device: String },

    #[error("capture session configuration failed: {0}")]
    SessionConfigError(String),
}

/// A stage of the filter chain produced no output.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FilterError {
    #[error("filter stage {stage} ({kind}) produced no output")]
    EmptyResult { stage: usize, kind: &'static str },
}

/// Render surface failures.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("surface error: {0}")]
    Surface(String),

    #[error("gpu device error: {0}")]
    Device(String),

    #[error("snapshot export failed: {0}")]
    Snapshot(#[from] image::ImageError),
}

/// Pipeline coordinator errors. None of these are fatal to the process.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("no capture device matches the required facing")]
    EnumerationEmpty,

    #[error(transparent)]
    Start(#[from] StartError),

    #[error(transparent)]
    InvalidGeometry(#[from] InvalidGeometry),

    #[error(transparent)]
    FilterChainEmptyResult(#[from] FilterError),

    #[error(transparent)]
    Render(#[from] RenderError),

    #[error("pipeline is already active")]
    AlreadyActive,
}

pub type Result<T> = std::result::Result<T, PipelineError>;
