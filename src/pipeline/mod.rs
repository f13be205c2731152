//! Frame pipeline: hand-off between threads, crop geometry and the coordinator

pub mod coordinator;
pub mod crop;
pub mod mailbox;

pub use coordinator::{
    FrameOutcome, Pipeline, PipelineState, PipelineStats, SkipReason, REQUIRED_FACING,
};
pub use crop::{compute_crop_rect, Rect};
