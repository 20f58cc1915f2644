//! Audio pipelines between the devices and the live connection.
//!
//! Capture runs on its own thread and feeds a bounded outbound queue.
//! Playback runs as a tokio task that decodes inbound chunks concurrently
//! and applies them to the scheduler in arrival order.

pub mod capture;
pub mod playback_station;
pub mod scheduler;

pub use capture::{CaptureHandle, CapturePipeline, CaptureStats, FrameChunker};
pub use playback_station::{PlaybackCommand, PlaybackStation};
pub use scheduler::{
    MockOutput, OutputContext, PlaybackScheduler, ScheduledUnit, SharedScheduler, UnitId,
};
