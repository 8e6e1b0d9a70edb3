//! Pipeline layer of media-handoff
//!
//! Stages are plain OS threads connected by the buffers in [`crate::buffer`].
//! Nothing schedules them centrally: each stage blocks on its input, and the
//! finished flags carried by the buffers tell it when the input has ended.
//!
//! # Architecture
//!
//! - Each stage runs on its own thread and implements `PipelineStage`
//! - The coordinator owns the buffers and manages stage lifecycle
//! - Lifecycle flags record which stages observed their end of stream
//! - Health monitoring tracks counters and logs them periodically

pub mod health;
pub mod playback;
pub mod stage;
pub mod state;
pub mod types;

pub use health::{HealthMonitor, HealthSummary, PipelineHealth};
pub use playback::{MediaComponents, PlaybackCoordinator, PlaybackReport, StageKind};
pub use stage::{PipelineStage, StageContext, StageOutcome};
pub use state::{LifecycleFlags, PipelineState, StageState, StageStatus};
pub use types::{MediaKind, Packet, StreamLayout, Timestamp, VideoFrame};
