//! Pipeline and stage state management

use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Instant;

use crate::buffer::CompletionFlag;
use crate::pipeline::types::MediaKind;

/// Pipeline state machine
///
/// Represents the current state of the whole pipeline. State transitions are
/// validated to ensure consistent behavior across all stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    /// Buffers allocated, no thread started
    Idle,

    /// Stage threads are running
    Running {
        /// When the pipeline started running
        started_at: Instant,
    },

    /// Upstream stages have finished, output stages are emptying their input
    Draining,

    /// Teardown in progress
    Stopping,

    /// Every stage joined; cannot be restarted
    Stopped,
}

impl PipelineState {
    /// Check if this state transition is valid
    pub fn can_transition_to(&self, target: &PipelineState) -> bool {
        use PipelineState::*;

        match (self, target) {
            (Idle, Running { .. }) => true,
            (Idle, Stopping) => true, // Torn down before launch

            (Running { .. }, Draining) => true,
            (Running { .. }, Stopping) => true,

            (Draining, Stopping) => true,

            (Stopping, Stopped) => true,

            // From Stopped - no transitions allowed
            (Stopped, _) => false,

            // Self-transitions
            (a, b) if a == b => true,

            _ => false,
        }
    }

    /// Get a human-readable description of this state
    pub fn description(&self) -> &'static str {
        match self {
            PipelineState::Idle => "Idle",
            PipelineState::Running { .. } => "Running",
            PipelineState::Draining => "Draining",
            PipelineState::Stopping => "Stopping",
            PipelineState::Stopped => "Stopped",
        }
    }

    /// Check if stage threads may still be alive
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            PipelineState::Running { .. } | PipelineState::Draining
        )
    }

    /// Check if the pipeline is running
    pub fn is_running(&self) -> bool {
        matches!(self, PipelineState::Running { .. })
    }

    /// Check if the pipeline is stopped or stopping
    pub fn is_stopped(&self) -> bool {
        matches!(self, PipelineState::Stopped | PipelineState::Stopping)
    }

    /// Get the duration since the pipeline started (if running)
    pub fn running_duration(&self) -> Option<std::time::Duration> {
        if let PipelineState::Running { started_at } = self {
            Some(started_at.elapsed())
        } else {
            None
        }
    }
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// Lifecycle of a single stage thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum StageState {
    /// Resources allocated, thread not started
    Idle = 0,
    /// Pulling from upstream and pushing downstream
    Running = 1,
    /// Upstream finished; processing what is already enqueued
    Draining = 2,
    /// Done; downstream buffers have been finished
    Completed = 3,
}

impl StageState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => StageState::Idle,
            1 => StageState::Running,
            2 => StageState::Draining,
            _ => StageState::Completed,
        }
    }

    pub fn can_transition_to(&self, target: StageState) -> bool {
        use StageState::*;

        matches!(
            (self, target),
            (Idle, Running)
                | (Idle, Completed)
                | (Running, Draining)
                | (Running, Completed)
                | (Draining, Completed)
        )
    }
}

impl std::fmt::Display for StageState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            StageState::Idle => "Idle",
            StageState::Running => "Running",
            StageState::Draining => "Draining",
            StageState::Completed => "Completed",
        };
        write!(f, "{name}")
    }
}

/// Shared, lock-free view of one stage's [`StageState`].
#[derive(Debug)]
pub struct StageStatus {
    state: AtomicU8,
}

impl StageStatus {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(StageState::Idle as u8),
        }
    }

    pub fn get(&self) -> StageState {
        StageState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Move to `target` if that is a valid transition from the current state.
    pub fn advance(&self, target: StageState) -> bool {
        self.state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                StageState::from_u8(current)
                    .can_transition_to(target)
                    .then_some(target as u8)
            })
            .is_ok()
    }
}

impl Default for StageStatus {
    fn default() -> Self {
        Self::new()
    }
}

/// One-shot completion flags read across stage threads.
#[derive(Debug, Default)]
pub struct LifecycleFlags {
    pub demuxing_completed: CompletionFlag,
    pub video_decoding_completed: CompletionFlag,
    pub audio_decoding_completed: CompletionFlag,
}

impl LifecycleFlags {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn decoding_completed(&self, kind: MediaKind) -> &CompletionFlag {
        match kind {
            MediaKind::Video => &self.video_decoding_completed,
            MediaKind::Audio => &self.audio_decoding_completed,
        }
    }

    /// Every stage observed its end of stream.
    pub fn all_completed(&self) -> bool {
        self.demuxing_completed.is_set()
            && self.video_decoding_completed.is_set()
            && self.audio_decoding_completed.is_set()
    }
}
