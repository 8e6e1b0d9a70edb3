//! Pipeline stage trait and thread spawning
//!
//! Every stage runs on its own OS thread. The spawn helper keeps the stage's
//! [`StageStatus`] in step with the thread: Running once the body starts,
//! Completed when it returns, fails, or panics.

use std::fmt;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use anyhow::Result;
use log::{debug, error};

use super::health::PipelineHealth;
use super::state::{LifecycleFlags, StageState, StageStatus};
use crate::buffer::CompletionFlag;
use crate::utils::sos::SignalOfStop;

/// Trait for pipeline stages that move media data between buffers
pub trait PipelineStage: Send {
    /// Run the stage until its input ends, it fails, or stop is raised
    fn run(&mut self) -> Result<()>;

    /// Get the name of this stage for logging
    fn name(&self) -> &'static str;
}

/// Shared handles every stage works with.
#[derive(Clone)]
pub struct StageContext {
    pub status: Arc<StageStatus>,
    pub health: Arc<PipelineHealth>,
    pub flags: Arc<LifecycleFlags>,
    pub sos: SignalOfStop,
}

impl StageContext {
    /// Enter Draining once the upstream stage has reported completion.
    pub fn observe_upstream(&self, upstream: &CompletionFlag) {
        if upstream.is_set() && self.status.advance(StageState::Draining) {
            debug!("upstream completed, stage draining");
        }
    }

    pub fn stop_requested(&self) -> bool {
        self.sos.cancelled()
    }
}

/// How a stage thread ended.
#[derive(Debug)]
pub enum StageOutcome {
    Completed,
    Failed(anyhow::Error),
    Panicked,
}

impl StageOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, StageOutcome::Completed)
    }
}

impl fmt::Display for StageOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageOutcome::Completed => write!(f, "completed"),
            StageOutcome::Failed(e) => write!(f, "failed: {:#}", e),
            StageOutcome::Panicked => write!(f, "panicked"),
        }
    }
}

pub struct StageHandle {
    name: &'static str,
    handle: JoinHandle<Result<()>>,
}

impl StageHandle {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub fn join(self) -> StageOutcome {
        match self.handle.join() {
            Ok(Ok(())) => StageOutcome::Completed,
            Ok(Err(e)) => StageOutcome::Failed(e),
            Err(_) => StageOutcome::Panicked,
        }
    }
}

/// Marks the stage Completed when the thread leaves, unwinding included.
struct CompletionGuard(Arc<StageStatus>);

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        self.0.advance(StageState::Completed);
    }
}

/// Start `stage` on a named thread.
///
/// The stage value, and with it every buffer endpoint it owns, is dropped on
/// that thread when it exits.
pub fn spawn_stage<S>(mut stage: S, status: Arc<StageStatus>) -> std::io::Result<StageHandle>
where
    S: PipelineStage + 'static,
{
    let name = stage.name();
    let handle = thread::Builder::new()
        .name(name.to_string())
        .spawn(move || {
            let _guard = CompletionGuard(status.clone());
            status.advance(StageState::Running);

            let result = stage.run();
            if let Err(e) = &result {
                error!("{} error: {:#}", stage.name(), e);
            }
            drop(stage);
            result
        })?;

    Ok(StageHandle { name, handle })
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;

    struct ScriptedStage {
        fail: bool,
        panic: bool,
    }

    impl PipelineStage for ScriptedStage {
        fn run(&mut self) -> Result<()> {
            if self.panic {
                panic!("stage blew up");
            }
            if self.fail {
                bail!("scripted failure");
            }
            Ok(())
        }

        fn name(&self) -> &'static str {
            "ScriptedStage"
        }
    }

    fn run_to_end(fail: bool, panic: bool) -> (StageOutcome, StageState) {
        let status = Arc::new(StageStatus::new());
        let handle = spawn_stage(ScriptedStage { fail, panic }, status.clone()).unwrap();
        assert_eq!(handle.name(), "ScriptedStage");
        let outcome = handle.join();
        (outcome, status.get())
    }

    #[test]
    fn test_completed_stage() {
        let (outcome, state) = run_to_end(false, false);
        assert!(outcome.is_completed());
        assert_eq!(state, StageState::Completed);
    }

    #[test]
    fn test_failed_stage_still_completes() {
        let (outcome, state) = run_to_end(true, false);
        assert!(matches!(outcome, StageOutcome::Failed(_)));
        assert!(outcome.to_string().contains("scripted failure"));
        assert_eq!(state, StageState::Completed);
    }

    #[test]
    fn test_panicked_stage_still_completes() {
        let (outcome, state) = run_to_end(false, true);
        assert!(matches!(outcome, StageOutcome::Panicked));
        assert_eq!(state, StageState::Completed);
    }

    #[test]
    fn test_observe_upstream() {
        let ctx = StageContext {
            status: Arc::new(StageStatus::new()),
            health: Arc::new(PipelineHealth::new()),
            flags: Arc::new(LifecycleFlags::new()),
            sos: SignalOfStop::new(),
        };
        ctx.status.advance(StageState::Running);

        ctx.observe_upstream(&ctx.flags.demuxing_completed);
        assert_eq!(ctx.status.get(), StageState::Running);

        ctx.flags.demuxing_completed.set();
        ctx.observe_upstream(&ctx.flags.demuxing_completed);
        assert_eq!(ctx.status.get(), StageState::Draining);
        assert!(!ctx.stop_requested());
    }
}
