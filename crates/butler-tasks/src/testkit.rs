//! Runs task bodies against the simulated desktop with a live arbiter.

use std::sync::Arc;

use butler_core::sim::{SimCapture, SimDesktop};
use butler_core::{ArbiterConfig, ProcessId, UserFocusPolicy};
use butler_scheduler::{
    ActionQueue, Arbiter, ArbiterStats, FocusTracker, Task, TaskContext, TaskSettings,
};
use tokio_util::sync::CancellationToken;

pub const PID: ProcessId = ProcessId(4120);

pub struct Harness {
    pub desktop: Arc<SimDesktop>,
    pub capture: Arc<SimCapture>,
    pub queue: Arc<ActionQueue>,
    focus: Arc<FocusTracker>,
    shutdown: CancellationToken,
}

impl Harness {
    /// Harness with a running arbiter. Call inside a tokio runtime.
    pub fn new() -> Self {
        let harness = Self::idle();
        let arbiter = Arbiter::new(
            harness.queue.clone(),
            harness.desktop.clone(),
            harness.focus.clone(),
            Arc::new(ArbiterStats::default()),
            ArbiterConfig {
                poll_interval_ms: 5,
                pass_delay_ms: 1,
                focus_timeout_ms: 20,
                focus_settle_ms: 1,
                user_focus_policy: UserFocusPolicy::ForegroundAndCursor,
            },
        );
        tokio::spawn(arbiter.run(harness.shutdown.clone()));
        harness
    }

    /// Harness without an arbiter: enqueued actions stay queued.
    pub fn idle() -> Self {
        Self {
            desktop: Arc::new(SimDesktop::new()),
            capture: Arc::new(SimCapture::new()),
            queue: Arc::new(ActionQueue::new()),
            focus: Arc::new(FocusTracker::default()),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn context(&self, task: &Task, siblings: Vec<Task>) -> TaskContext {
        TaskContext::new(
            task.clone(),
            CancellationToken::new(),
            self.queue.clone(),
            self.capture.clone(),
            self.focus.clone(),
            siblings,
        )
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// A started task around `body` on [`PID`].
pub fn started<B: butler_scheduler::TaskBody>(body: Arc<B>, settings: TaskSettings) -> Task {
    let task = Task::from_arc(PID, settings, body);
    task.start().unwrap_or_else(|e| panic!("start failed: {e}"));
    task
}
