//! TaskContext: what a task body sees during one execution.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use butler_core::{ButlerError, Desktop, Match, ProcessId, Region, Result, ScreenCapture};
use futures::future::join_all;
use tokio_util::sync::CancellationToken;

use crate::action::{Action, ActionQueue, ActionTicket, boxed_op};
use crate::arbiter::FocusTracker;
use crate::task::{Task, TaskEvent, jittered};

/// Random spread added to every humanized delay.
pub const DELAY_JITTER: Duration = Duration::from_millis(50);

/// Sleep for `d` plus or minus [`DELAY_JITTER`]. For use inside action operations.
pub async fn human_delay(d: Duration) {
    tokio::time::sleep(jittered(d, DELAY_JITTER)).await;
}

/// Handle given to [`crate::TaskBody::tick`].
///
/// Every await point returns [`ButlerError::Cancelled`] once the execution is
/// cancelled, so bodies can propagate with `?`.
pub struct TaskContext {
    task: Task,
    execution: CancellationToken,
    queue: Arc<ActionQueue>,
    capture: Arc<dyn ScreenCapture>,
    focus: Arc<FocusTracker>,
    siblings: Vec<Task>,
}

impl TaskContext {
    pub fn new(
        task: Task,
        execution: CancellationToken,
        queue: Arc<ActionQueue>,
        capture: Arc<dyn ScreenCapture>,
        focus: Arc<FocusTracker>,
        siblings: Vec<Task>,
    ) -> Self {
        Self {
            task,
            execution,
            queue,
            capture,
            focus,
            siblings,
        }
    }

    pub fn task(&self) -> &Task {
        &self.task
    }

    pub fn process(&self) -> ProcessId {
        self.task.process()
    }

    pub fn token(&self) -> &CancellationToken {
        &self.execution
    }

    pub fn is_cancelled(&self) -> bool {
        self.execution.is_cancelled() || !self.task.is_active()
    }

    pub fn check_cancelled(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(ButlerError::Cancelled);
        }
        Ok(())
    }

    pub fn capture(&self) -> &dyn ScreenCapture {
        self.capture.as_ref()
    }

    /// Template search in this task's process window.
    pub fn find_matches(
        &self,
        region: Region,
        templates: &[&str],
        similarity: f32,
    ) -> Result<Vec<Match>> {
        self.capture
            .find_matches(self.process(), region, templates, similarity)
    }

    /// Queue an input action. User-focus tasks wait for the user; every
    /// other task's actions take the foreground.
    pub fn enqueue<F, Fut>(&self, sub_priority: i64, op: F) -> Result<ActionTicket>
    where
        F: FnOnce(Arc<dyn Desktop>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.check_cancelled()?;
        let pid = self.process();
        let (action, ticket) = Action::new(
            self.task.clone(),
            self.execution.clone(),
            sub_priority,
            !self.task.needs_user_focus(),
            self.focus.is_holder(pid),
            boxed_op(op),
        );
        self.queue.push(action);
        Ok(ticket)
    }

    /// Wait for one enqueued action, giving up when the execution is cancelled.
    pub async fn wait(&self, ticket: ActionTicket) -> Result<()> {
        tokio::select! {
            res = ticket.wait() => res,
            _ = self.execution.cancelled() => Err(ButlerError::Cancelled),
        }
    }

    /// Wait for a batch. Failures win over cancellations.
    pub async fn wait_all(&self, tickets: Vec<ActionTicket>) -> Result<()> {
        let results = tokio::select! {
            res = join_all(tickets.into_iter().map(ActionTicket::wait)) => res,
            _ = self.execution.cancelled() => return Err(ButlerError::Cancelled),
        };
        let mut first_cancel = None;
        for res in results {
            match res {
                Ok(()) => {}
                Err(e) if e.is_cancelled() => first_cancel = Some(e),
                Err(e) => return Err(e),
            }
        }
        match first_cancel {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Enqueue one action and wait for it.
    pub async fn request_input<F, Fut>(&self, sub_priority: i64, op: F) -> Result<()>
    where
        F: FnOnce(Arc<dyn Desktop>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let ticket = self.enqueue(sub_priority, op)?;
        self.wait(ticket).await
    }

    /// Sleep for `d` plus or minus [`DELAY_JITTER`], interruptible by cancellation.
    pub async fn delay(&self, d: Duration) -> Result<()> {
        tokio::select! {
            _ = tokio::time::sleep(jittered(d, DELAY_JITTER)) => Ok(()),
            _ = self.execution.cancelled() => Err(ButlerError::Cancelled),
        }
    }

    /// Tasks of the same process at trigger time, this one included.
    pub fn siblings(&self) -> &[Task] {
        &self.siblings
    }

    /// Deliver `event` to every other live task of this process.
    pub fn publish(&self, event: TaskEvent) {
        for sibling in &self.siblings {
            if sibling.id() != self.task.id() && !sibling.is_cancelled() {
                sibling.body().on_event(&event);
            }
        }
    }

    /// Pause the other tasks of this process matching `pred`. Returns how many were paused.
    pub fn pause_siblings(&self, pred: impl Fn(&Task) -> bool) -> usize {
        let mut paused = 0;
        for sibling in &self.siblings {
            if sibling.id() != self.task.id() && !sibling.is_paused() && pred(sibling) {
                sibling.pause();
                paused += 1;
            }
        }
        paused
    }
}
