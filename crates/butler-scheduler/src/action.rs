//! Input actions and the priority queue the arbiter drains.
//!
//! Ordering keys are snapshotted when an action is enqueued, so later changes
//! to its task never reorder the heap.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use butler_core::{ButlerError, Desktop, ProcessId, Result};
use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::sync::{Notify, oneshot};
use tokio_util::sync::CancellationToken;

use crate::task::{Task, TaskId};

/// The operation an action performs once it owns the input devices.
pub type ActionOp = Box<dyn FnOnce(Arc<dyn Desktop>) -> BoxFuture<'static, Result<()>> + Send>;

/// Box an async closure as an [`ActionOp`].
pub fn boxed_op<F, Fut>(f: F) -> ActionOp
where
    F: FnOnce(Arc<dyn Desktop>) -> Fut + Send + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    Box::new(move |desktop| f(desktop).boxed())
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

/// How one action ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionOutcome {
    Completed,
    Cancelled,
    Failed(String),
}

/// Arbitration order of one action. `Less` is dequeued first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionKey {
    /// Task priority, ascending.
    pub priority: i32,
    /// Start tick of the enqueuing execution, newest first.
    pub start_tick: u64,
    pub process: ProcessId,
    /// Position inside one execution's batch, ascending.
    pub sub_priority: i64,
    /// The process held the foreground when the action was enqueued.
    pub had_foreground: bool,
    /// Enqueue order, assigned by the queue.
    pub seq: u64,
}

impl Ord for ActionKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.start_tick.cmp(&self.start_tick))
            .then_with(|| self.process.cmp(&other.process))
            .then_with(|| self.sub_priority.cmp(&other.sub_priority))
            .then_with(|| other.had_foreground.cmp(&self.had_foreground))
            .then_with(|| self.seq.cmp(&other.seq))
    }
}

impl PartialOrd for ActionKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// One queued unit of exclusive input work.
pub struct Action {
    task: Task,
    execution: CancellationToken,
    key: ActionKey,
    requires_foreground: bool,
    op: ActionOp,
    done: oneshot::Sender<ActionOutcome>,
}

impl std::fmt::Debug for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Action")
            .field("task", &self.task)
            .field("key", &self.key)
            .field("requires_foreground", &self.requires_foreground)
            .finish()
    }
}

impl Action {
    /// Build an action for `task`'s current execution. The ordering key is
    /// taken from the task now.
    pub fn new(
        task: Task,
        execution: CancellationToken,
        sub_priority: i64,
        requires_foreground: bool,
        had_foreground: bool,
        op: ActionOp,
    ) -> (Self, ActionTicket) {
        let (done, rx) = oneshot::channel();
        let key = ActionKey {
            priority: task.priority(),
            start_tick: task.start_tick(),
            process: task.process(),
            sub_priority,
            had_foreground,
            seq: 0,
        };
        let action = Self {
            task,
            execution,
            key,
            requires_foreground,
            op,
            done,
        };
        (action, ActionTicket { rx })
    }

    pub fn key(&self) -> &ActionKey {
        &self.key
    }

    pub fn task(&self) -> &Task {
        &self.task
    }

    pub fn process(&self) -> ProcessId {
        self.key.process
    }

    /// The process must be brought to the foreground before this runs.
    pub fn requires_foreground(&self) -> bool {
        self.requires_foreground
    }

    /// The owning task or execution went away; the action must not run.
    pub fn is_stale(&self) -> bool {
        self.execution.is_cancelled() || !self.task.is_active()
    }

    pub fn cancel(self) {
        let _ = self.done.send(ActionOutcome::Cancelled);
    }

    /// Run the operation and resolve the ticket. Panics inside the
    /// operation resolve as `Failed`.
    pub async fn execute(self, desktop: Arc<dyn Desktop>) -> ActionOutcome {
        let Action { op, done, task, .. } = self;
        let run = AssertUnwindSafe(async move { op(desktop).await }).catch_unwind();
        let outcome = match run.await {
            Ok(Ok(())) => ActionOutcome::Completed,
            Ok(Err(e)) if e.is_cancelled() => ActionOutcome::Cancelled,
            Ok(Err(e)) => {
                tracing::warn!("⚠️ Action of {:?} failed: {e}", task);
                ActionOutcome::Failed(e.to_string())
            }
            Err(_) => {
                tracing::error!("💥 Action of {:?} panicked", task);
                ActionOutcome::Failed("action panicked".into())
            }
        };
        let _ = done.send(outcome.clone());
        outcome
    }
}

/// Completion handle of an enqueued action.
#[derive(Debug)]
pub struct ActionTicket {
    rx: oneshot::Receiver<ActionOutcome>,
}

impl ActionTicket {
    /// Wait for the action to resolve. A dropped action counts as cancelled.
    pub async fn outcome(self) -> ActionOutcome {
        self.rx.await.unwrap_or(ActionOutcome::Cancelled)
    }

    /// Wait for the action and map its outcome to a `Result`.
    pub async fn wait(self) -> Result<()> {
        match self.outcome().await {
            ActionOutcome::Completed => Ok(()),
            ActionOutcome::Cancelled => Err(ButlerError::Cancelled),
            ActionOutcome::Failed(msg) => Err(ButlerError::Input(msg)),
        }
    }
}

struct Queued(Action);

impl PartialEq for Queued {
    fn eq(&self, other: &Self) -> bool {
        self.0.key == other.0.key
    }
}

impl Eq for Queued {}

impl Ord for Queued {
    // BinaryHeap pops the greatest element; the earliest key must win.
    fn cmp(&self, other: &Self) -> Ordering {
        other.0.key.cmp(&self.0.key)
    }
}

impl PartialOrd for Queued {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Default)]
struct QueueInner {
    heap: BinaryHeap<Queued>,
    next_seq: u64,
}

/// Process-wide queue of pending actions, shared by every task context and
/// the arbiter.
#[derive(Default)]
pub struct ActionQueue {
    inner: Mutex<QueueInner>,
    notify: Notify,
}

impl ActionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue a new action and wake the arbiter.
    pub fn push(&self, mut action: Action) {
        {
            let mut inner = lock(&self.inner);
            action.key.seq = inner.next_seq;
            inner.next_seq += 1;
            inner.heap.push(Queued(action));
        }
        self.notify.notify_one();
    }

    /// Put deferred actions back with their original keys. Does not wake the arbiter.
    pub fn requeue(&self, actions: Vec<Action>) {
        if actions.is_empty() {
            return;
        }
        let mut inner = lock(&self.inner);
        inner.heap.extend(actions.into_iter().map(Queued));
    }

    pub fn pop(&self) -> Option<Action> {
        lock(&self.inner).heap.pop().map(|q| q.0)
    }

    pub fn len(&self) -> usize {
        lock(&self.inner).heap.len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.inner).heap.is_empty()
    }

    /// Keys of the queued actions in dequeue order.
    pub fn pending(&self) -> Vec<ActionKey> {
        let inner = lock(&self.inner);
        let mut keys: Vec<ActionKey> = inner.heap.iter().map(|q| q.0.key.clone()).collect();
        keys.sort();
        keys
    }

    /// Cancel every queued action matching `pred`. Returns how many were removed.
    pub fn cancel_where(&self, pred: impl Fn(&Action) -> bool) -> usize {
        let removed: Vec<Action> = {
            let mut inner = lock(&self.inner);
            let (matched, kept): (Vec<Queued>, Vec<Queued>) =
                std::mem::take(&mut inner.heap).into_iter().partition(|q| pred(&q.0));
            inner.heap = kept.into_iter().collect();
            matched.into_iter().map(|q| q.0).collect()
        };
        let n = removed.len();
        for action in removed {
            action.cancel();
        }
        n
    }

    /// Drop actions whose task was disabled or cancelled, or whose execution ended.
    pub fn purge_stale(&self) -> usize {
        self.cancel_where(Action::is_stale)
    }

    pub fn cancel_tasks(&self, ids: &HashSet<TaskId>) -> usize {
        self.cancel_where(|a| ids.contains(&a.task().id()))
    }

    /// Cancel everything.
    pub fn drain(&self) -> usize {
        self.cancel_where(|_| true)
    }

    /// Wait until a new action is pushed or `timeout` elapses.
    pub async fn wait_for_work(&self, timeout: Duration) {
        let _ = tokio::time::timeout(timeout, self.notify.notified()).await;
    }
}
