//! Task model: periodic automation units bound to one target process.
//!
//! A [`Task`] is a cloneable handle over shared runtime state. The tick loop
//! decrements its countdown and triggers executions; the caller flips its
//! lifecycle (start, stop, pause, cancel) from any thread.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use butler_core::{ButlerError, ProcessId, Result};
use rand::Rng;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::context::TaskContext;

/// Execution priority given to tasks that do not pick one. Lower runs first.
pub const DEFAULT_PRIORITY: i32 = 100;

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

/// Unique id of one task instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct TaskId(pub u64);

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "task#{}", self.0)
    }
}

/// What a task does. A process holds at most one task of each kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Click,
    Mining,
    XpSkill,
    StatsWatcher,
    ItemFindPause,
    Hunting,
    Custom(String),
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskKind::Click => write!(f, "click"),
            TaskKind::Mining => write!(f, "mining"),
            TaskKind::XpSkill => write!(f, "xp_skill"),
            TaskKind::StatsWatcher => write!(f, "stats_watcher"),
            TaskKind::ItemFindPause => write!(f, "item_find_pause"),
            TaskKind::Hunting => write!(f, "hunting"),
            TaskKind::Custom(name) => write!(f, "custom:{name}"),
        }
    }
}

/// Task identity: equal keys mean the same task for duplicate checks.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TaskKey {
    pub process: ProcessId,
    pub kind: TaskKind,
}

/// Signals one task publishes to the other tasks of its process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "event")]
pub enum TaskEvent {
    /// Health bar moved. Values are percentages, `-1` when unreadable.
    HealthChanged { old: i32, new: i32 },
    ManaChanged { old: i32, new: i32 },
}

/// Static task parameters.
#[derive(Debug, Clone)]
pub struct TaskSettings {
    pub interval: Duration,
    /// Each rescheduling adds a uniform offset in `[-variance, +variance]`.
    pub interval_variance: Duration,
    pub priority: i32,
    /// Actions run only while the user has the window under the cursor,
    /// and never steal the foreground.
    pub needs_user_focus: bool,
    /// Skip triggering while the process shows its disconnected state.
    pub needs_connected_process: bool,
}

impl Default for TaskSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            interval_variance: Duration::ZERO,
            priority: DEFAULT_PRIORITY,
            needs_user_focus: false,
            needs_connected_process: true,
        }
    }
}

impl TaskSettings {
    pub fn every(interval: Duration) -> Self {
        Self {
            interval,
            ..Default::default()
        }
    }

    pub fn with_variance(mut self, variance: Duration) -> Self {
        self.interval_variance = variance;
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_user_focus(mut self, needs_user_focus: bool) -> Self {
        self.needs_user_focus = needs_user_focus;
        self
    }

    pub fn with_connected_process(mut self, needs_connected_process: bool) -> Self {
        self.needs_connected_process = needs_connected_process;
        self
    }
}

/// The behavior of one task kind.
///
/// `tick` runs on its own tokio task for every triggered cycle. It must stop
/// promptly once its context reports cancellation; every context await point
/// already returns [`ButlerError::Cancelled`] in that case.
#[async_trait]
pub trait TaskBody: Send + Sync + 'static {
    fn kind(&self) -> TaskKind;

    /// One execution cycle.
    async fn tick(&self, ctx: &TaskContext) -> Result<()>;

    /// The arbiter moved this task's process to the foreground for one of its actions.
    fn on_focus_granted(&self, _process: ProcessId) {}

    /// Another task of the same process published an event.
    fn on_event(&self, _event: &TaskEvent) {}

    /// Called once when the task is cancelled.
    fn dispose(&self) {}

    /// One-line human readable status.
    fn status_line(&self) -> String {
        String::new()
    }
}

#[derive(Debug, Default)]
struct TaskState {
    enabled: bool,
    running: bool,
    paused: bool,
    cancelled: bool,
    next_run: Duration,
    start_tick: u64,
    run_count: u64,
    last_error: Option<String>,
    execution: Option<CancellationToken>,
}

struct TaskInner {
    id: TaskId,
    process: ProcessId,
    kind: TaskKind,
    settings: TaskSettings,
    body: Arc<dyn TaskBody>,
    state: Mutex<TaskState>,
}

/// Shared handle to one task.
///
/// Tasks start disabled; call [`Task::start`] to enable them. A cancelled task
/// is finished for good.
#[derive(Clone)]
pub struct Task {
    inner: Arc<TaskInner>,
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.inner.id)
            .field("process", &self.inner.process)
            .field("kind", &self.inner.kind)
            .finish()
    }
}

impl PartialEq for Task {
    fn eq(&self, other: &Self) -> bool {
        self.inner.process == other.inner.process && self.inner.kind == other.inner.kind
    }
}

impl Eq for Task {}

impl Task {
    pub fn new(process: ProcessId, settings: TaskSettings, body: impl TaskBody) -> Self {
        Self::from_arc(process, settings, Arc::new(body))
    }

    pub fn from_arc(process: ProcessId, settings: TaskSettings, body: Arc<dyn TaskBody>) -> Self {
        let id = TaskId(NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed));
        Self {
            inner: Arc::new(TaskInner {
                id,
                process,
                kind: body.kind(),
                settings,
                body,
                state: Mutex::new(TaskState::default()),
            }),
        }
    }

    pub fn id(&self) -> TaskId {
        self.inner.id
    }

    pub fn process(&self) -> ProcessId {
        self.inner.process
    }

    pub fn kind(&self) -> &TaskKind {
        &self.inner.kind
    }

    pub fn key(&self) -> TaskKey {
        TaskKey {
            process: self.inner.process,
            kind: self.inner.kind.clone(),
        }
    }

    pub fn settings(&self) -> &TaskSettings {
        &self.inner.settings
    }

    pub fn priority(&self) -> i32 {
        self.inner.settings.priority
    }

    pub fn needs_user_focus(&self) -> bool {
        self.inner.settings.needs_user_focus
    }

    pub fn body(&self) -> Arc<dyn TaskBody> {
        self.inner.body.clone()
    }

    pub fn is_enabled(&self) -> bool {
        lock(&self.inner.state).enabled
    }

    pub fn is_running(&self) -> bool {
        lock(&self.inner.state).running
    }

    pub fn is_paused(&self) -> bool {
        lock(&self.inner.state).paused
    }

    pub fn is_cancelled(&self) -> bool {
        lock(&self.inner.state).cancelled
    }

    /// Enabled and not cancelled: its queued actions are still wanted.
    pub fn is_active(&self) -> bool {
        let state = lock(&self.inner.state);
        state.enabled && !state.cancelled
    }

    pub fn next_run(&self) -> Duration {
        lock(&self.inner.state).next_run
    }

    /// Frame tick of the most recent trigger.
    pub fn start_tick(&self) -> u64 {
        lock(&self.inner.state).start_tick
    }

    pub fn run_count(&self) -> u64 {
        lock(&self.inner.state).run_count
    }

    pub fn last_error(&self) -> Option<String> {
        lock(&self.inner.state).last_error.clone()
    }

    /// Enable the task.
    pub fn start(&self) -> Result<()> {
        let mut state = lock(&self.inner.state);
        if state.cancelled {
            return Err(ButlerError::TaskCancelled(self.label()));
        }
        if !state.enabled {
            state.enabled = true;
            tracing::info!("▶️ Task {} enabled", self.label());
        }
        Ok(())
    }

    /// Disable the task and cancel its in-flight execution. Returns whether it was enabled.
    pub fn stop(&self) -> bool {
        let mut state = lock(&self.inner.state);
        let was_enabled = std::mem::replace(&mut state.enabled, false);
        if let Some(token) = &state.execution {
            token.cancel();
        }
        if was_enabled {
            tracing::info!("⏹️ Task {} disabled", self.label());
        }
        was_enabled
    }

    /// Suspend countdown and triggering. An in-flight execution keeps going.
    pub fn pause(&self) {
        let mut state = lock(&self.inner.state);
        if !state.cancelled && !state.paused {
            state.paused = true;
            tracing::info!("⏸️ Task {} paused", self.label());
        }
    }

    pub fn resume(&self) {
        let mut state = lock(&self.inner.state);
        if state.paused {
            state.paused = false;
            tracing::info!("⏯️ Task {} resumed", self.label());
        }
    }

    /// Trigger on the next eligible fixed step. No effect while an execution is in flight.
    pub fn force_run(&self) {
        let mut state = lock(&self.inner.state);
        if !state.running {
            state.next_run = Duration::ZERO;
        }
    }

    /// Cancel the in-flight execution, if any. Returns whether one was running.
    pub fn cancel_execution(&self) -> bool {
        let state = lock(&self.inner.state);
        match &state.execution {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Permanently cancel the task. Idempotent.
    pub fn cancel(&self) {
        {
            let mut state = lock(&self.inner.state);
            if state.cancelled {
                return;
            }
            state.cancelled = true;
            state.enabled = false;
            state.paused = false;
            if let Some(token) = &state.execution {
                token.cancel();
            }
        }
        tracing::info!("🗑️ Task {} cancelled", self.label());
        self.inner.body.dispose();
    }

    /// Advance the countdown by one fixed step. Returns the execution token
    /// when the task triggers.
    pub(crate) fn advance(
        &self,
        step: Duration,
        tick: u64,
        process_disconnected: bool,
    ) -> Option<CancellationToken> {
        let mut state = lock(&self.inner.state);
        if !state.enabled || state.cancelled || state.running || state.paused {
            return None;
        }
        state.next_run = state.next_run.saturating_sub(step);
        if !state.next_run.is_zero() {
            return None;
        }
        if process_disconnected && self.inner.settings.needs_connected_process {
            return None;
        }
        let token = CancellationToken::new();
        state.running = true;
        state.start_tick = tick;
        state.run_count += 1;
        state.execution = Some(token.clone());
        Some(token)
    }

    /// Close the in-flight execution and schedule the next one.
    pub(crate) fn finish(&self, outcome: std::result::Result<(), String>) {
        let next = jittered(
            self.inner.settings.interval,
            self.inner.settings.interval_variance,
        );
        let mut state = lock(&self.inner.state);
        state.running = false;
        state.execution = None;
        state.next_run = next;
        state.last_error = outcome.err();
    }

    pub fn status_line(&self) -> String {
        self.inner.body.status_line()
    }

    pub fn view(&self) -> TaskView {
        let state = lock(&self.inner.state);
        TaskView {
            id: self.inner.id,
            process: self.inner.process,
            kind: self.inner.kind.to_string(),
            priority: self.inner.settings.priority,
            enabled: state.enabled,
            running: state.running,
            paused: state.paused,
            cancelled: state.cancelled,
            next_run_ms: state.next_run.as_millis() as u64,
            run_count: state.run_count,
            last_error: state.last_error.clone(),
            status: self.inner.body.status_line(),
        }
    }

    fn label(&self) -> String {
        format!("{}/{}", self.inner.process, self.inner.kind)
    }
}

/// Serializable point-in-time view of a task.
#[derive(Debug, Clone, Serialize)]
pub struct TaskView {
    pub id: TaskId,
    pub process: ProcessId,
    pub kind: String,
    pub priority: i32,
    pub enabled: bool,
    pub running: bool,
    pub paused: bool,
    pub cancelled: bool,
    pub next_run_ms: u64,
    pub run_count: u64,
    pub last_error: Option<String>,
    pub status: String,
}

/// `base` plus a uniform offset in `[-variance, +variance]`, floored at zero.
pub fn jittered(base: Duration, variance: Duration) -> Duration {
    if variance.is_zero() {
        return base;
    }
    let v = variance.as_secs_f64();
    let offset = rand::thread_rng().gen_range(-v..=v);
    Duration::from_secs_f64((base.as_secs_f64() + offset).max(0.0))
}
