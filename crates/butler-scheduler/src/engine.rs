//! Scheduler Engine: owns the tick loop and the arbiter and exposes the
//! outbound control surface.
//!
//! Both loops run as tokio tasks between `start` and `stop`. Registry
//! changes go through the tick loop's mailbox; reads come from the latest
//! published [`RegistrySnapshot`].

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use butler_core::{
    ArbiterConfig, ButlerConfig, ButlerError, Desktop, ProcessId, Result, ScreenCapture,
    SchedulerConfig,
};
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::action::ActionQueue;
use crate::arbiter::{Arbiter, ArbiterStats, ArbiterStatsSnapshot, FocusTracker};
use crate::registry::{ProcessView, RegistrySnapshot};
use crate::task::{Task, TaskId};
use crate::tick::{Claims, Command, Shared, TickCounters, TickLoop};
use crate::watcher::WatcherEvent;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

/// Sender half for process lifecycle events.
#[derive(Debug, Clone)]
pub struct WatcherSink {
    tx: mpsc::UnboundedSender<Command>,
}

impl WatcherSink {
    /// Forward one event. False once the scheduler is gone.
    pub fn emit(&self, event: WatcherEvent) -> bool {
        self.tx.send(Command::Watcher(event)).is_ok()
    }
}

struct Running {
    shutdown: CancellationToken,
    tick: JoinHandle<TickLoop>,
    arbiter: JoinHandle<()>,
}

/// Serializable summary of the whole engine.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub running: bool,
    pub ticks: u64,
    pub fixed_ticks: u64,
    pub uptime_ms: u64,
    pub queued_actions: usize,
    pub focus_holder: Option<ProcessId>,
    pub arbiter: ArbiterStatsSnapshot,
    pub processes: Vec<ProcessView>,
}

/// The scheduler engine. Multiplexes many tasks over one set of input devices.
pub struct SchedulerEngine {
    mailbox: mpsc::UnboundedSender<Command>,
    snapshot: watch::Receiver<RegistrySnapshot>,
    idle: Mutex<Option<TickLoop>>,
    running: Mutex<Option<Running>>,
    shared: Shared,
    desktop: Arc<dyn Desktop>,
    arbiter_config: ArbiterConfig,
    arbiter_stats: Arc<ArbiterStats>,
}

impl SchedulerEngine {
    pub fn new(
        scheduler: SchedulerConfig,
        arbiter: ArbiterConfig,
        desktop: Arc<dyn Desktop>,
        capture: Arc<dyn ScreenCapture>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (snap_tx, snap_rx) = watch::channel(RegistrySnapshot::default());
        let shared = Shared {
            queue: Arc::new(ActionQueue::new()),
            capture,
            focus: Arc::new(FocusTracker::default()),
            claims: Arc::new(Claims::default()),
            counters: Arc::new(TickCounters::default()),
        };
        let tick = TickLoop::new(scheduler, rx, snap_tx, shared.clone());
        Self {
            mailbox: tx,
            snapshot: snap_rx,
            idle: Mutex::new(Some(tick)),
            running: Mutex::new(None),
            shared,
            desktop,
            arbiter_config: arbiter,
            arbiter_stats: Arc::new(ArbiterStats::default()),
        }
    }

    pub fn from_config(
        config: &ButlerConfig,
        desktop: Arc<dyn Desktop>,
        capture: Arc<dyn ScreenCapture>,
    ) -> Self {
        Self::new(
            config.scheduler.clone(),
            config.arbiter.clone(),
            desktop,
            capture,
        )
    }

    /// Spawn the tick loop and the arbiter. Must be called inside a tokio runtime.
    pub fn start(&self) -> Result<()> {
        let mut running = lock(&self.running);
        if running.is_some() {
            return Err(ButlerError::AlreadyRunning);
        }
        let tick_loop = lock(&self.idle)
            .take()
            .ok_or_else(|| ButlerError::Task("tick loop was lost after a crash".into()))?;

        let shutdown = CancellationToken::new();
        let arbiter = Arbiter::new(
            self.shared.queue.clone(),
            self.desktop.clone(),
            self.shared.focus.clone(),
            self.arbiter_stats.clone(),
            self.arbiter_config.clone(),
        );
        *running = Some(Running {
            tick: tokio::spawn(tick_loop.run(shutdown.child_token())),
            arbiter: tokio::spawn(arbiter.run(shutdown.child_token())),
            shutdown,
        });
        tracing::info!("🚀 Scheduler started");
        Ok(())
    }

    /// Stop both loops. Queued actions are cancelled and in-flight executions
    /// are signalled; tasks stay enabled so a later `start` resumes them.
    pub async fn stop(&self) -> Result<()> {
        let Some(run) = lock(&self.running).take() else {
            return Err(ButlerError::NotRunning);
        };
        run.shutdown.cancel();
        for task in self.tasks() {
            task.cancel_execution();
        }

        let tick = run.tick.await;
        if let Err(e) = run.arbiter.await {
            tracing::error!("💥 Arbiter ended abnormally: {e}");
        }
        match tick {
            Ok(tick_loop) => {
                *lock(&self.idle) = Some(tick_loop);
                tracing::info!("🛑 Scheduler stopped");
                Ok(())
            }
            Err(e) => {
                tracing::error!("💥 Tick loop ended abnormally: {e}");
                Err(ButlerError::Task(format!("tick loop crashed: {e}")))
            }
        }
    }

    pub fn is_running(&self) -> bool {
        lock(&self.running).is_some()
    }

    /// Register a task. Rejects a second task of the same kind on one
    /// process. A task naming an unknown process is cancelled when the tick
    /// loop picks it up.
    pub fn add_task(&self, task: Task) -> Result<()> {
        if task.is_cancelled() {
            return Err(ButlerError::TaskCancelled(task.kind().to_string()));
        }
        if !self.shared.claims.claim(&task) {
            return Err(ButlerError::DuplicateTask {
                process: task.process(),
                kind: task.kind().to_string(),
            });
        }
        if let Err(mpsc::error::SendError(Command::AddTask(task))) =
            self.mailbox.send(Command::AddTask(task))
        {
            self.shared.claims.release(&task);
            return Err(ButlerError::Task("scheduler mailbox closed".into()));
        }
        Ok(())
    }

    /// Cancel a task and detach it. Its queued actions resolve as cancelled now.
    pub fn remove_task(&self, task: &Task) -> Result<()> {
        task.cancel();
        self.shared.claims.release(task);
        self.shared
            .queue
            .cancel_tasks(&HashSet::from([task.id()]));
        self.send(Command::RemoveTask(task.id()))
    }

    /// Cancel every queued action and signal every in-flight execution.
    /// Returns how many queued actions were dropped.
    pub fn cancel_running(&self) -> usize {
        let dropped = self.shared.queue.drain();
        let mut signalled = 0;
        for task in self.tasks() {
            if task.cancel_execution() {
                signalled += 1;
            }
        }
        tracing::warn!("🛑 Cancelled {dropped} queued actions and {signalled} running executions");
        dropped
    }

    pub fn pause_process(&self, pid: ProcessId) -> Result<()> {
        self.send(Command::PauseProcess(pid))
    }

    pub fn resume_process(&self, pid: ProcessId) -> Result<()> {
        self.send(Command::ResumeProcess(pid))
    }

    /// Sink for a [`crate::ProcessWatcher`] or any other lifecycle source.
    pub fn events(&self) -> WatcherSink {
        WatcherSink {
            tx: self.mailbox.clone(),
        }
    }

    pub fn handle_event(&self, event: WatcherEvent) -> Result<()> {
        self.send(Command::Watcher(event))
    }

    /// Latest published registry state.
    pub fn snapshot(&self) -> RegistrySnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<RegistrySnapshot> {
        self.snapshot.clone()
    }

    pub fn processes(&self) -> Vec<ProcessView> {
        self.snapshot.borrow().views()
    }

    pub fn tasks(&self) -> Vec<Task> {
        self.snapshot.borrow().tasks().cloned().collect()
    }

    pub fn task(&self, id: TaskId) -> Option<Task> {
        self.snapshot.borrow().tasks().find(|t| t.id() == id).cloned()
    }

    pub fn queue(&self) -> &Arc<ActionQueue> {
        &self.shared.queue
    }

    pub fn counters(&self) -> &TickCounters {
        &self.shared.counters
    }

    pub fn status(&self) -> EngineStatus {
        EngineStatus {
            running: self.is_running(),
            ticks: self.shared.counters.ticks(),
            fixed_ticks: self.shared.counters.fixed_ticks(),
            uptime_ms: self.shared.counters.total_time().as_millis() as u64,
            queued_actions: self.shared.queue.len(),
            focus_holder: self.shared.focus.holder(),
            arbiter: self.arbiter_stats.snapshot(),
            processes: self.processes(),
        }
    }

    fn send(&self, command: Command) -> Result<()> {
        self.mailbox
            .send(command)
            .map_err(|_| ButlerError::Task("scheduler mailbox closed".into()))
    }
}
