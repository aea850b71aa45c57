//! Tick loop: fixed-timestep driver for every task of every process.
//!
//! The loop owns the [`ProcessRegistry`]. Other threads reach it through the
//! [`Command`] mailbox, drained at the top of every frame.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use butler_core::{ProcessId, ScreenCapture, SchedulerConfig};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::action::ActionQueue;
use crate::arbiter::FocusTracker;
use crate::clock::{Clock, plan_steps};
use crate::context::TaskContext;
use crate::registry::{ProcessRegistry, RegistrySnapshot};
use crate::task::{Task, TaskId, TaskKey};
use crate::watcher::WatcherEvent;

/// Registry mutation requests.
#[derive(Debug)]
pub(crate) enum Command {
    Watcher(WatcherEvent),
    AddTask(Task),
    RemoveTask(TaskId),
    PauseProcess(ProcessId),
    ResumeProcess(ProcessId),
}

/// Task keys admitted but not yet removed, checked synchronously by `add_task`.
#[derive(Debug, Default)]
pub(crate) struct Claims {
    keys: Mutex<HashMap<TaskKey, TaskId>>,
}

impl Claims {
    fn lock(&self) -> MutexGuard<'_, HashMap<TaskKey, TaskId>> {
        self.keys.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Claim `task`'s key. False when another task already holds it.
    pub(crate) fn claim(&self, task: &Task) -> bool {
        let mut keys = self.lock();
        match keys.get(&task.key()) {
            Some(id) => *id == task.id(),
            None => {
                keys.insert(task.key(), task.id());
                true
            }
        }
    }

    /// Release `task`'s claim, unless a newer task took the key since.
    pub(crate) fn release(&self, task: &Task) {
        let mut keys = self.lock();
        if keys.get(&task.key()) == Some(&task.id()) {
            keys.remove(&task.key());
        }
    }
}

/// Frame counters mirrored out of the tick loop.
#[derive(Debug, Default)]
pub struct TickCounters {
    pub(crate) ticks: AtomicU64,
    pub(crate) fixed_ticks: AtomicU64,
    pub(crate) total_ms: AtomicU64,
}

impl TickCounters {
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    pub fn fixed_ticks(&self) -> u64 {
        self.fixed_ticks.load(Ordering::Relaxed)
    }

    pub fn total_time(&self) -> Duration {
        Duration::from_millis(self.total_ms.load(Ordering::Relaxed))
    }
}

/// Collaborators every execution context needs.
#[derive(Clone)]
pub(crate) struct Shared {
    pub(crate) queue: Arc<ActionQueue>,
    pub(crate) capture: Arc<dyn ScreenCapture>,
    pub(crate) focus: Arc<FocusTracker>,
    pub(crate) claims: Arc<Claims>,
    pub(crate) counters: Arc<TickCounters>,
}

pub(crate) struct TickLoop {
    clock: Clock,
    config: SchedulerConfig,
    accumulator: Duration,
    registry: ProcessRegistry,
    mailbox: mpsc::UnboundedReceiver<Command>,
    snapshot: watch::Sender<RegistrySnapshot>,
    shared: Shared,
}

impl TickLoop {
    pub(crate) fn new(
        config: SchedulerConfig,
        mailbox: mpsc::UnboundedReceiver<Command>,
        snapshot: watch::Sender<RegistrySnapshot>,
        shared: Shared,
    ) -> Self {
        Self {
            clock: Clock::new(config.max_frame()),
            config,
            accumulator: Duration::ZERO,
            registry: ProcessRegistry::new(),
            mailbox,
            snapshot,
            shared,
        }
    }

    /// Run until `shutdown` fires. Hands itself back so the scheduler can restart.
    pub(crate) async fn run(mut self, shutdown: CancellationToken) -> Self {
        self.clock.start();
        self.accumulator = Duration::ZERO;
        tracing::info!(
            "⏱️ Tick loop started (step {:?}, max frame {:?})",
            self.config.fixed_step(),
            self.config.max_frame()
        );
        loop {
            self.drain_mailbox();
            self.frame();
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.config.frame_sleep()) => {}
            }
        }
        self.drain_mailbox();
        self.clock.stop();
        self.mirror_counters();
        tracing::info!(
            "⏱️ Tick loop stopped after {} frames, {} fixed steps",
            self.clock.tick(),
            self.clock.fixed_tick()
        );
        self
    }

    fn frame(&mut self) {
        if self.reap_cancelled() > 0 {
            self.snapshot.send_replace(self.registry.snapshot());
        }
        let elapsed = self.clock.frame();
        self.advance_by(elapsed);
        self.mirror_counters();
    }

    /// Feed `elapsed` into the accumulator and run the whole steps it yields.
    pub(crate) fn advance_by(&mut self, elapsed: Duration) {
        let step = self.config.fixed_step();
        let plan = plan_steps(
            self.accumulator + elapsed,
            step,
            self.config.max_steps_per_frame,
        );
        self.accumulator = plan.remaining;
        if !plan.dropped.is_zero() {
            tracing::debug!("⏱️ Dropped {:?} of tick backlog", plan.dropped);
        }
        for _ in 0..plan.steps {
            self.clock.fixed_update();
            self.fixed_step(step);
        }
    }

    /// Deliver one step to every task, in process-id order then insertion order.
    pub(crate) fn fixed_step(&mut self, step: Duration) {
        let tick = self.clock.tick();
        for process in self.registry.processes() {
            for task in &process.tasks {
                if let Some(execution) = task.advance(step, tick, process.disconnected) {
                    self.spawn_execution(task.clone(), execution, process.tasks.clone());
                }
            }
        }
    }

    fn spawn_execution(&self, task: Task, execution: CancellationToken, siblings: Vec<Task>) {
        let ctx = TaskContext::new(
            task.clone(),
            execution,
            self.shared.queue.clone(),
            self.shared.capture.clone(),
            self.shared.focus.clone(),
            siblings,
        );
        tracing::debug!("▶️ Running {}/{}", task.process(), task.kind());
        let body = task.body();
        let work = tokio::spawn(async move { body.tick(&ctx).await });
        tokio::spawn(async move {
            let outcome = match work.await {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) if e.is_cancelled() => {
                    tracing::debug!("⏹️ {}/{} execution cancelled", task.process(), task.kind());
                    Ok(())
                }
                Ok(Err(e)) => {
                    tracing::warn!("⚠️ Task {}/{} failed: {e}", task.process(), task.kind());
                    Err(e.to_string())
                }
                Err(join) => {
                    tracing::error!("💥 Task {}/{} panicked: {join}", task.process(), task.kind());
                    Err(format!("panicked: {join}"))
                }
            };
            task.finish(outcome);
        });
    }

    /// Apply every pending command, then publish a fresh snapshot if anything changed.
    pub(crate) fn drain_mailbox(&mut self) -> usize {
        let mut applied = 0;
        while let Ok(command) = self.mailbox.try_recv() {
            self.apply(command);
            applied += 1;
        }
        if applied > 0 {
            self.snapshot.send_replace(self.registry.snapshot());
        }
        applied
    }

    fn apply(&mut self, command: Command) {
        match command {
            Command::Watcher(WatcherEvent::ProcessStarted { pid, disconnected }) => {
                if self.registry.attach(pid, disconnected) {
                    tracing::info!("🎮 Process {pid} attached (disconnected: {disconnected})");
                }
            }
            Command::Watcher(WatcherEvent::ProcessEnded { pid }) => self.detach_process(pid),
            Command::Watcher(WatcherEvent::ConnectivityChanged { pid, disconnected }) => {
                match self.registry.set_disconnected(pid, disconnected) {
                    Ok(true) if disconnected => tracing::warn!("🔌 Process {pid} disconnected"),
                    Ok(true) => tracing::info!("🔌 Process {pid} reconnected"),
                    Ok(false) => {}
                    Err(e) => tracing::debug!("🔌 Connectivity change ignored: {e}"),
                }
            }
            Command::AddTask(task) => {
                if task.is_cancelled() {
                    self.shared.claims.release(&task);
                    return;
                }
                match self.registry.add_task(task.clone()) {
                    Ok(()) => tracing::info!("📅 Task added: {}/{} ({})", task.process(), task.kind(), task.id()),
                    Err(e) => {
                        tracing::warn!("⚠️ Task {}/{} rejected: {e}", task.process(), task.kind());
                        self.shared.claims.release(&task);
                        task.cancel();
                    }
                }
            }
            Command::RemoveTask(id) => {
                if let Some(task) = self.registry.remove_task(id) {
                    tracing::info!("📅 Task removed: {}/{} ({id})", task.process(), task.kind());
                }
            }
            Command::PauseProcess(pid) => {
                if let Some(process) = self.registry.get(pid) {
                    process.tasks.iter().for_each(Task::pause);
                }
            }
            Command::ResumeProcess(pid) => {
                if let Some(process) = self.registry.get(pid) {
                    process.tasks.iter().for_each(Task::resume);
                }
            }
        }
    }

    /// Drop tasks cancelled through their own handle, with their claims and queued actions.
    pub(crate) fn reap_cancelled(&mut self) -> usize {
        let cancelled: Vec<TaskId> = self
            .registry
            .processes()
            .flat_map(|p| p.tasks.iter())
            .filter(|t| t.is_cancelled())
            .map(Task::id)
            .collect();
        if cancelled.is_empty() {
            return 0;
        }
        for id in &cancelled {
            if let Some(task) = self.registry.remove_task(*id) {
                self.shared.claims.release(&task);
                tracing::info!("🗑️ Task reaped: {}/{} ({id})", task.process(), task.kind());
            }
        }
        let ids: HashSet<TaskId> = cancelled.iter().copied().collect();
        self.shared.queue.cancel_tasks(&ids);
        cancelled.len()
    }

    fn detach_process(&mut self, pid: ProcessId) {
        let Some(process) = self.registry.detach(pid) else {
            return;
        };
        let ids: HashSet<TaskId> = process.tasks.iter().map(Task::id).collect();
        for task in &process.tasks {
            task.cancel();
            self.shared.claims.release(task);
        }
        let purged = self.shared.queue.cancel_tasks(&ids);
        tracing::info!(
            "🎮 Process {pid} ended: {} tasks cancelled, {purged} actions purged",
            process.tasks.len()
        );
    }

    fn mirror_counters(&self) {
        let counters = &self.shared.counters;
        counters.ticks.store(self.clock.tick(), Ordering::Relaxed);
        counters.fixed_ticks.store(self.clock.fixed_tick(), Ordering::Relaxed);
        counters
            .total_ms
            .store(self.clock.total_time().as_millis() as u64, Ordering::Relaxed);
    }
}
