//! End-to-end scenarios against the simulated desktop.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use butler_core::sim::{SimCapture, SimDesktop, SimProbe};
use butler_core::{
    ArbiterConfig, ButlerError, ProbedProcess, ProcessId, Result, SchedulerConfig,
    UserFocusPolicy,
};
use butler_scheduler::{
    ActionOutcome, ProcessWatcher, SchedulerEngine, Task, TaskBody, TaskContext, TaskKind,
    TaskSettings, WatcherEvent,
};

fn scheduler_config() -> SchedulerConfig {
    SchedulerConfig {
        fixed_step_ms: 20,
        max_frame_ms: 100,
        max_steps_per_frame: 5,
        frame_sleep_ms: 2,
    }
}

fn arbiter_config() -> ArbiterConfig {
    ArbiterConfig {
        poll_interval_ms: 5,
        pass_delay_ms: 1,
        focus_timeout_ms: 20,
        focus_settle_ms: 1,
        user_focus_policy: UserFocusPolicy::ForegroundAndCursor,
    }
}

fn engine(desktop: Arc<SimDesktop>) -> SchedulerEngine {
    engine_with(desktop, arbiter_config())
}

fn engine_with(desktop: Arc<SimDesktop>, arbiter: ArbiterConfig) -> SchedulerEngine {
    SchedulerEngine::new(
        scheduler_config(),
        arbiter,
        desktop,
        Arc::new(SimCapture::new()),
    )
}

fn attach(engine: &SchedulerEngine, pid: u32) {
    engine
        .handle_event(WatcherEvent::ProcessStarted {
            pid: ProcessId(pid),
            disconnected: false,
        })
        .unwrap();
}

fn settings(interval_ms: u64) -> TaskSettings {
    TaskSettings::every(Duration::from_millis(interval_ms))
}

async fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    cond()
}

/// Enqueues `batch` actions per run that each hold the input for a moment.
struct Exclusive {
    kind: TaskKind,
    batch: i64,
    active: Arc<AtomicUsize>,
    max_active: Arc<AtomicUsize>,
    executed: Arc<AtomicUsize>,
}

#[async_trait]
impl TaskBody for Exclusive {
    fn kind(&self) -> TaskKind {
        self.kind.clone()
    }

    async fn tick(&self, ctx: &TaskContext) -> Result<()> {
        let mut tickets = Vec::new();
        for i in 0..self.batch {
            let active = self.active.clone();
            let max_active = self.max_active.clone();
            let executed = self.executed.clone();
            tickets.push(ctx.enqueue(i, move |_desktop| async move {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                max_active.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(3)).await;
                active.fetch_sub(1, Ordering::SeqCst);
                executed.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })?);
        }
        ctx.wait_all(tickets).await
    }
}

/// Enqueues one action and records how it resolved.
struct Waiter {
    kind: TaskKind,
    outcomes: Arc<Mutex<Vec<ActionOutcome>>>,
}

#[async_trait]
impl TaskBody for Waiter {
    fn kind(&self) -> TaskKind {
        self.kind.clone()
    }

    async fn tick(&self, ctx: &TaskContext) -> Result<()> {
        let ticket = ctx.enqueue(0, |_desktop| async { Ok(()) })?;
        let outcome = ticket.outcome().await;
        self.outcomes.lock().unwrap().push(outcome);
        ctx.check_cancelled()
    }
}

/// Records trigger instants.
struct Stamp {
    kind: TaskKind,
    starts: Arc<Mutex<Vec<Instant>>>,
}

#[async_trait]
impl TaskBody for Stamp {
    fn kind(&self) -> TaskKind {
        self.kind.clone()
    }

    async fn tick(&self, _ctx: &TaskContext) -> Result<()> {
        self.starts.lock().unwrap().push(Instant::now());
        Ok(())
    }
}

struct Faulty {
    panic: bool,
}

#[async_trait]
impl TaskBody for Faulty {
    fn kind(&self) -> TaskKind {
        if self.panic {
            TaskKind::Custom("panicking".into())
        } else {
            TaskKind::Custom("failing".into())
        }
    }

    async fn tick(&self, _ctx: &TaskContext) -> Result<()> {
        if self.panic {
            panic!("body exploded");
        }
        Err(ButlerError::Capture("template missing".into()))
    }
}

#[tokio::test]
async fn test_only_one_action_executes_at_a_time() {
    let desktop = Arc::new(SimDesktop::new());
    let engine = engine(desktop.clone());
    let active = Arc::new(AtomicUsize::new(0));
    let max_active = Arc::new(AtomicUsize::new(0));
    let executed = Arc::new(AtomicUsize::new(0));

    for pid in 1..=3 {
        attach(&engine, pid);
        let task = Task::new(
            ProcessId(pid),
            settings(20),
            Exclusive {
                kind: TaskKind::Mining,
                batch: 3,
                active: active.clone(),
                max_active: max_active.clone(),
                executed: executed.clone(),
            },
        );
        task.start().unwrap();
        engine.add_task(task).unwrap();
    }

    engine.start().unwrap();
    assert!(wait_until(Duration::from_secs(5), || executed.load(Ordering::SeqCst) >= 12).await);
    engine.stop().await.unwrap();

    assert_eq!(max_active.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_stopped_task_actions_cancel_within_one_pass() {
    let desktop = Arc::new(SimDesktop::new());
    let engine = engine(desktop.clone());
    attach(&engine, 1);
    let outcomes = Arc::new(Mutex::new(Vec::new()));
    // user-focus task with no foreground window: its action waits in the queue
    let task = Task::new(
        ProcessId(1),
        settings(20).with_user_focus(true),
        Waiter {
            kind: TaskKind::Click,
            outcomes: outcomes.clone(),
        },
    );
    task.start().unwrap();
    engine.add_task(task.clone()).unwrap();
    engine.start().unwrap();

    assert!(wait_until(Duration::from_secs(2), || engine.queue().len() == 1).await);
    task.stop();
    assert!(
        wait_until(Duration::from_millis(500), || {
            outcomes.lock().unwrap().as_slice() == [ActionOutcome::Cancelled]
        })
        .await
    );
    assert!(engine.queue().is_empty());
    assert!(desktop.clicks().is_empty());
    engine.stop().await.unwrap();
}

/// Gaps between the first `runs` triggers of one task.
async fn trigger_gaps(task_settings: TaskSettings, runs: usize) -> Vec<Duration> {
    let engine = engine(Arc::new(SimDesktop::new()));
    attach(&engine, 1);
    let starts = Arc::new(Mutex::new(Vec::new()));
    let task = Task::new(
        ProcessId(1),
        task_settings,
        Stamp {
            kind: TaskKind::StatsWatcher,
            starts: starts.clone(),
        },
    );
    task.start().unwrap();
    engine.add_task(task).unwrap();
    engine.start().unwrap();

    assert!(wait_until(Duration::from_secs(10), || starts.lock().unwrap().len() >= runs).await);
    engine.stop().await.unwrap();

    let starts = starts.lock().unwrap();
    starts.windows(2).map(|pair| pair[1] - pair[0]).collect()
}

#[tokio::test]
async fn test_interval_between_triggers_is_respected() {
    let step = Duration::from_millis(scheduler_config().fixed_step_ms);
    let interval = Duration::from_millis(200);
    for gap in trigger_gaps(TaskSettings::every(interval), 4).await {
        // one step of accumulator phase below, one of phase and one of frame slack above
        assert!(gap >= interval - step, "{gap:?}");
        assert!(gap <= interval + 2 * step, "{gap:?}");
    }
}

#[tokio::test]
async fn test_interval_variance_stays_in_band() {
    let step = Duration::from_millis(scheduler_config().fixed_step_ms);
    let interval = Duration::from_millis(200);
    let variance = Duration::from_millis(80);
    let task_settings = TaskSettings::every(interval).with_variance(variance);
    for gap in trigger_gaps(task_settings, 6).await {
        assert!(gap >= interval - variance - step, "{gap:?}");
        assert!(gap <= interval + variance + 2 * step, "{gap:?}");
    }
}

#[tokio::test]
async fn test_cancelled_task_leaves_registry() {
    let engine = engine(Arc::new(SimDesktop::new()));
    attach(&engine, 1);
    let task = Task::new(
        ProcessId(1),
        settings(10_000),
        Stamp {
            kind: TaskKind::Mining,
            starts: Arc::new(Mutex::new(Vec::new())),
        },
    );
    task.start().unwrap();
    engine.add_task(task.clone()).unwrap();
    engine.start().unwrap();
    assert!(wait_until(Duration::from_secs(2), || engine.tasks().len() == 1).await);

    task.cancel();
    assert!(wait_until(Duration::from_secs(2), || engine.tasks().is_empty()).await);

    let again = Task::new(
        ProcessId(1),
        settings(10_000),
        Stamp {
            kind: TaskKind::Mining,
            starts: Arc::new(Mutex::new(Vec::new())),
        },
    );
    again.start().unwrap();
    engine.add_task(again).unwrap();
    assert!(wait_until(Duration::from_secs(2), || engine.tasks().len() == 1).await);
    engine.stop().await.unwrap();
}

#[tokio::test]
async fn test_higher_priority_action_dequeued_first() {
    let desktop = Arc::new(SimDesktop::new());
    // nothing can run: focus requests are refused and no window is foreground
    desktop.set_grant_focus(false);
    // refused focus requests defer at once instead of holding the pass
    let engine = engine_with(
        desktop.clone(),
        ArbiterConfig {
            focus_timeout_ms: 0,
            ..arbiter_config()
        },
    );
    attach(&engine, 1);
    attach(&engine, 2);
    let outcomes = Arc::new(Mutex::new(Vec::new()));

    let a = Task::new(
        ProcessId(1),
        settings(60).with_priority(100),
        Waiter {
            kind: TaskKind::Mining,
            outcomes: outcomes.clone(),
        },
    );
    let b = Task::new(
        ProcessId(2),
        settings(10).with_priority(50).with_user_focus(true),
        Waiter {
            kind: TaskKind::Click,
            outcomes: outcomes.clone(),
        },
    );
    a.start().unwrap();
    b.start().unwrap();
    engine.add_task(a).unwrap();
    engine.add_task(b).unwrap();
    engine.start().unwrap();

    assert!(wait_until(Duration::from_secs(2), || engine.queue().len() == 2).await);
    let pending = engine.queue().pending();
    assert_eq!(pending[0].process, ProcessId(2));
    assert_eq!(pending[0].priority, 50);
    assert_eq!(pending[1].process, ProcessId(1));

    // once the user focuses B's window, B runs and A keeps waiting
    desktop.user_focus(Some(ProcessId(2)));
    assert!(wait_until(Duration::from_secs(2), || !outcomes.lock().unwrap().is_empty()).await);
    assert_eq!(desktop.clicks().len(), 0);
    assert_eq!(outcomes.lock().unwrap()[0], ActionOutcome::Completed);
    engine.stop().await.unwrap();
}

#[tokio::test]
async fn test_pause_resume_idempotent() {
    let engine = engine(Arc::new(SimDesktop::new()));
    attach(&engine, 1);
    let starts = Arc::new(Mutex::new(Vec::new()));
    let task = Task::new(
        ProcessId(1),
        settings(20),
        Stamp {
            kind: TaskKind::Custom("stamp".into()),
            starts: starts.clone(),
        },
    );
    task.start().unwrap();
    engine.add_task(task.clone()).unwrap();
    engine.start().unwrap();
    assert!(wait_until(Duration::from_secs(2), || !starts.lock().unwrap().is_empty()).await);

    task.pause();
    task.pause();
    assert!(wait_until(Duration::from_secs(1), || !task.is_running()).await);
    let frozen = starts.lock().unwrap().len();
    let countdown = task.next_run();
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(starts.lock().unwrap().len(), frozen);
    assert_eq!(task.next_run(), countdown);

    task.resume();
    task.resume();
    assert!(!task.is_paused());
    assert!(wait_until(Duration::from_secs(2), || starts.lock().unwrap().len() > frozen).await);
    engine.stop().await.unwrap();
}

#[tokio::test]
async fn test_process_end_cancels_tasks_and_actions() {
    let desktop = Arc::new(SimDesktop::new());
    let engine = engine(desktop.clone());
    attach(&engine, 7);
    let outcomes = Arc::new(Mutex::new(Vec::new()));
    let mut tasks = Vec::new();
    for kind in [TaskKind::Click, TaskKind::ItemFindPause] {
        let task = Task::new(
            ProcessId(7),
            settings(20).with_user_focus(true),
            Waiter {
                kind,
                outcomes: outcomes.clone(),
            },
        );
        task.start().unwrap();
        engine.add_task(task.clone()).unwrap();
        tasks.push(task);
    }
    engine.start().unwrap();

    assert!(
        wait_until(Duration::from_secs(2), || {
            engine.queue().len() == 2 && tasks.iter().all(Task::is_running)
        })
        .await
    );

    engine
        .handle_event(WatcherEvent::ProcessEnded { pid: ProcessId(7) })
        .unwrap();

    assert!(wait_until(Duration::from_secs(2), || outcomes.lock().unwrap().len() == 2).await);
    assert!(
        outcomes
            .lock()
            .unwrap()
            .iter()
            .all(|o| *o == ActionOutcome::Cancelled)
    );
    assert!(tasks.iter().all(Task::is_cancelled));
    assert!(engine.queue().is_empty());
    assert!(wait_until(Duration::from_secs(1), || engine.processes().is_empty()).await);
    assert!(desktop.events().is_empty());
    engine.stop().await.unwrap();
}

#[tokio::test]
async fn test_failing_and_panicking_bodies_are_retried() {
    let engine = engine(Arc::new(SimDesktop::new()));
    attach(&engine, 1);
    let failing = Task::new(ProcessId(1), settings(20), Faulty { panic: false });
    let panicking = Task::new(ProcessId(1), settings(20), Faulty { panic: true });
    for task in [&failing, &panicking] {
        task.start().unwrap();
        engine.add_task(task.clone()).unwrap();
    }
    engine.start().unwrap();

    assert!(
        wait_until(Duration::from_secs(3), || {
            failing.run_count() >= 3 && panicking.run_count() >= 3
        })
        .await
    );
    assert!(engine.is_running());
    assert!(failing.is_enabled() && panicking.is_enabled());
    assert!(failing.last_error().unwrap().contains("template missing"));
    assert!(panicking.last_error().unwrap().contains("panicked"));
    engine.stop().await.unwrap();

    assert!(wait_until(Duration::from_secs(1), || !failing.is_running()).await);
    assert!(failing.next_run() <= Duration::from_millis(20));
}

#[tokio::test]
async fn test_disconnected_process_holds_tasks() {
    let engine = engine(Arc::new(SimDesktop::new()));
    engine
        .handle_event(WatcherEvent::ProcessStarted {
            pid: ProcessId(3),
            disconnected: true,
        })
        .unwrap();
    let starts = Arc::new(Mutex::new(Vec::new()));
    let task = Task::new(
        ProcessId(3),
        settings(20),
        Stamp {
            kind: TaskKind::Mining,
            starts: starts.clone(),
        },
    );
    task.start().unwrap();
    engine.add_task(task.clone()).unwrap();
    engine.start().unwrap();

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(starts.lock().unwrap().is_empty());
    assert!(task.is_enabled());

    engine
        .handle_event(WatcherEvent::ConnectivityChanged {
            pid: ProcessId(3),
            disconnected: false,
        })
        .unwrap();
    assert!(wait_until(Duration::from_secs(2), || !starts.lock().unwrap().is_empty()).await);
    engine.stop().await.unwrap();
}

#[tokio::test]
async fn test_cancel_running_drains_queue() {
    let engine = engine(Arc::new(SimDesktop::new()));
    attach(&engine, 1);
    attach(&engine, 2);
    let outcomes = Arc::new(Mutex::new(Vec::new()));
    let mut tasks = Vec::new();
    for pid in [1, 2] {
        let task = Task::new(
            ProcessId(pid),
            settings(10_000).with_user_focus(true),
            Waiter {
                kind: TaskKind::Click,
                outcomes: outcomes.clone(),
            },
        );
        task.start().unwrap();
        engine.add_task(task.clone()).unwrap();
        tasks.push(task);
    }
    engine.start().unwrap();
    assert!(wait_until(Duration::from_secs(2), || engine.queue().len() == 2).await);

    assert_eq!(engine.cancel_running(), 2);
    assert!(wait_until(Duration::from_secs(1), || outcomes.lock().unwrap().len() == 2).await);
    // tasks stay enabled and go back to their countdown
    assert!(wait_until(Duration::from_secs(1), || tasks.iter().all(|t| !t.is_running())).await);
    assert!(tasks.iter().all(Task::is_enabled));
    engine.stop().await.unwrap();
}

#[tokio::test]
async fn test_watcher_feeds_scheduler() {
    let probe = Arc::new(SimProbe::new(vec![ProbedProcess {
        id: ProcessId(11),
        disconnected: false,
    }]));
    let engine = engine(Arc::new(SimDesktop::new()));
    engine.start().unwrap();

    let shutdown = tokio_util::sync::CancellationToken::new();
    let handle = ProcessWatcher::new(probe.clone(), Duration::from_millis(10))
        .spawn(engine.events(), shutdown.clone());

    assert!(wait_until(Duration::from_secs(2), || engine.processes().len() == 1).await);
    probe.kill_process(ProcessId(11));
    assert!(wait_until(Duration::from_secs(2), || engine.processes().is_empty()).await);

    shutdown.cancel();
    handle.await.unwrap();
    engine.stop().await.unwrap();
}
