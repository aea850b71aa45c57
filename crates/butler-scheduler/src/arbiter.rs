//! Arbiter: the single loop that owns the keyboard, mouse and foreground.
//!
//! Each pass walks the action queue in priority order and executes the first
//! action whose focus requirement can be met. Actions that cannot run yet are
//! set aside and put back with their original keys when the pass ends.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use butler_core::{ArbiterConfig, ButlerError, Desktop, ProcessId, Result, UserFocusPolicy};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::action::{Action, ActionOutcome, ActionQueue};

/// How often the arbiter re-checks focus while waiting for a foreground switch.
const FOCUS_POLL: Duration = Duration::from_millis(10);

/// Last process the arbiter saw holding the foreground.
#[derive(Debug, Default)]
pub struct FocusTracker {
    holder: Mutex<Option<ProcessId>>,
}

impl FocusTracker {
    fn lock(&self) -> MutexGuard<'_, Option<ProcessId>> {
        self.holder.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn holder(&self) -> Option<ProcessId> {
        *self.lock()
    }

    pub fn is_holder(&self, pid: ProcessId) -> bool {
        self.holder() == Some(pid)
    }

    /// Record an observation of `pid`'s foreground state.
    pub fn observe(&self, pid: ProcessId, foreground: bool) {
        let mut holder = self.lock();
        if foreground {
            *holder = Some(pid);
        } else if *holder == Some(pid) {
            *holder = None;
        }
    }
}

/// Running counters of arbitration results.
#[derive(Debug, Default)]
pub struct ArbiterStats {
    executed: AtomicU64,
    failed: AtomicU64,
    cancelled: AtomicU64,
    deferred: AtomicU64,
    focus_switches: AtomicU64,
}

/// Serializable copy of [`ArbiterStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ArbiterStatsSnapshot {
    pub executed: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub deferred: u64,
    pub focus_switches: u64,
}

impl ArbiterStats {
    pub fn snapshot(&self) -> ArbiterStatsSnapshot {
        ArbiterStatsSnapshot {
            executed: self.executed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
            deferred: self.deferred.load(Ordering::Relaxed),
            focus_switches: self.focus_switches.load(Ordering::Relaxed),
        }
    }

    fn bump(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }
}

enum Admission {
    Run,
    Defer,
}

pub struct Arbiter {
    queue: Arc<ActionQueue>,
    desktop: Arc<dyn Desktop>,
    focus: Arc<FocusTracker>,
    stats: Arc<ArbiterStats>,
    config: ArbiterConfig,
}

impl Arbiter {
    pub fn new(
        queue: Arc<ActionQueue>,
        desktop: Arc<dyn Desktop>,
        focus: Arc<FocusTracker>,
        stats: Arc<ArbiterStats>,
        config: ArbiterConfig,
    ) -> Self {
        Self {
            queue,
            desktop,
            focus,
            stats,
            config,
        }
    }

    /// Arbitrate until `shutdown` fires, then cancel whatever is still queued.
    pub async fn run(self, shutdown: CancellationToken) {
        tracing::info!("🎯 Arbiter started");
        while !shutdown.is_cancelled() {
            let executed = self.pass(&shutdown).await;
            let pause = async {
                if executed {
                    tokio::time::sleep(self.config.pass_delay()).await;
                } else {
                    self.queue.wait_for_work(self.config.poll_interval()).await;
                }
            };
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = pause => {}
            }
        }
        let dropped = self.queue.drain();
        ArbiterStats::bump(&self.stats.cancelled, dropped as u64);
        tracing::info!("🛑 Arbiter stopped ({dropped} queued actions cancelled)");
    }

    /// One walk over the queue. Returns whether an action was executed.
    pub async fn pass(&self, shutdown: &CancellationToken) -> bool {
        let purged = self.queue.purge_stale();
        if purged > 0 {
            ArbiterStats::bump(&self.stats.cancelled, purged as u64);
            tracing::debug!("🧹 Purged {purged} stale actions");
        }

        let mut deferred = Vec::new();
        let mut executed = false;
        while let Some(action) = self.queue.pop() {
            if action.is_stale() {
                action.cancel();
                ArbiterStats::bump(&self.stats.cancelled, 1);
                continue;
            }
            let pid = action.process();
            let needs_foreground = action.requires_foreground();
            match self.admit(pid, needs_foreground).await {
                Admission::Run if action.is_stale() => {
                    action.cancel();
                    ArbiterStats::bump(&self.stats.cancelled, 1);
                }
                Admission::Run => {
                    if needs_foreground {
                        action.task().body().on_focus_granted(pid);
                    }
                    self.execute(action).await;
                    executed = true;
                    break;
                }
                Admission::Defer => deferred.push(action),
            }
            if shutdown.is_cancelled() {
                break;
            }
        }

        if !deferred.is_empty() {
            ArbiterStats::bump(&self.stats.deferred, deferred.len() as u64);
            tracing::trace!("⏳ Deferred {} actions", deferred.len());
        }
        self.queue.requeue(deferred);
        executed
    }

    async fn admit(&self, pid: ProcessId, needs_foreground: bool) -> Admission {
        if needs_foreground {
            return match self.acquire_foreground(pid).await {
                Ok(()) => Admission::Run,
                Err(e) => {
                    tracing::warn!("⚠️ Deferring input for {pid}: {e}");
                    Admission::Defer
                }
            };
        }

        let foreground = self.desktop.is_foreground(pid);
        self.focus.observe(pid, foreground);
        let allowed = match self.config.user_focus_policy {
            UserFocusPolicy::ForegroundAndCursor => foreground && self.desktop.cursor_in_window(pid),
            UserFocusPolicy::CursorInside => self.desktop.cursor_in_window(pid),
            UserFocusPolicy::Always => true,
        };
        if allowed {
            Admission::Run
        } else {
            Admission::Defer
        }
    }

    /// Bring `pid` to the foreground and let it settle.
    async fn acquire_foreground(&self, pid: ProcessId) -> Result<()> {
        if self.desktop.is_foreground(pid) {
            self.focus.observe(pid, true);
            return Ok(());
        }

        tracing::debug!("🪟 Bringing {pid} to the foreground");
        if let Err(e) = self.desktop.set_foreground(pid) {
            self.focus.observe(pid, false);
            return Err(e);
        }

        let deadline = Instant::now() + self.config.focus_timeout();
        loop {
            if self.desktop.is_foreground(pid) {
                self.focus.observe(pid, true);
                ArbiterStats::bump(&self.stats.focus_switches, 1);
                tokio::time::sleep(self.config.focus_settle()).await;
                return Ok(());
            }
            if Instant::now() >= deadline {
                self.focus.observe(pid, false);
                return Err(ButlerError::FocusTimeout(pid));
            }
            tokio::time::sleep(FOCUS_POLL).await;
        }
    }

    async fn execute(&self, action: Action) {
        let pid = action.process();
        let kind = action.task().kind().clone();
        match action.execute(self.desktop.clone()).await {
            ActionOutcome::Completed => {
                ArbiterStats::bump(&self.stats.executed, 1);
                tracing::debug!("✅ Action of {pid}/{kind} done");
            }
            ActionOutcome::Cancelled => ArbiterStats::bump(&self.stats.cancelled, 1),
            ActionOutcome::Failed(_) => ArbiterStats::bump(&self.stats.failed, 1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{ActionTicket, boxed_op};
    use crate::context::TaskContext;
    use crate::task::{Task, TaskBody, TaskKind, TaskSettings};
    use async_trait::async_trait;
    use butler_core::Result;
    use butler_core::sim::{InputEvent, SimDesktop};

    struct Noop;

    #[async_trait]
    impl TaskBody for Noop {
        fn kind(&self) -> TaskKind {
            TaskKind::Custom("noop".into())
        }

        async fn tick(&self, _ctx: &TaskContext) -> Result<()> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct Granted(std::sync::atomic::AtomicU32);

    #[async_trait]
    impl TaskBody for Granted {
        fn kind(&self) -> TaskKind {
            TaskKind::Mining
        }

        async fn tick(&self, _ctx: &TaskContext) -> Result<()> {
            Ok(())
        }

        fn on_focus_granted(&self, _pid: ProcessId) {
            self.0.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn config() -> ArbiterConfig {
        ArbiterConfig {
            poll_interval_ms: 5,
            pass_delay_ms: 1,
            focus_timeout_ms: 50,
            focus_settle_ms: 1,
            user_focus_policy: UserFocusPolicy::ForegroundAndCursor,
        }
    }

    fn arbiter(desktop: Arc<SimDesktop>) -> (Arbiter, Arc<ActionQueue>, Arc<ArbiterStats>) {
        let queue = Arc::new(ActionQueue::new());
        let stats = Arc::new(ArbiterStats::default());
        let arbiter = Arbiter::new(
            queue.clone(),
            desktop,
            Arc::new(FocusTracker::default()),
            stats.clone(),
            config(),
        );
        (arbiter, queue, stats)
    }

    fn running(pid: u32, user_focus: bool) -> (Task, CancellationToken) {
        let task = Task::new(
            ProcessId(pid),
            TaskSettings::every(Duration::from_millis(1)).with_user_focus(user_focus),
            Noop,
        );
        task.start().unwrap();
        let token = task.advance(Duration::from_millis(1), 1, false).unwrap();
        (task, token)
    }

    fn click_action(task: &Task, token: &CancellationToken) -> (Action, ActionTicket) {
        let pid = task.process();
        Action::new(
            task.clone(),
            token.clone(),
            0,
            !task.needs_user_focus(),
            false,
            boxed_op(move |d| async move { d.click(pid, butler_core::MouseButton::Left) }),
        )
    }

    #[tokio::test]
    async fn test_foreground_action_takes_focus() {
        let desktop = Arc::new(SimDesktop::new());
        let (arbiter, queue, stats) = arbiter(desktop.clone());
        let (task, token) = running(4, false);
        let (action, ticket) = click_action(&task, &token);
        queue.push(action);

        assert!(arbiter.pass(&CancellationToken::new()).await);
        assert_eq!(ticket.outcome().await, ActionOutcome::Completed);
        assert_eq!(
            desktop.events(),
            vec![
                InputEvent::Focus(ProcessId(4)),
                InputEvent::Click(ProcessId(4), butler_core::MouseButton::Left)
            ]
        );
        assert!(arbiter.focus.is_holder(ProcessId(4)));
        assert_eq!(stats.snapshot().focus_switches, 1);
    }

    #[tokio::test]
    async fn test_user_focus_action_deferred_without_focus() {
        let desktop = Arc::new(SimDesktop::new());
        let (arbiter, queue, stats) = arbiter(desktop.clone());
        let (task, token) = running(1, true);
        let (action, _ticket) = click_action(&task, &token);
        queue.push(action);

        assert!(!arbiter.pass(&CancellationToken::new()).await);
        assert_eq!(queue.len(), 1);
        assert!(desktop.events().is_empty());
        assert_eq!(stats.snapshot().deferred, 1);

        // the user switches to the window; the same action now runs
        desktop.user_focus(Some(ProcessId(1)));
        assert!(arbiter.pass(&CancellationToken::new()).await);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_deferred_action_does_not_block_others() {
        let desktop = Arc::new(SimDesktop::new());
        let (arbiter, queue, _stats) = arbiter(desktop.clone());
        let (waiting, waiting_tok) = running(1, true);
        let (stealer, stealer_tok) = running(2, false);
        // same priority and tick: pid 1 sorts first but cannot run
        let (a, _a_ticket) = click_action(&waiting, &waiting_tok);
        let (b, b_ticket) = click_action(&stealer, &stealer_tok);
        queue.push(a);
        queue.push(b);

        assert!(arbiter.pass(&CancellationToken::new()).await);
        assert_eq!(b_ticket.outcome().await, ActionOutcome::Completed);
        assert_eq!(queue.pending()[0].process, ProcessId(1));
    }

    #[tokio::test]
    async fn test_focus_refused_defers_action() {
        let desktop = Arc::new(SimDesktop::new());
        desktop.set_grant_focus(false);
        let (arbiter, queue, _stats) = arbiter(desktop.clone());
        let (task, token) = running(3, false);
        queue.push(click_action(&task, &token).0);

        assert!(!arbiter.pass(&CancellationToken::new()).await);
        assert_eq!(queue.len(), 1);
        assert!(desktop.clicks().is_empty());
    }

    #[tokio::test]
    async fn test_disabled_task_actions_are_purged() {
        let desktop = Arc::new(SimDesktop::new());
        let (arbiter, queue, stats) = arbiter(desktop.clone());
        let (task, token) = running(1, false);
        let (action, ticket) = click_action(&task, &token);
        queue.push(action);
        task.stop();

        assert!(!arbiter.pass(&CancellationToken::new()).await);
        assert_eq!(ticket.outcome().await, ActionOutcome::Cancelled);
        assert!(desktop.events().is_empty());
        assert_eq!(stats.snapshot().cancelled, 1);
    }

    #[tokio::test]
    async fn test_run_drains_queue_on_shutdown() {
        let desktop = Arc::new(SimDesktop::new());
        let (arbiter, queue, _stats) = arbiter(desktop.clone());
        let (task, token) = running(1, true);
        let (action, ticket) = click_action(&task, &token);
        queue.push(action);

        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(arbiter.run(shutdown.clone()));
        tokio::time::sleep(Duration::from_millis(30)).await;
        shutdown.cancel();
        handle.await.unwrap();

        assert_eq!(ticket.outcome().await, ActionOutcome::Cancelled);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_focus_tracker_observe() {
        let tracker = FocusTracker::default();
        tracker.observe(ProcessId(1), true);
        tracker.observe(ProcessId(2), false);
        assert!(tracker.is_holder(ProcessId(1)));
        tracker.observe(ProcessId(1), false);
        assert_eq!(tracker.holder(), None);
    }

    #[test]
    fn test_run_future_is_send() {
        fn assert_send<T: Send>(_: &T) {}
        let (arbiter, _queue, _stats) = arbiter(Arc::new(SimDesktop::new()));
        let run = arbiter.run(CancellationToken::new());
        assert_send(&run);
    }

    fn granted_task(pid: u32) -> (Task, Arc<Granted>, CancellationToken) {
        let body = Arc::new(Granted::default());
        let task = Task::from_arc(
            ProcessId(pid),
            TaskSettings::every(Duration::from_millis(1)),
            body.clone(),
        );
        task.start().unwrap();
        let token = task.advance(Duration::from_millis(1), 1, false).unwrap();
        (task, body, token)
    }

    #[tokio::test]
    async fn test_focus_granted_notified_once_on_run() {
        let desktop = Arc::new(SimDesktop::new());
        let (arbiter, queue, _stats) = arbiter(desktop.clone());
        let (task, body, token) = granted_task(5);
        let (action, ticket) = click_action(&task, &token);
        queue.push(action);

        assert!(arbiter.pass(&CancellationToken::new()).await);
        assert_eq!(ticket.outcome().await, ActionOutcome::Completed);
        assert_eq!(body.0.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_no_focus_notice_when_stopped_while_switching() {
        let desktop = Arc::new(SimDesktop::new());
        desktop.set_grant_focus(false);
        let (arbiter, queue, stats) = arbiter(desktop.clone());
        let (task, body, token) = granted_task(6);
        let (action, ticket) = click_action(&task, &token);
        queue.push(action);

        // the window comes forward while the arbiter polls, but the task stops first
        let pass_token = CancellationToken::new();
        let (executed, ()) = tokio::join!(arbiter.pass(&pass_token), async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            task.stop();
            desktop.user_focus(Some(ProcessId(6)));
        });

        assert!(!executed);
        assert_eq!(ticket.outcome().await, ActionOutcome::Cancelled);
        assert_eq!(body.0.load(Ordering::Relaxed), 0);
        assert!(desktop.clicks().is_empty());
        assert_eq!(stats.snapshot().cancelled, 1);
    }
}
