//! Click task: clicks wherever the user holds the cursor, while they look.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use butler_core::{Key, MouseButton, Result};
use butler_scheduler::{TaskBody, TaskContext, TaskKind, TaskSettings};

pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(100);
pub const DEFAULT_WAIT: Duration = Duration::from_millis(500);

pub struct ClickTask {
    button: MouseButton,
    hold_ctrl: bool,
    wait: Duration,
    clicks: AtomicU64,
}

impl ClickTask {
    pub fn new(button: MouseButton, hold_ctrl: bool, wait: Duration) -> Self {
        Self {
            button,
            hold_ctrl,
            wait,
            clicks: AtomicU64::new(0),
        }
    }

    /// Clicks target the user's cursor, so this task never takes the foreground.
    pub fn default_settings() -> TaskSettings {
        TaskSettings::every(DEFAULT_INTERVAL).with_user_focus(true)
    }

    pub fn clicks(&self) -> u64 {
        self.clicks.load(Ordering::Relaxed)
    }
}

impl Default for ClickTask {
    fn default() -> Self {
        Self::new(MouseButton::Left, false, DEFAULT_WAIT)
    }
}

#[async_trait]
impl TaskBody for ClickTask {
    fn kind(&self) -> TaskKind {
        TaskKind::Click
    }

    async fn tick(&self, ctx: &TaskContext) -> Result<()> {
        let pid = ctx.process();
        let button = self.button;
        let hold_ctrl = self.hold_ctrl;
        ctx.request_input(0, move |desktop| async move {
            if hold_ctrl {
                desktop.key_down(pid, Key::Control)?;
            }
            let clicked = desktop.click(pid, button);
            if hold_ctrl {
                desktop.key_up(pid, Key::Control)?;
            }
            clicked
        })
        .await?;
        self.clicks.fetch_add(1, Ordering::Relaxed);
        ctx.delay(self.wait).await
    }

    fn status_line(&self) -> String {
        format!("{} clicks", self.clicks())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::{Harness, PID, started};
    use butler_core::sim::InputEvent;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_ctrl_click_wraps_click() {
        let h = Harness::new();
        h.desktop.user_focus(Some(PID));
        let body = Arc::new(ClickTask::new(MouseButton::Right, true, Duration::ZERO));
        let task = started(body.clone(), ClickTask::default_settings());
        let ctx = h.context(&task, vec![task.clone()]);

        body.tick(&ctx).await.unwrap();
        assert_eq!(
            h.desktop.events(),
            vec![
                InputEvent::KeyDown(PID, Key::Control),
                InputEvent::Click(PID, MouseButton::Right),
                InputEvent::KeyUp(PID, Key::Control),
            ]
        );
        assert_eq!(body.status_line(), "1 clicks");
    }

    #[tokio::test]
    async fn test_waits_for_user_focus() {
        let h = Harness::new();
        let body = Arc::new(ClickTask::new(MouseButton::Left, false, Duration::ZERO));
        let task = started(body.clone(), ClickTask::default_settings());
        let ctx = h.context(&task, vec![]);

        let runner = body.clone();
        let handle = tokio::spawn(async move { runner.tick(&ctx).await });
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(h.desktop.events().is_empty());
        assert_eq!(body.clicks(), 0);

        h.desktop.user_focus(Some(PID));
        handle.await.unwrap().unwrap();
        assert_eq!(
            h.desktop.events(),
            vec![InputEvent::Click(PID, MouseButton::Left)]
        );
        assert_eq!(body.clicks(), 1);
    }
}
