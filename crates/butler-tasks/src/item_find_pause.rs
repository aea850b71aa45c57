//! Item-find pause. Stops the user-focus tasks of a process when the chat
//! announces a drop, so the user can pick it up.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use butler_core::Result;
use butler_scheduler::{Task, TaskBody, TaskContext, TaskKind, TaskSettings};

use crate::regions::CHAT_AREA;

pub const DROP_TEMPLATE: &str = "drop";
pub const DROP_SIMILARITY: f32 = 0.95;

#[derive(Default)]
pub struct ItemFindPauseTask {
    drops_seen: AtomicU64,
}

impl ItemFindPauseTask {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn default_settings() -> TaskSettings {
        TaskSettings::every(Duration::from_millis(10))
    }

    pub fn drops_seen(&self) -> u64 {
        self.drops_seen.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl TaskBody for ItemFindPauseTask {
    fn kind(&self) -> TaskKind {
        TaskKind::ItemFindPause
    }

    async fn tick(&self, ctx: &TaskContext) -> Result<()> {
        let drops = ctx.find_matches(CHAT_AREA, &[DROP_TEMPLATE], DROP_SIMILARITY)?;
        if drops.is_empty() {
            return Ok(());
        }
        self.drops_seen.fetch_add(1, Ordering::Relaxed);
        let paused = ctx.pause_siblings(Task::needs_user_focus);
        if paused > 0 {
            tracing::info!("💎 {}: item drop spotted, paused {paused} tasks", ctx.process());
        }
        Ok(())
    }

    fn status_line(&self) -> String {
        format!("{} drops", self.drops_seen())
    }
}
