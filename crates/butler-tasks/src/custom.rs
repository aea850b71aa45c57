//! Custom task: a named placeholder that does no input and only remembers
//! the last stats its process published.

use std::sync::atomic::{AtomicI32, Ordering};

use async_trait::async_trait;
use butler_core::Result;
use butler_scheduler::{TaskBody, TaskContext, TaskEvent, TaskKind};

use crate::stats_watcher::UNKNOWN;

pub struct CustomTask {
    name: String,
    health: AtomicI32,
    mana: AtomicI32,
}

impl CustomTask {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            health: AtomicI32::new(UNKNOWN),
            mana: AtomicI32::new(UNKNOWN),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

#[async_trait]
impl TaskBody for CustomTask {
    fn kind(&self) -> TaskKind {
        TaskKind::Custom(self.name.clone())
    }

    async fn tick(&self, _ctx: &TaskContext) -> Result<()> {
        Ok(())
    }

    fn on_event(&self, event: &TaskEvent) {
        match *event {
            TaskEvent::HealthChanged { new, .. } => self.health.store(new, Ordering::Relaxed),
            TaskEvent::ManaChanged { new, .. } => self.mana.store(new, Ordering::Relaxed),
        }
    }

    fn status_line(&self) -> String {
        format!(
            "hp {} mp {}",
            self.health.load(Ordering::Relaxed),
            self.mana.load(Ordering::Relaxed)
        )
    }
}
