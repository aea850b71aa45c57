//! Mining task: drops mined ore from the inventory.
//!
//! Each run finds ore in the inventory and queues one action per ore: click
//! the ore, then click the ground near [`DROP_POINT`] to drop it.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use butler_core::{MouseButton, Point, Result};
use butler_scheduler::{TaskBody, TaskContext, TaskKind, TaskSettings, human_delay};

use crate::regions::{INVENTORY, scatter};

pub const ORE_TEMPLATES: [&str; 2] = ["ironore", "copperore"];
pub const ORE_SIMILARITY: f32 = 0.95;
/// One run handles at most this many ores, the last ones in inventory order.
pub const MAX_ORES_PER_RUN: usize = 19;
pub const DROP_POINT: Point = Point::new(700, 100);
pub const DROP_VARIATION: i32 = 40;
pub const CLICK_VARIATION: i32 = 5;
const STEP_DELAY: Duration = Duration::from_millis(250);

#[derive(Default)]
pub struct MiningTask {
    ore_count: Arc<AtomicI64>,
}

impl MiningTask {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn default_settings() -> TaskSettings {
        TaskSettings::every(Duration::from_secs(240)).with_variance(Duration::from_secs(60))
    }

    /// Ore left in the inventory as of the last scan, minus what was dropped since.
    pub fn ore_count(&self) -> i64 {
        self.ore_count.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl TaskBody for MiningTask {
    fn kind(&self) -> TaskKind {
        TaskKind::Mining
    }

    async fn tick(&self, ctx: &TaskContext) -> Result<()> {
        let pid = ctx.process();
        let ores = ctx.find_matches(INVENTORY, &ORE_TEMPLATES, ORE_SIMILARITY)?;
        self.ore_count.store(ores.len() as i64, Ordering::Relaxed);
        if ores.is_empty() {
            return Ok(());
        }
        tracing::debug!("⛏️ {pid}: {} ores in inventory", ores.len());

        let mut tickets = Vec::new();
        for (i, ore) in ores.iter().enumerate().rev().take(MAX_ORES_PER_RUN) {
            let ore_at = scatter(ore.center(), CLICK_VARIATION);
            let drop_at = scatter(DROP_POINT, DROP_VARIATION);
            let remaining = self.ore_count.clone();
            tickets.push(ctx.enqueue(i as i64, move |desktop| async move {
                desktop.click_at(pid, ore_at, MouseButton::Left)?;
                human_delay(STEP_DELAY).await;
                desktop.click_at(pid, drop_at, MouseButton::Left)?;
                human_delay(STEP_DELAY).await;
                remaining.fetch_sub(1, Ordering::Relaxed);
                Ok(())
            })?);
        }
        ctx.wait_all(tickets).await
    }

    fn status_line(&self) -> String {
        format!("{} ores", self.ore_count())
    }
}
