//! Hunting task. While the user looks at the window it fires XP-fly when lit,
//! picks up drops announced in chat and keeps attacking with a
//! right, left, right click cycle at the cursor.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use butler_core::{MouseButton, Result};
use butler_scheduler::{TaskBody, TaskContext, TaskKind, TaskSettings, human_delay};

use crate::item_find_pause::DROP_TEMPLATE;
use crate::regions::{CHAT_AREA, XP_SKILLS};

pub const XP_FLY_TEMPLATE: &str = "xpfly";
/// Shown in the skill bar instead of XP-fly while the character is airborne.
pub const DESCEND_TEMPLATE: &str = "descend";
pub const HUNT_SIMILARITY: f32 = 0.95;
/// Every hunting action shares one sub-priority, so they run in enqueue order.
const SUB_PRIORITY: i64 = 1;
const CURSOR_RESTORE_DELAY: Duration = Duration::from_millis(250);
const CLICK_DELAY: Duration = Duration::from_millis(125);
const ATTACK_CYCLE: [MouseButton; 3] = [MouseButton::Right, MouseButton::Left, MouseButton::Right];

#[derive(Default)]
pub struct HuntingTask {
    cycles: AtomicU64,
    flights: AtomicU64,
    pickups: AtomicU64,
    flying: AtomicBool,
}

impl HuntingTask {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn default_settings() -> TaskSettings {
        TaskSettings::every(Duration::from_millis(1)).with_user_focus(true)
    }

    pub fn cycles(&self) -> u64 {
        self.cycles.load(Ordering::Relaxed)
    }

    pub fn flights(&self) -> u64 {
        self.flights.load(Ordering::Relaxed)
    }

    pub fn pickups(&self) -> u64 {
        self.pickups.load(Ordering::Relaxed)
    }

    /// Whether the last scan saw the descend icon.
    pub fn is_flying(&self) -> bool {
        self.flying.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl TaskBody for HuntingTask {
    fn kind(&self) -> TaskKind {
        TaskKind::Hunting
    }

    async fn tick(&self, ctx: &TaskContext) -> Result<()> {
        let pid = ctx.process();
        let descend = ctx.find_matches(XP_SKILLS, &[DESCEND_TEMPLATE], HUNT_SIMILARITY)?;
        self.flying.store(!descend.is_empty(), Ordering::Relaxed);

        let fly = ctx.find_matches(XP_SKILLS, &[XP_FLY_TEMPLATE], HUNT_SIMILARITY)?;
        if let Some(icon) = fly.first() {
            let target = icon.center();
            ctx.request_input(SUB_PRIORITY, move |desktop| async move {
                let back = desktop.cursor_position(pid)?;
                desktop.click_at(pid, target, MouseButton::Left)?;
                human_delay(CURSOR_RESTORE_DELAY).await;
                desktop.move_cursor(pid, back)
            })
            .await?;
            self.flights.fetch_add(1, Ordering::Relaxed);
            tracing::info!("🦅 {pid}: XP fly used");
        }

        let drops = ctx.find_matches(CHAT_AREA, &[DROP_TEMPLATE], HUNT_SIMILARITY)?;
        if let Some(drop) = drops.first() {
            let target = drop.center();
            ctx.request_input(SUB_PRIORITY, move |desktop| async move {
                desktop.click_at(pid, target, MouseButton::Left)
            })
            .await?;
            self.pickups.fetch_add(1, Ordering::Relaxed);
            tracing::debug!("💎 {pid}: picked up a drop");
        }

        for button in ATTACK_CYCLE {
            ctx.request_input(SUB_PRIORITY, move |desktop| async move {
                desktop.click(pid, button)?;
                human_delay(CLICK_DELAY).await;
                Ok(())
            })
            .await?;
        }
        self.cycles.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn status_line(&self) -> String {
        let flying = if self.is_flying() { " (flying)" } else { "" };
        format!("{} cycles, {} drops{flying}", self.cycles(), self.pickups())
    }
}
