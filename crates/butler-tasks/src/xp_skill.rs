//! XP skill task: fires the configured XP skill as soon as its icon lights up.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use butler_core::{MouseButton, Result};
use butler_scheduler::{TaskBody, TaskContext, TaskKind, TaskSettings, human_delay};

use crate::regions::XP_SKILLS;

pub const SKILL_SIMILARITY: f32 = 0.9;
const CURSOR_RESTORE_DELAY: Duration = Duration::from_millis(500);

pub struct XpSkillTask {
    skill: String,
    uses: AtomicU64,
}

impl XpSkillTask {
    /// `skill` names the icon template to look for.
    pub fn new(skill: impl Into<String>) -> Self {
        Self {
            skill: skill.into(),
            uses: AtomicU64::new(0),
        }
    }

    pub fn default_settings() -> TaskSettings {
        TaskSettings::every(Duration::from_secs(5))
    }

    pub fn skill(&self) -> &str {
        &self.skill
    }

    pub fn uses(&self) -> u64 {
        self.uses.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl TaskBody for XpSkillTask {
    fn kind(&self) -> TaskKind {
        TaskKind::XpSkill
    }

    async fn tick(&self, ctx: &TaskContext) -> Result<()> {
        let hits = ctx.find_matches(XP_SKILLS, &[self.skill.as_str()], SKILL_SIMILARITY)?;
        let Some(hit) = hits.first() else {
            return Ok(());
        };

        let pid = ctx.process();
        let target = hit.center();
        ctx.request_input(0, move |desktop| async move {
            // put the cursor back where the user left it
            let back = desktop.cursor_position(pid)?;
            desktop.click_at(pid, target, MouseButton::Left)?;
            human_delay(CURSOR_RESTORE_DELAY).await;
            desktop.move_cursor(pid, back)
        })
        .await?;
        self.uses.fetch_add(1, Ordering::Relaxed);
        tracing::info!("⚡ {pid}: XP skill '{}' used", self.skill);
        Ok(())
    }

    fn status_line(&self) -> String {
        format!("{} x{}", self.skill, self.uses())
    }
}
