//! Builds tasks from `[[tasks]]` config entries.

use std::sync::Arc;
use std::time::Duration;

use butler_core::{ButlerError, Result, TaskConfig, TaskKindConfig};
use butler_scheduler::{Task, TaskBody, TaskSettings};

use crate::{
    ClickTask, CustomTask, HuntingTask, ItemFindPauseTask, MiningTask, StatsWatcherTask, XpSkillTask,
};

/// Build and enable one task. Zero `interval_ms`/`interval_variance_ms` and a
/// missing `priority` keep the kind's defaults.
pub fn build_task(config: &TaskConfig) -> Result<Task> {
    let (body, mut settings): (Arc<dyn TaskBody>, TaskSettings) = match &config.kind {
        TaskKindConfig::Click {
            button,
            hold_ctrl,
            wait_ms,
        } => (
            Arc::new(ClickTask::new(*button, *hold_ctrl, Duration::from_millis(*wait_ms))),
            ClickTask::default_settings(),
        ),
        TaskKindConfig::Mining => (Arc::new(MiningTask::new()), MiningTask::default_settings()),
        TaskKindConfig::XpSkill { skill } => {
            if skill.trim().is_empty() {
                return Err(ButlerError::Config(format!(
                    "xp_skill task for {} needs a skill name",
                    config.process
                )));
            }
            (
                Arc::new(XpSkillTask::new(skill.trim())),
                XpSkillTask::default_settings(),
            )
        }
        TaskKindConfig::StatsWatcher => (
            Arc::new(StatsWatcherTask::new()),
            StatsWatcherTask::default_settings(),
        ),
        TaskKindConfig::ItemFindPause => (
            Arc::new(ItemFindPauseTask::new()),
            ItemFindPauseTask::default_settings(),
        ),
        TaskKindConfig::Hunting => (Arc::new(HuntingTask::new()), HuntingTask::default_settings()),
        TaskKindConfig::Custom { name } => (Arc::new(CustomTask::new(name.clone())), TaskSettings::default()),
    };

    if config.interval_ms > 0 {
        settings.interval = config.interval();
    }
    if config.interval_variance_ms > 0 {
        settings.interval_variance = config.interval_variance();
    }
    if let Some(priority) = config.priority {
        settings.priority = priority;
    }

    let task = Task::from_arc(config.process, settings, body);
    task.start()?;
    if config.paused {
        task.pause();
    }
    Ok(task)
}

/// Build every configured task, stopping at the first invalid entry.
pub fn build_all(configs: &[TaskConfig]) -> Result<Vec<Task>> {
    configs.iter().map(build_task).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use butler_core::{ButlerConfig, MouseButton, ProcessId};
    use butler_scheduler::{DEFAULT_PRIORITY, TaskKind};

    fn configs(toml: &str) -> Vec<TaskConfig> {
        ButlerConfig::from_toml(toml).unwrap().tasks
    }

    #[test]
    fn test_kind_defaults_apply() {
        let tasks = build_all(&configs(
            r#"
            [[tasks]]
            kind = "click"
            process = 1

            [[tasks]]
            kind = "mining"
            process = 1
            "#,
        ))
        .unwrap();

        let click = &tasks[0];
        assert_eq!(click.kind(), &TaskKind::Click);
        assert!(click.needs_user_focus());
        assert_eq!(click.settings().interval, Duration::from_millis(100));
        assert_eq!(click.priority(), DEFAULT_PRIORITY);
        assert!(click.is_enabled());

        let mining = &tasks[1];
        assert!(!mining.needs_user_focus());
        assert_eq!(mining.settings().interval, Duration::from_secs(240));
        assert_eq!(mining.settings().interval_variance, Duration::from_secs(60));
    }

    #[test]
    fn test_overrides_and_paused() {
        let tasks = build_all(&configs(
            r#"
            [[tasks]]
            kind = "xp_skill"
            process = 9
            skill = " superman "
            interval_ms = 2000
            interval_variance_ms = 250
            priority = 5
            paused = true
            "#,
        ))
        .unwrap();

        let xp = &tasks[0];
        assert_eq!(xp.process(), ProcessId(9));
        assert_eq!(xp.settings().interval, Duration::from_secs(2));
        assert_eq!(xp.settings().interval_variance, Duration::from_millis(250));
        assert_eq!(xp.priority(), 5);
        assert!(xp.is_paused());
        assert_eq!(xp.status_line(), "superman x0");
    }

    #[test]
    fn test_hunting_runs_every_millisecond_with_user_focus() {
        let tasks = build_all(&configs(
            r#"
            [[tasks]]
            kind = "hunting"
            process = 3
            "#,
        ))
        .unwrap();

        let hunting = &tasks[0];
        assert_eq!(hunting.kind(), &TaskKind::Hunting);
        assert!(hunting.needs_user_focus());
        assert_eq!(hunting.settings().interval, Duration::from_millis(1));
        assert_eq!(hunting.status_line(), "0 cycles, 0 drops");
    }

    #[test]
    fn test_empty_skill_rejected() {
        let config = TaskConfig {
            process: ProcessId(1),
            kind: TaskKindConfig::XpSkill { skill: "  ".into() },
            interval_ms: 0,
            interval_variance_ms: 0,
            priority: None,
            paused: false,
        };
        assert!(matches!(build_task(&config), Err(ButlerError::Config(_))));
    }

    #[test]
    fn test_custom_kind_keeps_name() {
        let config = TaskConfig {
            process: ProcessId(2),
            kind: TaskKindConfig::Custom { name: "afk".into() },
            interval_ms: 0,
            interval_variance_ms: 0,
            priority: None,
            paused: false,
        };
        let task = build_task(&config).unwrap();
        assert_eq!(task.kind(), &TaskKind::Custom("afk".into()));

        let click = TaskConfig {
            kind: TaskKindConfig::Click {
                button: MouseButton::Right,
                hold_ctrl: true,
                wait_ms: 0,
            },
            ..config
        };
        assert_ne!(build_task(&click).unwrap(), task);
    }
}
