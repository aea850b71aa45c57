//! Butler configuration system.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{ButlerError, Result};
use crate::types::{MouseButton, ProcessId};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ButlerConfig {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub arbiter: ArbiterConfig,
    #[serde(default)]
    pub watcher: WatcherConfig,
    #[serde(default)]
    pub sim: SimConfig,
    #[serde(default)]
    pub tasks: Vec<TaskConfig>,
}

impl ButlerConfig {
    /// Load config from the default path (~/.butler/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ButlerError::Config(format!("Failed to read config: {e}")))?;
        Self::from_toml(&content)
    }

    /// Parse config from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save config to the given path, creating parent directories.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = self.to_toml()?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Save config to the default path.
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::default_path())
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| ButlerError::Config(format!("Failed to serialize config: {e}")))
    }

    /// Reject values the scheduler cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.scheduler.fixed_step_ms == 0 {
            return Err(ButlerError::Config("scheduler.fixed_step_ms must be > 0".into()));
        }
        if self.scheduler.max_steps_per_frame == 0 {
            return Err(ButlerError::Config("scheduler.max_steps_per_frame must be > 0".into()));
        }
        if self.scheduler.max_frame_ms < self.scheduler.fixed_step_ms {
            return Err(ButlerError::Config(
                "scheduler.max_frame_ms must be >= scheduler.fixed_step_ms".into(),
            ));
        }
        for task in &self.tasks {
            if task.interval_ms > 0 && task.interval_variance_ms > task.interval_ms {
                tracing::warn!(
                    "⚠️ Task {:?} on {} has variance > interval; intervals will clamp at 0",
                    task.kind,
                    task.process
                );
            }
        }
        Ok(())
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the Butler home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".butler")
    }
}

/// Tick loop configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Size of one fixed simulation step.
    #[serde(default = "default_fixed_step_ms")]
    pub fixed_step_ms: u64,
    /// Upper bound on one measured frame; longer stalls are clamped.
    #[serde(default = "default_max_frame_ms")]
    pub max_frame_ms: u64,
    /// Catch-up steps allowed per frame before the backlog is dropped.
    #[serde(default = "default_max_steps_per_frame")]
    pub max_steps_per_frame: u32,
    /// Sleep between frames.
    #[serde(default = "default_frame_sleep_ms")]
    pub frame_sleep_ms: u64,
}

fn default_fixed_step_ms() -> u64 { 100 }
fn default_max_frame_ms() -> u64 { 250 }
fn default_max_steps_per_frame() -> u32 { 5 }
fn default_frame_sleep_ms() -> u64 { 10 }

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            fixed_step_ms: default_fixed_step_ms(),
            max_frame_ms: default_max_frame_ms(),
            max_steps_per_frame: default_max_steps_per_frame(),
            frame_sleep_ms: default_frame_sleep_ms(),
        }
    }
}

impl SchedulerConfig {
    pub fn fixed_step(&self) -> Duration {
        Duration::from_millis(self.fixed_step_ms)
    }

    pub fn max_frame(&self) -> Duration {
        Duration::from_millis(self.max_frame_ms)
    }

    pub fn frame_sleep(&self) -> Duration {
        Duration::from_millis(self.frame_sleep_ms)
    }
}

/// What a process must look like before an action that does not force the
/// foreground may run against it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserFocusPolicy {
    /// The process is foreground and the user's cursor is inside its window.
    #[default]
    ForegroundAndCursor,
    /// The cursor is inside the process window, whichever window is foreground.
    CursorInside,
    /// No precondition.
    Always,
}

/// Arbitration loop configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArbiterConfig {
    /// How long the loop idles when nothing is queued.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Pause after each executed action.
    #[serde(default = "default_pass_delay_ms")]
    pub pass_delay_ms: u64,
    /// Bounded wait for the OS to grant the foreground.
    #[serde(default = "default_focus_timeout_ms")]
    pub focus_timeout_ms: u64,
    /// Settle time after the foreground changed hands.
    #[serde(default = "default_focus_settle_ms")]
    pub focus_settle_ms: u64,
    #[serde(default)]
    pub user_focus_policy: UserFocusPolicy,
}

fn default_poll_interval_ms() -> u64 { 100 }
fn default_pass_delay_ms() -> u64 { 100 }
fn default_focus_timeout_ms() -> u64 { 1000 }
fn default_focus_settle_ms() -> u64 { 100 }

impl Default for ArbiterConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            pass_delay_ms: default_pass_delay_ms(),
            focus_timeout_ms: default_focus_timeout_ms(),
            focus_settle_ms: default_focus_settle_ms(),
            user_focus_policy: UserFocusPolicy::default(),
        }
    }
}

impl ArbiterConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn pass_delay(&self) -> Duration {
        Duration::from_millis(self.pass_delay_ms)
    }

    pub fn focus_timeout(&self) -> Duration {
        Duration::from_millis(self.focus_timeout_ms)
    }

    pub fn focus_settle(&self) -> Duration {
        Duration::from_millis(self.focus_settle_ms)
    }
}

/// Process watcher configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatcherConfig {
    /// Executable name of the target application.
    #[serde(default = "default_process_name")]
    pub process_name: String,
    #[serde(default = "default_check_interval_ms")]
    pub check_interval_ms: u64,
}

fn default_process_name() -> String { "Conquer".into() }
fn default_check_interval_ms() -> u64 { 10_000 }

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            process_name: default_process_name(),
            check_interval_ms: default_check_interval_ms(),
        }
    }
}

impl WatcherConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_millis(self.check_interval_ms)
    }
}

/// Simulated desktop used by `butler run` when no native backend is linked.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimConfig {
    #[serde(default)]
    pub processes: Vec<SimProcessConfig>,
    /// Whether the simulated user cursor sits inside the foreground window.
    #[serde(default = "bool_true")]
    pub cursor_inside: bool,
    /// Whether `set_foreground` requests are honoured.
    #[serde(default = "bool_true")]
    pub grant_focus: bool,
}

fn bool_true() -> bool { true }

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            processes: Vec::new(),
            cursor_inside: true,
            grant_focus: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimProcessConfig {
    pub id: ProcessId,
    #[serde(default)]
    pub disconnected: bool,
}

/// One task definition supplied by the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskConfig {
    pub process: ProcessId,
    #[serde(flatten)]
    pub kind: TaskKindConfig,
    #[serde(default)]
    pub interval_ms: u64,
    #[serde(default)]
    pub interval_variance_ms: u64,
    /// Overrides the kind's default priority. Lower runs first.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i32>,
    /// Register the task paused.
    #[serde(default)]
    pub paused: bool,
}

impl TaskConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn interval_variance(&self) -> Duration {
        Duration::from_millis(self.interval_variance_ms)
    }
}

/// Kind-specific task parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskKindConfig {
    Click {
        #[serde(default)]
        button: MouseButton,
        #[serde(default)]
        hold_ctrl: bool,
        #[serde(default = "default_click_wait_ms")]
        wait_ms: u64,
    },
    Mining,
    XpSkill {
        skill: String,
    },
    StatsWatcher,
    ItemFindPause,
    Hunting,
    Custom {
        name: String,
    },
}

fn default_click_wait_ms() -> u64 { 500 }
