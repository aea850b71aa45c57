//! Error types shared by every Butler crate.

use crate::types::ProcessId;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, ButlerError>;

#[derive(Debug, thiserror::Error)]
pub enum ButlerError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// The awaited work was cancelled (task disabled, execution cancelled, or queue drained).
    #[error("Cancelled")]
    Cancelled,

    #[error("Task {0} has been cancelled and cannot be restarted")]
    TaskCancelled(String),

    #[error("Process {process} already has a task of kind '{kind}'")]
    DuplicateTask { process: ProcessId, kind: String },

    #[error("Process {0} is not registered")]
    ProcessNotFound(ProcessId),

    #[error("Scheduler is already running")]
    AlreadyRunning,

    #[error("Scheduler is not running")]
    NotRunning,

    #[error("Timed out waiting for {0} to take the foreground")]
    FocusTimeout(ProcessId),

    #[error("Input error: {0}")]
    Input(String),

    #[error("Capture error: {0}")]
    Capture(String),

    #[error("Task error: {0}")]
    Task(String),
}

impl ButlerError {
    /// True for the cancellation family, which callers treat as a clean exit rather than a failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ButlerError::Cancelled | ButlerError::TaskCancelled(_))
    }
}
