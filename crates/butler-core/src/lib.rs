//! # Butler Core
//!
//! Shared vocabulary for the Butler workspace: process ids and geometry,
//! the crate-wide error type, TOML configuration, and the traits that
//! separate the scheduling engine from the platform it drives.
//!
//! ## Collaborators
//! ```text
//! Desktop       : focus queries, set-foreground, mouse + keyboard injection
//! ScreenCapture : window capture, template matching
//! ProcessProbe  : enumerate live target instances (+ disconnected state)
//! ```
//! `sim` implements all three in memory for dry runs and tests.

pub mod config;
pub mod error;
pub mod sim;
pub mod traits;
pub mod types;

pub use config::{
    ArbiterConfig, ButlerConfig, SchedulerConfig, SimConfig, TaskConfig, TaskKindConfig,
    UserFocusPolicy, WatcherConfig,
};
pub use error::{ButlerError, Result};
pub use traits::{Desktop, ProbedProcess, ProcessProbe, ScreenCapture};
pub use types::{Frame, Key, Match, MouseButton, Point, ProcessId, Region, Rgb};
