//! # Butler Scheduler
//!
//! Runs many periodic automation tasks against many target processes while
//! only one of them at a time may drive the mouse, keyboard and foreground.
//!
//! ## Architecture
//! ```text
//! ProcessWatcher ──events──▶ mailbox ──▶ TickLoop (owns ProcessRegistry)
//!                                          │ fixed steps
//!                                          ▼
//!                                    Task bodies (tokio tasks)
//!                                          │ enqueue
//!                                          ▼
//!                                    ActionQueue ──▶ Arbiter ──▶ Desktop
//! ```
//!
//! ## Features
//! - Fixed-timestep countdowns with clamped frame deltas and bounded catch-up
//! - Interval jitter, pausing, forced runs and permanent cancellation per task
//! - Priority-ordered, deadlock-free input arbitration with focus acquisition
//! - Process-local task events and sibling control
//! - Cooperative cancellation through one token per execution

pub mod action;
pub mod arbiter;
pub mod clock;
pub mod context;
pub mod engine;
pub mod registry;
pub mod task;
mod tick;
pub mod watcher;

pub use action::{Action, ActionKey, ActionOp, ActionOutcome, ActionQueue, ActionTicket, boxed_op};
pub use arbiter::{Arbiter, ArbiterStats, ArbiterStatsSnapshot, FocusTracker};
pub use clock::{Clock, StepPlan, plan_steps};
pub use context::{DELAY_JITTER, TaskContext, human_delay};
pub use engine::{EngineStatus, SchedulerEngine, WatcherSink};
pub use registry::{ProcessRegistry, ProcessSnapshot, ProcessView, RegistrySnapshot};
pub use task::{
    DEFAULT_PRIORITY, Task, TaskBody, TaskEvent, TaskId, TaskKey, TaskKind, TaskSettings,
    TaskView, jittered,
};
pub use tick::TickCounters;
pub use watcher::{ProcessWatcher, WatcherEvent};
