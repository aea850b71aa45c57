//! # Butler Tasks
//!
//! The built-in task kinds and the factory that builds them from config.
//!
//! | Kind              | Input                           | Default interval |
//! |-------------------|---------------------------------|------------------|
//! | `click`           | click at the user's cursor      | 100 ms           |
//! | `mining`          | drop ore from the inventory     | 240 s ± 60 s     |
//! | `xp_skill`        | fire a lit XP skill             | 5 s              |
//! | `stats_watcher`   | none, publishes health and mana | 1 s              |
//! | `item_find_pause` | none, pauses user-focus tasks   | 10 ms            |
//! | `hunting`         | XP fly, drop pickup, attacks    | 1 ms             |
//! | `custom`          | none                            | 10 s             |

pub mod click;
pub mod custom;
pub mod factory;
pub mod hunting;
pub mod item_find_pause;
pub mod mining;
pub mod regions;
pub mod stats_watcher;
pub mod xp_skill;

#[cfg(test)]
pub(crate) mod testkit;

pub use click::ClickTask;
pub use custom::CustomTask;
pub use factory::{build_all, build_task};
pub use hunting::HuntingTask;
pub use item_find_pause::ItemFindPauseTask;
pub use mining::MiningTask;
pub use stats_watcher::StatsWatcherTask;
pub use xp_skill::XpSkillTask;
