//! Stats watcher: reads the health and mana bars and tells the other
//! tasks of its process when they move.

use std::sync::atomic::{AtomicI32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use butler_core::{Frame, Result, Rgb};
use butler_scheduler::{TaskBody, TaskContext, TaskEvent, TaskKind, TaskSettings};

pub const HEALTH_X: u32 = 39;
pub const MANA_X: u32 = 52;
/// Top of the bar fill. The pixel just above it is lit only when the bar is full.
pub const BAR_MIN_Y: u32 = 689;
pub const BAR_MAX_Y: u32 = 756;

/// Reported when no bar pixel could be read.
pub const UNKNOWN: i32 = -1;

const RED: Rgb = Rgb::new(136, 12, 12);
const RED_TOLERANCE: (u8, u8, u8) = (110, 50, 50);
const BLUE: Rgb = Rgb::new(5, 5, 111);
const BLUE_TOLERANCE: (u8, u8, u8) = (50, 50, 110);

pub fn is_red(c: Rgb) -> bool {
    c.near(RED, RED_TOLERANCE)
}

pub fn is_blue(c: Rgb) -> bool {
    c.near(BLUE, BLUE_TOLERANCE)
}

/// Fill percentage of the vertical bar at column `x`.
///
/// Full bars read 100. Otherwise the first lit pixel from the top maps
/// linearly onto `0..=90`; an unlit bar reads [`UNKNOWN`].
pub fn read_bar(frame: &Frame, x: u32, lit: impl Fn(Rgb) -> bool) -> i32 {
    if frame.pixel(x, BAR_MIN_Y - 1).is_some_and(&lit) {
        return 100;
    }
    for y in BAR_MIN_Y..BAR_MAX_Y {
        if frame.pixel(x, y).is_some_and(&lit) {
            let fill = (BAR_MAX_Y - y) as f32 / (BAR_MAX_Y - BAR_MIN_Y) as f32;
            return (fill * 90.0) as i32;
        }
    }
    UNKNOWN
}

pub struct StatsWatcherTask {
    health: AtomicI32,
    mana: AtomicI32,
}

impl StatsWatcherTask {
    pub fn new() -> Self {
        Self {
            health: AtomicI32::new(UNKNOWN),
            mana: AtomicI32::new(UNKNOWN),
        }
    }

    pub fn default_settings() -> TaskSettings {
        TaskSettings::every(Duration::from_secs(1))
    }

    pub fn health(&self) -> i32 {
        self.health.load(Ordering::Relaxed)
    }

    pub fn mana(&self) -> i32 {
        self.mana.load(Ordering::Relaxed)
    }
}

impl Default for StatsWatcherTask {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskBody for StatsWatcherTask {
    fn kind(&self) -> TaskKind {
        TaskKind::StatsWatcher
    }

    async fn tick(&self, ctx: &TaskContext) -> Result<()> {
        let frame = ctx.capture().capture(ctx.process())?;
        let health = read_bar(&frame, HEALTH_X, is_red);
        let mana = read_bar(&frame, MANA_X, is_blue);

        let old = self.health.swap(health, Ordering::Relaxed);
        if old != health {
            ctx.publish(TaskEvent::HealthChanged { old, new: health });
        }
        let old = self.mana.swap(mana, Ordering::Relaxed);
        if old != mana {
            ctx.publish(TaskEvent::ManaChanged { old, new: mana });
        }
        Ok(())
    }

    fn status_line(&self) -> String {
        format!("{}|{}", self.health(), self.mana())
    }
}
