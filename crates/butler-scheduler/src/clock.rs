//! Clock: frame counter and fixed-timestep bookkeeping for the tick loop.

use std::time::{Duration, Instant};

/// Counts rendered frames and fixed steps, and measures frame deltas.
///
/// Created once per scheduler. `start` after a `stop` resumes counting; the
/// counters are never reset.
#[derive(Debug)]
pub struct Clock {
    started_at: Option<Instant>,
    stopped_at: Option<Instant>,
    last_frame: Option<Instant>,
    max_frame: Duration,
    tick: u64,
    fixed_tick: u64,
}

impl Clock {
    /// Create a clock whose frame deltas are clamped to `max_frame`.
    pub fn new(max_frame: Duration) -> Self {
        Self {
            started_at: None,
            stopped_at: None,
            last_frame: None,
            max_frame,
            tick: 0,
            fixed_tick: 0,
        }
    }

    pub fn start(&mut self) {
        self.start_at(Instant::now());
    }

    pub(crate) fn start_at(&mut self, now: Instant) {
        if self.started_at.is_none() {
            self.started_at = Some(now);
        }
        self.stopped_at = None;
        self.last_frame = Some(now);
    }

    pub fn stop(&mut self) {
        if self.started_at.is_some() && self.stopped_at.is_none() {
            self.stopped_at = Some(Instant::now());
        }
    }

    pub fn is_running(&self) -> bool {
        self.started_at.is_some() && self.stopped_at.is_none()
    }

    /// Elapsed time since the previous frame, clamped to the configured maximum.
    /// Increments the frame tick.
    pub fn frame(&mut self) -> Duration {
        self.frame_at(Instant::now())
    }

    pub(crate) fn frame_at(&mut self, now: Instant) -> Duration {
        let last = self.last_frame.unwrap_or(now);
        let elapsed = now.saturating_duration_since(last).min(self.max_frame);
        self.last_frame = Some(now);
        self.tick += 1;
        elapsed
    }

    /// Record one consumed fixed step.
    pub fn fixed_update(&mut self) {
        self.fixed_tick += 1;
    }

    /// Frames rendered so far.
    pub fn tick(&self) -> u64 {
        self.tick
    }

    /// Fixed steps consumed so far.
    pub fn fixed_tick(&self) -> u64 {
        self.fixed_tick
    }

    /// Wall time since the first `start`, up to `stop` if stopped.
    pub fn total_time(&self) -> Duration {
        match self.started_at {
            Some(start) => self
                .stopped_at
                .unwrap_or_else(Instant::now)
                .saturating_duration_since(start),
            None => Duration::ZERO,
        }
    }
}

/// How many fixed steps one frame may run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepPlan {
    pub steps: u32,
    /// Accumulator carried into the next frame (always `< step`).
    pub remaining: Duration,
    /// Backlog discarded because it exceeded `max_steps`.
    pub dropped: Duration,
}

/// Consume whole `step`s from `accumulator`, at most `max_steps` of them.
pub fn plan_steps(accumulator: Duration, step: Duration, max_steps: u32) -> StepPlan {
    let mut remaining = accumulator;
    let mut steps = 0u32;
    if step.is_zero() {
        return StepPlan {
            steps,
            remaining: Duration::ZERO,
            dropped: accumulator,
        };
    }

    while remaining >= step && steps < max_steps {
        remaining -= step;
        steps += 1;
    }

    let mut dropped = Duration::ZERO;
    if remaining >= step {
        // keep the sub-step remainder so step phase is preserved
        let whole = remaining.as_nanos() / step.as_nanos();
        dropped = step * whole as u32;
        remaining -= dropped;
    }

    StepPlan {
        steps,
        remaining,
        dropped,
    }
}
