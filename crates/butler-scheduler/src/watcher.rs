//! Process watcher: polls a [`ProcessProbe`] and reports lifecycle changes.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use butler_core::{ProcessId, ProcessProbe, Result};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::engine::WatcherSink;

/// Lifecycle notification for one target process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "event")]
pub enum WatcherEvent {
    ProcessStarted { pid: ProcessId, disconnected: bool },
    ProcessEnded { pid: ProcessId },
    ConnectivityChanged { pid: ProcessId, disconnected: bool },
}

pub struct ProcessWatcher {
    probe: Arc<dyn ProcessProbe>,
    interval: Duration,
    known: BTreeMap<ProcessId, bool>,
}

impl ProcessWatcher {
    pub fn new(probe: Arc<dyn ProcessProbe>, interval: Duration) -> Self {
        Self {
            probe,
            interval,
            known: BTreeMap::new(),
        }
    }

    /// Processes seen on the last poll, with their disconnected flag.
    pub fn known(&self) -> &BTreeMap<ProcessId, bool> {
        &self.known
    }

    /// Probe once and diff against the previous poll. Ended processes are
    /// reported first, then new ones, then connectivity flips.
    pub fn poll(&mut self) -> Result<Vec<WatcherEvent>> {
        let current: BTreeMap<ProcessId, bool> = self
            .probe
            .list()?
            .into_iter()
            .map(|p| (p.id, p.disconnected))
            .collect();

        let mut events = Vec::new();
        for pid in self.known.keys() {
            if !current.contains_key(pid) {
                events.push(WatcherEvent::ProcessEnded { pid: *pid });
            }
        }
        for (pid, disconnected) in &current {
            if !self.known.contains_key(pid) {
                events.push(WatcherEvent::ProcessStarted {
                    pid: *pid,
                    disconnected: *disconnected,
                });
            }
        }
        for (pid, disconnected) in &current {
            if let Some(was) = self.known.get(pid) {
                if was != disconnected {
                    events.push(WatcherEvent::ConnectivityChanged {
                        pid: *pid,
                        disconnected: *disconnected,
                    });
                }
            }
        }

        self.known = current;
        Ok(events)
    }

    /// Poll every interval and forward events to `sink` until `shutdown` fires
    /// or the scheduler is gone. The first poll runs immediately.
    pub fn spawn(mut self, sink: WatcherSink, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            tracing::info!("👀 Process watcher started (every {:?})", self.interval);
            let mut interval = tokio::time::interval(self.interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = interval.tick() => {}
                }
                match self.poll() {
                    Ok(events) => {
                        for event in events {
                            tracing::info!("👀 {event:?}");
                            if !sink.emit(event) {
                                tracing::info!("👀 Scheduler gone, watcher exiting");
                                return;
                            }
                        }
                    }
                    Err(e) => tracing::warn!("⚠️ Process probe failed: {e}"),
                }
            }
            tracing::info!("👀 Process watcher stopped");
        })
    }
}
