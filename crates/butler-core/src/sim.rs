//! In-memory simulated desktop.
//!
//! Backs the CLI's dry-run mode and the test suites: windows, focus and the
//! cursor are plain state, every input call is recorded, and template hits
//! are whatever the caller planted.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use crate::error::{ButlerError, Result};
use crate::traits::{Desktop, ProbedProcess, ProcessProbe, ScreenCapture};
use crate::types::{Frame, Key, Match, MouseButton, Point, ProcessId, Region, Rgb, rank_matches};

/// Default simulated client area.
pub const SIM_WIDTH: u32 = 1024;
pub const SIM_HEIGHT: u32 = 768;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

/// One recorded call against the simulated desktop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputEvent {
    Focus(ProcessId),
    Move(ProcessId, Point),
    Click(ProcessId, MouseButton),
    KeyDown(ProcessId, Key),
    KeyUp(ProcessId, Key),
}

impl InputEvent {
    pub fn pid(&self) -> ProcessId {
        match self {
            InputEvent::Focus(p)
            | InputEvent::Move(p, _)
            | InputEvent::Click(p, _)
            | InputEvent::KeyDown(p, _)
            | InputEvent::KeyUp(p, _) => *p,
        }
    }
}

struct DesktopState {
    foreground: Option<ProcessId>,
    cursor_inside: bool,
    grant_focus: bool,
    cursors: HashMap<ProcessId, Point>,
    events: Vec<InputEvent>,
}

/// Simulated input + focus backend.
pub struct SimDesktop {
    state: Mutex<DesktopState>,
}

impl SimDesktop {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(DesktopState {
                foreground: None,
                cursor_inside: true,
                grant_focus: true,
                cursors: HashMap::new(),
                events: Vec::new(),
            }),
        }
    }

    /// Whether `set_foreground` requests succeed.
    pub fn set_grant_focus(&self, grant: bool) {
        lock(&self.state).grant_focus = grant;
    }

    /// Whether the user's cursor is inside the foreground window.
    pub fn set_cursor_inside(&self, inside: bool) {
        lock(&self.state).cursor_inside = inside;
    }

    /// Simulate the user switching windows.
    pub fn user_focus(&self, pid: Option<ProcessId>) {
        lock(&self.state).foreground = pid;
    }

    pub fn foreground(&self) -> Option<ProcessId> {
        lock(&self.state).foreground
    }

    /// Every recorded input call, oldest first.
    pub fn events(&self) -> Vec<InputEvent> {
        lock(&self.state).events.clone()
    }

    /// Recorded clicks, oldest first.
    pub fn clicks(&self) -> Vec<(ProcessId, Point, MouseButton)> {
        let state = lock(&self.state);
        let mut cursor: HashMap<ProcessId, Point> = HashMap::new();
        let mut out = Vec::new();
        for ev in &state.events {
            match ev {
                InputEvent::Move(p, to) => {
                    cursor.insert(*p, *to);
                }
                InputEvent::Click(p, b) => {
                    out.push((*p, cursor.get(p).copied().unwrap_or_default(), *b));
                }
                _ => {}
            }
        }
        out
    }

    pub fn clear_events(&self) {
        lock(&self.state).events.clear();
    }
}

impl Default for SimDesktop {
    fn default() -> Self {
        Self::new()
    }
}

impl Desktop for SimDesktop {
    fn is_foreground(&self, pid: ProcessId) -> bool {
        lock(&self.state).foreground == Some(pid)
    }

    fn set_foreground(&self, pid: ProcessId) -> Result<()> {
        let mut state = lock(&self.state);
        if state.grant_focus {
            state.foreground = Some(pid);
            state.events.push(InputEvent::Focus(pid));
        }
        Ok(())
    }

    fn cursor_in_window(&self, pid: ProcessId) -> bool {
        let state = lock(&self.state);
        state.cursor_inside && state.foreground == Some(pid)
    }

    fn cursor_position(&self, pid: ProcessId) -> Result<Point> {
        Ok(lock(&self.state).cursors.get(&pid).copied().unwrap_or_default())
    }

    fn move_cursor(&self, pid: ProcessId, to: Point) -> Result<()> {
        if to.x < 0 || to.y < 0 || to.x >= SIM_WIDTH as i32 || to.y >= SIM_HEIGHT as i32 {
            return Err(ButlerError::Input(format!("{to:?} is outside the window of {pid}")));
        }
        let mut state = lock(&self.state);
        state.cursors.insert(pid, to);
        state.events.push(InputEvent::Move(pid, to));
        Ok(())
    }

    fn click(&self, pid: ProcessId, button: MouseButton) -> Result<()> {
        lock(&self.state).events.push(InputEvent::Click(pid, button));
        Ok(())
    }

    fn key_down(&self, pid: ProcessId, key: Key) -> Result<()> {
        lock(&self.state).events.push(InputEvent::KeyDown(pid, key));
        Ok(())
    }

    fn key_up(&self, pid: ProcessId, key: Key) -> Result<()> {
        lock(&self.state).events.push(InputEvent::KeyUp(pid, key));
        Ok(())
    }
}

/// Simulated capture backend with planted template hits.
pub struct SimCapture {
    frames: Mutex<HashMap<ProcessId, Frame>>,
    hits: Mutex<HashMap<(ProcessId, String), Vec<Region>>>,
}

impl SimCapture {
    pub fn new() -> Self {
        Self {
            frames: Mutex::new(HashMap::new()),
            hits: Mutex::new(HashMap::new()),
        }
    }

    /// Replace the frame returned for `pid`.
    pub fn set_frame(&self, pid: ProcessId, frame: Frame) {
        lock(&self.frames).insert(pid, frame);
    }

    /// Plant template hits for `pid`. An empty list removes them.
    pub fn set_hits(&self, pid: ProcessId, template: &str, regions: Vec<Region>) {
        let mut hits = lock(&self.hits);
        if regions.is_empty() {
            hits.remove(&(pid, template.to_string()));
        } else {
            hits.insert((pid, template.to_string()), regions);
        }
    }
}

impl Default for SimCapture {
    fn default() -> Self {
        Self::new()
    }
}

impl ScreenCapture for SimCapture {
    fn capture(&self, pid: ProcessId) -> Result<Frame> {
        Ok(lock(&self.frames)
            .get(&pid)
            .cloned()
            .unwrap_or_else(|| Frame::filled(SIM_WIDTH, SIM_HEIGHT, Rgb::default())))
    }

    fn find_matches(
        &self,
        pid: ProcessId,
        region: Region,
        templates: &[&str],
        _similarity: f32,
    ) -> Result<Vec<Match>> {
        let hits = lock(&self.hits);
        let mut out = Vec::new();
        for template in templates {
            if let Some(regions) = hits.get(&(pid, template.to_string())) {
                out.extend(
                    regions
                        .iter()
                        .filter(|r| region.contains(r.center()))
                        .map(|r| Match {
                            region: *r,
                            similarity: 1.0,
                            template: template.to_string(),
                        }),
                );
            }
        }
        rank_matches(&mut out);
        Ok(out)
    }
}

/// Simulated process list.
pub struct SimProbe {
    processes: Mutex<Vec<ProbedProcess>>,
}

impl SimProbe {
    pub fn new(processes: Vec<ProbedProcess>) -> Self {
        Self {
            processes: Mutex::new(processes),
        }
    }

    pub fn spawn_process(&self, id: ProcessId, disconnected: bool) {
        let mut list = lock(&self.processes);
        list.retain(|p| p.id != id);
        list.push(ProbedProcess { id, disconnected });
    }

    pub fn kill_process(&self, id: ProcessId) {
        lock(&self.processes).retain(|p| p.id != id);
    }

    pub fn set_disconnected(&self, id: ProcessId, disconnected: bool) {
        for p in lock(&self.processes).iter_mut().filter(|p| p.id == id) {
            p.disconnected = disconnected;
        }
    }
}

impl ProcessProbe for SimProbe {
    fn list(&self) -> Result<Vec<ProbedProcess>> {
        Ok(lock(&self.processes).clone())
    }
}
