//! Desktop trait: synthetic input and OS foreground control.

use crate::error::Result;
use crate::types::{Key, MouseButton, Point, ProcessId};

/// Synthetic input and focus primitives for target-process windows.
///
/// All calls are synchronous. The scheduler's arbitration loop is the only
/// caller: it queries focus to decide whether an action may run, and action
/// operations receive the desktop while they hold arbitration ownership.
pub trait Desktop: Send + Sync {
    /// Whether the process window is the OS foreground window.
    fn is_foreground(&self, pid: ProcessId) -> bool;

    /// Ask the OS to bring the process window to the foreground.
    fn set_foreground(&self, pid: ProcessId) -> Result<()>;

    /// Whether the user's cursor currently lies inside the process's client area.
    fn cursor_in_window(&self, pid: ProcessId) -> bool;

    /// Cursor position in the process's client coordinates.
    fn cursor_position(&self, pid: ProcessId) -> Result<Point>;

    /// Move the cursor to a client-coordinate point of the process window.
    fn move_cursor(&self, pid: ProcessId, to: Point) -> Result<()>;

    /// Click at the current cursor position.
    fn click(&self, pid: ProcessId, button: MouseButton) -> Result<()>;

    fn key_down(&self, pid: ProcessId, key: Key) -> Result<()>;

    fn key_up(&self, pid: ProcessId, key: Key) -> Result<()>;

    /// Move to `to` and click there.
    fn click_at(&self, pid: ProcessId, to: Point, button: MouseButton) -> Result<()> {
        self.move_cursor(pid, to)?;
        self.click(pid, button)
    }
}
