//! ScreenCapture trait: window screenshots and template matching.

use crate::error::Result;
use crate::types::{Frame, Match, ProcessId, Region};

/// Captures process windows and finds templates in them.
///
/// Used from task bodies only; the scheduler itself never looks at pixels.
pub trait ScreenCapture: Send + Sync {
    /// Capture the process's client area.
    fn capture(&self, pid: ProcessId) -> Result<Frame>;

    /// Find every occurrence of `templates` inside `region` with at least
    /// `similarity`. Hits are ranked with [`crate::types::rank_matches`].
    fn find_matches(
        &self,
        pid: ProcessId,
        region: Region,
        templates: &[&str],
        similarity: f32,
    ) -> Result<Vec<Match>>;
}
