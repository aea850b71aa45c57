//! Boundaries to the collaborators Butler drives but does not implement:
//! input injection and focus control, window capture and template matching,
//! and process enumeration.

pub mod capture;
pub mod desktop;
pub mod probe;

pub use capture::ScreenCapture;
pub use desktop::Desktop;
pub use probe::{ProbedProcess, ProcessProbe};
