//! ProcessProbe trait: enumerate live target-application instances.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::ProcessId;

/// One instance seen by a probe pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbedProcess {
    pub id: ProcessId,
    /// The instance is showing its lost-connection dialog.
    pub disconnected: bool,
}

/// Lists the target-application instances currently alive.
pub trait ProcessProbe: Send + Sync {
    fn list(&self) -> Result<Vec<ProbedProcess>>;
}
