//! Task state machine.

use serde::{Deserialize, Serialize};

/// Where a supervised task is in its lifecycle.
///
/// Transitions follow the machine exactly:
/// `Stopped -> Starting -> Running -> Stopping -> Stopped`, with
/// `Starting/Running -> Errored -> Stopped` on detected failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// No live child; the resting state.
    Stopped,
    /// Child spawned, liveness probe not yet passed.
    Starting,
    /// Probe passed; child is serving.
    Running,
    /// Shutdown in progress (graceful or forced phase).
    Stopping,
    /// A failure was detected; transient, settles into `Stopped`.
    Errored,
}

impl TaskState {
    /// Whether `start()` would be a warned no-op in this state.
    pub fn is_active(self) -> bool {
        matches!(self, TaskState::Starting | TaskState::Running)
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskState::Stopped => "stopped",
            TaskState::Starting => "starting",
            TaskState::Running => "running",
            TaskState::Stopping => "stopping",
            TaskState::Errored => "errored",
        };
        f.write_str(s)
    }
}
