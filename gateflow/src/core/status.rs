//! Stage and run status enums.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The execution status of a stage within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    /// Stage is waiting for its producers.
    #[default]
    Pending,
    /// Stage is currently running.
    Running,
    /// Stage ran and committed its outputs.
    Completed,
    /// Stage was skipped; outputs of an earlier identical execution were reused.
    Cached,
    /// Stage committed its outputs and asked guarded stages not to proceed.
    Halted,
    /// Stage never ran because a guard halted or a producer did not commit.
    Blocked,
    /// Stage failed.
    Failed,
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Cached => write!(f, "cached"),
            Self::Halted => write!(f, "halted"),
            Self::Blocked => write!(f, "blocked"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl StageStatus {
    /// Returns true if the status represents a terminal state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending | Self::Running)
    }

    /// Returns true if the stage's outputs are committed and consumable.
    #[must_use]
    pub fn has_outputs(&self) -> bool {
        matches!(self, Self::Completed | Self::Cached | Self::Halted)
    }
}

/// The status of a whole pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// The run is executing.
    Running,
    /// Every stage completed or was cached.
    Completed,
    /// A validation halt blocked part of the DAG.
    Halted,
    /// A fatal error aborted the run.
    Failed,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Halted => write!(f, "halted"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_status_is_terminal() {
        assert!(StageStatus::Completed.is_terminal());
        assert!(StageStatus::Blocked.is_terminal());
        assert!(!StageStatus::Pending.is_terminal());
        assert!(!StageStatus::Running.is_terminal());
    }

    #[test]
    fn test_halted_stage_still_has_outputs() {
        assert!(StageStatus::Halted.has_outputs());
        assert!(StageStatus::Cached.has_outputs());
        assert!(!StageStatus::Blocked.has_outputs());
        assert!(!StageStatus::Failed.has_outputs());
    }

    #[test]
    fn test_status_serialize() {
        assert_eq!(serde_json::to_string(&StageStatus::Cached).unwrap(), r#""cached""#);
        assert_eq!(serde_json::to_string(&RunStatus::Halted).unwrap(), r#""halted""#);
    }
}
