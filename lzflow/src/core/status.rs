//! Execution and step status enums.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of a workflow execution.
///
/// `Pending → Running(step) → Succeeded | Failed | TimedOut`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// Accepted but not started.
    #[default]
    Pending,
    /// Executing the named step.
    Running {
        /// Current step name.
        step: String,
    },
    /// Reached an end step.
    Succeeded,
    /// A step failed.
    Failed,
    /// A wait or deadline elapsed.
    TimedOut,
}

impl ExecutionStatus {
    /// Creates a running status for `step`.
    #[must_use]
    pub fn running(step: impl Into<String>) -> Self {
        Self::Running { step: step.into() }
    }

    /// Returns true once the execution can no longer change.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::TimedOut)
    }

    /// Returns the step being executed, if running.
    #[must_use]
    pub fn current_step(&self) -> Option<&str> {
        match self {
            Self::Running { step } => Some(step),
            _ => None,
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running { step } => write!(f, "running({step})"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
            Self::TimedOut => write!(f, "timed_out"),
        }
    }
}

/// Outcome of a single step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// The step did its work (or found it already done).
    Succeeded,
    /// The step failed and stops the execution.
    Failed,
    /// The step failed but is best-effort; execution continues.
    Tolerated,
    /// The step's wait bound elapsed.
    TimedOut,
}

impl StepStatus {
    /// Returns true if execution proceeds after this step.
    #[must_use]
    pub fn continues(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Tolerated)
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
            Self::Tolerated => write!(f, "tolerated"),
            Self::TimedOut => write!(f, "timed_out"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execution_status_terminal() {
        assert!(!ExecutionStatus::Pending.is_terminal());
        assert!(!ExecutionStatus::running("A").is_terminal());
        assert!(ExecutionStatus::Succeeded.is_terminal());
        assert!(ExecutionStatus::Failed.is_terminal());
        assert!(ExecutionStatus::TimedOut.is_terminal());
    }

    #[test]
    fn test_execution_status_display() {
        assert_eq!(ExecutionStatus::running("Wait").to_string(), "running(Wait)");
        assert_eq!(ExecutionStatus::TimedOut.to_string(), "timed_out");
    }

    #[test]
    fn test_execution_status_serde() {
        let json = serde_json::to_value(ExecutionStatus::running("Check")).unwrap();
        assert_eq!(json, serde_json::json!({"state": "running", "step": "Check"}));

        let parsed: ExecutionStatus =
            serde_json::from_value(serde_json::json!({"state": "succeeded"})).unwrap();
        assert_eq!(parsed, ExecutionStatus::Succeeded);
    }

    #[test]
    fn test_step_status_continues() {
        assert!(StepStatus::Succeeded.continues());
        assert!(StepStatus::Tolerated.continues());
        assert!(!StepStatus::Failed.continues());
        assert!(!StepStatus::TimedOut.continues());
    }
}
