//! Step result type with factory methods.

use super::StepStatus;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// What a single step produced.
///
/// A step yields named outputs, a branch decision, or nothing. Failed and
/// timed-out steps carry the error text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    /// Step name.
    pub step: String,
    /// Outcome.
    pub status: StepStatus,
    /// Outputs extracted from the step, keyed by output name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub outputs: BTreeMap<String, Value>,
    /// Step chosen by a branch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_step: Option<String>,
    /// Error message for failed, tolerated and timed-out steps.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StepResult {
    /// A successful step with outputs.
    #[must_use]
    pub fn succeeded(step: impl Into<String>, outputs: BTreeMap<String, Value>) -> Self {
        Self {
            step: step.into(),
            status: StepStatus::Succeeded,
            outputs,
            next_step: None,
            error: None,
        }
    }

    /// A successful step without outputs.
    #[must_use]
    pub fn empty(step: impl Into<String>) -> Self {
        Self::succeeded(step, BTreeMap::new())
    }

    /// A branch decision.
    #[must_use]
    pub fn branched(step: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            next_step: Some(target.into()),
            ..Self::empty(step)
        }
    }

    /// A failed step.
    #[must_use]
    pub fn failed(step: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            step: step.into(),
            status: StepStatus::Failed,
            outputs: BTreeMap::new(),
            next_step: None,
            error: Some(error.into()),
        }
    }

    /// A timed-out step.
    #[must_use]
    pub fn timed_out(step: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            status: StepStatus::TimedOut,
            ..Self::failed(step, error)
        }
    }

    /// Downgrades a failure to tolerated, for best-effort steps.
    #[must_use]
    pub fn tolerate(mut self) -> Self {
        if self.status == StepStatus::Failed {
            self.status = StepStatus::Tolerated;
        }
        self
    }

    /// Returns an output by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.outputs.get(name)
    }
}
