//! Persisted workflow execution record.

use super::{ExecutionStatus, StepResult};
use crate::utils::iso_timestamp;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use uuid::Uuid;

/// State of one workflow execution.
///
/// Outputs are keyed `Step.Output` and only ever grow: a recorded output is
/// never overwritten.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowExecution {
    /// Execution id.
    pub id: Uuid,
    /// Definition being executed.
    pub definition_id: String,
    /// Bound parameters, defaults applied.
    pub parameters: BTreeMap<String, Value>,
    /// Current status.
    pub status: ExecutionStatus,
    /// Step outputs keyed `Step.Output`.
    pub outputs: BTreeMap<String, Value>,
    /// Steps in execution order.
    pub visited: Vec<String>,
    /// Per-step results in execution order.
    pub step_results: Vec<StepResult>,
    /// Why the execution failed or timed out.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    /// Parent execution for delegated children.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_execution_id: Option<Uuid>,
    /// Delegation depth (0 for top-level executions).
    #[serde(default)]
    pub depth: u32,
    /// Creation time.
    pub created_at: String,
    /// Last update time.
    pub updated_at: String,
    /// Completion time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
}

impl WorkflowExecution {
    /// Creates a pending execution.
    #[must_use]
    pub fn new(definition_id: impl Into<String>, parameters: BTreeMap<String, Value>) -> Self {
        let now = iso_timestamp();
        Self {
            id: Uuid::new_v4(),
            definition_id: definition_id.into(),
            parameters,
            status: ExecutionStatus::Pending,
            outputs: BTreeMap::new(),
            visited: Vec::new(),
            step_results: Vec::new(),
            failure_reason: None,
            parent_execution_id: None,
            depth: 0,
            created_at: now.clone(),
            updated_at: now,
            completed_at: None,
        }
    }

    /// Marks this execution as a delegated child.
    #[must_use]
    pub fn with_parent(mut self, parent: Uuid, depth: u32) -> Self {
        self.parent_execution_id = Some(parent);
        self.depth = depth;
        self
    }

    /// Moves to `Running(step)`.
    pub fn enter_step(&mut self, step: &str) {
        self.status = ExecutionStatus::running(step);
        self.visited.push(step.to_string());
        self.touch();
    }

    /// Records a finished step and merges its outputs.
    pub fn record_step(&mut self, result: StepResult) {
        for (name, value) in &result.outputs {
            self.outputs
                .entry(format!("{}.{name}", result.step))
                .or_insert_with(|| value.clone());
        }
        self.step_results.push(result);
        self.touch();
    }

    /// Moves to a terminal status.
    pub fn finish(&mut self, status: ExecutionStatus, reason: Option<String>) {
        self.status = status;
        self.failure_reason = reason;
        self.touch();
        self.completed_at = Some(self.updated_at.clone());
    }

    /// Returns an output recorded by `step`.
    #[must_use]
    pub fn output(&self, step: &str, name: &str) -> Option<&Value> {
        self.outputs.get(&format!("{step}.{name}"))
    }

    /// Returns true if `step` was entered.
    #[must_use]
    pub fn visited(&self, step: &str) -> bool {
        self.visited.iter().any(|s| s == step)
    }

    fn touch(&mut self) {
        self.updated_at = iso_timestamp();
    }
}
