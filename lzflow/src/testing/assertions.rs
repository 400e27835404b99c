//! Test assertions for executions and lifecycle responses.

use crate::core::{ExecutionStatus, WorkflowExecution};
use crate::lifecycle::{LifecycleResponse, ResponseStatus};

/// Asserts that the execution succeeded.
pub fn assert_execution_succeeded(execution: &WorkflowExecution) {
    assert_eq!(
        execution.status,
        ExecutionStatus::Succeeded,
        "Expected success, got {} (reason: {:?})",
        execution.status,
        execution.failure_reason
    );
}

/// Asserts that the execution ended with `expected`.
pub fn assert_execution_status(execution: &WorkflowExecution, expected: &ExecutionStatus) {
    assert_eq!(
        &execution.status, expected,
        "Expected status {expected}, got {} (reason: {:?})",
        execution.status, execution.failure_reason
    );
}

/// Asserts that the execution failed with a reason containing `fragment`.
pub fn assert_execution_failed_with(execution: &WorkflowExecution, fragment: &str) {
    assert_eq!(execution.status, ExecutionStatus::Failed, "Expected failure");
    let reason = execution.failure_reason.as_deref().unwrap_or_default();
    assert!(
        reason.contains(fragment),
        "Expected failure reason to contain '{fragment}', got '{reason}'"
    );
}

/// Asserts the exact trail of visited steps.
pub fn assert_visited(execution: &WorkflowExecution, expected: &[&str]) {
    let visited: Vec<&str> = execution.visited.iter().map(String::as_str).collect();
    assert_eq!(visited, expected, "Unexpected step trail");
}

/// Asserts that an output `Step.Name` holds `expected`.
pub fn assert_output(execution: &WorkflowExecution, key: &str, expected: &serde_json::Value) {
    let actual = execution.outputs.get(key);
    assert_eq!(
        actual,
        Some(expected),
        "Expected output '{key}' = {expected}, outputs: {:?}",
        execution.outputs
    );
}

/// Asserts a `SUCCESS` lifecycle response.
pub fn assert_response_success(response: &LifecycleResponse) {
    assert_eq!(
        response.status,
        ResponseStatus::Success,
        "Expected SUCCESS, got reason {:?}",
        response.reason
    );
}

/// Asserts a `FAILED` lifecycle response whose reason contains `fragment`.
pub fn assert_response_failed(response: &LifecycleResponse, fragment: &str) {
    assert_eq!(response.status, ResponseStatus::Failed, "Expected FAILED");
    let reason = response.reason.as_deref().unwrap_or_default();
    assert!(
        reason.contains(fragment),
        "Expected reason to contain '{fragment}', got '{reason}'"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::StepResult;
    use serde_json::json;
    use std::collections::BTreeMap;

    #[test]
    fn test_execution_assertions() {
        let mut exec = WorkflowExecution::new("wf", BTreeMap::new());
        exec.enter_step("A");
        let mut outputs = BTreeMap::new();
        outputs.insert("Id".to_string(), json!("x"));
        exec.record_step(StepResult::succeeded("A", outputs));
        exec.finish(ExecutionStatus::Succeeded, None);

        assert_execution_succeeded(&exec);
        assert_visited(&exec, &["A"]);
        assert_output(&exec, "A.Id", &json!("x"));
    }

    #[test]
    #[should_panic(expected = "Expected failure reason")]
    fn test_failed_with_wrong_reason_panics() {
        let mut exec = WorkflowExecution::new("wf", BTreeMap::new());
        exec.finish(ExecutionStatus::Failed, Some("boom".into()));
        assert_execution_failed_with(&exec, "other");
    }
}
