//! Error types for the lzflow orchestrator.
//!
//! The taxonomy separates remote failures by retry behavior, keeps
//! "already satisfied" distinct from real failures, and reports malformed
//! workflow definitions as configuration errors at registration time.

use crate::remote::{RemoteError, RemoteErrorKind};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// The main error type for orchestrator operations.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// A remote call failed with a retryable code and retries were exhausted.
    #[error("Transient remote error: {0}")]
    TransientRemote(RemoteError),

    /// A remote call failed with a non-retryable code.
    #[error("Remote error: {0}")]
    PermanentRemote(RemoteError),

    /// The requested state already holds; callers treat this as success.
    #[error("Already satisfied: {0}")]
    AlreadySatisfied(String),

    /// A bounded wait elapsed before completion.
    #[error("Timeout exceeded for {operation} after {timeout_seconds}s")]
    TimeoutExceeded {
        /// What was being waited on.
        operation: String,
        /// The bound that elapsed.
        timeout_seconds: f64,
    },

    /// A workflow definition failed validation.
    #[error("{0}")]
    Configuration(#[from] WorkflowValidationError),

    /// A lifecycle request or workflow parameter binding was malformed.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// A request id was replayed with different properties.
    #[error("Idempotency conflict for key '{key}': properties differ from the first delivery")]
    IdempotencyConflict {
        /// The idempotency key.
        key: String,
    },

    /// An external signal reported failure.
    #[error("Signal reported failure: {reason}")]
    SignalFailed {
        /// The reason carried by the signal.
        reason: String,
    },

    /// A referenced entity does not exist.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Entity kind (execution, definition, wait token, ...).
        kind: &'static str,
        /// The missing identifier.
        id: String,
    },

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl OrchestratorError {
    /// Creates a not-found error.
    #[must_use]
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// Creates a timeout error.
    #[must_use]
    pub fn timeout(operation: impl Into<String>, timeout_seconds: f64) -> Self {
        Self::TimeoutExceeded {
            operation: operation.into(),
            timeout_seconds,
        }
    }

    /// Returns true if the error only signals that the target state already holds.
    #[must_use]
    pub fn is_already_satisfied(&self) -> bool {
        matches!(self, Self::AlreadySatisfied(_))
    }

    /// Returns true for timeouts.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::TimeoutExceeded { .. })
    }

    /// Returns the remote error when this wraps one.
    #[must_use]
    pub fn remote(&self) -> Option<&RemoteError> {
        match self {
            Self::TransientRemote(e) | Self::PermanentRemote(e) => Some(e),
            _ => None,
        }
    }

    /// Returns true if the wrapped remote error means the target is absent.
    #[must_use]
    pub fn is_remote_not_found(&self) -> bool {
        self.remote().is_some_and(RemoteError::is_not_found)
    }
}

impl From<RemoteError> for OrchestratorError {
    fn from(err: RemoteError) -> Self {
        match err.kind() {
            RemoteErrorKind::Transient => Self::TransientRemote(err),
            RemoteErrorKind::AlreadySatisfied => Self::AlreadySatisfied(err.to_string()),
            RemoteErrorKind::NotFound | RemoteErrorKind::Permanent => Self::PermanentRemote(err),
        }
    }
}

impl From<serde_json::Error> for OrchestratorError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Metadata about a definition error for better diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct ContractErrorInfo {
    /// Error code (e.g., "WORKFLOW-006-CYCLE").
    pub code: String,
    /// Short summary of the error.
    pub summary: String,
    /// Hint for fixing the error.
    pub fix_hint: Option<String>,
    /// Additional context key-value pairs.
    #[serde(default)]
    pub context: HashMap<String, String>,
}

impl ContractErrorInfo {
    /// Creates a new contract error info.
    #[must_use]
    pub fn new(code: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            summary: summary.into(),
            fix_hint: None,
            context: HashMap::new(),
        }
    }

    /// Sets the fix hint.
    #[must_use]
    pub fn with_fix_hint(mut self, hint: impl Into<String>) -> Self {
        self.fix_hint = Some(hint.into());
        self
    }

    /// Adds a single context entry.
    #[must_use]
    pub fn with_context_entry(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Converts to a JSON-friendly map.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();
        map.insert("code".to_string(), serde_json::Value::String(self.code.clone()));
        map.insert("summary".to_string(), serde_json::Value::String(self.summary.clone()));
        if let Some(ref hint) = self.fix_hint {
            map.insert("fix_hint".to_string(), serde_json::Value::String(hint.clone()));
        }
        if !self.context.is_empty() {
            let context: serde_json::Map<String, serde_json::Value> = self
                .context
                .iter()
                .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
                .collect();
            map.insert("context".to_string(), serde_json::Value::Object(context));
        }
        map
    }

    /// Falls back to the default suggestion for the code when no hint was set.
    #[must_use]
    pub fn with_default_hint(self) -> Self {
        if self.fix_hint.is_some() {
            return self;
        }
        match ContractSuggestions::get(&self.code) {
            Some(hint) => self.with_fix_hint(hint),
            None => self,
        }
    }
}

/// Error raised when a workflow definition fails validation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Workflow '{workflow}' is invalid: {message}")]
pub struct WorkflowValidationError {
    /// The workflow definition id.
    pub workflow: String,
    /// The error message.
    pub message: String,
    /// The steps involved in the error.
    pub steps: Vec<String>,
    /// Optional contract error info.
    pub error_info: Option<ContractErrorInfo>,
}

impl WorkflowValidationError {
    /// Creates a new validation error.
    #[must_use]
    pub fn new(workflow: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            workflow: workflow.into(),
            message: message.into(),
            steps: Vec::new(),
            error_info: None,
        }
    }

    /// Sets the steps involved.
    #[must_use]
    pub fn with_steps(mut self, steps: Vec<String>) -> Self {
        self.steps = steps;
        self
    }

    /// Sets the contract error info.
    #[must_use]
    pub fn with_error_info(mut self, info: ContractErrorInfo) -> Self {
        self.error_info = Some(info.with_default_hint());
        self
    }

    /// Converts to a JSON-friendly map.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();
        map.insert("workflow".to_string(), serde_json::json!(self.workflow));
        map.insert("message".to_string(), serde_json::json!(self.message));
        map.insert("steps".to_string(), serde_json::json!(self.steps));
        if let Some(ref info) = self.error_info {
            let info_map: serde_json::Map<String, serde_json::Value> =
                info.to_dict().into_iter().collect();
            map.insert("error_info".to_string(), serde_json::Value::Object(info_map));
        }
        map
    }

    /// Returns the contract code, if any.
    #[must_use]
    pub fn code(&self) -> Option<&str> {
        self.error_info.as_ref().map(|info| info.code.as_str())
    }
}

/// Error raised when the step graph of a definition contains a cycle.
#[derive(Debug, Clone, Error)]
#[error("Cycle detected in workflow: {}", cycle_path.join(" -> "))]
pub struct CycleDetectedError {
    /// The path of steps forming the cycle.
    pub cycle_path: Vec<String>,
}

impl CycleDetectedError {
    /// Creates a new cycle detected error.
    #[must_use]
    pub fn new(cycle_path: Vec<String>) -> Self {
        Self { cycle_path }
    }

    /// Converts into a validation error for the given workflow.
    #[must_use]
    pub fn into_validation_error(self, workflow: &str) -> WorkflowValidationError {
        let info = ContractErrorInfo::new(
            codes::CYCLE,
            format!("Step graph contains a cycle: {}", self.cycle_path.join(" -> ")),
        );
        WorkflowValidationError::new(workflow, self.to_string())
            .with_steps(self.cycle_path)
            .with_error_info(info)
    }
}

/// Contract codes for definition errors.
pub mod codes {
    /// Malformed automation document.
    pub const DOCUMENT: &str = "WORKFLOW-000-DOCUMENT";
    /// Definition has no steps.
    pub const EMPTY: &str = "WORKFLOW-001-EMPTY";
    /// Two steps share a name.
    pub const DUPLICATE: &str = "WORKFLOW-002-DUPLICATE";
    /// A next-step or branch target does not exist.
    pub const DANGLING_TARGET: &str = "WORKFLOW-003-DANGLING_TARGET";
    /// A reference names an unknown parameter or output.
    pub const UNKNOWN_REFERENCE: &str = "WORKFLOW-004-UNKNOWN_REFERENCE";
    /// An invoke or wait step names an unsupported API.
    pub const UNKNOWN_API: &str = "WORKFLOW-005-UNKNOWN_API";
    /// The step graph contains a cycle.
    pub const CYCLE: &str = "WORKFLOW-006-CYCLE";
    /// A delegate step references an unregistered definition.
    pub const UNKNOWN_DEFINITION: &str = "WORKFLOW-007-UNKNOWN_DEFINITION";
}

/// Provides default suggestions for definition error codes.
pub struct ContractSuggestions;

impl ContractSuggestions {
    /// Gets a suggestion for a given error code.
    #[must_use]
    pub fn get(code: &str) -> Option<&'static str> {
        match code {
            codes::CYCLE => Some(
                "Route one of the steps in the cycle to a later step or mark it isEnd.",
            ),
            codes::DANGLING_TARGET => Some(
                "Check nextStep, branch NextStep and Default values for typos in step names.",
            ),
            codes::UNKNOWN_REFERENCE => Some(
                "References must name a declared parameter or an output declared by another step.",
            ),
            codes::EMPTY => Some("Add at least one step to mainSteps."),
            codes::UNKNOWN_DEFINITION => Some(
                "Register the delegated definition before the definition that delegates to it.",
            ),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_error_classification_into_taxonomy() {
        let throttled = OrchestratorError::from(RemoteError::new("ThrottlingException", "slow down"));
        assert!(matches!(throttled, OrchestratorError::TransientRemote(_)));

        let duplicate = OrchestratorError::from(RemoteError::new(
            "DuplicatePolicyAttachmentException",
            "already attached",
        ));
        assert!(duplicate.is_already_satisfied());

        let unknown = OrchestratorError::from(RemoteError::new("SomethingOdd", "?"));
        assert!(matches!(unknown, OrchestratorError::PermanentRemote(_)));

        let missing = OrchestratorError::from(RemoteError::new("PolicyNotFoundException", "gone"));
        assert!(missing.is_remote_not_found());
    }

    #[test]
    fn test_cycle_detected_error() {
        let err = CycleDetectedError::new(vec!["a".into(), "b".into(), "a".into()]);
        assert!(err.to_string().contains("a -> b -> a"));

        let validation = err.into_validation_error("wf");
        assert_eq!(validation.code(), Some(codes::CYCLE));
        assert!(validation.error_info.unwrap().fix_hint.is_some());
    }

    #[test]
    fn test_validation_error_keeps_explicit_hint() {
        let info = ContractErrorInfo::new(codes::EMPTY, "empty").with_fix_hint("custom");
        let err = WorkflowValidationError::new("wf", "no steps").with_error_info(info);
        assert_eq!(err.error_info.unwrap().fix_hint.as_deref(), Some("custom"));
    }

    #[test]
    fn test_validation_error_to_dict() {
        let info = ContractErrorInfo::new(codes::DANGLING_TARGET, "missing step")
            .with_context_entry("target", "Nowhere");
        let err = WorkflowValidationError::new("wf", "dangling")
            .with_steps(vec!["Start".into()])
            .with_error_info(info);

        let dict = err.to_dict();
        assert_eq!(dict["workflow"], serde_json::json!("wf"));
        assert_eq!(dict["steps"], serde_json::json!(["Start"]));
        assert_eq!(dict["error_info"]["code"], serde_json::json!(codes::DANGLING_TARGET));
        assert_eq!(dict["error_info"]["context"]["target"], serde_json::json!("Nowhere"));
    }

    #[test]
    fn test_contract_suggestions() {
        assert!(ContractSuggestions::get(codes::DANGLING_TARGET).is_some());
        assert!(ContractSuggestions::get("UNKNOWN").is_none());
    }
}
