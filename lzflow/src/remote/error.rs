//! Remote error codes and their classification.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// How the orchestrator reacts to a remote error code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteErrorKind {
    /// Throttling or availability problem; retry with backoff.
    Transient,
    /// Fail immediately.
    Permanent,
    /// The requested state already holds.
    AlreadySatisfied,
    /// The target does not exist.
    NotFound,
}

impl std::fmt::Display for RemoteErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Transient => "transient",
            Self::Permanent => "permanent",
            Self::AlreadySatisfied => "already_satisfied",
            Self::NotFound => "not_found",
        };
        write!(f, "{s}")
    }
}

const TRANSIENT_CODES: &[&str] = &[
    "ThrottlingException",
    "Throttling",
    "TooManyRequestsException",
    "TooManyRequests",
    "RequestLimitExceeded",
    "ConcurrentModificationException",
    "ServiceUnavailableException",
    "ServiceUnavailable",
    "InternalServerException",
    "InternalServerError",
    "InternalFailure",
    "ServiceException",
    "RequestTimeout",
    "RequestTimeoutException",
];

const ALREADY_SATISFIED_CODES: &[&str] = &[
    "DuplicatePolicyAttachmentException",
    "DuplicatePolicyException",
    "DuplicateAccountException",
    "AccountAlreadyRegisteredException",
    "ResourceConflictException",
    "AlreadyExistsException",
];

const NOT_FOUND_CODES: &[&str] = &[
    "PolicyNotFoundException",
    "PolicyNotAttachedException",
    "AccountNotFoundException",
    "TargetNotFoundException",
    "ResourceNotFoundException",
    "AutomationExecutionNotFoundException",
];

/// Classifies a remote error code.
#[must_use]
pub fn classify_code(code: &str) -> RemoteErrorKind {
    if TRANSIENT_CODES.contains(&code) {
        RemoteErrorKind::Transient
    } else if ALREADY_SATISFIED_CODES.contains(&code) {
        RemoteErrorKind::AlreadySatisfied
    } else if NOT_FOUND_CODES.contains(&code) {
        RemoteErrorKind::NotFound
    } else {
        RemoteErrorKind::Permanent
    }
}

/// An error returned by the remote account-management API.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
#[error("{code}: {message}")]
#[serde(rename_all = "PascalCase")]
pub struct RemoteError {
    /// The service error code, e.g. `ThrottlingException`.
    pub code: String,
    /// Human readable message.
    pub message: String,
}

impl RemoteError {
    /// Creates a new remote error.
    #[must_use]
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Returns the classification of this error's code.
    #[must_use]
    pub fn kind(&self) -> RemoteErrorKind {
        classify_code(&self.code)
    }

    /// Returns true if the call may succeed when retried.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        self.kind() == RemoteErrorKind::Transient
    }

    /// Returns true if the target does not exist.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        self.kind() == RemoteErrorKind::NotFound
    }

    /// Returns true if the target state already holds.
    #[must_use]
    pub fn is_already_satisfied(&self) -> bool {
        self.kind() == RemoteErrorKind::AlreadySatisfied
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_code() {
        assert_eq!(classify_code("ThrottlingException"), RemoteErrorKind::Transient);
        assert_eq!(
            classify_code("ConcurrentModificationException"),
            RemoteErrorKind::Transient
        );
        assert_eq!(
            classify_code("DuplicatePolicyAttachmentException"),
            RemoteErrorKind::AlreadySatisfied
        );
        assert_eq!(classify_code("PolicyNotAttachedException"), RemoteErrorKind::NotFound);
        assert_eq!(classify_code("AccessDeniedException"), RemoteErrorKind::Permanent);
        assert_eq!(classify_code(""), RemoteErrorKind::Permanent);
    }

    #[test]
    fn test_remote_error_display_and_wire_shape() {
        let err = RemoteError::new("AccessDeniedException", "not allowed");
        assert_eq!(err.to_string(), "AccessDeniedException: not allowed");

        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["Code"], "AccessDeniedException");
        assert_eq!(json["Message"], "not allowed");
    }
}
