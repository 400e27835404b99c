//! Wait signal records and the signal payload contract.

use crate::utils::{deadline_after, format_timestamp, iso_timestamp, Timestamp};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use uuid::Uuid;

/// Opaque handle an external process uses to signal completion.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WaitToken(String);

impl WaitToken {
    /// Generates a fresh token.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    /// Returns the token text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for WaitToken {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl std::fmt::Display for WaitToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// State of a wait signal. Only `Pending` may change, and only once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum WaitState {
    /// No signal yet.
    Pending,
    /// A success signal was consumed.
    Succeeded,
    /// A failure signal was consumed.
    Failed {
        /// Reason carried by the signal.
        reason: String,
    },
    /// The deadline passed first.
    Expired,
}

impl WaitState {
    /// Returns true once the state can no longer change.
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// Status carried by a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignalStatus {
    /// The awaited process finished.
    Success,
    /// The awaited process failed.
    Failure,
}

/// Body of an external signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SignalPayload {
    /// Success or failure.
    pub status: SignalStatus,
    /// Free-form reason.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Optional data handed back to the waiter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl SignalPayload {
    /// A success signal.
    #[must_use]
    pub fn success() -> Self {
        Self {
            status: SignalStatus::Success,
            reason: None,
            data: None,
        }
    }

    /// A failure signal with a reason.
    #[must_use]
    pub fn failure(reason: impl Into<String>) -> Self {
        Self {
            status: SignalStatus::Failure,
            reason: Some(reason.into()),
            data: None,
        }
    }

    /// Attaches data.
    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// The state this payload resolves a pending signal to.
    #[must_use]
    pub fn resolved_state(&self) -> WaitState {
        match self.status {
            SignalStatus::Success => WaitState::Succeeded,
            SignalStatus::Failure => WaitState::Failed {
                reason: self.reason.clone().unwrap_or_else(|| "failure signaled".to_string()),
            },
        }
    }
}

/// Persisted wait signal record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaitSignal {
    /// Token.
    pub token: WaitToken,
    /// Timeout the token was created with.
    pub timeout_seconds: f64,
    /// Creation time.
    pub created_at: String,
    /// Wall-clock deadline.
    pub deadline: Timestamp,
    /// Current state.
    pub state: WaitState,
    /// Data from the consumed signal.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// When the state was resolved.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<String>,
}

impl WaitSignal {
    /// Creates a pending record.
    #[must_use]
    pub fn pending(token: WaitToken, timeout: Duration) -> Self {
        Self {
            token,
            timeout_seconds: timeout.as_secs_f64(),
            created_at: iso_timestamp(),
            deadline: deadline_after(timeout),
            state: WaitState::Pending,
            data: None,
            resolved_at: None,
        }
    }

    /// Returns the deadline formatted like other record timestamps.
    #[must_use]
    pub fn deadline_iso(&self) -> String {
        format_timestamp(&self.deadline)
    }
}
