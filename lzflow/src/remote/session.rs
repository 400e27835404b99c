//! Cross-account sessions and scoped delegation.

use super::client::RemoteClient;
use crate::errors::OrchestratorError;
use crate::retry::{retry_transient, RetryConfig};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

/// Release is bounded so a hung remote cannot stall the caller.
const RELEASE_TIMEOUT: Duration = Duration::from_secs(30);

/// Where a delegated operation runs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CrossAccountDelegation {
    /// Target account id.
    pub account_id: String,
    /// Execution role assumed in the target account.
    pub role_name: String,
    /// Target region.
    pub region: String,
}

impl CrossAccountDelegation {
    /// Creates a new delegation target.
    #[must_use]
    pub fn new(
        account_id: impl Into<String>,
        role_name: impl Into<String>,
        region: impl Into<String>,
    ) -> Self {
        Self {
            account_id: account_id.into(),
            role_name: role_name.into(),
            region: region.into(),
        }
    }

    /// Returns the ARN of the execution role.
    #[must_use]
    pub fn role_arn(&self, partition: &str) -> String {
        format!("arn:{partition}:iam::{}:role/{}", self.account_id, self.role_name)
    }
}

/// Credentials context a remote call runs under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Session {
    /// The orchestrator's own account.
    Home,
    /// A role assumed in another account.
    Assumed {
        /// Unique id of this session.
        session_id: Uuid,
        /// What was assumed.
        delegation: CrossAccountDelegation,
    },
}

impl Session {
    /// Creates a fresh assumed session.
    #[must_use]
    pub fn assumed(delegation: CrossAccountDelegation) -> Self {
        Self::Assumed {
            session_id: Uuid::new_v4(),
            delegation,
        }
    }

    /// Returns the delegated account, if any.
    #[must_use]
    pub fn account_id(&self) -> Option<&str> {
        match self {
            Self::Home => None,
            Self::Assumed { delegation, .. } => Some(&delegation.account_id),
        }
    }

    /// Returns the session id of an assumed session.
    #[must_use]
    pub fn session_id(&self) -> Option<Uuid> {
        match self {
            Self::Home => None,
            Self::Assumed { session_id, .. } => Some(*session_id),
        }
    }
}

impl std::fmt::Display for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Home => write!(f, "home"),
            Self::Assumed {
                session_id,
                delegation,
            } => write!(
                f,
                "{}/{}@{} ({session_id})",
                delegation.account_id, delegation.role_name, delegation.region
            ),
        }
    }
}

/// Assumes the delegation, runs `operation` under the session and releases
/// the session afterwards, also when the operation fails or panics.
///
/// # Errors
///
/// Returns the assume-role failure, or whatever `operation` returns.
pub async fn with_assumed_session<T, F, Fut>(
    client: &dyn RemoteClient,
    delegation: &CrossAccountDelegation,
    retry: &RetryConfig,
    operation: F,
) -> Result<T, OrchestratorError>
where
    F: FnOnce(Session) -> Fut,
    Fut: Future<Output = Result<T, OrchestratorError>>,
{
    let session = retry_transient(retry, "AssumeRole", || client.assume_role(delegation))
        .await
        .map_err(OrchestratorError::from)?;
    debug!(session = %session, "Assumed cross-account session");

    let outcome = AssertUnwindSafe(operation(session.clone()))
        .catch_unwind()
        .await;

    if tokio::time::timeout(RELEASE_TIMEOUT, client.release(&session))
        .await
        .is_err()
    {
        warn!(session = %session, "Session release timed out");
    } else {
        debug!(session = %session, "Released cross-account session");
    }

    match outcome {
        Ok(result) => result,
        Err(panic) => std::panic::resume_unwind(panic),
    }
}
