//! The remote operation client seam.

use super::error::RemoteError;
use super::operation::RemoteOperation;
use super::session::{CrossAccountDelegation, Session};
use async_trait::async_trait;
use serde_json::Value;

/// Performs organization and security operations on the remote API.
///
/// Implementations own credentials and transport. The orchestrator only sees
/// typed requests, JSON responses and coded errors.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RemoteClient: Send + Sync {
    /// Executes one operation under `session`.
    async fn call(&self, session: &Session, operation: &RemoteOperation) -> Result<Value, RemoteError>;

    /// Assumes the execution role described by `delegation`.
    async fn assume_role(&self, delegation: &CrossAccountDelegation) -> Result<Session, RemoteError>;

    /// Releases an assumed session. Calls under a released session must fail.
    async fn release(&self, session: &Session);
}
