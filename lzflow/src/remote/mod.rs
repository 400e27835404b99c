//! Remote operation client boundary.
//!
//! The orchestrator never talks to the account-management API directly. It
//! builds typed [`RemoteOperation`]s and hands them to a [`RemoteClient`]
//! under a [`Session`]. Errors come back as coded [`RemoteError`]s whose
//! classification drives retry and short-circuit behavior.

mod client;
mod error;
mod operation;
mod selector;
mod session;

#[cfg(test)]
pub use client::MockRemoteClient;
pub use client::RemoteClient;
pub use error::{classify_code, RemoteError, RemoteErrorKind};
pub use operation::{
    AccountDetail, AutomationFilter, LandingZoneStatusResponse, ListPoliciesResponse,
    ListRootsResponse, Policy, PolicyResponse, PolicySummary, RemoteOperation, Root,
    TargetLocation, SECURITY_HUB_PRINCIPAL,
};
pub use selector::{Selector, SelectorError};
pub use session::{with_assumed_session, CrossAccountDelegation, Session};
