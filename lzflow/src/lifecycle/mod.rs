//! Lifecycle event handling for capability resources.
//!
//! The declarative layer delivers `Create`, `Update` and `Delete` events at
//! least once. A [`LifecycleEventHandler`] answers each of them exactly once
//! per distinct request and delegates the remote work to a
//! [`CapabilityHandler`].

mod control_tower;
mod event;
mod handler;
#[cfg(test)]
mod handler_tests;
mod idempotency;
mod kind;
mod scp;

pub use control_tower::{EnableControlTowerHandler, AUDIT_EMAIL, LOG_ARCHIVE_EMAIL};
pub use event::{bool_property, LifecycleRequest, LifecycleResponse, RequestType, ResponseStatus};
pub use handler::{CapabilityHandler, HandlerContext, HandlerOutcome, LifecycleEventHandler, UpdateKind};
pub use idempotency::{
    lookup, properties_hash, request_key, CacheLookup, CachedResponse, InMemoryResponseCache, ResponseCache,
};
pub use kind::CapabilityKind;
pub use scp::{EnableScpHandler, ATTACH, POLICY, POLICY_NAME};

use std::sync::Arc;

/// Returns the built-in handler for `kind`.
#[must_use]
pub fn builtin_handler(kind: CapabilityKind) -> Arc<dyn CapabilityHandler> {
    match kind {
        CapabilityKind::EnableScp => Arc::new(EnableScpHandler::new()),
        CapabilityKind::EnableControlTower => Arc::new(EnableControlTowerHandler::new()),
    }
}
