//! Provider registration and lifecycle routing.
//!
//! Each (stack, capability kind) gets exactly one handler endpoint per
//! synthesis pass. Declared capability resources carry that endpoint's
//! service token, and the router delivers lifecycle requests by token.

mod context;
mod registry;
mod router;

pub use context::{CapabilityResource, ProvisioningContext};
pub use registry::{HandlerEndpoint, ProviderRegistry, StackRef};
pub use router::LifecycleRouter;
