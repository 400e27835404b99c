//! Singleton handler endpoints per (stack, capability kind).

use crate::lifecycle::CapabilityKind;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

const MAX_NAME_LEN: usize = 64;

/// Identity of a stack within one synthesis pass.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StackRef {
    /// Stack name, unique within the pass.
    pub name: String,
    /// Account the stack deploys into.
    pub account_id: String,
    /// Region the stack deploys into.
    pub region: String,
}

impl StackRef {
    /// Creates a stack reference.
    #[must_use]
    pub fn new(name: impl Into<String>, account_id: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            account_id: account_id.into(),
            region: region.into(),
        }
    }

    /// Stack id carried by lifecycle requests.
    #[must_use]
    pub fn stack_id(&self) -> String {
        format!("{}/{}/{}", self.account_id, self.region, self.name)
    }
}

/// Compute and identity descriptor of one handler instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandlerEndpoint {
    /// Capability served.
    pub kind: CapabilityKind,
    /// Owning stack.
    pub stack: StackRef,
    /// Stable construct id of the provider within the stack.
    pub construct_id: String,
    /// Name of the handler function.
    pub function_name: String,
    /// Name of the handler's execution role.
    pub role_name: String,
    /// Token lifecycle requests carry to reach this handler.
    pub service_token: String,
}

/// Turns `raw` into a resource name of at most 64 characters. Long names keep
/// a prefix and get a hash suffix so they stay unique.
fn resource_name(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '-' })
        .collect();
    if cleaned.len() <= MAX_NAME_LEN {
        return cleaned;
    }
    let digest = hex::encode(&Sha256::digest(cleaned.as_bytes())[..4]);
    format!("{}-{digest}", &cleaned[..MAX_NAME_LEN - digest.len() - 1])
}

/// Memoizes handler endpoints by (stack, kind).
///
/// Lives for one synthesis pass; endpoints are never removed.
#[derive(Debug)]
pub struct ProviderRegistry {
    prefix: String,
    partition: String,
    endpoints: Mutex<HashMap<(String, CapabilityKind), Arc<HandlerEndpoint>>>,
}

impl ProviderRegistry {
    /// Creates an empty registry naming resources with `prefix`.
    #[must_use]
    pub fn new(prefix: impl Into<String>, partition: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            partition: partition.into(),
            endpoints: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the endpoint for (stack, kind), creating it on first use.
    /// Later calls return the identical `Arc`.
    pub fn get_or_create(&self, stack: &StackRef, kind: CapabilityKind) -> Arc<HandlerEndpoint> {
        let mut endpoints = self.endpoints.lock();
        endpoints
            .entry((stack.name.clone(), kind))
            .or_insert_with(|| {
                let endpoint = Arc::new(self.build(stack, kind));
                info!(
                    stack = %stack.name,
                    kind = %kind,
                    function = %endpoint.function_name,
                    "Created provider"
                );
                endpoint
            })
            .clone()
    }

    /// Looks up an existing endpoint.
    #[must_use]
    pub fn get(&self, stack: &StackRef, kind: CapabilityKind) -> Option<Arc<HandlerEndpoint>> {
        self.endpoints.lock().get(&(stack.name.clone(), kind)).cloned()
    }

    /// All endpoints created so far.
    #[must_use]
    pub fn endpoints(&self) -> Vec<Arc<HandlerEndpoint>> {
        self.endpoints.lock().values().cloned().collect()
    }

    /// Number of endpoints.
    #[must_use]
    pub fn len(&self) -> usize {
        self.endpoints.lock().len()
    }

    /// Returns true if no endpoint was created.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.endpoints.lock().is_empty()
    }

    fn build(&self, stack: &StackRef, kind: CapabilityKind) -> HandlerEndpoint {
        let construct_id = kind.provider_id().to_string();
        let function_name = resource_name(&format!("{}-{}-{}", self.prefix, stack.name, construct_id));
        let role_name = resource_name(&format!("{function_name}-role"));
        let service_token = format!(
            "arn:{}:lambda:{}:{}:function:{function_name}",
            self.partition, stack.region, stack.account_id
        );
        HandlerEndpoint {
            kind,
            stack: stack.clone(),
            construct_id,
            function_name,
            role_name,
            service_token,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn stack(name: &str) -> StackRef {
        StackRef::new(name, "111111111111", "eu-west-1")
    }

    #[test]
    fn test_get_or_create_is_memoized() {
        let registry = ProviderRegistry::new("superwerker", "aws");
        let a = registry.get_or_create(&stack("main"), CapabilityKind::EnableScp);
        let b = registry.get_or_create(&stack("main"), CapabilityKind::EnableScp);

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len(), 1);
        assert_eq!(a.construct_id, "superwerker.attach-scp");
        assert!(a.service_token.starts_with("arn:aws:lambda:eu-west-1:111111111111:function:"));
    }

    #[test]
    fn test_distinct_kinds_and_stacks() {
        let registry = ProviderRegistry::new("superwerker", "aws");
        let scp = registry.get_or_create(&stack("main"), CapabilityKind::EnableScp);
        let ct = registry.get_or_create(&stack("main"), CapabilityKind::EnableControlTower);
        let other = registry.get_or_create(&stack("other"), CapabilityKind::EnableScp);

        assert_ne!(scp.service_token, ct.service_token);
        assert_ne!(scp.service_token, other.service_token);
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn test_concurrent_get_or_create_yields_one_endpoint() {
        let registry = Arc::new(ProviderRegistry::new("superwerker", "aws"));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                thread::spawn(move || registry.get_or_create(&stack("main"), CapabilityKind::EnableScp))
            })
            .collect();
        let endpoints: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert!(endpoints.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_resource_name_is_bounded() {
        let long = "x".repeat(100);
        let name = resource_name(&format!("superwerker-{long}"));
        assert_eq!(name.len(), MAX_NAME_LEN);
        assert_ne!(name, resource_name(&format!("superwerker-{long}y")));
        assert_eq!(resource_name("a.b c"), "a-b-c");
    }
}
