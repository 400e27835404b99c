//! Provisioning context: the provider registry plus declared capability resources.

use super::registry::{HandlerEndpoint, ProviderRegistry, StackRef};
use crate::config::OrchestratorConfig;
use crate::errors::OrchestratorError;
use crate::lifecycle::{CapabilityKind, LifecycleRequest, ATTACH, AUDIT_EMAIL, LOG_ARCHIVE_EMAIL, POLICY};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::debug;

/// A capability resource declared in a stack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityResource {
    /// Owning stack.
    pub stack: StackRef,
    /// Logical id within the stack.
    pub logical_id: String,
    /// Capability requested.
    pub kind: CapabilityKind,
    /// Token of the handler serving this resource.
    pub service_token: String,
    /// Resource properties.
    pub properties: Map<String, Value>,
}

impl CapabilityResource {
    fn stamp(&self, request: LifecycleRequest) -> LifecycleRequest {
        request
            .with_stack_id(self.stack.stack_id())
            .with_service_token(self.service_token.clone())
            .with_resource_type(self.kind.resource_type())
    }

    /// The `Create` event for this resource.
    #[must_use]
    pub fn create_request(&self) -> LifecycleRequest {
        self.stamp(LifecycleRequest::create(
            self.logical_id.clone(),
            Value::Object(self.properties.clone()),
        ))
    }

    /// An `Update` event from `old` properties to the current ones.
    #[must_use]
    pub fn update_request(&self, physical_id: &str, old: Map<String, Value>) -> LifecycleRequest {
        self.stamp(LifecycleRequest::update(
            self.logical_id.clone(),
            physical_id,
            Value::Object(old),
            Value::Object(self.properties.clone()),
        ))
    }

    /// The `Delete` event for this resource.
    #[must_use]
    pub fn delete_request(&self, physical_id: &str) -> LifecycleRequest {
        self.stamp(LifecycleRequest::delete(
            self.logical_id.clone(),
            physical_id,
            Value::Object(self.properties.clone()),
        ))
    }
}

/// State of one synthesis pass: providers and declared resources.
///
/// Passed explicitly to whatever declares capability resources; there is no
/// process-wide registry.
#[derive(Debug)]
pub struct ProvisioningContext {
    config: Arc<OrchestratorConfig>,
    registry: ProviderRegistry,
    resources: Mutex<Vec<CapabilityResource>>,
}

impl ProvisioningContext {
    /// Creates an empty context.
    #[must_use]
    pub fn new(config: Arc<OrchestratorConfig>) -> Self {
        let registry = ProviderRegistry::new(config.resource_prefix.clone(), config.partition.clone());
        Self {
            config,
            registry,
            resources: Mutex::new(Vec::new()),
        }
    }

    /// The orchestrator configuration.
    #[must_use]
    pub fn config(&self) -> &Arc<OrchestratorConfig> {
        &self.config
    }

    /// The provider registry.
    #[must_use]
    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    /// Resolves the singleton provider for (stack, kind).
    pub fn provider(&self, stack: &StackRef, kind: CapabilityKind) -> Arc<HandlerEndpoint> {
        self.registry.get_or_create(stack, kind)
    }

    /// Declares a capability resource, resolving its provider.
    ///
    /// # Errors
    ///
    /// Returns `InvalidRequest` if the logical id is already used in the stack
    /// or the properties are not an object.
    pub fn declare_resource(
        &self,
        stack: &StackRef,
        kind: CapabilityKind,
        logical_id: &str,
        properties: Value,
    ) -> Result<CapabilityResource, OrchestratorError> {
        let Value::Object(properties) = properties else {
            return Err(OrchestratorError::InvalidRequest(format!(
                "properties of {logical_id} must be an object"
            )));
        };
        let mut resources = self.resources.lock();
        if resources
            .iter()
            .any(|r| r.stack == *stack && r.logical_id == logical_id)
        {
            return Err(OrchestratorError::InvalidRequest(format!(
                "logical id {logical_id} is already declared in stack {}",
                stack.name
            )));
        }

        let endpoint = self.registry.get_or_create(stack, kind);
        let resource = CapabilityResource {
            stack: stack.clone(),
            logical_id: logical_id.to_string(),
            kind,
            service_token: endpoint.service_token.clone(),
            properties,
        };
        debug!(stack = %stack.name, logical_id, kind = %kind, "Declared capability resource");
        resources.push(resource.clone());
        Ok(resource)
    }

    /// Declares a service-control policy, attached by default.
    ///
    /// # Errors
    ///
    /// See [`Self::declare_resource`].
    pub fn enable_scp(
        &self,
        stack: &StackRef,
        logical_id: &str,
        policy: &str,
        attach: bool,
    ) -> Result<CapabilityResource, OrchestratorError> {
        self.declare_resource(
            stack,
            CapabilityKind::EnableScp,
            logical_id,
            json!({ POLICY: policy, ATTACH: attach }),
        )
    }

    /// Declares the landing zone.
    ///
    /// # Errors
    ///
    /// See [`Self::declare_resource`].
    pub fn enable_control_tower(
        &self,
        stack: &StackRef,
        logical_id: &str,
        log_archive_email: &str,
        audit_email: &str,
    ) -> Result<CapabilityResource, OrchestratorError> {
        self.declare_resource(
            stack,
            CapabilityKind::EnableControlTower,
            logical_id,
            json!({ LOG_ARCHIVE_EMAIL: log_archive_email, AUDIT_EMAIL: audit_email }),
        )
    }

    /// Resources declared so far.
    #[must_use]
    pub fn resources(&self) -> Vec<CapabilityResource> {
        self.resources.lock().clone()
    }
}
