//! Routes lifecycle requests to handler instances by service token.

use super::context::ProvisioningContext;
use crate::config::OrchestratorConfig;
use crate::errors::OrchestratorError;
use crate::events::{EventSink, NoOpEventSink};
use crate::lifecycle::{
    builtin_handler, InMemoryResponseCache, LifecycleEventHandler, LifecycleRequest, LifecycleResponse,
    ResponseCache,
};
use crate::remote::RemoteClient;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

/// One handler instance per registered endpoint.
#[derive(Debug)]
pub struct LifecycleRouter {
    handlers: HashMap<String, Arc<LifecycleEventHandler>>,
}

impl LifecycleRouter {
    /// Builds handlers for every endpoint in `ctx`, sharing one response
    /// cache and event sink.
    #[must_use]
    pub fn from_context(
        ctx: &ProvisioningContext,
        client: Arc<dyn RemoteClient>,
        cache: Arc<dyn ResponseCache>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        let config: Arc<OrchestratorConfig> = ctx.config().clone();
        let handlers = ctx
            .registry()
            .endpoints()
            .into_iter()
            .map(|endpoint| {
                let handler = LifecycleEventHandler::new(builtin_handler(endpoint.kind), client.clone(), config.clone())
                    .with_cache(cache.clone())
                    .with_sink(sink.clone());
                (endpoint.service_token.clone(), Arc::new(handler))
            })
            .collect();
        Self { handlers }
    }

    /// Builds handlers with an in-memory cache and no event sink.
    #[must_use]
    pub fn in_memory(ctx: &ProvisioningContext, client: Arc<dyn RemoteClient>) -> Self {
        Self::from_context(
            ctx,
            client,
            Arc::new(InMemoryResponseCache::new()),
            Arc::new(NoOpEventSink),
        )
    }

    /// The handler behind `service_token`.
    #[must_use]
    pub fn handler(&self, service_token: &str) -> Option<&Arc<LifecycleEventHandler>> {
        self.handlers.get(service_token)
    }

    /// Number of routed handlers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Returns true if nothing is routed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Delivers `request` to its handler. Unknown tokens and mismatched
    /// resource types yield a `FAILED` response.
    pub async fn route(&self, request: LifecycleRequest) -> LifecycleResponse {
        let Some(handler) = self.handlers.get(&request.service_token) else {
            let err = OrchestratorError::not_found("service token", request.service_token.clone());
            warn!(error = %err, logical_id = %request.logical_resource_id, "Unroutable lifecycle request");
            return LifecycleResponse::failure(&request, err.to_string());
        };
        let expected = handler.kind().resource_type();
        if !request.resource_type.is_empty() && request.resource_type != expected {
            let err = OrchestratorError::InvalidRequest(format!(
                "resource type {} does not match handler for {expected}",
                request.resource_type
            ));
            warn!(error = %err, "Rejecting lifecycle request");
            return LifecycleResponse::failure(&request, err.to_string());
        }
        handler.handle(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::StackRef;
    use crate::testing::{assert_response_failed, assert_response_success, InMemoryOrganization, ROOT_ID};
    use serde_json::json;

    const DOC: &str = r#"{"Version":"2012-10-17","Statement":[]}"#;

    #[tokio::test]
    async fn test_routes_by_service_token() {
        let ctx = ProvisioningContext::new(Arc::new(OrchestratorConfig::default()));
        let stack = StackRef::new("main", "111111111111", "us-east-1");
        let scp = ctx.enable_scp(&stack, "SCPBaseline", DOC, true).unwrap();
        let ct = ctx
            .enable_control_tower(&stack, "EnableControltower", "log@x", "audit@x")
            .unwrap();
        let org = Arc::new(InMemoryOrganization::new("111111111111"));
        let router = LifecycleRouter::in_memory(&ctx, org.clone());

        assert_eq!(router.len(), 2);
        let scp_response = router.route(scp.create_request()).await;
        assert_response_success(&scp_response);
        assert!(org.is_attached(&scp_response.physical_resource_id, ROOT_ID));

        let ct_response = router.route(ct.create_request()).await;
        assert_response_success(&ct_response);
        assert_eq!(ct_response.physical_resource_id, "controltower-us-east-1");
    }

    #[tokio::test]
    async fn test_unknown_token_fails() {
        let ctx = ProvisioningContext::new(Arc::new(OrchestratorConfig::default()));
        let router = LifecycleRouter::in_memory(&ctx, Arc::new(InMemoryOrganization::new("1")));

        let response = router
            .route(LifecycleRequest::create("X", json!({})).with_service_token("arn:nowhere"))
            .await;
        assert_response_failed(&response, "service token not found");
    }

    #[tokio::test]
    async fn test_mismatched_resource_type_fails() {
        let ctx = ProvisioningContext::new(Arc::new(OrchestratorConfig::default()));
        let stack = StackRef::new("main", "111111111111", "us-east-1");
        let scp = ctx.enable_scp(&stack, "SCPBaseline", DOC, true).unwrap();
        let router = LifecycleRouter::in_memory(&ctx, Arc::new(InMemoryOrganization::new("1")));

        let request = scp.create_request().with_resource_type("Custom::EnableControltower");
        assert_response_failed(&router.route(request).await, "does not match");
    }
}
