//! Service-control policy capability.
//!
//! Keeps one named policy in sync with the `Policy` property and attached to
//! the organization root while `Attach` is true. Every step reads remote state
//! first, so a retried create with a fresh request id finds the policy and
//! the attachment already in place and makes no mutating calls.

use super::event::{bool_property, LifecycleRequest};
use super::handler::{CapabilityHandler, HandlerContext, HandlerOutcome, UpdateKind};
use super::kind::CapabilityKind;
use crate::errors::OrchestratorError;
use crate::remote::{ListPoliciesResponse, ListRootsResponse, PolicyResponse, PolicySummary, RemoteOperation};
use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::{debug, info};

/// Property holding the policy document.
pub const POLICY: &str = "Policy";
/// Property controlling the root attachment.
pub const ATTACH: &str = "Attach";
/// Optional property naming the policy.
pub const POLICY_NAME: &str = "PolicyName";

const SCP_TYPE: &str = "SERVICE_CONTROL_POLICY";

#[derive(Debug, Clone, PartialEq)]
struct ScpProperties {
    name: String,
    content: String,
    attach: bool,
}

impl ScpProperties {
    fn parse(request: &LifecycleRequest, prefix: &str) -> Result<Self, OrchestratorError> {
        let content = request.required_str(POLICY)?.to_string();
        if let Err(e) = serde_json::from_str::<Value>(&content) {
            return Err(OrchestratorError::InvalidRequest(format!(
                "property {POLICY} of {} is not a JSON document: {e}",
                request.logical_resource_id
            )));
        }
        let name = request
            .optional_str(POLICY_NAME)
            .map_or_else(|| format!("{prefix}-{}", request.logical_resource_id), str::to_string);
        Ok(Self {
            name,
            content,
            attach: bool_property(&request.resource_properties, ATTACH, true)?,
        })
    }
}

fn explicit_name(properties: &Map<String, Value>) -> Option<&str> {
    properties.get(POLICY_NAME).and_then(Value::as_str)
}

/// Compares policy documents by their parsed JSON, not their text.
fn same_document(a: &str, b: &str) -> bool {
    match (serde_json::from_str::<Value>(a), serde_json::from_str::<Value>(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

/// Handler for `Custom::EnableSCP`.
#[derive(Debug, Default, Clone, Copy)]
pub struct EnableScpHandler;

impl EnableScpHandler {
    /// Creates the handler.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    async fn root_id(ctx: &HandlerContext) -> Result<String, OrchestratorError> {
        let roots: ListRootsResponse = ctx.call_typed(RemoteOperation::ListRoots).await?;
        roots
            .roots
            .into_iter()
            .next()
            .map(|r| r.id)
            .ok_or_else(|| OrchestratorError::not_found("root", "organization"))
    }

    async fn find_policy(ctx: &HandlerContext, name: &str) -> Result<Option<PolicySummary>, OrchestratorError> {
        let list: ListPoliciesResponse = ctx
            .call_typed(RemoteOperation::ListPolicies {
                filter: SCP_TYPE.to_string(),
            })
            .await?;
        Ok(list.policies.into_iter().find(|p| p.name == name))
    }

    /// Rewrites the policy content when it differs. Returns false if the
    /// policy no longer exists.
    async fn sync_content(
        ctx: &HandlerContext,
        policy_id: &str,
        content: &str,
    ) -> Result<bool, OrchestratorError> {
        let described = ctx
            .call_typed::<PolicyResponse>(RemoteOperation::DescribePolicy {
                policy_id: policy_id.to_string(),
            })
            .await;
        let current = match described {
            Ok(response) => response.policy.content,
            Err(e) if e.is_remote_not_found() => return Ok(false),
            Err(e) => return Err(e),
        };
        if same_document(&current, content) {
            debug!(policy_id, "Policy content unchanged");
        } else {
            ctx.call(RemoteOperation::UpdatePolicy {
                policy_id: policy_id.to_string(),
                content: content.to_string(),
            })
            .await?;
            info!(policy_id, "Updated policy content");
        }
        Ok(true)
    }

    /// Finds or creates the policy and brings its content up to date.
    async fn ensure_policy(ctx: &HandlerContext, props: &ScpProperties) -> Result<String, OrchestratorError> {
        if let Some(existing) = Self::find_policy(ctx, &props.name).await? {
            if Self::sync_content(ctx, &existing.id, &props.content).await? {
                return Ok(existing.id);
            }
        }

        let created = ctx
            .call_typed::<PolicyResponse>(RemoteOperation::CreatePolicy {
                name: props.name.clone(),
                description: format!("Managed service-control policy {}", props.name),
                content: props.content.clone(),
                policy_type: SCP_TYPE.to_string(),
            })
            .await;
        match created {
            Ok(response) => {
                let id = response.policy.policy_summary.id;
                info!(policy_id = %id, name = %props.name, "Created policy");
                Ok(id)
            }
            // Created concurrently between the lookup and the create.
            Err(e) if e.is_already_satisfied() => {
                let existing = Self::find_policy(ctx, &props.name)
                    .await?
                    .ok_or_else(|| OrchestratorError::not_found("policy", props.name.clone()))?;
                Self::sync_content(ctx, &existing.id, &props.content).await?;
                Ok(existing.id)
            }
            Err(e) => Err(e),
        }
    }

    async fn is_attached(ctx: &HandlerContext, policy_id: &str, root: &str) -> Result<bool, OrchestratorError> {
        let list: ListPoliciesResponse = ctx
            .call_typed(RemoteOperation::ListPoliciesForTarget {
                target_id: root.to_string(),
                filter: SCP_TYPE.to_string(),
            })
            .await?;
        Ok(list.policies.iter().any(|p| p.id == policy_id))
    }

    async fn attach(ctx: &HandlerContext, policy_id: &str, root: &str) -> Result<(), OrchestratorError> {
        if Self::is_attached(ctx, policy_id, root).await? {
            debug!(policy_id, root, "Policy already attached");
            return Ok(());
        }
        match ctx
            .call(RemoteOperation::AttachPolicy {
                policy_id: policy_id.to_string(),
                target_id: root.to_string(),
            })
            .await
        {
            Ok(_) => {
                info!(policy_id, root, "Attached policy");
                Ok(())
            }
            Err(e) if e.is_already_satisfied() => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn detach(ctx: &HandlerContext, policy_id: &str, root: &str) -> Result<(), OrchestratorError> {
        if !Self::is_attached(ctx, policy_id, root).await? {
            debug!(policy_id, root, "Policy not attached");
            return Ok(());
        }
        match ctx
            .call(RemoteOperation::DetachPolicy {
                policy_id: policy_id.to_string(),
                target_id: root.to_string(),
            })
            .await
        {
            Ok(_) => {
                info!(policy_id, root, "Detached policy");
                Ok(())
            }
            Err(e) if e.is_remote_not_found() => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn apply(
        ctx: &HandlerContext,
        props: &ScpProperties,
        policy_id: String,
    ) -> Result<HandlerOutcome, OrchestratorError> {
        let root = Self::root_id(ctx).await?;
        if props.attach {
            Self::attach(ctx, &policy_id, &root).await?;
        } else {
            Self::detach(ctx, &policy_id, &root).await?;
        }
        Ok(outcome(policy_id, props.attach))
    }
}

fn outcome(policy_id: String, attached: bool) -> HandlerOutcome {
    HandlerOutcome::new(policy_id.clone())
        .with_data("PolicyId", policy_id)
        .with_data("Attached", attached)
}

#[async_trait]
impl CapabilityHandler for EnableScpHandler {
    fn kind(&self) -> CapabilityKind {
        CapabilityKind::EnableScp
    }

    fn classify_update(&self, request: &LifecycleRequest) -> Result<UpdateKind, OrchestratorError> {
        let Some(old) = &request.old_resource_properties else {
            return Ok(UpdateKind::InPlace);
        };
        if *old == request.resource_properties {
            return Ok(UpdateKind::NoOp);
        }
        if explicit_name(old) != explicit_name(&request.resource_properties) {
            return Ok(UpdateKind::Replacement);
        }
        Ok(UpdateKind::InPlace)
    }

    async fn create(
        &self,
        ctx: &HandlerContext,
        request: &LifecycleRequest,
    ) -> Result<HandlerOutcome, OrchestratorError> {
        let props = ScpProperties::parse(request, &ctx.config().resource_prefix)?;
        let policy_id = Self::ensure_policy(ctx, &props).await?;
        Self::apply(ctx, &props, policy_id).await
    }

    async fn update(
        &self,
        ctx: &HandlerContext,
        request: &LifecycleRequest,
        kind: UpdateKind,
    ) -> Result<HandlerOutcome, OrchestratorError> {
        let props = ScpProperties::parse(request, &ctx.config().resource_prefix)?;
        match (kind, request.physical_resource_id.as_deref()) {
            (UpdateKind::NoOp, Some(physical)) => Ok(outcome(physical.to_string(), props.attach)),
            (UpdateKind::InPlace, Some(physical)) => {
                let policy_id = if Self::sync_content(ctx, physical, &props.content).await? {
                    physical.to_string()
                } else {
                    Self::ensure_policy(ctx, &props).await?
                };
                Self::apply(ctx, &props, policy_id).await
            }
            _ => self.create(ctx, request).await,
        }
    }

    async fn delete(
        &self,
        ctx: &HandlerContext,
        request: &LifecycleRequest,
    ) -> Result<HandlerOutcome, OrchestratorError> {
        let physical = request
            .physical_resource_id
            .clone()
            .unwrap_or_else(|| request.logical_resource_id.clone());
        // Failed creates report the logical id; there is nothing to remove.
        if !physical.starts_with("p-") {
            debug!(physical_id = %physical, "No policy behind physical id");
            return Ok(HandlerOutcome::new(physical));
        }
        let root = Self::root_id(ctx).await?;

        match Self::detach(ctx, &physical, &root).await {
            Ok(()) => {}
            Err(e) if e.is_remote_not_found() => {}
            Err(e) => return Err(e),
        }
        match ctx
            .call(RemoteOperation::DeletePolicy {
                policy_id: physical.clone(),
            })
            .await
        {
            Ok(_) => info!(policy_id = %physical, "Deleted policy"),
            Err(e) if e.is_remote_not_found() => debug!(policy_id = %physical, "Policy already gone"),
            Err(e) => return Err(e),
        }
        Ok(HandlerOutcome::new(physical))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OrchestratorConfig;
    use crate::lifecycle::{LifecycleEventHandler, ResponseStatus};
    use crate::remote::RemoteError;
    use crate::testing::{InMemoryOrganization, ROOT_ID};
    use serde_json::json;
    use std::sync::Arc;

    const DOC: &str = r#"{"Version":"2012-10-17","Statement":[{"Effect":"Deny","Action":"s3:*","Resource":"*"}]}"#;
    const DOC_V2: &str = r#"{"Version":"2012-10-17","Statement":[{"Effect":"Deny","Action":"iam:*","Resource":"*"}]}"#;

    fn handler(org: &Arc<InMemoryOrganization>) -> LifecycleEventHandler {
        LifecycleEventHandler::new(
            Arc::new(EnableScpHandler::new()),
            org.clone(),
            Arc::new(OrchestratorConfig::default()),
        )
    }

    fn org() -> Arc<InMemoryOrganization> {
        Arc::new(InMemoryOrganization::new("111111111111"))
    }

    #[test]
    fn test_same_document_ignores_formatting() {
        assert!(same_document(r#"{"a": 1, "b": [2]}"#, r#"{"b":[2],"a":1}"#));
        assert!(!same_document(DOC, DOC_V2));
    }

    #[test]
    fn test_classify_update() {
        let h = EnableScpHandler::new();
        let same = LifecycleRequest::update("SCP", "p-1", json!({"Policy": DOC}), json!({"Policy": DOC}));
        assert_eq!(h.classify_update(&same).unwrap(), UpdateKind::NoOp);

        let content = LifecycleRequest::update("SCP", "p-1", json!({"Policy": DOC}), json!({"Policy": DOC_V2}));
        assert_eq!(h.classify_update(&content).unwrap(), UpdateKind::InPlace);

        let renamed = LifecycleRequest::update(
            "SCP",
            "p-1",
            json!({"Policy": DOC}),
            json!({"Policy": DOC, "PolicyName": "other"}),
        );
        assert_eq!(h.classify_update(&renamed).unwrap(), UpdateKind::Replacement);
    }

    #[tokio::test]
    async fn test_create_then_attach() {
        let org = org();
        let response = handler(&org)
            .handle(LifecycleRequest::create("SCPBaseline", json!({"Policy": DOC})))
            .await;

        assert!(response.is_success(), "{response:?}");
        let policy = org.policy_by_name("superwerker-SCPBaseline").unwrap();
        assert_eq!(response.physical_resource_id, policy.policy_summary.id);
        assert_eq!(response.data["PolicyId"], json!(policy.policy_summary.id));
        assert_eq!(response.data["Attached"], json!(true));
        assert!(org.is_attached(&policy.policy_summary.id, ROOT_ID));
    }

    #[tokio::test]
    async fn test_retried_create_with_fresh_request_id_makes_no_mutations() {
        let org = org();
        let handler = handler(&org);
        let first = handler
            .handle(LifecycleRequest::create("SCPBaseline", json!({"Policy": DOC})))
            .await;
        let mutations = org.mutating_call_count();

        let second = handler
            .handle(LifecycleRequest::create("SCPBaseline", json!({"Policy": DOC})))
            .await;

        assert!(second.is_success());
        assert_eq!(first.physical_resource_id, second.physical_resource_id);
        assert_eq!(org.mutating_call_count(), mutations);
        assert_eq!(org.policy_count(), 1);
    }

    #[tokio::test]
    async fn test_redelivery_replays_cached_response() {
        let org = org();
        let handler = handler(&org);
        let request = LifecycleRequest::create("SCPBaseline", json!({"Policy": DOC})).with_request_id("req-1");

        let first = handler.handle(request.clone()).await;
        let calls = org.calls().len();
        let second = handler.handle(request).await;

        assert_eq!(first, second);
        assert_eq!(org.calls().len(), calls);
    }

    #[tokio::test]
    async fn test_reused_request_id_with_new_properties_is_rejected() {
        let org = org();
        let handler = handler(&org);
        let request = LifecycleRequest::create("SCPBaseline", json!({"Policy": DOC})).with_request_id("req-1");
        assert!(handler.handle(request.clone()).await.is_success());

        let mut changed = request;
        changed.resource_properties.insert(POLICY.into(), json!(DOC_V2));
        let response = handler.handle(changed).await;

        assert_eq!(response.status, ResponseStatus::Failed);
        assert!(response.reason.unwrap().to_lowercase().contains("idempotency"));
    }

    #[tokio::test]
    async fn test_update_attach_false_detaches_without_deleting() {
        let org = org();
        let handler = handler(&org);
        let created = handler
            .handle(LifecycleRequest::create("SCPBaseline", json!({"Policy": DOC})))
            .await;
        let policy_id = created.physical_resource_id.clone();

        let response = handler
            .handle(LifecycleRequest::update(
                "SCPBaseline",
                &policy_id,
                json!({"Policy": DOC, "Attach": true}),
                json!({"Policy": DOC, "Attach": "false"}),
            ))
            .await;

        assert!(response.is_success(), "{response:?}");
        assert_eq!(response.physical_resource_id, policy_id);
        assert_eq!(response.data["Attached"], json!(false));
        assert!(!org.is_attached(&policy_id, ROOT_ID));
        assert!(org.policy_by_name("superwerker-SCPBaseline").is_some());
        assert_eq!(org.call_count("DeletePolicy"), 0);
    }

    #[tokio::test]
    async fn test_update_changes_content_in_place() {
        let org = org();
        let handler = handler(&org);
        let created = handler
            .handle(LifecycleRequest::create("SCPBaseline", json!({"Policy": DOC})))
            .await;

        let response = handler
            .handle(LifecycleRequest::update(
                "SCPBaseline",
                &created.physical_resource_id,
                json!({"Policy": DOC}),
                json!({"Policy": DOC_V2}),
            ))
            .await;

        assert!(response.is_success());
        let policy = org.policy_by_name("superwerker-SCPBaseline").unwrap();
        assert!(same_document(&policy.content, DOC_V2));
        assert_eq!(org.call_count("UpdatePolicy"), 1);
    }

    #[tokio::test]
    async fn test_noop_update_makes_no_remote_calls() {
        let org = org();
        let response = handler(&org)
            .handle(LifecycleRequest::update(
                "SCPBaseline",
                "p-00000001",
                json!({"Policy": DOC}),
                json!({"Policy": DOC}),
            ))
            .await;

        assert!(response.is_success());
        assert_eq!(response.physical_resource_id, "p-00000001");
        assert!(org.calls().is_empty());
    }

    #[tokio::test]
    async fn test_rename_replaces_policy() {
        let org = org();
        let handler = handler(&org);
        let created = handler
            .handle(LifecycleRequest::create("SCPBaseline", json!({"Policy": DOC})))
            .await;

        let response = handler
            .handle(LifecycleRequest::update(
                "SCPBaseline",
                &created.physical_resource_id,
                json!({"Policy": DOC}),
                json!({"Policy": DOC, "PolicyName": "renamed"}),
            ))
            .await;

        assert!(response.is_success());
        assert_ne!(response.physical_resource_id, created.physical_resource_id);
        assert_eq!(org.policy_count(), 2);
    }

    #[tokio::test]
    async fn test_delete_twice_succeeds() {
        let org = org();
        let handler = handler(&org);
        let created = handler
            .handle(LifecycleRequest::create("SCPBaseline", json!({"Policy": DOC})))
            .await;
        let policy_id = created.physical_resource_id;

        for _ in 0..2 {
            let response = handler
                .handle(LifecycleRequest::delete("SCPBaseline", &policy_id, json!({"Policy": DOC})))
                .await;
            assert!(response.is_success(), "{response:?}");
        }
        assert_eq!(org.policy_count(), 0);
        assert!(!org.is_attached(&policy_id, ROOT_ID));
    }

    #[tokio::test]
    async fn test_delete_after_failed_create_is_noop() {
        let org = org();
        org.fail_next("ListRoots", RemoteError::new("AccessDeniedException", "no"));
        let response = handler(&org)
            .handle(LifecycleRequest::delete("SCPBaseline", "SCPBaseline", json!({})))
            .await;

        assert!(response.is_success(), "{response:?}");
        assert!(org.calls().is_empty());
    }

    #[tokio::test]
    async fn test_transient_errors_are_retried() {
        let org = org();
        org.fail_next("CreatePolicy", RemoteError::new("ThrottlingException", "slow down"));
        let config = OrchestratorConfig::default().with_handler_retry(
            crate::retry::RetryConfig::new().with_base_delay_ms(1).with_max_delay_ms(2),
        );
        let handler = LifecycleEventHandler::new(Arc::new(EnableScpHandler::new()), org.clone(), Arc::new(config));

        let response = handler
            .handle(LifecycleRequest::create("SCPBaseline", json!({"Policy": DOC})))
            .await;

        assert!(response.is_success());
        assert_eq!(org.call_count("CreatePolicy"), 2);
    }

    #[tokio::test]
    async fn test_permanent_error_fails_with_reason() {
        let org = org();
        org.fail_next("AttachPolicy", RemoteError::new("AccessDeniedException", "not allowed"));

        let response = handler(&org)
            .handle(LifecycleRequest::create("SCPBaseline", json!({"Policy": DOC})))
            .await;

        assert_eq!(response.status, ResponseStatus::Failed);
        assert_eq!(response.physical_resource_id, "SCPBaseline");
        assert!(response.reason.unwrap().contains("AccessDeniedException"));
        assert_eq!(org.call_count("AttachPolicy"), 1);
    }

    #[tokio::test]
    async fn test_invalid_policy_document_is_rejected() {
        let org = org();
        let response = handler(&org)
            .handle(LifecycleRequest::create("SCPBaseline", json!({"Policy": "not json"})))
            .await;

        assert_eq!(response.status, ResponseStatus::Failed);
        assert!(org.calls().is_empty());
    }
}
