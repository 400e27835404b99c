//! The landing zone and its readiness wait condition.

use crate::errors::OrchestratorError;
use crate::provider::{CapabilityResource, ProvisioningContext, StackRef};
use crate::wait::{WaitConditionBridge, WaitToken};
use tracing::info;

/// Logical id of the landing zone resource.
pub const CONTROL_TOWER_LOGICAL_ID: &str = "EnableControltower";

/// A declared landing zone plus the token that reports it ready.
#[derive(Debug, Clone, PartialEq)]
pub struct ControlTowerDeclaration {
    /// The `EnableControlTower` capability resource.
    pub resource: CapabilityResource,
    /// Signaled by whatever observes the landing zone becoming ready.
    /// Bounded by [`crate::config::OrchestratorConfig::wait_timeout`].
    pub ready: WaitToken,
}

/// Declares the landing zone in `stack` and creates its readiness token.
///
/// # Errors
///
/// Fails when the logical id is already taken or the token cannot be
/// persisted.
pub async fn declare_control_tower(
    ctx: &ProvisioningContext,
    stack: &StackRef,
    bridge: &WaitConditionBridge,
    log_archive_email: &str,
    audit_email: &str,
) -> Result<ControlTowerDeclaration, OrchestratorError> {
    let resource = ctx.enable_control_tower(stack, CONTROL_TOWER_LOGICAL_ID, log_archive_email, audit_email)?;
    let timeout = ctx.config().wait_timeout();
    let ready = bridge.create_wait_token(timeout).await?;
    info!(
        stack = %stack.stack_id(),
        token = %ready,
        timeout_secs = timeout.as_secs_f64(),
        "Declared landing zone with readiness wait condition"
    );
    Ok(ControlTowerDeclaration { resource, ready })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OrchestratorConfig;
    use crate::provider::LifecycleRouter;
    use crate::testing::{assert_response_success, InMemoryOrganization};
    use crate::wait::{SignalPayload, WaitState};
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::time::Instant;

    fn context(config: OrchestratorConfig) -> (ProvisioningContext, StackRef) {
        let ctx = ProvisioningContext::new(Arc::new(config));
        let stack = StackRef::new("control-tower", "111111111111", "eu-central-1");
        (ctx, stack)
    }

    #[tokio::test]
    async fn test_declared_landing_zone_is_set_up_and_signaled_ready() {
        let (ctx, stack) = context(OrchestratorConfig::default().with_region("eu-central-1"));
        let bridge = WaitConditionBridge::default();

        let declared = declare_control_tower(&ctx, &stack, &bridge, "log@example.com", "audit@example.com")
            .await
            .unwrap();
        assert_eq!(declared.resource.logical_id, CONTROL_TOWER_LOGICAL_ID);
        assert_eq!(bridge.status(&declared.ready).await.unwrap().state, WaitState::Pending);

        let org = Arc::new(InMemoryOrganization::new("111111111111"));
        let router = LifecycleRouter::in_memory(&ctx, org.clone());
        let response = router.route(declared.resource.create_request()).await;
        assert_response_success(&response);
        let setup = org.landing_zone_setup().unwrap();
        assert_eq!(setup.log_archive_email, "log@example.com");
        assert_eq!(setup.audit_email, "audit@example.com");

        bridge.signal(&declared.ready, SignalPayload::success()).await.unwrap();
        let record = bridge.wait(&declared.ready).await.unwrap();
        assert_eq!(record.state, WaitState::Succeeded);
    }

    #[tokio::test(start_paused = true)]
    async fn test_readiness_wait_uses_configured_timeout() {
        let (ctx, stack) = context(OrchestratorConfig::default());
        let bridge = WaitConditionBridge::default();
        let declared = declare_control_tower(&ctx, &stack, &bridge, "log@example.com", "audit@example.com")
            .await
            .unwrap();

        let started = Instant::now();
        let err = bridge.wait(&declared.ready).await.unwrap_err();

        assert!(err.is_timeout());
        assert_eq!(started.elapsed(), Duration::from_secs(7200));
        assert_eq!(bridge.status(&declared.ready).await.unwrap().state, WaitState::Expired);
    }

    #[tokio::test]
    async fn test_duplicate_declaration_creates_no_token() {
        let (ctx, stack) = context(OrchestratorConfig::default());
        let bridge = WaitConditionBridge::default();
        declare_control_tower(&ctx, &stack, &bridge, "log@example.com", "audit@example.com")
            .await
            .unwrap();

        let again = declare_control_tower(&ctx, &stack, &bridge, "log@example.com", "audit@example.com").await;

        assert!(again.is_err());
        assert_eq!(bridge.tracked_count(), 1);
    }
}
