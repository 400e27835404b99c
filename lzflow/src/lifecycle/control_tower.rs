//! Landing zone capability.

use super::event::LifecycleRequest;
use super::handler::{CapabilityHandler, HandlerContext, HandlerOutcome, UpdateKind};
use super::kind::CapabilityKind;
use crate::errors::OrchestratorError;
use crate::remote::{LandingZoneStatusResponse, RemoteOperation};
use async_trait::async_trait;
use tracing::{debug, info};

/// Property holding the log archive account email.
pub const LOG_ARCHIVE_EMAIL: &str = "LOG_ARCHIVE_AWS_ACCOUNT_EMAIL";
/// Property holding the audit account email.
pub const AUDIT_EMAIL: &str = "AUDIT_AWS_ACCOUNT_EMAIL";

/// Handler for `Custom::EnableControltower`.
///
/// Setup is started once; while it runs or after it finished, further creates
/// and updates only report the current status.
#[derive(Debug, Default, Clone, Copy)]
pub struct EnableControlTowerHandler;

impl EnableControlTowerHandler {
    /// Creates the handler.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    async fn status(ctx: &HandlerContext) -> Result<String, OrchestratorError> {
        match ctx
            .call_typed::<LandingZoneStatusResponse>(RemoteOperation::GetLandingZoneStatus)
            .await
        {
            Ok(response) => Ok(response.status),
            Err(e) if e.is_remote_not_found() => Ok("NOT_STARTED".to_string()),
            Err(e) => Err(e),
        }
    }

    async fn ensure_landing_zone(
        ctx: &HandlerContext,
        request: &LifecycleRequest,
    ) -> Result<HandlerOutcome, OrchestratorError> {
        let log_archive_email = request.required_str(LOG_ARCHIVE_EMAIL)?.to_string();
        let audit_email = request.required_str(AUDIT_EMAIL)?.to_string();
        let region = ctx.config().region.clone();

        let mut status = Self::status(ctx).await?;
        match status.as_str() {
            "ACTIVE" | "IN_PROGRESS" => {
                debug!(status = %status, "Landing zone already set up");
            }
            _ => {
                ctx.call(RemoteOperation::SetupLandingZone {
                    log_archive_email,
                    audit_email,
                    governed_regions: vec![region.clone()],
                })
                .await?;
                status = Self::status(ctx).await?;
                info!(region = %region, status = %status, "Started landing zone setup");
            }
        }

        Ok(HandlerOutcome::new(format!("controltower-{region}")).with_data("LandingZoneStatus", status))
    }
}

#[async_trait]
impl CapabilityHandler for EnableControlTowerHandler {
    fn kind(&self) -> CapabilityKind {
        CapabilityKind::EnableControlTower
    }

    async fn create(
        &self,
        ctx: &HandlerContext,
        request: &LifecycleRequest,
    ) -> Result<HandlerOutcome, OrchestratorError> {
        Self::ensure_landing_zone(ctx, request).await
    }

    async fn update(
        &self,
        ctx: &HandlerContext,
        request: &LifecycleRequest,
        _kind: UpdateKind,
    ) -> Result<HandlerOutcome, OrchestratorError> {
        Self::ensure_landing_zone(ctx, request).await
    }

    async fn delete(
        &self,
        _ctx: &HandlerContext,
        request: &LifecycleRequest,
    ) -> Result<HandlerOutcome, OrchestratorError> {
        info!("Landing zone is left in place on delete");
        Ok(HandlerOutcome::new(
            request
                .physical_resource_id
                .clone()
                .unwrap_or_else(|| request.logical_resource_id.clone()),
        ))
    }
}
