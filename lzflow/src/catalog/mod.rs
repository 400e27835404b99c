//! Built-in baseline capabilities.
//!
//! The security service enablement is expressed as two workflow
//! definitions: the organization-level one and the per-account one it
//! delegates to in the audit account. The service-control-policy baseline
//! is a declared capability resource handled by the SCP lifecycle handler.
//! The landing zone is declared together with a wait token that reports it
//! ready.

mod control_tower;
mod scp;
mod security_hub;

pub use control_tower::{declare_control_tower, ControlTowerDeclaration, CONTROL_TOWER_LOGICAL_ID};
pub use scp::{baseline_scp_policy, declare_scp_baseline, BaselineOptions, BASELINE_LOGICAL_ID};
pub use security_hub::{
    enable_security_hub_existing_accounts, enable_security_hub_organizations, existing_accounts_document,
    landing_zone_rule, organizations_document, register_security_hub, EXISTING_ACCOUNTS_ID, LANDING_ZONE_FINISHED,
    LANDING_ZONE_SOURCE, ORGANIZATIONS_ID,
};

use crate::config::OrchestratorConfig;
use crate::errors::OrchestratorError;
use crate::workflow::WorkflowEngine;

/// Registers every built-in workflow definition with `engine`.
///
/// # Errors
///
/// Fails when a definition is rejected or the configuration lacks the
/// management account.
pub fn register_catalog(engine: &WorkflowEngine, config: &OrchestratorConfig) -> Result<(), OrchestratorError> {
    register_security_hub(engine, config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{EngineFixture, InMemoryOrganization};

    #[test]
    fn test_register_catalog() {
        let fx = EngineFixture::new(InMemoryOrganization::new("123456789012"));
        let config = OrchestratorConfig {
            management_account_id: Some("123456789012".to_string()),
            ..OrchestratorConfig::default()
        };

        register_catalog(&fx.engine, &config).unwrap();

        let mut ids = fx.engine.definition_ids();
        ids.sort();
        assert_eq!(ids, vec![EXISTING_ACCOUNTS_ID.to_string(), ORGANIZATIONS_ID.to_string()]);
    }

    #[test]
    fn test_register_catalog_without_management_account() {
        let fx = EngineFixture::new(InMemoryOrganization::new("123456789012"));
        assert!(register_catalog(&fx.engine, &OrchestratorConfig::default()).is_err());
    }
}
