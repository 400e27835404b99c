//! Organization-wide security service enablement.
//!
//! Two automation documents: [`ORGANIZATIONS_ID`] runs in the management
//! account, makes the audit account the delegated admin unless it already is,
//! enables the service locally and then delegates [`EXISTING_ACCOUNTS_ID`]
//! into the audit account, which adds the existing accounts as members and
//! turns on auto-enable for new ones.

use crate::config::OrchestratorConfig;
use crate::errors::OrchestratorError;
use crate::remote::SECURITY_HUB_PRINCIPAL;
use crate::workflow::{from_document, EventPattern, EventRule, WorkflowDefinition, WorkflowEngine};
use serde_json::{json, Value};

/// Id of the definition run in the audit account.
pub const EXISTING_ACCOUNTS_ID: &str = "EnableSecurityHubExistingAccounts";
/// Id of the definition run in the management account.
pub const ORGANIZATIONS_ID: &str = "EnableSecurityHubOrganizations";
/// Source of landing zone events.
pub const LANDING_ZONE_SOURCE: &str = "superwerker";
/// Event name published when the landing zone is set up or updated.
pub const LANDING_ZONE_FINISHED: &str = "LandingZoneSetupOrUpdateFinished";

/// Adds the management and log archive accounts to the audit account's
/// detector and enables new accounts automatically.
#[must_use]
pub fn existing_accounts_document() -> Value {
    json!({
        "schemaVersion": "0.3",
        "description": "Adds existing accounts to the delegated security admin",
        "parameters": {
            "LogArchiveAWSAccountId": {"type": "String"},
            "ManagementAWSAccountId": {"type": "String"}
        },
        "mainSteps": [
            {
                "name": "GetDetectorId",
                "action": "aws:executeAwsApi",
                "inputs": {"Service": "securityhub", "Api": "ListDetectors"},
                "outputs": [{"Name": "DetectorId", "Selector": "$.DetectorIds[0]"}]
            },
            {
                "name": "ManagementAWSAccount",
                "action": "aws:executeAwsApi",
                "inputs": {
                    "Service": "organizations",
                    "Api": "DescribeAccount",
                    "AccountId": "{{ ManagementAWSAccountId }}"
                },
                "outputs": [{"Name": "EmailAddress", "Selector": "$.Account.Email"}]
            },
            {
                "name": "LogArchiveAWSAccount",
                "action": "aws:executeAwsApi",
                "inputs": {
                    "Service": "organizations",
                    "Api": "DescribeAccount",
                    "AccountId": "{{ LogArchiveAWSAccountId }}"
                },
                "outputs": [{"Name": "EmailAddress", "Selector": "$.Account.Email"}]
            },
            {
                "name": "CreateMembers",
                "action": "aws:executeAwsApi",
                "inputs": {
                    "Service": "securityhub",
                    "Api": "CreateMembers",
                    "DetectorId": "{{ GetDetectorId.DetectorId }}",
                    "AccountDetails": [
                        {"AccountId": "{{ ManagementAWSAccountId }}", "Email": "{{ ManagementAWSAccount.EmailAddress }}"},
                        {"AccountId": "{{ LogArchiveAWSAccountId }}", "Email": "{{ LogArchiveAWSAccount.EmailAddress }}"}
                    ]
                }
            },
            {
                "name": "EnableSecurityHubExistingAccounts",
                "action": "aws:executeAwsApi",
                "inputs": {
                    "Service": "securityhub",
                    "Api": "UpdateOrganizationConfiguration",
                    "DetectorId": "{{ GetDetectorId.DetectorId }}",
                    "AutoEnable": true
                }
            }
        ]
    })
}

/// Registers the audit account as delegated admin and runs
/// [`EXISTING_ACCOUNTS_ID`] there.
///
/// # Errors
///
/// Returns `InvalidRequest` if the configuration has no management account.
pub fn organizations_document(config: &OrchestratorConfig) -> Result<Value, OrchestratorError> {
    let management_account = config.management_account_id.as_deref().ok_or_else(|| {
        OrchestratorError::InvalidRequest(
            "management_account_id must be configured to enable the security service".to_string(),
        )
    })?;

    Ok(json!({
        "schemaVersion": "0.3",
        "description": "Enables the security service across the organization",
        "parameters": {
            "AuditAccountId": {"type": "String"},
            "LogArchiveAccountId": {"type": "String"}
        },
        "mainSteps": [
            {
                "name": "CheckIfOrganizationAdminAccountIsAlreadyRegistered",
                "action": "aws:executeAwsApi",
                "inputs": {"Service": "securityhub", "Api": "ListOrganizationAdminAccounts"},
                "outputs": [{"Name": "AdminAccountId", "Selector": "$.AdminAccounts[0].AdminAccountId"}],
                "nextStep": "EnableOrganizationAdminAccountChoice"
            },
            {
                "name": "EnableOrganizationAdminAccountChoice",
                "action": "aws:branch",
                "inputs": {
                    "Choices": [{
                        "NextStep": "EnableSecurityHubInManagementAccount",
                        "Variable": "{{ CheckIfOrganizationAdminAccountIsAlreadyRegistered.AdminAccountId }}",
                        "StringEquals": "{{ AuditAccountId }}"
                    }],
                    "Default": "EnableOrganizationAdminAccount"
                }
            },
            {
                "name": "EnableOrganizationAdminAccount",
                "action": "aws:executeAwsApi",
                "inputs": {
                    "Service": "securityhub",
                    "Api": "EnableOrganizationAdminAccount",
                    "AdminAccountId": "{{ AuditAccountId }}"
                }
            },
            {
                "name": "WaitForEnableOrganizationAdminAccount",
                "action": "aws:waitForAwsResourceProperty",
                "timeoutSeconds": "60",
                "inputs": {
                    "Service": "organizations",
                    "Api": "ListDelegatedAdministrators",
                    "ServicePrincipal": SECURITY_HUB_PRINCIPAL,
                    "PropertySelector": "$.DelegatedAdministrators[0].Status",
                    "DesiredValues": ["ACTIVE"]
                }
            },
            {
                "name": "EnableSecurityHubInManagementAccount",
                "action": "aws:executeAwsApi",
                "inputs": {"Service": "securityhub", "Api": "CreateDetector", "Enable": true}
            },
            {
                "name": "SleepEnableSecurityHubExistingAccounts",
                "action": "aws:sleep",
                "inputs": {"Duration": "PT120S"}
            },
            {
                "name": "EnableSecurityHubExistingAccounts",
                "action": "aws:executeAutomation",
                "isEnd": true,
                "inputs": {
                    "DocumentName": EXISTING_ACCOUNTS_ID,
                    "TargetLocations": [{
                        "ExecutionRoleName": config.execution_role_name,
                        "Accounts": ["{{ AuditAccountId }}"],
                        "Regions": [config.region]
                    }],
                    "RuntimeParameters": {
                        "LogArchiveAWSAccountId": ["{{ LogArchiveAccountId }}"],
                        "ManagementAWSAccountId": [management_account]
                    }
                }
            }
        ]
    }))
}

/// Parses [`existing_accounts_document`].
///
/// # Errors
///
/// Returns `Configuration` if the document does not parse.
pub fn enable_security_hub_existing_accounts() -> Result<WorkflowDefinition, OrchestratorError> {
    Ok(from_document(EXISTING_ACCOUNTS_ID, &existing_accounts_document())?)
}

/// Parses [`organizations_document`].
///
/// # Errors
///
/// Returns `InvalidRequest` without a management account and
/// `Configuration` if the document does not parse.
pub fn enable_security_hub_organizations(config: &OrchestratorConfig) -> Result<WorkflowDefinition, OrchestratorError> {
    Ok(from_document(ORGANIZATIONS_ID, &organizations_document(config)?)?)
}

/// Starts [`ORGANIZATIONS_ID`] whenever the landing zone finishes setting up.
///
/// The accounts are fixed when the rule is created, since published events
/// do not carry them.
#[must_use]
pub fn landing_zone_rule(audit_account_id: &str, log_archive_account_id: &str) -> EventRule {
    EventRule::new(
        "LandingZoneSetupFinishedTrigger",
        EventPattern::source(LANDING_ZONE_SOURCE).with_detail("eventName", [LANDING_ZONE_FINISHED]),
        ORGANIZATIONS_ID,
    )
    .with_parameter("AuditAccountId", audit_account_id)
    .with_parameter("LogArchiveAccountId", log_archive_account_id)
}

/// Registers both definitions, the delegated one first.
///
/// # Errors
///
/// See [`enable_security_hub_organizations`] and [`WorkflowEngine::register`].
pub fn register_security_hub(engine: &WorkflowEngine, config: &OrchestratorConfig) -> Result<(), OrchestratorError> {
    engine.register(enable_security_hub_existing_accounts()?)?;
    engine.register(enable_security_hub_organizations(config)?)
}
