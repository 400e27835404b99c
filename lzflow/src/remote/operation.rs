//! Typed remote operations and response shapes.
//!
//! Operations serialize with an `Api` tag and PascalCase fields, which is the
//! same shape automation documents use for their `inputs`, so a resolved input
//! map converts straight into a typed request.

use crate::errors::OrchestratorError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Service principal of the organization-wide security service.
pub const SECURITY_HUB_PRINCIPAL: &str = "securityhub.amazonaws.com";

fn default_true() -> bool {
    true
}

fn default_scp_filter() -> String {
    "SERVICE_CONTROL_POLICY".to_string()
}

/// One account entry for `CreateMembers`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AccountDetail {
    /// Member account id.
    pub account_id: String,
    /// Member account email.
    pub email: String,
}

/// Where a delegated automation execution runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TargetLocation {
    /// Target accounts.
    pub accounts: Vec<String>,
    /// Target regions.
    pub regions: Vec<String>,
    /// Role assumed in each target account.
    pub execution_role_name: String,
}

/// A key/values filter for `DescribeAutomationExecutions`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AutomationFilter {
    /// Filter key, e.g. `ExecutionId`.
    pub key: String,
    /// Accepted values.
    pub values: Vec<String>,
}

/// A typed request against the remote account-management API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "Api", rename_all_fields = "PascalCase")]
pub enum RemoteOperation {
    /// List all accounts of the organization.
    ListAccounts,
    /// Describe one account.
    DescribeAccount {
        /// Account id.
        account_id: String,
    },
    /// Create a member account.
    CreateAccount {
        /// Root email of the new account.
        email: String,
        /// Display name.
        account_name: String,
    },
    /// List the delegated security-service admin accounts.
    ListOrganizationAdminAccounts,
    /// Make an account the delegated security-service admin.
    EnableOrganizationAdminAccount {
        /// Account id.
        admin_account_id: String,
    },
    /// List delegated administrators, optionally for one service principal.
    ListDelegatedAdministrators {
        /// Service principal filter.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        service_principal: Option<String>,
    },
    /// Register a delegated administrator for a service principal.
    RegisterDelegatedAdministrator {
        /// Account id.
        account_id: String,
        /// Service principal.
        service_principal: String,
    },
    /// Enable trusted access for a service principal.
    #[serde(rename = "EnableAWSServiceAccess")]
    EnableAwsServiceAccess {
        /// Service principal.
        service_principal: String,
    },
    /// Enable the security service in the calling account.
    CreateDetector {
        /// Whether the detector is enabled.
        #[serde(default = "default_true")]
        enable: bool,
    },
    /// List detectors of the calling account.
    ListDetectors,
    /// Add member accounts to the calling admin account's detector.
    CreateMembers {
        /// Detector id.
        detector_id: String,
        /// Accounts to add.
        account_details: Vec<AccountDetail>,
    },
    /// Update the organization configuration of a detector.
    UpdateOrganizationConfiguration {
        /// Detector id.
        detector_id: String,
        /// Auto-enable for new accounts.
        auto_enable: bool,
    },
    /// List organization roots.
    ListRoots,
    /// List policies of one type.
    ListPolicies {
        /// Policy type filter.
        #[serde(default = "default_scp_filter")]
        filter: String,
    },
    /// List policies attached to a target.
    ListPoliciesForTarget {
        /// Root, OU or account id.
        target_id: String,
        /// Policy type filter.
        #[serde(default = "default_scp_filter")]
        filter: String,
    },
    /// Describe a policy including its content.
    DescribePolicy {
        /// Policy id.
        policy_id: String,
    },
    /// Create a policy.
    CreatePolicy {
        /// Policy name.
        name: String,
        /// Description.
        #[serde(default)]
        description: String,
        /// Policy document.
        content: String,
        /// Policy type.
        #[serde(rename = "Type", default = "default_scp_filter")]
        policy_type: String,
    },
    /// Replace the content of a policy.
    UpdatePolicy {
        /// Policy id.
        policy_id: String,
        /// New document.
        content: String,
    },
    /// Delete a policy.
    DeletePolicy {
        /// Policy id.
        policy_id: String,
    },
    /// Attach a policy to a target.
    AttachPolicy {
        /// Policy id.
        policy_id: String,
        /// Target id.
        target_id: String,
    },
    /// Detach a policy from a target.
    DetachPolicy {
        /// Policy id.
        policy_id: String,
        /// Target id.
        target_id: String,
    },
    /// Start an automation document execution in target locations.
    StartAutomationExecution {
        /// Document to run.
        document_name: String,
        /// Where to run it.
        #[serde(default)]
        target_locations: Vec<TargetLocation>,
        /// Document parameters.
        #[serde(default)]
        parameters: BTreeMap<String, Vec<String>>,
    },
    /// Describe automation executions.
    DescribeAutomationExecutions {
        /// Filters.
        #[serde(default)]
        filters: Vec<AutomationFilter>,
    },
    /// Set up the landing zone.
    SetupLandingZone {
        /// Log archive account email.
        log_archive_email: String,
        /// Audit account email.
        audit_email: String,
        /// Regions governed by the landing zone.
        governed_regions: Vec<String>,
    },
    /// Read the landing zone status.
    GetLandingZoneStatus,
}

impl RemoteOperation {
    /// Every API name an invoke step may use.
    pub const API_NAMES: &'static [&'static str] = &[
        "ListAccounts",
        "DescribeAccount",
        "CreateAccount",
        "ListOrganizationAdminAccounts",
        "EnableOrganizationAdminAccount",
        "ListDelegatedAdministrators",
        "RegisterDelegatedAdministrator",
        "EnableAWSServiceAccess",
        "CreateDetector",
        "ListDetectors",
        "CreateMembers",
        "UpdateOrganizationConfiguration",
        "ListRoots",
        "ListPolicies",
        "ListPoliciesForTarget",
        "DescribePolicy",
        "CreatePolicy",
        "UpdatePolicy",
        "DeletePolicy",
        "AttachPolicy",
        "DetachPolicy",
        "StartAutomationExecution",
        "DescribeAutomationExecutions",
        "SetupLandingZone",
        "GetLandingZoneStatus",
    ];

    /// Returns true if `api` names a supported operation.
    #[must_use]
    pub fn is_known_api(api: &str) -> bool {
        Self::API_NAMES.contains(&api)
    }

    /// Returns true if `api` only reads state, which is required for polling.
    #[must_use]
    pub fn is_read_only_api(api: &str) -> bool {
        Self::is_known_api(api)
            && (api.starts_with("List") || api.starts_with("Describe") || api.starts_with("Get"))
    }

    /// Builds an operation from an API name and a resolved input map.
    ///
    /// # Errors
    ///
    /// Returns a serialization error if the inputs do not fit the API's shape.
    pub fn from_parts(api: &str, mut inputs: Map<String, Value>) -> Result<Self, OrchestratorError> {
        inputs.insert("Api".to_string(), Value::String(api.to_string()));
        serde_json::from_value(Value::Object(inputs))
            .map_err(|e| OrchestratorError::Serialization(format!("inputs for {api}: {e}")))
    }

    /// Returns the API name.
    #[must_use]
    pub fn api_name(&self) -> &'static str {
        match self {
            Self::ListAccounts => "ListAccounts",
            Self::DescribeAccount { .. } => "DescribeAccount",
            Self::CreateAccount { .. } => "CreateAccount",
            Self::ListOrganizationAdminAccounts => "ListOrganizationAdminAccounts",
            Self::EnableOrganizationAdminAccount { .. } => "EnableOrganizationAdminAccount",
            Self::ListDelegatedAdministrators { .. } => "ListDelegatedAdministrators",
            Self::RegisterDelegatedAdministrator { .. } => "RegisterDelegatedAdministrator",
            Self::EnableAwsServiceAccess { .. } => "EnableAWSServiceAccess",
            Self::CreateDetector { .. } => "CreateDetector",
            Self::ListDetectors => "ListDetectors",
            Self::CreateMembers { .. } => "CreateMembers",
            Self::UpdateOrganizationConfiguration { .. } => "UpdateOrganizationConfiguration",
            Self::ListRoots => "ListRoots",
            Self::ListPolicies { .. } => "ListPolicies",
            Self::ListPoliciesForTarget { .. } => "ListPoliciesForTarget",
            Self::DescribePolicy { .. } => "DescribePolicy",
            Self::CreatePolicy { .. } => "CreatePolicy",
            Self::UpdatePolicy { .. } => "UpdatePolicy",
            Self::DeletePolicy { .. } => "DeletePolicy",
            Self::AttachPolicy { .. } => "AttachPolicy",
            Self::DetachPolicy { .. } => "DetachPolicy",
            Self::StartAutomationExecution { .. } => "StartAutomationExecution",
            Self::DescribeAutomationExecutions { .. } => "DescribeAutomationExecutions",
            Self::SetupLandingZone { .. } => "SetupLandingZone",
            Self::GetLandingZoneStatus => "GetLandingZoneStatus",
        }
    }

    /// Returns the service that owns this operation.
    #[must_use]
    pub fn service(&self) -> &'static str {
        match self {
            Self::ListAccounts
            | Self::DescribeAccount { .. }
            | Self::CreateAccount { .. }
            | Self::ListDelegatedAdministrators { .. }
            | Self::RegisterDelegatedAdministrator { .. }
            | Self::EnableAwsServiceAccess { .. }
            | Self::ListRoots
            | Self::ListPolicies { .. }
            | Self::ListPoliciesForTarget { .. }
            | Self::DescribePolicy { .. }
            | Self::CreatePolicy { .. }
            | Self::UpdatePolicy { .. }
            | Self::DeletePolicy { .. }
            | Self::AttachPolicy { .. }
            | Self::DetachPolicy { .. } => "organizations",
            Self::ListOrganizationAdminAccounts
            | Self::EnableOrganizationAdminAccount { .. }
            | Self::CreateDetector { .. }
            | Self::ListDetectors
            | Self::CreateMembers { .. }
            | Self::UpdateOrganizationConfiguration { .. } => "securityhub",
            Self::StartAutomationExecution { .. } | Self::DescribeAutomationExecutions { .. } => {
                "ssm"
            }
            Self::SetupLandingZone { .. } | Self::GetLandingZoneStatus => "controltower",
        }
    }

    /// Decodes a raw JSON response into a typed shape.
    ///
    /// # Errors
    ///
    /// Returns a serialization error naming the API when the shape does not match.
    pub fn decode_response<T: DeserializeOwned>(&self, response: Value) -> Result<T, OrchestratorError> {
        serde_json::from_value(response).map_err(|e| {
            OrchestratorError::Serialization(format!("response of {}: {e}", self.api_name()))
        })
    }
}

impl std::fmt::Display for RemoteOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.service(), self.api_name())
    }
}

/// An organization root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Root {
    /// Root id, e.g. `r-abcd`.
    pub id: String,
    /// Root name.
    #[serde(default)]
    pub name: String,
}

/// Response of `ListRoots`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ListRootsResponse {
    /// Roots of the organization.
    #[serde(default)]
    pub roots: Vec<Root>,
}

/// Summary of a policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PolicySummary {
    /// Policy id, e.g. `p-1234`.
    pub id: String,
    /// Policy name.
    pub name: String,
    /// Description.
    #[serde(default)]
    pub description: String,
    /// Policy type.
    #[serde(rename = "Type", default)]
    pub policy_type: String,
}

/// Response of `ListPolicies` and `ListPoliciesForTarget`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ListPoliciesResponse {
    /// Matching policies.
    #[serde(default)]
    pub policies: Vec<PolicySummary>,
}

/// A policy with its content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Policy {
    /// Summary.
    pub policy_summary: PolicySummary,
    /// Document text.
    pub content: String,
}

/// Response of `DescribePolicy`, `CreatePolicy` and `UpdatePolicy`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PolicyResponse {
    /// The policy.
    pub policy: Policy,
}

/// Response of `GetLandingZoneStatus`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LandingZoneStatusResponse {
    /// `NOT_STARTED`, `IN_PROGRESS`, `ACTIVE` or `FAILED`.
    pub status: String,
}
