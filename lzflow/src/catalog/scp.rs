//! The baseline service-control policy.

use crate::errors::OrchestratorError;
use crate::provider::{CapabilityResource, ProvisioningContext, StackRef};
use serde::Serialize;
use serde_json::{json, Value};

/// Logical id of the baseline policy resource.
pub const BASELINE_LOGICAL_ID: &str = "SCPBaseline";

const POLICY_VERSION: &str = "2012-10-17";

const SECURITY_HUB_ACTIONS: &[&str] = &[
    "securityhub:DeleteInvitations",
    "securityhub:DisableSecurityHub",
    "securityhub:DisassociateFromMasterAccount",
    "securityhub:DeleteMembers",
    "securityhub:DisassociateMembers",
];

const BACKUP_ROLE_ACTIONS: &[&str] = &[
    "iam:AttachRolePolicy",
    "iam:CreateRole",
    "iam:DeleteRole",
    "iam:DeleteRolePermissionsBoundary",
    "iam:DeleteRolePolicy",
    "iam:DetachRolePolicy",
    "iam:PutRolePermissionsBoundary",
    "iam:PutRolePolicy",
    "iam:UpdateAssumeRolePolicy",
    "iam:UpdateRole",
    "iam:UpdateRoleDescription",
];

/// Which protections the baseline contains.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BaselineOptions {
    /// Deny disabling the security service or leaving its organization.
    pub protect_security_hub: bool,
    /// Deny tampering with the backup roles.
    pub protect_backup: bool,
}

impl Default for BaselineOptions {
    fn default() -> Self {
        Self {
            protect_security_hub: true,
            protect_backup: true,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct Statement {
    sid: &'static str,
    effect: &'static str,
    action: Vec<&'static str>,
    resource: Vec<String>,
    condition: Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct PolicyDocument {
    version: &'static str,
    statement: Vec<Statement>,
}

fn role_arn(partition: &str, name: &str) -> String {
    format!("arn:{partition}:iam::*:role/{name}")
}

fn unless_principal(partition: &str, role: &str) -> Value {
    json!({ "ArnNotLike": { "aws:PrincipalARN": role_arn(partition, role) } })
}

fn statements(partition: &str, options: BaselineOptions) -> Vec<Statement> {
    let mut statements = Vec::new();
    if options.protect_security_hub {
        statements.push(Statement {
            sid: "SWProtectSecurityHub",
            effect: "Deny",
            action: SECURITY_HUB_ACTIONS.to_vec(),
            resource: vec!["*".to_string()],
            condition: unless_principal(partition, "AWSControlTowerExecution"),
        });
    }
    if options.protect_backup {
        statements.push(Statement {
            sid: "SWProtectBackup",
            effect: "Deny",
            action: BACKUP_ROLE_ACTIONS.to_vec(),
            resource: vec![
                role_arn(partition, "service-role/AWSBackupDefaultServiceRole"),
                role_arn(partition, "SuperwerkerBackupTagsEnforcementRemediationRole"),
            ],
            condition: unless_principal(partition, "stacksets-exec-*"),
        });
    }
    statements
}

/// Renders the baseline policy document for `partition`.
#[must_use]
pub fn baseline_scp_policy(partition: &str, options: BaselineOptions) -> String {
    let document = PolicyDocument {
        version: POLICY_VERSION,
        statement: statements(partition, options),
    };
    serde_json::to_string(&document).unwrap_or_default()
}

/// Declares the baseline policy in `stack`, attached to the organization root.
///
/// # Errors
///
/// Returns `InvalidRequest` when every protection is disabled, since an
/// empty policy cannot be created, or when the logical id is taken.
pub fn declare_scp_baseline(
    ctx: &ProvisioningContext,
    stack: &StackRef,
    options: BaselineOptions,
) -> Result<CapabilityResource, OrchestratorError> {
    if !options.protect_security_hub && !options.protect_backup {
        return Err(OrchestratorError::InvalidRequest(
            "the baseline policy needs at least one protection".to_string(),
        ));
    }
    let policy = baseline_scp_policy(&ctx.config().partition, options);
    ctx.enable_scp(stack, BASELINE_LOGICAL_ID, &policy, true)
}
