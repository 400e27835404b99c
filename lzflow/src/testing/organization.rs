//! In-memory organization implementing [`RemoteClient`].
//!
//! Models just enough of the account, policy, security-service, automation
//! and landing-zone APIs for the capability handlers and catalog workflows
//! to run end to end. Every call is logged with the account and session it
//! ran under, and failures can be injected per API.

use crate::remote::{
    AccountDetail, CrossAccountDelegation, Policy, PolicySummary, RemoteClient, RemoteError,
    RemoteOperation, Session, SECURITY_HUB_PRINCIPAL,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use uuid::Uuid;

/// Id of the single organization root.
pub const ROOT_ID: &str = "r-root";

/// One logged remote call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallRecord {
    /// Account the call ran in.
    pub account: String,
    /// Assumed session id, `None` for the home session.
    pub session_id: Option<Uuid>,
    /// API name; `AssumeRole` for session acquisition.
    pub api: String,
}

/// Parameters of the last landing zone setup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LandingZoneSetup {
    /// Log archive account email.
    pub log_archive_email: String,
    /// Audit account email.
    pub audit_email: String,
    /// Governed regions.
    pub governed_regions: Vec<String>,
}

#[derive(Debug, Clone)]
struct Account {
    email: String,
    name: String,
}

#[derive(Debug)]
struct OrgState {
    accounts: BTreeMap<String, Account>,
    policies: BTreeMap<String, Policy>,
    next_id: u64,
    attachments: BTreeSet<(String, String)>,
    admin_accounts: Vec<String>,
    delegated_admins: BTreeMap<String, Vec<String>>,
    delegated_status: String,
    pending_polls: u32,
    trusted_access: BTreeSet<String>,
    detectors: BTreeMap<String, String>,
    members: BTreeMap<String, Vec<AccountDetail>>,
    auto_enable: BTreeMap<String, bool>,
    automation_executions: Vec<(String, String, String)>,
    landing_zone_status: String,
    landing_zone_setup: Option<LandingZoneSetup>,
    active_sessions: BTreeSet<Uuid>,
    released_sessions: BTreeSet<Uuid>,
    calls: Vec<CallRecord>,
    failures: HashMap<String, VecDeque<RemoteError>>,
}

/// An in-memory organization.
#[derive(Debug)]
pub struct InMemoryOrganization {
    management_account_id: String,
    state: Mutex<OrgState>,
}

impl InMemoryOrganization {
    /// Creates an organization with only the management account.
    #[must_use]
    pub fn new(management_account_id: impl Into<String>) -> Self {
        let management_account_id = management_account_id.into();
        let mut accounts = BTreeMap::new();
        accounts.insert(
            management_account_id.clone(),
            Account {
                email: format!("management+{management_account_id}@example.com"),
                name: "Management".to_string(),
            },
        );
        Self {
            management_account_id,
            state: Mutex::new(OrgState {
                accounts,
                policies: BTreeMap::new(),
                next_id: 1,
                attachments: BTreeSet::new(),
                admin_accounts: Vec::new(),
                delegated_admins: BTreeMap::new(),
                delegated_status: "ACTIVE".to_string(),
                pending_polls: 0,
                trusted_access: BTreeSet::new(),
                detectors: BTreeMap::new(),
                members: BTreeMap::new(),
                auto_enable: BTreeMap::new(),
                automation_executions: Vec::new(),
                landing_zone_status: "NOT_STARTED".to_string(),
                landing_zone_setup: None,
                active_sessions: BTreeSet::new(),
                released_sessions: BTreeSet::new(),
                calls: Vec::new(),
                failures: HashMap::new(),
            }),
        }
    }

    /// Adds a member account.
    #[must_use]
    pub fn with_account(self, id: impl Into<String>, email: impl Into<String>) -> Self {
        let id = id.into();
        self.state.lock().accounts.insert(
            id.clone(),
            Account {
                email: email.into(),
                name: format!("Account {id}"),
            },
        );
        self
    }

    /// Registers `id` as the security-service admin account up front.
    #[must_use]
    pub fn with_admin_account(self, id: impl Into<String>) -> Self {
        {
            let mut state = self.state.lock();
            let id = id.into();
            state.register_admin(&id);
        }
        self
    }

    /// Sets the status reported for delegated administrators.
    #[must_use]
    pub fn with_delegated_status(self, status: impl Into<String>) -> Self {
        self.state.lock().delegated_status = status.into();
        self
    }

    /// Reports `PENDING` for the next `polls` delegated-administrator listings.
    #[must_use]
    pub fn with_pending_polls(self, polls: u32) -> Self {
        self.state.lock().pending_polls = polls;
        self
    }

    /// Sets the landing zone status.
    #[must_use]
    pub fn with_landing_zone_status(self, status: impl Into<String>) -> Self {
        self.state.lock().landing_zone_status = status.into();
        self
    }

    /// The management account id.
    #[must_use]
    pub fn management_account_id(&self) -> &str {
        &self.management_account_id
    }

    /// Makes the next call of `api` fail with `error`. Queued errors are
    /// consumed in order.
    pub fn fail_next(&self, api: &str, error: RemoteError) {
        self.state
            .lock()
            .failures
            .entry(api.to_string())
            .or_default()
            .push_back(error);
    }

    /// Number of calls of `api`, including failed ones.
    #[must_use]
    pub fn call_count(&self, api: &str) -> usize {
        self.state.lock().calls.iter().filter(|c| c.api == api).count()
    }

    /// Number of calls that were not reads.
    #[must_use]
    pub fn mutating_call_count(&self) -> usize {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|c| c.api != "AssumeRole" && !RemoteOperation::is_read_only_api(&c.api))
            .count()
    }

    /// All logged calls.
    #[must_use]
    pub fn calls(&self) -> Vec<CallRecord> {
        self.state.lock().calls.clone()
    }

    /// Looks a policy up by name.
    #[must_use]
    pub fn policy_by_name(&self, name: &str) -> Option<Policy> {
        self.state
            .lock()
            .policies
            .values()
            .find(|p| p.policy_summary.name == name)
            .cloned()
    }

    /// Number of policies.
    #[must_use]
    pub fn policy_count(&self) -> usize {
        self.state.lock().policies.len()
    }

    /// Returns true if `policy_id` is attached to `target_id`.
    #[must_use]
    pub fn is_attached(&self, policy_id: &str, target_id: &str) -> bool {
        self.state
            .lock()
            .attachments
            .contains(&(policy_id.to_string(), target_id.to_string()))
    }

    /// Registered security-service admin accounts.
    #[must_use]
    pub fn admin_accounts(&self) -> Vec<String> {
        self.state.lock().admin_accounts.clone()
    }

    /// Returns true if trusted access is enabled for `service_principal`.
    #[must_use]
    pub fn has_trusted_access(&self, service_principal: &str) -> bool {
        self.state.lock().trusted_access.contains(service_principal)
    }

    /// Detector id of `account_id`.
    #[must_use]
    pub fn detector_of(&self, account_id: &str) -> Option<String> {
        self.state.lock().detectors.get(account_id).cloned()
    }

    /// Member account ids of a detector.
    #[must_use]
    pub fn members_of(&self, detector_id: &str) -> Vec<String> {
        self.state
            .lock()
            .members
            .get(detector_id)
            .map(|m| m.iter().map(|d| d.account_id.clone()).collect())
            .unwrap_or_default()
    }

    /// Auto-enable setting of a detector.
    #[must_use]
    pub fn auto_enable(&self, detector_id: &str) -> Option<bool> {
        self.state.lock().auto_enable.get(detector_id).copied()
    }

    /// Parameters of the last landing zone setup.
    #[must_use]
    pub fn landing_zone_setup(&self) -> Option<LandingZoneSetup> {
        self.state.lock().landing_zone_setup.clone()
    }

    /// Number of sessions assumed and not yet released.
    #[must_use]
    pub fn active_session_count(&self) -> usize {
        self.state.lock().active_sessions.len()
    }

    /// Ids of released sessions.
    #[must_use]
    pub fn released_sessions(&self) -> Vec<Uuid> {
        self.state.lock().released_sessions.iter().copied().collect()
    }

    fn apply(&self, account: &str, operation: &RemoteOperation) -> Result<Value, RemoteError> {
        let mut state = self.state.lock();
        state.apply(account, operation)
    }
}

fn err(code: &str, message: impl Into<String>) -> RemoteError {
    RemoteError::new(code, message)
}

impl OrgState {
    fn next_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn register_admin(&mut self, account_id: &str) {
        self.admin_accounts.push(account_id.to_string());
        self.delegated_admins
            .entry(SECURITY_HUB_PRINCIPAL.to_string())
            .or_default()
            .push(account_id.to_string());
        self.detectors
            .entry(account_id.to_string())
            .or_insert_with(|| format!("det-{account_id}"));
    }

    fn policy(&self, policy_id: &str) -> Result<&Policy, RemoteError> {
        self.policies
            .get(policy_id)
            .ok_or_else(|| err("PolicyNotFoundException", format!("policy {policy_id} not found")))
    }

    fn check_target(&self, target_id: &str) -> Result<(), RemoteError> {
        if target_id == ROOT_ID || self.accounts.contains_key(target_id) {
            Ok(())
        } else {
            Err(err("TargetNotFoundException", format!("target {target_id} not found")))
        }
    }

    fn check_document(content: &str) -> Result<(), RemoteError> {
        serde_json::from_str::<Value>(content)
            .map(|_| ())
            .map_err(|e| err("MalformedPolicyDocumentException", e.to_string()))
    }

    fn detector_owner(&self, detector_id: &str) -> Result<(), RemoteError> {
        if self.detectors.values().any(|d| d == detector_id) {
            Ok(())
        } else {
            Err(err("ResourceNotFoundException", format!("detector {detector_id} not found")))
        }
    }

    fn account_json(id: &str, account: &Account) -> Value {
        json!({"Id": id, "Email": account.email, "Name": account.name, "Status": "ACTIVE"})
    }

    #[allow(clippy::too_many_lines)]
    fn apply(&mut self, account: &str, operation: &RemoteOperation) -> Result<Value, RemoteError> {
        match operation {
            RemoteOperation::ListAccounts => Ok(json!({
                "Accounts": self
                    .accounts
                    .iter()
                    .map(|(id, a)| Self::account_json(id, a))
                    .collect::<Vec<_>>()
            })),
            RemoteOperation::DescribeAccount { account_id } => self
                .accounts
                .get(account_id)
                .map(|a| json!({"Account": Self::account_json(account_id, a)}))
                .ok_or_else(|| err("AccountNotFoundException", format!("account {account_id} not found"))),
            RemoteOperation::CreateAccount { email, account_name } => {
                if self.accounts.values().any(|a| &a.email == email) {
                    return Err(err("DuplicateAccountException", format!("{email} is in use")));
                }
                let id = format!("{:012}", 900_000_000_000 + self.next_id());
                self.accounts.insert(
                    id.clone(),
                    Account {
                        email: email.clone(),
                        name: account_name.clone(),
                    },
                );
                Ok(json!({"CreateAccountStatus": {"State": "SUCCEEDED", "AccountId": id}}))
            }
            RemoteOperation::ListOrganizationAdminAccounts => Ok(json!({
                "AdminAccounts": self
                    .admin_accounts
                    .iter()
                    .map(|id| json!({"AdminAccountId": id, "Status": "ENABLED"}))
                    .collect::<Vec<_>>()
            })),
            RemoteOperation::EnableOrganizationAdminAccount { admin_account_id } => {
                if self.admin_accounts.contains(admin_account_id) {
                    return Err(err(
                        "ResourceConflictException",
                        format!("{admin_account_id} is already the admin account"),
                    ));
                }
                if !self.accounts.contains_key(admin_account_id) {
                    return Err(err(
                        "AccountNotFoundException",
                        format!("account {admin_account_id} not found"),
                    ));
                }
                self.register_admin(admin_account_id);
                Ok(json!({}))
            }
            RemoteOperation::ListDelegatedAdministrators { service_principal } => {
                let status = if self.pending_polls > 0 {
                    self.pending_polls -= 1;
                    "PENDING".to_string()
                } else {
                    self.delegated_status.clone()
                };
                let status = status.as_str();
                let admins: Vec<Value> = self
                    .delegated_admins
                    .iter()
                    .filter(|(principal, _)| {
                        service_principal.as_deref().map_or(true, |p| p == principal.as_str())
                    })
                    .flat_map(|(principal, ids)| {
                        ids.iter().map(move |id| {
                            json!({"Id": id, "Status": status, "ServicePrincipal": principal})
                        })
                    })
                    .collect();
                Ok(json!({"DelegatedAdministrators": admins}))
            }
            RemoteOperation::RegisterDelegatedAdministrator {
                account_id,
                service_principal,
            } => {
                let admins = self.delegated_admins.entry(service_principal.clone()).or_default();
                if admins.contains(account_id) {
                    return Err(err(
                        "AccountAlreadyRegisteredException",
                        format!("{account_id} already delegated for {service_principal}"),
                    ));
                }
                admins.push(account_id.clone());
                Ok(json!({}))
            }
            RemoteOperation::EnableAwsServiceAccess { service_principal } => {
                self.trusted_access.insert(service_principal.clone());
                Ok(json!({}))
            }
            RemoteOperation::CreateDetector { .. } => {
                if self.detectors.contains_key(account) {
                    return Err(err(
                        "ResourceConflictException",
                        format!("account {account} is already subscribed"),
                    ));
                }
                let id = format!("det-{account}");
                self.detectors.insert(account.to_string(), id.clone());
                Ok(json!({"DetectorId": id}))
            }
            RemoteOperation::ListDetectors => Ok(json!({
                "DetectorIds": self.detectors.get(account).into_iter().collect::<Vec<_>>()
            })),
            RemoteOperation::CreateMembers {
                detector_id,
                account_details,
            } => {
                self.detector_owner(detector_id)?;
                let members = self.members.entry(detector_id.clone()).or_default();
                for detail in account_details {
                    if !members.iter().any(|m| m.account_id == detail.account_id) {
                        members.push(detail.clone());
                    }
                }
                Ok(json!({"UnprocessedAccounts": []}))
            }
            RemoteOperation::UpdateOrganizationConfiguration {
                detector_id,
                auto_enable,
            } => {
                self.detector_owner(detector_id)?;
                self.auto_enable.insert(detector_id.clone(), *auto_enable);
                Ok(json!({}))
            }
            RemoteOperation::ListRoots => Ok(json!({"Roots": [{"Id": ROOT_ID, "Name": "Root"}]})),
            RemoteOperation::ListPolicies { filter } => Ok(json!({
                "Policies": self
                    .policies
                    .values()
                    .filter(|p| &p.policy_summary.policy_type == filter)
                    .map(|p| &p.policy_summary)
                    .collect::<Vec<_>>()
            })),
            RemoteOperation::ListPoliciesForTarget { target_id, filter } => {
                self.check_target(target_id)?;
                let policies: Vec<&PolicySummary> = self
                    .attachments
                    .iter()
                    .filter(|(_, target)| target == target_id)
                    .filter_map(|(policy, _)| self.policies.get(policy))
                    .filter(|p| &p.policy_summary.policy_type == filter)
                    .map(|p| &p.policy_summary)
                    .collect();
                Ok(json!({"Policies": policies}))
            }
            RemoteOperation::DescribePolicy { policy_id } => {
                Ok(json!({"Policy": self.policy(policy_id)?}))
            }
            RemoteOperation::CreatePolicy {
                name,
                description,
                content,
                policy_type,
            } => {
                if self.policies.values().any(|p| &p.policy_summary.name == name) {
                    return Err(err("DuplicatePolicyException", format!("policy {name} exists")));
                }
                Self::check_document(content)?;
                let id = format!("p-{:08}", self.next_id());
                let policy = Policy {
                    policy_summary: PolicySummary {
                        id: id.clone(),
                        name: name.clone(),
                        description: description.clone(),
                        policy_type: policy_type.clone(),
                    },
                    content: content.clone(),
                };
                self.policies.insert(id, policy.clone());
                Ok(json!({"Policy": policy}))
            }
            RemoteOperation::UpdatePolicy { policy_id, content } => {
                self.policy(policy_id)?;
                Self::check_document(content)?;
                let policy = self
                    .policies
                    .get_mut(policy_id)
                    .ok_or_else(|| err("PolicyNotFoundException", policy_id.clone()))?;
                policy.content.clone_from(content);
                Ok(json!({"Policy": policy}))
            }
            RemoteOperation::DeletePolicy { policy_id } => {
                self.policy(policy_id)?;
                if self.attachments.iter().any(|(p, _)| p == policy_id) {
                    return Err(err("PolicyInUseException", format!("policy {policy_id} is attached")));
                }
                self.policies.remove(policy_id);
                Ok(json!({}))
            }
            RemoteOperation::AttachPolicy {
                policy_id,
                target_id,
            } => {
                self.policy(policy_id)?;
                self.check_target(target_id)?;
                if !self.attachments.insert((policy_id.clone(), target_id.clone())) {
                    return Err(err(
                        "DuplicatePolicyAttachmentException",
                        format!("{policy_id} already attached to {target_id}"),
                    ));
                }
                Ok(json!({}))
            }
            RemoteOperation::DetachPolicy {
                policy_id,
                target_id,
            } => {
                self.policy(policy_id)?;
                if !self.attachments.remove(&(policy_id.clone(), target_id.clone())) {
                    return Err(err(
                        "PolicyNotAttachedException",
                        format!("{policy_id} is not attached to {target_id}"),
                    ));
                }
                Ok(json!({}))
            }
            RemoteOperation::StartAutomationExecution { document_name, .. } => {
                let id = Uuid::new_v4().to_string();
                self.automation_executions
                    .push((id.clone(), document_name.clone(), "Success".to_string()));
                Ok(json!({"AutomationExecutionId": id}))
            }
            RemoteOperation::DescribeAutomationExecutions { filters } => {
                let wanted: Vec<&String> = filters
                    .iter()
                    .filter(|f| f.key == "ExecutionId")
                    .flat_map(|f| f.values.iter())
                    .collect();
                let list: Vec<Value> = self
                    .automation_executions
                    .iter()
                    .filter(|(id, _, _)| wanted.is_empty() || wanted.contains(&id))
                    .map(|(id, doc, status)| {
                        json!({
                            "AutomationExecutionId": id,
                            "DocumentName": doc,
                            "AutomationExecutionStatus": status
                        })
                    })
                    .collect();
                Ok(json!({"AutomationExecutionMetadataList": list}))
            }
            RemoteOperation::SetupLandingZone {
                log_archive_email,
                audit_email,
                governed_regions,
            } => {
                if self.landing_zone_status == "IN_PROGRESS" {
                    return Err(err("ConflictException", "landing zone setup already running"));
                }
                self.landing_zone_status = "IN_PROGRESS".to_string();
                self.landing_zone_setup = Some(LandingZoneSetup {
                    log_archive_email: log_archive_email.clone(),
                    audit_email: audit_email.clone(),
                    governed_regions: governed_regions.clone(),
                });
                Ok(json!({"OperationIdentifier": Uuid::new_v4().to_string()}))
            }
            RemoteOperation::GetLandingZoneStatus => {
                Ok(json!({"Status": self.landing_zone_status}))
            }
        }
    }
}

#[async_trait]
impl RemoteClient for InMemoryOrganization {
    async fn call(&self, session: &Session, operation: &RemoteOperation) -> Result<Value, RemoteError> {
        let account = session
            .account_id()
            .unwrap_or(&self.management_account_id)
            .to_string();
        let api = operation.api_name();
        {
            let mut state = self.state.lock();
            state.calls.push(CallRecord {
                account: account.clone(),
                session_id: session.session_id(),
                api: api.to_string(),
            });
            if let Some(id) = session.session_id() {
                if !state.active_sessions.contains(&id) {
                    return Err(err("ExpiredTokenException", format!("session {id} is not active")));
                }
            }
            if let Some(error) = state.failures.get_mut(api).and_then(VecDeque::pop_front) {
                return Err(error);
            }
        }
        self.apply(&account, operation)
    }

    async fn assume_role(&self, delegation: &CrossAccountDelegation) -> Result<Session, RemoteError> {
        let mut state = self.state.lock();
        state.calls.push(CallRecord {
            account: delegation.account_id.clone(),
            session_id: None,
            api: "AssumeRole".to_string(),
        });
        if let Some(error) = state.failures.get_mut("AssumeRole").and_then(VecDeque::pop_front) {
            return Err(error);
        }
        if !state.accounts.contains_key(&delegation.account_id) {
            return Err(err(
                "AccessDenied",
                format!("cannot assume {} in {}", delegation.role_name, delegation.account_id),
            ));
        }
        let session = Session::assumed(delegation.clone());
        if let Some(id) = session.session_id() {
            state.active_sessions.insert(id);
        }
        Ok(session)
    }

    async fn release(&self, session: &Session) {
        if let Some(id) = session.session_id() {
            let mut state = self.state.lock();
            state.active_sessions.remove(&id);
            state.released_sessions.insert(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_policy_lifecycle() {
        let org = InMemoryOrganization::new("111111111111");
        let created = org
            .call(
                &Session::Home,
                &RemoteOperation::CreatePolicy {
                    name: "baseline".into(),
                    description: String::new(),
                    content: "{}".into(),
                    policy_type: "SERVICE_CONTROL_POLICY".into(),
                },
            )
            .await
            .unwrap();
        let id = created["Policy"]["PolicySummary"]["Id"].as_str().unwrap().to_string();

        let attach = RemoteOperation::AttachPolicy {
            policy_id: id.clone(),
            target_id: ROOT_ID.into(),
        };
        org.call(&Session::Home, &attach).await.unwrap();
        let duplicate = org.call(&Session::Home, &attach).await.unwrap_err();
        assert!(duplicate.is_already_satisfied());
        assert!(org.is_attached(&id, ROOT_ID));

        let delete = RemoteOperation::DeletePolicy { policy_id: id.clone() };
        assert_eq!(
            org.call(&Session::Home, &delete).await.unwrap_err().code,
            "PolicyInUseException"
        );
    }

    #[tokio::test]
    async fn test_released_session_is_rejected() {
        let org = InMemoryOrganization::new("111111111111").with_account("222222222222", "a@x");
        let session = org
            .assume_role(&CrossAccountDelegation::new("222222222222", "Exec", "eu-west-1"))
            .await
            .unwrap();
        org.call(&session, &RemoteOperation::ListDetectors).await.unwrap();
        org.release(&session).await;

        let error = org.call(&session, &RemoteOperation::ListDetectors).await.unwrap_err();
        assert_eq!(error.code, "ExpiredTokenException");
        assert_eq!(org.active_session_count(), 0);
        assert_eq!(org.released_sessions().len(), 1);
    }

    #[tokio::test]
    async fn test_injected_failure_consumed_once() {
        let org = InMemoryOrganization::new("111111111111");
        org.fail_next("ListRoots", RemoteError::new("ThrottlingException", "slow down"));

        assert!(org.call(&Session::Home, &RemoteOperation::ListRoots).await.is_err());
        assert!(org.call(&Session::Home, &RemoteOperation::ListRoots).await.is_ok());
        assert_eq!(org.call_count("ListRoots"), 2);
    }

    #[tokio::test]
    async fn test_detectors_are_per_account() {
        let org = InMemoryOrganization::new("111111111111").with_admin_account("333333333333");
        assert_eq!(org.detector_of("333333333333").as_deref(), Some("det-333333333333"));

        let first = org
            .call(&Session::Home, &RemoteOperation::CreateDetector { enable: true })
            .await
            .unwrap();
        assert_eq!(first["DetectorId"], "det-111111111111");
        let again = org
            .call(&Session::Home, &RemoteOperation::CreateDetector { enable: true })
            .await
            .unwrap_err();
        assert!(again.is_already_satisfied());
    }
}
