//! Lifecycle request and response contract.
//!
//! JSON-compatible with the custom-resource provider protocol: PascalCase
//! keys, `SUCCESS`/`FAILED` statuses.

use crate::errors::OrchestratorError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

/// Lifecycle phase of a capability resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RequestType {
    /// Resource is being created.
    Create,
    /// Resource properties changed.
    Update,
    /// Resource is being removed.
    Delete,
}

impl fmt::Display for RequestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create => write!(f, "Create"),
            Self::Update => write!(f, "Update"),
            Self::Delete => write!(f, "Delete"),
        }
    }
}

/// A lifecycle event delivered by the declarative layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LifecycleRequest {
    /// Create, Update or Delete.
    pub request_type: RequestType,
    /// Unique per delivery attempt chain; redeliveries reuse it.
    #[serde(default)]
    pub request_id: String,
    /// Owning stack.
    #[serde(default)]
    pub stack_id: String,
    /// Logical id of the resource within the stack.
    pub logical_resource_id: String,
    /// Declared resource type, e.g. `Custom::EnableSCP`.
    #[serde(default)]
    pub resource_type: String,
    /// Token routing the request to its handler.
    #[serde(default)]
    pub service_token: String,
    /// Current properties.
    #[serde(default)]
    pub resource_properties: Map<String, Value>,
    /// Previous properties, for updates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_resource_properties: Option<Map<String, Value>>,
    /// Physical id returned by an earlier create, for updates and deletes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub physical_resource_id: Option<String>,
}

impl LifecycleRequest {
    fn new(request_type: RequestType, logical_id: impl Into<String>, properties: Value) -> Self {
        Self {
            request_type,
            request_id: uuid::Uuid::new_v4().to_string(),
            stack_id: String::new(),
            logical_resource_id: logical_id.into(),
            resource_type: String::new(),
            service_token: String::new(),
            resource_properties: into_map(properties),
            old_resource_properties: None,
            physical_resource_id: None,
        }
    }

    /// A create request with a fresh request id.
    #[must_use]
    pub fn create(logical_id: impl Into<String>, properties: Value) -> Self {
        Self::new(RequestType::Create, logical_id, properties)
    }

    /// An update request from `old` to `new` properties.
    #[must_use]
    pub fn update(
        logical_id: impl Into<String>,
        physical_id: impl Into<String>,
        old: Value,
        new: Value,
    ) -> Self {
        let mut request = Self::new(RequestType::Update, logical_id, new);
        request.old_resource_properties = Some(into_map(old));
        request.physical_resource_id = Some(physical_id.into());
        request
    }

    /// A delete request.
    #[must_use]
    pub fn delete(logical_id: impl Into<String>, physical_id: impl Into<String>, properties: Value) -> Self {
        let mut request = Self::new(RequestType::Delete, logical_id, properties);
        request.physical_resource_id = Some(physical_id.into());
        request
    }

    /// Sets the request id.
    #[must_use]
    pub fn with_request_id(mut self, id: impl Into<String>) -> Self {
        self.request_id = id.into();
        self
    }

    /// Sets the stack id.
    #[must_use]
    pub fn with_stack_id(mut self, id: impl Into<String>) -> Self {
        self.stack_id = id.into();
        self
    }

    /// Sets the service token.
    #[must_use]
    pub fn with_service_token(mut self, token: impl Into<String>) -> Self {
        self.service_token = token.into();
        self
    }

    /// Sets the resource type.
    #[must_use]
    pub fn with_resource_type(mut self, resource_type: impl Into<String>) -> Self {
        self.resource_type = resource_type.into();
        self
    }

    /// Returns a required string property.
    ///
    /// # Errors
    ///
    /// Returns `InvalidRequest` if the property is missing, empty or not a string.
    pub fn required_str(&self, key: &str) -> Result<&str, OrchestratorError> {
        match self.resource_properties.get(key) {
            Some(Value::String(s)) if !s.trim().is_empty() => Ok(s),
            Some(_) => Err(OrchestratorError::InvalidRequest(format!(
                "property {key} of {} must be a non-empty string",
                self.logical_resource_id
            ))),
            None => Err(OrchestratorError::InvalidRequest(format!(
                "property {key} of {} is required",
                self.logical_resource_id
            ))),
        }
    }

    /// Returns an optional string property.
    #[must_use]
    pub fn optional_str(&self, key: &str) -> Option<&str> {
        self.resource_properties
            .get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
    }
}

fn into_map(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

/// Reads a boolean property that may be a JSON bool or a `"true"`/`"false"` string.
///
/// # Errors
///
/// Returns `InvalidRequest` for other values.
pub fn bool_property(
    properties: &Map<String, Value>,
    key: &str,
    default: bool,
) -> Result<bool, OrchestratorError> {
    match properties.get(key) {
        None | Some(Value::Null) => Ok(default),
        Some(Value::Bool(b)) => Ok(*b),
        Some(Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
            "true" => Ok(true),
            "false" => Ok(false),
            _ => Err(OrchestratorError::InvalidRequest(format!(
                "property {key} must be true or false, got '{s}'"
            ))),
        },
        Some(other) => Err(OrchestratorError::InvalidRequest(format!(
            "property {key} must be true or false, got {other}"
        ))),
    }
}

/// Outcome reported back to the declarative layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResponseStatus {
    /// The operation completed.
    Success,
    /// The operation failed; see `Reason`.
    Failed,
}

/// Response to a lifecycle request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LifecycleResponse {
    /// Success or failure.
    pub status: ResponseStatus,
    /// Physical id of the resource.
    pub physical_resource_id: String,
    /// Output attributes.
    #[serde(default)]
    pub data: BTreeMap<String, Value>,
    /// Failure reason.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Echoed request id.
    pub request_id: String,
    /// Echoed logical id.
    pub logical_resource_id: String,
    /// Echoed stack id.
    pub stack_id: String,
}

impl LifecycleResponse {
    /// A success response for `request`.
    #[must_use]
    pub fn success(
        request: &LifecycleRequest,
        physical_id: impl Into<String>,
        data: BTreeMap<String, Value>,
    ) -> Self {
        Self {
            status: ResponseStatus::Success,
            physical_resource_id: physical_id.into(),
            data,
            reason: None,
            request_id: request.request_id.clone(),
            logical_resource_id: request.logical_resource_id.clone(),
            stack_id: request.stack_id.clone(),
        }
    }

    /// A failure response. The physical id falls back to the incoming one,
    /// else to the logical id.
    #[must_use]
    pub fn failure(request: &LifecycleRequest, reason: impl Into<String>) -> Self {
        let physical_id = request
            .physical_resource_id
            .clone()
            .unwrap_or_else(|| request.logical_resource_id.clone());
        Self {
            status: ResponseStatus::Failed,
            physical_resource_id: physical_id,
            data: BTreeMap::new(),
            reason: Some(reason.into()),
            request_id: request.request_id.clone(),
            logical_resource_id: request.logical_resource_id.clone(),
            stack_id: request.stack_id.clone(),
        }
    }

    /// Returns true for success responses.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == ResponseStatus::Success
    }
}
