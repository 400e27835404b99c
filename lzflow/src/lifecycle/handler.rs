//! Lifecycle event handling: dispatch, idempotency and timeout budget.

use super::event::{LifecycleRequest, LifecycleResponse, RequestType};
use super::idempotency::{lookup, request_key, CacheLookup, CachedResponse, InMemoryResponseCache, ResponseCache};
use super::kind::CapabilityKind;
use crate::config::OrchestratorConfig;
use crate::errors::OrchestratorError;
use crate::events::{event_types, EventSink, HistoryEvent, NoOpEventSink};
use crate::observability::lifecycle_span;
use crate::remote::{RemoteClient, RemoteOperation, Session};
use crate::retry::retry_transient;
use async_trait::async_trait;
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn, Instrument};

/// How an update request must be carried out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateKind {
    /// Properties are unchanged; nothing to do.
    NoOp,
    /// Re-run the operation against the existing physical resource.
    InPlace,
    /// Produce a new physical resource; the old one is deleted later.
    Replacement,
}

/// What a capability operation produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandlerOutcome {
    /// Physical id of the resource.
    pub physical_resource_id: String,
    /// Output attributes.
    pub data: BTreeMap<String, Value>,
}

impl HandlerOutcome {
    /// An outcome without data.
    #[must_use]
    pub fn new(physical_resource_id: impl Into<String>) -> Self {
        Self {
            physical_resource_id: physical_resource_id.into(),
            data: BTreeMap::new(),
        }
    }

    /// Adds a data attribute.
    #[must_use]
    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }
}

/// Remote access for a capability handler, with retry of transient errors.
pub struct HandlerContext {
    client: Arc<dyn RemoteClient>,
    config: Arc<OrchestratorConfig>,
    session: Session,
}

impl HandlerContext {
    /// Creates a context running in the home account.
    #[must_use]
    pub fn new(client: Arc<dyn RemoteClient>, config: Arc<OrchestratorConfig>) -> Self {
        Self {
            client,
            config,
            session: Session::Home,
        }
    }

    /// The orchestrator configuration.
    #[must_use]
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Calls a remote operation.
    ///
    /// # Errors
    ///
    /// Returns the classified remote error once retries are exhausted.
    pub async fn call(&self, operation: RemoteOperation) -> Result<Value, OrchestratorError> {
        let label = operation.api_name();
        retry_transient(&self.config.handler_retry, label, || {
            self.client.call(&self.session, &operation)
        })
        .await
        .map_err(OrchestratorError::from)
    }

    /// Calls a remote operation and decodes the response.
    ///
    /// # Errors
    ///
    /// Returns remote errors and response shape mismatches.
    pub async fn call_typed<T: DeserializeOwned>(
        &self,
        operation: RemoteOperation,
    ) -> Result<T, OrchestratorError> {
        let response = self.call(operation.clone()).await?;
        operation.decode_response(response)
    }
}

/// Performs one capability's create/update/delete operations.
#[async_trait]
pub trait CapabilityHandler: Send + Sync {
    /// The capability served.
    fn kind(&self) -> CapabilityKind;

    /// Classifies an update. By default any property change is in place.
    ///
    /// # Errors
    ///
    /// Returns `InvalidRequest` for malformed properties.
    fn classify_update(&self, request: &LifecycleRequest) -> Result<UpdateKind, OrchestratorError> {
        Ok(match &request.old_resource_properties {
            Some(old) if *old == request.resource_properties => UpdateKind::NoOp,
            _ => UpdateKind::InPlace,
        })
    }

    /// Handles `Create`.
    async fn create(
        &self,
        ctx: &HandlerContext,
        request: &LifecycleRequest,
    ) -> Result<HandlerOutcome, OrchestratorError>;

    /// Handles `Update`, already classified.
    async fn update(
        &self,
        ctx: &HandlerContext,
        request: &LifecycleRequest,
        kind: UpdateKind,
    ) -> Result<HandlerOutcome, OrchestratorError>;

    /// Handles `Delete`. Absent resources are success.
    async fn delete(
        &self,
        ctx: &HandlerContext,
        request: &LifecycleRequest,
    ) -> Result<HandlerOutcome, OrchestratorError>;
}

/// Receives lifecycle events for one capability and answers them.
///
/// Redeliveries are answered from the response cache; concurrent deliveries
/// of the same request are serialized so the second one sees the first one's
/// cached response.
pub struct LifecycleEventHandler {
    handler: Arc<dyn CapabilityHandler>,
    client: Arc<dyn RemoteClient>,
    config: Arc<OrchestratorConfig>,
    cache: Arc<dyn ResponseCache>,
    sink: Arc<dyn EventSink>,
    inflight: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
}

impl std::fmt::Debug for LifecycleEventHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleEventHandler")
            .field("kind", &self.handler.kind())
            .finish_non_exhaustive()
    }
}

impl LifecycleEventHandler {
    /// Creates a handler with an in-memory cache and no event sink.
    #[must_use]
    pub fn new(
        handler: Arc<dyn CapabilityHandler>,
        client: Arc<dyn RemoteClient>,
        config: Arc<OrchestratorConfig>,
    ) -> Self {
        Self {
            handler,
            client,
            config,
            cache: Arc::new(InMemoryResponseCache::new()),
            sink: Arc::new(NoOpEventSink),
            inflight: DashMap::new(),
        }
    }

    /// Uses `cache` for responses.
    #[must_use]
    pub fn with_cache(mut self, cache: Arc<dyn ResponseCache>) -> Self {
        self.cache = cache;
        self
    }

    /// Records history in `sink`.
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    /// The capability served.
    #[must_use]
    pub fn kind(&self) -> CapabilityKind {
        self.handler.kind()
    }

    /// Answers one lifecycle request. Never fails: errors become `FAILED`
    /// responses carrying the reason.
    pub async fn handle(&self, request: LifecycleRequest) -> LifecycleResponse {
        let span = lifecycle_span(
            &request.request_type.to_string(),
            &request.logical_resource_id,
            &request.request_id,
        );
        self.handle_serialized(request).instrument(span).await
    }

    async fn handle_serialized(&self, request: LifecycleRequest) -> LifecycleResponse {
        let key = request_key(&request);
        let gate = self.inflight.entry(key.clone()).or_default().clone();
        let response = {
            let _guard = gate.lock().await;
            self.handle_once(&key, &request).await
        };
        drop(gate);
        self.inflight.remove_if(&key, |_, gate| Arc::strong_count(gate) == 1);
        response
    }

    async fn handle_once(&self, key: &str, request: &LifecycleRequest) -> LifecycleResponse {
        self.emit(event_types::LIFECYCLE_RECEIVED, request, json!({}));

        match lookup(self.cache.as_ref(), request).await {
            CacheLookup::Hit(response) => {
                info!("Redelivered request answered from cache");
                self.emit(
                    event_types::LIFECYCLE_REPLAYED,
                    request,
                    json!({"physical_resource_id": response.physical_resource_id}),
                );
                return response;
            }
            CacheLookup::Conflict { key } => {
                let err = OrchestratorError::IdempotencyConflict { key };
                warn!(error = %err, "Rejecting request");
                return self.fail(request, &err);
            }
            CacheLookup::Miss => {}
        }

        let budget = self.config.handler_timeout();
        let outcome = match tokio::time::timeout(budget, self.dispatch(request)).await {
            Ok(result) => result,
            Err(_) => Err(OrchestratorError::timeout(
                format!("{} of {}", request.request_type, request.logical_resource_id),
                budget.as_secs_f64(),
            )),
        };

        match outcome {
            Ok(outcome) => {
                let response =
                    LifecycleResponse::success(request, outcome.physical_resource_id, outcome.data);
                let entry = CachedResponse::new(request, response.clone())
                    .with_ttl(Duration::from_secs(self.config.idempotency_ttl_seconds));
                self.cache.put(key, entry).await;
                info!(physical_id = %response.physical_resource_id, "Lifecycle request succeeded");
                self.emit(
                    event_types::LIFECYCLE_SUCCEEDED,
                    request,
                    json!({"physical_resource_id": response.physical_resource_id, "data": response.data}),
                );
                response
            }
            Err(err) => {
                warn!(error = %err, "Lifecycle request failed");
                self.fail(request, &err)
            }
        }
    }

    async fn dispatch(&self, request: &LifecycleRequest) -> Result<HandlerOutcome, OrchestratorError> {
        let ctx = HandlerContext::new(self.client.clone(), self.config.clone());
        let result = match request.request_type {
            RequestType::Create => self.handler.create(&ctx, request).await,
            RequestType::Update => {
                let kind = self.handler.classify_update(request)?;
                debug!(update_kind = ?kind, "Classified update");
                self.handler.update(&ctx, request, kind).await
            }
            RequestType::Delete => self.handler.delete(&ctx, request).await,
        };

        match result {
            Err(err) if err.is_already_satisfied() => {
                debug!(error = %err, "Target state already holds");
                Ok(HandlerOutcome::new(
                    request
                        .physical_resource_id
                        .clone()
                        .unwrap_or_else(|| request.logical_resource_id.clone()),
                ))
            }
            other => other,
        }
    }

    fn fail(&self, request: &LifecycleRequest, err: &OrchestratorError) -> LifecycleResponse {
        let response = LifecycleResponse::failure(request, err.to_string());
        self.emit(
            event_types::LIFECYCLE_FAILED,
            request,
            json!({"reason": response.reason}),
        );
        response
    }

    fn emit(&self, event_type: &str, request: &LifecycleRequest, extra: Value) {
        let mut data = json!({
            "capability": self.handler.kind().resource_type(),
            "request_type": request.request_type,
            "logical_resource_id": request.logical_resource_id,
            "request_id": request.request_id,
        });
        if let (Some(target), Value::Object(extra)) = (data.as_object_mut(), extra) {
            target.extend(extra);
        }
        self.sink.emit(HistoryEvent::new(event_type, data));
    }
}
