//! The workflow engine: definition registry, execution triggering and status.

use super::definition::WorkflowDefinition;
use super::document::from_document;
use super::executor::Scope;
use super::validate::validate_definition;
use crate::config::EngineConfig;
use crate::core::{ExecutionStatus, WorkflowExecution};
use crate::errors::OrchestratorError;
use crate::events::{event_types, EventSink, HistoryEvent, NoOpEventSink};
use crate::remote::RemoteClient;
use crate::store::{ExecutionStore, InMemoryExecutionStore};
use crate::wait::{SignalPayload, WaitConditionBridge, WaitToken};
use parking_lot::RwLock;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

pub(super) struct EngineInner {
    pub(super) client: Arc<dyn RemoteClient>,
    pub(super) store: Arc<dyn ExecutionStore>,
    pub(super) definitions: RwLock<HashMap<String, Arc<WorkflowDefinition>>>,
    pub(super) sink: Arc<dyn EventSink>,
    pub(super) config: EngineConfig,
    bridge: Option<WaitConditionBridge>,
}

/// Builder for [`WorkflowEngine`].
pub struct WorkflowEngineBuilder {
    client: Arc<dyn RemoteClient>,
    store: Arc<dyn ExecutionStore>,
    sink: Arc<dyn EventSink>,
    config: EngineConfig,
    bridge: Option<WaitConditionBridge>,
}

impl WorkflowEngineBuilder {
    /// Sets the execution store.
    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn ExecutionStore>) -> Self {
        self.store = store;
        self
    }

    /// Sets the history event sink.
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Sets the engine configuration.
    #[must_use]
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the bridge used to escalate terminal statuses.
    #[must_use]
    pub fn with_bridge(mut self, bridge: WaitConditionBridge) -> Self {
        self.bridge = Some(bridge);
        self
    }

    /// Builds the engine.
    #[must_use]
    pub fn build(self) -> WorkflowEngine {
        WorkflowEngine {
            inner: Arc::new(EngineInner {
                client: self.client,
                store: self.store,
                definitions: RwLock::new(HashMap::new()),
                sink: self.sink,
                config: self.config,
                bridge: self.bridge,
            }),
        }
    }
}

/// Executes registered workflow definitions.
///
/// Cloning is cheap; clones share definitions, store and sink.
#[derive(Clone)]
pub struct WorkflowEngine {
    inner: Arc<EngineInner>,
}

impl std::fmt::Debug for WorkflowEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowEngine")
            .field("definitions", &self.definition_ids())
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

/// Applies defaults and rejects unknown or missing parameters.
pub(super) fn bind_parameters(
    definition: &WorkflowDefinition,
    mut provided: BTreeMap<String, Value>,
) -> Result<BTreeMap<String, Value>, OrchestratorError> {
    if let Some(unknown) = provided.keys().find(|k| definition.parameter(k).is_none()) {
        return Err(OrchestratorError::InvalidRequest(format!(
            "unknown parameter '{unknown}' for workflow '{}'",
            definition.id
        )));
    }
    let mut bound = BTreeMap::new();
    for param in &definition.parameters {
        let value = provided
            .remove(&param.name)
            .or_else(|| param.default.clone())
            .ok_or_else(|| {
                OrchestratorError::InvalidRequest(format!(
                    "missing required parameter '{}' for workflow '{}'",
                    param.name, definition.id
                ))
            })?;
        bound.insert(param.name.clone(), value);
    }
    Ok(bound)
}

impl WorkflowEngine {
    /// Starts building an engine with an in-memory store and no event sink.
    #[must_use]
    pub fn builder(client: Arc<dyn RemoteClient>) -> WorkflowEngineBuilder {
        WorkflowEngineBuilder {
            client,
            store: Arc::new(InMemoryExecutionStore::new()),
            sink: Arc::new(NoOpEventSink),
            config: EngineConfig::default(),
            bridge: None,
        }
    }

    /// Creates an engine with default settings.
    #[must_use]
    pub fn new(client: Arc<dyn RemoteClient>) -> Self {
        Self::builder(client).build()
    }

    /// The engine configuration.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Validates and registers a definition, replacing one with the same id.
    /// Definitions that delegate to others must be registered after them.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` with a contract code when validation fails.
    pub fn register(&self, definition: WorkflowDefinition) -> Result<(), OrchestratorError> {
        let validation = {
            let definitions = self.inner.definitions.read();
            let lookup = |id: &str| definitions.get(id).map(|d| &**d);
            validate_definition(&definition, &lookup)
        };

        if let Err(err) = validation {
            warn!(definition_id = %definition.id, code = ?err.code(), error = %err, "Rejected workflow definition");
            self.inner.sink.emit(HistoryEvent::new(
                event_types::DEFINITION_REJECTED,
                json!({
                    "definition_id": definition.id,
                    "code": err.code(),
                    "error": err.message,
                    "detail": err.to_dict(),
                }),
            ));
            return Err(err.into());
        }

        info!(definition_id = %definition.id, steps = definition.steps.len(), "Registered workflow definition");
        self.inner.sink.emit(HistoryEvent::new(
            event_types::DEFINITION_REGISTERED,
            json!({ "definition_id": definition.id, "steps": definition.steps.len() }),
        ));
        self.inner
            .definitions
            .write()
            .insert(definition.id.clone(), Arc::new(definition));
        Ok(())
    }

    /// Parses an automation document and registers it as `id`.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` for malformed or invalid documents.
    pub fn register_document(&self, id: &str, document: &Value) -> Result<(), OrchestratorError> {
        self.register(from_document(id, document)?)
    }

    /// Looks up a registered definition.
    #[must_use]
    pub fn definition(&self, id: &str) -> Option<Arc<WorkflowDefinition>> {
        self.inner.definitions.read().get(id).cloned()
    }

    /// Ids of all registered definitions, sorted.
    #[must_use]
    pub fn definition_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.inner.definitions.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    async fn prepare(
        &self,
        definition_id: &str,
        parameters: BTreeMap<String, Value>,
    ) -> Result<(Arc<WorkflowDefinition>, WorkflowExecution), OrchestratorError> {
        let definition = self
            .definition(definition_id)
            .ok_or_else(|| OrchestratorError::not_found("workflow definition", definition_id))?;
        let parameters = bind_parameters(&definition, parameters)?;
        let execution = WorkflowExecution::new(definition_id, parameters);
        self.inner.store.put(&execution).await?;
        Ok((definition, execution))
    }

    /// Runs an execution to completion.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for unknown definitions and `InvalidRequest` for bad
    /// parameters. Step failures are reported in the returned record.
    pub async fn run(
        &self,
        definition_id: &str,
        parameters: BTreeMap<String, Value>,
    ) -> Result<WorkflowExecution, OrchestratorError> {
        let (definition, mut execution) = self.prepare(definition_id, parameters).await?;
        self.inner
            .execute(definition, &mut execution, Scope::home(None))
            .await;
        Ok(execution)
    }

    /// Runs an execution that must finish within `deadline`. Steps in flight
    /// are not cancelled; waits and sleeps end at the deadline and no further
    /// step starts after it, leaving the execution `TimedOut`.
    ///
    /// # Errors
    ///
    /// See [`Self::run`].
    pub async fn run_with_deadline(
        &self,
        definition_id: &str,
        parameters: BTreeMap<String, Value>,
        deadline: Duration,
    ) -> Result<WorkflowExecution, OrchestratorError> {
        let (definition, mut execution) = self.prepare(definition_id, parameters).await?;
        self.inner
            .execute(definition, &mut execution, Scope::home(Some(Instant::now() + deadline)))
            .await;
        Ok(execution)
    }

    /// Starts an execution in the background and returns its id.
    ///
    /// # Errors
    ///
    /// See [`Self::run`].
    pub async fn start(
        &self,
        definition_id: &str,
        parameters: BTreeMap<String, Value>,
    ) -> Result<Uuid, OrchestratorError> {
        self.spawn(definition_id, parameters, None).await
    }

    /// Starts an execution in the background whose terminal status is
    /// delivered as a signal for `token`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidRequest` if the engine has no wait bridge, otherwise
    /// see [`Self::run`].
    pub async fn start_with_escalation(
        &self,
        definition_id: &str,
        parameters: BTreeMap<String, Value>,
        token: WaitToken,
    ) -> Result<Uuid, OrchestratorError> {
        if self.inner.bridge.is_none() {
            return Err(OrchestratorError::InvalidRequest(
                "engine has no wait bridge to escalate to".to_string(),
            ));
        }
        self.spawn(definition_id, parameters, Some(token)).await
    }

    async fn spawn(
        &self,
        definition_id: &str,
        parameters: BTreeMap<String, Value>,
        escalation: Option<WaitToken>,
    ) -> Result<Uuid, OrchestratorError> {
        let (definition, mut execution) = self.prepare(definition_id, parameters).await?;
        let id = execution.id;
        let inner = self.inner.clone();
        tokio::spawn(async move {
            inner.execute(definition, &mut execution, Scope::home(None)).await;
            if let Some(token) = escalation {
                inner.escalate(&token, &execution).await;
            }
        });
        Ok(id)
    }

    /// Returns the current record of an execution.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for unknown ids.
    pub async fn get_status(&self, execution_id: Uuid) -> Result<WorkflowExecution, OrchestratorError> {
        self.inner
            .store
            .get(execution_id)
            .await?
            .ok_or_else(|| OrchestratorError::not_found("execution", execution_id.to_string()))
    }

    /// Delegated child executions of `execution_id`.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn children(&self, execution_id: Uuid) -> Result<Vec<WorkflowExecution>, OrchestratorError> {
        self.inner.store.children(execution_id).await
    }
}

impl EngineInner {
    async fn escalate(&self, token: &WaitToken, execution: &WorkflowExecution) {
        let Some(bridge) = &self.bridge else { return };
        let payload = match execution.status {
            ExecutionStatus::Succeeded => SignalPayload::success().with_data(json!({
                "execution_id": execution.id,
                "outputs": execution.outputs,
            })),
            _ => SignalPayload::failure(format!(
                "execution {} {}: {}",
                execution.id,
                execution.status,
                execution.failure_reason.as_deref().unwrap_or("no reason recorded")
            )),
        };
        match bridge.signal(token, payload).await {
            Ok(outcome) => info!(execution_id = %execution.id, token = %token, ?outcome, "Escalated execution status"),
            Err(e) => warn!(execution_id = %execution.id, token = %token, error = %e, "Escalation failed"),
        }
    }
}
