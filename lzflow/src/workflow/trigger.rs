//! Event-pattern subscriptions that start workflow executions.

use super::engine::WorkflowEngine;
use crate::errors::OrchestratorError;
use crate::events::{event_types, EventSink, HistoryEvent, NoOpEventSink};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// An event published by the organization, e.g. a landing zone update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrgEvent {
    /// Event source.
    pub source: String,
    /// Event type.
    #[serde(rename = "detail-type", default)]
    pub detail_type: String,
    /// Event payload.
    #[serde(default)]
    pub detail: Value,
}

impl OrgEvent {
    /// Creates an event.
    #[must_use]
    pub fn new(source: impl Into<String>, detail_type: impl Into<String>, detail: Value) -> Self {
        Self {
            source: source.into(),
            detail_type: detail_type.into(),
            detail,
        }
    }
}

/// Matches events by source, type and detail fields.
///
/// Empty lists match anything. Detail matchers are nested objects whose
/// leaves are lists of accepted values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventPattern {
    /// Accepted sources.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub source: Vec<String>,
    /// Accepted event types.
    #[serde(rename = "detail-type", default, skip_serializing_if = "Vec::is_empty")]
    pub detail_type: Vec<String>,
    /// Detail matchers.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub detail: Map<String, Value>,
}

fn detail_matches(pattern: &Map<String, Value>, detail: &Value) -> bool {
    pattern.iter().all(|(key, expected)| {
        let actual = detail.get(key);
        match (expected, actual) {
            (Value::Object(nested), Some(actual)) => detail_matches(nested, actual),
            (Value::Array(accepted), Some(actual)) => accepted.contains(actual),
            (other, Some(actual)) => other == actual,
            (_, None) => false,
        }
    })
}

impl EventPattern {
    /// A pattern on the event source.
    #[must_use]
    pub fn source(source: impl Into<String>) -> Self {
        Self {
            source: vec![source.into()],
            ..Self::default()
        }
    }

    /// Also requires the event type.
    #[must_use]
    pub fn with_detail_type(mut self, detail_type: impl Into<String>) -> Self {
        self.detail_type.push(detail_type.into());
        self
    }

    /// Also requires `detail.<key>` to be one of `values`.
    #[must_use]
    pub fn with_detail(mut self, key: impl Into<String>, values: impl IntoIterator<Item = impl Into<Value>>) -> Self {
        self.detail.insert(
            key.into(),
            Value::Array(values.into_iter().map(Into::into).collect()),
        );
        self
    }

    /// Returns true if `event` matches.
    #[must_use]
    pub fn matches(&self, event: &OrgEvent) -> bool {
        (self.source.is_empty() || self.source.contains(&event.source))
            && (self.detail_type.is_empty() || self.detail_type.contains(&event.detail_type))
            && detail_matches(&self.detail, &event.detail)
    }
}

/// Starts `definition_id` whenever an event matches `pattern`.
#[derive(Debug, Clone, PartialEq)]
pub struct EventRule {
    /// Unique rule id.
    pub id: String,
    /// Events that fire the rule.
    pub pattern: EventPattern,
    /// Definition started.
    pub definition_id: String,
    /// Parameters passed to each execution.
    pub parameters: BTreeMap<String, Value>,
}

impl EventRule {
    /// Creates a rule.
    #[must_use]
    pub fn new(id: impl Into<String>, pattern: EventPattern, definition_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            pattern,
            definition_id: definition_id.into(),
            parameters: BTreeMap::new(),
        }
    }

    /// Sets an execution parameter.
    #[must_use]
    pub fn with_parameter(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.insert(name.into(), value.into());
        self
    }
}

/// Dispatches published events to subscribed rules.
pub struct TriggerRouter {
    engine: WorkflowEngine,
    rules: RwLock<Vec<EventRule>>,
    sink: Arc<dyn EventSink>,
}

impl std::fmt::Debug for TriggerRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TriggerRouter")
            .field("rules", &self.rules.read().len())
            .finish_non_exhaustive()
    }
}

impl TriggerRouter {
    /// Creates a router without rules.
    #[must_use]
    pub fn new(engine: WorkflowEngine) -> Self {
        Self {
            engine,
            rules: RwLock::new(Vec::new()),
            sink: Arc::new(NoOpEventSink),
        }
    }

    /// Records `trigger.matched` events in `sink`.
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Adds a rule.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for unregistered definitions and `InvalidRequest`
    /// for duplicate rule ids.
    pub fn subscribe(&self, rule: EventRule) -> Result<(), OrchestratorError> {
        if self.engine.definition(&rule.definition_id).is_none() {
            return Err(OrchestratorError::not_found("workflow definition", rule.definition_id));
        }
        let mut rules = self.rules.write();
        if rules.iter().any(|r| r.id == rule.id) {
            return Err(OrchestratorError::InvalidRequest(format!(
                "rule '{}' is already subscribed",
                rule.id
            )));
        }
        info!(rule = %rule.id, definition_id = %rule.definition_id, "Subscribed event rule");
        rules.push(rule);
        Ok(())
    }

    /// Removes a rule. Returns false if it was not subscribed.
    pub fn unsubscribe(&self, rule_id: &str) -> bool {
        let mut rules = self.rules.write();
        let before = rules.len();
        rules.retain(|r| r.id != rule_id);
        rules.len() != before
    }

    /// Subscribed rules.
    #[must_use]
    pub fn rules(&self) -> Vec<EventRule> {
        self.rules.read().clone()
    }

    /// Starts an execution for every matching rule and returns their ids.
    /// Executions run in the background; start failures are logged.
    pub async fn publish(&self, event: &OrgEvent) -> Vec<Uuid> {
        let matching: Vec<EventRule> = self
            .rules
            .read()
            .iter()
            .filter(|r| r.pattern.matches(event))
            .cloned()
            .collect();

        let mut started = Vec::with_capacity(matching.len());
        for rule in matching {
            match self.engine.start(&rule.definition_id, rule.parameters.clone()).await {
                Ok(execution_id) => {
                    info!(rule = %rule.id, %execution_id, source = %event.source, "Event started workflow");
                    self.sink.emit(
                        HistoryEvent::new(
                            event_types::TRIGGER_MATCHED,
                            json!({
                                "rule": rule.id,
                                "definition_id": rule.definition_id,
                                "source": event.source,
                                "detail_type": event.detail_type,
                            }),
                        )
                        .for_execution(execution_id),
                    );
                    started.push(execution_id);
                }
                Err(e) => warn!(rule = %rule.id, error = %e, "Event rule could not start workflow"),
            }
        }
        started
    }
}
