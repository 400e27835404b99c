//! Event sink trait and implementations.

use crate::utils::iso_timestamp;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, Level};
use uuid::Uuid;

/// One entry of execution history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEvent {
    /// Dotted event type, e.g. `step.completed`.
    pub event_type: String,
    /// The workflow execution this belongs to, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_id: Option<Uuid>,
    /// Event payload.
    #[serde(default)]
    pub data: Value,
    /// When the event was recorded.
    pub timestamp: String,
}

impl HistoryEvent {
    /// Creates an event stamped with the current time.
    #[must_use]
    pub fn new(event_type: impl Into<String>, data: Value) -> Self {
        Self {
            event_type: event_type.into(),
            execution_id: None,
            data,
            timestamp: iso_timestamp(),
        }
    }

    /// Associates the event with an execution.
    #[must_use]
    pub fn for_execution(mut self, id: Uuid) -> Self {
        self.execution_id = Some(id);
        self
    }
}

/// Receives execution history events.
///
/// Emission never fails and never blocks on I/O; sinks that forward events
/// elsewhere must buffer internally.
pub trait EventSink: Send + Sync {
    /// Records an event.
    fn emit(&self, event: HistoryEvent);
}

/// Discards all events.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpEventSink;

impl EventSink for NoOpEventSink {
    fn emit(&self, _event: HistoryEvent) {}
}

/// Writes events to the tracing subscriber.
#[derive(Debug, Clone)]
pub struct LoggingEventSink {
    level: Level,
}

impl Default for LoggingEventSink {
    fn default() -> Self {
        Self { level: Level::INFO }
    }
}

impl LoggingEventSink {
    /// Creates a logging sink at `level`. Anything but DEBUG logs at INFO.
    #[must_use]
    pub fn new(level: Level) -> Self {
        Self { level }
    }

    /// Creates a debug-level logging sink.
    #[must_use]
    pub fn debug() -> Self {
        Self::new(Level::DEBUG)
    }
}

impl EventSink for LoggingEventSink {
    fn emit(&self, event: HistoryEvent) {
        let execution_id = event.execution_id.map(|id| id.to_string());
        if self.level == Level::DEBUG {
            debug!(
                event_type = %event.event_type,
                execution_id = ?execution_id,
                event_data = %event.data,
                "Event: {}", event.event_type
            );
        } else {
            info!(
                event_type = %event.event_type,
                execution_id = ?execution_id,
                event_data = %event.data,
                "Event: {}", event.event_type
            );
        }
    }
}

/// Keeps every event in memory; used by tests and dry runs.
#[derive(Debug, Default)]
pub struct CollectingEventSink {
    events: parking_lot::RwLock<Vec<HistoryEvent>>,
}

impl CollectingEventSink {
    /// Creates an empty collecting sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all collected events.
    #[must_use]
    pub fn events(&self) -> Vec<HistoryEvent> {
        self.events.read().clone()
    }

    /// Returns the collected event types in order.
    #[must_use]
    pub fn event_types(&self) -> Vec<String> {
        self.events.read().iter().map(|e| e.event_type.clone()).collect()
    }

    /// Returns the number of collected events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    /// Returns true if nothing was collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    /// Returns events whose type starts with `prefix`.
    #[must_use]
    pub fn events_of_type(&self, prefix: &str) -> Vec<HistoryEvent> {
        self.events
            .read()
            .iter()
            .filter(|e| e.event_type.starts_with(prefix))
            .cloned()
            .collect()
    }

    /// Returns the events of one execution.
    #[must_use]
    pub fn events_for(&self, execution_id: Uuid) -> Vec<HistoryEvent> {
        self.events
            .read()
            .iter()
            .filter(|e| e.execution_id == Some(execution_id))
            .cloned()
            .collect()
    }
}

impl EventSink for CollectingEventSink {
    fn emit(&self, event: HistoryEvent) {
        self.events.write().push(event);
    }
}
