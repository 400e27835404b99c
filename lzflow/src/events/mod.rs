//! Execution history events.
//!
//! Sinks are passed explicitly to the engine, the lifecycle handlers and the
//! wait bridge. There is no process-wide sink.

mod sink;

pub use sink::{CollectingEventSink, EventSink, HistoryEvent, LoggingEventSink, NoOpEventSink};

/// Event type names.
pub mod event_types {
    /// A definition passed validation and was registered.
    pub const DEFINITION_REGISTERED: &str = "definition.registered";
    /// A definition failed validation.
    pub const DEFINITION_REJECTED: &str = "definition.rejected";
    /// An execution started.
    pub const WORKFLOW_STARTED: &str = "workflow.started";
    /// An execution reached an end step.
    pub const WORKFLOW_SUCCEEDED: &str = "workflow.succeeded";
    /// An execution failed.
    pub const WORKFLOW_FAILED: &str = "workflow.failed";
    /// An execution timed out.
    pub const WORKFLOW_TIMED_OUT: &str = "workflow.timed_out";
    /// A step started.
    pub const STEP_STARTED: &str = "step.started";
    /// A step completed (succeeded or tolerated).
    pub const STEP_COMPLETED: &str = "step.completed";
    /// A step failed or timed out.
    pub const STEP_FAILED: &str = "step.failed";
    /// A lifecycle request was received.
    pub const LIFECYCLE_RECEIVED: &str = "lifecycle.received";
    /// A lifecycle request was answered from the response cache.
    pub const LIFECYCLE_REPLAYED: &str = "lifecycle.replayed";
    /// A lifecycle request succeeded.
    pub const LIFECYCLE_SUCCEEDED: &str = "lifecycle.succeeded";
    /// A lifecycle request failed.
    pub const LIFECYCLE_FAILED: &str = "lifecycle.failed";
    /// A wait signal was consumed.
    pub const SIGNAL_ACCEPTED: &str = "signal.accepted";
    /// A duplicate or late wait signal was ignored.
    pub const SIGNAL_IGNORED: &str = "signal.ignored";
    /// A wait signal expired.
    pub const SIGNAL_EXPIRED: &str = "signal.expired";
    /// A published event matched a trigger rule.
    pub const TRIGGER_MATCHED: &str = "trigger.matched";
}
