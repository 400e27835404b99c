//! Test fixtures wiring the in-memory pieces into an engine.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;

use super::organization::InMemoryOrganization;
use crate::config::EngineConfig;
use crate::events::CollectingEventSink;
use crate::store::{InMemoryExecutionStore, InMemoryWaitSignalStore};
use crate::wait::WaitConditionBridge;
use crate::workflow::WorkflowEngine;

/// An engine over an in-memory organization, with a collecting sink, an
/// in-memory store and a wait bridge.
#[derive(Debug, Clone)]
pub struct EngineFixture {
    /// The fake organization every call runs against.
    pub org: Arc<InMemoryOrganization>,
    /// Collected history events.
    pub sink: Arc<CollectingEventSink>,
    /// Execution records.
    pub store: Arc<InMemoryExecutionStore>,
    /// Bridge the engine escalates to.
    pub bridge: WaitConditionBridge,
    /// The engine.
    pub engine: WorkflowEngine,
}

impl EngineFixture {
    /// Creates a fixture with the default engine configuration.
    #[must_use]
    pub fn new(org: InMemoryOrganization) -> Self {
        Self::with_config(org, EngineConfig::default())
    }

    /// Creates a fixture with `config`.
    #[must_use]
    pub fn with_config(org: InMemoryOrganization, config: EngineConfig) -> Self {
        let org = Arc::new(org);
        let sink = Arc::new(CollectingEventSink::new());
        let store = Arc::new(InMemoryExecutionStore::new());
        let bridge = WaitConditionBridge::with_sink(Arc::new(InMemoryWaitSignalStore::new()), sink.clone());
        let engine = WorkflowEngine::builder(org.clone())
            .with_store(store.clone())
            .with_sink(sink.clone())
            .with_config(config)
            .with_bridge(bridge.clone())
            .build();
        Self {
            org,
            sink,
            store,
            bridge,
            engine,
        }
    }
}

/// Builds a parameter map from name/value pairs.
#[must_use]
pub fn params<const N: usize>(pairs: [(&str, Value); N]) -> BTreeMap<String, Value> {
    pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
}
