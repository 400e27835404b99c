//! Durable state behind store traits.
//!
//! Execution records and wait signals are addressed by opaque ids. The
//! in-memory stores back tests and single-process deployments; a database
//! backed store only has to implement the two traits.

use crate::core::WorkflowExecution;
use crate::errors::OrchestratorError;
use crate::utils::iso_timestamp;
use crate::wait::{WaitSignal, WaitState, WaitToken};
use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::watch;
use uuid::Uuid;

/// Persists workflow execution records.
#[async_trait]
pub trait ExecutionStore: Send + Sync {
    /// Inserts or replaces a record.
    async fn put(&self, execution: &WorkflowExecution) -> Result<(), OrchestratorError>;

    /// Loads a record.
    async fn get(&self, id: Uuid) -> Result<Option<WorkflowExecution>, OrchestratorError>;

    /// Lists the delegated children of an execution.
    async fn children(&self, parent: Uuid) -> Result<Vec<WorkflowExecution>, OrchestratorError>;
}

/// Persists wait signal records.
#[async_trait]
pub trait WaitSignalStore: Send + Sync {
    /// Inserts a new record.
    async fn insert(&self, signal: WaitSignal) -> Result<(), OrchestratorError>;

    /// Loads a record.
    async fn get(&self, token: &WaitToken) -> Result<Option<WaitSignal>, OrchestratorError>;

    /// Moves a pending record to `state`.
    ///
    /// Returns `Ok(false)` if the record was already resolved. This is the
    /// single point that makes signal consumption exactly-once.
    async fn resolve(
        &self,
        token: &WaitToken,
        state: WaitState,
        data: Option<Value>,
    ) -> Result<bool, OrchestratorError>;

    /// Subscribes to state changes of a pending record.
    ///
    /// Stores that cannot push changes return `None`; callers then recheck
    /// with [`WaitSignalStore::get`]. `None` is also returned once the
    /// record is resolved.
    fn watch(&self, _token: &WaitToken) -> Option<watch::Receiver<WaitState>> {
        None
    }
}

/// In-memory execution store.
#[derive(Debug, Default)]
pub struct InMemoryExecutionStore {
    records: DashMap<Uuid, WorkflowExecution>,
}

impl InMemoryExecutionStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true if the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl ExecutionStore for InMemoryExecutionStore {
    async fn put(&self, execution: &WorkflowExecution) -> Result<(), OrchestratorError> {
        self.records.insert(execution.id, execution.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<WorkflowExecution>, OrchestratorError> {
        Ok(self.records.get(&id).map(|r| r.value().clone()))
    }

    async fn children(&self, parent: Uuid) -> Result<Vec<WorkflowExecution>, OrchestratorError> {
        let mut children: Vec<WorkflowExecution> = self
            .records
            .iter()
            .filter(|r| r.parent_execution_id == Some(parent))
            .map(|r| r.value().clone())
            .collect();
        children.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(children)
    }
}

/// In-memory wait signal store.
#[derive(Debug, Default)]
pub struct InMemoryWaitSignalStore {
    records: DashMap<WaitToken, WaitSignal>,
    watchers: DashMap<WaitToken, watch::Sender<WaitState>>,
}

impl InMemoryWaitSignalStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records that can still be watched.
    #[must_use]
    pub fn pending_watch_count(&self) -> usize {
        self.watchers.len()
    }
}

#[async_trait]
impl WaitSignalStore for InMemoryWaitSignalStore {
    async fn insert(&self, signal: WaitSignal) -> Result<(), OrchestratorError> {
        if !signal.state.is_resolved() {
            let (tx, _rx) = watch::channel(signal.state.clone());
            self.watchers.insert(signal.token.clone(), tx);
        }
        self.records.insert(signal.token.clone(), signal);
        Ok(())
    }

    async fn get(&self, token: &WaitToken) -> Result<Option<WaitSignal>, OrchestratorError> {
        Ok(self.records.get(token).map(|r| r.value().clone()))
    }

    async fn resolve(
        &self,
        token: &WaitToken,
        state: WaitState,
        data: Option<Value>,
    ) -> Result<bool, OrchestratorError> {
        // The shard write lock held by get_mut makes check-and-set atomic.
        let mut record = self
            .records
            .get_mut(token)
            .ok_or_else(|| OrchestratorError::not_found("wait token", token.as_str()))?;
        if record.state.is_resolved() {
            return Ok(false);
        }
        record.state = state.clone();
        record.data = data;
        record.resolved_at = Some(iso_timestamp());
        drop(record);
        // Subscribers keep their receiver and observe the final state.
        if let Some((_, tx)) = self.watchers.remove(token) {
            tx.send_replace(state);
        }
        Ok(true)
    }

    fn watch(&self, token: &WaitToken) -> Option<watch::Receiver<WaitState>> {
        self.watchers.get(token).map(|tx| tx.subscribe())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::time::Duration;

    #[tokio::test]
    async fn test_execution_store_roundtrip() {
        let store = InMemoryExecutionStore::new();
        let exec = WorkflowExecution::new("wf", BTreeMap::new());
        store.put(&exec).await.unwrap();

        let loaded = store.get(exec.id).await.unwrap().unwrap();
        assert_eq!(loaded.id, exec.id);
        assert!(store.get(Uuid::new_v4()).await.unwrap().is_none());
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_execution_store_children() {
        let store = InMemoryExecutionStore::new();
        let parent = WorkflowExecution::new("parent", BTreeMap::new());
        let child = WorkflowExecution::new("child", BTreeMap::new()).with_parent(parent.id, 1);
        store.put(&parent).await.unwrap();
        store.put(&child).await.unwrap();

        let children = store.children(parent.id).await.unwrap();
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].definition_id, "child");
    }

    #[tokio::test]
    async fn test_signal_store_resolves_once() {
        let store = InMemoryWaitSignalStore::new();
        let token = WaitToken::generate();
        store
            .insert(WaitSignal::pending(token.clone(), Duration::from_secs(10)))
            .await
            .unwrap();

        assert!(store.resolve(&token, WaitState::Succeeded, None).await.unwrap());
        assert!(!store.resolve(&token, WaitState::Expired, None).await.unwrap());

        let record = store.get(&token).await.unwrap().unwrap();
        assert_eq!(record.state, WaitState::Succeeded);
        assert!(record.resolved_at.is_some());
    }

    #[tokio::test]
    async fn test_signal_store_watch_sees_resolution() {
        let store = InMemoryWaitSignalStore::new();
        let token = WaitToken::generate();
        store
            .insert(WaitSignal::pending(token.clone(), Duration::from_secs(10)))
            .await
            .unwrap();
        let mut rx = store.watch(&token).unwrap();
        assert_eq!(store.pending_watch_count(), 1);

        store.resolve(&token, WaitState::Succeeded, None).await.unwrap();

        let state = rx.wait_for(WaitState::is_resolved).await.unwrap().clone();
        assert_eq!(state, WaitState::Succeeded);
        assert!(store.watch(&token).is_none());
        assert_eq!(store.pending_watch_count(), 0);
    }

    #[tokio::test]
    async fn test_signal_store_unknown_token() {
        let store = InMemoryWaitSignalStore::new();
        let err = store
            .resolve(&WaitToken::from("missing"), WaitState::Succeeded, None)
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::NotFound { .. }));
    }
}
