//! The wait-condition bridge.

use super::signal::{SignalPayload, WaitSignal, WaitState, WaitToken};
use crate::errors::OrchestratorError;
use crate::events::{event_types, EventSink, HistoryEvent, NoOpEventSink};
use crate::store::{InMemoryWaitSignalStore, WaitSignalStore};
use crate::utils::now_utc;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// How often a waiter rereads the store when the store cannot push changes.
pub const DEFAULT_RECHECK_INTERVAL: Duration = Duration::from_secs(5);

/// What happened to a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalOutcome {
    /// The signal resolved the pending wait.
    Accepted,
    /// The wait was already resolved or expired; the signal had no effect.
    Ignored,
}

struct Waiter {
    tx: watch::Sender<WaitState>,
    deadline: Instant,
}

struct BridgeInner {
    store: Arc<dyn WaitSignalStore>,
    waiters: DashMap<WaitToken, Waiter>,
    sink: Arc<dyn EventSink>,
}

/// Blocks declarative or workflow progress until an external process
/// signals completion, bounded by a timeout.
///
/// Exactly one signal per token is consumed. Later signals for the same
/// token, and signals that arrive after the deadline, are ignored.
///
/// Signals recorded through another bridge over the same store wake waiters
/// here too: through [`WaitSignalStore::watch`] when the store supports it,
/// otherwise by rereading the record every recheck interval.
#[derive(Clone)]
pub struct WaitConditionBridge {
    inner: Arc<BridgeInner>,
    recheck_interval: Duration,
}

impl std::fmt::Debug for WaitConditionBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WaitConditionBridge")
            .field("waiters", &self.inner.waiters.len())
            .field("recheck_interval", &self.recheck_interval)
            .finish()
    }
}

impl Default for WaitConditionBridge {
    fn default() -> Self {
        Self::new(Arc::new(InMemoryWaitSignalStore::new()))
    }
}

impl WaitConditionBridge {
    /// Creates a bridge over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn WaitSignalStore>) -> Self {
        Self {
            inner: Arc::new(BridgeInner {
                store,
                waiters: DashMap::new(),
                sink: Arc::new(NoOpEventSink),
            }),
            recheck_interval: DEFAULT_RECHECK_INTERVAL,
        }
    }

    /// Creates a bridge that records signal history in `sink`.
    #[must_use]
    pub fn with_sink(store: Arc<dyn WaitSignalStore>, sink: Arc<dyn EventSink>) -> Self {
        Self {
            inner: Arc::new(BridgeInner {
                store,
                waiters: DashMap::new(),
                sink,
            }),
            recheck_interval: DEFAULT_RECHECK_INTERVAL,
        }
    }

    /// Sets how often waiters reread stores that cannot push changes.
    #[must_use]
    pub fn with_recheck_interval(mut self, interval: Duration) -> Self {
        self.recheck_interval = interval.max(Duration::from_millis(1));
        self
    }

    /// Number of tokens this bridge still tracks locally.
    #[must_use]
    pub fn tracked_count(&self) -> usize {
        self.inner.waiters.len()
    }

    /// Creates a pending token that expires after `timeout`.
    ///
    /// # Errors
    ///
    /// Returns the store error if the record cannot be persisted.
    pub async fn create_wait_token(&self, timeout: Duration) -> Result<WaitToken, OrchestratorError> {
        let token = WaitToken::generate();
        self.inner
            .store
            .insert(WaitSignal::pending(token.clone(), timeout))
            .await?;
        let (tx, _rx) = watch::channel(WaitState::Pending);
        self.inner.waiters.insert(
            token.clone(),
            Waiter {
                tx,
                deadline: Instant::now() + timeout,
            },
        );
        debug!(token = %token, timeout_secs = timeout.as_secs_f64(), "Created wait token");
        Ok(token)
    }

    /// Delivers a signal for `token`.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for unknown tokens.
    pub async fn signal(
        &self,
        token: &WaitToken,
        payload: SignalPayload,
    ) -> Result<SignalOutcome, OrchestratorError> {
        let record = self
            .inner
            .store
            .get(token)
            .await?
            .ok_or_else(|| OrchestratorError::not_found("wait token", token.as_str()))?;

        if record.state.is_resolved() {
            self.forget(token);
            return Ok(self.ignore(token, "already resolved"));
        }
        if self.deadline_passed(token, &record) {
            self.expire(token).await?;
            return Ok(self.ignore(token, "arrived after deadline"));
        }

        let state = payload.resolved_state();
        if self
            .inner
            .store
            .resolve(token, state.clone(), payload.data.clone())
            .await?
        {
            info!(token = %token, status = ?payload.status, "Wait signal accepted");
            self.notify(token, state);
            self.forget(token);
            self.inner.sink.emit(HistoryEvent::new(
                event_types::SIGNAL_ACCEPTED,
                json!({"token": token.as_str(), "status": payload.status, "reason": payload.reason}),
            ));
            Ok(SignalOutcome::Accepted)
        } else {
            self.forget(token);
            Ok(self.ignore(token, "lost race with another signal"))
        }
    }

    /// Waits until `token` is signaled or expires.
    ///
    /// Returns the resolved record on success.
    ///
    /// # Errors
    ///
    /// Returns `TimeoutExceeded` when the deadline passes first,
    /// `SignalFailed` for failure signals and `NotFound` for unknown tokens.
    pub async fn wait(&self, token: &WaitToken) -> Result<WaitSignal, OrchestratorError> {
        let record = self.load(token).await?;
        if record.state.is_resolved() {
            self.forget(token);
            return Self::outcome(record);
        }

        let (mut local, deadline) = self.subscribe(token, &record);
        let mut stored = self.inner.store.watch(token);
        // Recheck after subscribing so a resolution in between is not missed.
        let record = self.load(token).await?;
        if record.state.is_resolved() {
            self.forget(token);
            return Self::outcome(record);
        }

        let woken = tokio::time::timeout_at(deadline, async {
            tokio::select! {
                _ = async { local.wait_for(WaitState::is_resolved).await.is_ok() } => {}
                () = self.resolved_in_store(token, stored.as_mut()) => {}
            }
        })
        .await;

        if woken.is_err() {
            self.expire(token).await?;
        }
        let record = self.load(token).await?;
        if record.state.is_resolved() {
            self.forget(token);
        }
        Self::outcome(record)
    }

    /// Returns the current record for `token`.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for unknown tokens.
    pub async fn status(&self, token: &WaitToken) -> Result<WaitSignal, OrchestratorError> {
        self.load(token).await
    }

    async fn load(&self, token: &WaitToken) -> Result<WaitSignal, OrchestratorError> {
        self.inner
            .store
            .get(token)
            .await?
            .ok_or_else(|| OrchestratorError::not_found("wait token", token.as_str()))
    }

    fn subscribe(&self, token: &WaitToken, record: &WaitSignal) -> (watch::Receiver<WaitState>, Instant) {
        let entry = self.inner.waiters.entry(token.clone()).or_insert_with(|| {
            // Record created by another process: derive the timer from the stored deadline.
            let remaining = (record.deadline - now_utc()).to_std().unwrap_or(Duration::ZERO);
            let (tx, _rx) = watch::channel(record.state.clone());
            Waiter {
                tx,
                deadline: Instant::now() + remaining,
            }
        });
        (entry.tx.subscribe(), entry.deadline)
    }

    /// Completes once the store reports `token` resolved.
    async fn resolved_in_store(&self, token: &WaitToken, stored: Option<&mut watch::Receiver<WaitState>>) {
        if let Some(rx) = stored {
            if rx.wait_for(WaitState::is_resolved).await.is_ok() {
                return;
            }
        }
        loop {
            tokio::time::sleep(self.recheck_interval).await;
            match self.inner.store.get(token).await {
                Ok(Some(record)) if record.state.is_resolved() => return,
                Ok(_) => {}
                Err(e) => warn!(token = %token, error = %e, "Failed to recheck wait token"),
            }
        }
    }

    fn forget(&self, token: &WaitToken) {
        self.inner.waiters.remove(token);
    }

    fn deadline_passed(&self, token: &WaitToken, record: &WaitSignal) -> bool {
        self.inner.waiters.get(token).map_or_else(
            || record.deadline <= now_utc(),
            |w| Instant::now() >= w.deadline,
        )
    }

    async fn expire(&self, token: &WaitToken) -> Result<(), OrchestratorError> {
        if self
            .inner
            .store
            .resolve(token, WaitState::Expired, None)
            .await?
        {
            warn!(token = %token, "Wait token expired");
            self.notify(token, WaitState::Expired);
            self.forget(token);
            self.inner.sink.emit(HistoryEvent::new(
                event_types::SIGNAL_EXPIRED,
                json!({"token": token.as_str()}),
            ));
        }
        Ok(())
    }

    fn notify(&self, token: &WaitToken, state: WaitState) {
        if let Some(waiter) = self.inner.waiters.get(token) {
            waiter.tx.send_replace(state);
        }
    }

    fn ignore(&self, token: &WaitToken, why: &str) -> SignalOutcome {
        debug!(token = %token, reason = why, "Ignoring wait signal");
        self.inner.sink.emit(HistoryEvent::new(
            event_types::SIGNAL_IGNORED,
            json!({"token": token.as_str(), "reason": why}),
        ));
        SignalOutcome::Ignored
    }

    fn outcome(record: WaitSignal) -> Result<WaitSignal, OrchestratorError> {
        match &record.state {
            WaitState::Succeeded => Ok(record),
            WaitState::Failed { reason } => Err(OrchestratorError::SignalFailed {
                reason: reason.clone(),
            }),
            WaitState::Expired => Err(OrchestratorError::timeout(
                format!("wait token {}", record.token),
                record.timeout_seconds,
            )),
            WaitState::Pending => Err(OrchestratorError::Internal(format!(
                "wait token {} still pending after wait returned",
                record.token
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::CollectingEventSink;

    fn bridge_with_sink() -> (WaitConditionBridge, Arc<CollectingEventSink>) {
        let sink = Arc::new(CollectingEventSink::new());
        let bridge = WaitConditionBridge::with_sink(Arc::new(InMemoryWaitSignalStore::new()), sink.clone());
        (bridge, sink)
    }

    #[tokio::test]
    async fn test_signal_then_wait() {
        let bridge = WaitConditionBridge::default();
        let token = bridge.create_wait_token(Duration::from_secs(60)).await.unwrap();

        let outcome = bridge
            .signal(&token, SignalPayload::success().with_data(json!("ok")))
            .await
            .unwrap();
        assert_eq!(outcome, SignalOutcome::Accepted);

        let record = bridge.wait(&token).await.unwrap();
        assert_eq!(record.state, WaitState::Succeeded);
        assert_eq!(record.data, Some(json!("ok")));
    }

    #[tokio::test]
    async fn test_wait_is_woken_by_signal() {
        let bridge = WaitConditionBridge::default();
        let token = bridge.create_wait_token(Duration::from_secs(60)).await.unwrap();

        let waiter = {
            let bridge = bridge.clone();
            let token = token.clone();
            tokio::spawn(async move { bridge.wait(&token).await })
        };
        tokio::task::yield_now().await;

        bridge.signal(&token, SignalPayload::success()).await.unwrap();
        let record = waiter.await.unwrap().unwrap();
        assert_eq!(record.state, WaitState::Succeeded);
    }

    #[tokio::test]
    async fn test_duplicate_signal_is_ignored() {
        let (bridge, sink) = bridge_with_sink();
        let token = bridge.create_wait_token(Duration::from_secs(60)).await.unwrap();

        assert_eq!(
            bridge.signal(&token, SignalPayload::success()).await.unwrap(),
            SignalOutcome::Accepted
        );
        assert_eq!(
            bridge.signal(&token, SignalPayload::failure("late")).await.unwrap(),
            SignalOutcome::Ignored
        );

        assert_eq!(bridge.status(&token).await.unwrap().state, WaitState::Succeeded);
        assert_eq!(sink.events_of_type(event_types::SIGNAL_IGNORED).len(), 1);
    }

    #[tokio::test]
    async fn test_failure_signal_fails_wait() {
        let bridge = WaitConditionBridge::default();
        let token = bridge.create_wait_token(Duration::from_secs(60)).await.unwrap();
        bridge
            .signal(&token, SignalPayload::failure("setup failed"))
            .await
            .unwrap();

        let err = bridge.wait(&token).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::SignalFailed { reason } if reason == "setup failed"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_times_out_and_late_signal_is_ignored() {
        let (bridge, sink) = bridge_with_sink();
        let token = bridge.create_wait_token(Duration::from_secs(7200)).await.unwrap();

        let started = Instant::now();
        let err = bridge.wait(&token).await.unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(started.elapsed(), Duration::from_secs(7200));
        assert_eq!(bridge.status(&token).await.unwrap().state, WaitState::Expired);

        assert_eq!(
            bridge.signal(&token, SignalPayload::success()).await.unwrap(),
            SignalOutcome::Ignored
        );
        assert_eq!(sink.events_of_type(event_types::SIGNAL_EXPIRED).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_signal_after_deadline_without_waiter_is_ignored() {
        let bridge = WaitConditionBridge::default();
        let token = bridge.create_wait_token(Duration::from_secs(10)).await.unwrap();

        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(
            bridge.signal(&token, SignalPayload::success()).await.unwrap(),
            SignalOutcome::Ignored
        );
        assert_eq!(bridge.status(&token).await.unwrap().state, WaitState::Expired);
    }

    /// Delegates to an in-memory store but cannot push changes.
    struct PollOnlyStore(InMemoryWaitSignalStore);

    #[async_trait::async_trait]
    impl WaitSignalStore for PollOnlyStore {
        async fn insert(&self, signal: WaitSignal) -> Result<(), OrchestratorError> {
            self.0.insert(signal).await
        }

        async fn get(&self, token: &WaitToken) -> Result<Option<WaitSignal>, OrchestratorError> {
            self.0.get(token).await
        }

        async fn resolve(
            &self,
            token: &WaitToken,
            state: WaitState,
            data: Option<serde_json::Value>,
        ) -> Result<bool, OrchestratorError> {
            self.0.resolve(token, state, data).await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_signal_through_other_bridge_wakes_waiter() {
        let store = Arc::new(InMemoryWaitSignalStore::new());
        let waiting = WaitConditionBridge::new(store.clone());
        let signaling = WaitConditionBridge::new(store.clone());
        let token = waiting.create_wait_token(Duration::from_secs(7200)).await.unwrap();

        let started = Instant::now();
        let waiter = {
            let waiting = waiting.clone();
            let token = token.clone();
            tokio::spawn(async move { waiting.wait(&token).await })
        };
        tokio::task::yield_now().await;

        assert_eq!(
            signaling.signal(&token, SignalPayload::success()).await.unwrap(),
            SignalOutcome::Accepted
        );
        let record = waiter.await.unwrap().unwrap();

        assert_eq!(record.state, WaitState::Succeeded);
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(waiting.tracked_count(), 0);
        assert_eq!(store.pending_watch_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_store_without_watch_is_rechecked() {
        let store: Arc<dyn WaitSignalStore> = Arc::new(PollOnlyStore(InMemoryWaitSignalStore::new()));
        let waiting = WaitConditionBridge::new(store.clone()).with_recheck_interval(Duration::from_secs(5));
        let signaling = WaitConditionBridge::new(store);
        let token = waiting.create_wait_token(Duration::from_secs(7200)).await.unwrap();

        let started = Instant::now();
        let waiter = {
            let waiting = waiting.clone();
            let token = token.clone();
            tokio::spawn(async move { waiting.wait(&token).await })
        };
        tokio::time::sleep(Duration::from_secs(12)).await;
        signaling.signal(&token, SignalPayload::success()).await.unwrap();

        let record = waiter.await.unwrap().unwrap();
        assert_eq!(record.state, WaitState::Succeeded);
        assert_eq!(started.elapsed(), Duration::from_secs(15));
    }

    #[tokio::test]
    async fn test_resolved_tokens_are_not_tracked() {
        let bridge = WaitConditionBridge::default();
        for _ in 0..100 {
            let token = bridge.create_wait_token(Duration::from_secs(60)).await.unwrap();
            bridge.signal(&token, SignalPayload::success()).await.unwrap();
            bridge.wait(&token).await.unwrap();
        }
        assert_eq!(bridge.tracked_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_token_is_not_tracked() {
        let bridge = WaitConditionBridge::default();
        let token = bridge.create_wait_token(Duration::from_secs(30)).await.unwrap();
        assert_eq!(bridge.tracked_count(), 1);

        assert!(bridge.wait(&token).await.unwrap_err().is_timeout());
        assert_eq!(bridge.tracked_count(), 0);
    }

    #[tokio::test]
    async fn test_unknown_token() {
        let bridge = WaitConditionBridge::default();
        let token = WaitToken::from("nope");
        assert!(matches!(
            bridge.signal(&token, SignalPayload::success()).await,
            Err(OrchestratorError::NotFound { .. })
        ));
        assert!(matches!(bridge.wait(&token).await, Err(OrchestratorError::NotFound { .. })));
    }
}
