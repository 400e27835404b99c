//! Tests for request dispatch, caching and the timeout budget.

use super::*;
use crate::config::OrchestratorConfig;
use crate::errors::OrchestratorError;
use crate::events::{event_types, CollectingEventSink};
use crate::remote::{RemoteError, RemoteOperation};
use crate::testing::InMemoryOrganization;
use async_trait::async_trait;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Counts calls, optionally sleeping or failing.
#[derive(Debug, Default)]
struct ProbeHandler {
    calls: AtomicUsize,
    delay: Option<Duration>,
    error: Option<&'static str>,
}

impl ProbeHandler {
    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    async fn run(&self, request: &LifecycleRequest) -> Result<HandlerOutcome, OrchestratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match self.error {
            Some(code) => Err(RemoteError::new(code, "probe").into()),
            None => Ok(HandlerOutcome::new(format!("phys-{}", request.logical_resource_id))
                .with_data("Calls", self.calls())),
        }
    }
}

#[async_trait]
impl CapabilityHandler for ProbeHandler {
    fn kind(&self) -> CapabilityKind {
        CapabilityKind::EnableScp
    }

    async fn create(
        &self,
        _ctx: &HandlerContext,
        request: &LifecycleRequest,
    ) -> Result<HandlerOutcome, OrchestratorError> {
        self.run(request).await
    }

    async fn update(
        &self,
        ctx: &HandlerContext,
        request: &LifecycleRequest,
        kind: UpdateKind,
    ) -> Result<HandlerOutcome, OrchestratorError> {
        if kind == UpdateKind::NoOp {
            return Ok(HandlerOutcome::new("noop"));
        }
        self.create(ctx, request).await
    }

    async fn delete(
        &self,
        _ctx: &HandlerContext,
        request: &LifecycleRequest,
    ) -> Result<HandlerOutcome, OrchestratorError> {
        self.run(request).await
    }
}

fn event_handler(probe: Arc<ProbeHandler>, config: OrchestratorConfig) -> LifecycleEventHandler {
    LifecycleEventHandler::new(
        probe,
        Arc::new(InMemoryOrganization::new("111111111111")),
        Arc::new(config),
    )
}

#[tokio::test(start_paused = true)]
async fn test_handler_timeout_fails_request() {
    let probe = Arc::new(ProbeHandler {
        delay: Some(Duration::from_secs(120)),
        ..ProbeHandler::default()
    });
    let config = OrchestratorConfig {
        handler_timeout_seconds: 30.0,
        ..OrchestratorConfig::default()
    };
    let handler = event_handler(probe.clone(), config);

    let response = handler.handle(LifecycleRequest::create("Slow", json!({}))).await;

    assert_eq!(response.status, ResponseStatus::Failed);
    assert!(response.reason.unwrap().contains("Timeout exceeded"));
    assert_eq!(response.physical_resource_id, "Slow");
}

#[tokio::test]
async fn test_failures_are_not_cached() {
    let probe = Arc::new(ProbeHandler {
        error: Some("AccessDeniedException"),
        ..ProbeHandler::default()
    });
    let handler = event_handler(probe.clone(), OrchestratorConfig::default());
    let request = LifecycleRequest::create("R", json!({})).with_request_id("req-1");

    assert!(!handler.handle(request.clone()).await.is_success());
    assert!(!handler.handle(request).await.is_success());
    assert_eq!(probe.calls(), 2);
}

#[tokio::test]
async fn test_already_satisfied_is_success() {
    let probe = Arc::new(ProbeHandler {
        error: Some("DuplicatePolicyAttachmentException"),
        ..ProbeHandler::default()
    });
    let handler = event_handler(probe, OrchestratorConfig::default());

    let response = handler
        .handle(LifecycleRequest::delete("R", "phys-R", json!({})))
        .await;

    assert!(response.is_success());
    assert_eq!(response.physical_resource_id, "phys-R");
}

#[tokio::test]
async fn test_concurrent_redeliveries_run_once() {
    let probe = Arc::new(ProbeHandler {
        delay: Some(Duration::from_millis(20)),
        ..ProbeHandler::default()
    });
    let handler = Arc::new(event_handler(probe.clone(), OrchestratorConfig::default()));
    let request = LifecycleRequest::create("R", json!({"A": 1})).with_request_id("req-1");

    let tasks: Vec<_> = (0..4)
        .map(|_| {
            let handler = handler.clone();
            let request = request.clone();
            tokio::spawn(async move { handler.handle(request).await })
        })
        .collect();
    let responses: Vec<LifecycleResponse> = futures::future::join_all(tasks)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect();

    assert_eq!(probe.calls(), 1);
    assert!(responses.windows(2).all(|w| w[0] == w[1]));
}

#[tokio::test]
async fn test_noop_update_dispatch() {
    let probe = Arc::new(ProbeHandler::default());
    let handler = event_handler(probe.clone(), OrchestratorConfig::default());

    let response = handler
        .handle(LifecycleRequest::update("R", "phys-R", json!({"A": 1}), json!({"A": 1})))
        .await;

    assert!(response.is_success());
    assert_eq!(response.physical_resource_id, "noop");
    assert_eq!(probe.calls(), 0);
}

#[tokio::test]
async fn test_history_events() {
    let sink = Arc::new(CollectingEventSink::new());
    let handler = event_handler(Arc::new(ProbeHandler::default()), OrchestratorConfig::default())
        .with_sink(sink.clone());
    let request = LifecycleRequest::create("R", json!({})).with_request_id("req-1");

    handler.handle(request.clone()).await;
    handler.handle(request).await;

    assert_eq!(
        sink.event_types(),
        vec![
            event_types::LIFECYCLE_RECEIVED,
            event_types::LIFECYCLE_SUCCEEDED,
            event_types::LIFECYCLE_RECEIVED,
            event_types::LIFECYCLE_REPLAYED,
        ]
    );
    let succeeded = &sink.events_of_type(event_types::LIFECYCLE_SUCCEEDED)[0];
    assert_eq!(succeeded.data["logical_resource_id"], "R");
    assert_eq!(succeeded.data["physical_resource_id"], "phys-R");
}

#[tokio::test]
async fn test_handler_context_retries_transient_errors() {
    let org = Arc::new(InMemoryOrganization::new("111111111111"));
    org.fail_next("ListRoots", RemoteError::new("TooManyRequestsException", "busy"));
    org.fail_next("ListRoots", RemoteError::new("TooManyRequestsException", "busy"));
    let config = OrchestratorConfig::default()
        .with_handler_retry(crate::retry::RetryConfig::new().with_base_delay_ms(1).with_max_delay_ms(1));
    let ctx = HandlerContext::new(org.clone(), Arc::new(config));

    let roots = ctx.call(RemoteOperation::ListRoots).await.unwrap();

    assert_eq!(roots["Roots"][0]["Id"], "r-root");
    assert_eq!(org.call_count("ListRoots"), 3);
}

#[test]
fn test_builtin_handlers_match_kind() {
    for kind in CapabilityKind::ALL {
        assert_eq!(builtin_handler(kind).kind(), kind);
    }
}
