//! Step execution.

use super::definition::{DelegateBody, DelegateSpec, InvokeSpec, StepAction, StepSpec, WaitSpec, WorkflowDefinition};
use super::engine::{bind_parameters, EngineInner};
use super::value::{Bindings, InputValue};
use crate::core::{ExecutionStatus, StepResult, StepStatus, WorkflowExecution};
use crate::errors::OrchestratorError;
use crate::events::{event_types, HistoryEvent};
use crate::observability::workflow_span;
use crate::remote::{with_assumed_session, RemoteOperation, Session};
use crate::retry::retry_transient;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn, Instrument};

static HOME: Session = Session::Home;

/// Session and deadline an execution runs under.
#[derive(Debug, Clone, Copy)]
pub(super) struct Scope<'s> {
    session: &'s Session,
    deadline: Option<Instant>,
}

impl Scope<'static> {
    pub(super) fn home(deadline: Option<Instant>) -> Self {
        Self { session: &HOME, deadline }
    }
}

impl Scope<'_> {
    fn expired(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }
}

fn resolve_inputs(
    inputs: &BTreeMap<String, InputValue>,
    bindings: &Bindings<'_>,
) -> Result<Map<String, Value>, OrchestratorError> {
    inputs
        .iter()
        .map(|(name, template)| {
            template
                .resolve(bindings)
                .map(|value| (name.clone(), value))
                .map_err(|r| OrchestratorError::InvalidRequest(format!("input '{name}' references {r}, which has no value")))
        })
        .collect()
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

impl EngineInner {
    fn emit(&self, execution: &WorkflowExecution, event_type: &str, mut data: Value) {
        if let Value::Object(fields) = &mut data {
            fields.insert("definition_id".to_string(), json!(execution.definition_id));
        }
        self.sink
            .emit(HistoryEvent::new(event_type, data).for_execution(execution.id));
    }

    async fn persist(&self, execution: &WorkflowExecution) {
        if let Err(e) = self.store.put(execution).await {
            warn!(execution_id = %execution.id, error = %e, "Failed to persist execution record");
        }
    }

    /// Runs `execution` until it reaches a terminal status.
    pub(super) fn execute<'a>(
        &'a self,
        definition: Arc<WorkflowDefinition>,
        execution: &'a mut WorkflowExecution,
        scope: Scope<'a>,
    ) -> BoxFuture<'a, ()> {
        let span = workflow_span(&definition.id, execution.id, execution.depth);
        async move {
            info!(session = %scope.session, "Workflow started");
            self.emit(
                execution,
                event_types::WORKFLOW_STARTED,
                json!({ "depth": execution.depth, "parent_execution_id": execution.parent_execution_id }),
            );

            let mut index = 0;
            loop {
                let Some(step) = definition.steps.get(index) else {
                    execution.finish(ExecutionStatus::Failed, Some(format!("no step at position {index}")));
                    break;
                };
                if scope.expired() {
                    execution.finish(
                        ExecutionStatus::TimedOut,
                        Some(format!("deadline passed before step {}", step.name)),
                    );
                    break;
                }

                execution.enter_step(&step.name);
                self.persist(execution).await;
                self.emit(
                    execution,
                    event_types::STEP_STARTED,
                    json!({ "step": step.name, "action": step.action.kind() }),
                );

                let started = Instant::now();
                let mut result = self.run_step(step, execution, scope).await;
                if step.best_effort && result.status == StepStatus::Failed {
                    warn!(step = %step.name, error = ?result.error, "Tolerating failure of best-effort step");
                    result = result.tolerate();
                }
                let status = result.status;
                let branch_target = result.next_step.clone();
                let error = result.error.clone();
                let elapsed_ms = millis(started.elapsed());

                if status.continues() {
                    debug!(step = %step.name, %status, elapsed_ms, "Step completed");
                    self.emit(
                        execution,
                        event_types::STEP_COMPLETED,
                        json!({
                            "step": step.name,
                            "status": status,
                            "outputs": result.outputs.keys().collect::<Vec<_>>(),
                            "next_step": branch_target,
                            "duration_ms": elapsed_ms,
                        }),
                    );
                } else {
                    warn!(step = %step.name, %status, error = ?error, "Step failed");
                    self.emit(
                        execution,
                        event_types::STEP_FAILED,
                        json!({ "step": step.name, "status": status, "error": error, "duration_ms": elapsed_ms }),
                    );
                }
                execution.record_step(result);

                if !status.continues() {
                    let terminal = if status == StepStatus::TimedOut {
                        ExecutionStatus::TimedOut
                    } else {
                        ExecutionStatus::Failed
                    };
                    let reason = format!("step {}: {}", step.name, error.unwrap_or_default());
                    execution.finish(terminal, Some(reason));
                    break;
                }

                let next = match branch_target.as_deref().or(step.next_step.as_deref()) {
                    Some(name) => match definition.step_index(name) {
                        Some(i) => Some(i),
                        None => {
                            execution.finish(ExecutionStatus::Failed, Some(format!("unknown step {name}")));
                            break;
                        }
                    },
                    None if step.is_end => None,
                    None => Some(index + 1).filter(|i| *i < definition.steps.len()),
                };
                match next {
                    Some(i) => index = i,
                    None => {
                        execution.finish(ExecutionStatus::Succeeded, None);
                        break;
                    }
                }
            }

            let (event_type, level_ok) = match execution.status {
                ExecutionStatus::Succeeded => (event_types::WORKFLOW_SUCCEEDED, true),
                ExecutionStatus::TimedOut => (event_types::WORKFLOW_TIMED_OUT, false),
                _ => (event_types::WORKFLOW_FAILED, false),
            };
            if level_ok {
                info!(steps = execution.visited.len(), "Workflow succeeded");
            } else {
                warn!(status = %execution.status, reason = ?execution.failure_reason, "Workflow did not succeed");
            }
            self.emit(
                execution,
                event_type,
                json!({ "status": execution.status, "reason": execution.failure_reason, "visited": execution.visited }),
            );
            self.persist(execution).await;
        }
        .instrument(span)
        .boxed()
    }

    async fn run_step(&self, step: &StepSpec, execution: &WorkflowExecution, scope: Scope<'_>) -> StepResult {
        let bindings = Bindings::new(&execution.parameters, &execution.outputs);
        match &step.action {
            StepAction::Invoke(spec) => self.run_invoke(&step.name, spec, &bindings, scope.session).await,
            StepAction::Branch(spec) => match spec.evaluate(&bindings) {
                Some(target) => {
                    debug!(step = %step.name, target, "Branch decided");
                    StepResult::branched(&step.name, target)
                }
                None => StepResult::failed(&step.name, "no choice matched and no default is set"),
            },
            StepAction::WaitForProperty(spec) => self.run_wait(step, spec, &bindings, scope).await,
            StepAction::Sleep(spec) => run_sleep(&step.name, spec.duration, scope).await,
            StepAction::Delegate(spec) => self.run_delegate(&step.name, spec, execution, scope).await,
        }
    }

    /// Resolves inputs, calls the API with retries and extracts outputs.
    async fn invoke(
        &self,
        spec: &InvokeSpec,
        bindings: &Bindings<'_>,
        session: &Session,
    ) -> Result<BTreeMap<String, Value>, OrchestratorError> {
        let inputs = resolve_inputs(&spec.inputs, bindings)?;
        let operation = RemoteOperation::from_parts(&spec.api, inputs)?;
        let response = retry_transient(&self.config.invoke_retry, operation.api_name(), || {
            self.client.call(session, &operation)
        })
        .await?;
        Ok(spec
            .outputs
            .iter()
            .filter_map(|o| o.selector.select(&response).map(|v| (o.name.clone(), v.clone())))
            .collect())
    }

    fn invoke_outcome(
        name: &str,
        spec: &InvokeSpec,
        outcome: Result<BTreeMap<String, Value>, OrchestratorError>,
    ) -> StepResult {
        match outcome {
            Ok(outputs) => StepResult::succeeded(name, outputs),
            Err(e)
                if e.is_already_satisfied()
                    || e.remote().is_some_and(|r| spec.already_satisfied_codes.contains(&r.code)) =>
            {
                info!(step = name, api = %spec.api, error = %e, "Operation already satisfied");
                StepResult::empty(name)
            }
            Err(e) => StepResult::failed(name, e.to_string()),
        }
    }

    async fn run_invoke(&self, name: &str, spec: &InvokeSpec, bindings: &Bindings<'_>, session: &Session) -> StepResult {
        Self::invoke_outcome(name, spec, self.invoke(spec, bindings, session).await)
    }

    async fn run_wait(&self, step: &StepSpec, spec: &WaitSpec, bindings: &Bindings<'_>, scope: Scope<'_>) -> StepResult {
        let bound = step.timeout.unwrap_or_else(|| self.config.default_wait_timeout());
        let interval = spec.poll_interval.unwrap_or_else(|| self.config.poll_interval());
        let mut deadline = Instant::now() + bound;
        if let Some(execution_deadline) = scope.deadline {
            deadline = deadline.min(execution_deadline);
        }

        let operation = match resolve_inputs(&spec.inputs, bindings)
            .and_then(|inputs| RemoteOperation::from_parts(&spec.api, inputs))
        {
            Ok(operation) => operation,
            Err(e) => return StepResult::failed(&step.name, e.to_string()),
        };

        let mut polls: u32 = 0;
        loop {
            polls += 1;
            match self.client.call(scope.session, &operation).await {
                Ok(response) => {
                    let observed = spec.selector.select(&response);
                    if observed.is_some_and(|v| spec.is_desired(v)) {
                        info!(step = %step.name, polls, "Awaited property reached");
                        return StepResult::empty(&step.name);
                    }
                    debug!(step = %step.name, polls, ?observed, "Awaited property not reached yet");
                }
                Err(e) if e.is_transient() => {
                    warn!(step = %step.name, polls, error = %e, "Transient error while polling");
                }
                Err(e) => return StepResult::failed(&step.name, OrchestratorError::from(e).to_string()),
            }

            let now = Instant::now();
            if now >= deadline {
                return StepResult::timed_out(
                    &step.name,
                    format!(
                        "{} did not become one of {:?} within {}s",
                        spec.selector,
                        spec.desired_values,
                        bound.as_secs_f64()
                    ),
                );
            }
            tokio::time::sleep_until((now + interval).min(deadline)).await;
        }
    }

    async fn run_delegate(
        &self,
        name: &str,
        spec: &DelegateSpec,
        execution: &WorkflowExecution,
        scope: Scope<'_>,
    ) -> StepResult {
        let bindings = Bindings::new(&execution.parameters, &execution.outputs);
        let target = match spec.target(&bindings) {
            Ok(target) => target,
            Err(r) => return StepResult::failed(name, format!("delegation target references {r}, which has no value")),
        };
        info!(step = name, account = %target.account_id, role = %target.role_name, region = %target.region, "Delegating");

        match &spec.body {
            DelegateBody::Invoke(invoke) => {
                let outcome = with_assumed_session(self.client.as_ref(), &target, &self.config.invoke_retry, |session| {
                    async move { self.invoke(invoke, &bindings, &session).await }
                })
                .await;
                Self::invoke_outcome(name, invoke, outcome)
            }
            DelegateBody::Definition(id) => {
                let depth = execution.depth + 1;
                if depth > self.config.max_delegation_depth {
                    return StepResult::failed(
                        name,
                        format!("delegation depth {depth} exceeds limit {}", self.config.max_delegation_depth),
                    );
                }
                let Some(definition) = self.definitions.read().get(id).cloned() else {
                    return StepResult::failed(name, OrchestratorError::not_found("workflow definition", id.clone()).to_string());
                };
                let parameters = match resolve_inputs(&spec.parameters, &bindings)
                    .and_then(|p| bind_parameters(&definition, p.into_iter().collect()))
                {
                    Ok(parameters) => parameters,
                    Err(e) => return StepResult::failed(name, e.to_string()),
                };

                let mut child = WorkflowExecution::new(id.clone(), parameters).with_parent(execution.id, depth);
                let deadline = scope.deadline;
                let child_ref = &mut child;
                let outcome = with_assumed_session(self.client.as_ref(), &target, &self.config.invoke_retry, |session| {
                    async move {
                        self.execute(definition, child_ref, Scope { session: &session, deadline })
                            .await;
                        Ok(())
                    }
                })
                .await;

                match outcome {
                    Err(e) => StepResult::failed(name, format!("could not delegate to {}: {e}", target.account_id)),
                    Ok(()) if child.status == ExecutionStatus::Succeeded => {
                        StepResult::succeeded(name, child.outputs.clone())
                    }
                    Ok(()) => StepResult::failed(
                        name,
                        format!(
                            "delegated execution {} {}: {}",
                            child.id,
                            child.status,
                            child.failure_reason.as_deref().unwrap_or("no reason recorded")
                        ),
                    ),
                }
            }
        }
    }
}

async fn run_sleep(name: &str, duration: Duration, scope: Scope<'_>) -> StepResult {
    let wake = Instant::now() + duration;
    match scope.deadline {
        Some(deadline) if deadline < wake => {
            tokio::time::sleep_until(deadline).await;
            StepResult::timed_out(name, "deadline passed during sleep")
        }
        _ => {
            debug!(step = name, seconds = duration.as_secs_f64(), "Sleeping");
            tokio::time::sleep_until(wake).await;
            StepResult::empty(name)
        }
    }
}
