//! Workflow definitions: declared parameters and an ordered list of steps.

use super::value::{value_text, Bindings, InputValue};
use crate::remote::{CrossAccountDelegation, Selector};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;

/// A declared workflow parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpec {
    /// Parameter name.
    pub name: String,
    /// Value used when the caller omits the parameter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    /// Free-form description.
    #[serde(default)]
    pub description: String,
}

impl ParameterSpec {
    /// A parameter the caller must supply.
    #[must_use]
    pub fn required(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            default: None,
            description: String::new(),
        }
    }

    /// A parameter with a default value.
    #[must_use]
    pub fn optional(name: impl Into<String>, default: Value) -> Self {
        Self {
            default: Some(default),
            ..Self::required(name)
        }
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// An output extracted from a response.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputSpec {
    /// Output name, referenced as `{{ Step.Name }}`.
    pub name: String,
    /// Where the value sits in the response.
    pub selector: Selector,
}

/// Calls one remote operation.
#[derive(Debug, Clone, PartialEq)]
pub struct InvokeSpec {
    /// API name, e.g. `ListDetectors`.
    pub api: String,
    /// Operation inputs by field name.
    pub inputs: BTreeMap<String, InputValue>,
    /// Outputs extracted from the response.
    pub outputs: Vec<OutputSpec>,
    /// Remote error codes that mean the operation already took effect.
    pub already_satisfied_codes: Vec<String>,
}

impl InvokeSpec {
    /// Creates an invoke of `api` without inputs.
    #[must_use]
    pub fn new(api: impl Into<String>) -> Self {
        Self {
            api: api.into(),
            inputs: BTreeMap::new(),
            outputs: Vec::new(),
            already_satisfied_codes: Vec::new(),
        }
    }

    /// Adds an input, parsing references out of `template`.
    #[must_use]
    pub fn with_input(mut self, name: impl Into<String>, template: impl Into<InputValue>) -> Self {
        self.inputs.insert(name.into(), template.into());
        self
    }

    /// Declares an output.
    #[must_use]
    pub fn with_output(mut self, name: impl Into<String>, selector: Selector) -> Self {
        self.outputs.push(OutputSpec {
            name: name.into(),
            selector,
        });
        self
    }

    /// Treats `code` as success without outputs.
    #[must_use]
    pub fn with_already_satisfied_code(mut self, code: impl Into<String>) -> Self {
        self.already_satisfied_codes.push(code.into());
        self
    }

    /// Names of the declared outputs.
    pub fn output_names(&self) -> impl Iterator<Item = &str> {
        self.outputs.iter().map(|o| o.name.as_str())
    }
}

/// A branch comparison.
#[derive(Debug, Clone, PartialEq)]
pub enum Comparator {
    /// Text equality.
    StringEquals(InputValue),
    /// Text inequality.
    StringNotEquals(InputValue),
    /// Boolean equality; `"true"`/`"false"` strings count.
    BooleanEquals(bool),
    /// Numeric equality.
    NumericEquals(f64),
    /// Variable is greater than the operand.
    NumericGreater(f64),
    /// Variable is less than the operand.
    NumericLesser(f64),
    /// Whether the variable has a value.
    IsPresent(bool),
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

impl Comparator {
    /// Name used in documents.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::StringEquals(_) => "StringEquals",
            Self::StringNotEquals(_) => "StringNotEquals",
            Self::BooleanEquals(_) => "BooleanEquals",
            Self::NumericEquals(_) => "NumericEquals",
            Self::NumericGreater(_) => "NumericGreater",
            Self::NumericLesser(_) => "NumericLesser",
            Self::IsPresent(_) => "IsPresent",
        }
    }

    /// Compares `variable` against the operand. An absent variable only
    /// satisfies `IsPresent(false)`.
    #[must_use]
    pub fn matches(&self, variable: Option<&Value>, bindings: &Bindings<'_>) -> bool {
        let Some(value) = variable else {
            return matches!(self, Self::IsPresent(false));
        };
        match self {
            Self::StringEquals(expected) => expected
                .try_resolve(bindings)
                .is_some_and(|e| value_text(&e) == value_text(value)),
            Self::StringNotEquals(expected) => expected
                .try_resolve(bindings)
                .is_some_and(|e| value_text(&e) != value_text(value)),
            Self::BooleanEquals(expected) => as_bool(value) == Some(*expected),
            #[allow(clippy::float_cmp)]
            Self::NumericEquals(expected) => as_number(value).is_some_and(|n| n == *expected),
            Self::NumericGreater(expected) => as_number(value).is_some_and(|n| n > *expected),
            Self::NumericLesser(expected) => as_number(value).is_some_and(|n| n < *expected),
            Self::IsPresent(expected) => *expected,
        }
    }

    /// References in the operand.
    #[must_use]
    pub fn references(&self) -> Vec<&super::value::ValueRef> {
        match self {
            Self::StringEquals(v) | Self::StringNotEquals(v) => v.references(),
            _ => Vec::new(),
        }
    }
}

/// One branch choice.
#[derive(Debug, Clone, PartialEq)]
pub struct Choice {
    /// The value compared, usually a reference.
    pub variable: InputValue,
    /// How it is compared.
    pub comparator: Comparator,
    /// Step taken on a match.
    pub next_step: String,
}

impl Choice {
    /// Creates a choice.
    #[must_use]
    pub fn new(variable: impl Into<InputValue>, comparator: Comparator, next_step: impl Into<String>) -> Self {
        Self {
            variable: variable.into(),
            comparator,
            next_step: next_step.into(),
        }
    }
}

/// Chooses the next step.
#[derive(Debug, Clone, PartialEq)]
pub struct BranchSpec {
    /// Evaluated in order; the first match wins.
    pub choices: Vec<Choice>,
    /// Taken when nothing matches.
    pub default: Option<String>,
}

impl BranchSpec {
    /// Creates a branch without a default.
    #[must_use]
    pub fn new(choices: Vec<Choice>) -> Self {
        Self { choices, default: None }
    }

    /// Sets the default target.
    #[must_use]
    pub fn with_default(mut self, step: impl Into<String>) -> Self {
        self.default = Some(step.into());
        self
    }

    /// Picks the target for the given bindings.
    #[must_use]
    pub fn evaluate(&self, bindings: &Bindings<'_>) -> Option<&str> {
        self.choices
            .iter()
            .find(|choice| {
                let variable = choice.variable.try_resolve(bindings);
                choice.comparator.matches(variable.as_ref(), bindings)
            })
            .map(|choice| choice.next_step.as_str())
            .or(self.default.as_deref())
    }

    /// Every step this branch can jump to.
    pub fn targets(&self) -> impl Iterator<Item = &str> {
        self.choices
            .iter()
            .map(|c| c.next_step.as_str())
            .chain(self.default.as_deref())
    }
}

/// Polls a read-only query until a property reaches a desired value.
#[derive(Debug, Clone, PartialEq)]
pub struct WaitSpec {
    /// Read-only API polled.
    pub api: String,
    /// Query inputs.
    pub inputs: BTreeMap<String, InputValue>,
    /// Property watched.
    pub selector: Selector,
    /// Accepted values, compared as text.
    pub desired_values: Vec<String>,
    /// Overrides the engine's poll interval.
    pub poll_interval: Option<Duration>,
}

impl WaitSpec {
    /// Creates a wait on `api` for `selector` to become one of `desired`.
    #[must_use]
    pub fn new(api: impl Into<String>, selector: Selector, desired: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            api: api.into(),
            inputs: BTreeMap::new(),
            selector,
            desired_values: desired.into_iter().map(Into::into).collect(),
            poll_interval: None,
        }
    }

    /// Adds a query input.
    #[must_use]
    pub fn with_input(mut self, name: impl Into<String>, template: impl Into<InputValue>) -> Self {
        self.inputs.insert(name.into(), template.into());
        self
    }

    /// Sets the poll interval.
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = Some(interval);
        self
    }

    /// Returns true if `value` is one of the desired values.
    #[must_use]
    pub fn is_desired(&self, value: &Value) -> bool {
        let text = value_text(value);
        self.desired_values.iter().any(|d| *d == text)
    }
}

/// What a delegate step runs under the assumed session.
#[derive(Debug, Clone, PartialEq)]
pub enum DelegateBody {
    /// A single remote call.
    Invoke(InvokeSpec),
    /// A registered workflow, by id.
    Definition(String),
}

/// Runs work in another account.
#[derive(Debug, Clone, PartialEq)]
pub struct DelegateSpec {
    /// Target account id.
    pub account: InputValue,
    /// Execution role assumed there.
    pub role: InputValue,
    /// Target region.
    pub region: InputValue,
    /// The delegated work.
    pub body: DelegateBody,
    /// Parameters of a delegated definition.
    pub parameters: BTreeMap<String, InputValue>,
}

impl DelegateSpec {
    /// Delegates a registered definition.
    #[must_use]
    pub fn definition(
        account: impl Into<InputValue>,
        role: impl Into<InputValue>,
        region: impl Into<InputValue>,
        definition_id: impl Into<String>,
    ) -> Self {
        Self {
            account: account.into(),
            role: role.into(),
            region: region.into(),
            body: DelegateBody::Definition(definition_id.into()),
            parameters: BTreeMap::new(),
        }
    }

    /// Delegates a single invoke.
    #[must_use]
    pub fn invoke(
        account: impl Into<InputValue>,
        role: impl Into<InputValue>,
        region: impl Into<InputValue>,
        invoke: InvokeSpec,
    ) -> Self {
        Self {
            account: account.into(),
            role: role.into(),
            region: region.into(),
            body: DelegateBody::Invoke(invoke),
            parameters: BTreeMap::new(),
        }
    }

    /// Passes a parameter to the delegated definition.
    #[must_use]
    pub fn with_parameter(mut self, name: impl Into<String>, template: impl Into<InputValue>) -> Self {
        self.parameters.insert(name.into(), template.into());
        self
    }

    /// Resolves the delegation target.
    ///
    /// # Errors
    ///
    /// Returns the first unresolved reference.
    pub fn target(&self, bindings: &Bindings<'_>) -> Result<CrossAccountDelegation, super::value::ValueRef> {
        Ok(CrossAccountDelegation::new(
            value_text(&self.account.resolve(bindings)?),
            value_text(&self.role.resolve(bindings)?),
            value_text(&self.region.resolve(bindings)?),
        ))
    }
}

/// Fixed pause.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SleepSpec {
    /// How long to sleep.
    pub duration: Duration,
}

/// The action of a step.
#[derive(Debug, Clone, PartialEq)]
pub enum StepAction {
    /// Call a remote operation.
    Invoke(InvokeSpec),
    /// Choose the next step.
    Branch(BranchSpec),
    /// Poll until a property is reached.
    WaitForProperty(WaitSpec),
    /// Pause.
    Sleep(SleepSpec),
    /// Run work under a cross-account session.
    Delegate(DelegateSpec),
}

impl StepAction {
    /// Short name for logs and events.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Invoke(_) => "invoke",
            Self::Branch(_) => "branch",
            Self::WaitForProperty(_) => "wait_for_property",
            Self::Sleep(_) => "sleep",
            Self::Delegate(_) => "delegate",
        }
    }
}

/// A named step.
#[derive(Debug, Clone, PartialEq)]
pub struct StepSpec {
    /// Unique name within the definition.
    pub name: String,
    /// What the step does.
    pub action: StepAction,
    /// Overrides the following step.
    pub next_step: Option<String>,
    /// Bound for wait steps.
    pub timeout: Option<Duration>,
    /// Failures are tolerated and execution continues.
    pub best_effort: bool,
    /// The execution succeeds after this step.
    pub is_end: bool,
}

impl StepSpec {
    /// Creates a step.
    #[must_use]
    pub fn new(name: impl Into<String>, action: StepAction) -> Self {
        Self {
            name: name.into(),
            action,
            next_step: None,
            timeout: None,
            best_effort: false,
            is_end: false,
        }
    }

    /// Creates an invoke step.
    #[must_use]
    pub fn invoke(name: impl Into<String>, spec: InvokeSpec) -> Self {
        Self::new(name, StepAction::Invoke(spec))
    }

    /// Creates a branch step.
    #[must_use]
    pub fn branch(name: impl Into<String>, spec: BranchSpec) -> Self {
        Self::new(name, StepAction::Branch(spec))
    }

    /// Creates a wait step.
    #[must_use]
    pub fn wait(name: impl Into<String>, spec: WaitSpec) -> Self {
        Self::new(name, StepAction::WaitForProperty(spec))
    }

    /// Creates a sleep step.
    #[must_use]
    pub fn sleep(name: impl Into<String>, duration: Duration) -> Self {
        Self::new(name, StepAction::Sleep(SleepSpec { duration }))
    }

    /// Creates a delegate step.
    #[must_use]
    pub fn delegate(name: impl Into<String>, spec: DelegateSpec) -> Self {
        Self::new(name, StepAction::Delegate(spec))
    }

    /// Sets the next step.
    #[must_use]
    pub fn with_next_step(mut self, step: impl Into<String>) -> Self {
        self.next_step = Some(step.into());
        self
    }

    /// Sets the timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Marks the step best-effort.
    #[must_use]
    pub fn best_effort(mut self) -> Self {
        self.best_effort = true;
        self
    }

    /// Marks the step as the last one.
    #[must_use]
    pub fn end(mut self) -> Self {
        self.is_end = true;
        self
    }

    /// Every input template of the step.
    #[must_use]
    pub fn inputs(&self) -> Vec<&InputValue> {
        match &self.action {
            StepAction::Invoke(spec) => spec.inputs.values().collect(),
            StepAction::WaitForProperty(spec) => spec.inputs.values().collect(),
            StepAction::Branch(spec) => spec.choices.iter().map(|c| &c.variable).collect(),
            StepAction::Sleep(_) => Vec::new(),
            StepAction::Delegate(spec) => {
                let mut inputs = vec![&spec.account, &spec.role, &spec.region];
                inputs.extend(spec.parameters.values());
                if let DelegateBody::Invoke(invoke) = &spec.body {
                    inputs.extend(invoke.inputs.values());
                }
                inputs
            }
        }
    }
}

/// A named step graph with declared parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowDefinition {
    /// Unique id, used to start executions.
    pub id: String,
    /// Free-form description.
    pub description: String,
    /// Declared parameters.
    pub parameters: Vec<ParameterSpec>,
    /// Steps in declaration order. The first step is the entry point.
    pub steps: Vec<StepSpec>,
}

impl WorkflowDefinition {
    /// Creates an empty definition.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: String::new(),
            parameters: Vec::new(),
            steps: Vec::new(),
        }
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Declares a parameter.
    #[must_use]
    pub fn with_parameter(mut self, parameter: ParameterSpec) -> Self {
        self.parameters.push(parameter);
        self
    }

    /// Appends a step.
    #[must_use]
    pub fn with_step(mut self, step: StepSpec) -> Self {
        self.steps.push(step);
        self
    }

    /// Finds a step by name.
    #[must_use]
    pub fn step(&self, name: &str) -> Option<&StepSpec> {
        self.steps.iter().find(|s| s.name == name)
    }

    /// Position of a step.
    #[must_use]
    pub fn step_index(&self, name: &str) -> Option<usize> {
        self.steps.iter().position(|s| s.name == name)
    }

    /// Finds a parameter by name.
    #[must_use]
    pub fn parameter(&self, name: &str) -> Option<&ParameterSpec> {
        self.parameters.iter().find(|p| p.name == name)
    }

    /// Steps that may follow `index`: branch targets, the next-step override,
    /// or the following step. End steps have none.
    #[must_use]
    pub fn successors(&self, index: usize) -> Vec<&str> {
        let Some(step) = self.steps.get(index) else {
            return Vec::new();
        };
        if let StepAction::Branch(branch) = &step.action {
            return branch.targets().collect();
        }
        if step.is_end {
            return Vec::new();
        }
        match &step.next_step {
            Some(next) => vec![next.as_str()],
            None => self
                .steps
                .get(index + 1)
                .map(|s| vec![s.name.as_str()])
                .unwrap_or_default(),
        }
    }
}
