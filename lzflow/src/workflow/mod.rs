//! The automation workflow engine.
//!
//! A [`WorkflowDefinition`] is an ordered list of named steps (Invoke,
//! Branch, WaitForProperty, Sleep, Delegate) over declared parameters. Step
//! inputs reference parameters and earlier outputs with `{{ Name }}` and
//! `{{ Step.Output }}`. Definitions are validated when registered; the
//! [`WorkflowEngine`] then runs them synchronously, in the background, or in
//! response to events published through a [`TriggerRouter`].

mod definition;
mod document;
mod engine;
mod executor;
mod trigger;
mod validate;
mod value;

pub use definition::{
    BranchSpec, Choice, Comparator, DelegateBody, DelegateSpec, InvokeSpec, OutputSpec, ParameterSpec,
    SleepSpec, StepAction, StepSpec, WaitSpec, WorkflowDefinition,
};
pub use document::from_document;
pub use engine::{WorkflowEngine, WorkflowEngineBuilder};
pub use trigger::{EventPattern, EventRule, OrgEvent, TriggerRouter};
pub use validate::validate_definition;
pub use value::{value_text, Bindings, InputValue, Segment, ValueRef};
