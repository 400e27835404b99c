//! # lzflow
//!
//! A cross-account provisioning orchestrator for organization security
//! baselines.
//!
//! lzflow provides:
//!
//! - **Capability lifecycle handling**: Create, Update and Delete requests for
//!   declared capabilities, answered with exactly one response each
//! - **Provider registration**: one handler endpoint per stack and capability
//!   kind, routed by service token
//! - **Automation workflows**: ordered steps over remote API calls, with
//!   branching, bounded waits and delegation into other accounts
//! - **Wait-condition bridge**: completion signals from a workflow back to the
//!   provisioning process that started it
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use lzflow::prelude::*;
//!
//! let engine = WorkflowEngine::new(client);
//! lzflow::catalog::register_catalog(&engine, &config)?;
//!
//! let execution = engine
//!     .run(lzflow::catalog::ORGANIZATIONS_ID, parameters)
//!     .await?;
//! assert_eq!(execution.status, ExecutionStatus::Succeeded);
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod catalog;
pub mod config;
pub mod core;
pub mod errors;
pub mod events;
pub mod lifecycle;
pub mod observability;
pub mod provider;
pub mod remote;
pub mod retry;
pub mod store;
pub mod testing;
pub mod utils;
pub mod wait;
pub mod workflow;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::{EngineConfig, OrchestratorConfig};
    pub use crate::core::{ExecutionStatus, StepResult, StepStatus, WorkflowExecution};
    pub use crate::errors::{OrchestratorError, WorkflowValidationError};
    pub use crate::events::{CollectingEventSink, EventSink, HistoryEvent, LoggingEventSink, NoOpEventSink};
    pub use crate::lifecycle::{CapabilityKind, LifecycleEventHandler, LifecycleRequest, LifecycleResponse};
    pub use crate::provider::{LifecycleRouter, ProvisioningContext, StackRef};
    pub use crate::remote::{RemoteClient, RemoteError, RemoteErrorKind, Selector};
    pub use crate::retry::RetryConfig;
    pub use crate::wait::{WaitConditionBridge, WaitState, WaitToken};
    pub use crate::workflow::{
        from_document, EventRule, OrgEvent, TriggerRouter, WorkflowDefinition, WorkflowEngine,
    };
}
