//! Core domain model types for lzflow.
//!
//! - Execution and step status enums
//! - Step results with factory methods
//! - The persisted workflow execution record

mod execution;
mod result;
#[cfg(test)]
mod result_tests;
mod status;

pub use execution::WorkflowExecution;
pub use result::StepResult;
pub use status::{ExecutionStatus, StepStatus};
