//! Testing utilities for lzflow.
//!
//! This module provides:
//! - An in-memory organization implementing the remote client
//! - Assertions for executions and lifecycle responses
//! - An engine fixture wiring the in-memory pieces together

mod assertions;
mod fixtures;
mod organization;

pub use assertions::{
    assert_execution_failed_with, assert_execution_status, assert_execution_succeeded, assert_output,
    assert_response_failed, assert_response_success, assert_visited,
};
pub use fixtures::{params, EngineFixture};
pub use organization::{CallRecord, InMemoryOrganization, LandingZoneSetup, ROOT_ID};
