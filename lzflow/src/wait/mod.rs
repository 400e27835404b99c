//! Wait-condition bridge.
//!
//! Translates an out-of-band completion signal into progress of a blocked
//! process. Tokens are created with a timeout, signaled at most once, and
//! waited on without polling.

mod bridge;
mod signal;

pub use bridge::{SignalOutcome, WaitConditionBridge};
pub use signal::{SignalPayload, SignalStatus, WaitSignal, WaitState, WaitToken};
