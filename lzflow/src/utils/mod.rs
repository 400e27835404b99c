//! Timestamp and duration helpers.

pub mod duration;
pub mod timestamps;

pub use duration::{parse_iso8601_duration, parse_seconds, DurationError};
pub use timestamps::{deadline_after, format_timestamp, iso_timestamp, now_utc, Timestamp};
