//! Duration parsing for automation documents.
//!
//! Sleep steps use ISO 8601 durations (`PT120S`, `PT1H30M`); timeouts are
//! plain seconds, either as numbers or numeric strings.

use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;
use std::time::Duration;
use thiserror::Error;

/// A duration that could not be parsed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid duration '{input}': {reason}")]
pub struct DurationError {
    /// The rejected input.
    pub input: String,
    /// Why it was rejected.
    pub reason: &'static str,
}

#[allow(clippy::expect_used)]
static ISO8601: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^P(?:(\d+)D)?(?:T(?:(\d+)H)?(?:(\d+)M)?(?:(\d+(?:\.\d+)?)S)?)?$")
        .expect("duration pattern is valid")
});

/// Parses an ISO 8601 duration with day, hour, minute and second parts.
///
/// # Errors
///
/// Returns an error for empty, malformed, or unsupported (year/month/week)
/// durations.
pub fn parse_iso8601_duration(input: &str) -> Result<Duration, DurationError> {
    let text = input.trim();
    let fail = |reason| DurationError {
        input: input.to_string(),
        reason,
    };

    if text == "P" || text.ends_with('T') {
        return Err(fail("no duration components"));
    }
    let caps = ISO8601.captures(text).ok_or_else(|| fail("expected PnDTnHnMnS"))?;

    let part = |i: usize, unit: f64| -> Result<f64, DurationError> {
        caps.get(i).map_or(Ok(0.0), |m| {
            m.as_str()
                .parse::<f64>()
                .map(|v| v * unit)
                .map_err(|_| fail("component is not a number"))
        })
    };

    let seconds = part(1, 86_400.0)? + part(2, 3_600.0)? + part(3, 60.0)? + part(4, 1.0)?;
    Duration::try_from_secs_f64(seconds).map_err(|_| fail("out of range"))
}

/// Parses a timeout given as a number of seconds or a numeric string.
///
/// # Errors
///
/// Returns an error for negative numbers and non-numeric values.
pub fn parse_seconds(value: &Value) -> Result<Duration, DurationError> {
    let fail = |reason| DurationError {
        input: value.to_string(),
        reason,
    };
    let seconds = match value {
        Value::Number(n) => n.as_f64().ok_or_else(|| fail("not a number"))?,
        Value::String(s) => s.trim().parse::<f64>().map_err(|_| fail("not a number"))?,
        _ => return Err(fail("expected number of seconds")),
    };
    Duration::try_from_secs_f64(seconds).map_err(|_| fail("must be a non-negative number"))
}
