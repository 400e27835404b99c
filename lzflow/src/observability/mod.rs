//! Logging setup and tracing spans.

use crate::errors::OrchestratorError;
use serde::{Deserialize, Serialize};
use tracing::Span;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

/// Output format of the log subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Human readable lines.
    #[default]
    Pretty,
    /// One JSON object per line, for log shipping.
    Json,
}

/// Installs the global tracing subscriber.
///
/// The filter comes from `RUST_LOG` when set, else `default_directive`
/// (e.g. `"lzflow=info"`).
///
/// # Errors
///
/// Returns an internal error if a global subscriber is already installed.
pub fn init_logging(format: LogFormat, default_directive: &str) -> Result<(), OrchestratorError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));
    let registry = tracing_subscriber::registry().with(filter);

    let result = match format {
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).try_init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_current_span(true))
            .try_init(),
    };
    result.map_err(|e| OrchestratorError::Internal(format!("logging already initialized: {e}")))
}

/// Span covering one workflow execution.
#[must_use]
pub fn workflow_span(definition_id: &str, execution_id: Uuid, depth: u32) -> Span {
    tracing::info_span!(
        "workflow",
        definition = %definition_id,
        execution_id = %execution_id,
        depth
    )
}

/// Span covering one lifecycle request.
#[must_use]
pub fn lifecycle_span(request_type: &str, logical_id: &str, request_id: &str) -> Span {
    tracing::info_span!(
        "lifecycle",
        request_type = %request_type,
        logical_id = %logical_id,
        request_id = %request_id
    )
}
