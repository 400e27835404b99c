//! Orchestrator configuration.
//!
//! Loaded from JSON with per-field defaults, then overridden by `LZFLOW_*`
//! environment variables.

use crate::errors::OrchestratorError;
use crate::observability::LogFormat;
use crate::retry::RetryConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Workflow engine settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Default interval between polls of a wait step.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_seconds: f64,
    /// Bound for wait steps that declare no timeout.
    #[serde(default = "default_wait_timeout")]
    pub default_wait_timeout_seconds: f64,
    /// Maximum nesting of delegated workflows.
    #[serde(default = "default_max_depth")]
    pub max_delegation_depth: u32,
    /// Retry applied to invoke and poll calls.
    #[serde(default)]
    pub invoke_retry: RetryConfig,
}

fn default_poll_interval() -> f64 {
    5.0
}

fn default_wait_timeout() -> f64 {
    3600.0
}

fn default_max_depth() -> u32 {
    5
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_interval_seconds: default_poll_interval(),
            default_wait_timeout_seconds: default_wait_timeout(),
            max_delegation_depth: default_max_depth(),
            invoke_retry: RetryConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Sets the poll interval.
    #[must_use]
    pub fn with_poll_interval(mut self, seconds: f64) -> Self {
        self.poll_interval_seconds = seconds;
        self
    }

    /// Sets the invoke retry config.
    #[must_use]
    pub fn with_invoke_retry(mut self, retry: RetryConfig) -> Self {
        self.invoke_retry = retry;
        self
    }

    /// Sets the delegation depth limit.
    #[must_use]
    pub fn with_max_delegation_depth(mut self, depth: u32) -> Self {
        self.max_delegation_depth = depth;
        self
    }

    /// Poll interval as a duration.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        seconds(self.poll_interval_seconds, default_poll_interval())
    }

    /// Default wait bound as a duration.
    #[must_use]
    pub fn default_wait_timeout(&self) -> Duration {
        seconds(self.default_wait_timeout_seconds, default_wait_timeout())
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Home region; also the governed region of the landing zone.
    #[serde(default = "default_region")]
    pub region: String,
    /// ARN partition.
    #[serde(default = "default_partition")]
    pub partition: String,
    /// Management (home) account id.
    #[serde(default)]
    pub management_account_id: Option<String>,
    /// Prefix for generated names (policies, functions, roles).
    #[serde(default = "default_prefix")]
    pub resource_prefix: String,
    /// Role assumed in member accounts.
    #[serde(default = "default_execution_role")]
    pub execution_role_name: String,
    /// Budget for one lifecycle handler invocation.
    #[serde(default = "default_handler_timeout")]
    pub handler_timeout_seconds: f64,
    /// Retry applied to remote calls made by lifecycle handlers.
    #[serde(default)]
    pub handler_retry: RetryConfig,
    /// How long cached lifecycle responses are kept.
    #[serde(default = "default_idempotency_ttl")]
    pub idempotency_ttl_seconds: u64,
    /// Default bound for wait-condition tokens.
    #[serde(default = "default_signal_timeout")]
    pub wait_timeout_seconds: f64,
    /// Workflow engine settings.
    #[serde(default)]
    pub engine: EngineConfig,
    /// Log output format.
    #[serde(default)]
    pub log_format: LogFormat,
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_partition() -> String {
    "aws".to_string()
}

fn default_prefix() -> String {
    "superwerker".to_string()
}

fn default_execution_role() -> String {
    "AWSControlTowerExecution".to_string()
}

fn default_handler_timeout() -> f64 {
    900.0
}

fn default_idempotency_ttl() -> u64 {
    86_400
}

fn default_signal_timeout() -> f64 {
    7200.0
}

fn seconds(value: f64, fallback: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or_else(|_| Duration::from_secs_f64(fallback))
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            region: default_region(),
            partition: default_partition(),
            management_account_id: None,
            resource_prefix: default_prefix(),
            execution_role_name: default_execution_role(),
            handler_timeout_seconds: default_handler_timeout(),
            handler_retry: RetryConfig::default(),
            idempotency_ttl_seconds: default_idempotency_ttl(),
            wait_timeout_seconds: default_signal_timeout(),
            engine: EngineConfig::default(),
            log_format: LogFormat::default(),
        }
    }
}

impl OrchestratorConfig {
    /// Creates the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses configuration from JSON text.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for malformed JSON or invalid values.
    pub fn from_json_str(text: &str) -> Result<Self, OrchestratorError> {
        let config: Self = serde_json::from_str(text)
            .map_err(|e| OrchestratorError::InvalidRequest(format!("config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, OrchestratorError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            OrchestratorError::InvalidRequest(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_json_str(&text)
    }

    /// Applies `LZFLOW_*` overrides from the process environment.
    ///
    /// # Errors
    ///
    /// Returns an error if an override has an unparsable value.
    pub fn with_env_overrides(self) -> Result<Self, OrchestratorError> {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// Applies `LZFLOW_*` overrides from `lookup`.
    ///
    /// # Errors
    ///
    /// Returns an error if an override has an unparsable value.
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self, OrchestratorError>
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parse<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, OrchestratorError> {
            value
                .trim()
                .parse()
                .map_err(|_| OrchestratorError::InvalidRequest(format!("{key}={value} is not valid")))
        }

        if let Some(v) = lookup("LZFLOW_REGION") {
            self.region = v;
        }
        if let Some(v) = lookup("LZFLOW_PARTITION") {
            self.partition = v;
        }
        if let Some(v) = lookup("LZFLOW_MANAGEMENT_ACCOUNT_ID") {
            self.management_account_id = Some(v);
        }
        if let Some(v) = lookup("LZFLOW_RESOURCE_PREFIX") {
            self.resource_prefix = v;
        }
        if let Some(v) = lookup("LZFLOW_EXECUTION_ROLE_NAME") {
            self.execution_role_name = v;
        }
        if let Some(v) = lookup("LZFLOW_HANDLER_TIMEOUT_SECONDS") {
            self.handler_timeout_seconds = parse("LZFLOW_HANDLER_TIMEOUT_SECONDS", &v)?;
        }
        if let Some(v) = lookup("LZFLOW_POLL_INTERVAL_SECONDS") {
            self.engine.poll_interval_seconds = parse("LZFLOW_POLL_INTERVAL_SECONDS", &v)?;
        }
        if let Some(v) = lookup("LZFLOW_MAX_ATTEMPTS") {
            let attempts: u32 = parse("LZFLOW_MAX_ATTEMPTS", &v)?;
            self.handler_retry = self.handler_retry.with_max_attempts(attempts);
            self.engine.invoke_retry = self.engine.invoke_retry.with_max_attempts(attempts);
        }
        if let Some(v) = lookup("LZFLOW_LOG_FORMAT") {
            self.log_format = match v.to_ascii_lowercase().as_str() {
                "json" => LogFormat::Json,
                "pretty" | "text" => LogFormat::Pretty,
                _ => {
                    return Err(OrchestratorError::InvalidRequest(format!(
                        "LZFLOW_LOG_FORMAT={v} is not valid"
                    )))
                }
            };
        }
        self.validate()?;
        Ok(self)
    }

    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// Returns `InvalidRequest` naming the first bad field.
    pub fn validate(&self) -> Result<(), OrchestratorError> {
        let positive = [
            ("handler_timeout_seconds", self.handler_timeout_seconds),
            ("wait_timeout_seconds", self.wait_timeout_seconds),
            ("engine.poll_interval_seconds", self.engine.poll_interval_seconds),
            (
                "engine.default_wait_timeout_seconds",
                self.engine.default_wait_timeout_seconds,
            ),
        ];
        for (name, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(OrchestratorError::InvalidRequest(format!(
                    "{name} must be a positive number of seconds, got {value}"
                )));
            }
        }
        if self.region.trim().is_empty() {
            return Err(OrchestratorError::InvalidRequest("region must not be empty".into()));
        }
        if self.engine.max_delegation_depth == 0 {
            return Err(OrchestratorError::InvalidRequest(
                "engine.max_delegation_depth must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Handler budget as a duration.
    #[must_use]
    pub fn handler_timeout(&self) -> Duration {
        seconds(self.handler_timeout_seconds, default_handler_timeout())
    }

    /// Default wait-condition bound as a duration.
    #[must_use]
    pub fn wait_timeout(&self) -> Duration {
        seconds(self.wait_timeout_seconds, default_signal_timeout())
    }

    /// Sets the region.
    #[must_use]
    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = region.into();
        self
    }

    /// Sets the management account id.
    #[must_use]
    pub fn with_management_account(mut self, account_id: impl Into<String>) -> Self {
        self.management_account_id = Some(account_id.into());
        self
    }

    /// Sets the handler retry config.
    #[must_use]
    pub fn with_handler_retry(mut self, retry: RetryConfig) -> Self {
        self.handler_retry = retry;
        self
    }

    /// Sets the engine config.
    #[must_use]
    pub fn with_engine(mut self, engine: EngineConfig) -> Self {
        self.engine = engine;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.region, "us-east-1");
        assert_eq!(config.execution_role_name, "AWSControlTowerExecution");
        assert_eq!(config.wait_timeout(), Duration::from_secs(7200));
        assert_eq!(config.engine.max_delegation_depth, 5);
        assert_eq!(config.engine.poll_interval(), Duration::from_secs(5));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = OrchestratorConfig::from_json_str(
            r#"{"region": "eu-central-1", "engine": {"poll_interval_seconds": 2}}"#,
        )
        .unwrap();
        assert_eq!(config.region, "eu-central-1");
        assert_eq!(config.engine.poll_interval(), Duration::from_secs(2));
        assert_eq!(config.engine.max_delegation_depth, 5);
        assert_eq!(config.resource_prefix, "superwerker");
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"management_account_id": "123456789012", "handler_retry": {{"max_attempts": 2}}}}"#
        )
        .unwrap();

        let config = OrchestratorConfig::from_file(file.path()).unwrap();
        assert_eq!(config.management_account_id.as_deref(), Some("123456789012"));
        assert_eq!(config.handler_retry.max_attempts, 2);
        assert_eq!(config.handler_retry.base_delay_ms, RetryConfig::default().base_delay_ms);
    }

    #[test]
    fn test_missing_file_is_error() {
        assert!(OrchestratorConfig::from_file("/nonexistent/lzflow.json").is_err());
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("LZFLOW_REGION", "eu-west-1"),
            ("LZFLOW_MAX_ATTEMPTS", "7"),
            ("LZFLOW_LOG_FORMAT", "json"),
        ]
        .into_iter()
        .collect();

        let config = OrchestratorConfig::default()
            .with_overrides(|k| env.get(k).map(|v| (*v).to_string()))
            .unwrap();
        assert_eq!(config.region, "eu-west-1");
        assert_eq!(config.handler_retry.max_attempts, 7);
        assert_eq!(config.engine.invoke_retry.max_attempts, 7);
        assert_eq!(config.log_format, LogFormat::Json);
    }

    #[test]
    fn test_bad_env_override() {
        let result = OrchestratorConfig::default().with_overrides(|k| {
            (k == "LZFLOW_HANDLER_TIMEOUT_SECONDS").then(|| "soon".to_string())
        });
        assert!(matches!(result, Err(OrchestratorError::InvalidRequest(_))));
    }

    #[test]
    fn test_validate_rejects_non_positive() {
        let err = OrchestratorConfig::from_json_str(r#"{"handler_timeout_seconds": 0}"#).unwrap_err();
        assert!(err.to_string().contains("handler_timeout_seconds"));
    }
}
