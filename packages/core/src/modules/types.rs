//! Core data types shared by analysis modules and the execution engine

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::alerts::Alert;
use crate::source::SourceError;

/// Default upper bound on a single module run.
pub const DEFAULT_TIMEOUT_SECONDS: u64 = 300;

/// Default lifetime of a cached successful result.
pub const DEFAULT_CACHE_TTL_SECONDS: u64 = 3600;

/// Static description of a registered module.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleMetadata {
    pub id: String,
    pub category: String,
    pub name: String,
    pub description: String,
    pub parameters: Vec<ParameterSpec>,
}

/// One entry of a module's parameter schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpec {
    pub name: String,
    pub kind: ParameterKind,
    pub description: String,
    pub default: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterKind {
    Integer,
    Float,
    String,
    Boolean,
    List,
}

impl ParameterSpec {
    pub fn new(
        name: &str,
        kind: ParameterKind,
        description: &str,
        default: impl Into<Value>,
    ) -> Self {
        Self {
            name: name.to_string(),
            kind,
            description: description.to_string(),
            default: default.into(),
        }
    }
}

/// Per-module execution settings, owned by the persistent store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleConfig {
    pub module_id: String,
    pub enabled: bool,
    pub schedule: Option<String>,
    pub alerts_enabled: bool,
    pub timeout_seconds: u64,
    pub cache_ttl_seconds: u64,
    #[serde(default)]
    pub params: BTreeMap<String, Value>,
}

impl ModuleConfig {
    pub fn new(module_id: impl Into<String>) -> Self {
        Self {
            module_id: module_id.into(),
            enabled: true,
            schedule: None,
            alerts_enabled: true,
            timeout_seconds: DEFAULT_TIMEOUT_SECONDS,
            cache_ttl_seconds: DEFAULT_CACHE_TTL_SECONDS,
            params: BTreeMap::new(),
        }
    }

    pub fn with_param(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.params.insert(name.to_string(), value.into());
        self
    }

    pub fn with_schedule(mut self, schedule: &str) -> Self {
        self.schedule = Some(schedule.to_string());
        self
    }

    pub fn with_cache_ttl(mut self, seconds: u64) -> Self {
        self.cache_ttl_seconds = seconds;
        self
    }

    pub fn with_timeout(mut self, seconds: u64) -> Self {
        self.timeout_seconds = seconds;
        self
    }

    /// Read a numeric parameter, falling back to `default` when absent.
    pub fn param_f64(&self, name: &str, default: f64) -> Result<f64, ModuleError> {
        match self.params.get(name) {
            None | Some(Value::Null) => Ok(default),
            Some(value) => value
                .as_f64()
                .ok_or_else(|| ModuleError::invalid_params(format!("{} must be a number", name))),
        }
    }

    /// Read a non-negative integer parameter, falling back to `default` when absent.
    pub fn param_u64(&self, name: &str, default: u64) -> Result<u64, ModuleError> {
        match self.params.get(name) {
            None | Some(Value::Null) => Ok(default),
            Some(value) => value.as_u64().ok_or_else(|| {
                ModuleError::invalid_params(format!("{} must be a non-negative integer", name))
            }),
        }
    }

    /// Read a list of strings, empty when absent.
    pub fn param_strings(&self, name: &str) -> Result<Vec<String>, ModuleError> {
        match self.params.get(name) {
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| {
                    item.as_str().map(str::to_string).ok_or_else(|| {
                        ModuleError::invalid_params(format!("{} must contain only strings", name))
                    })
                })
                .collect(),
            Some(_) => Err(ModuleError::invalid_params(format!(
                "{} must be a list of strings",
                name
            ))),
        }
    }
}

/// What a module's `run` produces on success.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisOutput {
    pub data: Value,
    pub alerts: Vec<Alert>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Success,
    Error,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Success => "success",
            RunStatus::Error => "error",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(RunStatus::Success),
            "error" => Ok(RunStatus::Error),
            other => Err(format!("Unknown run status: {}", other)),
        }
    }
}

/// The outcome of one `execute` call, as returned to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleResult {
    pub module_id: String,
    pub status: RunStatus,
    pub data: Option<Value>,
    pub alerts: Vec<Alert>,
    pub error: Option<String>,
    pub execution_time_ms: u64,
    pub generated_at: DateTime<Utc>,
    /// Ledger row id; `None` when served from cache or the write was dropped.
    #[serde(default)]
    pub run_id: Option<i64>,
    #[serde(default)]
    pub cached: bool,
}

impl ModuleResult {
    pub fn success(module_id: &str, output: AnalysisOutput, execution_time_ms: u64) -> Self {
        Self {
            module_id: module_id.to_string(),
            status: RunStatus::Success,
            data: Some(output.data),
            alerts: output.alerts,
            error: None,
            execution_time_ms,
            generated_at: Utc::now(),
            run_id: None,
            cached: false,
        }
    }

    pub fn failure(module_id: &str, error: impl Into<String>, execution_time_ms: u64) -> Self {
        Self {
            module_id: module_id.to_string(),
            status: RunStatus::Error,
            data: None,
            alerts: Vec::new(),
            error: Some(error.into()),
            execution_time_ms,
            generated_at: Utc::now(),
            run_id: None,
            cached: false,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Success
    }
}

/// A module's own failure. Captured into an error-status result, never re-raised.
#[derive(Debug, Error)]
pub enum ModuleError {
    #[error("Data source error: {0}")]
    Source(#[from] SourceError),

    #[error("Invalid parameters: {message}")]
    InvalidParams { message: String },

    #[error("Computation error: {message}")]
    Computation { message: String },
}

impl ModuleError {
    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::InvalidParams {
            message: message.into(),
        }
    }

    pub fn computation(message: impl Into<String>) -> Self {
        Self::Computation {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn new_config_uses_engine_defaults() {
        let config = ModuleConfig::new("x");
        assert!(config.enabled);
        assert!(config.alerts_enabled);
        assert_eq!(config.timeout_seconds, DEFAULT_TIMEOUT_SECONDS);
        assert_eq!(config.cache_ttl_seconds, DEFAULT_CACHE_TTL_SECONDS);
        assert!(config.params.is_empty());
    }

    #[test]
    fn param_f64_falls_back_to_default_when_absent() {
        let config = ModuleConfig::new("x");
        assert_eq!(config.param_f64("ratio", 2.5).unwrap(), 2.5);
    }

    #[test]
    fn param_f64_accepts_integers() {
        let config = ModuleConfig::new("x").with_param("ratio", 3);
        assert_eq!(config.param_f64("ratio", 2.5).unwrap(), 3.0);
    }

    #[test]
    fn param_u64_rejects_strings() {
        let config = ModuleConfig::new("x").with_param("days", "seven");
        let err = config.param_u64("days", 7).unwrap_err();
        assert!(matches!(err, ModuleError::InvalidParams { .. }));
    }

    #[test]
    fn param_strings_reads_list() {
        let config = ModuleConfig::new("x").with_param("campaigns", json!(["a", "b"]));
        assert_eq!(config.param_strings("campaigns").unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn param_strings_rejects_mixed_list() {
        let config = ModuleConfig::new("x").with_param("campaigns", json!(["a", 1]));
        assert!(config.param_strings("campaigns").is_err());
    }

    #[test]
    fn run_status_parses_its_own_display() {
        for status in [RunStatus::Success, RunStatus::Error] {
            assert_eq!(status.to_string().parse::<RunStatus>().unwrap(), status);
        }
        assert!("running".parse::<RunStatus>().is_err());
    }

    #[test]
    fn failure_result_carries_no_data_or_alerts() {
        let result = ModuleResult::failure("x", "boom", 12);
        assert!(!result.is_success());
        assert!(result.data.is_none());
        assert!(result.alerts.is_empty());
        assert_eq!(result.error.as_deref(), Some("boom"));
    }
}
