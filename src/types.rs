//! Core types for sandboxed execution

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Which execution path handled a call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStrategy {
    /// Dedicated worker thread that can be terminated from the host
    Worker,
    /// In-process execution bounded by a wall-clock deadline
    TimeoutGuarded,
    /// In-process execution with an instruction counter (obvious infinite loops)
    InstructionLimited,
}

impl std::fmt::Display for ExecutionStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Worker => "worker",
            Self::TimeoutGuarded => "timeout_guarded",
            Self::InstructionLimited => "instruction_limited",
        };
        f.write_str(name)
    }
}

/// Severity of a console message emitted by sandboxed code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsoleLevel {
    Log,
    Info,
    Warn,
    Error,
    Debug,
}

impl ConsoleLevel {
    /// Name of the console method that produces this level
    pub fn method_name(self) -> &'static str {
        match self {
            Self::Log => "log",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
            Self::Debug => "debug",
        }
    }
}

/// One console message captured during execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsoleEntry {
    pub level: ConsoleLevel,
    pub message: String,
}

impl ConsoleEntry {
    pub fn new(level: ConsoleLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
        }
    }
}

/// Outcome envelope returned from every sandbox execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxResult {
    /// Whether execution completed successfully
    pub success: bool,
    /// Value of the script (final expression or `return`), as JSON
    pub result: serde_json::Value,
    /// Error message if execution failed
    pub error: Option<String>,
    /// Total execution time in milliseconds
    pub execution_time_ms: u64,
    /// Estimated size of the returned value in bytes
    pub memory_usage: Option<u64>,
    /// Execution path that handled the call
    pub strategy: ExecutionStrategy,
    /// Console output produced by the script
    pub logs: Vec<ConsoleEntry>,
}

impl SandboxResult {
    /// Create a successful result
    pub fn success(
        result: serde_json::Value,
        strategy: ExecutionStrategy,
        logs: Vec<ConsoleEntry>,
        execution_time_ms: u64,
    ) -> Self {
        let memory_usage = Some(estimate_json_size(&result));
        Self {
            success: true,
            result,
            error: None,
            execution_time_ms,
            memory_usage,
            strategy,
            logs,
        }
    }

    /// Create a failed result
    pub fn error(
        error: String,
        strategy: ExecutionStrategy,
        logs: Vec<ConsoleEntry>,
        execution_time_ms: u64,
    ) -> Self {
        Self {
            success: false,
            result: serde_json::Value::Null,
            error: Some(error),
            execution_time_ms,
            memory_usage: None,
            strategy,
            logs,
        }
    }
}

/// Rough byte size of a JSON value as held in memory
pub fn estimate_json_size(value: &serde_json::Value) -> u64 {
    use serde_json::Value;

    match value {
        Value::Null | Value::Bool(_) => 1,
        Value::Number(_) => 8,
        Value::String(s) => s.len() as u64,
        Value::Array(items) => 8 + items.iter().map(estimate_json_size).sum::<u64>(),
        Value::Object(map) => {
            8 + map
                .iter()
                .map(|(k, v)| k.len() as u64 + estimate_json_size(v))
                .sum::<u64>()
        }
    }
}

/// Errors that can occur while validating or executing sandboxed code
#[derive(Debug, Clone, Error, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum SandboxError {
    #[error("Forbidden pattern detected: {pattern}")]
    ForbiddenPattern { pattern: String },

    #[error("Forbidden identifier detected: {name}")]
    ForbiddenIdentifier { name: String },

    #[error("Code exceeds maximum size of {max} bytes (got {actual})")]
    CodeTooLarge { max: usize, actual: usize },

    #[error("Code is empty")]
    EmptyCode,

    #[error("Access to '{name}' is not allowed in sandbox")]
    AccessDenied { name: String },

    #[error("Code execution timeout after {0}ms")]
    Timeout(u64),

    #[error("Instruction limit exceeded ({0} instructions)")]
    InstructionLimitExceeded(u64),

    #[error("Script compilation failed: {0}")]
    CompilationError(String),

    #[error("Script execution failed: {0}")]
    RuntimeError(String),

    #[error("Value cannot be transferred to the worker: {0}")]
    Serialization(String),

    #[error("Worker unavailable: {0}")]
    WorkerUnavailable(String),

    #[error("Worker failed: {0}")]
    WorkerFailed(String),

    #[error("Sandbox has been destroyed")]
    Destroyed,

    #[error("Invalid sandbox configuration: {0}")]
    InvalidConfig(String),
}

impl SandboxError {
    /// Whether this error was raised before any code ran
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::ForbiddenPattern { .. }
                | Self::ForbiddenIdentifier { .. }
                | Self::CodeTooLarge { .. }
                | Self::EmptyCode
        )
    }

    /// Whether the failure is a time or instruction budget overrun
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::InstructionLimitExceeded(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sandbox_result_success() {
        let result = SandboxResult::success(
            serde_json::json!(5),
            ExecutionStrategy::Worker,
            vec![],
            12,
        );
        assert!(result.success);
        assert_eq!(result.result, serde_json::json!(5));
        assert!(result.error.is_none());
        assert_eq!(result.memory_usage, Some(8));
    }

    #[test]
    fn test_sandbox_result_error() {
        let result = SandboxResult::error(
            "failed".to_string(),
            ExecutionStrategy::TimeoutGuarded,
            vec![],
            3,
        );
        assert!(!result.success);
        assert_eq!(result.error, Some("failed".to_string()));
        assert!(result.result.is_null());
        assert!(result.memory_usage.is_none());
    }

    #[test]
    fn test_timeout_message() {
        let err = SandboxError::Timeout(200);
        assert_eq!(err.to_string(), "Code execution timeout after 200ms");
        assert!(err.is_timeout());
        assert!(!err.is_validation());
    }

    #[test]
    fn test_access_denied_names_identifier() {
        let err = SandboxError::AccessDenied {
            name: "fetch".to_string(),
        };
        assert!(err.to_string().contains("'fetch'"));
    }

    #[test]
    fn test_estimate_json_size() {
        let value = serde_json::json!({"ab": "cdef", "n": [1, 2]});
        // 8 (object) + 2 + 4 + 1 + (8 + 8 + 8)
        assert_eq!(estimate_json_size(&value), 39);
    }

    #[test]
    fn test_result_serializes_strategy_in_snake_case() {
        let result = SandboxResult::success(
            serde_json::Value::Null,
            ExecutionStrategy::InstructionLimited,
            vec![ConsoleEntry::new(ConsoleLevel::Warn, "careful")],
            0,
        );
        let json = serde_json::to_string(&result).unwrap();
        assert!(json.contains("\"strategy\":\"instruction_limited\""));
        assert!(json.contains("\"level\":\"warn\""));
    }
}
