//! Execution policy for sandboxed scripts

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::globals::{DEFAULT_FORBIDDEN_GLOBALS, DEFAULT_SAFE_GLOBALS};
use crate::types::SandboxError;

/// Default timeout in milliseconds
pub const DEFAULT_TIMEOUT_MS: u64 = 5_000;
/// Default advisory memory ceiling (10 MiB)
pub const DEFAULT_MAX_MEMORY_USAGE: usize = 10 * 1024 * 1024;
/// Default instruction-counter threshold
pub const DEFAULT_MAX_INSTRUCTIONS: u64 = 1_000_000;
/// Default maximum array size
pub const DEFAULT_MAX_ARRAY_SIZE: usize = 10_000;
/// Default maximum map size
pub const DEFAULT_MAX_MAP_SIZE: usize = 1_000;
/// Default maximum source size (64 KiB)
pub const DEFAULT_MAX_CODE_SIZE: usize = 64 * 1024;

/// Timeout for the quick profile
pub const QUICK_TIMEOUT_MS: u64 = 1_000;
/// Timeout for the extended profile
pub const EXTENDED_TIMEOUT_MS: u64 = 30_000;
/// Instruction threshold for the extended profile
pub const EXTENDED_MAX_INSTRUCTIONS: u64 = 10_000_000;

/// Execution policy for a sandbox instance
///
/// Every field has a default, so partial JSON configs resolve to a complete policy.
/// Conflicts are not rejected here: a name present in both `allowed_globals` and
/// `forbidden_globals` is forbidden at every lookup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SandboxConfig {
    /// Identifiers reachable inside sandboxed code
    pub allowed_globals: BTreeSet<String>,
    /// Identifiers that must never resolve
    pub forbidden_globals: BTreeSet<String>,
    /// Expose `console` and route `print`/`debug` to it
    pub allow_console: bool,
    /// Expose `setTimeout`/`setInterval` and their clear functions
    pub allow_timers: bool,
    /// Expose `document`
    #[serde(rename = "allowDOM", alias = "allowDom")]
    pub allow_dom: bool,
    /// Timeout in milliseconds
    #[serde(alias = "timeout")]
    pub timeout_ms: u64,
    /// Ceiling for any single string, in bytes
    pub max_memory_usage: usize,
    /// Maximum array size
    pub max_array_size: usize,
    /// Maximum map size
    pub max_map_size: usize,
    /// Maximum source size in bytes
    pub max_code_size: usize,
    /// Operations allowed before a fast-spinning loop is aborted
    pub max_instructions: u64,
    /// Reject undeclared variables at compile time
    pub strict_mode: bool,
    /// Prefer worker-thread isolation when the build supports it
    pub use_worker: bool,
    /// Caller-supplied globals merged into the allowed set
    pub custom_globals: BTreeMap<String, serde_json::Value>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            allowed_globals: DEFAULT_SAFE_GLOBALS.iter().map(|s| s.to_string()).collect(),
            forbidden_globals: DEFAULT_FORBIDDEN_GLOBALS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            allow_console: true,
            allow_timers: false,
            allow_dom: false,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            max_memory_usage: DEFAULT_MAX_MEMORY_USAGE,
            max_array_size: DEFAULT_MAX_ARRAY_SIZE,
            max_map_size: DEFAULT_MAX_MAP_SIZE,
            max_code_size: DEFAULT_MAX_CODE_SIZE,
            max_instructions: DEFAULT_MAX_INSTRUCTIONS,
            strict_mode: false,
            use_worker: true,
            custom_globals: BTreeMap::new(),
        }
    }
}

impl SandboxConfig {
    /// Create a new config with all defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Short timeout for simple snippets
    pub fn quick() -> Self {
        Self {
            timeout_ms: QUICK_TIMEOUT_MS,
            ..Default::default()
        }
    }

    /// Generous limits for longer scripts
    pub fn extended() -> Self {
        Self {
            timeout_ms: EXTENDED_TIMEOUT_MS,
            max_instructions: EXTENDED_MAX_INSTRUCTIONS,
            allow_timers: true,
            ..Default::default()
        }
    }

    /// No console, timers or DOM, and undeclared variables are compile errors
    pub fn locked_down() -> Self {
        Self {
            allow_console: false,
            allow_timers: false,
            allow_dom: false,
            strict_mode: true,
            ..Default::default()
        }
    }

    /// Parse a (possibly partial) JSON config
    pub fn from_json(json: &str) -> Result<Self, SandboxError> {
        serde_json::from_str(json).map_err(|e| SandboxError::InvalidConfig(e.to_string()))
    }

    /// Whether `name` is on the deny list
    pub fn is_forbidden(&self, name: &str) -> bool {
        self.forbidden_globals.contains(name)
    }

    /// Whether `name` may resolve (forbidden wins over allowed)
    pub fn is_allowed(&self, name: &str) -> bool {
        !self.is_forbidden(name)
            && (self.allowed_globals.contains(name) || self.custom_globals.contains_key(name))
    }

    /// Builder: set timeout
    pub fn with_timeout_ms(mut self, timeout: u64) -> Self {
        self.timeout_ms = timeout;
        self
    }

    /// Builder: toggle console access
    pub fn with_console(mut self, allow: bool) -> Self {
        self.allow_console = allow;
        self
    }

    /// Builder: toggle timer functions
    pub fn with_timers(mut self, allow: bool) -> Self {
        self.allow_timers = allow;
        self
    }

    /// Builder: toggle `document`
    pub fn with_dom(mut self, allow: bool) -> Self {
        self.allow_dom = allow;
        self
    }

    /// Builder: toggle strict variables
    pub fn with_strict_mode(mut self, strict: bool) -> Self {
        self.strict_mode = strict;
        self
    }

    /// Builder: toggle worker isolation
    pub fn with_worker(mut self, use_worker: bool) -> Self {
        self.use_worker = use_worker;
        self
    }

    /// Builder: allow an extra global
    pub fn with_allowed_global(mut self, name: impl Into<String>) -> Self {
        self.allowed_globals.insert(name.into());
        self
    }

    /// Builder: forbid an extra global
    pub fn with_forbidden_global(mut self, name: impl Into<String>) -> Self {
        self.forbidden_globals.insert(name.into());
        self
    }

    /// Builder: add a custom global value
    pub fn with_custom_global(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.custom_globals.insert(name.into(), value);
        self
    }

    /// Builder: set the string-size ceiling
    pub fn with_max_memory_usage(mut self, bytes: usize) -> Self {
        self.max_memory_usage = bytes;
        self
    }

    /// Builder: set the instruction threshold
    pub fn with_max_instructions(mut self, max: u64) -> Self {
        self.max_instructions = max;
        self
    }
}
