//! Proxy Sandbox - capability-restricted execution of untrusted Rhai snippets
//!
//! Runs short, untrusted scripts against a curated global environment. Every
//! identifier lookup goes through a capability table: safe builtins resolve
//! normally, host objects such as `window` and `document` resolve to inert
//! stand-ins, and anything on the deny list raises an access violation.
//!
//! ## Features
//!
//! This crate supports multiple build targets via feature flags:
//!
//! - **`native`** (default) - Thread-safe Rust library with `Arc`/`Mutex`;
//!   scripts run on a worker thread that is terminated on timeout
//! - **`wasm`** - WebAssembly bindings for browser/Node.js via `wasm-bindgen`
//!
//! ## Layers
//!
//! - **Static validation** - known escape syntax is rejected before anything runs
//! - **Capability table** - per-call snapshot of allowed, shadowed and denied globals
//! - **Execution strategies** - worker isolation, wall-clock deadline, or an
//!   instruction counter for obvious infinite loops
//!
//! ## Example (Native)
//!
//! ```ignore
//! use proxy_sandbox::{create_sandbox, SandboxConfig};
//!
//! let sandbox = create_sandbox(SandboxConfig::default());
//! let result = sandbox.execute_json("a + b", serde_json::json!({"a": 2, "b": 3}));
//!
//! assert!(result.success);
//! assert_eq!(result.result, serde_json::json!(5));
//!
//! let denied = sandbox.execute_json("fetch(\"https://example.com\")", serde_json::Value::Null);
//! assert_eq!(denied.error.as_deref(), Some("Forbidden identifier detected: fetch"));
//! ```
//!
//! ## Example (WASM)
//!
//! ```javascript
//! import { WasmSandbox } from 'proxy-sandbox';
//!
//! const sandbox = new WasmSandbox('{"timeout": 1000}');
//! const result = sandbox.execute('a * 2', '{"a": 21}');
//!
//! console.log(result.result); // 42
//! ```

// Core modules (always available)
pub mod engine;
pub mod environment;
pub mod executor;
pub mod globals;
pub mod sandbox;
pub mod shared;
pub mod timers;
pub mod types;
pub mod validator;

#[cfg(feature = "native")]
pub mod worker;

// Re-export core types
pub use engine::{dynamic_to_json, dynamic_to_transport, AccessViolation, Budget};
pub use environment::{Capability, GlobalSnapshot, SandboxGlobalEnvironment};
pub use executor::ProxySandbox;
pub use sandbox::{
    SandboxConfig,
    // Default limit constants
    DEFAULT_MAX_ARRAY_SIZE, DEFAULT_MAX_CODE_SIZE, DEFAULT_MAX_INSTRUCTIONS, DEFAULT_MAX_MAP_SIZE,
    DEFAULT_MAX_MEMORY_USAGE, DEFAULT_TIMEOUT_MS,
    // Profile constants
    EXTENDED_MAX_INSTRUCTIONS, EXTENDED_TIMEOUT_MS, QUICK_TIMEOUT_MS,
};
pub use types::{ConsoleEntry, ConsoleLevel, ExecutionStrategy, SandboxError, SandboxResult};
pub use validator::{looks_like_infinite_loop, validate_code};

/// Build a sandbox for `config`
pub fn create_sandbox(config: SandboxConfig) -> ProxySandbox {
    ProxySandbox::new(config)
}

/// Run one script in a throwaway sandbox
pub fn run_in_sandbox(code: &str, config: SandboxConfig, params: rhai::Map) -> SandboxResult {
    let mut sandbox = ProxySandbox::new(config);
    let result = sandbox.execute(code, params);
    sandbox.destroy();
    result
}

// WASM module (only when wasm feature is enabled)
#[cfg(feature = "wasm")]
pub mod wasm;

#[cfg(feature = "wasm")]
pub use wasm::{WasmSandbox, WasmSandboxConfig};
