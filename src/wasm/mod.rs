//! WASM bindings for the sandbox
//!
//! Browser and Node.js builds are single-threaded, so there is no worker
//! strategy here: scripts run in-process under the wall-clock deadline or, for
//! obvious infinite loops, the instruction counter.

use wasm_bindgen::prelude::*;

use crate::executor::ProxySandbox;
use crate::sandbox::SandboxConfig;

fn js_error(message: impl std::fmt::Display) -> JsValue {
    JsValue::from_str(&message.to_string())
}

// ============================================================================
// WASM-compatible SandboxConfig wrapper
// ============================================================================

/// Sandbox configuration (WASM-compatible)
#[wasm_bindgen]
#[derive(Debug, Clone)]
pub struct WasmSandboxConfig {
    inner: SandboxConfig,
}

#[wasm_bindgen]
impl WasmSandboxConfig {
    /// Create a config with defaults
    #[wasm_bindgen(constructor)]
    pub fn new() -> Self {
        Self {
            inner: SandboxConfig::default(),
        }
    }

    /// Short timeout for simple snippets
    #[wasm_bindgen]
    pub fn quick() -> Self {
        Self {
            inner: SandboxConfig::quick(),
        }
    }

    /// Generous limits for longer scripts
    #[wasm_bindgen]
    pub fn extended() -> Self {
        Self {
            inner: SandboxConfig::extended(),
        }
    }

    /// No console, timers or DOM
    #[wasm_bindgen]
    pub fn locked_down() -> Self {
        Self {
            inner: SandboxConfig::locked_down(),
        }
    }

    /// Parse a (possibly partial) JSON config
    #[wasm_bindgen]
    pub fn from_json(json: &str) -> Result<WasmSandboxConfig, JsValue> {
        SandboxConfig::from_json(json)
            .map(|inner| Self { inner })
            .map_err(js_error)
    }

    #[wasm_bindgen(getter)]
    pub fn timeout_ms(&self) -> u64 {
        self.inner.timeout_ms
    }

    #[wasm_bindgen(setter)]
    pub fn set_timeout_ms(&mut self, value: u64) {
        self.inner.timeout_ms = value;
    }

    #[wasm_bindgen(getter)]
    pub fn max_instructions(&self) -> u64 {
        self.inner.max_instructions
    }

    #[wasm_bindgen(setter)]
    pub fn set_max_instructions(&mut self, value: u64) {
        self.inner.max_instructions = value;
    }

    #[wasm_bindgen(getter)]
    pub fn max_memory_usage(&self) -> usize {
        self.inner.max_memory_usage
    }

    #[wasm_bindgen(setter)]
    pub fn set_max_memory_usage(&mut self, value: usize) {
        self.inner.max_memory_usage = value;
    }

    #[wasm_bindgen(getter)]
    pub fn allow_console(&self) -> bool {
        self.inner.allow_console
    }

    #[wasm_bindgen(setter)]
    pub fn set_allow_console(&mut self, value: bool) {
        self.inner.allow_console = value;
    }

    #[wasm_bindgen(getter)]
    pub fn allow_timers(&self) -> bool {
        self.inner.allow_timers
    }

    #[wasm_bindgen(setter)]
    pub fn set_allow_timers(&mut self, value: bool) {
        self.inner.allow_timers = value;
    }

    #[wasm_bindgen(getter)]
    pub fn allow_dom(&self) -> bool {
        self.inner.allow_dom
    }

    #[wasm_bindgen(setter)]
    pub fn set_allow_dom(&mut self, value: bool) {
        self.inner.allow_dom = value;
    }

    #[wasm_bindgen(getter)]
    pub fn strict_mode(&self) -> bool {
        self.inner.strict_mode
    }

    #[wasm_bindgen(setter)]
    pub fn set_strict_mode(&mut self, value: bool) {
        self.inner.strict_mode = value;
    }
}

impl Default for WasmSandboxConfig {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// WASM Sandbox
// ============================================================================

/// WASM-compatible sandbox
///
/// Results are returned as plain JS objects mirroring `SandboxResult`.
#[wasm_bindgen]
pub struct WasmSandbox {
    inner: ProxySandbox,
}

#[wasm_bindgen]
impl WasmSandbox {
    /// Create a sandbox from an optional JSON config
    #[wasm_bindgen(constructor)]
    pub fn new(config_json: Option<String>) -> Result<WasmSandbox, JsValue> {
        // Set up panic hook for better error messages
        console_error_panic_hook::set_once();

        let config = match config_json.as_deref() {
            Some(json) => SandboxConfig::from_json(json).map_err(js_error)?,
            None => SandboxConfig::default(),
        };
        Ok(Self {
            inner: ProxySandbox::new(config),
        })
    }

    /// Create a sandbox from a config object
    #[wasm_bindgen]
    pub fn with_config(config: &WasmSandboxConfig) -> WasmSandbox {
        console_error_panic_hook::set_once();
        Self {
            inner: ProxySandbox::new(config.inner.clone()),
        }
    }

    /// Run `code` with optional JSON-object params
    #[wasm_bindgen]
    pub fn execute(&self, code: &str, params_json: Option<String>) -> Result<JsValue, JsValue> {
        let params = match params_json.as_deref() {
            Some(json) => serde_json::from_str(json).map_err(js_error)?,
            None => serde_json::Value::Null,
        };
        let result = self.inner.execute_json(code, params);
        serde_wasm_bindgen::to_value(&result).map_err(js_error)
    }

    /// Expose a JSON value as a global for later executions
    #[wasm_bindgen]
    pub fn add_global(&mut self, name: &str, value_json: &str) -> Result<(), JsValue> {
        let value: serde_json::Value = serde_json::from_str(value_json).map_err(js_error)?;
        let value = rhai::serde::to_dynamic(&value).map_err(js_error)?;
        self.inner.add_global(name, value).map_err(js_error)
    }

    #[wasm_bindgen]
    pub fn remove_global(&mut self, name: &str) -> bool {
        self.inner.remove_global(name)
    }

    #[wasm_bindgen]
    pub fn destroy(&mut self) {
        self.inner.destroy();
    }

    #[wasm_bindgen]
    pub fn is_running(&self) -> bool {
        self.inner.is_running()
    }

    #[wasm_bindgen]
    pub fn is_destroyed(&self) -> bool {
        self.inner.is_destroyed()
    }

    /// Visible global names
    #[wasm_bindgen]
    pub fn globals(&self) -> Vec<String> {
        self.inner.environment().own_keys()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_wrapper_defaults() {
        let config = WasmSandboxConfig::default();
        assert_eq!(config.timeout_ms(), 5_000);
        assert!(config.allow_console());
        assert!(!config.allow_timers());
    }

    #[test]
    fn test_config_wrapper_setters() {
        let mut config = WasmSandboxConfig::quick();
        assert_eq!(config.timeout_ms(), 1_000);
        config.set_allow_dom(true);
        config.set_max_instructions(500);
        assert!(config.allow_dom());
        assert_eq!(config.max_instructions(), 500);
    }

    #[test]
    fn test_sandbox_creation() {
        let sandbox = WasmSandbox::with_config(&WasmSandboxConfig::new());
        assert!(!sandbox.is_running());
        assert!(sandbox.globals().contains(&"Math".to_string()));
    }
}
