//! WASM-specific tests
//!
//! Run with: wasm-pack test --headless --chrome --features wasm --no-default-features
//! Or:       wasm-pack test --headless --firefox --features wasm --no-default-features
//! Or:       wasm-pack test --node --features wasm --no-default-features

#![cfg(target_arch = "wasm32")]

use serde_json::{json, Value};
use wasm_bindgen::JsValue;
use wasm_bindgen_test::*;

use proxy_sandbox::{WasmSandbox, WasmSandboxConfig};

fn as_json(value: JsValue) -> Value {
    serde_wasm_bindgen::from_value(value).expect("result should deserialize")
}

fn run(sandbox: &WasmSandbox, code: &str, params: Option<&str>) -> Value {
    let result = sandbox
        .execute(code, params.map(str::to_string))
        .expect("execute should not fail");
    as_json(result)
}

// ============================================================================
// WasmSandboxConfig Tests
// ============================================================================

#[wasm_bindgen_test]
fn test_config_constructor() {
    let config = WasmSandboxConfig::new();
    assert_eq!(config.timeout_ms(), 5_000);
    assert_eq!(config.max_instructions(), 1_000_000);
    assert!(config.allow_console());
    assert!(!config.allow_timers());
    assert!(!config.allow_dom());
    assert!(!config.strict_mode());
}

#[wasm_bindgen_test]
fn test_config_profiles() {
    assert_eq!(WasmSandboxConfig::quick().timeout_ms(), 1_000);

    let extended = WasmSandboxConfig::extended();
    assert_eq!(extended.timeout_ms(), 30_000);
    assert!(extended.allow_timers());

    let locked = WasmSandboxConfig::locked_down();
    assert!(!locked.allow_console());
    assert!(locked.strict_mode());
}

#[wasm_bindgen_test]
fn test_config_setters() {
    let mut config = WasmSandboxConfig::new();

    config.set_timeout_ms(250);
    assert_eq!(config.timeout_ms(), 250);

    config.set_max_memory_usage(4096);
    assert_eq!(config.max_memory_usage(), 4096);

    config.set_allow_timers(true);
    assert!(config.allow_timers());

    config.set_strict_mode(true);
    assert!(config.strict_mode());
}

#[wasm_bindgen_test]
fn test_config_from_json() {
    let config = WasmSandboxConfig::from_json(r#"{"timeout": 750, "allowDOM": true}"#).unwrap();
    assert_eq!(config.timeout_ms(), 750);
    assert!(config.allow_dom());

    assert!(WasmSandboxConfig::from_json("{not json").is_err());
}

// ============================================================================
// WasmSandbox Tests
// ============================================================================

#[wasm_bindgen_test]
fn test_sandbox_creation() {
    let sandbox = WasmSandbox::new(None).unwrap();
    assert!(!sandbox.is_running());
    assert!(!sandbox.is_destroyed());
    assert!(sandbox.globals().iter().any(|g| g == "JSON"));
}

#[wasm_bindgen_test]
fn test_invalid_config_json() {
    assert!(WasmSandbox::new(Some("[1, 2]".to_string())).is_err());
}

#[wasm_bindgen_test]
fn test_simple_script_execution() {
    let sandbox = WasmSandbox::new(None).unwrap();
    let result = run(&sandbox, "40 + 2", None);

    assert_eq!(result["success"], json!(true));
    assert_eq!(result["result"], json!(42));
    assert_eq!(result["strategy"], json!("timeout_guarded"));
}

#[wasm_bindgen_test]
fn test_params_are_bound() {
    let sandbox = WasmSandbox::new(None).unwrap();
    let result = run(&sandbox, "a * 2", Some(r#"{"a": 21}"#));
    assert_eq!(result["result"], json!(42));
}

#[wasm_bindgen_test]
fn test_malformed_params_rejected() {
    let sandbox = WasmSandbox::new(None).unwrap();
    assert!(sandbox.execute("1", Some("{".to_string())).is_err());
}

#[wasm_bindgen_test]
fn test_forbidden_identifier_reported() {
    let sandbox = WasmSandbox::new(None).unwrap();
    let result = run(&sandbox, r#"fetch("https://example.com")"#, None);

    assert_eq!(result["success"], json!(false));
    assert_eq!(
        result["error"],
        json!("Forbidden identifier detected: fetch")
    );
}

#[wasm_bindgen_test]
fn test_infinite_loop_is_instruction_limited() {
    let config = WasmSandboxConfig::quick();
    let sandbox = WasmSandbox::with_config(&config);
    let result = run(&sandbox, "while true { }", None);

    assert_eq!(result["success"], json!(false));
    assert_eq!(result["strategy"], json!("instruction_limited"));
}

#[wasm_bindgen_test]
fn test_console_logs_captured() {
    let sandbox = WasmSandbox::new(None).unwrap();
    let result = run(&sandbox, r#"console.log("hello", 1); 0"#, None);

    let logs = result["logs"].as_array().expect("logs array");
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0]["message"], json!("hello 1"));
}

#[wasm_bindgen_test]
fn test_window_sensitive_properties() {
    let sandbox = WasmSandbox::new(None).unwrap();
    let result = run(&sandbox, "window.cookie", None);
    assert_eq!(result["result"], json!(""));
}

#[wasm_bindgen_test]
fn test_add_and_remove_global() {
    let mut sandbox = WasmSandbox::new(None).unwrap();
    sandbox.add_global("limit", "7").unwrap();
    assert_eq!(run(&sandbox, "limit + 1", None)["result"], json!(8));

    assert!(sandbox.remove_global("limit"));
    assert_eq!(run(&sandbox, "limit", None)["result"], Value::Null);

    assert!(sandbox.add_global("eval", "1").is_err());
}

#[wasm_bindgen_test]
fn test_destroy() {
    let mut sandbox = WasmSandbox::new(None).unwrap();
    sandbox.destroy();
    sandbox.destroy();
    assert!(sandbox.is_destroyed());

    let result = run(&sandbox, "1", None);
    assert_eq!(result["error"], json!("Sandbox has been destroyed"));
}
