//! Untrusted Snippets Example
//!
//! Runs a handful of user-supplied snippets through one sandbox and prints the
//! envelope for each: plain computations succeed, escape attempts are rejected
//! before they run, and host objects resolve to inert stand-ins.
//!
//! Run with: `cargo run --example untrusted_snippets`
//! Set `RUST_LOG=proxy_sandbox=debug` to see strategy selection.

use proxy_sandbox::{create_sandbox, SandboxConfig, SandboxResult};
use serde_json::json;
use tracing_subscriber::{fmt, EnvFilter};

const SNIPPETS: &[(&str, &str)] = &[
    ("arithmetic", "return a * b + 1"),
    ("builtins", r#"Math.max(parseInt("41"), 7) + 1"#),
    ("json", r#"JSON.parse("{\"items\": [1, 2, 3]}").items.len()"#),
    ("console", r#"console.log("tax", rate * 100, "%"); rate"#),
    ("eval attempt", r#"eval("1 + 1")"#),
    ("network attempt", r#"fetch("https://example.com/steal")"#),
    ("prototype walk", "#{}.constructor"),
    ("cookie read", "window.cookie"),
    ("location read", "window.location.href"),
    ("storage write", r#"window.localStorage.setItem("token", "x"); window.localStorage.length"#),
    ("denied global", "let r = localStorage; r"),
];

fn print_result(label: &str, result: &SandboxResult) {
    let outcome = if result.success {
        format!("ok    {}", result.result)
    } else {
        format!("error {}", result.error.as_deref().unwrap_or("unknown"))
    };
    println!(
        "{:<16} {:<20} {:>4}ms  {}",
        label, result.strategy, result.execution_time_ms, outcome
    );
    for entry in &result.logs {
        println!("{:<16} log[{}] {}", "", entry.level.method_name(), entry.message);
    }
}

fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    fmt().with_env_filter(filter).with_writer(std::io::stderr).init();

    println!("=== Untrusted Snippets Example ===\n");

    let mut sandbox = create_sandbox(SandboxConfig::default().with_timeout_ms(1_000));
    let params = json!({"a": 6, "b": 7, "rate": 0.2});

    for (label, code) in SNIPPETS {
        let result = sandbox.execute_json(code, params.clone());
        print_result(label, &result);
    }

    println!("\nVisible globals: {}", sandbox.environment().own_keys().join(", "));

    sandbox.destroy();
    let after = sandbox.execute_json("1", serde_json::Value::Null);
    println!("\nAfter destroy: {}", after.error.unwrap_or_default());
}
