//! Runaway Scripts Example
//!
//! Shows how each execution strategy stops a script that never finishes:
//!
//! - **worker**: the host stops waiting at the deadline and the worker thread
//!   aborts at its next operation
//! - **instruction_limited**: an obvious `while true {}` is cut off by the
//!   operation counter
//! - **timeout_guarded**: a computed loop runs until the wall-clock deadline
//!
//! Run with: `cargo run --example runaway_scripts`

use std::time::Instant;

use proxy_sandbox::{create_sandbox, SandboxConfig};
use serde_json::Value;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).with_writer(std::io::stderr).init();

    println!("=== Runaway Scripts Example ===\n");

    let cases = [
        (
            "worker",
            SandboxConfig::default().with_timeout_ms(250),
            "let n = 0; loop { n += 1; }",
        ),
        (
            "in-process literal loop",
            SandboxConfig::default().with_worker(false).with_timeout_ms(250),
            "while true { }",
        ),
        (
            "in-process computed loop",
            SandboxConfig::default().with_worker(false).with_timeout_ms(250),
            "let go = true; while go { }",
        ),
        (
            "timer storm",
            SandboxConfig::default().with_timers(true).with_timeout_ms(250),
            r#"let n = 0; setInterval(|| { n += 1; }, 1); "scheduled""#,
        ),
    ];

    for (label, config, code) in cases {
        let sandbox = create_sandbox(config);
        let started = Instant::now();
        let result = sandbox.execute_json(code, Value::Null);
        info!(case = label, strategy = %result.strategy, "finished");

        println!("{label}:");
        println!("  strategy:  {}", result.strategy);
        println!("  success:   {}", result.success);
        match &result.error {
            Some(error) => println!("  error:     {error}"),
            None => println!("  result:    {}", result.result),
        }
        println!("  wall time: {}ms\n", started.elapsed().as_millis());
    }
}
