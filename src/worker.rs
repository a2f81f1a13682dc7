//! Worker-thread isolation
//!
//! The host serializes the request to JSON and hands it to a dedicated thread,
//! which rebuilds the sandbox environment from the transported config and runs
//! the script. Console entries and the final outcome come back over a channel.
//! If the host stops waiting, it sets the shared termination flag and the
//! script aborts at its next operation.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use rhai::Dynamic;
use serde::{Deserialize, Serialize};

use crate::engine::{self, dynamic_to_json, dynamic_to_transport, Budget, ScriptRun};
use crate::environment::{ConsoleObject, ConsoleSink, SandboxGlobalEnvironment};
use crate::sandbox::SandboxConfig;
use crate::shared::{console_hook, Instant};
use crate::types::{ConsoleEntry, SandboxError};

const WORKER_THREAD_NAME: &str = "proxy-sandbox-worker";

/// Everything the worker needs, in transportable form
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerRequest {
    pub code: String,
    pub config: SandboxConfig,
    pub params: serde_json::Map<String, serde_json::Value>,
    pub custom_globals: BTreeMap<String, serde_json::Value>,
}

impl WorkerRequest {
    /// Fails with [`SandboxError::Serialization`] when a param or global is not plain data
    pub fn prepare(
        code: &str,
        config: &SandboxConfig,
        params: &rhai::Map,
        custom_globals: &BTreeMap<String, Dynamic>,
    ) -> Result<Self, SandboxError> {
        let mut transported = serde_json::Map::new();
        for (name, value) in params {
            transported.insert(name.to_string(), dynamic_to_transport(value)?);
        }
        let mut globals = BTreeMap::new();
        for (name, value) in custom_globals {
            globals.insert(name.clone(), dynamic_to_transport(value)?);
        }
        // Custom globals travel separately so removals made after construction stick.
        let mut config = config.clone();
        config.custom_globals.clear();
        Ok(Self {
            code: code.to_string(),
            config,
            params: transported,
            custom_globals: globals,
        })
    }

    pub fn encode(&self) -> Result<String, SandboxError> {
        serde_json::to_string(self).map_err(|e| SandboxError::Serialization(e.to_string()))
    }

    pub fn decode(payload: &str) -> Result<Self, SandboxError> {
        serde_json::from_str(payload).map_err(|e| SandboxError::Serialization(e.to_string()))
    }
}

/// Messages sent from the worker to the host
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerMessage {
    Console { entry: ConsoleEntry },
    Result { value: serde_json::Value },
    Error { error: SandboxError },
}

/// Sets the termination flag when the host is done with a worker, however it got there
struct TerminateOnDrop(Arc<AtomicBool>);

impl Drop for TerminateOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::Relaxed);
    }
}

/// Host side of a running worker
pub struct WorkerHandle {
    receiver: mpsc::Receiver<WorkerMessage>,
    timeout_ms: u64,
    started: Instant,
    _terminate: TerminateOnDrop,
}

/// Start a worker thread for `request`
///
/// Fails with [`SandboxError::WorkerUnavailable`] when the thread cannot be spawned.
pub fn spawn(request: &WorkerRequest) -> Result<WorkerHandle, SandboxError> {
    let payload = request.encode()?;
    let (sender, receiver) = mpsc::channel();
    let terminate = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&terminate);

    thread::Builder::new()
        .name(WORKER_THREAD_NAME.to_string())
        .spawn(move || worker_main(&payload, sender, flag))
        .map_err(|e| SandboxError::WorkerUnavailable(e.to_string()))?;

    Ok(WorkerHandle {
        receiver,
        timeout_ms: request.config.timeout_ms,
        started: Instant::now(),
        _terminate: TerminateOnDrop(terminate),
    })
}

impl WorkerHandle {
    /// Wait for the outcome, passing console entries to `on_console` as they arrive
    ///
    /// The worker is terminated when this returns, whatever the outcome.
    pub fn wait(
        self,
        mut on_console: impl FnMut(ConsoleEntry),
    ) -> Result<serde_json::Value, SandboxError> {
        let deadline = Duration::from_millis(self.timeout_ms);
        loop {
            let remaining = deadline.saturating_sub(self.started.elapsed());
            match self.receiver.recv_timeout(remaining) {
                Ok(WorkerMessage::Console { entry }) => on_console(entry),
                Ok(WorkerMessage::Result { value }) => return Ok(value),
                Ok(WorkerMessage::Error { error }) => return Err(error),
                Err(RecvTimeoutError::Timeout) => {
                    tracing::warn!(timeout_ms = self.timeout_ms, "terminating unresponsive worker");
                    return Err(SandboxError::Timeout(self.timeout_ms));
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(SandboxError::WorkerFailed(
                        "worker exited without reporting a result".to_string(),
                    ));
                }
            }
        }
    }
}

fn worker_main(payload: &str, sender: Sender<WorkerMessage>, terminate: Arc<AtomicBool>) {
    let outcome = run_request(payload, &sender, terminate);
    let message = match outcome {
        Ok(value) => WorkerMessage::Result { value },
        Err(error) => WorkerMessage::Error { error },
    };
    // The host may have given up already; nobody is left to tell.
    let _ = sender.send(message);
}

fn run_request(
    payload: &str,
    sender: &Sender<WorkerMessage>,
    terminate: Arc<AtomicBool>,
) -> Result<serde_json::Value, SandboxError> {
    let request = WorkerRequest::decode(payload)?;
    let config = request.config;

    let mut environment = SandboxGlobalEnvironment::from_config(&config);
    for (name, value) in &request.custom_globals {
        let value = rhai::serde::to_dynamic(value)
            .map_err(|e| SandboxError::Serialization(e.to_string()))?;
        environment.add_custom(name, value)?;
    }

    let sink = config.allow_console.then(|| {
        let forward = sender.clone();
        ConsoleSink::new(Some(console_hook(move |entry: &ConsoleEntry| {
            let _ = forward.send(WorkerMessage::Console {
                entry: entry.clone(),
            });
        })))
    });

    let mut params = rhai::Map::new();
    for (name, value) in request.params {
        let value = rhai::serde::to_dynamic(&value)
            .map_err(|e| SandboxError::Serialization(e.to_string()))?;
        params.insert(name.into(), value);
    }

    let value = engine::execute_code(ScriptRun {
        code: &request.code,
        config: &config,
        snapshot: environment.snapshot(sink.clone().map(ConsoleObject::new)),
        params,
        console: sink,
        budget: Budget::timeout_guarded(config.timeout_ms).with_terminate_flag(terminate),
    })?;

    Ok(dynamic_to_json(&value))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(
        code: &str,
        config: SandboxConfig,
    ) -> (Result<serde_json::Value, SandboxError>, Vec<ConsoleEntry>) {
        let request =
            WorkerRequest::prepare(code, &config, &rhai::Map::new(), &BTreeMap::new()).unwrap();
        let mut logs = Vec::new();
        let result = spawn(&request).unwrap().wait(|entry| logs.push(entry));
        (result, logs)
    }

    #[test]
    fn test_worker_returns_value() {
        let (result, _) = run("let x = [1, 2, 3]; x.len()", SandboxConfig::default());
        assert_eq!(result.unwrap(), serde_json::json!(3));
    }

    #[test]
    fn test_worker_streams_console() {
        let (result, logs) = run(r#"console.log("from worker"); true"#, SandboxConfig::default());
        assert_eq!(result.unwrap(), serde_json::json!(true));
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].message, "from worker");
    }

    #[test]
    fn test_worker_reports_access_denied() {
        let (result, _) = run("let r = require; r", SandboxConfig::default());
        assert_eq!(
            result.unwrap_err(),
            SandboxError::AccessDenied {
                name: "require".to_string()
            }
        );
    }

    #[test]
    fn test_worker_times_out_runaway_loop() {
        let config = SandboxConfig::default().with_timeout_ms(100);
        let started = Instant::now();
        let (result, _) = run("loop { }", config);
        assert_eq!(result.unwrap_err(), SandboxError::Timeout(100));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn test_prepare_rejects_function_params() {
        let mut params = rhai::Map::new();
        params.insert(
            "callback".into(),
            Dynamic::from(rhai::FnPtr::new("noop").unwrap()),
        );
        let err = WorkerRequest::prepare("1", &SandboxConfig::default(), &params, &BTreeMap::new())
            .unwrap_err();
        assert!(matches!(err, SandboxError::Serialization(_)));
    }

    #[test]
    fn test_request_round_trips_custom_globals() {
        let mut globals = BTreeMap::new();
        globals.insert("rate".to_string(), Dynamic::from(0.25_f64));
        let request =
            WorkerRequest::prepare("rate * 4", &SandboxConfig::default(), &rhai::Map::new(), &globals)
                .unwrap();
        let decoded = WorkerRequest::decode(&request.encode().unwrap()).unwrap();
        assert_eq!(decoded.custom_globals["rate"], serde_json::json!(0.25));

        let mut logs = Vec::new();
        let value = spawn(&request).unwrap().wait(|e| logs.push(e)).unwrap();
        assert_eq!(value, serde_json::json!(1.0));
    }
}
