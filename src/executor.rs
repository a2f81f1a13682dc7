//! Sandbox front end: validation, strategy selection and result envelopes

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use rhai::Dynamic;

use crate::engine::{self, dynamic_to_json, Budget, ScriptRun};
use crate::environment::{ConsoleObject, ConsoleSink, SandboxGlobalEnvironment};
use crate::sandbox::SandboxConfig;
use crate::shared::Instant;
use crate::types::{ConsoleEntry, ExecutionStrategy, SandboxError, SandboxResult};
use crate::validator::{looks_like_infinite_loop, validate_code};

/// Counts in-flight executions for [`ProxySandbox::is_running`]
struct RunningGuard(Arc<AtomicUsize>);

impl RunningGuard {
    fn enter(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(counter))
    }
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Capability-restricted script sandbox
///
/// Every call to [`execute`](Self::execute) validates the source, picks an
/// execution strategy and runs the script against a fresh snapshot of the
/// global environment. Failures never escape as `Err` or panics; they are
/// reported in the returned [`SandboxResult`].
pub struct ProxySandbox {
    config: SandboxConfig,
    environment: SandboxGlobalEnvironment,
    running: Arc<AtomicUsize>,
    destroyed: bool,
}

impl ProxySandbox {
    pub fn new(config: SandboxConfig) -> Self {
        let environment = SandboxGlobalEnvironment::from_config(&config);
        Self {
            config,
            environment,
            running: Arc::new(AtomicUsize::new(0)),
            destroyed: false,
        }
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    pub fn environment(&self) -> &SandboxGlobalEnvironment {
        &self.environment
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst) > 0
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    /// Expose `value` to later executions as the global `name`
    pub fn add_global(&mut self, name: &str, value: Dynamic) -> Result<(), SandboxError> {
        if self.destroyed {
            return Err(SandboxError::Destroyed);
        }
        self.environment.add_custom(name, value)
    }

    pub fn remove_global(&mut self, name: &str) -> bool {
        self.environment.remove_custom(name)
    }

    /// Release the environment; later executions fail. Safe to call repeatedly.
    pub fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        self.environment.clear();
        self.destroyed = true;
        tracing::debug!("sandbox destroyed");
    }

    /// Strategy for `code` before any fallback
    pub fn plan(&self, code: &str) -> ExecutionStrategy {
        if cfg!(feature = "native") && self.config.use_worker {
            ExecutionStrategy::Worker
        } else if looks_like_infinite_loop(code) {
            ExecutionStrategy::InstructionLimited
        } else {
            ExecutionStrategy::TimeoutGuarded
        }
    }

    /// Run `code` with `params` bound as top-level variables
    pub fn execute(&self, code: &str, params: rhai::Map) -> SandboxResult {
        let started = Instant::now();
        let elapsed_ms = || started.elapsed().as_millis() as u64;

        if self.destroyed {
            return SandboxResult::error(
                SandboxError::Destroyed.to_string(),
                self.plan(code),
                Vec::new(),
                elapsed_ms(),
            );
        }

        let _running = RunningGuard::enter(&self.running);
        let planned = self.plan(code);

        if let Err(e) = validate_code(code, &self.config) {
            log_failure(&e, planned);
            return SandboxResult::error(e.to_string(), planned, Vec::new(), elapsed_ms());
        }

        tracing::debug!(strategy = %planned, "executing sandboxed script");
        let (strategy, outcome, logs) = match planned {
            ExecutionStrategy::Worker => self.run_in_worker(code, params),
            other => {
                let (outcome, logs) = self.run_in_process(code, params, other);
                (other, outcome, logs)
            }
        };

        let execution_time_ms = elapsed_ms();
        match outcome {
            Ok(value) => SandboxResult::success(value, strategy, logs, execution_time_ms),
            Err(e) => {
                log_failure(&e, strategy);
                SandboxResult::error(e.to_string(), strategy, logs, execution_time_ms)
            }
        }
    }

    /// [`execute`](Self::execute) with params given as a JSON object
    pub fn execute_json(&self, code: &str, params: serde_json::Value) -> SandboxResult {
        let params = match &params {
            serde_json::Value::Null => Ok(rhai::Map::new()),
            serde_json::Value::Object(_) => rhai::serde::to_dynamic(&params)
                .map(|value| value.try_cast::<rhai::Map>().unwrap_or_default())
                .map_err(|e| SandboxError::Serialization(e.to_string())),
            other => Err(SandboxError::Serialization(format!(
                "params must be a JSON object, got {other}"
            ))),
        };
        match params {
            Ok(params) => self.execute(code, params),
            Err(e) => SandboxResult::error(e.to_string(), self.plan(code), Vec::new(), 0),
        }
    }

    fn run_in_process(
        &self,
        code: &str,
        params: rhai::Map,
        strategy: ExecutionStrategy,
    ) -> (Result<serde_json::Value, SandboxError>, Vec<ConsoleEntry>) {
        let sink = self.config.allow_console.then(ConsoleSink::host);
        let snapshot = self
            .environment
            .snapshot(sink.clone().map(ConsoleObject::new));
        let budget = match strategy {
            ExecutionStrategy::InstructionLimited => {
                Budget::instruction_limited(self.config.timeout_ms, self.config.max_instructions)
            }
            _ => Budget::timeout_guarded(self.config.timeout_ms),
        };

        let outcome = engine::execute_code(ScriptRun {
            code,
            config: &self.config,
            snapshot,
            params,
            console: sink.clone(),
            budget,
        })
        .map(|value| dynamic_to_json(&value));

        let logs = sink.map(|s| s.entries()).unwrap_or_default();
        (outcome, logs)
    }

    #[cfg(feature = "native")]
    fn run_in_worker(
        &self,
        code: &str,
        params: rhai::Map,
    ) -> (
        ExecutionStrategy,
        Result<serde_json::Value, SandboxError>,
        Vec<ConsoleEntry>,
    ) {
        use crate::worker::{self, WorkerRequest};

        let handle = WorkerRequest::prepare(
            code,
            &self.config,
            &params,
            self.environment.custom_globals(),
        )
        .and_then(|request| worker::spawn(&request));

        match handle {
            Ok(handle) => {
                let mut logs = Vec::new();
                let outcome = handle.wait(|entry| {
                    crate::environment::console::replay_to_host(&entry);
                    logs.push(entry);
                });
                (ExecutionStrategy::Worker, outcome, logs)
            }
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    "worker unavailable, falling back to instruction-limited execution"
                );
                let strategy = ExecutionStrategy::InstructionLimited;
                let (outcome, logs) = self.run_in_process(code, params, strategy);
                (strategy, outcome, logs)
            }
        }
    }

    #[cfg(not(feature = "native"))]
    fn run_in_worker(
        &self,
        code: &str,
        params: rhai::Map,
    ) -> (
        ExecutionStrategy,
        Result<serde_json::Value, SandboxError>,
        Vec<ConsoleEntry>,
    ) {
        let strategy = ExecutionStrategy::InstructionLimited;
        let (outcome, logs) = self.run_in_process(code, params, strategy);
        (strategy, outcome, logs)
    }
}

fn log_failure(error: &SandboxError, strategy: ExecutionStrategy) {
    if error.is_validation() {
        tracing::debug!(%error, "rejected by validator");
    } else if error.is_timeout() {
        tracing::warn!(%error, %strategy, "sandboxed script exceeded its budget");
    } else {
        tracing::debug!(%error, %strategy, "sandboxed script failed");
    }
}

impl Drop for ProxySandbox {
    fn drop(&mut self) {
        self.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn in_process() -> ProxySandbox {
        ProxySandbox::new(SandboxConfig::default().with_worker(false))
    }

    #[test]
    fn test_plan_prefers_worker_on_native() {
        let sandbox = ProxySandbox::new(SandboxConfig::default());
        assert_eq!(sandbox.plan("1 + 1"), ExecutionStrategy::Worker);
    }

    #[test]
    fn test_plan_without_worker() {
        let sandbox = in_process();
        assert_eq!(sandbox.plan("1 + 1"), ExecutionStrategy::TimeoutGuarded);
        assert_eq!(
            sandbox.plan("while true { }"),
            ExecutionStrategy::InstructionLimited
        );
    }

    #[test]
    fn test_execute_success_envelope() {
        let result = in_process().execute("40 + 2", rhai::Map::new());
        assert!(result.success);
        assert_eq!(result.result, serde_json::json!(42));
        assert_eq!(result.strategy, ExecutionStrategy::TimeoutGuarded);
        assert!(result.memory_usage.is_some());
    }

    #[test]
    fn test_validation_failure_envelope() {
        let result = in_process().execute("eval(\"1\")", rhai::Map::new());
        assert!(!result.success);
        assert_eq!(
            result.error.as_deref(),
            Some("Forbidden pattern detected: eval(")
        );
        assert!(!in_process().is_running());
    }

    #[test]
    fn test_execute_json_params() {
        let result = in_process().execute_json("a + b", serde_json::json!({"a": 1, "b": 2}));
        assert_eq!(result.result, serde_json::json!(3));

        let bad = in_process().execute_json("1", serde_json::json!([1]));
        assert!(!bad.success);
    }

    #[test]
    fn test_add_and_remove_global() {
        let mut sandbox = in_process();
        sandbox.add_global("factor", Dynamic::from(10_i64)).unwrap();
        assert_eq!(
            sandbox.execute("factor * 2", rhai::Map::new()).result,
            serde_json::json!(20)
        );

        assert!(sandbox.remove_global("factor"));
        assert!(sandbox.execute("factor", rhai::Map::new()).result.is_null());
    }

    #[test]
    fn test_add_forbidden_global_leaves_state_unchanged() {
        let mut sandbox = in_process();
        let before = sandbox.environment().own_keys();
        assert!(sandbox.add_global("eval", Dynamic::UNIT).is_err());
        assert_eq!(sandbox.environment().own_keys(), before);
    }

    #[test]
    fn test_destroy_is_idempotent() {
        let mut sandbox = in_process();
        sandbox.destroy();
        sandbox.destroy();
        assert!(sandbox.is_destroyed());
        assert!(sandbox.environment().own_keys().is_empty());

        let result = sandbox.execute("1", rhai::Map::new());
        assert_eq!(result.error.as_deref(), Some("Sandbox has been destroyed"));
        assert_eq!(result.strategy, ExecutionStrategy::TimeoutGuarded);

        let looping = sandbox.execute("while true { }", rhai::Map::new());
        assert_eq!(looping.strategy, ExecutionStrategy::InstructionLimited);
    }

    #[test]
    fn test_destroyed_envelope_reports_planned_strategy() {
        let mut sandbox = ProxySandbox::new(SandboxConfig::default());
        sandbox.destroy();
        let result = sandbox.execute("1", rhai::Map::new());
        assert!(!result.success);
        assert_eq!(result.strategy, sandbox.plan("1"));
        assert_eq!(result.strategy, ExecutionStrategy::Worker);
    }

    #[test]
    fn test_failure_kinds_in_envelopes() {
        let sandbox = in_process();
        let rejected = sandbox.execute("", rhai::Map::new());
        assert!(SandboxError::EmptyCode.is_validation());
        assert_eq!(rejected.error.as_deref(), Some("Code is empty"));

        let quick =
            ProxySandbox::new(SandboxConfig::default().with_worker(false).with_timeout_ms(50));
        let overrun = quick.execute("let go = true; while go { }", rhai::Map::new());
        assert!(SandboxError::Timeout(50).is_timeout());
        assert_eq!(
            overrun.error.as_deref(),
            Some("Code execution timeout after 50ms")
        );
    }
}
