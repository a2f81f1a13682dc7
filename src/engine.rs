//! Rhai engine setup and single-call script execution

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rhai::module_resolvers::DummyModuleResolver;
use rhai::{Dynamic, Engine, EvalAltResult, ParseError, ParseErrorType, Position, Scope, FLOAT, INT};

use crate::environment::{self, Capability, ConsoleSink, GlobalSnapshot};
use crate::sandbox::SandboxConfig;
use crate::shared::Instant;
use crate::timers::{self, TimerQueue};
use crate::types::SandboxError;

/// Below this elapsed time, exceeding the instruction budget counts as a spin
pub const FAST_SPIN_MS: u64 = 10;
/// Maximum nesting accepted when moving values across the worker boundary
pub const MAX_TRANSPORT_DEPTH: usize = 64;

const TIMEOUT_TOKEN: &str = "timeout";
const INSTRUCTION_TOKEN: &str = "instruction_limit";
const TERMINATED_TOKEN: &str = "terminated";
/// Operations between wall-clock reads in the progress callback
const CLOCK_SAMPLE_OPS: u64 = 64;

// ============================================================================
// Access violations
// ============================================================================

/// Error payload raised when sandboxed code touches a denied global
#[derive(Debug, Clone)]
pub struct AccessViolation {
    pub name: String,
}

pub(crate) fn access_violation(name: &str) -> Box<EvalAltResult> {
    EvalAltResult::ErrorRuntime(
        Dynamic::from(AccessViolation {
            name: name.to_string(),
        }),
        Position::NONE,
    )
    .into()
}

/// Register `name` at arities 0..=3 as a function that always raises an access violation
pub(crate) fn register_denied_fn(engine: &mut Engine, name: &str) {
    let n = name.to_string();
    engine.register_fn(name, move || -> Result<Dynamic, Box<EvalAltResult>> {
        Err(access_violation(&n))
    });
    let n = name.to_string();
    engine.register_fn(name, move |_: Dynamic| -> Result<Dynamic, Box<EvalAltResult>> {
        Err(access_violation(&n))
    });
    let n = name.to_string();
    engine.register_fn(
        name,
        move |_: Dynamic, _: Dynamic| -> Result<Dynamic, Box<EvalAltResult>> {
            Err(access_violation(&n))
        },
    );
    let n = name.to_string();
    engine.register_fn(
        name,
        move |_: Dynamic, _: Dynamic, _: Dynamic| -> Result<Dynamic, Box<EvalAltResult>> {
            Err(access_violation(&n))
        },
    );
}

// ============================================================================
// Budget
// ============================================================================

/// Time and instruction budget for one execution
#[derive(Debug, Clone)]
pub struct Budget {
    pub timeout_ms: u64,
    /// Only enforced against fast-spinning code (see [`FAST_SPIN_MS`])
    pub max_instructions: Option<u64>,
    terminate: Arc<AtomicBool>,
}

impl Budget {
    /// Wall-clock deadline only
    pub fn timeout_guarded(timeout_ms: u64) -> Self {
        Self {
            timeout_ms,
            max_instructions: None,
            terminate: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Wall-clock deadline plus the fast-spin instruction counter
    pub fn instruction_limited(timeout_ms: u64, max_instructions: u64) -> Self {
        Self {
            max_instructions: Some(max_instructions),
            ..Self::timeout_guarded(timeout_ms)
        }
    }

    /// Share an externally owned termination flag
    pub fn with_terminate_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.terminate = flag;
        self
    }

    /// Flag that aborts the script at its next operation once set
    pub fn terminate_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.terminate)
    }

    fn install(&self, engine: &mut Engine) {
        let started = Instant::now();
        let timeout_ms = self.timeout_ms;
        let max_instructions = self.max_instructions;
        let terminate = self.terminate_flag();

        engine.on_progress(move |ops| {
            if terminate.load(Ordering::Relaxed) {
                return Some(TERMINATED_TOKEN.into());
            }
            if ops % CLOCK_SAMPLE_OPS != 0 {
                return None;
            }
            let elapsed = started.elapsed().as_millis() as u64;
            if elapsed > timeout_ms {
                return Some(TIMEOUT_TOKEN.into());
            }
            match max_instructions {
                Some(max) if ops > max && elapsed < FAST_SPIN_MS => Some(INSTRUCTION_TOKEN.into()),
                _ => None,
            }
        });
    }
}

// ============================================================================
// Execution
// ============================================================================

/// Everything one execution needs
pub struct ScriptRun<'a> {
    pub code: &'a str,
    pub config: &'a SandboxConfig,
    pub snapshot: GlobalSnapshot,
    pub params: rhai::Map,
    /// Sink behind `console` and the `print`/`debug` statements; `None` drops them
    pub console: Option<ConsoleSink>,
    pub budget: Budget,
}

/// Build a locked-down engine for one execution
#[allow(deprecated)]
fn build_engine(
    config: &SandboxConfig,
    snapshot: &Arc<GlobalSnapshot>,
    console: Option<ConsoleSink>,
    budget: &Budget,
    queue: &TimerQueue,
) -> Engine {
    let mut engine = Engine::new();

    engine.set_max_string_size(config.max_memory_usage);
    engine.set_max_array_size(config.max_array_size);
    engine.set_max_map_size(config.max_map_size);
    engine.set_max_expr_depths(64, 64);
    engine.set_max_call_levels(64);
    engine.set_strict_variables(config.strict_mode);

    engine.disable_symbol("eval");
    engine.set_module_resolver(DummyModuleResolver::new());
    engine.register_fn("sleep", |_: INT| -> Result<(), Box<EvalAltResult>> {
        Err(access_violation("sleep"))
    });
    engine.register_fn("sleep", |_: FLOAT| -> Result<(), Box<EvalAltResult>> {
        Err(access_violation("sleep"))
    });

    environment::register_types(&mut engine, snapshot);
    timers::register(&mut engine, queue, &|name| snapshot.is_function_enabled(name));
    environment::console::route_statements(&mut engine, console);
    budget.install(&mut engine);

    let strict = config.strict_mode;
    let resolver = Arc::clone(snapshot);
    engine.on_var(move |name, _index, context| {
        if resolver.is_forbidden(name) {
            return Err(access_violation(name));
        }
        if context.scope().contains(name) {
            return Ok(None);
        }
        match resolver.resolve(name) {
            Some(Capability::Allowed(value) | Capability::Shadowed(value)) => Ok(Some(value)),
            Some(Capability::Denied) => Err(access_violation(name)),
            None if strict => Ok(None),
            None => Ok(Some(Dynamic::UNIT)),
        }
    });

    let guard = Arc::clone(snapshot);
    engine.on_def_var(move |_, info, _| Ok(!guard.is_forbidden(info.name())));

    engine
}

/// Compile and run `run.code`, then fire any queued timers
pub fn execute_code(run: ScriptRun<'_>) -> Result<Dynamic, SandboxError> {
    let ScriptRun {
        code,
        config,
        snapshot,
        params,
        console,
        budget,
    } = run;

    let snapshot = Arc::new(snapshot);
    let queue = TimerQueue::new();
    let engine = build_engine(config, &snapshot, console.clone(), &budget, &queue);

    let mut scope = Scope::new();
    for (name, value) in snapshot.bindings() {
        scope.push_dynamic(name.to_string(), value.clone());
    }
    for (name, value) in params {
        if snapshot.is_forbidden(&name) {
            return Err(SandboxError::AccessDenied {
                name: name.to_string(),
            });
        }
        scope.push_dynamic(name.to_string(), value);
    }

    let ast = engine
        .compile_with_scope(&scope, code)
        .map_err(|e| map_parse_error(e, &snapshot))?;

    let value = engine
        .eval_ast_with_scope::<Dynamic>(&mut scope, &ast)
        .map_err(|e| map_eval_error(e, &snapshot, &budget))?;

    if queue.pending() > 0 {
        queue
            .drain(&engine, &ast, console.as_ref())
            .map_err(|e| map_eval_error(e, &snapshot, &budget))?;
    }

    Ok(value)
}

// ============================================================================
// Error mapping
// ============================================================================

fn denied(name: &str) -> SandboxError {
    SandboxError::AccessDenied {
        name: name.to_string(),
    }
}

fn map_parse_error(err: ParseError, snapshot: &GlobalSnapshot) -> SandboxError {
    match &*err.0 {
        ParseErrorType::VariableUndefined(name) if snapshot.is_blocked(name) => denied(name),
        ParseErrorType::ForbiddenVariable(name) => denied(name),
        _ => SandboxError::CompilationError(err.to_string()),
    }
}

/// The function name in a Rhai call signature such as `fetch (&str | ImmutableString)`
fn signature_name(signature: &str) -> &str {
    signature
        .split([' ', '('])
        .next()
        .unwrap_or(signature)
}

/// Sandbox-specific meaning of a Rhai error, looking through call wrappers
fn classify(err: &EvalAltResult, snapshot: &GlobalSnapshot, budget: &Budget) -> Option<SandboxError> {
    match err {
        EvalAltResult::ErrorRuntime(payload, _) => payload
            .read_lock::<AccessViolation>()
            .map(|violation| denied(&violation.name)),
        EvalAltResult::ErrorInFunctionCall(_, _, inner, _) | EvalAltResult::ErrorInModule(_, inner, _) => {
            classify(inner, snapshot, budget)
        }
        EvalAltResult::ErrorTerminated(token, _) => {
            let token = token.clone().into_string().unwrap_or_default();
            match token.as_str() {
                INSTRUCTION_TOKEN => Some(SandboxError::InstructionLimitExceeded(
                    budget.max_instructions.unwrap_or_default(),
                )),
                _ => Some(SandboxError::Timeout(budget.timeout_ms)),
            }
        }
        EvalAltResult::ErrorTooManyOperations(_) => Some(SandboxError::InstructionLimitExceeded(
            budget.max_instructions.unwrap_or_default(),
        )),
        EvalAltResult::ErrorForbiddenVariable(name, _) => Some(denied(name)),
        EvalAltResult::ErrorVariableNotFound(name, _) if snapshot.is_blocked(name) => {
            Some(denied(name))
        }
        EvalAltResult::ErrorFunctionNotFound(signature, _)
            if snapshot.is_blocked(signature_name(signature)) =>
        {
            Some(denied(signature_name(signature)))
        }
        _ => None,
    }
}

fn map_eval_error(
    err: Box<EvalAltResult>,
    snapshot: &GlobalSnapshot,
    budget: &Budget,
) -> SandboxError {
    classify(&err, snapshot, budget).unwrap_or_else(|| SandboxError::RuntimeError(err.to_string()))
}

// ============================================================================
// Value conversion
// ============================================================================

/// Convert Rhai Dynamic to serde_json::Value
///
/// Never fails: host objects become their display names and non-finite floats become `null`.
pub fn dynamic_to_json(value: &Dynamic) -> serde_json::Value {
    if value.is_string() {
        serde_json::Value::String(value.clone().into_string().unwrap_or_default())
    } else if value.is_int() {
        serde_json::Value::Number(serde_json::Number::from(value.as_int().unwrap_or(0)))
    } else if value.is_float() {
        serde_json::Number::from_f64(value.as_float().unwrap_or(0.0))
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null)
    } else if value.is_bool() {
        serde_json::Value::Bool(value.as_bool().unwrap_or(false))
    } else if value.is_array() {
        let arr: Vec<Dynamic> = value.clone().into_array().unwrap_or_default();
        serde_json::Value::Array(arr.iter().map(dynamic_to_json).collect())
    } else if value.is_map() {
        let map: rhai::Map = value.clone().cast();
        let mut json_map = serde_json::Map::new();
        for (k, v) in map.iter() {
            json_map.insert(k.to_string(), dynamic_to_json(v));
        }
        serde_json::Value::Object(json_map)
    } else if value.is_unit() {
        serde_json::Value::Null
    } else if let Some(name) = environment::describe(value) {
        serde_json::Value::String(name)
    } else {
        serde_json::Value::String(value.to_string())
    }
}

/// Convert a value for the worker boundary, rejecting anything that is not plain data
pub fn dynamic_to_transport(value: &Dynamic) -> Result<serde_json::Value, SandboxError> {
    transport_at(value, 0)
}

fn transport_at(value: &Dynamic, depth: usize) -> Result<serde_json::Value, SandboxError> {
    if depth > MAX_TRANSPORT_DEPTH {
        return Err(SandboxError::Serialization(format!(
            "value nested deeper than {MAX_TRANSPORT_DEPTH} levels"
        )));
    }

    if value.is_array() {
        let arr: Vec<Dynamic> = value.clone().into_array().unwrap_or_default();
        let items = arr
            .iter()
            .map(|v| transport_at(v, depth + 1))
            .collect::<Result<Vec<_>, _>>()?;
        return Ok(serde_json::Value::Array(items));
    }
    if value.is_map() {
        let map: rhai::Map = value.clone().cast();
        let mut json_map = serde_json::Map::new();
        for (k, v) in map.iter() {
            json_map.insert(k.to_string(), transport_at(v, depth + 1)?);
        }
        return Ok(serde_json::Value::Object(json_map));
    }
    if value.is_float() {
        let f = value.as_float().unwrap_or(0.0);
        return serde_json::Number::from_f64(f)
            .map(serde_json::Value::Number)
            .ok_or_else(|| SandboxError::Serialization(format!("non-finite number {f}")));
    }
    if value.is_string() || value.is_int() || value.is_bool() || value.is_unit() {
        return Ok(dynamic_to_json(value));
    }
    if value.is_fnptr() {
        return Err(SandboxError::Serialization(
            "function values cannot be transferred".to_string(),
        ));
    }
    Err(SandboxError::Serialization(format!(
        "values of type {} cannot be transferred",
        value.type_name()
    )))
}

// ============================================================================
// Tests
// ============================================================================
