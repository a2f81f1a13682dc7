//! Console capture and host replay

use rhai::{Dynamic, Engine};

use crate::shared::{new_shared, with_shared, ConsoleHook, Shared};
use crate::types::{ConsoleEntry, ConsoleLevel};

const LEVELS: [ConsoleLevel; 5] = [
    ConsoleLevel::Log,
    ConsoleLevel::Info,
    ConsoleLevel::Warn,
    ConsoleLevel::Error,
    ConsoleLevel::Debug,
];

/// Collects console entries for one execution and forwards each one as it arrives
#[derive(Clone)]
pub struct ConsoleSink {
    entries: Shared<Vec<ConsoleEntry>>,
    forward: Option<ConsoleHook>,
}

impl ConsoleSink {
    pub fn new(forward: Option<ConsoleHook>) -> Self {
        Self {
            entries: new_shared(Vec::new()),
            forward,
        }
    }

    /// Sink that replays straight to the host console
    pub fn host() -> Self {
        Self::new(Some(crate::shared::console_hook(replay_to_host)))
    }

    pub fn emit(&self, level: ConsoleLevel, message: impl Into<String>) {
        let entry = ConsoleEntry::new(level, message);
        if let Some(forward) = &self.forward {
            forward(&entry);
        }
        with_shared(&self.entries, |entries| entries.push(entry));
    }

    pub fn entries(&self) -> Vec<ConsoleEntry> {
        with_shared(&self.entries, |entries| entries.clone())
    }
}

/// The `console` object seen by sandboxed code
#[derive(Clone)]
pub struct ConsoleObject {
    sink: ConsoleSink,
}

impl ConsoleObject {
    pub fn new(sink: ConsoleSink) -> Self {
        Self { sink }
    }

    fn write(&self, level: ConsoleLevel, args: &[Dynamic]) {
        self.sink.emit(level, join_args(args));
    }
}

/// Join console arguments the way `console.log` prints them
pub fn join_args(args: &[Dynamic]) -> String {
    args.iter()
        .map(|arg| {
            if arg.is_string() {
                arg.clone().into_string().unwrap_or_default()
            } else {
                crate::engine::dynamic_to_json(arg).to_string()
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Replay a sandbox console entry on the host, prefixed `[Sandbox]`
#[cfg(not(feature = "wasm"))]
pub fn replay_to_host(entry: &ConsoleEntry) {
    match entry.level {
        ConsoleLevel::Log | ConsoleLevel::Info => {
            tracing::info!(target: "sandbox::console", "[Sandbox] {}", entry.message)
        }
        ConsoleLevel::Warn => {
            tracing::warn!(target: "sandbox::console", "[Sandbox] {}", entry.message)
        }
        ConsoleLevel::Error => {
            tracing::error!(target: "sandbox::console", "[Sandbox] {}", entry.message)
        }
        ConsoleLevel::Debug => {
            tracing::debug!(target: "sandbox::console", "[Sandbox] {}", entry.message)
        }
    }
}

/// Replay a sandbox console entry on the browser console, prefixed `[Sandbox]`
#[cfg(feature = "wasm")]
pub fn replay_to_host(entry: &ConsoleEntry) {
    let line = wasm_bindgen::JsValue::from_str(&format!("[Sandbox] {}", entry.message));
    match entry.level {
        ConsoleLevel::Log => web_sys::console::log_1(&line),
        ConsoleLevel::Info => web_sys::console::info_1(&line),
        ConsoleLevel::Warn => web_sys::console::warn_1(&line),
        ConsoleLevel::Error => web_sys::console::error_1(&line),
        ConsoleLevel::Debug => web_sys::console::debug_1(&line),
    }
}

pub(crate) fn register(engine: &mut Engine) {
    engine.register_type_with_name::<ConsoleObject>("Console");

    for level in LEVELS {
        let name = level.method_name();
        engine.register_fn(name, move |c: &mut ConsoleObject| c.write(level, &[]));
        engine.register_fn(name, move |c: &mut ConsoleObject, a: Dynamic| {
            c.write(level, &[a])
        });
        engine.register_fn(name, move |c: &mut ConsoleObject, a: Dynamic, b: Dynamic| {
            c.write(level, &[a, b])
        });
        engine.register_fn(
            name,
            move |c: &mut ConsoleObject, a: Dynamic, b: Dynamic, d: Dynamic| {
                c.write(level, &[a, b, d])
            },
        );
    }
}

/// Route Rhai's `print` and `debug` statements into the sink
pub(crate) fn route_statements(engine: &mut Engine, sink: Option<ConsoleSink>) {
    match sink {
        Some(sink) => {
            let print_sink = sink.clone();
            engine.on_print(move |text| print_sink.emit(ConsoleLevel::Log, text));
            engine.on_debug(move |text, _source, _pos| sink.emit(ConsoleLevel::Debug, text));
        }
        None => {
            engine.on_print(|_| {});
            engine.on_debug(|_, _, _| {});
        }
    }
}
