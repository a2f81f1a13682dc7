//! Built-in allow/deny tables for sandbox globals

/// Globals reachable from sandboxed code unless a config says otherwise
pub const DEFAULT_SAFE_GLOBALS: &[&str] = &[
    "Math",
    "JSON",
    "Date",
    "Number",
    "Array",
    "Object",
    "parseInt",
    "parseFloat",
    "isNaN",
    "isFinite",
    "window",
    "globalThis",
    "document",
    "console",
    "setTimeout",
    "clearTimeout",
    "setInterval",
    "clearInterval",
];

/// Globals that must never resolve, even when also allowed
pub const DEFAULT_FORBIDDEN_GLOBALS: &[&str] = &[
    // Code construction
    "eval",
    "Function",
    "constructor",
    "__proto__",
    "prototype",
    "Proxy",
    "Reflect",
    "WebAssembly",
    // Host runtime
    "global",
    "self",
    "process",
    "require",
    "module",
    "exports",
    "Buffer",
    "importScripts",
    "sleep",
    // Network
    "XMLHttpRequest",
    "fetch",
    "WebSocket",
    "Worker",
    "SharedArrayBuffer",
    "Atomics",
    "postMessage",
    // Storage and identity
    "localStorage",
    "sessionStorage",
    "indexedDB",
    "location",
    "navigator",
    "history",
    // Frames and dialogs
    "parent",
    "top",
    "frames",
    "opener",
    "alert",
    "confirm",
    "prompt",
    "open",
    "close",
];

/// Window properties that always read as inert substitutes
pub const SENSITIVE_PROPERTIES: &[&str] = &[
    "cookie",
    "localStorage",
    "sessionStorage",
    "location",
    "navigator",
    "indexedDB",
    "parent",
    "top",
    "frames",
    "opener",
    // Vendor globals
    "chrome",
    "browser",
    "safari",
    "opera",
];

/// Names the static validator rejects in call, access, return or assignment position
pub const CRITICAL_FORBIDDEN_NAMES: &[&str] = &[
    "eval",
    "Function",
    "constructor",
    "__proto__",
    "global",
    "self",
    "process",
    "require",
    "module",
    "exports",
    "Buffer",
    "XMLHttpRequest",
    "fetch",
    "WebSocket",
    "Worker",
    "SharedArrayBuffer",
    "Atomics",
    "WebAssembly",
];

/// Timer functions gated by `allow_timers`
pub const TIMER_FUNCTIONS: &[&str] = &["setTimeout", "clearTimeout", "setInterval", "clearInterval"];

/// Builtins exposed as plain functions rather than scope values
pub const FUNCTION_GLOBALS: &[&str] = &["parseInt", "parseFloat", "isNaN", "isFinite"];

/// Names that refer back to the sandbox's own global object
pub const SELF_REFERENCES: &[&str] = &["window", "globalThis", "global"];

pub fn is_sensitive_property(name: &str) -> bool {
    SENSITIVE_PROPERTIES.contains(&name)
}

pub fn is_timer_function(name: &str) -> bool {
    TIMER_FUNCTIONS.contains(&name)
}

pub fn is_function_global(name: &str) -> bool {
    FUNCTION_GLOBALS.contains(&name) || is_timer_function(name)
}
