//! Feature-gated sharing primitives
//!
//! Native builds run scripts on worker threads, so Rhai is compiled with `sync`
//! and every value captured by an engine callback must be `Send + Sync`. WASM
//! builds are single-threaded and use `Rc`/`RefCell` instead.

#[cfg(feature = "native")]
use std::sync::{Arc, Mutex};

#[cfg(not(feature = "native"))]
use std::cell::RefCell;
#[cfg(not(feature = "native"))]
use std::rc::Rc;

#[cfg(not(feature = "wasm"))]
pub use std::time::Instant;
#[cfg(feature = "wasm")]
pub use web_time::Instant;

use crate::types::ConsoleEntry;

// ============================================================================
// Type aliases for thread-safety primitives (feature-gated)
// ============================================================================

#[cfg(feature = "native")]
pub type Shared<T> = Arc<Mutex<T>>;
#[cfg(feature = "native")]
pub type ConsoleHook = Arc<dyn Fn(&ConsoleEntry) + Send + Sync>;

#[cfg(not(feature = "native"))]
pub type Shared<T> = Rc<RefCell<T>>;
#[cfg(not(feature = "native"))]
pub type ConsoleHook = Rc<dyn Fn(&ConsoleEntry)>;

// ============================================================================
// Helper functions for shared state (feature-gated)
// ============================================================================

#[cfg(feature = "native")]
pub fn new_shared<T>(value: T) -> Shared<T> {
    Arc::new(Mutex::new(value))
}

#[cfg(not(feature = "native"))]
pub fn new_shared<T>(value: T) -> Shared<T> {
    Rc::new(RefCell::new(value))
}

/// Run `f` with exclusive access to the shared value
#[cfg(feature = "native")]
pub fn with_shared<T, R>(shared: &Shared<T>, f: impl FnOnce(&mut T) -> R) -> R {
    // A panic inside a script callback must not wedge later calls.
    let mut guard = shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    f(&mut guard)
}

/// Run `f` with exclusive access to the shared value
#[cfg(not(feature = "native"))]
pub fn with_shared<T, R>(shared: &Shared<T>, f: impl FnOnce(&mut T) -> R) -> R {
    f(&mut shared.borrow_mut())
}

#[cfg(feature = "native")]
pub fn console_hook(f: impl Fn(&ConsoleEntry) + Send + Sync + 'static) -> ConsoleHook {
    Arc::new(f)
}

#[cfg(not(feature = "native"))]
pub fn console_hook(f: impl Fn(&ConsoleEntry) + 'static) -> ConsoleHook {
    Rc::new(f)
}

/// Milliseconds since the Unix epoch
#[cfg(not(feature = "wasm"))]
pub fn epoch_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Milliseconds since the Unix epoch
#[cfg(feature = "wasm")]
pub fn epoch_millis() -> i64 {
    js_sys::Date::now() as i64
}
