//! Inert `window` substitute and its storage/location/navigator stand-ins

use std::collections::{BTreeMap, BTreeSet};

use rhai::{Array, Dynamic, Engine, Map, INT};

use crate::globals::{is_sensitive_property, SELF_REFERENCES};
use crate::shared::{new_shared, with_shared, Shared};

/// Screen and viewport values every window starts with
const VIEWPORT: &[(&str, INT)] = &[
    ("innerWidth", 1024),
    ("innerHeight", 768),
    ("outerWidth", 1024),
    ("outerHeight", 768),
    ("scrollX", 0),
    ("scrollY", 0),
    ("devicePixelRatio", 1),
];

#[derive(Default)]
struct WindowState {
    props: BTreeMap<String, Dynamic>,
    read_only: BTreeSet<String>,
}

/// The `window` object seen by sandboxed code
///
/// Clones share state, so `window.window.x` and `window.x` are the same slot.
#[derive(Clone)]
pub struct SafeWindow {
    state: Shared<WindowState>,
}

impl Default for SafeWindow {
    fn default() -> Self {
        Self::new()
    }
}

impl SafeWindow {
    /// Window with the static viewport fields defined
    pub fn new() -> Self {
        let window = Self {
            state: new_shared(WindowState::default()),
        };
        for (name, value) in VIEWPORT {
            window.define(name, Dynamic::from(*value));
        }
        let mut screen = Map::new();
        for (name, value) in [("width", 1024), ("height", 768), ("availWidth", 1024), ("availHeight", 768)]
        {
            screen.insert(name.into(), Dynamic::from(value as INT));
        }
        screen.insert("colorDepth".into(), Dynamic::from(24 as INT));
        window.define("screen", Dynamic::from_map(screen));
        window.define("name", Dynamic::from(""));
        window
    }

    /// Add a read-only property; sensitive names are never stored
    pub fn define(&self, name: &str, value: Dynamic) {
        if is_sensitive_property(name) {
            return;
        }
        with_shared(&self.state, |state| {
            state.props.insert(name.to_string(), value);
            state.read_only.insert(name.to_string());
        });
    }

    /// Property read (`window.x`, `window["x"]`)
    pub fn get(&self, name: &str) -> Dynamic {
        match name {
            "cookie" => Dynamic::from(""),
            "localStorage" | "sessionStorage" => Dynamic::from(StorageMock),
            "location" => location_record(),
            "navigator" => navigator_record(),
            n if is_sensitive_property(n) => Dynamic::UNIT,
            "window" | "globalThis" => Dynamic::from(self.clone()),
            _ => with_shared(&self.state, |state| {
                state.props.get(name).cloned().unwrap_or(Dynamic::UNIT)
            }),
        }
    }

    /// Property write; returns whether the value was stored
    ///
    /// Sensitive, self-referencing and read-only names fail silently.
    pub fn set(&self, name: &str, value: Dynamic) -> bool {
        if is_sensitive_property(name) || SELF_REFERENCES.contains(&name) {
            return false;
        }
        with_shared(&self.state, |state| {
            if state.read_only.contains(name) {
                return false;
            }
            state.props.insert(name.to_string(), value);
            true
        })
    }

    /// `"x" in window`; sensitive names read as absent
    pub fn has(&self, name: &str) -> bool {
        if is_sensitive_property(name) {
            return false;
        }
        matches!(name, "window" | "globalThis")
            || with_shared(&self.state, |state| state.props.contains_key(name))
    }

    /// Enumerable property names, sensitive names excluded
    pub fn own_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = with_shared(&self.state, |state| {
            state.props.keys().cloned().collect()
        });
        keys.push("window".to_string());
        keys.push("globalThis".to_string());
        keys.retain(|k| !is_sensitive_property(k));
        keys.sort();
        keys
    }

    /// Independent copy for one execution
    pub fn deep_copy(&self) -> Self {
        let (props, read_only) =
            with_shared(&self.state, |state| (state.props.clone(), state.read_only.clone()));
        Self {
            state: new_shared(WindowState { props, read_only }),
        }
    }

    /// Drop every property
    pub fn clear(&self) {
        with_shared(&self.state, |state| {
            state.props.clear();
            state.read_only.clear();
        });
    }

    pub fn is_same(&self, other: &SafeWindow) -> bool {
        shared_ptr_eq(&self.state, &other.state)
    }
}

#[cfg(feature = "native")]
fn shared_ptr_eq<T>(a: &Shared<T>, b: &Shared<T>) -> bool {
    std::sync::Arc::ptr_eq(a, b)
}

#[cfg(not(feature = "native"))]
fn shared_ptr_eq<T>(a: &Shared<T>, b: &Shared<T>) -> bool {
    std::rc::Rc::ptr_eq(a, b)
}

/// `localStorage`/`sessionStorage` stand-in: nothing is ever stored
#[derive(Debug, Clone, Copy, Default)]
pub struct StorageMock;

/// Static `about:blank` location
pub fn location_record() -> Dynamic {
    let mut map = Map::new();
    for (key, value) in [
        ("href", "about:blank"),
        ("protocol", "about:"),
        ("host", ""),
        ("hostname", ""),
        ("port", ""),
        ("pathname", "blank"),
        ("search", ""),
        ("hash", ""),
        ("origin", "null"),
    ] {
        map.insert(key.into(), Dynamic::from(value));
    }
    Dynamic::from_map(map)
}

/// Static navigator with no identifying detail
pub fn navigator_record() -> Dynamic {
    let mut map = Map::new();
    map.insert("userAgent".into(), Dynamic::from("Sandbox/1.0"));
    map.insert("language".into(), Dynamic::from("en-US"));
    map.insert("languages".into(), Dynamic::from_array(vec![Dynamic::from("en-US")]));
    map.insert("platform".into(), Dynamic::from("Sandbox"));
    map.insert("vendor".into(), Dynamic::from(""));
    map.insert("cookieEnabled".into(), Dynamic::from(false));
    map.insert("onLine".into(), Dynamic::from(false));
    map.insert("hardwareConcurrency".into(), Dynamic::from(1 as INT));
    Dynamic::from_map(map)
}

fn keys_array(keys: Vec<String>) -> Array {
    keys.into_iter().map(Dynamic::from).collect()
}

pub(crate) fn register(engine: &mut Engine) {
    engine
        .register_type_with_name::<SafeWindow>("Window")
        .register_indexer_get(|w: &mut SafeWindow, name: &str| w.get(name))
        .register_indexer_set(|w: &mut SafeWindow, name: &str, value: Dynamic| {
            w.set(name, value);
        })
        .register_fn("contains", |w: &mut SafeWindow, name: &str| w.has(name))
        .register_fn("keys", |w: &mut SafeWindow| keys_array(w.own_keys()));

    engine
        .register_type_with_name::<StorageMock>("Storage")
        .register_fn("getItem", |_: &mut StorageMock, _key: &str| Dynamic::UNIT)
        .register_fn("setItem", |_: &mut StorageMock, _key: &str, _value: Dynamic| {})
        .register_fn("removeItem", |_: &mut StorageMock, _key: &str| {})
        .register_fn("clear", |_: &mut StorageMock| {})
        .register_fn("key", |_: &mut StorageMock, _index: INT| Dynamic::UNIT)
        .register_get("length", |_: &mut StorageMock| 0 as INT);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sensitive_reads_return_substitutes() {
        let window = SafeWindow::new();
        assert_eq!(window.get("cookie").into_string().unwrap(), "");
        assert!(window.get("localStorage").is::<StorageMock>());
        assert!(window.get("parent").is_unit());
        assert!(window.get("chrome").is_unit());

        let location = window.get("location").cast::<Map>();
        assert_eq!(
            location["href"].clone().into_string().unwrap(),
            "about:blank"
        );
    }

    #[test]
    fn test_writes_to_sensitive_and_read_only_names_do_not_stick() {
        let window = SafeWindow::new();
        assert!(!window.set("location", Dynamic::from("https://evil.example")));
        assert!(!window.set("innerWidth", Dynamic::from(1 as INT)));
        assert_eq!(window.get("innerWidth").as_int().unwrap(), 1024);

        assert!(window.set("answer", Dynamic::from(42 as INT)));
        assert_eq!(window.get("answer").as_int().unwrap(), 42);
    }

    #[test]
    fn test_has_and_keys_hide_sensitive_names() {
        let window = SafeWindow::new();
        assert!(!window.has("location"));
        assert!(!window.has("cookie"));
        assert!(window.has("innerWidth"));
        assert!(window.has("window"));

        let keys = window.own_keys();
        assert!(keys.contains(&"screen".to_string()));
        assert!(!keys.iter().any(|k| is_sensitive_property(k)));
    }

    #[test]
    fn test_self_reference_shares_state() {
        let window = SafeWindow::new();
        let inner = window.get("window").cast::<SafeWindow>();
        assert!(inner.is_same(&window));
        inner.set("x", Dynamic::from(1 as INT));
        assert_eq!(window.get("x").as_int().unwrap(), 1);
    }

    #[test]
    fn test_deep_copy_is_independent() {
        let window = SafeWindow::new();
        let copy = window.deep_copy();
        copy.set("scratch", Dynamic::from(true));
        assert!(window.get("scratch").is_unit());
        assert!(!copy.is_same(&window));
    }

    #[test]
    fn test_property_syntax_falls_back_to_indexer() {
        let mut engine = Engine::new();
        register(&mut engine);
        let mut scope = rhai::Scope::new();
        scope.push("window", SafeWindow::new());

        let width: INT = engine
            .eval_with_scope(&mut scope, "window.innerWidth")
            .unwrap();
        assert_eq!(width, 1024);

        let present: bool = engine
            .eval_with_scope(&mut scope, r#""location" in window"#)
            .unwrap();
        assert!(!present);

        let item: Dynamic = engine
            .eval_with_scope(
                &mut scope,
                r#"window.localStorage.setItem("k", "v"); window.localStorage.getItem("k")"#,
            )
            .unwrap();
        assert!(item.is_unit());
    }
}
