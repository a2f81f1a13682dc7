//! Global environment for sandboxed code
//!
//! [`SandboxGlobalEnvironment`] is built once per sandbox from its config and
//! answers, for any identifier, whether sandboxed code may see it and what it
//! resolves to. Each execution takes a [`GlobalSnapshot`]: a deep copy of the
//! window and document plus the per-call console, so state written by one run
//! never leaks into the next.

pub mod builtins;
pub mod console;
pub mod document;
pub mod window;

use std::collections::{BTreeMap, BTreeSet};

use rhai::{Dynamic, Engine, FnPtr};

use crate::globals::{is_function_global, is_timer_function};
use crate::sandbox::SandboxConfig;
use crate::types::SandboxError;

pub use console::{ConsoleObject, ConsoleSink};
pub use document::{MockElement, SafeDocument};
pub use window::{SafeWindow, StorageMock};

/// Resolution of a global identifier
#[derive(Debug, Clone)]
pub enum Capability {
    /// Real value handed to the script
    Allowed(Dynamic),
    /// Sandboxed stand-in for a host object
    Shadowed(Dynamic),
    /// Known name the script may not touch
    Denied,
}

impl Capability {
    pub fn value(&self) -> Option<&Dynamic> {
        match self {
            Self::Allowed(v) | Self::Shadowed(v) => Some(v),
            Self::Denied => None,
        }
    }

    pub fn is_denied(&self) -> bool {
        matches!(self, Self::Denied)
    }
}

/// Placeholder resolved to the per-call console at snapshot time
const CONSOLE: &str = "console";

pub struct SandboxGlobalEnvironment {
    forbidden: BTreeSet<String>,
    entries: BTreeMap<String, Capability>,
    custom: BTreeMap<String, Dynamic>,
    window: SafeWindow,
    document: Option<SafeDocument>,
}

impl SandboxGlobalEnvironment {
    pub fn from_config(config: &SandboxConfig) -> Self {
        let window = SafeWindow::new();
        let document = config.allow_dom.then(SafeDocument::new);
        let mut entries = BTreeMap::new();

        for name in &config.allowed_globals {
            if config.is_forbidden(name) {
                continue;
            }
            let capability = match name.as_str() {
                "window" | "globalThis" => Capability::Shadowed(Dynamic::from(window.clone())),
                "document" => match &document {
                    Some(doc) => Capability::Shadowed(Dynamic::from(doc.clone())),
                    None => Capability::Denied,
                },
                CONSOLE if !config.allow_console => Capability::Denied,
                CONSOLE => Capability::Allowed(Dynamic::UNIT),
                n if is_timer_function(n) && !config.allow_timers => Capability::Denied,
                n if is_function_global(n) => match FnPtr::new(n) {
                    Ok(ptr) => Capability::Allowed(Dynamic::from(ptr)),
                    Err(_) => continue,
                },
                n => match builtins::namespace_value(n) {
                    Some(value) => Capability::Allowed(value),
                    None => continue,
                },
            };
            if let Some(value) = capability.value() {
                if !matches!(name.as_str(), "window" | "globalThis" | CONSOLE) {
                    window.define(name, value.clone());
                }
            }
            entries.insert(name.clone(), capability);
        }

        // Capability groups switched off by flags stay denied even when not listed.
        if !config.allow_console {
            entries.insert(CONSOLE.to_string(), Capability::Denied);
        }
        if !config.allow_dom {
            entries.insert("document".to_string(), Capability::Denied);
        }
        if !config.allow_timers {
            for name in crate::globals::TIMER_FUNCTIONS {
                entries.insert((*name).to_string(), Capability::Denied);
            }
        }

        let mut environment = Self {
            forbidden: config.forbidden_globals.clone(),
            entries,
            custom: BTreeMap::new(),
            window,
            document,
        };
        for (name, value) in &config.custom_globals {
            if environment.forbidden.contains(name) {
                tracing::warn!(name = %name, "ignoring forbidden custom global");
                continue;
            }
            match rhai::serde::to_dynamic(value) {
                Ok(value) => environment.custom.insert(name.clone(), value),
                Err(e) => {
                    tracing::warn!(name = %name, error = %e, "ignoring unconvertible custom global");
                    continue;
                }
            };
        }
        environment
    }

    pub fn is_forbidden(&self, name: &str) -> bool {
        self.forbidden.contains(name)
    }

    pub fn lookup(&self, name: &str) -> Option<Capability> {
        if self.is_forbidden(name) {
            return Some(Capability::Denied);
        }
        if let Some(value) = self.custom.get(name) {
            return Some(Capability::Allowed(value.clone()));
        }
        self.entries.get(name).cloned()
    }

    /// Whether `name` resolves to something visible
    pub fn has(&self, name: &str) -> bool {
        self.lookup(name).is_some_and(|c| !c.is_denied())
    }

    /// Visible global names, sorted
    pub fn own_keys(&self) -> Vec<String> {
        let mut keys: BTreeSet<String> = self
            .entries
            .iter()
            .filter(|(_, c)| !c.is_denied())
            .map(|(k, _)| k.clone())
            .collect();
        keys.extend(self.custom.keys().cloned());
        keys.retain(|k| !self.is_forbidden(k));
        keys.into_iter().collect()
    }

    pub fn add_custom(&mut self, name: &str, value: Dynamic) -> Result<(), SandboxError> {
        if self.is_forbidden(name) {
            return Err(SandboxError::AccessDenied {
                name: name.to_string(),
            });
        }
        self.custom.insert(name.to_string(), value);
        Ok(())
    }

    pub fn remove_custom(&mut self, name: &str) -> bool {
        self.custom.remove(name).is_some()
    }

    pub fn custom_globals(&self) -> &BTreeMap<String, Dynamic> {
        &self.custom
    }

    /// Fresh per-call view of every global
    pub fn snapshot(&self, console: Option<ConsoleObject>) -> GlobalSnapshot {
        let window = self.window.deep_copy();
        let document = self.document.as_ref().map(SafeDocument::deep_copy);
        if let Some(doc) = &document {
            window.define("document", Dynamic::from(doc.clone()));
        }

        let mut entries = BTreeMap::new();
        for (name, capability) in &self.entries {
            let resolved = match (name.as_str(), capability) {
                (_, Capability::Denied) => Capability::Denied,
                ("window" | "globalThis", _) => Capability::Shadowed(Dynamic::from(window.clone())),
                ("document", _) => match &document {
                    Some(doc) => Capability::Shadowed(Dynamic::from(doc.clone())),
                    None => Capability::Denied,
                },
                (CONSOLE, _) => match &console {
                    Some(console) => {
                        window.define(CONSOLE, Dynamic::from(console.clone()));
                        Capability::Allowed(Dynamic::from(console.clone()))
                    }
                    None => Capability::Denied,
                },
                (_, other) => other.clone(),
            };
            entries.insert(name.clone(), resolved);
        }
        for (name, value) in &self.custom {
            entries.insert(name.clone(), Capability::Allowed(value.clone()));
        }

        GlobalSnapshot {
            entries,
            forbidden: self.forbidden.clone(),
        }
    }

    /// Drop every global; the environment answers `None` for all names afterwards
    pub fn clear(&mut self) {
        self.entries.clear();
        self.custom.clear();
        self.window.clear();
        self.document = None;
    }
}

/// Immutable per-call resolution table
#[derive(Debug, Clone)]
pub struct GlobalSnapshot {
    entries: BTreeMap<String, Capability>,
    forbidden: BTreeSet<String>,
}

impl GlobalSnapshot {
    pub fn resolve(&self, name: &str) -> Option<Capability> {
        if self.is_forbidden(name) {
            return Some(Capability::Denied);
        }
        self.entries.get(name).cloned()
    }

    pub fn is_forbidden(&self, name: &str) -> bool {
        self.forbidden.contains(name)
    }

    /// Forbidden, or known but switched off
    pub fn is_blocked(&self, name: &str) -> bool {
        self.is_forbidden(name) || self.entries.get(name).is_some_and(Capability::is_denied)
    }

    /// Whether the global function `name` should be registered for real
    pub fn is_function_enabled(&self, name: &str) -> bool {
        is_function_global(name)
            && !self.is_blocked(name)
            && self.entries.get(name).is_some()
    }

    /// Names and values to bind in the script's top-level scope
    pub fn bindings(&self) -> impl Iterator<Item = (&str, &Dynamic)> {
        self.entries.iter().filter_map(|(name, capability)| {
            if self.is_forbidden(name) || is_function_global(name) {
                return None;
            }
            capability.value().map(|v| (name.as_str(), v))
        })
    }
}

/// Register the window, document, console and builtin types on an engine
pub(crate) fn register_types(engine: &mut Engine, snapshot: &GlobalSnapshot) {
    window::register(engine);
    document::register(engine);
    console::register(engine);
    builtins::register(engine, &|name| snapshot.is_function_enabled(name));
}

/// Display name for sandbox host objects, as they appear in results and logs
pub fn describe(value: &Dynamic) -> Option<String> {
    let name = if value.is::<SafeWindow>() {
        "[object Window]"
    } else if value.is::<SafeDocument>() {
        "[object HTMLDocument]"
    } else if let Some(element) = value.read_lock::<MockElement>() {
        return Some(format!("[object HTML{}Element]", title_case(element.tag_name())));
    } else if value.is::<ConsoleObject>() {
        "[object console]"
    } else if value.is::<StorageMock>() {
        "[object Storage]"
    } else if let Some(ptr) = value.read_lock::<FnPtr>() {
        return Some(format!("[function {}]", ptr.fn_name()));
    } else if let Some(label) = namespace_label(value) {
        return Some(format!("[object {label}]"));
    } else {
        return None;
    };
    Some(name.to_string())
}

fn title_case(tag: &str) -> String {
    let mut chars = tag.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

fn namespace_label(value: &Dynamic) -> Option<&'static str> {
    use builtins::*;
    let label = if value.is::<MathNamespace>() {
        "Math"
    } else if value.is::<JsonNamespace>() {
        "JSON"
    } else if value.is::<DateNamespace>() {
        "Date"
    } else if value.is::<NumberNamespace>() {
        "Number"
    } else if value.is::<ArrayNamespace>() {
        "Array"
    } else if value.is::<ObjectNamespace>() {
        "Object"
    } else {
        return None;
    };
    Some(label)
}
