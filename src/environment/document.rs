//! Inert `document` substitute
//!
//! Queries find nothing, created elements never attach, and cookie writes are
//! dropped. Scripts written against a browser DOM keep running without touching
//! anything outside the sandbox.

use std::collections::BTreeMap;

use rhai::{Array, Dynamic, Engine, Map};

use crate::globals::is_sensitive_property;
use crate::shared::{new_shared, with_shared, Shared};

const READ_ONLY: &[&str] = &["readyState", "URL", "body", "head", "documentElement", "cookie"];

struct DocumentState {
    title: String,
    props: BTreeMap<String, Dynamic>,
}

/// The `document` object seen by sandboxed code
#[derive(Clone)]
pub struct SafeDocument {
    state: Shared<DocumentState>,
}

impl Default for SafeDocument {
    fn default() -> Self {
        Self::new()
    }
}

impl SafeDocument {
    pub fn new() -> Self {
        Self {
            state: new_shared(DocumentState {
                title: "Sandbox".to_string(),
                props: BTreeMap::new(),
            }),
        }
    }

    pub fn get(&self, name: &str) -> Dynamic {
        match name {
            "title" => with_shared(&self.state, |state| Dynamic::from(state.title.clone())),
            "readyState" => Dynamic::from("complete"),
            "URL" => Dynamic::from("about:blank"),
            "cookie" => Dynamic::from(""),
            "body" => Dynamic::from(MockElement::new("body")),
            "head" => Dynamic::from(MockElement::new("head")),
            "documentElement" => Dynamic::from(MockElement::new("html")),
            n if is_sensitive_property(n) => Dynamic::UNIT,
            _ => with_shared(&self.state, |state| {
                state.props.get(name).cloned().unwrap_or(Dynamic::UNIT)
            }),
        }
    }

    /// Returns whether the write was kept
    pub fn set(&self, name: &str, value: Dynamic) -> bool {
        if READ_ONLY.contains(&name) || is_sensitive_property(name) {
            return false;
        }
        with_shared(&self.state, |state| {
            if name == "title" {
                state.title = if value.is_string() {
                    value.into_string().unwrap_or_default()
                } else {
                    value.to_string()
                };
            } else {
                state.props.insert(name.to_string(), value);
            }
        });
        true
    }

    /// `"x" in document`; sensitive names read as absent
    pub fn has(&self, name: &str) -> bool {
        if is_sensitive_property(name) {
            return false;
        }
        name == "title"
            || READ_ONLY.contains(&name)
            || with_shared(&self.state, |state| state.props.contains_key(name))
    }

    pub fn own_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = READ_ONLY.iter().map(|k| k.to_string()).collect();
        keys.push("title".to_string());
        with_shared(&self.state, |state| keys.extend(state.props.keys().cloned()));
        keys.retain(|k| !is_sensitive_property(k));
        keys.sort();
        keys
    }

    pub fn deep_copy(&self) -> Self {
        let (title, props) =
            with_shared(&self.state, |state| (state.title.clone(), state.props.clone()));
        Self {
            state: new_shared(DocumentState { title, props }),
        }
    }
}

/// Detached element returned by `createElement` and friends
///
/// Every mutation is accepted and forgotten.
#[derive(Debug, Clone)]
pub struct MockElement {
    tag_name: String,
}

impl MockElement {
    pub fn new(tag: &str) -> Self {
        Self {
            tag_name: tag.to_uppercase(),
        }
    }

    fn text_node() -> Self {
        Self {
            tag_name: "#text".to_string(),
        }
    }

    pub fn tag_name(&self) -> &str {
        &self.tag_name
    }

    fn get(&self, name: &str) -> Dynamic {
        match name {
            "tagName" | "nodeName" => Dynamic::from(self.tag_name.clone()),
            "children" | "childNodes" | "classList" => Dynamic::from_array(Array::new()),
            "style" | "dataset" => Dynamic::from_map(Map::new()),
            "textContent" | "innerHTML" | "innerText" | "outerHTML" | "id" | "className"
            | "value" => Dynamic::from(""),
            _ => Dynamic::UNIT,
        }
    }
}

pub(crate) fn register(engine: &mut Engine) {
    engine
        .register_type_with_name::<SafeDocument>("Document")
        .register_indexer_get(|d: &mut SafeDocument, name: &str| d.get(name))
        .register_indexer_set(|d: &mut SafeDocument, name: &str, value: Dynamic| {
            d.set(name, value);
        })
        .register_fn("contains", |d: &mut SafeDocument, name: &str| d.has(name))
        .register_fn("keys", |d: &mut SafeDocument| {
            d.own_keys().into_iter().map(Dynamic::from).collect::<Array>()
        })
        .register_fn("getElementById", |_: &mut SafeDocument, _id: &str| Dynamic::UNIT)
        .register_fn("querySelector", |_: &mut SafeDocument, _selector: &str| Dynamic::UNIT)
        .register_fn("querySelectorAll", |_: &mut SafeDocument, _selector: &str| Array::new())
        .register_fn("getElementsByTagName", |_: &mut SafeDocument, _tag: &str| Array::new())
        .register_fn("getElementsByClassName", |_: &mut SafeDocument, _class: &str| {
            Array::new()
        })
        .register_fn("getElementsByName", |_: &mut SafeDocument, _name: &str| Array::new())
        .register_fn("createElement", |_: &mut SafeDocument, tag: &str| MockElement::new(tag))
        .register_fn("createTextNode", |_: &mut SafeDocument, _text: &str| {
            MockElement::text_node()
        })
        .register_fn(
            "addEventListener",
            |_: &mut SafeDocument, _event: &str, _handler: Dynamic| {},
        )
        .register_fn(
            "removeEventListener",
            |_: &mut SafeDocument, _event: &str, _handler: Dynamic| {},
        );

    engine
        .register_type_with_name::<MockElement>("Element")
        .register_indexer_get(|e: &mut MockElement, name: &str| e.get(name))
        .register_indexer_set(|_: &mut MockElement, _name: &str, _value: Dynamic| {})
        .register_fn("contains", |e: &mut MockElement, name: &str| !e.get(name).is_unit())
        .register_fn("setAttribute", |_: &mut MockElement, _name: &str, _value: Dynamic| {})
        .register_fn("getAttribute", |_: &mut MockElement, _name: &str| Dynamic::UNIT)
        .register_fn("removeAttribute", |_: &mut MockElement, _name: &str| {})
        .register_fn("hasAttribute", |_: &mut MockElement, _name: &str| false)
        .register_fn("appendChild", |_: &mut MockElement, child: Dynamic| child)
        .register_fn("removeChild", |_: &mut MockElement, child: Dynamic| child)
        .register_fn(
            "addEventListener",
            |_: &mut MockElement, _event: &str, _handler: Dynamic| {},
        )
        .register_fn(
            "removeEventListener",
            |_: &mut MockElement, _event: &str, _handler: Dynamic| {},
        );
}

#[cfg(test)]
mod tests {
    use super::*;
    use rhai::Scope;

    fn engine_with_document() -> (Engine, Scope<'static>) {
        let mut engine = Engine::new();
        register(&mut engine);
        let mut scope = Scope::new();
        scope.push("document", SafeDocument::new());
        (engine, scope)
    }

    #[test]
    fn test_sensitive_names_are_hidden() {
        let document = SafeDocument::new();
        assert!(!document.has("cookie"));
        assert!(document.has("readyState"));
        assert!(!document.own_keys().iter().any(|k| is_sensitive_property(k)));
        assert_eq!(document.get("cookie").into_string().unwrap(), "");

        let (engine, mut scope) = engine_with_document();
        let hidden: bool = engine
            .eval_with_scope(&mut scope, r#""cookie" in document"#)
            .unwrap();
        assert!(!hidden);
    }

    #[test]
    fn test_document_defaults() {
        let document = SafeDocument::new();
        assert_eq!(document.get("title").into_string().unwrap(), "Sandbox");
        assert_eq!(document.get("readyState").into_string().unwrap(), "complete");
        assert_eq!(document.get("URL").into_string().unwrap(), "about:blank");
    }

    #[test]
    fn test_cookie_write_is_dropped() {
        let document = SafeDocument::new();
        assert!(!document.set("cookie", Dynamic::from("session=abc")));
        assert_eq!(document.get("cookie").into_string().unwrap(), "");
    }

    #[test]
    fn test_title_is_writable() {
        let (engine, mut scope) = engine_with_document();
        let title: String = engine
            .eval_with_scope(&mut scope, r#"document.title = "Report"; document.title"#)
            .unwrap();
        assert_eq!(title, "Report");
    }

    #[test]
    fn test_queries_find_nothing() {
        let (engine, mut scope) = engine_with_document();
        let found: Dynamic = engine
            .eval_with_scope(&mut scope, r#"document.getElementById("app")"#)
            .unwrap();
        assert!(found.is_unit());

        let all: Array = engine
            .eval_with_scope(&mut scope, r#"document.querySelectorAll("div")"#)
            .unwrap();
        assert!(all.is_empty());
    }

    #[test]
    fn test_created_elements_are_inert() {
        let (engine, mut scope) = engine_with_document();
        let script = r#"
            let el = document.createElement("div");
            el.setAttribute("id", "x");
            el.textContent = "hello";
            document.body.appendChild(el);
            [el.tagName, el.textContent, el.getAttribute("id")]
        "#;
        let out: Array = engine.eval_with_scope(&mut scope, script).unwrap();
        assert_eq!(out[0].clone().into_string().unwrap(), "DIV");
        assert_eq!(out[1].clone().into_string().unwrap(), "");
        assert!(out[2].is_unit());
    }

    #[test]
    fn test_deep_copy_isolates_title() {
        let document = SafeDocument::new();
        let copy = document.deep_copy();
        copy.set("title", Dynamic::from("changed"));
        assert_eq!(document.get("title").into_string().unwrap(), "Sandbox");
    }
}
