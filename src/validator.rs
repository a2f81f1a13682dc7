//! Pre-execution source validator
//!
//! Pattern checks over the raw source text, run before any execution strategy.
//! This complements the runtime capability table: variable lookups are screened by
//! the engine callbacks, while these checks reject constructs that never go through
//! a lookup at all. Matching is textual, so a forbidden name inside a string literal
//! or a comment is rejected too.

use std::sync::LazyLock;

use regex::Regex;

use crate::globals::CRITICAL_FORBIDDEN_NAMES;
use crate::sandbox::SandboxConfig;
use crate::types::SandboxError;

/// Ordered escape patterns: (description reported to the caller, regex).
const ESCAPE_PATTERNS: &[(&str, &str)] = &[
    ("eval(", r"\beval\s*\("),
    ("Fn(\"eval\")", r#"\bFn\s*\(\s*["']eval["']"#),
    ("new Function(", r"\bnew\s+Function\s*\("),
    ("Function(", r"\bFunction\s*\("),
    (".constructor", r"\.\s*constructor\b"),
    (".__proto__", r"\.\s*__proto__\b"),
    (".prototype.", r"\.\s*prototype\s*\."),
    ("global[.[]", r"\bglobal\s*[.\[]"),
    ("self[.[]", r"\bself\s*[.\[]"),
    ("process[.[]", r"\bprocess\s*[.\[]"),
    ("require(", r"\brequire\s*\("),
    ("import(", r"\bimport\s*\("),
    ("import \"...\"", r#"\bimport\s+["'`]"#),
    ("importScripts(", r"\bimportScripts\s*\("),
];

/// `globalThis` may be probed with `type_of(globalThis)`, but not used as a base,
/// assigned, or handed back to the host.
const GLOBAL_THIS_PATTERNS: &[(&str, &str)] = &[
    ("globalThis property access", r"\bglobalThis\s*[.\[]"),
    ("globalThis assignment", r"\bglobalThis\s*=([^=]|$)"),
    ("return globalThis", r"\breturn\s+globalThis\b"),
];

const INFINITE_LOOP_PATTERNS: &[&str] = &[
    r"\bwhile\s*\(?\s*(true|1|!\s*false)\s*\)?\s*\{",
    r"\bfor\s*\(\s*;\s*;\s*\)",
    r"\bloop\s*\{",
];

fn compile_table(table: &[(&'static str, &str)]) -> Vec<(&'static str, Regex)> {
    table
        .iter()
        .map(|(description, pattern)| {
            (*description, Regex::new(pattern).expect("static pattern compiles"))
        })
        .collect()
}

static ESCAPE_RE: LazyLock<Vec<(&'static str, Regex)>> =
    LazyLock::new(|| compile_table(ESCAPE_PATTERNS));

static GLOBAL_THIS_RE: LazyLock<Vec<(&'static str, Regex)>> =
    LazyLock::new(|| compile_table(GLOBAL_THIS_PATTERNS));

static INFINITE_LOOP_RE: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    INFINITE_LOOP_PATTERNS
        .iter()
        .map(|p| Regex::new(p).expect("static pattern compiles"))
        .collect()
});

/// One regex family per critical name: call, property/index base, direct return,
/// assignment source. A leading `.` or identifier character means the name is a
/// member or part of a longer identifier, which is not a match.
static CRITICAL_NAME_RE: LazyLock<Vec<(&'static str, Vec<Regex>)>> = LazyLock::new(|| {
    CRITICAL_FORBIDDEN_NAMES
        .iter()
        .map(|name| {
            let n = regex::escape(name);
            let family = [
                format!(r"(^|[^.\w$]){n}\s*\("),
                format!(r"(^|[^.\w$]){n}\s*[.\[]"),
                format!(r"\breturn\s+{n}\b"),
                format!(r"(^|[^=!<>])=\s*{n}\b"),
            ]
            .iter()
            .map(|p| Regex::new(p).expect("critical name pattern compiles"))
            .collect();
            (*name, family)
        })
        .collect()
});

/// Reject code containing known sandbox-escape syntax
pub fn validate_code(code: &str, config: &SandboxConfig) -> Result<(), SandboxError> {
    if code.len() > config.max_code_size {
        return Err(SandboxError::CodeTooLarge {
            max: config.max_code_size,
            actual: code.len(),
        });
    }

    if code.trim().is_empty() {
        return Err(SandboxError::EmptyCode);
    }

    for (description, re) in ESCAPE_RE.iter().chain(GLOBAL_THIS_RE.iter()) {
        if re.is_match(code) {
            return Err(SandboxError::ForbiddenPattern {
                pattern: (*description).to_string(),
            });
        }
    }

    for (name, family) in CRITICAL_NAME_RE.iter() {
        if family.iter().any(|re| re.is_match(code)) {
            return Err(SandboxError::ForbiddenIdentifier {
                name: (*name).to_string(),
            });
        }
    }

    Ok(())
}

/// Best-effort detection of loops with a constant-true condition
///
/// Only literal forms are recognised; a loop whose condition is computed
/// (`let x = true; while x {}`) is not.
pub fn looks_like_infinite_loop(code: &str) -> bool {
    INFINITE_LOOP_RE.iter().any(|re| re.is_match(code))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(code: &str) -> Result<(), SandboxError> {
        validate_code(code, &SandboxConfig::default())
    }

    #[test]
    fn accepts_plain_arithmetic() {
        assert!(check("let x = 1 + 2; x * 3").is_ok());
        assert!(check("return a + b").is_ok());
    }

    #[test]
    fn rejects_empty_code() {
        assert_eq!(check("   "), Err(SandboxError::EmptyCode));
    }

    #[test]
    fn rejects_oversized_code() {
        let config = SandboxConfig {
            max_code_size: 10,
            ..Default::default()
        };
        let err = validate_code("let value = 12345;", &config).unwrap_err();
        assert!(matches!(err, SandboxError::CodeTooLarge { max: 10, .. }));
    }

    #[test]
    fn rejects_eval_call() {
        let err = check(r#"eval("1")"#).unwrap_err();
        assert_eq!(
            err,
            SandboxError::ForbiddenPattern {
                pattern: "eval(".to_string()
            }
        );
    }

    #[test]
    fn rejects_function_pointer_to_eval() {
        assert!(check(r#"let f = Fn("eval"); f.call("1")"#).is_err());
    }

    #[test]
    fn rejects_new_function_with_its_own_name() {
        let err = check("new Function('return 1')()").unwrap_err();
        assert!(err.to_string().contains("new Function("));
    }

    #[test]
    fn rejects_constructor_and_proto_access() {
        assert!(check("#{}.constructor").is_err());
        assert!(check("Object.__proto__").is_err());
        assert!(check("Array.prototype.map").is_err());
    }

    #[test]
    fn rejects_require_and_imports() {
        assert!(check(r#"require("fs")"#).is_err());
        assert!(check(r#"import("fs")"#).is_err());
        assert!(check(r#"import "fs" as fs;"#).is_err());
        assert!(check(r#"importScripts("x.js")"#).is_err());
    }

    #[test]
    fn rejects_global_bases() {
        assert!(check("global.x").is_err());
        assert!(check("self[\"x\"]").is_err());
        assert!(check("process.env").is_err());
    }

    #[test]
    fn global_this_type_probe_is_allowed() {
        assert!(check("type_of(globalThis)").is_ok());
        assert!(check("if globalThis == () { 1 } else { 2 }").is_ok());
    }

    #[test]
    fn global_this_escape_paths_are_rejected() {
        assert!(check("globalThis.secret").is_err());
        assert!(check("globalThis[\"x\"]").is_err());
        assert!(check("globalThis = 1").is_err());
        assert!(check("return globalThis").is_err());
    }

    #[test]
    fn rejects_critical_names_in_each_position() {
        assert_eq!(
            check(r#"fetch("https://example.com")"#),
            Err(SandboxError::ForbiddenIdentifier {
                name: "fetch".to_string()
            })
        );
        assert!(check("let w = WebSocket;").is_err());
        assert!(check("return Buffer").is_err());
        assert!(check("Atomics[\"wait\"]").is_err());
    }

    #[test]
    fn critical_names_inside_longer_identifiers_are_allowed() {
        assert!(check("let prefetch = 1; prefetch").is_ok());
        assert!(check("let evaluation = 2; evaluation").is_ok());
        assert!(check("let my_module = 3; my_module").is_ok());
        assert!(check("data.fetch_count").is_ok());
    }

    #[test]
    fn detects_obvious_infinite_loops() {
        assert!(looks_like_infinite_loop("while true { }"));
        assert!(looks_like_infinite_loop("while(true){}"));
        assert!(looks_like_infinite_loop("while (1) { x += 1; }"));
        assert!(looks_like_infinite_loop("while !false { }"));
        assert!(looks_like_infinite_loop("for(;;){}"));
        assert!(looks_like_infinite_loop("loop { }"));
    }

    #[test]
    fn computed_conditions_are_not_detected() {
        assert!(!looks_like_infinite_loop("let x = true; while x { x = false; }"));
        assert!(!looks_like_infinite_loop("for i in 0..10 { }"));
    }
}
