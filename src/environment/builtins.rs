//! `Math`, `JSON`, `Date`, `Number`, `Array` and `Object` namespaces plus
//! the global parsing helpers
//!
//! Rhai keeps integers and floats apart while the scripts this sandbox runs are
//! written against a single number type, so every numeric result goes through
//! [`number_value`]: integral results in the safe-integer range come back as
//! `INT`, everything else as `FLOAT`.

use rhai::{Array, Dynamic, Engine, EvalAltResult, Map, FLOAT, INT};

use super::document::SafeDocument;
use super::window::SafeWindow;
use crate::engine::{dynamic_to_json, register_denied_fn};
use crate::shared::epoch_millis;

/// 2^53 - 1
pub const MAX_SAFE_INTEGER: INT = 9_007_199_254_740_991;

#[derive(Debug, Clone, Copy)]
pub struct MathNamespace;
#[derive(Debug, Clone, Copy)]
pub struct JsonNamespace;
#[derive(Debug, Clone, Copy)]
pub struct DateNamespace;
#[derive(Debug, Clone, Copy)]
pub struct NumberNamespace;
#[derive(Debug, Clone, Copy)]
pub struct ArrayNamespace;
#[derive(Debug, Clone, Copy)]
pub struct ObjectNamespace;

/// Value bound to a namespace global, if `name` is one
pub fn namespace_value(name: &str) -> Option<Dynamic> {
    let value = match name {
        "Math" => Dynamic::from(MathNamespace),
        "JSON" => Dynamic::from(JsonNamespace),
        "Date" => Dynamic::from(DateNamespace),
        "Number" => Dynamic::from(NumberNamespace),
        "Array" => Dynamic::from(ArrayNamespace),
        "Object" => Dynamic::from(ObjectNamespace),
        _ => return None,
    };
    Some(value)
}

/// Numeric value of a script value, with loose coercion
pub fn to_number(value: &Dynamic) -> FLOAT {
    if let Ok(i) = value.as_int() {
        i as FLOAT
    } else if let Ok(f) = value.as_float() {
        f
    } else if let Ok(b) = value.as_bool() {
        if b { 1.0 } else { 0.0 }
    } else if value.is_string() {
        let text = value.clone().into_string().unwrap_or_default();
        let trimmed = text.trim();
        if trimmed.is_empty() {
            0.0
        } else {
            trimmed.parse().unwrap_or(FLOAT::NAN)
        }
    } else {
        FLOAT::NAN
    }
}

/// Integral results in the safe range become `INT`, the rest stay `FLOAT`
pub fn number_value(x: FLOAT) -> Dynamic {
    if x.is_finite() && x.fract() == 0.0 && x.abs() <= MAX_SAFE_INTEGER as FLOAT {
        Dynamic::from(x as INT)
    } else {
        Dynamic::from(x)
    }
}

fn is_numeric(value: &Dynamic) -> bool {
    value.is_int() || value.is_float()
}

fn js_round(x: FLOAT) -> FLOAT {
    (x + 0.5).floor()
}

/// `parseInt` semantics: optional sign, optional `0x` prefix, then the longest
/// run of digits valid in `radix`
pub fn parse_int(text: &str, radix: Option<u32>) -> FLOAT {
    let mut rest = text.trim_start();
    let mut sign = 1.0;
    if let Some(stripped) = rest.strip_prefix('-') {
        sign = -1.0;
        rest = stripped;
    } else if let Some(stripped) = rest.strip_prefix('+') {
        rest = stripped;
    }

    let mut radix = radix.unwrap_or(0);
    if radix != 0 && !(2..=36).contains(&radix) {
        return FLOAT::NAN;
    }
    if radix == 0 || radix == 16 {
        if let Some(hex) = rest.strip_prefix("0x").or_else(|| rest.strip_prefix("0X")) {
            rest = hex;
            radix = 16;
        }
    }
    if radix == 0 {
        radix = 10;
    }

    let mut value: FLOAT = 0.0;
    let mut seen = false;
    for c in rest.chars() {
        match c.to_digit(radix) {
            Some(d) => {
                value = value * radix as FLOAT + d as FLOAT;
                seen = true;
            }
            None => break,
        }
    }
    if seen { sign * value } else { FLOAT::NAN }
}

/// `parseFloat` semantics: the longest decimal-literal prefix
pub fn parse_float(text: &str) -> FLOAT {
    let trimmed = text.trim_start();
    let bytes = trimmed.as_bytes();
    let mut end = 0;

    if matches!(bytes.first(), Some(b'+' | b'-')) {
        end = 1;
    }
    if trimmed[end..].starts_with("Infinity") {
        return if trimmed.starts_with('-') {
            FLOAT::NEG_INFINITY
        } else {
            FLOAT::INFINITY
        };
    }

    let digits_from = |mut i: usize| {
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        i
    };

    let int_end = digits_from(end);
    let mut mantissa_end = int_end;
    if mantissa_end < bytes.len() && bytes[mantissa_end] == b'.' {
        mantissa_end = digits_from(mantissa_end + 1);
    }
    if mantissa_end == end || &trimmed[end..mantissa_end] == "." {
        return FLOAT::NAN;
    }

    end = mantissa_end;
    if end < bytes.len() && matches!(bytes[end], b'e' | b'E') {
        let mut exp = end + 1;
        if exp < bytes.len() && matches!(bytes[exp], b'+' | b'-') {
            exp += 1;
        }
        let exp_end = digits_from(exp);
        if exp_end > exp {
            end = exp_end;
        }
    }

    trimmed[..end].parse().unwrap_or(FLOAT::NAN)
}

fn object_keys(target: &Dynamic) -> Array {
    if let Some(map) = target.read_lock::<Map>() {
        map.keys().map(|k| Dynamic::from(k.to_string())).collect()
    } else if let Some(window) = target.read_lock::<SafeWindow>() {
        window.own_keys().into_iter().map(Dynamic::from).collect()
    } else if let Some(document) = target.read_lock::<SafeDocument>() {
        document.own_keys().into_iter().map(Dynamic::from).collect()
    } else if let Some(items) = target.read_lock::<Array>() {
        (0..items.len()).map(|i| Dynamic::from(i.to_string())).collect()
    } else {
        Array::new()
    }
}

fn object_values(target: &Dynamic) -> Array {
    if let Some(map) = target.read_lock::<Map>() {
        map.values().cloned().collect()
    } else if let Some(items) = target.read_lock::<Array>() {
        items.clone()
    } else {
        Array::new()
    }
}

fn json_parse(text: &str) -> Result<Dynamic, Box<EvalAltResult>> {
    let value: serde_json::Value = serde_json::from_str(text)
        .map_err(|e| format!("SyntaxError: JSON.parse: {e}"))?;
    rhai::serde::to_dynamic(&value)
}

fn register_namespaces(engine: &mut Engine) {
    use std::f64::consts;

    engine
        .register_type_with_name::<MathNamespace>("Math")
        .register_get("PI", |_: &mut MathNamespace| consts::PI as FLOAT)
        .register_get("E", |_: &mut MathNamespace| consts::E as FLOAT)
        .register_get("LN2", |_: &mut MathNamespace| consts::LN_2 as FLOAT)
        .register_get("LN10", |_: &mut MathNamespace| consts::LN_10 as FLOAT)
        .register_get("SQRT2", |_: &mut MathNamespace| consts::SQRT_2 as FLOAT);

    let unary: [(&str, fn(FLOAT) -> FLOAT); 13] = [
        ("abs", FLOAT::abs),
        ("floor", FLOAT::floor),
        ("ceil", FLOAT::ceil),
        ("round", js_round),
        ("trunc", FLOAT::trunc),
        ("sign", |x| if x == 0.0 || x.is_nan() { x } else { x.signum() }),
        ("sqrt", FLOAT::sqrt),
        ("cbrt", FLOAT::cbrt),
        ("exp", FLOAT::exp),
        ("log", FLOAT::ln),
        ("sin", FLOAT::sin),
        ("cos", FLOAT::cos),
        ("tan", FLOAT::tan),
    ];
    for (name, op) in unary {
        engine.register_fn(name, move |_: &mut MathNamespace, x: Dynamic| {
            number_value(op(to_number(&x)))
        });
    }
    engine.register_fn("pow", |_: &mut MathNamespace, base: Dynamic, exp: Dynamic| {
        number_value(to_number(&base).powf(to_number(&exp)))
    });

    let fold = |values: &[Dynamic], init: FLOAT, pick: fn(FLOAT, FLOAT) -> FLOAT| {
        let folded = values.iter().map(to_number).fold(init, |acc, x| {
            if acc.is_nan() || x.is_nan() { FLOAT::NAN } else { pick(acc, x) }
        });
        number_value(folded)
    };
    for (name, init, pick) in [
        ("min", FLOAT::INFINITY, FLOAT::min as fn(FLOAT, FLOAT) -> FLOAT),
        ("max", FLOAT::NEG_INFINITY, FLOAT::max as fn(FLOAT, FLOAT) -> FLOAT),
    ] {
        engine.register_fn(name, move |_: &mut MathNamespace| fold(&[], init, pick));
        engine.register_fn(name, move |_: &mut MathNamespace, a: Dynamic| {
            fold(&[a], init, pick)
        });
        engine.register_fn(name, move |_: &mut MathNamespace, a: Dynamic, b: Dynamic| {
            fold(&[a, b], init, pick)
        });
        engine.register_fn(
            name,
            move |_: &mut MathNamespace, a: Dynamic, b: Dynamic, c: Dynamic| {
                fold(&[a, b, c], init, pick)
            },
        );
    }

    engine
        .register_type_with_name::<JsonNamespace>("JSON")
        .register_fn("stringify", |_: &mut JsonNamespace, value: Dynamic| {
            dynamic_to_json(&value).to_string()
        })
        .register_fn("parse", |_: &mut JsonNamespace, text: &str| json_parse(text));

    engine
        .register_type_with_name::<DateNamespace>("Date")
        .register_fn("now", |_: &mut DateNamespace| epoch_millis() as INT);

    engine
        .register_type_with_name::<NumberNamespace>("Number")
        .register_get("MAX_SAFE_INTEGER", |_: &mut NumberNamespace| MAX_SAFE_INTEGER)
        .register_get("MIN_SAFE_INTEGER", |_: &mut NumberNamespace| -MAX_SAFE_INTEGER)
        .register_get("EPSILON", |_: &mut NumberNamespace| FLOAT::EPSILON)
        .register_fn("isInteger", |_: &mut NumberNamespace, v: Dynamic| {
            v.is_int() || v.as_float().is_ok_and(|f| f.is_finite() && f.fract() == 0.0)
        })
        .register_fn("isFinite", |_: &mut NumberNamespace, v: Dynamic| {
            is_numeric(&v) && to_number(&v).is_finite()
        })
        .register_fn("isNaN", |_: &mut NumberNamespace, v: Dynamic| {
            v.as_float().is_ok_and(FLOAT::is_nan)
        });

    engine
        .register_type_with_name::<ArrayNamespace>("Array")
        .register_fn("isArray", |_: &mut ArrayNamespace, v: Dynamic| v.is_array());

    engine
        .register_type_with_name::<ObjectNamespace>("Object")
        .register_fn("keys", |_: &mut ObjectNamespace, target: Dynamic| object_keys(&target))
        .register_fn("values", |_: &mut ObjectNamespace, target: Dynamic| {
            object_values(&target)
        })
        .register_fn("entries", |_: &mut ObjectNamespace, target: Dynamic| {
            let Some(map) = target.read_lock::<Map>() else {
                return Array::new();
            };
            map.iter()
                .map(|(k, v)| Dynamic::from_array(vec![Dynamic::from(k.to_string()), v.clone()]))
                .collect::<Array>()
        });
}

fn register_functions(engine: &mut Engine, enabled: &dyn Fn(&str) -> bool) {
    if enabled("parseInt") {
        engine.register_fn("parseInt", |v: Dynamic| {
            number_value(parse_int(&v.to_string(), None))
        });
        engine.register_fn("parseInt", |v: Dynamic, radix: INT| {
            let radix = u32::try_from(radix).ok().filter(|r| *r != 0);
            number_value(parse_int(&v.to_string(), radix))
        });
    } else {
        register_denied_fn(engine, "parseInt");
    }

    if enabled("parseFloat") {
        engine.register_fn("parseFloat", |v: Dynamic| {
            number_value(parse_float(&v.to_string()))
        });
    } else {
        register_denied_fn(engine, "parseFloat");
    }

    if enabled("isNaN") {
        engine.register_fn("isNaN", |v: Dynamic| to_number(&v).is_nan());
    } else {
        register_denied_fn(engine, "isNaN");
    }

    if enabled("isFinite") {
        engine.register_fn("isFinite", |v: Dynamic| to_number(&v).is_finite());
    } else {
        register_denied_fn(engine, "isFinite");
    }
}

/// Register namespace types, plus the global functions `enabled` lets through
pub(crate) fn register(engine: &mut Engine, enabled: &dyn Fn(&str) -> bool) {
    register_namespaces(engine);
    register_functions(engine, enabled);
}

#[cfg(test)]
mod tests {
    use super::*;
    use rhai::Scope;

    fn eval(script: &str) -> Dynamic {
        let mut engine = Engine::new();
        register(&mut engine, &|_| true);
        let mut scope = Scope::new();
        for name in ["Math", "JSON", "Date", "Number", "Array", "Object"] {
            scope.push_dynamic(name, namespace_value(name).unwrap());
        }
        engine.eval_with_scope(&mut scope, script).unwrap()
    }

    #[test]
    fn test_math_results_keep_integers() {
        assert_eq!(eval("Math.floor(3.7)").as_int().unwrap(), 3);
        assert_eq!(eval("Math.max(1, 5, 3)").as_int().unwrap(), 5);
        assert_eq!(eval("Math.pow(2, 10)").as_int().unwrap(), 1024);
        assert_eq!(eval("Math.round(-2.5)").as_int().unwrap(), -2);
        assert!((eval("Math.sqrt(2)").as_float().unwrap() - 1.414).abs() < 0.001);
    }

    #[test]
    fn test_math_max_without_arguments() {
        assert_eq!(eval("Math.max()").as_float().unwrap(), FLOAT::NEG_INFINITY);
    }

    #[test]
    fn test_json_round_trip_through_script() {
        let out = eval(r#"let v = JSON.parse("{\"a\": [1, 2]}"); JSON.stringify(v.a)"#);
        assert_eq!(out.into_string().unwrap(), "[1,2]");
    }

    #[test]
    fn test_number_and_array_predicates() {
        assert!(eval("Number.isInteger(4.0)").as_bool().unwrap());
        assert!(!eval("Number.isFinite(\"4\")").as_bool().unwrap());
        assert!(eval("Array.isArray([1])").as_bool().unwrap());
        assert_eq!(eval("Number.MAX_SAFE_INTEGER").as_int().unwrap(), MAX_SAFE_INTEGER);
    }

    #[test]
    fn test_object_keys_and_values() {
        let keys = eval("Object.keys(#{b: 1, a: 2})").into_array().unwrap();
        assert_eq!(keys.len(), 2);
        let values = eval("Object.values(#{a: 2})").into_array().unwrap();
        assert_eq!(values[0].as_int().unwrap(), 2);
    }

    #[test]
    fn test_date_now_is_epoch_millis() {
        assert!(eval("Date.now()").as_int().unwrap() > 1_577_836_800_000);
    }

    #[test]
    fn test_parse_int() {
        assert_eq!(parse_int("42px", None), 42.0);
        assert_eq!(parse_int("  -17", None), -17.0);
        assert_eq!(parse_int("0x1F", None), 31.0);
        assert_eq!(parse_int("ff", Some(16)), 255.0);
        assert_eq!(parse_int("101", Some(2)), 5.0);
        assert!(parse_int("abc", None).is_nan());
        assert!(parse_int("1", Some(40)).is_nan());
    }

    #[test]
    fn test_parse_float() {
        assert_eq!(parse_float("3.14abc"), 3.14);
        assert_eq!(parse_float(".5"), 0.5);
        assert_eq!(parse_float("1e3"), 1000.0);
        assert_eq!(parse_float("2e"), 2.0);
        assert_eq!(parse_float("-Infinity"), FLOAT::NEG_INFINITY);
        assert!(parse_float("x1").is_nan());
        assert!(parse_float(".").is_nan());
    }

    #[test]
    fn test_global_functions_from_script() {
        assert_eq!(eval(r#"parseInt("12.9")"#).as_int().unwrap(), 12);
        assert_eq!(eval(r#"parseInt("z", 36)"#).as_int().unwrap(), 35);
        assert!(eval(r#"isNaN("hello")"#).as_bool().unwrap());
        assert!(eval("isFinite(10)").as_bool().unwrap());
        assert_eq!(eval(r#"parseFloat("2.5")"#).as_float().unwrap(), 2.5);
    }
}
