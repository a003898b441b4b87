//! Primitive conversions
//!
//! The pure layer (numbers, strings, ToInt32/ToUint32) has no VM access.
//! The protocol layer (`to_primitive`, `to_number`, `to_string`,
//! `loose_equals`) may call user-visible methods and therefore takes a
//! [`NativeCtx`].

use std::sync::Arc;

use crate::context::NativeCtx;
use crate::error::{VmError, VmResult};
use crate::object::ObjectKind;
use crate::property::PropertyKey;
use crate::string::JsString;
use crate::value::Value;

/// Hint for [`to_primitive`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hint {
    /// No preference (`+`, `==`)
    Default,
    /// Prefer numbers (arithmetic, relational)
    Number,
    /// Prefer strings (template literals, property keys)
    String,
}

/// Maximum recursion for loose equality through `to_primitive` retries
const MAX_LOOSE_EQUAL_DEPTH: usize = 128;

// ---------------------------------------------------------------------------
// Pure numeric conversions
// ---------------------------------------------------------------------------

/// ToInt32: modular truncation with NaN → 0 and ±∞ → 0
pub fn to_int32(n: f64) -> i32 {
    if n.is_nan() || n.is_infinite() || n == 0.0 {
        return 0;
    }
    let m = n.trunc() as i64;
    (m % (1_i64 << 32)) as i32
}

/// ToUint32: modular truncation with NaN → 0 and ±∞ → 0
pub fn to_uint32(n: f64) -> u32 {
    if n.is_nan() || n.is_infinite() || n == 0.0 {
        return 0;
    }
    let m = n.trunc() as i64;
    (m % (1_i64 << 32)) as u32
}

/// ToIntegerOrInfinity: truncate toward zero, NaN → 0
pub fn to_integer(n: f64) -> f64 {
    if n.is_nan() {
        return 0.0;
    }
    n.trunc()
}

/// ToLength: clamp to `[0, 2^53 - 1]`
pub fn to_length(n: f64) -> u64 {
    let n = to_integer(n);
    if n <= 0.0 {
        return 0;
    }
    n.min(9_007_199_254_740_991.0) as u64
}

/// ToIndex: non-negative integer or `RangeError`
pub fn to_index(n: f64) -> VmResult<usize> {
    let i = to_integer(n);
    if i < 0.0 || i > 9_007_199_254_740_991.0 {
        return Err(VmError::range_error(format!("invalid index {n}")));
    }
    Ok(i as usize)
}

/// ToNumber over a string: trimmed, radix-prefixed, `Infinity`-aware.
/// Oversized literals fall through to f64 with precision loss accepted.
pub fn parse_number(s: &str) -> f64 {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return 0.0;
    }
    if let Some(hex) = trimmed.strip_prefix("0x").or_else(|| trimmed.strip_prefix("0X")) {
        return match u64::from_str_radix(hex, 16) {
            Ok(n) => n as f64,
            Err(_) => f64::NAN,
        };
    }
    if let Some(oct) = trimmed.strip_prefix("0o").or_else(|| trimmed.strip_prefix("0O")) {
        return match u64::from_str_radix(oct, 8) {
            Ok(n) => n as f64,
            Err(_) => f64::NAN,
        };
    }
    if let Some(bin) = trimmed.strip_prefix("0b").or_else(|| trimmed.strip_prefix("0B")) {
        return match u64::from_str_radix(bin, 2) {
            Ok(n) => n as f64,
            Err(_) => f64::NAN,
        };
    }
    match trimmed {
        "Infinity" | "+Infinity" => return f64::INFINITY,
        "-Infinity" => return f64::NEG_INFINITY,
        _ => {}
    }
    // Rust accepts forms JS rejects ("inf", "nan"); gate them out
    if trimmed.contains(['i', 'n', 'N']) && !trimmed.contains('e') && !trimmed.contains('E') {
        return f64::NAN;
    }
    trimmed.parse::<f64>().unwrap_or(f64::NAN)
}

/// Canonical JS number rendering: `(-0).toString() == "0"`, decimal
/// notation inside `[1e-6, 1e21)`, exponential outside.
pub fn number_to_string(n: f64) -> String {
    if n.is_nan() {
        return "NaN".to_string();
    }
    if n == 0.0 {
        return "0".to_string();
    }
    if n.is_infinite() {
        return if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
    }

    let abs = n.abs();
    if abs >= 1e21 || abs < 1e-6 {
        // Exponential form with the JS sign convention (e+21, e-7)
        let formatted = format!("{n:e}");
        return match formatted.split_once('e') {
            Some((mantissa, exp)) if !exp.starts_with('-') => format!("{mantissa}e+{exp}"),
            _ => formatted,
        };
    }

    if n.fract() == 0.0 {
        return format!("{}", n as i128);
    }

    // Shortest-roundtrip decimal; ryu may pick scientific notation near the
    // range edges, where plain formatting is the JS spelling
    let mut buf = ryu::Buffer::new();
    let shortest = buf.format(n);
    if shortest.contains('e') || shortest.contains('E') {
        format!("{n}")
    } else {
        shortest.to_string()
    }
}

/// ToNumber over primitives only; `None` when the value is object-kinded
pub fn to_number_primitive(value: &Value) -> Option<VmResult<f64>> {
    match value {
        Value::Undefined => Some(Ok(f64::NAN)),
        Value::Null => Some(Ok(0.0)),
        Value::Boolean(b) => Some(Ok(if *b { 1.0 } else { 0.0 })),
        Value::Number(n) => Some(Ok(*n)),
        Value::String(s) => Some(Ok(parse_number(s.as_str()))),
        Value::Symbol(_) => Some(Err(VmError::type_error(
            "Cannot convert a Symbol value to a number",
        ))),
        Value::Object(_) => None,
        Value::Hole | Value::Uninitialized => Some(Ok(f64::NAN)),
    }
}

/// ToString over primitives only; `None` when the value is object-kinded
pub fn to_string_primitive(value: &Value) -> Option<VmResult<JsString>> {
    match value {
        Value::Undefined => Some(Ok(JsString::new("undefined"))),
        Value::Null => Some(Ok(JsString::new("null"))),
        Value::Boolean(b) => Some(Ok(JsString::new(if *b { "true" } else { "false" }))),
        Value::Number(n) => Some(Ok(JsString::from_string(number_to_string(*n)))),
        Value::String(s) => Some(Ok(s.clone())),
        Value::Symbol(_) => Some(Err(VmError::type_error(
            "Cannot convert a Symbol value to a string",
        ))),
        Value::Object(_) => None,
        Value::Hole | Value::Uninitialized => Some(Ok(JsString::new("undefined"))),
    }
}

/// Strict equality (`===`)
pub fn strict_equals(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
        (Value::Boolean(x), Value::Boolean(y)) => x == y,
        // IEEE comparison: NaN ≠ NaN, +0 == -0
        (Value::Number(x), Value::Number(y)) => x == y,
        // Length gate then bytes
        (Value::String(x), Value::String(y)) => x == y,
        (Value::Symbol(x), Value::Symbol(y)) => x.id == y.id,
        (Value::Object(x), Value::Object(y)) => Arc::ptr_eq(x, y),
        _ => false,
    }
}

// ---------------------------------------------------------------------------
// Protocol conversions (may call user-visible methods)
// ---------------------------------------------------------------------------

/// ToPrimitive: dispatches `[Symbol.toPrimitive]`, then `valueOf` /
/// `toString` in hint order. `TypeError` when no method yields a primitive.
pub fn to_primitive(ncx: &mut NativeCtx<'_>, value: &Value, hint: Hint) -> VmResult<Value> {
    let Some(obj) = value.as_object() else {
        return Ok(value.clone());
    };

    // Dates prefer string conversion under the default hint
    let hint = if hint == Hint::Default && matches!(obj.kind(), ObjectKind::Date(_)) {
        Hint::String
    } else {
        hint
    };

    let exotic_key = PropertyKey::Symbol(ncx.well_known().to_primitive.clone());
    let exotic = ncx.get_property(value, &exotic_key)?;
    if exotic.is_function() {
        let hint_name = match hint {
            Hint::Default => "default",
            Hint::Number => "number",
            Hint::String => "string",
        };
        let result = ncx.call_function(&exotic, value, &[Value::string(hint_name)])?;
        if result.is_primitive() {
            return Ok(result);
        }
        return Err(VmError::type_error(
            "Cannot convert object to primitive value",
        ));
    }

    let order: [&str; 2] = match hint {
        Hint::String => ["toString", "valueOf"],
        Hint::Default | Hint::Number => ["valueOf", "toString"],
    };
    for name in order {
        let method = ncx.get_property(value, &PropertyKey::string(name))?;
        if method.is_function() {
            let result = ncx.call_function(&method, value, &[])?;
            if result.is_primitive() {
                return Ok(result);
            }
        }
    }

    Err(VmError::type_error(
        "Cannot convert object to primitive value",
    ))
}

/// ToNumber over any value
pub fn to_number(ncx: &mut NativeCtx<'_>, value: &Value) -> VmResult<f64> {
    if let Some(result) = to_number_primitive(value) {
        return result;
    }
    let prim = to_primitive(ncx, value, Hint::Number)?;
    to_number_primitive(&prim).expect("to_primitive returned a primitive")
}

/// ToString over any value
pub fn to_string(ncx: &mut NativeCtx<'_>, value: &Value) -> VmResult<JsString> {
    if let Some(result) = to_string_primitive(value) {
        return result;
    }
    let prim = to_primitive(ncx, value, Hint::String)?;
    to_string_primitive(&prim).expect("to_primitive returned a primitive")
}

/// ToPropertyKey over any value
pub fn to_property_key(ncx: &mut NativeCtx<'_>, value: &Value) -> VmResult<PropertyKey> {
    let prim = to_primitive(ncx, value, Hint::String)?;
    Ok(match prim {
        Value::Symbol(sym) => PropertyKey::Symbol(sym),
        Value::Number(n) => {
            if n.fract() == 0.0 && n >= 0.0 && n < u32::MAX as f64 {
                PropertyKey::Index(n as u32)
            } else {
                PropertyKey::string(&number_to_string(n))
            }
        }
        Value::String(s) => PropertyKey::string(s.as_str()),
        other => {
            let s = to_string_primitive(&other).expect("primitive")?;
            PropertyKey::string(s.as_str())
        }
    })
}

/// Loose equality (`==`)
pub fn loose_equals(ncx: &mut NativeCtx<'_>, a: &Value, b: &Value) -> VmResult<bool> {
    loose_equals_depth(ncx, a, b, 0)
}

fn loose_equals_depth(
    ncx: &mut NativeCtx<'_>,
    a: &Value,
    b: &Value,
    depth: usize,
) -> VmResult<bool> {
    if depth > MAX_LOOSE_EQUAL_DEPTH {
        return Err(VmError::range_error("loose equality recursion limit"));
    }

    match (a, b) {
        // Same tag: strict comparison
        (Value::Undefined, _)
        | (Value::Null, _)
        | (Value::Boolean(_), Value::Boolean(_))
        | (Value::Number(_), Value::Number(_))
        | (Value::String(_), Value::String(_))
        | (Value::Symbol(_), Value::Symbol(_))
        | (Value::Object(_), Value::Object(_))
            if std::mem::discriminant(a) == std::mem::discriminant(b) =>
        {
            Ok(strict_equals(a, b))
        }
        // null ↔ undefined
        (Value::Null, Value::Undefined) | (Value::Undefined, Value::Null) => Ok(true),
        // number ↔ string
        (Value::Number(n), Value::String(s)) | (Value::String(s), Value::Number(n)) => {
            Ok(*n == parse_number(s.as_str()))
        }
        // booleans coerce to numbers and retry
        (Value::Boolean(x), other) => {
            let n = Value::number(if *x { 1.0 } else { 0.0 });
            loose_equals_depth(ncx, &n, other, depth + 1)
        }
        (other, Value::Boolean(x)) => {
            let n = Value::number(if *x { 1.0 } else { 0.0 });
            loose_equals_depth(ncx, other, &n, depth + 1)
        }
        // object ↔ primitive: ToPrimitive(default), retried once per level
        (Value::Object(_), Value::Number(_) | Value::String(_) | Value::Symbol(_)) => {
            let prim = to_primitive(ncx, a, Hint::Default)?;
            loose_equals_depth(ncx, &prim, b, depth + 1)
        }
        (Value::Number(_) | Value::String(_) | Value::Symbol(_), Value::Object(_)) => {
            let prim = to_primitive(ncx, b, Hint::Default)?;
            loose_equals_depth(ncx, a, &prim, depth + 1)
        }
        _ => Ok(false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_int32() {
        assert_eq!(to_int32(f64::NAN), 0);
        assert_eq!(to_int32(f64::INFINITY), 0);
        assert_eq!(to_int32(f64::NEG_INFINITY), 0);
        assert_eq!(to_int32(3.9), 3);
        assert_eq!(to_int32(-3.9), -3);
        assert_eq!(to_int32(4294967296.0), 0);
        assert_eq!(to_int32(2147483648.0), -2147483648);
    }

    #[test]
    fn test_to_uint32() {
        assert_eq!(to_uint32(-1.0), 4294967295);
        assert_eq!(to_uint32(f64::NAN), 0);
    }

    #[test]
    fn test_to_length_clamps() {
        assert_eq!(to_length(-5.0), 0);
        assert_eq!(to_length(3.7), 3);
        assert_eq!(to_length(1e300), 9_007_199_254_740_991);
    }

    #[test]
    fn test_parse_number() {
        assert_eq!(parse_number("  42 "), 42.0);
        assert_eq!(parse_number(""), 0.0);
        assert_eq!(parse_number("0x10"), 16.0);
        assert_eq!(parse_number("0b101"), 5.0);
        assert_eq!(parse_number("Infinity"), f64::INFINITY);
        assert!(parse_number("12px").is_nan());
        assert!(parse_number("inf").is_nan());
    }

    #[test]
    fn test_parse_number_precision_falls_through() {
        // bigint-sized literals lose precision through f64, by design
        let n = parse_number("9007199254740993");
        assert_eq!(n, 9007199254740992.0);
    }

    #[test]
    fn test_number_to_string_canonical() {
        assert_eq!(number_to_string(0.0), "0");
        assert_eq!(number_to_string(-0.0), "0");
        assert_eq!(number_to_string(f64::NAN), "NaN");
        assert_eq!(number_to_string(f64::INFINITY), "Infinity");
        assert_eq!(number_to_string(42.0), "42");
        assert_eq!(number_to_string(-1.5), "-1.5");
        assert_eq!(number_to_string(0.1), "0.1");
    }

    #[test]
    fn test_number_to_string_exponent_thresholds() {
        assert_eq!(number_to_string(1e21), "1e+21");
        assert_eq!(number_to_string(1e20), "100000000000000000000");
        assert_eq!(number_to_string(1e-7), "1e-7");
        assert_eq!(number_to_string(1e-6), "0.000001");
    }

    #[test]
    fn test_strict_equals() {
        assert!(strict_equals(&Value::number(0.0), &Value::number(-0.0)));
        assert!(!strict_equals(
            &Value::number(f64::NAN),
            &Value::number(f64::NAN)
        ));
        assert!(strict_equals(&Value::string("ab"), &Value::string("ab")));
        assert!(!strict_equals(&Value::number(1.0), &Value::string("1")));
        assert!(strict_equals(&Value::null(), &Value::null()));
        assert!(!strict_equals(&Value::null(), &Value::undefined()));
    }

    #[test]
    fn test_canonical_string_roundtrip_law() {
        // to_string(to_number(s)) preserves s iff s is canonical
        for s in ["0", "42", "-1.5", "0.1", "1e+21", "NaN", "Infinity"] {
            assert_eq!(number_to_string(parse_number(s)), s);
        }
        // Non-canonical spellings normalize
        assert_eq!(number_to_string(parse_number("0x10")), "16");
        assert_eq!(number_to_string(parse_number(" 7 ")), "7");
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn int32_uint32_agree_mod_2_32(n in proptest::num::f64::NORMAL) {
                let signed = to_int32(n) as i64;
                let unsigned = to_uint32(n) as i64;
                prop_assert_eq!(signed.rem_euclid(1 << 32), unsigned);
            }

            #[test]
            fn number_string_roundtrip(n in proptest::num::f64::NORMAL) {
                let rendered = number_to_string(n);
                let reparsed = parse_number(&rendered);
                prop_assert_eq!(n, reparsed);
            }
        }
    }
}
