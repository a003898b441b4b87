//! Global-object surface: console, numeric parsing, `Date`, `RegExp`,
//! `eval` and the top-level value bindings

use std::sync::Arc;

use crate::context::NativeCtx;
use crate::convert;
use crate::date::JsDate;
use crate::error::{VmError, VmResult};
use crate::format;
use crate::intrinsics::helpers::{arg, global, handler_property, install_ctor, method, native_ctor, native_fn};
use crate::object::{JsObject, ObjectKind};
use crate::property::{PropertyAttributes, PropertyDescriptor, PropertyKey, PropertyTable};
use crate::regexp::JsRegExp;
use crate::state::VmState;
use crate::value::Value;

pub(super) fn install(state: &Arc<VmState>) {
    install_values(state);
    install_console(state);
    install_parsing(state);
    install_date(state);
    install_regexp(state);
    install_eval(state);
}

fn install_values(state: &Arc<VmState>) {
    let frozen = |value: Value| PropertyDescriptor::data_with_attrs(
        value,
        PropertyAttributes::frozen(),
    );
    let _ = state
        .realm
        .global
        .define_own(PropertyKey::string("NaN"), frozen(Value::number(f64::NAN)));
    let _ = state.realm.global.define_own(
        PropertyKey::string("Infinity"),
        frozen(Value::number(f64::INFINITY)),
    );
    let _ = state
        .realm
        .global
        .define_own(PropertyKey::string("undefined"), frozen(Value::undefined()));
    let _ = state.realm.global.define_own(
        PropertyKey::string("globalThis"),
        PropertyDescriptor::builtin(Value::object(state.realm.global.clone())),
    );
}

fn install_console(state: &Arc<VmState>) {
    let console = JsObject::plain(Some(state.realm.object_proto.clone()));

    let render = |args: &[Value]| {
        args.iter()
            .map(format::describe)
            .collect::<Vec<_>>()
            .join(" ")
    };

    for (name, to_stderr) in [
        ("log", false),
        ("info", false),
        ("warn", true),
        ("error", true),
    ] {
        let _ = console.define_own(
            PropertyKey::string(name),
            PropertyDescriptor::builtin(native_fn(state, name, 0, move |_ncx, _this, args| {
                let line = render(args);
                if to_stderr {
                    eprintln!("{line}");
                } else {
                    println!("{line}");
                }
                Ok(Value::undefined())
            })),
        );
    }

    global(state, "console", Value::object(console));
}

fn install_parsing(state: &Arc<VmState>) {
    global(
        state,
        "parseInt",
        native_fn(state, "parseInt", 2, |ncx, _this, args| {
            let text = convert::to_string(ncx, &arg(args, 0))?;
            let radix = match arg(args, 1) {
                Value::Undefined => 0,
                other => convert::to_int32(convert::to_number(ncx, &other)?),
            };
            Ok(Value::number(parse_int(text.as_str(), radix)))
        }),
    );

    global(
        state,
        "parseFloat",
        native_fn(state, "parseFloat", 1, |ncx, _this, args| {
            let text = convert::to_string(ncx, &arg(args, 0))?;
            Ok(Value::number(parse_float_prefix(text.as_str())))
        }),
    );

    global(
        state,
        "isNaN",
        native_fn(state, "isNaN", 1, |ncx, _this, args| {
            let n = convert::to_number(ncx, &arg(args, 0))?;
            Ok(Value::boolean(n.is_nan()))
        }),
    );

    global(
        state,
        "isFinite",
        native_fn(state, "isFinite", 1, |ncx, _this, args| {
            let n = convert::to_number(ncx, &arg(args, 0))?;
            Ok(Value::boolean(n.is_finite()))
        }),
    );
}

/// parseInt: leading-prefix digits in the given radix. Oversized numeric
/// strings fall through to f64 with precision loss accepted.
fn parse_int(text: &str, radix: i32) -> f64 {
    let trimmed = text.trim_start();
    let (negative, rest) = match trimmed.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, trimmed.strip_prefix('+').unwrap_or(trimmed)),
    };

    let (radix, rest) = if (radix == 0 || radix == 16)
        && (rest.starts_with("0x") || rest.starts_with("0X"))
    {
        (16, &rest[2..])
    } else if radix == 0 {
        (10, rest)
    } else if (2..=36).contains(&radix) {
        (radix as u32 as i32, rest)
    } else {
        return f64::NAN;
    };

    let digits: String = rest
        .chars()
        .take_while(|c| c.is_digit(radix as u32))
        .collect();
    if digits.is_empty() {
        return f64::NAN;
    }

    let mut value = 0.0f64;
    for c in digits.chars() {
        value = value * radix as f64 + c.to_digit(radix as u32).expect("filtered digit") as f64;
    }
    if negative { -value } else { value }
}

/// parseFloat: longest numeric prefix
fn parse_float_prefix(text: &str) -> f64 {
    let trimmed = text.trim_start();
    if trimmed.starts_with("Infinity") || trimmed.starts_with("+Infinity") {
        return f64::INFINITY;
    }
    if trimmed.starts_with("-Infinity") {
        return f64::NEG_INFINITY;
    }
    let mut end = 0;
    let bytes = trimmed.as_bytes();
    let mut seen_dot = false;
    let mut seen_exp = false;
    while end < bytes.len() {
        let c = bytes[end] as char;
        let ok = c.is_ascii_digit()
            || (c == '-' || c == '+') && (end == 0 || matches!(bytes[end - 1], b'e' | b'E'))
            || (c == '.' && !seen_dot && !seen_exp)
            || ((c == 'e' || c == 'E') && !seen_exp && end > 0);
        if !ok {
            break;
        }
        seen_dot |= c == '.';
        seen_exp |= c == 'e' || c == 'E';
        end += 1;
    }
    trimmed[..end].parse().unwrap_or(f64::NAN)
}

fn receiver_date(this: &Value) -> VmResult<JsDate> {
    match this.as_object().map(|o| o.kind()) {
        Some(ObjectKind::Date(d)) => Ok(*d),
        _ => Err(VmError::type_error("receiver is not a Date")),
    }
}

fn install_date(state: &Arc<VmState>) {
    let mut table = PropertyTable::new();

    method(&mut table, state, "getTime", 0, |_ncx, this, _args| {
        Ok(Value::number(receiver_date(this)?.epoch_ms()))
    });
    method(&mut table, state, "valueOf", 0, |_ncx, this, _args| {
        Ok(Value::number(receiver_date(this)?.epoch_ms()))
    });
    method(&mut table, state, "toISOString", 0, |_ncx, this, _args| {
        match receiver_date(this)?.to_iso_string() {
            Some(text) => Ok(Value::string(text.as_str())),
            None => Err(VmError::range_error("invalid time value")),
        }
    });
    method(&mut table, state, "toString", 0, |_ncx, this, _args| {
        Ok(Value::string(receiver_date(this)?.to_display_string().as_str()))
    });

    state.realm.date_proto.attach_shared_table(Arc::new(table));

    let ctor = native_ctor(state, "Date", 1, |ncx, _this, args| {
        let date = match args {
            [] => JsDate::now(),
            [Value::String(s)] => JsDate::parse(s.as_str()),
            [value] => JsDate::new(convert::to_number(ncx, value)?),
            _ => JsDate::new(f64::NAN), // component constructor not supported
        };
        let obj = ncx.state().heap.alloc_object(
            ObjectKind::Date(date),
            Some(ncx.realm().date_proto.clone()),
        )?;
        Ok(Value::object(obj))
    });

    let ctor_obj = ctor.as_object().expect("constructor is an object").clone();
    let _ = ctor_obj.define_own(
        PropertyKey::string("now"),
        PropertyDescriptor::builtin(native_fn(state, "now", 0, |_ncx, _this, _args| {
            Ok(Value::number(JsDate::now().epoch_ms()))
        })),
    );
    let _ = ctor_obj.define_own(
        PropertyKey::string("parse"),
        PropertyDescriptor::builtin(native_fn(state, "parse", 1, |ncx, _this, args| {
            let text = convert::to_string(ncx, &arg(args, 0))?;
            Ok(Value::number(JsDate::parse(text.as_str()).epoch_ms()))
        })),
    );

    install_ctor(state, "Date", ctor, &state.realm.date_proto);
}

fn receiver_regexp(this: &Value) -> VmResult<&JsRegExp> {
    match this.as_object().map(|o| o.kind()) {
        Some(ObjectKind::Regexp(re)) => Ok(re),
        _ => Err(VmError::type_error("receiver is not a RegExp")),
    }
}

fn install_regexp(state: &Arc<VmState>) {
    let mut table = PropertyTable::new();

    handler_property(
        &mut table,
        "source",
        Some(Arc::new(|_ncx, base, _magic, _setval| {
            Ok(Value::string(receiver_regexp(base)?.source()))
        })),
        None,
        0,
    );
    handler_property(
        &mut table,
        "flags",
        Some(Arc::new(|_ncx, base, _magic, _setval| {
            Ok(Value::string(receiver_regexp(base)?.flags()))
        })),
        None,
        1,
    );
    handler_property(
        &mut table,
        "lastIndex",
        Some(Arc::new(|_ncx, base, _magic, _setval| {
            Ok(Value::number(receiver_regexp(base)?.last_index() as f64))
        })),
        Some(Arc::new(|ncx, base, _magic, setval| {
            let requested = setval.cloned().unwrap_or_default();
            let n = convert::to_number(ncx, &requested)?;
            receiver_regexp(base)?.set_last_index(convert::to_length(n));
            Ok(Value::undefined())
        })),
        2,
    );

    method(&mut table, state, "test", 1, |ncx, this, args| {
        let haystack = convert::to_string(ncx, &arg(args, 0))?;
        Ok(Value::boolean(receiver_regexp(this)?.test(haystack.as_str())))
    });

    method(&mut table, state, "exec", 1, |ncx, this, args| {
        let haystack = convert::to_string(ncx, &arg(args, 0))?;
        match receiver_regexp(this)?.exec(haystack.as_str()) {
            Some((byte_start, matched, groups)) => {
                let result = JsObject::array(0, Some(ncx.realm().array_proto.clone()));
                result.push_element(Value::string(matched.as_str()))?;
                for group in groups {
                    result.push_element(match group {
                        Some(text) => Value::string(text.as_str()),
                        None => Value::undefined(),
                    })?;
                }
                let char_index = haystack.as_str()[..byte_start].chars().count();
                result.define_own(
                    PropertyKey::string("index"),
                    PropertyDescriptor::data(Value::number(char_index as f64)),
                )?;
                result.define_own(
                    PropertyKey::string("input"),
                    PropertyDescriptor::data(Value::String(haystack)),
                )?;
                Ok(Value::object(result))
            }
            None => Ok(Value::null()),
        }
    });

    method(&mut table, state, "toString", 0, |_ncx, this, _args| {
        Ok(Value::string(receiver_regexp(this)?.to_string().as_str()))
    });

    state.realm.regexp_proto.attach_shared_table(Arc::new(table));

    let ctor = native_ctor(state, "RegExp", 2, |ncx, _this, args| {
        let source = arg(args, 0);
        let pattern = match &source {
            Value::Object(obj) => match obj.kind() {
                ObjectKind::Regexp(re) => re.source().to_string(),
                _ => convert::to_string(ncx, &source)?.as_str().to_string(),
            },
            Value::Undefined => String::new(),
            other => convert::to_string(ncx, other)?.as_str().to_string(),
        };
        let flags = match arg(args, 1) {
            Value::Undefined => String::new(),
            other => convert::to_string(ncx, &other)?.as_str().to_string(),
        };
        let regexp = JsRegExp::new(&pattern, &flags)?;
        let obj = ncx.state().heap.alloc_object(
            ObjectKind::Regexp(regexp),
            Some(ncx.realm().regexp_proto.clone()),
        )?;
        Ok(Value::object(obj))
    });
    install_ctor(state, "RegExp", ctor, &state.realm.regexp_proto);
}

fn install_eval(state: &Arc<VmState>) {
    global(
        state,
        "eval",
        native_fn(state, "eval", 1, |ncx: &mut NativeCtx<'_>, _this, args| {
            let source = match arg(args, 0) {
                Value::String(s) => s,
                other => return Ok(other), // eval of non-strings passes through
            };
            let Some(hook) = ncx.state().eval_hook() else {
                return Err(VmError::type_error(
                    "eval is not available (VM created without unsafe evaluation)",
                ));
            };
            let module = hook(source.as_str()).map_err(VmError::syntax_error)?;
            let interp = ncx.interp;
            match interp.execute_module(ncx.ctx, module)? {
                crate::async_context::RunOutcome::Complete(value) => Ok(value),
                crate::async_context::RunOutcome::Suspended(_) => {
                    Err(VmError::type_error("await is not permitted in eval"))
                }
            }
        }),
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_int() {
        assert_eq!(parse_int("42", 0), 42.0);
        assert_eq!(parse_int("  -17px", 0), -17.0);
        assert_eq!(parse_int("0xff", 0), 255.0);
        assert_eq!(parse_int("ff", 16), 255.0);
        assert_eq!(parse_int("101", 2), 5.0);
        assert!(parse_int("zzz", 0).is_nan());
        assert!(parse_int("10", 1).is_nan());
    }

    #[test]
    fn test_parse_int_precision_loss() {
        // Large literals flow through f64; exactness is not promised
        let n = parse_int("90071992547409931", 10);
        assert!((n - 9.007199254740993e16).abs() < 32.0);
    }

    #[test]
    fn test_parse_float_prefix() {
        assert_eq!(parse_float_prefix("3.5abc"), 3.5);
        assert_eq!(parse_float_prefix("  -2.5e2xyz"), -250.0);
        assert_eq!(parse_float_prefix("-Infinity"), f64::NEG_INFINITY);
        assert!(parse_float_prefix("abc").is_nan());
    }
}
