//! `String` intrinsics
//!
//! Methods accept both primitive strings and boxed string objects as the
//! receiver. `length` is a handler on the prototype pool, reading the
//! cached codepoint count of whichever string the access went through.

use std::sync::Arc;

use crate::context::NativeCtx;
use crate::convert;
use crate::error::{VmError, VmResult};
use crate::intrinsics::helpers::{arg, handler_property, install_ctor, method, native_ctor, native_fn};
use crate::intrinsics::object::box_primitive;
use crate::object::{JsObject, ObjectKind};
use crate::property::{PropertyDescriptor, PropertyKey, PropertyTable};
use crate::state::VmState;
use crate::string::JsString;
use crate::value::Value;

pub(super) fn install(state: &Arc<VmState>) {
    let mut table = PropertyTable::new();

    handler_property(
        &mut table,
        "length",
        Some(Arc::new(|_ncx, base, _magic, _setval| {
            Ok(Value::number(receiver_str(base)?.char_len() as f64))
        })),
        None,
        0,
    );

    method(&mut table, state, "toString", 0, |_ncx, this, _args| {
        Ok(Value::String(receiver_str(this)?))
    });
    method(&mut table, state, "valueOf", 0, |_ncx, this, _args| {
        Ok(Value::String(receiver_str(this)?))
    });

    method(&mut table, state, "charAt", 1, |ncx, this, args| {
        let s = receiver_str(this)?;
        let index = index_arg(ncx, args, 0)?;
        Ok(match index.and_then(|i| s.char_at(i)) {
            Some(c) => Value::string(c.to_string().as_str()),
            None => Value::string(""),
        })
    });

    method(&mut table, state, "charCodeAt", 1, |ncx, this, args| {
        let s = receiver_str(this)?;
        let index = index_arg(ncx, args, 0)?;
        Ok(match index.and_then(|i| s.char_at(i)) {
            Some(c) => Value::number(c as u32 as f64),
            None => Value::number(f64::NAN),
        })
    });

    method(&mut table, state, "indexOf", 1, |ncx, this, args| {
        let s = receiver_str(this)?;
        let needle = convert::to_string(ncx, &arg(args, 0))?;
        Ok(Value::number(match s.as_str().find(needle.as_str()) {
            Some(byte_pos) => s.as_str()[..byte_pos].chars().count() as f64,
            None => -1.0,
        }))
    });

    method(&mut table, state, "includes", 1, |ncx, this, args| {
        let s = receiver_str(this)?;
        let needle = convert::to_string(ncx, &arg(args, 0))?;
        Ok(Value::boolean(s.as_str().contains(needle.as_str())))
    });

    method(&mut table, state, "startsWith", 1, |ncx, this, args| {
        let s = receiver_str(this)?;
        let needle = convert::to_string(ncx, &arg(args, 0))?;
        Ok(Value::boolean(s.as_str().starts_with(needle.as_str())))
    });

    method(&mut table, state, "endsWith", 1, |ncx, this, args| {
        let s = receiver_str(this)?;
        let needle = convert::to_string(ncx, &arg(args, 0))?;
        Ok(Value::boolean(s.as_str().ends_with(needle.as_str())))
    });

    method(&mut table, state, "slice", 2, |ncx, this, args| {
        let s = receiver_str(this)?;
        let len = s.char_len() as i64;
        let start = relative(ncx, &arg(args, 0), 0, len)?;
        let end = relative(ncx, &arg(args, 1), len, len)?;
        Ok(Value::String(s.substring(start as usize, end as usize)))
    });

    method(&mut table, state, "substring", 2, |ncx, this, args| {
        let s = receiver_str(this)?;
        let len = s.char_len() as i64;
        let a = clamp(ncx, &arg(args, 0), 0, len)?;
        let b = clamp(ncx, &arg(args, 1), len, len)?;
        let (start, end) = if a <= b { (a, b) } else { (b, a) };
        Ok(Value::String(s.substring(start as usize, end as usize)))
    });

    method(&mut table, state, "toUpperCase", 0, |_ncx, this, _args| {
        Ok(Value::string(receiver_str(this)?.as_str().to_uppercase().as_str()))
    });

    method(&mut table, state, "toLowerCase", 0, |_ncx, this, _args| {
        Ok(Value::string(receiver_str(this)?.as_str().to_lowercase().as_str()))
    });

    method(&mut table, state, "trim", 0, |_ncx, this, _args| {
        Ok(Value::string(receiver_str(this)?.as_str().trim()))
    });

    method(&mut table, state, "repeat", 1, |ncx, this, args| {
        let s = receiver_str(this)?;
        let n = convert::to_number(ncx, &arg(args, 0))?;
        if n < 0.0 || n.is_infinite() {
            return Err(VmError::range_error("invalid repeat count"));
        }
        Ok(Value::string(s.as_str().repeat(n as usize).as_str()))
    });

    method(&mut table, state, "concat", 1, |ncx, this, args| {
        let mut out = receiver_str(this)?.as_str().to_string();
        for value in args {
            out.push_str(convert::to_string(ncx, value)?.as_str());
        }
        Ok(Value::string(out.as_str()))
    });

    method(&mut table, state, "split", 2, |ncx, this, args| {
        let s = receiver_str(this)?;
        let result = JsObject::array(0, Some(ncx.realm().array_proto.clone()));
        match arg(args, 0) {
            Value::Undefined => {
                result.push_element(Value::String(s))?;
            }
            separator => {
                let separator = convert::to_string(ncx, &separator)?;
                if separator.is_empty() {
                    for c in s.as_str().chars() {
                        result.push_element(Value::string(c.to_string().as_str()))?;
                    }
                } else {
                    for part in s.as_str().split(separator.as_str()) {
                        result.push_element(Value::string(part))?;
                    }
                }
            }
        }
        Ok(Value::object(result))
    });

    method(&mut table, state, "replace", 2, |ncx, this, args| {
        let s = receiver_str(this)?;
        let replacement = convert::to_string(ncx, &arg(args, 1))?;
        match arg(args, 0) {
            Value::Object(obj) => {
                if let ObjectKind::Regexp(re) = obj.kind() {
                    let out = match re.exec(s.as_str()) {
                        Some((start, matched, _groups)) => {
                            let mut out = String::new();
                            out.push_str(&s.as_str()[..start]);
                            out.push_str(replacement.as_str());
                            out.push_str(&s.as_str()[start + matched.len()..]);
                            out
                        }
                        None => s.as_str().to_string(),
                    };
                    Ok(Value::string(out.as_str()))
                } else {
                    Err(VmError::type_error("replace pattern is not a string or RegExp"))
                }
            }
            pattern => {
                let pattern = convert::to_string(ncx, &pattern)?;
                Ok(Value::string(
                    s.as_str()
                        .replacen(pattern.as_str(), replacement.as_str(), 1)
                        .as_str(),
                ))
            }
        }
    });

    state.realm.string_proto.attach_shared_table(Arc::new(table));

    // Constructor: String(sym) is the one permitted symbol-to-string path
    let ctor = native_ctor(state, "String", 1, |ncx, this, args| {
        let text = match arg(args, 0) {
            Value::Undefined if args.is_empty() => JsString::empty(),
            Value::Symbol(sym) => JsString::from_string(sym.to_string()),
            other => convert::to_string(ncx, &other)?,
        };
        // `new String(x)` boxes (construct calls carry a fresh `this`
        // object); a plain call returns the primitive
        if this.is_object() {
            return Ok(box_primitive(ncx, Value::String(text)));
        }
        Ok(Value::String(text))
    });

    let ctor_obj = ctor.as_object().expect("constructor is an object").clone();
    let _ = ctor_obj.define_own(
        PropertyKey::string("fromCharCode"),
        PropertyDescriptor::builtin(native_fn(state, "fromCharCode", 1, |ncx, _this, args| {
            let mut out = String::new();
            for value in args {
                let code = convert::to_uint32(convert::to_number(ncx, value)?);
                if let Some(c) = char::from_u32(code) {
                    out.push(c);
                }
            }
            Ok(Value::string(out.as_str()))
        })),
    );

    install_ctor(state, "String", ctor, &state.realm.string_proto);
}

/// The receiver as a string: primitive or boxed
pub(super) fn receiver_str(this: &Value) -> VmResult<JsString> {
    match this {
        Value::String(s) => Ok(s.clone()),
        Value::Object(obj) => match obj.kind() {
            ObjectKind::Boxed(Value::String(s)) => Ok(s.clone()),
            _ => Err(VmError::type_error("receiver is not a string")),
        },
        _ => Err(VmError::type_error("receiver is not a string")),
    }
}

fn index_arg(ncx: &mut NativeCtx<'_>, args: &[Value], at: usize) -> VmResult<Option<usize>> {
    let n = convert::to_integer(convert::to_number(ncx, &arg(args, at))?);
    if n < 0.0 { Ok(None) } else { Ok(Some(n as usize)) }
}

fn relative(ncx: &mut NativeCtx<'_>, value: &Value, default: i64, len: i64) -> VmResult<i64> {
    if value.is_undefined() {
        return Ok(default);
    }
    let n = convert::to_integer(convert::to_number(ncx, value)?) as i64;
    Ok(if n < 0 { (len + n).max(0) } else { n.min(len) })
}

fn clamp(ncx: &mut NativeCtx<'_>, value: &Value, default: i64, len: i64) -> VmResult<i64> {
    if value.is_undefined() {
        return Ok(default);
    }
    let n = convert::to_integer(convert::to_number(ncx, value)?) as i64;
    Ok(n.clamp(0, len))
}
