//! `Number`, `Boolean` and `Symbol` intrinsics

use std::sync::Arc;

use crate::convert;
use crate::error::{VmError, VmResult};
use crate::intrinsics::helpers::{arg, install_ctor, method, native_ctor, native_fn};
use crate::intrinsics::object::box_primitive;
use crate::object::ObjectKind;
use crate::property::{PropertyDescriptor, PropertyKey, PropertyTable};
use crate::state::VmState;
use crate::value::Value;

pub(super) fn install(state: &Arc<VmState>) {
    install_number(state);
    install_boolean(state);
    install_symbol(state);
}

fn receiver_number(this: &Value) -> VmResult<f64> {
    match this {
        Value::Number(n) => Ok(*n),
        Value::Object(obj) => match obj.kind() {
            ObjectKind::Boxed(Value::Number(n)) => Ok(*n),
            _ => Err(VmError::type_error("receiver is not a number")),
        },
        _ => Err(VmError::type_error("receiver is not a number")),
    }
}

fn install_number(state: &Arc<VmState>) {
    let mut table = PropertyTable::new();

    method(&mut table, state, "toString", 1, |ncx, this, args| {
        let n = receiver_number(this)?;
        match arg(args, 0) {
            Value::Undefined => Ok(Value::string(convert::number_to_string(n).as_str())),
            radix => {
                let radix = convert::to_number(ncx, &radix)? as u32;
                if !(2..=36).contains(&radix) {
                    return Err(VmError::range_error("toString() radix must be between 2 and 36"));
                }
                if radix == 10 {
                    return Ok(Value::string(convert::number_to_string(n).as_str()));
                }
                Ok(Value::string(format_radix(n, radix).as_str()))
            }
        }
    });

    method(&mut table, state, "valueOf", 0, |_ncx, this, _args| {
        Ok(Value::number(receiver_number(this)?))
    });

    method(&mut table, state, "toFixed", 1, |ncx, this, args| {
        let n = receiver_number(this)?;
        let digits = convert::to_number(ncx, &arg(args, 0))? as usize;
        if digits > 100 {
            return Err(VmError::range_error("toFixed() digits must be between 0 and 100"));
        }
        Ok(Value::string(format!("{n:.digits$}").as_str()))
    });

    state.realm.number_proto.attach_shared_table(Arc::new(table));

    let ctor = native_ctor(state, "Number", 1, |ncx, this, args| {
        let n = if args.is_empty() {
            0.0
        } else {
            convert::to_number(ncx, &arg(args, 0))?
        };
        if this.is_object() {
            return Ok(box_primitive(ncx, Value::number(n)));
        }
        Ok(Value::number(n))
    });

    let ctor_obj = ctor.as_object().expect("constructor is an object").clone();
    let add = |name: &str, value: Value| {
        let _ = ctor_obj.define_own(PropertyKey::string(name), PropertyDescriptor::builtin(value));
    };
    add("MAX_SAFE_INTEGER", Value::number(9_007_199_254_740_991.0));
    add("MIN_SAFE_INTEGER", Value::number(-9_007_199_254_740_991.0));
    add("EPSILON", Value::number(f64::EPSILON));
    add("POSITIVE_INFINITY", Value::number(f64::INFINITY));
    add("NEGATIVE_INFINITY", Value::number(f64::NEG_INFINITY));
    add("NaN", Value::number(f64::NAN));
    add(
        "isNaN",
        native_fn(state, "isNaN", 1, |_ncx, _this, args| {
            Ok(Value::boolean(arg(args, 0).as_number().is_some_and(f64::is_nan)))
        }),
    );
    add(
        "isFinite",
        native_fn(state, "isFinite", 1, |_ncx, _this, args| {
            Ok(Value::boolean(
                arg(args, 0).as_number().is_some_and(f64::is_finite),
            ))
        }),
    );
    add(
        "isInteger",
        native_fn(state, "isInteger", 1, |_ncx, _this, args| {
            Ok(Value::boolean(
                arg(args, 0)
                    .as_number()
                    .is_some_and(|n| n.is_finite() && n.fract() == 0.0),
            ))
        }),
    );

    install_ctor(state, "Number", ctor, &state.realm.number_proto);
}

fn install_boolean(state: &Arc<VmState>) {
    let mut table = PropertyTable::new();

    let receiver = |this: &Value| -> VmResult<bool> {
        match this {
            Value::Boolean(b) => Ok(*b),
            Value::Object(obj) => match obj.kind() {
                ObjectKind::Boxed(Value::Boolean(b)) => Ok(*b),
                _ => Err(VmError::type_error("receiver is not a boolean")),
            },
            _ => Err(VmError::type_error("receiver is not a boolean")),
        }
    };

    method(&mut table, state, "toString", 0, move |_ncx, this, _args| {
        Ok(Value::string(if receiver(this)? { "true" } else { "false" }))
    });
    method(&mut table, state, "valueOf", 0, move |_ncx, this, _args| {
        Ok(Value::boolean(receiver(this)?))
    });

    state
        .realm
        .boolean_proto
        .attach_shared_table(Arc::new(table));

    let ctor = native_ctor(state, "Boolean", 1, |ncx, this, args| {
        let b = arg(args, 0).to_boolean();
        if this.is_object() {
            return Ok(box_primitive(ncx, Value::boolean(b)));
        }
        Ok(Value::boolean(b))
    });
    install_ctor(state, "Boolean", ctor, &state.realm.boolean_proto);
}

fn install_symbol(state: &Arc<VmState>) {
    let mut table = PropertyTable::new();

    method(&mut table, state, "toString", 0, |_ncx, this, _args| {
        match this {
            Value::Symbol(sym) => Ok(Value::string(sym.to_string().as_str())),
            _ => Err(VmError::type_error("receiver is not a symbol")),
        }
    });

    state.realm.symbol_proto.attach_shared_table(Arc::new(table));

    let ctor = native_fn(state, "Symbol", 1, |ncx, this, args| {
        if this.is_object() {
            return Err(VmError::type_error("Symbol is not a constructor"));
        }
        let description = match arg(args, 0) {
            Value::Undefined => None,
            other => Some(convert::to_string(ncx, &other)?.as_str().to_string()),
        };
        Ok(Value::symbol(ncx.state().symbols.create(description)))
    });

    let ctor_obj = ctor.as_object().expect("symbol function is an object").clone();
    let well_known = state.symbols.well_known().clone();

    let _ = ctor_obj.define_own(
        PropertyKey::string("iterator"),
        PropertyDescriptor::builtin(Value::symbol(well_known.iterator)),
    );
    let _ = ctor_obj.define_own(
        PropertyKey::string("toPrimitive"),
        PropertyDescriptor::builtin(Value::symbol(well_known.to_primitive)),
    );
    let _ = ctor_obj.define_own(
        PropertyKey::string("toStringTag"),
        PropertyDescriptor::builtin(Value::symbol(well_known.to_string_tag)),
    );
    let _ = ctor_obj.define_own(
        PropertyKey::string("for"),
        PropertyDescriptor::builtin(native_fn(state, "for", 1, |ncx, _this, args| {
            let key = convert::to_string(ncx, &arg(args, 0))?;
            Ok(Value::symbol(ncx.state().symbols.keyed(key.as_str())))
        })),
    );
    let _ = ctor_obj.define_own(
        PropertyKey::string("keyFor"),
        PropertyDescriptor::builtin(native_fn(state, "keyFor", 1, |ncx, _this, args| {
            match arg(args, 0) {
                Value::Symbol(sym) => Ok(match ncx.state().symbols.key_for(&sym) {
                    Some(key) => Value::string(key.as_str()),
                    None => Value::undefined(),
                }),
                _ => Err(VmError::type_error("Symbol.keyFor expects a symbol")),
            }
        })),
    );

    install_ctor(state, "Symbol", ctor, &state.realm.symbol_proto);
}

/// Integer rendering in an arbitrary radix (fractional part truncated)
fn format_radix(n: f64, radix: u32) -> String {
    if n.is_nan() {
        return "NaN".to_string();
    }
    if n.is_infinite() {
        return if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
    }
    let negative = n < 0.0;
    let mut value = n.abs().trunc() as u64;
    if value == 0 {
        return "0".to_string();
    }
    let digits = b"0123456789abcdefghijklmnopqrstuvwxyz";
    let mut out = Vec::new();
    while value > 0 {
        out.push(digits[(value % radix as u64) as usize]);
        value /= radix as u64;
    }
    if negative {
        out.push(b'-');
    }
    out.reverse();
    String::from_utf8(out).expect("radix digits are ascii")
}
