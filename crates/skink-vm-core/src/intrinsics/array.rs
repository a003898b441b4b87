//! `Array` intrinsics
//!
//! `length` is a handler property on the prototype pool: reads and writes
//! delegate to the fast element storage of whichever array the access
//! went through.

use std::sync::Arc;

use crate::context::NativeCtx;
use crate::convert;
use crate::error::{VmError, VmResult};
use crate::intrinsics::helpers::{arg, handler_property, install_ctor, method, native_ctor, native_fn};
use crate::object::JsObject;
use crate::property::{PropertyDescriptor, PropertyKey, PropertyTable};
use crate::state::VmState;
use crate::value::Value;

pub(super) fn install(state: &Arc<VmState>) {
    let mut table = PropertyTable::new();

    // Array.length is a handler, not stored data
    handler_property(
        &mut table,
        "length",
        Some(Arc::new(|_ncx, base, _magic, _setval| {
            let len = base.as_object().map(|o| o.array_length()).unwrap_or(0);
            Ok(Value::number(len as f64))
        })),
        Some(Arc::new(|ncx, base, _magic, setval| {
            let requested = setval.cloned().unwrap_or_default();
            let n = crate::convert::to_number(ncx, &requested)?;
            let len = crate::convert::to_uint32(n);
            if n.fract() != 0.0 || n < 0.0 || n > u32::MAX as f64 {
                return Err(VmError::range_error("invalid array length"));
            }
            if let Some(obj) = base.as_object() {
                obj.set_array_length(len);
            }
            Ok(Value::undefined())
        })),
        0,
    );

    method(&mut table, state, "push", 1, |ncx, this, args| {
        let obj = as_array(this)?;
        for value in args {
            obj.push_element(value.clone())?;
        }
        let _ = ncx;
        Ok(Value::number(obj.array_length() as f64))
    });

    method(&mut table, state, "pop", 0, |_ncx, this, _args| {
        Ok(as_array(this)?.pop_element())
    });

    method(&mut table, state, "shift", 0, |_ncx, this, _args| {
        let obj = as_array(this)?;
        let len = obj.array_length();
        if len == 0 {
            return Ok(Value::undefined());
        }
        let first = obj.element(0).unwrap_or_default();
        for i in 1..len {
            let value = obj.element(i).unwrap_or(Value::hole());
            obj.set_element(i - 1, value)?;
        }
        obj.set_array_length(len - 1);
        Ok(first)
    });

    method(&mut table, state, "unshift", 1, |_ncx, this, args| {
        let obj = as_array(this)?;
        let len = obj.array_length();
        let shift = args.len() as u32;
        obj.set_array_length(len + shift);
        for i in (0..len).rev() {
            let value = obj.element(i).unwrap_or(Value::hole());
            obj.set_element(i + shift, value)?;
        }
        for (i, value) in args.iter().enumerate() {
            obj.set_element(i as u32, value.clone())?;
        }
        Ok(Value::number(obj.array_length() as f64))
    });

    method(&mut table, state, "indexOf", 1, |_ncx, this, args| {
        let obj = as_array(this)?;
        let needle = arg(args, 0);
        for i in 0..obj.array_length() {
            if let Some(value) = obj.element(i)
                && convert::strict_equals(&value, &needle)
            {
                return Ok(Value::number(i as f64));
            }
        }
        Ok(Value::number(-1.0))
    });

    method(&mut table, state, "includes", 1, |_ncx, this, args| {
        let obj = as_array(this)?;
        let needle = arg(args, 0);
        for i in 0..obj.array_length() {
            if let Some(value) = obj.element(i) {
                let hit = convert::strict_equals(&value, &needle)
                    || (value.as_number().is_some_and(f64::is_nan)
                        && needle.as_number().is_some_and(f64::is_nan));
                if hit {
                    return Ok(Value::boolean(true));
                }
            }
        }
        Ok(Value::boolean(false))
    });

    method(&mut table, state, "join", 1, |ncx, this, args| {
        join_elements(ncx, this, args)
    });

    method(&mut table, state, "toString", 0, |ncx, this, _args| {
        join_elements(ncx, this, &[])
    });

    method(&mut table, state, "slice", 2, |ncx, this, args| {
        let obj = as_array(this)?;
        let len = obj.array_length() as i64;
        let start = relative_index(ncx, &arg(args, 0), 0, len)?;
        let end = relative_index(ncx, &arg(args, 1), len, len)?;
        let result = JsObject::array(0, Some(ncx.realm().array_proto.clone()));
        for i in start..end {
            result.push_element(obj.element(i as u32).unwrap_or_default())?;
        }
        Ok(Value::object(result))
    });

    method(&mut table, state, "concat", 1, |ncx, this, args| {
        let obj = as_array(this)?;
        let result = JsObject::array(0, Some(ncx.realm().array_proto.clone()));
        for i in 0..obj.array_length() {
            result.push_element(obj.element(i).unwrap_or_default())?;
        }
        for value in args {
            match value.as_object() {
                Some(other) if other.is_fast_array() => {
                    for i in 0..other.array_length() {
                        result.push_element(other.element(i).unwrap_or_default())?;
                    }
                }
                _ => result.push_element(value.clone())?,
            }
        }
        Ok(Value::object(result))
    });

    method(&mut table, state, "forEach", 1, |ncx, this, args| {
        let obj = as_array(this)?;
        let callback = arg(args, 0);
        let this_arg = arg(args, 1);
        for i in 0..obj.array_length() {
            if let Some(value) = obj.element(i) {
                ncx.call_function(
                    &callback,
                    &this_arg,
                    &[value, Value::number(i as f64), this.clone()],
                )?;
            }
        }
        Ok(Value::undefined())
    });

    method(&mut table, state, "map", 1, |ncx, this, args| {
        let obj = as_array(this)?;
        let callback = arg(args, 0);
        let this_arg = arg(args, 1);
        let result = JsObject::array(0, Some(ncx.realm().array_proto.clone()));
        for i in 0..obj.array_length() {
            match obj.element(i) {
                Some(value) => {
                    // A throwing callback propagates; no partial result
                    let mapped = ncx.call_function(
                        &callback,
                        &this_arg,
                        &[value, Value::number(i as f64), this.clone()],
                    )?;
                    result.push_element(mapped)?;
                }
                None => result.push_element(Value::hole())?,
            }
        }
        Ok(Value::object(result))
    });

    method(&mut table, state, "filter", 1, |ncx, this, args| {
        let obj = as_array(this)?;
        let callback = arg(args, 0);
        let this_arg = arg(args, 1);
        let result = JsObject::array(0, Some(ncx.realm().array_proto.clone()));
        for i in 0..obj.array_length() {
            if let Some(value) = obj.element(i) {
                let keep = ncx
                    .call_function(
                        &callback,
                        &this_arg,
                        &[value.clone(), Value::number(i as f64), this.clone()],
                    )?
                    .to_boolean();
                if keep {
                    result.push_element(value)?;
                }
            }
        }
        Ok(Value::object(result))
    });

    method(&mut table, state, "sort", 1, |ncx, this, args| {
        let obj = as_array(this)?;
        let comparator = arg(args, 0);
        let mut values: Vec<Value> = Vec::new();
        for i in 0..obj.array_length() {
            if let Some(value) = obj.element(i) {
                values.push(value);
            }
        }

        // Insertion sort keeps the comparator re-entrant (it may run
        // script) without aliasing the array mid-compare
        for i in 1..values.len() {
            let mut j = i;
            while j > 0 {
                let ordered = if comparator.is_function() {
                    let result = ncx.call_function(
                        &comparator,
                        &Value::undefined(),
                        &[values[j - 1].clone(), values[j].clone()],
                    )?;
                    convert::to_number(ncx, &result)? <= 0.0
                } else {
                    let a = convert::to_string(ncx, &values[j - 1])?;
                    let b = convert::to_string(ncx, &values[j])?;
                    a.as_str() <= b.as_str()
                };
                if ordered {
                    break;
                }
                values.swap(j - 1, j);
                j -= 1;
            }
        }

        obj.set_array_length(values.len() as u32);
        for (i, value) in values.into_iter().enumerate() {
            obj.set_element(i as u32, value)?;
        }
        Ok(this.clone())
    });

    method(&mut table, state, "reduce", 1, |ncx, this, args| {
        let obj = as_array(this)?;
        let callback = arg(args, 0);
        let len = obj.array_length();
        let mut acc;
        let mut start = 0;
        if args.len() > 1 {
            acc = arg(args, 1);
        } else {
            if len == 0 {
                return Err(VmError::type_error("reduce of empty array with no initial value"));
            }
            acc = obj.element(0).unwrap_or_default();
            start = 1;
        }
        for i in start..len {
            if let Some(value) = obj.element(i) {
                acc = ncx.call_function(
                    &callback,
                    &Value::undefined(),
                    &[acc, value, Value::number(i as f64), this.clone()],
                )?;
            }
        }
        Ok(acc)
    });

    state.realm.array_proto.attach_shared_table(Arc::new(table));

    // Constructor and statics
    let ctor = native_ctor(state, "Array", 1, |ncx, _this, args| {
        let result = match args {
            [Value::Number(n)] => {
                let len = *n as u32;
                if n.fract() != 0.0 || *n < 0.0 || *n > u32::MAX as f64 {
                    return Err(VmError::range_error("invalid array length"));
                }
                JsObject::array(len, Some(ncx.realm().array_proto.clone()))
            }
            _ => {
                let arr = JsObject::array(0, Some(ncx.realm().array_proto.clone()));
                for value in args {
                    arr.push_element(value.clone())?;
                }
                arr
            }
        };
        Ok(Value::object(result))
    });

    let ctor_obj = ctor.as_object().expect("constructor is an object").clone();
    let _ = ctor_obj.define_own(
        PropertyKey::string("isArray"),
        PropertyDescriptor::builtin(native_fn(state, "isArray", 1, |_ncx, _this, args| {
            let is_array = arg(args, 0)
                .as_object()
                .is_some_and(|o| matches!(o.kind(), crate::object::ObjectKind::Array { .. }));
            Ok(Value::boolean(is_array))
        })),
    );
    let _ = ctor_obj.define_own(
        PropertyKey::string("from"),
        PropertyDescriptor::builtin(native_fn(state, "from", 1, |ncx, _this, args| {
            let source = arg(args, 0);
            let result = JsObject::array(0, Some(ncx.realm().array_proto.clone()));
            match &source {
                Value::String(s) => {
                    for c in s.as_str().chars() {
                        result.push_element(Value::string(c.to_string().as_str()))?;
                    }
                }
                Value::Object(_) => {
                    let raw_len = ncx.get_property(&source, &PropertyKey::string("length"))?;
                    let len = convert::to_length(convert::to_number(ncx, &raw_len)?);
                    for i in 0..len {
                        let value = ncx.get_property(&source, &PropertyKey::Index(i as u32))?;
                        result.push_element(value)?;
                    }
                }
                _ => {}
            }
            Ok(Value::object(result))
        })),
    );

    install_ctor(state, "Array", ctor, &state.realm.array_proto);
}

fn as_array(this: &Value) -> VmResult<Arc<JsObject>> {
    this.as_object()
        .filter(|o| matches!(o.kind(), crate::object::ObjectKind::Array { .. }))
        .cloned()
        .ok_or_else(|| VmError::type_error("receiver is not an array"))
}

fn join_elements(ncx: &mut NativeCtx<'_>, this: &Value, args: &[Value]) -> VmResult<Value> {
    let obj = as_array(this)?;
    let separator = match arg(args, 0) {
        Value::Undefined => ",".to_string(),
        other => convert::to_string(ncx, &other)?.as_str().to_string(),
    };
    let mut out = String::new();
    for i in 0..obj.array_length() {
        if i > 0 {
            out.push_str(&separator);
        }
        match obj.element(i) {
            Some(value) if !value.is_nullish() => {
                out.push_str(convert::to_string(ncx, &value)?.as_str());
            }
            _ => {}
        }
    }
    Ok(Value::string(out.as_str()))
}

fn relative_index(
    ncx: &mut NativeCtx<'_>,
    value: &Value,
    default: i64,
    len: i64,
) -> VmResult<i64> {
    if value.is_undefined() {
        return Ok(default);
    }
    let n = convert::to_integer(convert::to_number(ncx, value)?) as i64;
    Ok(if n < 0 {
        (len + n).max(0)
    } else {
        n.min(len)
    })
}
