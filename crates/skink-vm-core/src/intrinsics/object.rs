//! `Object` and `Function` intrinsics

use std::sync::Arc;

use crate::context::NativeCtx;
use crate::error::{VmError, VmResult};
use crate::intrinsics::helpers::{arg, install_ctor, method, native_ctor, native_fn};
use crate::object::{JsObject, ObjectKind};
use crate::property::{
    IterFilter, PropertyAttributes, PropertyDescriptor, PropertyKey, PropertyTable,
};
use crate::state::VmState;
use crate::value::{FunctionData, FunctionKind, Value};

pub(super) fn install(state: &Arc<VmState>) {
    install_object_proto(state);
    install_function_proto(state);
    install_object_ctor(state);
}

fn install_object_proto(state: &Arc<VmState>) {
    let mut table = PropertyTable::new();

    method(&mut table, state, "hasOwnProperty", 1, |ncx, this, args| {
        let key = to_key(ncx, &arg(args, 0))?;
        let Some(obj) = this.as_object() else {
            return Ok(Value::boolean(false));
        };
        if obj.is_fast_array()
            && let Some(index) = key.as_index()
        {
            return Ok(Value::boolean(obj.element(index).is_some()));
        }
        let own = matches!(obj.own_descriptor(&key), Some((d, _)) if !d.is_whiteout());
        Ok(Value::boolean(own))
    });

    method(&mut table, state, "isPrototypeOf", 1, |_ncx, this, args| {
        let Some(target) = this.as_object() else {
            return Ok(Value::boolean(false));
        };
        let Some(obj) = arg(args, 0).as_object().cloned() else {
            return Ok(Value::boolean(false));
        };
        let mut current = obj.prototype();
        while let Some(p) = current {
            if Arc::ptr_eq(&p, target) {
                return Ok(Value::boolean(true));
            }
            current = p.prototype();
        }
        Ok(Value::boolean(false))
    });

    method(&mut table, state, "toString", 0, |_ncx, this, _args| {
        let tag = match this.as_object().map(|o| o.kind()) {
            Some(ObjectKind::Array { .. }) => "Array",
            Some(ObjectKind::Function(_)) => "Function",
            Some(ObjectKind::Error) => "Error",
            Some(ObjectKind::Date(_)) => "Date",
            Some(ObjectKind::Regexp(_)) => "RegExp",
            Some(_) => "Object",
            None => match this {
                Value::Null => "Null",
                Value::Undefined => "Undefined",
                _ => "Object",
            },
        };
        Ok(Value::string(format!("[object {tag}]").as_str()))
    });

    method(&mut table, state, "valueOf", 0, |_ncx, this, _args| {
        // Boxed primitives unwrap; everything else yields itself
        if let Some(obj) = this.as_object()
            && let ObjectKind::Boxed(inner) = obj.kind()
        {
            return Ok(inner.clone());
        }
        Ok(this.clone())
    });

    state.realm.object_proto.attach_shared_table(Arc::new(table));
}

fn install_function_proto(state: &Arc<VmState>) {
    let mut table = PropertyTable::new();

    method(&mut table, state, "call", 1, |ncx, this, args| {
        let call_this = arg(args, 0);
        let rest = args.get(1..).unwrap_or_default();
        ncx.call_function(this, &call_this, rest)
    });

    method(&mut table, state, "apply", 2, |ncx, this, args| {
        let call_this = arg(args, 0);
        let call_args = match arg(args, 1) {
            Value::Undefined | Value::Null => Vec::new(),
            Value::Object(arr) if arr.is_fast_array() => {
                let mut out = Vec::new();
                for i in 0..arr.array_length() {
                    out.push(arr.element(i).unwrap_or_default());
                }
                out
            }
            other => {
                let len = ncx
                    .get_property(&other, &PropertyKey::string("length"))?
                    .as_number()
                    .unwrap_or(0.0) as u32;
                let mut out = Vec::new();
                for i in 0..len {
                    out.push(ncx.get_property(&other, &PropertyKey::Index(i))?);
                }
                out
            }
        };
        ncx.call_function(this, &call_this, &call_args)
    });

    method(&mut table, state, "bind", 1, |ncx, this, args| {
        let Some(target) = this.as_object() else {
            return Err(VmError::type_error("Function.prototype.bind on non-function"));
        };
        let Some(target_data) = target.function_data() else {
            return Err(VmError::type_error("Function.prototype.bind on non-function"));
        };
        let bound = JsObject::new(
            ObjectKind::Function(FunctionData {
                kind: FunctionKind::Bound {
                    target: target.clone(),
                    this: arg(args, 0),
                    args: args.get(1..).unwrap_or_default().to_vec(),
                },
                is_ctor: target_data.is_ctor,
                is_async: target_data.is_async,
            }),
            Some(ncx.realm().function_proto.clone()),
        );
        let name = ncx
            .get_property(this, &PropertyKey::string("name"))?
            .as_string()
            .map(|s| s.as_str().to_string())
            .unwrap_or_default();
        bound.define_own(
            PropertyKey::string("name"),
            PropertyDescriptor::builtin(Value::string(format!("bound {name}").as_str())),
        )?;
        Ok(Value::object(bound))
    });

    method(&mut table, state, "toString", 0, |ncx, this, _args| {
        let name = ncx
            .get_property(this, &PropertyKey::string("name"))?
            .as_string()
            .map(|s| s.as_str().to_string())
            .unwrap_or_default();
        Ok(Value::string(
            format!("function {name}() {{ [native code] }}").as_str(),
        ))
    });

    state
        .realm
        .function_proto
        .attach_shared_table(Arc::new(table));
}

fn install_object_ctor(state: &Arc<VmState>) {
    let ctor = native_ctor(state, "Object", 1, |ncx, _this, args| {
        let value = arg(args, 0);
        Ok(match value {
            // Object(null) is an empty object, not null
            Value::Undefined | Value::Null => {
                Value::object(JsObject::plain(Some(ncx.realm().object_proto.clone())))
            }
            Value::Object(_) => value,
            primitive => box_primitive(ncx, primitive),
        })
    });

    let ctor_obj = ctor.as_object().expect("constructor is an object").clone();

    let add_static = |name: &str,
                      length: u32,
                      f: fn(&mut NativeCtx<'_>, &Value, &[Value]) -> VmResult<Value>| {
        let func = native_fn(state, name, length, f);
        let _ = ctor_obj.define_own(PropertyKey::string(name), PropertyDescriptor::builtin(func));
    };

    add_static("keys", 1, |ncx, _this, args| object_keys(ncx, args, KeysKind::Keys));
    add_static("values", 1, |ncx, _this, args| {
        object_keys(ncx, args, KeysKind::Values)
    });
    add_static("entries", 1, |ncx, _this, args| {
        object_keys(ncx, args, KeysKind::Entries)
    });

    add_static("create", 2, |ncx, _this, args| {
        let proto = match arg(args, 0) {
            Value::Object(p) => Some(p),
            Value::Null => None,
            _ => {
                return Err(VmError::type_error(
                    "Object prototype may only be an Object or null",
                ));
            }
        };
        let obj = JsObject::plain(proto);
        if let Some(props) = arg(args, 1).as_object() {
            for key in props.own_keys(IterFilter::Enumerable) {
                let descriptor = ncx.get_property(&arg(args, 1), &key)?;
                let value = ncx.get_property(&descriptor, &PropertyKey::string("value"))?;
                obj.define_own(key, PropertyDescriptor::data(value))?;
            }
        }
        Ok(Value::object(obj))
    });

    add_static("getPrototypeOf", 1, |ncx, _this, args| {
        Ok(match arg(args, 0) {
            Value::Object(obj) => obj
                .prototype()
                .map(Value::object)
                .unwrap_or(Value::Null),
            Value::String(_) => Value::object(ncx.realm().string_proto.clone()),
            Value::Number(_) => Value::object(ncx.realm().number_proto.clone()),
            Value::Boolean(_) => Value::object(ncx.realm().boolean_proto.clone()),
            _ => Value::Null,
        })
    });

    add_static("setPrototypeOf", 2, |_ncx, _this, args| {
        let target = arg(args, 0);
        if let Some(obj) = target.as_object() {
            match arg(args, 1) {
                Value::Object(p) => obj.set_prototype(Some(p))?,
                Value::Null => obj.set_prototype(None)?,
                _ => {}
            }
        }
        Ok(target)
    });

    add_static("defineProperty", 3, |ncx, _this, args| {
        let target = arg(args, 0);
        let Some(obj) = target.as_object() else {
            return Err(VmError::type_error("Object.defineProperty called on non-object"));
        };
        let key = to_key(ncx, &arg(args, 1))?;
        let spec = arg(args, 2);

        let get = ncx.get_property(&spec, &PropertyKey::string("get"))?;
        let set = ncx.get_property(&spec, &PropertyKey::string("set"))?;
        let attributes = PropertyAttributes {
            writable: ncx
                .get_property(&spec, &PropertyKey::string("writable"))?
                .to_boolean(),
            enumerable: ncx
                .get_property(&spec, &PropertyKey::string("enumerable"))?
                .to_boolean(),
            configurable: ncx
                .get_property(&spec, &PropertyKey::string("configurable"))?
                .to_boolean(),
        };

        let descriptor = if get.is_function() || set.is_function() {
            PropertyDescriptor::Accessor {
                get: get.is_function().then_some(get),
                set: set.is_function().then_some(set),
                attributes,
            }
        } else {
            let value = ncx.get_property(&spec, &PropertyKey::string("value"))?;
            PropertyDescriptor::data_with_attrs(value, attributes)
        };
        obj.define_own(key, descriptor)?;
        Ok(target)
    });

    add_static("getOwnPropertyNames", 1, |ncx, _this, args| {
        object_keys(ncx, args, KeysKind::AllKeys)
    });

    add_static("freeze", 1, |_ncx, _this, args| {
        let target = arg(args, 0);
        if let Some(obj) = target.as_object() {
            obj.prevent_extensions();
            let keys = obj.own_keys(IterFilter::All);
            for key in keys {
                if let Some((PropertyDescriptor::Data { value, .. }, false)) =
                    obj.own_descriptor(&key)
                {
                    let _ = obj.define_own(
                        key,
                        PropertyDescriptor::data_with_attrs(value, PropertyAttributes::frozen()),
                    );
                }
            }
        }
        Ok(target)
    });

    add_static("assign", 2, |ncx, _this, args| {
        let target = arg(args, 0);
        for source in args.get(1..).unwrap_or_default() {
            let Some(src) = source.as_object() else { continue };
            for key in src.own_keys(IterFilter::Enumerable) {
                let value = ncx.get_property(source, &key)?;
                ncx.set_property(&target, &key, value)?;
            }
        }
        Ok(target)
    });

    add_static("is", 2, |_ncx, _this, args| {
        let a = arg(args, 0);
        let b = arg(args, 1);
        // SameValue: NaN equals NaN, +0 and -0 differ
        let same = match (&a, &b) {
            (Value::Number(x), Value::Number(y)) => {
                x.to_bits() == y.to_bits() || (x.is_nan() && y.is_nan())
            }
            _ => crate::convert::strict_equals(&a, &b),
        };
        Ok(Value::boolean(same))
    });

    install_ctor(state, "Object", ctor, &state.realm.object_proto);
}

/// Box a primitive (`Object(3)`, `new Number(3)`)
pub(super) fn box_primitive(ncx: &NativeCtx<'_>, value: Value) -> Value {
    let proto = match &value {
        Value::Number(_) => ncx.realm().number_proto.clone(),
        Value::String(_) => ncx.realm().string_proto.clone(),
        Value::Boolean(_) => ncx.realm().boolean_proto.clone(),
        Value::Symbol(_) => ncx.realm().symbol_proto.clone(),
        _ => ncx.realm().object_proto.clone(),
    };
    Value::object(JsObject::new(ObjectKind::Boxed(value), Some(proto)))
}

pub(super) fn to_key(ncx: &mut NativeCtx<'_>, value: &Value) -> VmResult<PropertyKey> {
    match value {
        Value::Symbol(sym) => Ok(PropertyKey::Symbol(sym.clone())),
        Value::String(s) => Ok(PropertyKey::string(s.as_str())),
        other => crate::convert::to_property_key(ncx, other),
    }
}

enum KeysKind {
    Keys,
    Values,
    Entries,
    AllKeys,
}

fn object_keys(ncx: &mut NativeCtx<'_>, args: &[Value], kind: KeysKind) -> VmResult<Value> {
    let target = arg(args, 0);
    let array_proto = ncx.realm().array_proto.clone();
    let result = JsObject::array(0, Some(array_proto.clone()));
    let Some(obj) = target.as_object() else {
        return Ok(Value::object(result));
    };

    let filter = match kind {
        KeysKind::AllKeys => IterFilter::All,
        _ => IterFilter::Enumerable,
    };
    for key in obj.own_keys(filter) {
        let value_of = |key: &PropertyKey| -> Value {
            if let Some(index) = key.as_index()
                && obj.is_fast_array()
            {
                return obj.element(index).unwrap_or_default();
            }
            obj.own_descriptor(key)
                .and_then(|(d, _)| d.value().cloned())
                .unwrap_or_default()
        };
        let entry = match kind {
            KeysKind::Keys | KeysKind::AllKeys => {
                Value::string(key.to_display_string().as_str())
            }
            KeysKind::Values => value_of(&key),
            KeysKind::Entries => {
                let pair = JsObject::array(0, Some(array_proto.clone()));
                pair.push_element(Value::string(key.to_display_string().as_str()))?;
                pair.push_element(value_of(&key))?;
                Value::object(pair)
            }
        };
        result.push_element(entry)?;
    }
    Ok(Value::object(result))
}
