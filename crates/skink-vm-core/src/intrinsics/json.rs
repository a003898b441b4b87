//! `JSON` intrinsic
//!
//! Bridges VM values through `serde_json`. Functions, symbols and
//! undefined drop out of objects and become null in arrays, per the JSON
//! serialization rules; cycles are a `TypeError`.

use serde_json::Value as Json;
use std::sync::Arc;

use crate::context::NativeCtx;
use crate::convert;
use crate::error::{VmError, VmResult};
use crate::intrinsics::helpers::{arg, global, method};
use crate::object::{JsObject, ObjectKind};
use crate::property::{IterFilter, PropertyDescriptor, PropertyKey, PropertyTable};
use crate::state::VmState;
use crate::value::Value;

pub(super) fn install(state: &Arc<VmState>) {
    let mut table = PropertyTable::new();

    method(&mut table, state, "stringify", 3, |ncx, _this, args| {
        let mut seen = Vec::new();
        let json = match to_json(ncx, &arg(args, 0), &mut seen)? {
            Some(json) => json,
            None => return Ok(Value::undefined()),
        };
        let pretty = matches!(arg(args, 2), Value::Number(n) if n > 0.0)
            || matches!(&arg(args, 2), Value::String(s) if !s.is_empty());
        let text = if pretty {
            serde_json::to_string_pretty(&json)
        } else {
            serde_json::to_string(&json)
        }
        .map_err(|e| VmError::type_error(format!("JSON.stringify failed: {e}")))?;
        Ok(Value::string(text.as_str()))
    });

    method(&mut table, state, "parse", 2, |ncx, _this, args| {
        let text = convert::to_string(ncx, &arg(args, 0))?;
        let json: Json = serde_json::from_str(text.as_str())
            .map_err(|e| VmError::syntax_error(format!("JSON.parse: {e}")))?;
        from_json(ncx, &json)
    });

    let json_obj =
        JsObject::with_shared_table(ObjectKind::Plain, Some(state.realm.object_proto.clone()), {
            Arc::new(table)
        });
    global(state, "JSON", Value::object(json_obj));
}

fn to_json(
    ncx: &mut NativeCtx<'_>,
    value: &Value,
    seen: &mut Vec<usize>,
) -> VmResult<Option<Json>> {
    Ok(Some(match value {
        Value::Null => Json::Null,
        Value::Boolean(b) => Json::Bool(*b),
        Value::Number(n) => {
            if n.is_finite() {
                serde_json::Number::from_f64(*n)
                    .map(Json::Number)
                    .unwrap_or(Json::Null)
            } else {
                Json::Null
            }
        }
        Value::String(s) => Json::String(s.as_str().to_string()),
        Value::Undefined | Value::Symbol(_) | Value::Hole | Value::Uninitialized => {
            return Ok(None);
        }
        Value::Object(obj) => {
            if obj.function_data().is_some() {
                return Ok(None);
            }
            let id = Arc::as_ptr(obj) as usize;
            if seen.contains(&id) {
                return Err(VmError::type_error("converting circular structure to JSON"));
            }
            seen.push(id);

            let result = match obj.kind() {
                ObjectKind::Array { .. } => {
                    let mut items = Vec::new();
                    for i in 0..obj.array_length() {
                        let element = ncx.get_property(value, &PropertyKey::Index(i))?;
                        // Holes and undefined become null inside arrays
                        items.push(to_json(ncx, &element, seen)?.unwrap_or(Json::Null));
                    }
                    Json::Array(items)
                }
                ObjectKind::Boxed(inner) => {
                    let inner = inner.clone();
                    return to_json(ncx, &inner, seen).map(|v| {
                        seen.pop();
                        v
                    });
                }
                _ => {
                    let mut map = serde_json::Map::new();
                    for key in obj.own_keys(IterFilter::Enumerable) {
                        if matches!(key, PropertyKey::Symbol(_)) {
                            continue;
                        }
                        let element = ncx.get_property(value, &key)?;
                        if let Some(json) = to_json(ncx, &element, seen)? {
                            map.insert(key.to_display_string(), json);
                        }
                    }
                    Json::Object(map)
                }
            };
            seen.pop();
            result
        }
    }))
}

fn from_json(ncx: &mut NativeCtx<'_>, json: &Json) -> VmResult<Value> {
    Ok(match json {
        Json::Null => Value::null(),
        Json::Bool(b) => Value::boolean(*b),
        Json::Number(n) => Value::number(n.as_f64().unwrap_or(f64::NAN)),
        Json::String(s) => Value::string(s.as_str()),
        Json::Array(items) => {
            let arr = JsObject::array(0, Some(ncx.realm().array_proto.clone()));
            for item in items {
                let value = from_json(ncx, item)?;
                arr.push_element(value)?;
            }
            Value::object(arr)
        }
        Json::Object(map) => {
            let obj = JsObject::plain(Some(ncx.realm().object_proto.clone()));
            for (key, item) in map {
                let value = from_json(ncx, item)?;
                obj.define_own(PropertyKey::string(key), PropertyDescriptor::data(value))?;
            }
            Value::object(obj)
        }
    })
}
