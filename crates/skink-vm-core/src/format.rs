//! Context-free value rendering
//!
//! Used by error messages and the console surface. Never calls back into
//! script, so object rendering is structural.

use crate::convert::number_to_string;
use crate::object::ObjectKind;
use crate::property::{IterFilter, PropertyKey};
use crate::value::Value;

/// One-line description of a value for diagnostics
pub fn describe(value: &Value) -> String {
    render(value, 0)
}

fn render(value: &Value, depth: usize) -> String {
    match value {
        Value::Undefined | Value::Hole | Value::Uninitialized => "undefined".to_string(),
        Value::Null => "null".to_string(),
        Value::Boolean(b) => b.to_string(),
        Value::Number(n) => number_to_string(*n),
        Value::String(s) => {
            if depth == 0 {
                s.as_str().to_string()
            } else {
                format!("'{}'", s.as_str())
            }
        }
        Value::Symbol(s) => s.to_string(),
        Value::Object(obj) => {
            if depth >= 3 {
                return "[object]".to_string();
            }
            match obj.kind() {
                ObjectKind::Function(_) => {
                    let name = obj
                        .own_descriptor(&PropertyKey::string("name"))
                        .and_then(|(d, _)| d.value().cloned())
                        .and_then(|v| v.as_string().map(|s| s.as_str().to_string()))
                        .unwrap_or_default();
                    if name.is_empty() {
                        "[Function (anonymous)]".to_string()
                    } else {
                        format!("[Function: {name}]")
                    }
                }
                ObjectKind::Array { .. } => {
                    let parts: Vec<String> = (0..obj.array_length())
                        .map(|i| match obj.element(i) {
                            Some(v) => render(&v, depth + 1),
                            None => "<empty>".to_string(),
                        })
                        .collect();
                    format!("[ {} ]", parts.join(", "))
                }
                ObjectKind::Regexp(r) => r.to_string(),
                ObjectKind::Date(d) => d.to_display_string(),
                ObjectKind::Promise(_) => "Promise".to_string(),
                ObjectKind::ArrayBuffer(b) => format!("ArrayBuffer({})", b.byte_len()),
                ObjectKind::TypedArray(t) => format!("{}({})", t.kind().name(), t.len()),
                ObjectKind::DataView(_) => "DataView".to_string(),
                ObjectKind::Boxed(inner) => format!("[{}: {}]", boxed_name(inner), render(inner, depth + 1)),
                ObjectKind::External { proto_id, .. } => format!("[External #{proto_id}]"),
                ObjectKind::ForInIterator(_) => "[iterator]".to_string(),
                ObjectKind::Error => {
                    let piece = |name: &str| {
                        obj.own_descriptor(&PropertyKey::string(name))
                            .and_then(|(d, _)| d.value().cloned())
                            .map(|v| render(&v, 3))
                            .unwrap_or_default()
                    };
                    let name = piece("name");
                    let message = piece("message");
                    if message.is_empty() { name } else { format!("{name}: {message}") }
                }
                ObjectKind::Plain => {
                    let keys = obj.own_keys(IterFilter::Enumerable);
                    let parts: Vec<String> = keys
                        .iter()
                        .take(8)
                        .map(|key| {
                            let value = obj
                                .own_descriptor(key)
                                .and_then(|(d, _)| d.value().cloned())
                                .unwrap_or(Value::Undefined);
                            format!("{}: {}", key.to_display_string(), render(&value, depth + 1))
                        })
                        .collect();
                    if parts.is_empty() {
                        "{}".to_string()
                    } else {
                        format!("{{ {} }}", parts.join(", "))
                    }
                }
            }
        }
    }
}

fn boxed_name(inner: &Value) -> &'static str {
    match inner {
        Value::Number(_) => "Number",
        Value::String(_) => "String",
        Value::Boolean(_) => "Boolean",
        _ => "Object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::JsObject;
    use crate::property::PropertyDescriptor;

    #[test]
    fn test_primitives() {
        assert_eq!(describe(&Value::undefined()), "undefined");
        assert_eq!(describe(&Value::number(-0.0)), "0");
        assert_eq!(describe(&Value::string("hi")), "hi");
    }

    #[test]
    fn test_array_rendering() {
        let arr = JsObject::array(0, None);
        arr.push_element(Value::number(1.0)).unwrap();
        arr.push_element(Value::string("two")).unwrap();
        assert_eq!(describe(&Value::object(arr)), "[ 1, 'two' ]");
    }

    #[test]
    fn test_plain_object_rendering() {
        let obj = JsObject::plain(None);
        obj.define_own(
            PropertyKey::string("a"),
            PropertyDescriptor::data(Value::number(1.0)),
        )
        .unwrap();
        assert_eq!(describe(&Value::object(obj)), "{ a: 1 }");
    }

    #[test]
    fn test_depth_cap() {
        let inner = JsObject::plain(None);
        let mut current = inner;
        for _ in 0..5 {
            let outer = JsObject::plain(None);
            outer
                .define_own(
                    PropertyKey::string("next"),
                    PropertyDescriptor::data(Value::object(current)),
                )
                .unwrap();
            current = outer;
        }
        let text = describe(&Value::object(current));
        assert!(text.contains("[object]"));
    }
}
