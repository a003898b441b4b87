//! Host-type registration
//!
//! Embedders describe a prototype once as a slice of descriptors; the
//! registry builds a prototype-pool object from it and returns an id.
//! Host pointers are wrapped as external-kinded objects carrying that id,
//! and unwrapping validates it.

use parking_lot::RwLock;
use std::any::Any;
use std::sync::Arc;

use crate::error::{VmError, VmResult};
use crate::object::{JsObject, ObjectKind};
use crate::property::{
    HandlerFn, PropertyAttributes, PropertyDescriptor, PropertyKey, PropertyTable,
};
use crate::value::{ArgSpec, FunctionData, FunctionKind, NativeFn, Value};

/// Identifier of a registered external prototype
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExternalProtoId(pub u32);

/// One entry of an external prototype description
pub enum ExternalDescriptor {
    /// Dynamic property delegating get/set to host callbacks
    Property {
        /// Property name
        name: String,
        /// Load handler
        get: Option<HandlerFn>,
        /// Store handler
        set: Option<HandlerFn>,
        /// Word passed through to the handlers
        magic: u32,
    },
    /// Bound method
    Method {
        /// Method name
        name: String,
        /// Native implementation
        func: NativeFn,
        /// Per-parameter coercion
        arg_spec: Vec<ArgSpec>,
        /// Word passed through to the native
        magic: u32,
        /// Whether the method may be called with `new`
        ctor: bool,
    },
    /// Static value
    Value {
        /// Property name
        name: String,
        /// Stored value
        value: Value,
    },
}

/// Per-VM registry of external prototypes
#[derive(Default)]
pub struct ExternalRegistry {
    protos: RwLock<Vec<Arc<JsObject>>>,
}

impl ExternalRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a prototype from descriptors and register it.
    /// `function_proto` becomes the `__proto__` of method objects;
    /// `object_proto` that of the prototype itself.
    pub fn register(
        &self,
        descriptors: Vec<ExternalDescriptor>,
        object_proto: Option<Arc<JsObject>>,
        function_proto: Option<Arc<JsObject>>,
    ) -> ExternalProtoId {
        let mut table = PropertyTable::new();

        for descriptor in descriptors {
            match descriptor {
                ExternalDescriptor::Property { name, get, set, magic } => {
                    table.insert(
                        PropertyKey::string(&name),
                        PropertyDescriptor::Handler {
                            get,
                            set,
                            magic,
                            attributes: PropertyAttributes::data(),
                        },
                    );
                }
                ExternalDescriptor::Method {
                    name,
                    func,
                    arg_spec,
                    magic,
                    ctor,
                } => {
                    let method = JsObject::new(
                        ObjectKind::Function(FunctionData {
                            kind: FunctionKind::Native {
                                func,
                                arg_spec,
                                magic,
                            },
                            is_ctor: ctor,
                            is_async: false,
                        }),
                        function_proto.clone(),
                    );
                    method
                        .define_own(
                            PropertyKey::string("name"),
                            PropertyDescriptor::builtin(Value::string(name.as_str())),
                        )
                        .expect("fresh function object is extensible");
                    table.insert(
                        PropertyKey::string(&name),
                        PropertyDescriptor::builtin(Value::object(method)),
                    );
                }
                ExternalDescriptor::Value { name, value } => {
                    table.insert(PropertyKey::string(&name), PropertyDescriptor::data(value));
                }
            }
        }

        let proto = JsObject::with_shared_table(ObjectKind::Plain, object_proto, Arc::new(table));
        let mut protos = self.protos.write();
        let id = ExternalProtoId(protos.len() as u32);
        protos.push(proto);
        id
    }

    /// The registered prototype object
    pub fn prototype(&self, id: ExternalProtoId) -> Option<Arc<JsObject>> {
        self.protos.read().get(id.0 as usize).cloned()
    }

    /// Wrap a host payload as an external value of the given prototype
    pub fn create(
        &self,
        id: ExternalProtoId,
        data: Arc<dyn Any + Send + Sync>,
    ) -> VmResult<Value> {
        let proto = self
            .prototype(id)
            .ok_or_else(|| VmError::internal(format!("unknown external prototype {}", id.0)))?;
        let obj = JsObject::new(
            ObjectKind::External {
                proto_id: id.0,
                data,
            },
            Some(proto),
        );
        Ok(Value::object(obj))
    }

    /// Unwrap an external, validating its prototype id
    pub fn unwrap(
        &self,
        value: &Value,
        id: ExternalProtoId,
    ) -> VmResult<Arc<dyn Any + Send + Sync>> {
        let obj = value
            .as_object()
            .ok_or_else(|| VmError::type_error("not an external object"))?;
        match obj.kind() {
            ObjectKind::External { proto_id, data } if *proto_id == id.0 => Ok(data.clone()),
            ObjectKind::External { proto_id, .. } => Err(VmError::type_error(format!(
                "external prototype mismatch (expected {}, found {proto_id})",
                id.0
            ))),
            _ => Err(VmError::type_error("not an external object")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct HostThing {
        tag: u32,
    }

    #[test]
    fn test_create_and_unwrap() {
        let registry = ExternalRegistry::new();
        let id = registry.register(
            vec![ExternalDescriptor::Value {
                name: "kind".to_string(),
                value: Value::string("thing"),
            }],
            None,
            None,
        );

        let wrapped = registry
            .create(id, Arc::new(HostThing { tag: 7 }))
            .unwrap();
        let data = registry.unwrap(&wrapped, id).unwrap();
        let thing = data.downcast::<HostThing>().unwrap();
        assert_eq!(thing.tag, 7);
    }

    #[test]
    fn test_unwrap_validates_prototype() {
        let registry = ExternalRegistry::new();
        let a = registry.register(vec![], None, None);
        let b = registry.register(vec![], None, None);

        let wrapped = registry.create(a, Arc::new(HostThing { tag: 1 })).unwrap();
        assert!(registry.unwrap(&wrapped, b).is_err());
        assert!(registry.unwrap(&Value::number(1.0), a).is_err());
    }

    #[test]
    fn test_prototype_carries_descriptors() {
        let registry = ExternalRegistry::new();
        let id = registry.register(
            vec![ExternalDescriptor::Value {
                name: "version".to_string(),
                value: Value::number(3.0),
            }],
            None,
            None,
        );
        let proto = registry.prototype(id).unwrap();
        let (desc, shared) = proto
            .own_descriptor(&PropertyKey::string("version"))
            .unwrap();
        assert!(shared);
        assert_eq!(desc.value(), Some(&Value::number(3.0)));
    }
}
