//! The realm: global object, intrinsic prototypes and global bindings
//!
//! Prototype objects are created bare here and populated by the
//! intrinsics installer once their method function objects can exist.
//! Everything is per-VM; no prototype state is process-global.

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::sync::Arc;

use skink_vm_bytecode::ErrorKind;

use crate::object::JsObject;
use crate::value::{SlotCell, Value};

/// Per-VM intrinsic objects and global bindings
pub struct Realm {
    /// The global object (host bindings, intrinsic constructors)
    pub global: Arc<JsObject>,
    /// Named top-level binding cells, shared across compilations
    global_bindings: Mutex<FxHashMap<String, SlotCell>>,

    /// `Object.prototype` (chain root; its `__proto__` is null)
    pub object_proto: Arc<JsObject>,
    /// `Function.prototype`
    pub function_proto: Arc<JsObject>,
    /// `Array.prototype`
    pub array_proto: Arc<JsObject>,
    /// `String.prototype`
    pub string_proto: Arc<JsObject>,
    /// `Number.prototype`
    pub number_proto: Arc<JsObject>,
    /// `Boolean.prototype`
    pub boolean_proto: Arc<JsObject>,
    /// `Symbol.prototype`
    pub symbol_proto: Arc<JsObject>,
    /// `RegExp.prototype`
    pub regexp_proto: Arc<JsObject>,
    /// `Date.prototype`
    pub date_proto: Arc<JsObject>,
    /// `Promise.prototype`
    pub promise_proto: Arc<JsObject>,
    /// `ArrayBuffer.prototype`
    pub array_buffer_proto: Arc<JsObject>,
    /// Shared prototype of the typed-array kinds
    pub typed_array_proto: Arc<JsObject>,
    /// `DataView.prototype`
    pub data_view_proto: Arc<JsObject>,
    /// `Buffer.prototype`
    pub buffer_proto: Arc<JsObject>,
    /// Error prototypes per class
    error_protos: Vec<(ErrorKind, Arc<JsObject>)>,
}

impl Realm {
    /// Create the bare realm. Prototype tables stay empty until the
    /// intrinsics installer runs.
    pub fn new() -> Self {
        let object_proto = JsObject::plain(None);
        let proto = |p: &Arc<JsObject>| Some(p.clone());

        let function_proto = JsObject::plain(proto(&object_proto));
        let array_proto = JsObject::plain(proto(&object_proto));
        let string_proto = JsObject::plain(proto(&object_proto));
        let number_proto = JsObject::plain(proto(&object_proto));
        let boolean_proto = JsObject::plain(proto(&object_proto));
        let symbol_proto = JsObject::plain(proto(&object_proto));
        let regexp_proto = JsObject::plain(proto(&object_proto));
        let date_proto = JsObject::plain(proto(&object_proto));
        let promise_proto = JsObject::plain(proto(&object_proto));
        let array_buffer_proto = JsObject::plain(proto(&object_proto));
        let typed_array_proto = JsObject::plain(proto(&object_proto));
        let data_view_proto = JsObject::plain(proto(&object_proto));
        let buffer_proto = JsObject::plain(proto(&typed_array_proto));

        let base_error = JsObject::plain(proto(&object_proto));
        let mut error_protos = vec![(ErrorKind::Error, base_error.clone())];
        for kind in [
            ErrorKind::Type,
            ErrorKind::Range,
            ErrorKind::Syntax,
            ErrorKind::Reference,
            ErrorKind::Internal,
            ErrorKind::Memory,
        ] {
            error_protos.push((kind, JsObject::plain(proto(&base_error))));
        }

        let global = JsObject::plain(proto(&object_proto));

        Self {
            global,
            global_bindings: Mutex::new(FxHashMap::default()),
            object_proto,
            function_proto,
            array_proto,
            string_proto,
            number_proto,
            boolean_proto,
            symbol_proto,
            regexp_proto,
            date_proto,
            promise_proto,
            array_buffer_proto,
            typed_array_proto,
            data_view_proto,
            buffer_proto,
            error_protos,
        }
    }

    /// The prototype for an error class
    pub fn error_proto(&self, kind: ErrorKind) -> Arc<JsObject> {
        self.error_protos
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, p)| p.clone())
            .expect("every error kind has a prototype")
    }

    /// Get or create the named top-level binding cell. Linking by name
    /// makes separately compiled scripts agree on their globals.
    pub fn global_cell(&self, name: &str) -> SlotCell {
        let mut bindings = self.global_bindings.lock();
        if let Some(cell) = bindings.get(name) {
            return cell.clone();
        }
        let cell = SlotCell::new(Value::undefined());
        bindings.insert(name.to_string(), cell.clone());
        cell
    }

    /// The named binding cell if one exists
    pub fn lookup_global_cell(&self, name: &str) -> Option<SlotCell> {
        self.global_bindings.lock().get(name).cloned()
    }
}

impl Default for Realm {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prototype_chain_roots_at_object_proto() {
        let realm = Realm::new();
        let p = realm.array_proto.prototype().unwrap();
        assert!(Arc::ptr_eq(&p, &realm.object_proto));
        assert!(realm.object_proto.prototype().is_none());
    }

    #[test]
    fn test_error_protos_inherit_base_error() {
        let realm = Realm::new();
        let type_proto = realm.error_proto(ErrorKind::Type);
        let base = realm.error_proto(ErrorKind::Error);
        assert!(Arc::ptr_eq(&type_proto.prototype().unwrap(), &base));
    }

    #[test]
    fn test_global_cells_link_by_name() {
        let realm = Realm::new();
        let a = realm.global_cell("x");
        a.set(Value::number(1.0));
        let b = realm.global_cell("x");
        assert_eq!(b.get(), Value::number(1.0));
        assert!(a.ptr_eq(&b));
    }
}
