//! VM objects
//!
//! An object owns a per-instance property table, may carry a shared
//! (prototype-pool) table fixed at creation, a mutable `__proto__` link,
//! a kind tag and flags. Arrays keep integer-indexed cells in a fast
//! element vector until a sparse write or element delete demotes them to
//! the general property path.

use parking_lot::{Mutex, RwLock};
use std::any::Any;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::array_buffer::JsArrayBuffer;
use crate::date::JsDate;
use crate::error::{VmError, VmResult};
use crate::promise::JsPromise;
use crate::property::{
    IterFilter, PropertyAttributes, PropertyDescriptor, PropertyKey, PropertyTable,
};
use crate::regexp::JsRegExp;
use crate::typed_array::{JsDataView, JsTypedArray};
use crate::value::{FunctionData, Value};

/// Maximum prototype-chain depth before the walk is refused
pub const MAX_PROTO_DEPTH: usize = 64;

/// Kind tag distinguishing object-flavoured values
pub enum ObjectKind {
    /// Plain object
    Plain,
    /// Array; `length` survives demotion from the fast path
    Array {
        /// Observable length
        length: AtomicU32,
    },
    /// Callable
    Function(FunctionData),
    /// Error object (error-data flag is also set)
    Error,
    /// Regular expression
    Regexp(JsRegExp),
    /// Date
    Date(JsDate),
    /// Raw binary buffer
    ArrayBuffer(Arc<JsArrayBuffer>),
    /// View over an ArrayBuffer
    TypedArray(JsTypedArray),
    /// Byte-order-explicit view over an ArrayBuffer
    DataView(JsDataView),
    /// Promise
    Promise(Arc<JsPromise>),
    /// Boxed primitive (`new Number(3)`, `Object("s")`)
    Boxed(Value),
    /// Host-owned external with its registered prototype id
    External {
        /// Registered external prototype id
        proto_id: u32,
        /// Host payload
        data: Arc<dyn Any + Send + Sync>,
    },
    /// Hidden for-in iterator state; never visible to script
    ForInIterator(Mutex<ForInIter>),
}

/// Key cursor of a for-in walk
#[derive(Debug)]
pub struct ForInIter {
    /// Enumerable key names, deduplicated along the prototype chain
    pub keys: Vec<crate::string::JsString>,
    /// Next position
    pub pos: usize,
}

impl std::fmt::Debug for ObjectKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Plain => write!(f, "Plain"),
            Self::Array { length } => write!(f, "Array(len={})", length.load(Ordering::Relaxed)),
            Self::Function(data) => write!(f, "Function({:?})", data.kind),
            Self::Error => write!(f, "Error"),
            Self::Regexp(r) => write!(f, "Regexp({})", r.source()),
            Self::Date(d) => write!(f, "Date({})", d.epoch_ms()),
            Self::ArrayBuffer(b) => write!(f, "ArrayBuffer({} bytes)", b.byte_len()),
            Self::TypedArray(t) => write!(f, "TypedArray({:?})", t.kind()),
            Self::DataView(_) => write!(f, "DataView"),
            Self::Promise(_) => write!(f, "Promise"),
            Self::Boxed(v) => write!(f, "Boxed({v:?})"),
            Self::External { proto_id, .. } => write!(f, "External(proto={proto_id})"),
            Self::ForInIterator(_) => write!(f, "ForInIterator"),
        }
    }
}

/// Object bit-flags
#[derive(Clone, Copy, Debug)]
pub struct ObjectFlags {
    /// New own properties may be added
    pub extensible: bool,
    /// Prototype-pool object: shared-table writes clone first
    pub shared: bool,
    /// Error object (unwinder fills `stack` if missing)
    pub error_data: bool,
    /// Indexed access bypasses the property table
    pub fast_array: bool,
}

impl Default for ObjectFlags {
    fn default() -> Self {
        Self {
            extensible: true,
            shared: false,
            error_data: false,
            fast_array: false,
        }
    }
}

/// A VM object
pub struct JsObject {
    kind: ObjectKind,
    /// Per-instance table
    table: RwLock<PropertyTable>,
    /// Shared prototype-pool table; attached once when the pool is built
    shared: RwLock<Option<Arc<PropertyTable>>>,
    /// `__proto__` (None for the chain root)
    prototype: RwLock<Option<Arc<JsObject>>>,
    /// Fast array cells; `Hole` marks absent elements
    elements: RwLock<Vec<Value>>,
    flags: RwLock<ObjectFlags>,
}

impl JsObject {
    /// Create an object of the given kind and prototype
    pub fn new(kind: ObjectKind, prototype: Option<Arc<JsObject>>) -> Arc<Self> {
        let fast_array = matches!(kind, ObjectKind::Array { .. });
        let error_data = matches!(kind, ObjectKind::Error);
        Arc::new(Self {
            kind,
            table: RwLock::new(PropertyTable::new()),
            shared: RwLock::new(None),
            prototype: RwLock::new(prototype),
            elements: RwLock::new(Vec::new()),
            flags: RwLock::new(ObjectFlags {
                fast_array,
                error_data,
                ..Default::default()
            }),
        })
    }

    /// Create a plain object
    pub fn plain(prototype: Option<Arc<JsObject>>) -> Arc<Self> {
        Self::new(ObjectKind::Plain, prototype)
    }

    /// Create a prototype-pool object carrying a shared table
    pub fn with_shared_table(
        kind: ObjectKind,
        prototype: Option<Arc<JsObject>>,
        shared: Arc<PropertyTable>,
    ) -> Arc<Self> {
        let obj = Self::new(kind, prototype);
        obj.attach_shared_table(shared);
        obj
    }

    /// Attach the prototype-pool table and mark the object shared.
    /// Intrinsic prototypes are created empty and populated this way once
    /// their method function objects exist.
    pub fn attach_shared_table(&self, shared: Arc<PropertyTable>) {
        *self.shared.write() = Some(shared);
        self.flags.write().shared = true;
    }

    /// Create an array with `len` hole-initialized cells
    pub fn array(len: u32, prototype: Option<Arc<JsObject>>) -> Arc<Self> {
        let obj = Self::new(
            ObjectKind::Array {
                length: AtomicU32::new(len),
            },
            prototype,
        );
        obj.elements.write().resize(len as usize, Value::hole());
        obj
    }

    /// Kind tag
    pub fn kind(&self) -> &ObjectKind {
        &self.kind
    }

    /// Function payload when callable
    pub fn function_data(&self) -> Option<&FunctionData> {
        match &self.kind {
            ObjectKind::Function(data) => Some(data),
            _ => None,
        }
    }

    /// Current flags
    pub fn flags(&self) -> ObjectFlags {
        *self.flags.read()
    }

    /// Prevent further own-property additions
    pub fn prevent_extensions(&self) {
        self.flags.write().extensible = false;
    }

    /// Current prototype
    pub fn prototype(&self) -> Option<Arc<JsObject>> {
        self.prototype.read().clone()
    }

    /// Replace the prototype; refuses a single-link cycle with `TypeError`
    /// (longer cycles are caught by the walk-depth cap).
    pub fn set_prototype(self: &Arc<Self>, proto: Option<Arc<JsObject>>) -> VmResult<()> {
        if let Some(p) = &proto {
            if Arc::ptr_eq(p, self) {
                return Err(VmError::type_error("cyclic __proto__ value"));
            }
            if let Some(pp) = p.prototype()
                && Arc::ptr_eq(&pp, self)
            {
                return Err(VmError::type_error("cyclic __proto__ value"));
            }
        }
        *self.prototype.write() = proto;
        Ok(())
    }

    /// Shared prototype-pool table, if attached
    pub fn shared_table(&self) -> Option<Arc<PropertyTable>> {
        self.shared.read().clone()
    }

    // ---- own-table primitives -------------------------------------------

    /// Find an own descriptor. A whiteout in the per-instance table wins
    /// over the shared table: the walk stops at the first hit.
    pub fn own_descriptor(&self, key: &PropertyKey) -> Option<(PropertyDescriptor, bool)> {
        if let Some(desc) = self.table.read().find(key) {
            return Some((desc.clone(), false));
        }
        if let Some(shared) = &*self.shared.read()
            && let Some(desc) = shared.find(key)
        {
            return Some((desc.clone(), true));
        }
        None
    }

    /// Insert or replace an own descriptor (bypasses accessors)
    pub fn define_own(&self, key: PropertyKey, descriptor: PropertyDescriptor) -> VmResult<()> {
        let extensible = self.flags.read().extensible;
        let mut table = self.table.write();
        if !extensible && !table.contains(&key) {
            return Err(VmError::type_error("object is not extensible"));
        }
        table.insert(key, descriptor);
        Ok(())
    }

    /// Install a whiteout masking a shared-table entry
    pub fn whiteout(&self, key: PropertyKey) {
        self.table.write().insert(key, PropertyDescriptor::Whiteout);
    }

    /// Remove an own per-instance entry
    pub fn remove_own(&self, key: &PropertyKey) -> bool {
        self.table.write().delete(key)
    }

    /// Read-only view over the per-instance table
    pub fn with_table<R>(&self, f: impl FnOnce(&PropertyTable) -> R) -> R {
        f(&self.table.read())
    }

    // ---- fast array primitives ------------------------------------------

    /// Whether indexed access goes through the fast element path
    pub fn is_fast_array(&self) -> bool {
        self.flags.read().fast_array
    }

    /// Array length (fast or demoted)
    pub fn array_length(&self) -> u32 {
        match &self.kind {
            ObjectKind::Array { length } => length.load(Ordering::Relaxed),
            _ => 0,
        }
    }

    /// Read a fast element; `None` for out-of-range or holes
    pub fn element(&self, index: u32) -> Option<Value> {
        let elements = self.elements.read();
        match elements.get(index as usize) {
            Some(v) if !v.is_hole() => Some(v.clone()),
            _ => None,
        }
    }

    /// Write a fast element. Writing at `len` extends; a write past `len`
    /// or onto a non-fast array demotes to the general property path.
    pub fn set_element(self: &Arc<Self>, index: u32, value: Value) -> VmResult<()> {
        let ObjectKind::Array { length } = &self.kind else {
            return Err(VmError::internal("set_element on non-array"));
        };
        if self.is_fast_array() {
            let mut elements = self.elements.write();
            let len = elements.len() as u32;
            if index < len {
                elements[index as usize] = value;
                return Ok(());
            }
            if index == len {
                elements.push(value);
                length.store(len + 1, Ordering::Relaxed);
                return Ok(());
            }
            // Sparse write: fall back through the general property path
            drop(elements);
            self.demote();
        }
        self.define_own(PropertyKey::Index(index), PropertyDescriptor::data(value))?;
        let length = match &self.kind {
            ObjectKind::Array { length } => length,
            _ => unreachable!(),
        };
        if index >= length.load(Ordering::Relaxed) {
            length.store(index + 1, Ordering::Relaxed);
        }
        Ok(())
    }

    /// Append to a fast array
    pub fn push_element(self: &Arc<Self>, value: Value) -> VmResult<()> {
        let len = self.array_length();
        self.set_element(len, value)
    }

    /// Remove and return the last element (`undefined` when empty)
    pub fn pop_element(&self) -> Value {
        let ObjectKind::Array { length } = &self.kind else {
            return Value::undefined();
        };
        let mut elements = self.elements.write();
        match elements.pop() {
            Some(v) => {
                length.store(elements.len() as u32, Ordering::Relaxed);
                if v.is_hole() { Value::undefined() } else { v }
            }
            None => Value::undefined(),
        }
    }

    /// Delete a fast element; demotes since this writes a hole
    pub fn delete_element(self: &Arc<Self>, index: u32) -> bool {
        if !self.is_fast_array() {
            return self.remove_own(&PropertyKey::Index(index));
        }
        let mut elements = self.elements.write();
        if (index as usize) < elements.len() {
            elements[index as usize] = Value::hole();
            drop(elements);
            self.demote();
            true
        } else {
            true
        }
    }

    /// Set the observable array length, truncating or hole-extending
    pub fn set_array_length(&self, new_len: u32) {
        let ObjectKind::Array { length } = &self.kind else {
            return;
        };
        if self.is_fast_array() {
            self.elements.write().resize(new_len as usize, Value::hole());
        }
        length.store(new_len, Ordering::Relaxed);
    }

    /// Move fast elements into the property table and clear the fast flag
    fn demote(&self) {
        let mut flags = self.flags.write();
        if !flags.fast_array {
            return;
        }
        flags.fast_array = false;
        drop(flags);

        let elements = std::mem::take(&mut *self.elements.write());
        let mut table = self.table.write();
        for (i, value) in elements.into_iter().enumerate() {
            if !value.is_hole() {
                table.insert(PropertyKey::Index(i as u32), PropertyDescriptor::data(value));
            }
        }
    }

    /// Snapshot of live elements (holes preserved)
    pub fn elements_snapshot(&self) -> Vec<Value> {
        self.elements.read().clone()
    }

    // ---- enumeration -----------------------------------------------------

    /// Own keys in enumeration order: indices ascending, then per-instance
    /// insertion order, then unshadowed shared entries.
    pub fn own_keys(&self, filter: IterFilter) -> Vec<PropertyKey> {
        let mut keys = Vec::new();

        if self.is_fast_array() {
            let elements = self.elements.read();
            for (i, v) in elements.iter().enumerate() {
                if !v.is_hole() {
                    keys.push(PropertyKey::Index(i as u32));
                }
            }
        }

        let table = self.table.read();
        for (key, _) in table.iterate(filter) {
            keys.push(key.clone());
        }

        if let Some(shared) = &*self.shared.read() {
            for (key, _) in shared.iterate(filter) {
                if !table.contains(key) {
                    keys.push(key.clone());
                }
            }
        }

        keys
    }
}

impl std::fmt::Debug for JsObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsObject")
            .field("kind", &self.kind)
            .field("own", &self.table.read().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fast_array_in_bounds_write() {
        let arr = JsObject::array(3, None);
        arr.set_element(1, Value::number(7.0)).unwrap();
        assert_eq!(arr.array_length(), 3);
        assert_eq!(arr.element(1), Some(Value::number(7.0)));
    }

    #[test]
    fn test_fast_array_append_extends_length() {
        let arr = JsObject::array(2, None);
        arr.set_element(2, Value::number(1.0)).unwrap();
        assert_eq!(arr.array_length(), 3);
        assert!(arr.is_fast_array());
    }

    #[test]
    fn test_sparse_write_demotes() {
        let arr = JsObject::array(1, None);
        arr.set_element(10, Value::number(5.0)).unwrap();
        assert!(!arr.is_fast_array());
        assert_eq!(arr.array_length(), 11);
        let (desc, _) = arr.own_descriptor(&PropertyKey::Index(10)).unwrap();
        assert_eq!(desc.value(), Some(&Value::number(5.0)));
    }

    #[test]
    fn test_pop_on_empty() {
        let arr = JsObject::array(0, None);
        assert!(arr.pop_element().is_undefined());
        assert_eq!(arr.array_length(), 0);
    }

    #[test]
    fn test_proto_cycle_refused() {
        let a = JsObject::plain(None);
        let b = JsObject::plain(Some(a.clone()));
        assert!(a.set_prototype(Some(b)).is_err());
        assert!(a.set_prototype(Some(a.clone())).is_err());
    }

    #[test]
    fn test_whiteout_masks_shared_entry() {
        let mut shared = PropertyTable::new();
        shared.insert(
            PropertyKey::string("inherited"),
            PropertyDescriptor::data(Value::number(1.0)),
        );
        let obj = JsObject::with_shared_table(ObjectKind::Plain, None, Arc::new(shared));

        let (desc, from_shared) = obj
            .own_descriptor(&PropertyKey::string("inherited"))
            .unwrap();
        assert!(from_shared);
        assert!(!desc.is_whiteout());

        obj.whiteout(PropertyKey::string("inherited"));
        let (desc, from_shared) = obj
            .own_descriptor(&PropertyKey::string("inherited"))
            .unwrap();
        assert!(!from_shared);
        assert!(desc.is_whiteout());
    }

    #[test]
    fn test_not_extensible_rejects_new_keys() {
        let obj = JsObject::plain(None);
        obj.define_own(
            PropertyKey::string("a"),
            PropertyDescriptor::data(Value::null()),
        )
        .unwrap();
        obj.prevent_extensions();
        assert!(
            obj.define_own(
                PropertyKey::string("b"),
                PropertyDescriptor::data(Value::null())
            )
            .is_err()
        );
        // Existing keys may still be replaced
        obj.define_own(
            PropertyKey::string("a"),
            PropertyDescriptor::data(Value::number(2.0)),
        )
        .unwrap();
    }

    #[test]
    fn test_own_keys_order() {
        let arr = JsObject::array(2, None);
        arr.set_element(0, Value::number(0.0)).unwrap();
        arr.set_element(1, Value::number(1.0)).unwrap();
        arr.define_own(
            PropertyKey::string("name"),
            PropertyDescriptor::data(Value::null()),
        )
        .unwrap();

        let keys = arr.own_keys(IterFilter::Enumerable);
        assert_eq!(keys[0], PropertyKey::Index(0));
        assert_eq!(keys[1], PropertyKey::Index(1));
        assert_eq!(keys[2].to_display_string(), "name");
    }
}
