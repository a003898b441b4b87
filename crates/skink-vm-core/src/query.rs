//! Property query
//!
//! Walks `base → __proto__ → …`, consulting each object's per-instance
//! table then its shared prototype-pool table, and classifies the access
//! for the interpreter. The query never invokes accessors or handlers;
//! the caller does, so re-entry stays in the dispatch loop.

use std::sync::Arc;

use crate::error::{VmError, VmResult};
use crate::object::{JsObject, MAX_PROTO_DEPTH, ObjectKind};
use crate::property::{PropertyDescriptor, PropertyKey};
use crate::realm::Realm;
use crate::value::Value;

/// Access mode of a query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryMode {
    /// Property read
    Get,
    /// Property write
    Set,
    /// `delete`
    Delete,
    /// `in`
    In,
}

/// Result of a property query
pub enum Lookup {
    /// A descriptor was found
    Found {
        /// The descriptor (cloned out of its table)
        descriptor: PropertyDescriptor,
        /// The object the descriptor lives on
        holder: Arc<JsObject>,
        /// Found on the base itself (not inherited)
        own: bool,
        /// Came from a prototype-pool shared table
        shared: bool,
    },
    /// Key absent along the whole chain
    Declined,
    /// Base is a primitive and the mode mutates: the operation is a no-op
    Primitive,
    /// Base is a string and the key is an integer index
    StringIndex {
        /// Character index
        index: u32,
    },
    /// Base is a fast array and the key is an integer index on the base
    ArrayIndex {
        /// Element index
        index: u32,
    },
    /// Base is a host external and the chain declined; the caller hands
    /// off to the host protocol
    External {
        /// Registered prototype id of the external
        proto_id: u32,
    },
}

impl std::fmt::Debug for Lookup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Found { own, shared, .. } => {
                write!(f, "Found(own={own}, shared={shared})")
            }
            Self::Declined => write!(f, "Declined"),
            Self::Primitive => write!(f, "Primitive"),
            Self::StringIndex { index } => write!(f, "StringIndex({index})"),
            Self::ArrayIndex { index } => write!(f, "ArrayIndex({index})"),
            Self::External { proto_id } => write!(f, "External({proto_id})"),
        }
    }
}

/// Query a property access
pub fn lookup(
    realm: &Realm,
    base: &Value,
    key: &PropertyKey,
    mode: QueryMode,
) -> VmResult<Lookup> {
    match base {
        Value::Object(obj) => walk(obj, key, true),
        Value::String(s) => {
            if let Some(index) = key.as_index() {
                return Ok(Lookup::StringIndex { index });
            }
            let _ = s;
            primitive_lookup(&realm.string_proto, key, mode)
        }
        Value::Number(_) => primitive_lookup(&realm.number_proto, key, mode),
        Value::Boolean(_) => primitive_lookup(&realm.boolean_proto, key, mode),
        Value::Symbol(_) => primitive_lookup(&realm.symbol_proto, key, mode),
        Value::Undefined | Value::Null => Err(VmError::type_error(format!(
            "cannot read properties of {} (reading '{}')",
            if base.is_null() { "null" } else { "undefined" },
            key.to_display_string()
        ))),
        Value::Hole | Value::Uninitialized => Err(VmError::internal(
            "property access on an internal sentinel",
        )),
    }
}

/// Reads on a primitive walk its wrapper prototype; mutations are no-ops
fn primitive_lookup(
    proto: &Arc<JsObject>,
    key: &PropertyKey,
    mode: QueryMode,
) -> VmResult<Lookup> {
    match mode {
        QueryMode::Get | QueryMode::In => walk(proto, key, false),
        QueryMode::Set | QueryMode::Delete => Ok(Lookup::Primitive),
    }
}

fn walk(start: &Arc<JsObject>, key: &PropertyKey, base_is_own: bool) -> VmResult<Lookup> {
    let mut current = start.clone();
    let mut own_level = base_is_own;
    let mut depth = 0;

    loop {
        if depth > MAX_PROTO_DEPTH {
            return Err(VmError::range_error("prototype chain too deep"));
        }
        depth += 1;

        // Fast array cells bypass the table
        if current.is_fast_array()
            && let Some(index) = key.as_index()
        {
            if own_level {
                return Ok(Lookup::ArrayIndex { index });
            }
            // Inherited fast-array element reads fold into Found
            if let Some(value) = current.element(index) {
                return Ok(Lookup::Found {
                    descriptor: PropertyDescriptor::data(value),
                    holder: current,
                    own: false,
                    shared: false,
                });
            }
        }

        if let Some((descriptor, shared)) = current.own_descriptor(key) {
            // A whiteout terminates the walk: the key is absent
            if descriptor.is_whiteout() {
                return Ok(Lookup::Declined);
            }
            return Ok(Lookup::Found {
                descriptor,
                holder: current,
                own: own_level,
                shared,
            });
        }

        match current.prototype() {
            Some(proto) => {
                current = proto;
                own_level = false;
            }
            None => {
                if own_level || base_is_own {
                    if let ObjectKind::External { proto_id, .. } = start.kind() {
                        return Ok(Lookup::External {
                            proto_id: *proto_id,
                        });
                    }
                }
                return Ok(Lookup::Declined);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::property::{PropertyTable, PropertyDescriptor};

    #[test]
    fn test_own_property_found() {
        let realm = Realm::new();
        let obj = JsObject::plain(None);
        obj.define_own(
            PropertyKey::string("a"),
            PropertyDescriptor::data(Value::number(1.0)),
        )
        .unwrap();

        let result = lookup(
            &realm,
            &Value::object(obj),
            &PropertyKey::string("a"),
            QueryMode::Get,
        )
        .unwrap();
        match result {
            Lookup::Found { own, shared, .. } => {
                assert!(own);
                assert!(!shared);
            }
            other => panic!("expected Found, got {other:?}"),
        }
    }

    #[test]
    fn test_inherited_property() {
        let realm = Realm::new();
        let proto = JsObject::plain(None);
        proto
            .define_own(
                PropertyKey::string("a"),
                PropertyDescriptor::data(Value::number(1.0)),
            )
            .unwrap();
        let obj = JsObject::plain(Some(proto.clone()));

        let result = lookup(
            &realm,
            &Value::object(obj),
            &PropertyKey::string("a"),
            QueryMode::Get,
        )
        .unwrap();
        match result {
            Lookup::Found { own, holder, .. } => {
                assert!(!own);
                assert!(Arc::ptr_eq(&holder, &proto));
            }
            other => panic!("expected Found, got {other:?}"),
        }
    }

    #[test]
    fn test_whiteout_stops_walk() {
        let realm = Realm::new();
        let mut shared = PropertyTable::new();
        shared.insert(
            PropertyKey::string("a"),
            PropertyDescriptor::data(Value::number(1.0)),
        );
        let obj = JsObject::with_shared_table(ObjectKind::Plain, None, Arc::new(shared));
        obj.whiteout(PropertyKey::string("a"));

        // The whiteout masks the shared entry even though the walk could
        // otherwise find it
        let result = lookup(
            &realm,
            &Value::object(obj),
            &PropertyKey::string("a"),
            QueryMode::Get,
        )
        .unwrap();
        assert!(matches!(result, Lookup::Declined));
    }

    #[test]
    fn test_string_index() {
        let realm = Realm::new();
        let result = lookup(
            &realm,
            &Value::string("abc"),
            &PropertyKey::Index(1),
            QueryMode::Get,
        )
        .unwrap();
        assert!(matches!(result, Lookup::StringIndex { index: 1 }));
    }

    #[test]
    fn test_primitive_set_is_noop() {
        let realm = Realm::new();
        let result = lookup(
            &realm,
            &Value::number(3.0),
            &PropertyKey::string("x"),
            QueryMode::Set,
        )
        .unwrap();
        assert!(matches!(result, Lookup::Primitive));
    }

    #[test]
    fn test_nullish_base_is_type_error() {
        let realm = Realm::new();
        assert!(
            lookup(
                &realm,
                &Value::null(),
                &PropertyKey::string("x"),
                QueryMode::Get
            )
            .is_err()
        );
    }

    #[test]
    fn test_fast_array_index() {
        let realm = Realm::new();
        let arr = JsObject::array(3, None);
        let result = lookup(
            &realm,
            &Value::object(arr),
            &PropertyKey::Index(2),
            QueryMode::Get,
        )
        .unwrap();
        assert!(matches!(result, Lookup::ArrayIndex { index: 2 }));
    }

    #[test]
    fn test_deep_chain_capped() {
        let realm = Realm::new();
        let mut current = JsObject::plain(None);
        for _ in 0..(MAX_PROTO_DEPTH + 2) {
            current = JsObject::plain(Some(current));
        }
        let result = lookup(
            &realm,
            &Value::object(current),
            &PropertyKey::string("missing"),
            QueryMode::Get,
        );
        assert!(matches!(result, Err(VmError::Range(_))));
    }
}
