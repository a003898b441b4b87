//! Property tables
//!
//! An ordered mapping of property key → descriptor. Insertion order is
//! preserved and exposed by enumeration. The same table type backs both
//! per-instance tables and the shared (prototype-pool) tables that are
//! cloned on first write.

use indexmap::IndexMap;
use std::sync::Arc;

use crate::error::VmResult;
use crate::string::JsString;
use crate::symbol::JsSymbol;
use crate::value::Value;

/// A property key: string, symbol or integer index
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum PropertyKey {
    /// String key
    String(JsString),
    /// Symbol key (identity)
    Symbol(Arc<JsSymbol>),
    /// Integer index (canonical array index)
    Index(u32),
}

impl PropertyKey {
    /// Create a string key
    pub fn string(s: &str) -> Self {
        // Canonical integer strings become index keys so "0" and [0] alias
        if let Some(index) = canonical_index(s) {
            return Self::Index(index);
        }
        Self::String(JsString::new(s))
    }

    /// Create an index key
    pub const fn index(i: u32) -> Self {
        Self::Index(i)
    }

    /// The index if this is an integer key
    pub fn as_index(&self) -> Option<u32> {
        match self {
            Self::Index(i) => Some(*i),
            _ => None,
        }
    }

    /// Render for error messages and enumeration
    pub fn to_display_string(&self) -> String {
        match self {
            Self::String(s) => s.as_str().to_string(),
            Self::Symbol(s) => s.to_string(),
            Self::Index(i) => i.to_string(),
        }
    }
}

impl From<&str> for PropertyKey {
    fn from(s: &str) -> Self {
        Self::string(s)
    }
}

impl From<u32> for PropertyKey {
    fn from(i: u32) -> Self {
        Self::Index(i)
    }
}

/// Parse a canonical array index ("0", "42"; not "01", not "4294967295")
fn canonical_index(s: &str) -> Option<u32> {
    if s.is_empty() || (s.len() > 1 && s.starts_with('0')) {
        return None;
    }
    let n: u32 = s.parse().ok()?;
    if n == u32::MAX {
        return None; // 2^32 - 1 is not a valid array index
    }
    Some(n)
}

/// Property attributes
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PropertyAttributes {
    /// Value may be replaced by assignment
    pub writable: bool,
    /// Visible to for-in / keys()
    pub enumerable: bool,
    /// May be deleted or redefined
    pub configurable: bool,
}

impl PropertyAttributes {
    /// Default data property attributes (all true)
    pub const fn data() -> Self {
        Self {
            writable: true,
            enumerable: true,
            configurable: true,
        }
    }

    /// Built-in method attributes: writable, configurable, not enumerable
    pub const fn builtin() -> Self {
        Self {
            writable: true,
            enumerable: false,
            configurable: true,
        }
    }

    /// Fully locked
    pub const fn frozen() -> Self {
        Self {
            writable: false,
            enumerable: false,
            configurable: false,
        }
    }
}

impl Default for PropertyAttributes {
    fn default() -> Self {
        Self::data()
    }
}

/// Handler callback for dynamic properties
///
/// `holder` is the object the access went through, `magic` the word stored
/// in the descriptor, `setval` is `Some` for stores and `None` for loads.
/// Used for built-in dynamic properties (`Array.length`) and host externals.
pub type HandlerFn = Arc<
    dyn Fn(
            &mut crate::context::NativeCtx<'_>,
            &Value,
            u32,
            Option<&Value>,
        ) -> VmResult<Value>
        + Send
        + Sync,
>;

/// A property descriptor
#[derive(Clone)]
pub enum PropertyDescriptor {
    /// Plain data property
    Data {
        /// Stored value
        value: Value,
        /// Attributes
        attributes: PropertyAttributes,
    },
    /// Accessor property
    Accessor {
        /// Getter function value
        get: Option<Value>,
        /// Setter function value
        set: Option<Value>,
        /// Attributes
        attributes: PropertyAttributes,
    },
    /// Callback-backed dynamic property
    Handler {
        /// Load handler
        get: Option<HandlerFn>,
        /// Store handler
        set: Option<HandlerFn>,
        /// Word passed through to the handlers
        magic: u32,
        /// Attributes
        attributes: PropertyAttributes,
    },
    /// Tombstone masking a shadowed shared-table entry
    Whiteout,
}

impl std::fmt::Debug for PropertyDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Data { value, .. } => write!(f, "Data({value:?})"),
            Self::Accessor { get, set, .. } => {
                write!(f, "Accessor(get={}, set={})", get.is_some(), set.is_some())
            }
            Self::Handler { magic, .. } => write!(f, "Handler(magic={magic})"),
            Self::Whiteout => write!(f, "Whiteout"),
        }
    }
}

impl PropertyDescriptor {
    /// Data property with default attributes
    pub fn data(value: Value) -> Self {
        Self::Data {
            value,
            attributes: PropertyAttributes::data(),
        }
    }

    /// Data property with explicit attributes
    pub fn data_with_attrs(value: Value, attributes: PropertyAttributes) -> Self {
        Self::Data { value, attributes }
    }

    /// Built-in method descriptor (non-enumerable)
    pub fn builtin(value: Value) -> Self {
        Self::Data {
            value,
            attributes: PropertyAttributes::builtin(),
        }
    }

    /// The stored value for data properties
    pub fn value(&self) -> Option<&Value> {
        match self {
            Self::Data { value, .. } => Some(value),
            _ => None,
        }
    }

    /// Attribute set; whiteouts report frozen
    pub fn attributes(&self) -> PropertyAttributes {
        match self {
            Self::Data { attributes, .. }
            | Self::Accessor { attributes, .. }
            | Self::Handler { attributes, .. } => *attributes,
            Self::Whiteout => PropertyAttributes::frozen(),
        }
    }

    /// Whether assignment may replace the value
    pub fn is_writable(&self) -> bool {
        match self {
            Self::Data { attributes, .. } => attributes.writable,
            Self::Handler { set, .. } => set.is_some(),
            Self::Accessor { .. } | Self::Whiteout => false,
        }
    }

    /// Whether this is the tombstone
    pub fn is_whiteout(&self) -> bool {
        matches!(self, Self::Whiteout)
    }
}

/// Enumeration filter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IterFilter {
    /// Only enumerable properties
    Enumerable,
    /// Everything (spec-internal walks)
    All,
}

/// Insertion-ordered property table
#[derive(Clone, Default)]
pub struct PropertyTable {
    entries: IndexMap<PropertyKey, PropertyDescriptor>,
}

impl PropertyTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Find a descriptor
    pub fn find(&self, key: &PropertyKey) -> Option<&PropertyDescriptor> {
        self.entries.get(key)
    }

    /// Insert a descriptor, preserving insertion order for new keys
    pub fn insert(&mut self, key: PropertyKey, descriptor: PropertyDescriptor) {
        self.entries.insert(key, descriptor);
    }

    /// Replace an existing descriptor in place; true when the key existed
    pub fn replace(&mut self, key: &PropertyKey, descriptor: PropertyDescriptor) -> bool {
        match self.entries.get_mut(key) {
            Some(slot) => {
                *slot = descriptor;
                true
            }
            None => false,
        }
    }

    /// Remove a key; preserves the order of the remaining entries
    pub fn delete(&mut self, key: &PropertyKey) -> bool {
        self.entries.shift_remove(key).is_some()
    }

    /// Iterate in insertion order under a filter; whiteouts are skipped
    pub fn iterate(
        &self,
        filter: IterFilter,
    ) -> impl Iterator<Item = (&PropertyKey, &PropertyDescriptor)> {
        self.entries.iter().filter(move |(_, desc)| {
            if desc.is_whiteout() {
                return false;
            }
            match filter {
                IterFilter::All => true,
                IterFilter::Enumerable => desc.attributes().enumerable,
            }
        })
    }

    /// Iterate every entry in insertion order, whiteouts included.
    /// For-in needs whiteout keys so a tombstone can block an inherited
    /// name from reappearing.
    pub fn iter_all(&self) -> impl Iterator<Item = (&PropertyKey, &PropertyDescriptor)> {
        self.entries.iter()
    }

    /// Whether the table has a key (including whiteouts)
    pub fn contains(&self, key: &PropertyKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Number of entries, whiteouts included
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl std::fmt::Debug for PropertyTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PropertyTable")
            .field("len", &self.entries.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insertion_order_preserved() {
        let mut table = PropertyTable::new();
        table.insert(PropertyKey::string("b"), PropertyDescriptor::data(Value::number(1.0)));
        table.insert(PropertyKey::string("a"), PropertyDescriptor::data(Value::number(2.0)));
        table.insert(PropertyKey::string("c"), PropertyDescriptor::data(Value::number(3.0)));

        let keys: Vec<String> = table
            .iterate(IterFilter::All)
            .map(|(k, _)| k.to_display_string())
            .collect();
        assert_eq!(keys, vec!["b", "a", "c"]);
    }

    #[test]
    fn test_delete_keeps_order() {
        let mut table = PropertyTable::new();
        for name in ["x", "y", "z"] {
            table.insert(PropertyKey::string(name), PropertyDescriptor::data(Value::null()));
        }
        table.delete(&PropertyKey::string("y"));

        let keys: Vec<String> = table
            .iterate(IterFilter::All)
            .map(|(k, _)| k.to_display_string())
            .collect();
        assert_eq!(keys, vec!["x", "z"]);
    }

    #[test]
    fn test_enumerable_filter() {
        let mut table = PropertyTable::new();
        table.insert(PropertyKey::string("pub"), PropertyDescriptor::data(Value::null()));
        table.insert(
            PropertyKey::string("hidden"),
            PropertyDescriptor::builtin(Value::null()),
        );

        assert_eq!(table.iterate(IterFilter::Enumerable).count(), 1);
        assert_eq!(table.iterate(IterFilter::All).count(), 2);
    }

    #[test]
    fn test_whiteout_skipped_by_iteration() {
        let mut table = PropertyTable::new();
        table.insert(PropertyKey::string("gone"), PropertyDescriptor::Whiteout);
        assert_eq!(table.iterate(IterFilter::All).count(), 0);
        assert!(table.contains(&PropertyKey::string("gone")));
    }

    #[test]
    fn test_canonical_index_keys() {
        assert_eq!(PropertyKey::string("0"), PropertyKey::Index(0));
        assert_eq!(PropertyKey::string("42"), PropertyKey::Index(42));
        // Non-canonical spellings stay strings
        assert!(matches!(PropertyKey::string("01"), PropertyKey::String(_)));
        assert!(matches!(PropertyKey::string("-1"), PropertyKey::String(_)));
        assert!(matches!(
            PropertyKey::string("4294967295"),
            PropertyKey::String(_)
        ));
    }

    #[test]
    fn test_replace_requires_existing() {
        let mut table = PropertyTable::new();
        assert!(!table.replace(
            &PropertyKey::string("a"),
            PropertyDescriptor::data(Value::null())
        ));
        table.insert(PropertyKey::string("a"), PropertyDescriptor::data(Value::null()));
        assert!(table.replace(
            &PropertyKey::string("a"),
            PropertyDescriptor::data(Value::number(1.0))
        ));
    }
}
