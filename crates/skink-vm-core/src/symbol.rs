//! Symbols and the per-VM symbol registry

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// A symbol: interned identity plus optional description
#[derive(Debug)]
pub struct JsSymbol {
    /// Unique ID within the owning VM
    pub id: u64,
    /// Description (`Symbol("desc")`)
    pub description: Option<String>,
}

impl PartialEq for JsSymbol {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for JsSymbol {}

impl std::hash::Hash for JsSymbol {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl std::fmt::Display for JsSymbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Symbol({})", self.description.as_deref().unwrap_or(""))
    }
}

/// Well-known symbols created at VM startup
#[derive(Debug, Clone)]
pub struct WellKnownSymbols {
    /// `Symbol.iterator`
    pub iterator: Arc<JsSymbol>,
    /// `Symbol.toPrimitive`
    pub to_primitive: Arc<JsSymbol>,
    /// `Symbol.toStringTag`
    pub to_string_tag: Arc<JsSymbol>,
}

/// Per-VM symbol registry
///
/// Owns the ID counter, the well-known symbols, and the `Symbol.for`
/// global-key table. Scoped to the VM so multiple VMs in one process stay
/// independent.
pub struct SymbolRegistry {
    next_id: AtomicU64,
    well_known: WellKnownSymbols,
    keyed: Mutex<FxHashMap<String, Arc<JsSymbol>>>,
}

impl SymbolRegistry {
    /// Create a registry with fresh well-known symbols
    pub fn new() -> Self {
        let next_id = AtomicU64::new(1);
        let mut make = |desc: &str| {
            Arc::new(JsSymbol {
                id: next_id.fetch_add(1, Ordering::Relaxed),
                description: Some(desc.to_string()),
            })
        };
        let well_known = WellKnownSymbols {
            iterator: make("Symbol.iterator"),
            to_primitive: make("Symbol.toPrimitive"),
            to_string_tag: make("Symbol.toStringTag"),
        };
        Self {
            next_id,
            well_known,
            keyed: Mutex::new(FxHashMap::default()),
        }
    }

    /// Create a fresh unique symbol
    pub fn create(&self, description: Option<String>) -> Arc<JsSymbol> {
        Arc::new(JsSymbol {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            description,
        })
    }

    /// `Symbol.for(key)`: one shared symbol per key
    pub fn keyed(&self, key: &str) -> Arc<JsSymbol> {
        let mut table = self.keyed.lock();
        if let Some(sym) = table.get(key) {
            return sym.clone();
        }
        let sym = Arc::new(JsSymbol {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            description: Some(key.to_string()),
        });
        table.insert(key.to_string(), sym.clone());
        sym
    }

    /// `Symbol.keyFor(sym)`
    pub fn key_for(&self, sym: &JsSymbol) -> Option<String> {
        self.keyed
            .lock()
            .iter()
            .find(|(_, s)| s.id == sym.id)
            .map(|(k, _)| k.clone())
    }

    /// The well-known symbols
    pub fn well_known(&self) -> &WellKnownSymbols {
        &self.well_known
    }
}

impl Default for SymbolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity() {
        let registry = SymbolRegistry::new();
        let a = registry.create(Some("x".into()));
        let b = registry.create(Some("x".into()));
        assert_ne!(a, b); // same description, distinct identity
        assert_eq!(a, a.clone());
    }

    #[test]
    fn test_keyed_symbols_shared() {
        let registry = SymbolRegistry::new();
        let a = registry.keyed("app.key");
        let b = registry.keyed("app.key");
        assert_eq!(a, b);
        assert_eq!(registry.key_for(&a), Some("app.key".to_string()));
    }

    #[test]
    fn test_registries_independent() {
        let r1 = SymbolRegistry::new();
        let r2 = SymbolRegistry::new();
        // IDs are per-VM; equal IDs across VMs must not alias observable state
        let a = r1.keyed("k");
        assert!(r2.key_for(&a).is_none());
    }
}
