//! Per-VM module registry
//!
//! Imported modules are registered by name after compilation and
//! evaluated at most once: the first `Import` runs the entry lambda and
//! caches the exported value; later imports return the cache.

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::sync::Arc;

use skink_vm_bytecode::Module;

use crate::error::{VmError, VmResult};
use crate::value::Value;

/// State of a registered module
#[derive(Clone)]
enum ModuleSlot {
    /// Registered, not yet evaluated
    Registered(Arc<Module>),
    /// Evaluation in progress (cyclic import detector)
    Evaluating(Arc<Module>),
    /// Evaluated; the cached exported value
    Evaluated(Value),
}

/// Loader result: resolved source text plus its path
#[derive(Debug, Clone)]
pub struct ModuleSource {
    /// Source text
    pub source: String,
    /// Resolved path (becomes the module name)
    pub path: String,
}

/// Resolver callback installed by the host.
/// `(specifier, base)` → source, or `None` to decline.
pub type ModuleLoaderFn =
    Arc<dyn Fn(&str, &str) -> Option<ModuleSource> + Send + Sync>;

/// Per-VM table of imported modules; created lazily on first import
#[derive(Default)]
pub struct ModuleRegistry {
    table: Mutex<Option<FxHashMap<String, ModuleSlot>>>,
}

impl ModuleRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    fn with_table<R>(&self, f: impl FnOnce(&mut FxHashMap<String, ModuleSlot>) -> R) -> R {
        let mut guard = self.table.lock();
        f(guard.get_or_insert_with(FxHashMap::default))
    }

    /// Register a compiled module under its specifier
    pub fn register(&self, name: &str, module: Arc<Module>) {
        self.with_table(|table| {
            table
                .entry(name.to_string())
                .or_insert(ModuleSlot::Registered(module));
        });
    }

    /// Register an already-evaluated value (host addons)
    pub fn register_evaluated(&self, name: &str, value: Value) {
        self.with_table(|table| {
            table.insert(name.to_string(), ModuleSlot::Evaluated(value));
        });
    }

    /// Whether a specifier is known
    pub fn is_registered(&self, name: &str) -> bool {
        self.with_table(|table| table.contains_key(name))
    }

    /// The cached value, if the module already ran
    pub fn cached(&self, name: &str) -> Option<Value> {
        self.with_table(|table| match table.get(name) {
            Some(ModuleSlot::Evaluated(value)) => Some(value.clone()),
            _ => None,
        })
    }

    /// Begin evaluation: returns the module image, flipping the slot to
    /// `Evaluating`. Cyclic imports and unknown names fail here.
    pub fn begin_evaluation(&self, name: &str) -> VmResult<Arc<Module>> {
        self.with_table(|table| match table.get(name).cloned() {
            Some(ModuleSlot::Registered(module)) => {
                table.insert(name.to_string(), ModuleSlot::Evaluating(module.clone()));
                Ok(module)
            }
            Some(ModuleSlot::Evaluating(_)) => Err(VmError::syntax_error(format!(
                "cyclic import of module \"{name}\""
            ))),
            Some(ModuleSlot::Evaluated(_)) => Err(VmError::internal(format!(
                "module \"{name}\" already evaluated"
            ))),
            None => Err(VmError::reference_error(format!(
                "module \"{name}\" is not registered"
            ))),
        })
    }

    /// Record the exported value after a successful first evaluation
    pub fn finish_evaluation(&self, name: &str, value: Value) {
        self.with_table(|table| {
            table.insert(name.to_string(), ModuleSlot::Evaluated(value));
        });
    }

    /// Roll an `Evaluating` slot back so a failed module can be retried
    pub fn abort_evaluation(&self, name: &str) {
        self.with_table(|table| {
            if let Some(ModuleSlot::Evaluating(module)) = table.get(name).cloned() {
                table.insert(name.to_string(), ModuleSlot::Registered(module));
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn module(name: &str) -> Arc<Module> {
        Arc::new(Module::builder(name).build())
    }

    #[test]
    fn test_evaluate_once() {
        let registry = ModuleRegistry::new();
        registry.register("m", module("m"));

        assert!(registry.cached("m").is_none());
        registry.begin_evaluation("m").unwrap();
        registry.finish_evaluation("m", Value::number(42.0));
        assert_eq!(registry.cached("m"), Some(Value::number(42.0)));
    }

    #[test]
    fn test_cyclic_import_detected() {
        let registry = ModuleRegistry::new();
        registry.register("m", module("m"));
        registry.begin_evaluation("m").unwrap();
        assert!(registry.begin_evaluation("m").is_err());
    }

    #[test]
    fn test_unknown_module() {
        let registry = ModuleRegistry::new();
        assert!(registry.begin_evaluation("ghost").is_err());
    }

    #[test]
    fn test_abort_allows_retry() {
        let registry = ModuleRegistry::new();
        registry.register("m", module("m"));
        registry.begin_evaluation("m").unwrap();
        registry.abort_evaluation("m");
        assert!(registry.begin_evaluation("m").is_ok());
    }

    #[test]
    fn test_register_does_not_clobber() {
        let registry = ModuleRegistry::new();
        registry.register("m", module("m"));
        registry.begin_evaluation("m").unwrap();
        registry.finish_evaluation("m", Value::number(1.0));
        registry.register("m", module("m"));
        assert_eq!(registry.cached("m"), Some(Value::number(1.0)));
    }
}
