//! Per-VM shared state
//!
//! One `VmState` per VM instance, shared behind `Arc` between the
//! interpreter, native callees and the host runtime. Single-owner
//! resources (arena accounting, module table, symbol registry, job queue)
//! all hang off it; nothing here is process-global.

use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::{VmError, VmResult};
use crate::externals::ExternalRegistry;
use crate::heap::Heap;
use crate::memory::{DEFAULT_MEMORY_LIMIT, MemoryTracker};
use crate::module_registry::{ModuleLoaderFn, ModuleRegistry};
use crate::promise::{JobQueue, JsPromise};
use crate::realm::Realm;
use crate::symbol::SymbolRegistry;
use crate::value::Value;

/// Rejection tracker notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectionEvent {
    /// A promise was rejected with no handler attached
    Rejected,
    /// A previously reported rejection gained a handler
    Handled,
}

/// Host callback observing unhandled rejections
pub type RejectionTrackerFn = Arc<dyn Fn(&Arc<JsPromise>, &Value, RejectionEvent) + Send + Sync>;

/// Host-provided compiler hook backing `eval` (installed only when the
/// embedder opts into unsafe evaluation)
pub type EvalHookFn =
    Arc<dyn Fn(&str) -> Result<Arc<skink_vm_bytecode::Module>, String> + Send + Sync>;

/// Core configuration fixed at VM creation
#[derive(Debug, Clone)]
pub struct CoreOptions {
    /// Disable the module loader and filesystem-flavoured externals
    pub sandbox: bool,
    /// Arena limit in bytes
    pub memory_limit: usize,
    /// Maximum interpreter frame depth
    pub max_stack_depth: usize,
}

impl Default for CoreOptions {
    fn default() -> Self {
        Self {
            sandbox: false,
            memory_limit: DEFAULT_MEMORY_LIMIT,
            max_stack_depth: 1024,
        }
    }
}

/// Shared per-VM state
pub struct VmState {
    /// Intrinsics and global bindings
    pub realm: Realm,
    /// Symbol registry (well-known + `Symbol.for` table)
    pub symbols: SymbolRegistry,
    /// Allocation facade
    pub heap: Heap,
    /// Imported-module table
    pub modules: ModuleRegistry,
    /// Host-type prototypes
    pub externals: ExternalRegistry,
    /// Deferred script work (promise reactions, await resumes)
    pub jobs: JobQueue,
    /// Configuration
    pub options: CoreOptions,

    module_loader: RwLock<Option<ModuleLoaderFn>>,
    rejection_tracker: RwLock<Option<RejectionTrackerFn>>,
    eval_hook: RwLock<Option<EvalHookFn>>,
    unhandled_rejections: Mutex<Vec<(Arc<JsPromise>, Value)>>,
    errored: AtomicBool,
}

impl VmState {
    /// Create state for a new VM and install the intrinsics
    pub fn new(options: CoreOptions) -> Arc<Self> {
        let state = Arc::new(Self {
            realm: Realm::new(),
            symbols: SymbolRegistry::new(),
            heap: Heap::new(MemoryTracker::new(options.memory_limit)),
            modules: ModuleRegistry::new(),
            externals: ExternalRegistry::new(),
            jobs: JobQueue::new(),
            options,
            module_loader: RwLock::new(None),
            rejection_tracker: RwLock::new(None),
            eval_hook: RwLock::new(None),
            unhandled_rejections: Mutex::new(Vec::new()),
            errored: AtomicBool::new(false),
        });
        crate::intrinsics::install(&state);
        state
    }

    // ---- errored state ---------------------------------------------------

    /// Whether a fatal (memory/internal) error marked the VM errored
    pub fn is_errored(&self) -> bool {
        self.errored.load(Ordering::Relaxed)
    }

    /// Mark the VM errored; compilation is refused until reset
    pub fn mark_errored(&self) {
        self.errored.store(true, Ordering::Relaxed);
    }

    /// Host reset after a fatal error
    pub fn reset_errored(&self) {
        self.errored.store(false, Ordering::Relaxed);
    }

    /// Fail fast when the VM is errored
    pub fn check_usable(&self) -> VmResult<()> {
        if self.is_errored() {
            Err(VmError::internal(
                "VM is in an errored state; reset before further use",
            ))
        } else {
            Ok(())
        }
    }

    // ---- module loader ---------------------------------------------------

    /// Install the module resolver callback
    pub fn set_module_loader(&self, loader: ModuleLoaderFn) {
        *self.module_loader.write() = Some(loader);
    }

    /// The resolver, unless sandboxed
    pub fn module_loader(&self) -> Option<ModuleLoaderFn> {
        if self.options.sandbox {
            return None;
        }
        self.module_loader.read().clone()
    }

    // ---- eval hook -------------------------------------------------------

    /// Install the compiler hook backing `eval`
    pub fn set_eval_hook(&self, hook: EvalHookFn) {
        *self.eval_hook.write() = Some(hook);
    }

    /// The eval hook, when unsafe evaluation is permitted
    pub fn eval_hook(&self) -> Option<EvalHookFn> {
        self.eval_hook.read().clone()
    }

    // ---- rejection tracking ----------------------------------------------

    /// Install the rejection tracker callback
    pub fn set_rejection_tracker(&self, tracker: RejectionTrackerFn) {
        *self.rejection_tracker.write() = Some(tracker);
    }

    /// Reject a promise, recording it when no handler is attached
    pub fn reject_promise_tracked(&self, promise: &Arc<JsPromise>, reason: Value) {
        promise.reject(reason.clone());
        if !promise.is_handled() {
            self.unhandled_rejections
                .lock()
                .push((promise.clone(), reason.clone()));
            if let Some(tracker) = self.rejection_tracker.read().clone() {
                tracker(promise, &reason, RejectionEvent::Rejected);
            }
        }
    }

    /// A handler was attached: drop the promise from the unhandled list
    pub fn mark_rejection_handled(&self, promise: &Arc<JsPromise>) {
        promise.mark_handled();
        let mut list = self.unhandled_rejections.lock();
        if let Some(pos) = list.iter().position(|(p, _)| Arc::ptr_eq(p, promise)) {
            let (p, reason) = list.remove(pos);
            drop(list);
            if let Some(tracker) = self.rejection_tracker.read().clone() {
                tracker(&p, &reason, RejectionEvent::Handled);
            }
        }
    }

    /// Drain the unhandled-rejection list (macrotask boundary)
    pub fn take_unhandled_rejections(&self) -> Vec<(Arc<JsPromise>, Value)> {
        std::mem::take(&mut *self.unhandled_rejections.lock())
    }

    /// Whether any rejections are pending unhandled
    pub fn has_unhandled_rejections(&self) -> bool {
        !self.unhandled_rejections.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_errored_gate() {
        let state = VmState::new(CoreOptions::default());
        assert!(state.check_usable().is_ok());
        state.mark_errored();
        assert!(state.check_usable().is_err());
        state.reset_errored();
        assert!(state.check_usable().is_ok());
    }

    #[test]
    fn test_unhandled_rejection_lifecycle() {
        let state = VmState::new(CoreOptions::default());
        let promise = JsPromise::new();

        state.reject_promise_tracked(&promise, Value::string("boom"));
        assert!(state.has_unhandled_rejections());

        state.mark_rejection_handled(&promise);
        assert!(!state.has_unhandled_rejections());
    }

    #[test]
    fn test_handled_rejection_not_recorded() {
        let state = VmState::new(CoreOptions::default());
        let promise = JsPromise::new();
        promise.mark_handled();
        state.reject_promise_tracked(&promise, Value::string("boom"));
        assert!(!state.has_unhandled_rejections());
    }

    #[test]
    fn test_sandbox_hides_loader() {
        let state = VmState::new(CoreOptions {
            sandbox: true,
            ..Default::default()
        });
        state.set_module_loader(Arc::new(|_, _| None));
        assert!(state.module_loader().is_none());
    }
}
