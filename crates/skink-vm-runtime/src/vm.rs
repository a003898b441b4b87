//! The embedding facade
//!
//! One `Vm` owns the shared state, the interpreter, the execution context
//! and the event loop. The host drives it: compile, start, drain the
//! loop, invoke script functions, inject globals and host types.

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::any::Any;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use skink_vm_bytecode::Module;
use skink_vm_compiler::CompileError;
use skink_vm_core::async_context::RunOutcome;
use skink_vm_core::context::{NativeCtx, VmContext};
use skink_vm_core::error::{VmError, VmResult};
use skink_vm_core::externals::{ExternalDescriptor, ExternalProtoId};
use skink_vm_core::interpreter::Interpreter;
use skink_vm_core::intrinsics::helpers as intrinsic;
use skink_vm_core::module_registry::ModuleLoaderFn;
use skink_vm_core::object::{JsObject, ObjectKind};
use skink_vm_core::promise::JsPromise;
use skink_vm_core::property::{PropertyDescriptor, PropertyKey};
use skink_vm_core::state::{CoreOptions, RejectionTrackerFn, VmState};
use skink_vm_core::value::Value;
use thiserror::Error;

use crate::event_loop::EventLoop;
use crate::options::VmOptions;

/// Host-facing failures: compile-time or run-time
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// Compilation failed
    #[error(transparent)]
    Compile(#[from] CompileError),
    /// Execution failed
    #[error(transparent)]
    Vm(#[from] VmError),
}

/// A VM instance: single-threaded cooperative; drive it from one thread
pub struct Vm {
    state: Arc<VmState>,
    interp: Interpreter,
    ctx: VmContext,
    event_loop: Arc<EventLoop>,
    options: VmOptions,
    /// Callbacks parked on host-managed timers (`ops` vtable mode)
    host_timers: Arc<Mutex<FxHashMap<u64, (Value, Vec<Value>)>>>,
}

impl Vm {
    /// Create a VM with the given options
    pub fn new(options: VmOptions) -> VmResult<Self> {
        let max_stack_depth = options.max_stack_depth();
        let state = VmState::new(CoreOptions {
            sandbox: options.sandbox,
            memory_limit: options.memory_limit,
            max_stack_depth,
        });
        let interp = Interpreter::new(state.clone());

        if options.unsafe_eval {
            state.set_eval_hook(Arc::new(|source| {
                skink_vm_compiler::compile(source, "<eval>")
                    .map(Arc::new)
                    .map_err(|e| e.to_string())
            }));
        }

        let mut vm = Self {
            state,
            interp,
            ctx: VmContext::new(max_stack_depth),
            event_loop: Arc::new(EventLoop::new()),
            options,
            host_timers: Arc::new(Mutex::new(FxHashMap::default())),
        };

        vm.install_timers();
        vm.install_process();
        vm.install_addons()?;
        tracing::debug!(options = ?vm.options, "vm created");
        Ok(vm)
    }

    /// Shared state (realm, modules, jobs)
    pub fn state(&self) -> &Arc<VmState> {
        &self.state
    }

    /// Opaque host pointer from the options
    pub fn host_data(&self) -> Option<Arc<dyn Any + Send + Sync>> {
        self.options.external.clone()
    }

    /// The last uncaught exception, if any
    pub fn exception(&self) -> Option<Value> {
        self.ctx.exception.clone()
    }

    /// Handle for cooperative cancellation from another thread
    pub fn interrupt_handle(&self) -> Arc<std::sync::atomic::AtomicBool> {
        self.ctx.interrupt_flag()
    }

    /// Reset after a fatal (memory/internal) error
    pub fn reset(&self) {
        self.state.reset_errored();
    }

    // ======================================================================
    // Compilation
    // ======================================================================

    /// Compile source, resolving and registering its import graph
    pub fn compile(&mut self, source: &str, name: &str) -> Result<Arc<Module>, RuntimeError> {
        self.state.check_usable()?;
        let as_module = self.options.module
            || Path::new(name).extension().is_some_and(|e| e == "mjs");
        let module = if as_module {
            skink_vm_compiler::compile_module(source, name)?
        } else {
            skink_vm_compiler::compile(source, name)?
        };

        if self.options.disassemble {
            println!("{}", skink_vm_bytecode::disasm::disassemble(&module));
        }

        let module = Arc::new(module);
        self.resolve_imports(&module, name)?;
        Ok(module)
    }

    /// Depth-first resolution of the import graph at compile time; the
    /// loader populates module handles before execution begins.
    fn resolve_imports(&mut self, module: &Arc<Module>, base: &str) -> Result<(), RuntimeError> {
        for specifier in module.imports.clone() {
            if self.state.modules.is_registered(&specifier) {
                continue;
            }
            let Some(loader) = self.state.module_loader() else {
                return Err(RuntimeError::Vm(VmError::reference_error(format!(
                    "cannot resolve module \"{specifier}\": no module loader installed"
                ))));
            };
            let Some(resolved) = loader(&specifier, base) else {
                return Err(RuntimeError::Vm(VmError::reference_error(format!(
                    "cannot find module \"{specifier}\""
                ))));
            };
            let imported = Arc::new(skink_vm_compiler::compile_module(
                &resolved.source,
                &resolved.path,
            )?);
            self.state.modules.register(&specifier, imported.clone());
            if self.options.disassemble {
                println!("{}", skink_vm_bytecode::disasm::disassemble(&imported));
            }
            self.resolve_imports(&imported, &resolved.path)?;
        }
        Ok(())
    }

    // ======================================================================
    // Execution
    // ======================================================================

    /// Run a compiled module. A top level that suspends returns its
    /// pending promise; the event loop completes it.
    pub fn start(&mut self, module: Arc<Module>) -> Result<Value, RuntimeError> {
        let outcome = self.interp.execute_module(&mut self.ctx, module);
        let value = match outcome {
            Ok(RunOutcome::Complete(value)) => value,
            Ok(RunOutcome::Suspended(actx)) => {
                let promise = actx.result_promise.clone();
                self.interp.park(actx);
                self.wrap_promise(promise)?
            }
            Err(e) => {
                if e.is_fatal() {
                    self.state.mark_errored();
                }
                return Err(e.into());
            }
        };
        self.drain_jobs()?;
        Ok(value)
    }

    /// Re-enter the interpreter for a host-initiated call
    pub fn invoke(&mut self, function: &Value, args: &[Value]) -> Result<Value, RuntimeError> {
        let result = self
            .interp
            .call_value(&mut self.ctx, function, &Value::undefined(), args)?;
        self.drain_jobs()?;
        Ok(result)
    }

    /// Inject a global binding
    pub fn bind(&self, name: &str, value: Value) {
        let _ = self.state.realm.global.define_own(
            PropertyKey::string(name),
            PropertyDescriptor::data(value),
        );
    }

    /// Read a global: a top-level binding cell first, then the global
    /// object through the full property protocol
    pub fn global(&mut self, name: &str) -> VmResult<Value> {
        if let Some(cell) = self.state.realm.lookup_global_cell(name) {
            return Ok(cell.get());
        }
        let global = Value::object(self.state.realm.global.clone());
        self.interp
            .get_property(&mut self.ctx, &global, &PropertyKey::string(name))
    }

    /// Install the module resolver
    pub fn set_module_loader(&self, loader: ModuleLoaderFn) {
        self.state.set_module_loader(loader);
    }

    /// Install the rejection tracker
    pub fn set_rejection_tracker(&self, tracker: RejectionTrackerFn) {
        self.state.set_rejection_tracker(tracker);
    }

    /// Promises rejected with no handler attached, drained
    pub fn take_unhandled_rejections(&self) -> Vec<Value> {
        self.state
            .take_unhandled_rejections()
            .into_iter()
            .map(|(_, reason)| reason)
            .collect()
    }

    // ======================================================================
    // Host types
    // ======================================================================

    /// Register an external prototype from descriptors
    pub fn register_external_prototype(
        &self,
        descriptors: Vec<ExternalDescriptor>,
    ) -> ExternalProtoId {
        self.state.externals.register(
            descriptors,
            Some(self.state.realm.object_proto.clone()),
            Some(self.state.realm.function_proto.clone()),
        )
    }

    /// Wrap a host payload as an external value
    pub fn external_create(
        &self,
        id: ExternalProtoId,
        data: Arc<dyn Any + Send + Sync>,
    ) -> VmResult<Value> {
        self.state.externals.create(id, data)
    }

    /// Unwrap an external, validating its prototype
    pub fn external_unwrap(
        &self,
        value: &Value,
        id: ExternalProtoId,
    ) -> VmResult<Arc<dyn Any + Send + Sync>> {
        self.state.externals.unwrap(value, id)
    }

    // ======================================================================
    // Event loop
    // ======================================================================

    /// Drain pending jobs (microtasks) to exhaustion
    pub fn drain_jobs(&mut self) -> Result<(), RuntimeError> {
        while let Some(job) = self.state.jobs.dequeue() {
            self.interp.run_job(&mut self.ctx, job)?;
        }
        Ok(())
    }

    /// Run timers and jobs until nothing remains scheduled
    pub fn run_event_loop(&mut self) -> Result<(), RuntimeError> {
        loop {
            self.drain_jobs()?;
            let Some(timer) = self.event_loop.next_event() else {
                // A late job may have been enqueued by promise adoption
                if self.state.jobs.is_empty() {
                    return Ok(());
                }
                continue;
            };
            tracing::trace!(id = timer.id, "timer fired");
            if let Err(e) =
                self.interp
                    .call_value(&mut self.ctx, &timer.callback, &Value::undefined(), &timer.args)
            {
                let described = self.interp.error_value(&self.ctx, e);
                tracing::error!(error = %skink_vm_core::format::describe(&described),
                    "uncaught exception in timer callback");
            }
        }
    }

    /// Fire a host-managed timer (`ops` vtable mode)
    pub fn fire_timer(&mut self, id: u64) -> Result<(), RuntimeError> {
        let Some((callback, args)) = self.host_timers.lock().remove(&id) else {
            return Ok(());
        };
        self.interp
            .call_value(&mut self.ctx, &callback, &Value::undefined(), &args)?;
        self.drain_jobs()
    }

    // ======================================================================
    // Installation
    // ======================================================================

    fn wrap_promise(&self, promise: Arc<JsPromise>) -> VmResult<Value> {
        let obj = self.state.heap.alloc_object(
            ObjectKind::Promise(promise),
            Some(self.state.realm.promise_proto.clone()),
        )?;
        Ok(Value::object(obj))
    }

    fn install_timers(&mut self) {
        let state = &self.state;

        if let Some(ops) = self.options.ops.clone() {
            // Host-managed timers: park the callback, hand the id to the
            // host vtable
            let timers = self.host_timers.clone();
            let counter = Arc::new(Mutex::new(1u64));
            let ops_set = ops.clone();
            let set_counter = counter.clone();
            let set_timers = timers.clone();
            intrinsic::global(
                state,
                "setTimeout",
                intrinsic::native_fn(state, "setTimeout", 2, move |ncx, _this, args| {
                    let callback = args.first().cloned().unwrap_or_default();
                    let delay = match args.get(1) {
                        Some(value) => {
                            skink_vm_core::convert::to_number(ncx, value)?.max(0.0) as u64
                        }
                        None => 0,
                    };
                    let mut counter = set_counter.lock();
                    let id = *counter;
                    *counter += 1;
                    set_timers
                        .lock()
                        .insert(id, (callback, args.get(2..).unwrap_or_default().to_vec()));
                    ops_set.set_timer(id, delay);
                    Ok(Value::number(id as f64))
                }),
            );
            let ops_clear = ops;
            intrinsic::global(
                state,
                "clearTimeout",
                intrinsic::native_fn(state, "clearTimeout", 1, move |ncx, _this, args| {
                    if let Some(value) = args.first() {
                        let id = skink_vm_core::convert::to_number(ncx, value)? as u64;
                        timers.lock().remove(&id);
                        ops_clear.clear_timer(id);
                    }
                    Ok(Value::undefined())
                }),
            );
            return;
        }

        // Internal event loop
        let make_set = |repeating: bool, event_loop: Arc<EventLoop>| {
            move |ncx: &mut NativeCtx<'_>, _this: &Value, args: &[Value]| {
                let callback = args.first().cloned().unwrap_or_default();
                if !callback.is_function() {
                    return Err(VmError::type_error("timer callback is not a function"));
                }
                let delay = match args.get(1) {
                    Some(value) => Duration::from_millis(
                        skink_vm_core::convert::to_number(ncx, value)?.max(0.0) as u64,
                    ),
                    None => Duration::ZERO,
                };
                let rest = args.get(2..).unwrap_or_default().to_vec();
                let id = if repeating {
                    event_loop.set_interval(callback, rest, delay)
                } else {
                    event_loop.set_timeout(callback, rest, delay)
                };
                Ok(Value::number(id as f64))
            }
        };

        intrinsic::global(
            state,
            "setTimeout",
            intrinsic::native_fn(state, "setTimeout", 2, make_set(false, self.event_loop.clone())),
        );
        intrinsic::global(
            state,
            "setInterval",
            intrinsic::native_fn(state, "setInterval", 2, make_set(true, self.event_loop.clone())),
        );

        let event_loop = self.event_loop.clone();
        intrinsic::global(
            state,
            "setImmediate",
            intrinsic::native_fn(state, "setImmediate", 1, move |_ncx, _this, args| {
                let callback = args.first().cloned().unwrap_or_default();
                let rest = args.get(1..).unwrap_or_default().to_vec();
                Ok(Value::number(event_loop.set_immediate(callback, rest) as f64))
            }),
        );

        for name in ["clearTimeout", "clearInterval", "clearImmediate"] {
            let event_loop = self.event_loop.clone();
            intrinsic::global(
                state,
                name,
                intrinsic::native_fn(state, name, 1, move |ncx, _this, args| {
                    if let Some(value) = args.first() {
                        let id = skink_vm_core::convert::to_number(ncx, value)? as u64;
                        event_loop.clear(id);
                    }
                    Ok(Value::undefined())
                }),
            );
        }
    }

    fn install_process(&mut self) {
        let process = JsObject::plain(Some(self.state.realm.object_proto.clone()));
        let argv = JsObject::array(0, Some(self.state.realm.array_proto.clone()));
        for argument in &self.options.argv {
            let _ = argv.push_element(Value::string(argument.as_str()));
        }
        let _ = process.define_own(
            PropertyKey::string("argv"),
            PropertyDescriptor::data(Value::object(argv)),
        );
        self.bind("process", Value::object(process));
    }

    fn install_addons(&mut self) -> VmResult<()> {
        for addon in self.options.addons.clone() {
            let value = {
                let mut ncx = NativeCtx {
                    interp: &self.interp,
                    ctx: &mut self.ctx,
                };
                (addon.init)(&mut ncx)?
            };
            self.state.modules.register_evaluated(&addon.name, value);
            tracing::debug!(name = %addon.name, "addon registered");
        }
        Ok(())
    }
}

impl std::fmt::Debug for Vm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vm")
            .field("errored", &self.state.is_errored())
            .finish()
    }
}
