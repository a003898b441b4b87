//! Bytecode interpreter
//!
//! A match-dispatched loop over decoded instructions. Each step yields a
//! [`Step`]: fall through, jump, push a frame, return, throw into the
//! unwinder, or suspend on a promise. Suspension pops the awaiting frame
//! into an [`AsyncContext`]; mid-stack suspensions are parked on the
//! awaited promise while the caller keeps running with the pending
//! promise object, and entry-level suspensions surface to the host.

use rustc_hash::{FxHashMap, FxHashSet};
use std::sync::Arc;

use skink_vm_bytecode::{
    Constant, ErrorKind, Instruction, Lambda, LambdaIndex, Module, ScopeIndex, ScopeKind,
};

use crate::async_context::{AsyncContext, RunOutcome};
use crate::context::{CatchHandler, Frame, NativeCtx, PendingCall, VmContext};
use crate::convert::{self, Hint};
use crate::error::{VmError, VmResult};
use crate::object::{ForInIter, JsObject, MAX_PROTO_DEPTH, ObjectKind};
use crate::property::{PropertyAttributes, PropertyDescriptor, PropertyKey};
use crate::promise::{JsPromise, PromiseJob, PromiseState, Settlement};
use crate::query::{self, Lookup, QueryMode};
use crate::regexp::JsRegExp;
use crate::state::VmState;
use crate::string::JsString;
use crate::value::{
    ArgSpec, FunctionData, FunctionKind, NativeFn, NativeOutcome, SlotCell, Value,
};

/// Outcome of one instruction
enum Step {
    /// Advance to the next instruction
    Continue,
    /// Relative jump (offset from the current instruction)
    Jump(i32),
    /// Return from the current frame
    Return(Value),
    /// Enter the unwinder with a thrown value
    Throw(Value),
    /// Push a scripted frame and continue dispatch inside it
    Call(Box<Frame>),
    /// Suspend the current frame on a promise
    Suspend {
        awaited: Arc<JsPromise>,
        dst: ScopeIndex,
    },
}

/// The bytecode interpreter
pub struct Interpreter {
    state: Arc<VmState>,
}

impl Interpreter {
    /// Create an interpreter over shared VM state
    pub fn new(state: Arc<VmState>) -> Self {
        Self { state }
    }

    /// The shared VM state
    pub fn state(&self) -> &Arc<VmState> {
        &self.state
    }

    // ======================================================================
    // Entry points
    // ======================================================================

    /// Execute a compiled module's entry lambda to completion or first
    /// top-level suspension.
    pub fn execute_module(
        &self,
        ctx: &mut VmContext,
        module: Arc<Module>,
    ) -> VmResult<RunOutcome> {
        self.state.check_usable()?;
        let lambda = Arc::new(
            module
                .entry()
                .ok_or_else(|| VmError::internal("module has no entry lambda"))?
                .clone(),
        );
        let consts = Arc::new(self.decode_constants(&module)?);
        let globals = Arc::new(self.link_globals(&module));
        let frame = self.blank_frame(
            ctx,
            lambda,
            module,
            consts,
            globals,
            Vec::new(),
            Vec::new(),
            Value::undefined(),
            None,
            false,
            None,
        );
        let base = ctx.depth() + 1;
        ctx.push_frame(frame)?;
        self.run_loop(ctx, base, None)
    }

    /// Resume a suspended context with its awaited settlement. Settles the
    /// context's result promise and re-parks further suspensions.
    pub fn resume(
        &self,
        ctx: &mut VmContext,
        actx: AsyncContext,
        settlement: Settlement,
    ) -> VmResult<()> {
        let AsyncContext {
            frame,
            resume_slot,
            result_promise,
            ..
        } = actx;

        let base = ctx.depth() + 1;
        ctx.push_frame(frame)?;
        let injected = match settlement {
            Ok(value) => {
                self.store(ctx, resume_slot, value)?;
                None
            }
            Err(reason) => Some(Step::Throw(reason)),
        };

        match self.run_loop(ctx, base, injected) {
            Ok(RunOutcome::Complete(value)) => {
                // Return paths already settle the frame's promise; this is
                // a no-op then (promises settle once)
                result_promise.resolve(value);
                Ok(())
            }
            Ok(RunOutcome::Suspended(next)) => {
                self.park(next);
                Ok(())
            }
            Err(VmError::Thrown(reason)) => {
                self.state.reject_promise_tracked(&result_promise, *reason);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Run one deferred job from the queue. The host drains jobs to
    /// exhaustion between macro-events.
    pub fn run_job(&self, ctx: &mut VmContext, job: PromiseJob) -> VmResult<()> {
        match job {
            PromiseJob::Resume {
                context,
                settlement,
            } => self.resume(ctx, context, settlement),
            PromiseJob::Reaction {
                callback,
                settlement,
                derived,
            } => {
                if !callback.is_function() {
                    // No handler for this path: the settlement passes
                    // through to the derived promise unchanged
                    match settlement {
                        Ok(value) => derived.resolve(value),
                        Err(reason) => self.state.reject_promise_tracked(&derived, reason),
                    }
                    return Ok(());
                }
                let arg = match &settlement {
                    Ok(value) => value.clone(),
                    Err(reason) => reason.clone(),
                };
                match self.call_value(ctx, &callback, &Value::undefined(), &[arg]) {
                    Ok(result) => {
                        // Promise results are adopted so chains flatten
                        if let Some(inner) = result
                            .as_object()
                            .and_then(|o| match o.kind() {
                                ObjectKind::Promise(p) => Some(p.clone()),
                                _ => None,
                            })
                        {
                            let state = self.state.clone();
                            inner.on_settle(move |s| match s {
                                Ok(value) => derived.resolve(value),
                                Err(reason) => {
                                    state.reject_promise_tracked(&derived, reason);
                                }
                            });
                        } else {
                            derived.resolve(result);
                        }
                        Ok(())
                    }
                    Err(e) => {
                        let reason = self.error_value(ctx, e);
                        self.state.reject_promise_tracked(&derived, reason);
                        Ok(())
                    }
                }
            }
        }
    }

    /// Park a suspended context on its awaited promise; when the promise
    /// settles, a `Resume` job is enqueued in registration order.
    pub fn park(&self, actx: AsyncContext) {
        let state = self.state.clone();
        let awaited = actx.awaited.clone();
        awaited.on_settle(move |settlement| {
            state.jobs.enqueue(PromiseJob::Resume {
                context: actx,
                settlement,
            });
        });
    }

    /// Re-enter the interpreter for a host- or native-initiated call
    pub fn call_value(
        &self,
        ctx: &mut VmContext,
        callee: &Value,
        this: &Value,
        args: &[Value],
    ) -> VmResult<Value> {
        let pending = PendingCall {
            callee: callee.clone(),
            this: this.clone(),
            args: args.to_vec(),
            is_ctor: false,
            ctor_this: None,
        };
        self.invoke(ctx, pending, None)
    }

    /// Construct (`new callee(...args)`) from host code
    pub fn construct_value(
        &self,
        ctx: &mut VmContext,
        callee: &Value,
        args: &[Value],
    ) -> VmResult<Value> {
        let ctor_this = self.make_ctor_this(ctx, callee)?;
        let pending = PendingCall {
            callee: callee.clone(),
            this: ctor_this.clone(),
            args: args.to_vec(),
            is_ctor: true,
            ctor_this: Some(ctor_this),
        };
        self.invoke(ctx, pending, None)
    }

    /// Invoke a pending call synchronously: natives run in place; script
    /// frames run a nested dispatch loop. Async callees return their
    /// promise object immediately, parking any suspension.
    fn invoke(
        &self,
        ctx: &mut VmContext,
        pending: PendingCall,
        dst: Option<ScopeIndex>,
    ) -> VmResult<Value> {
        let setup = self.setup_call(ctx, pending, dst)?;
        match setup {
            CallSetup::Finished(value) => Ok(value),
            CallSetup::Suspended(promise) => {
                // Host-initiated call of a parking native: hand the host
                // the promise itself
                let obj = self.state.heap.alloc_object(
                    ObjectKind::Promise(promise),
                    Some(self.state.realm.promise_proto.clone()),
                )?;
                Ok(Value::object(obj))
            }
            CallSetup::Frame {
                frame,
                promise_object,
            } => {
                let base = ctx.depth() + 1;
                ctx.push_frame(*frame)?;
                match self.run_loop(ctx, base, None)? {
                    RunOutcome::Complete(value) => Ok(promise_object.unwrap_or(value)),
                    RunOutcome::Suspended(actx) => {
                        let promise_object = promise_object.ok_or_else(|| {
                            VmError::internal("synchronous callee suspended without a promise")
                        })?;
                        self.park(actx);
                        Ok(promise_object)
                    }
                }
            }
        }
    }

    // ======================================================================
    // The dispatch loop
    // ======================================================================

    /// Run until the frame stack drops below `base_depth`. `injected`
    /// replaces the first fetched step (used to throw into a resumed
    /// frame).
    fn run_loop(
        &self,
        ctx: &mut VmContext,
        base_depth: usize,
        mut injected: Option<Step>,
    ) -> VmResult<RunOutcome> {
        loop {
            let step = match injected.take() {
                Some(step) => step,
                None => {
                    // Cooperative cancellation surfaces as a synthesized
                    // RangeError throw; the flag stays set so catches
                    // cannot keep the VM alive
                    if ctx.is_interrupted() {
                        Step::Throw(self.make_error(ctx, ErrorKind::Range, "execution cancelled"))
                    } else {
                        let frame = ctx
                            .frame()
                            .ok_or_else(|| VmError::internal("dispatch without a frame"))?;
                        match frame.lambda.instructions.get(frame.pc).cloned() {
                            Some(instruction) => match self.execute(ctx, &instruction) {
                                Ok(step) => step,
                                Err(e) => {
                                    if e.is_fatal() {
                                        self.state.mark_errored();
                                    }
                                    Step::Throw(self.error_value(ctx, e))
                                }
                            },
                            // Ran off the end: implicit return
                            None => Step::Return(Value::undefined()),
                        }
                    }
                }
            };

            match step {
                Step::Continue => {
                    if let Some(frame) = ctx.frame_mut() {
                        frame.pc += 1;
                    }
                }
                Step::Jump(offset) => {
                    if let Some(frame) = ctx.frame_mut() {
                        frame.pc = (frame.pc as i64 + offset as i64) as usize;
                    }
                }
                Step::Call(frame) => {
                    // The caller resumes after the call instruction
                    if let Some(caller) = ctx.frame_mut() {
                        caller.pc += 1;
                    }
                    if let Err(e) = ctx.push_frame(*frame) {
                        injected = Some(Step::Throw(self.error_value(ctx, e)));
                    }
                }
                Step::Return(value) => {
                    if let Some(outcome) = self.handle_return(ctx, value, base_depth)? {
                        return Ok(outcome);
                    }
                }
                Step::Throw(exception) => {
                    if let Some(outcome) = self.unwind(ctx, exception, base_depth)? {
                        return Ok(outcome);
                    }
                }
                Step::Suspend { awaited, dst } => {
                    // Only async frames and the entry frame may park: a
                    // synchronous mid-stack frame has a caller waiting on
                    // its slot with no promise to observe
                    let is_entry = ctx.depth() == base_depth;
                    let is_async = ctx
                        .frame()
                        .is_some_and(|frame| frame.result_promise.is_some());
                    if !is_entry && !is_async {
                        injected = Some(Step::Throw(self.make_error(
                            ctx,
                            ErrorKind::Type,
                            "a native callee suspended inside a synchronous call",
                        )));
                        continue;
                    }
                    // Resume lands after the suspending instruction
                    if let Some(frame) = ctx.frame_mut() {
                        frame.pc += 1;
                    }
                    let mut frame = ctx
                        .pop_frame()
                        .ok_or_else(|| VmError::internal("suspend without a frame"))?;
                    let result_promise = match &frame.result_promise {
                        Some(p) => p.clone(),
                        None => {
                            // A synchronous top level suspended: it gains
                            // a promise the host can observe
                            let p = JsPromise::new();
                            frame.result_promise = Some(p.clone());
                            p
                        }
                    };
                    let actx = AsyncContext {
                        frame,
                        resume_slot: dst,
                        result_promise,
                        awaited,
                    };
                    if ctx.depth() < base_depth {
                        return Ok(RunOutcome::Suspended(actx));
                    }
                    // Mid-stack: the caller already holds the pending
                    // promise object in its destination slot
                    self.park(actx);
                }
            }
        }
    }

    /// Pop the returning frame and deliver its value. `Some` means the
    /// loop is done.
    fn handle_return(
        &self,
        ctx: &mut VmContext,
        value: Value,
        base_depth: usize,
    ) -> VmResult<Option<RunOutcome>> {
        let frame = ctx
            .pop_frame()
            .ok_or_else(|| VmError::internal("return without a frame"))?;

        // Constructors yield `this` unless the explicit return is an object
        let value = if frame.is_ctor && !value.is_object() {
            frame.this.clone()
        } else {
            value
        };

        let finished = ctx.depth() < base_depth;
        let result = if let Some(promise) = &frame.result_promise {
            promise.resolve(value.clone());
            // The caller's destination already holds the promise object
            if finished {
                Some(RunOutcome::Complete(value))
            } else {
                None
            }
        } else if finished {
            Some(RunOutcome::Complete(value))
        } else {
            if let Some(dst) = frame.dst
                && let Some(caller) = ctx.frame_mut()
            {
                caller.store(dst, value)?;
            }
            None
        };

        ctx.pool.release(frame);
        Ok(result)
    }

    /// Walk catch chains and frame boundaries with a thrown value.
    /// `Some` completes the loop (rejected async entry); `Err` is an
    /// uncaught exception at the entry boundary.
    fn unwind(
        &self,
        ctx: &mut VmContext,
        exception: Value,
        base_depth: usize,
    ) -> VmResult<Option<RunOutcome>> {
        self.attach_stack_if_missing(ctx, &exception);

        loop {
            let Some(frame) = ctx.frame_mut() else {
                ctx.exception = Some(exception.clone());
                return Err(VmError::thrown(exception));
            };

            if let Some(handler) = frame.catch_chain.pop() {
                frame.pc = handler.pc;
                // Drop calls whose argument evaluation threw
                frame.pending.truncate(handler.pending);
                ctx.pending_exception = Some(exception);
                return Ok(None);
            }

            let frame = ctx.pop_frame().expect("frame checked above");
            let finished = ctx.depth() < base_depth;

            if let Some(promise) = &frame.result_promise {
                // An async frame swallows the exception into its promise;
                // the caller continues with the rejected promise object
                self.state
                    .reject_promise_tracked(promise, exception.clone());
                ctx.pool.release(frame);
                if finished {
                    return Ok(Some(RunOutcome::Complete(Value::undefined())));
                }
                return Ok(None);
            }

            ctx.pool.release(frame);
            if finished {
                ctx.exception = Some(exception.clone());
                return Err(VmError::thrown(exception));
            }
        }
    }

    // ======================================================================
    // Instruction execution
    // ======================================================================

    #[allow(clippy::too_many_lines)]
    fn execute(&self, ctx: &mut VmContext, instruction: &Instruction) -> VmResult<Step> {
        use Instruction as I;

        match instruction {
            // ---- move & load ------------------------------------------------
            I::Move { dst, src } => {
                let value = self.load(ctx, *src)?;
                self.store(ctx, *dst, value)?;
                Ok(Step::Continue)
            }
            I::Let { dst } => {
                self.store(ctx, *dst, Value::undefined())?;
                Ok(Step::Continue)
            }
            I::LetUpdate { dst, src } => {
                let value = self.load(ctx, *src)?;
                self.store(ctx, *dst, value)?;
                Ok(Step::Continue)
            }
            I::NotInitialized { dst } => {
                self.store(ctx, *dst, Value::uninitialized())?;
                Ok(Step::Continue)
            }
            I::InitializationTest { src, name } => {
                if self.load(ctx, *src)?.is_uninitialized() {
                    let name = self.const_string(ctx, name.0)?;
                    return Err(VmError::reference_error(format!(
                        "Cannot access '{name}' before initialization"
                    )));
                }
                Ok(Step::Continue)
            }
            I::GlobalGet { dst, name } => {
                let name = self.const_string(ctx, name.0)?;
                let value = self.global_get(ctx, &name)?;
                self.store(ctx, *dst, value)?;
                Ok(Step::Continue)
            }
            I::GlobalSet { name, src } => {
                let value = self.load(ctx, *src)?;
                let name = self.const_string(ctx, name.0)?;
                self.global_set(ctx, &name, value)?;
                Ok(Step::Continue)
            }
            I::This { dst } => {
                let this = self.frame(ctx)?.this.clone();
                self.store(ctx, *dst, this)?;
                Ok(Step::Continue)
            }
            I::Arguments { dst } => {
                let (args, argc) = {
                    let frame = self.frame(ctx)?;
                    (frame.args.clone(), frame.argc)
                };
                let arr = self.state.heap.alloc_array(0, Some(self.state.realm.array_proto.clone()))?;
                for value in args.into_iter().take(argc) {
                    arr.push_element(value)?;
                }
                self.store(ctx, *dst, Value::object(arr))?;
                Ok(Step::Continue)
            }

            // ---- arithmetic -------------------------------------------------
            I::Add { dst, lhs, rhs } => {
                let a = self.load(ctx, *lhs)?;
                let b = self.load(ctx, *rhs)?;
                let result = self.add_values(ctx, &a, &b)?;
                self.store(ctx, *dst, result)?;
                Ok(Step::Continue)
            }
            I::Sub { dst, lhs, rhs } => self.numeric_binop(ctx, *dst, *lhs, *rhs, |a, b| a - b),
            I::Mul { dst, lhs, rhs } => self.numeric_binop(ctx, *dst, *lhs, *rhs, |a, b| a * b),
            I::Div { dst, lhs, rhs } => self.numeric_binop(ctx, *dst, *lhs, *rhs, |a, b| a / b),
            I::Mod { dst, lhs, rhs } => {
                // JS % keeps the dividend's sign (not rem_euclid)
                self.numeric_binop(ctx, *dst, *lhs, *rhs, |a, b| a % b)
            }
            I::Pow { dst, lhs, rhs } => self.numeric_binop(ctx, *dst, *lhs, *rhs, f64::powf),
            I::BitAnd { dst, lhs, rhs } => self.int32_binop(ctx, *dst, *lhs, *rhs, |a, b| a & b),
            I::BitOr { dst, lhs, rhs } => self.int32_binop(ctx, *dst, *lhs, *rhs, |a, b| a | b),
            I::BitXor { dst, lhs, rhs } => self.int32_binop(ctx, *dst, *lhs, *rhs, |a, b| a ^ b),
            I::Shl { dst, lhs, rhs } => {
                self.int32_binop(ctx, *dst, *lhs, *rhs, |a, b| a << (b & 31))
            }
            I::Shr { dst, lhs, rhs } => {
                self.int32_binop(ctx, *dst, *lhs, *rhs, |a, b| a >> (b & 31))
            }
            I::Ushr { dst, lhs, rhs } => {
                let a = self.to_number_op(ctx, *lhs)?;
                let b = self.to_number_op(ctx, *rhs)?;
                let result = (convert::to_uint32(a) >> (convert::to_int32(b) & 31)) as f64;
                self.store(ctx, *dst, Value::number(result))?;
                Ok(Step::Continue)
            }
            I::Neg { dst, src } => {
                let n = self.to_number_op(ctx, *src)?;
                self.store(ctx, *dst, Value::number(-n))?;
                Ok(Step::Continue)
            }
            I::Plus { dst, src } => {
                let n = self.to_number_op(ctx, *src)?;
                self.store(ctx, *dst, Value::number(n))?;
                Ok(Step::Continue)
            }
            I::BitNot { dst, src } => {
                let n = self.to_number_op(ctx, *src)?;
                self.store(ctx, *dst, Value::number(!convert::to_int32(n) as f64))?;
                Ok(Step::Continue)
            }
            I::Not { dst, src } => {
                let truthy = self.load(ctx, *src)?.to_boolean();
                self.store(ctx, *dst, Value::boolean(!truthy))?;
                Ok(Step::Continue)
            }
            I::Inc { dst, src } => {
                let n = self.to_number_op(ctx, *src)?;
                self.store(ctx, *dst, Value::number(n + 1.0))?;
                Ok(Step::Continue)
            }
            I::Dec { dst, src } => {
                let n = self.to_number_op(ctx, *src)?;
                self.store(ctx, *dst, Value::number(n - 1.0))?;
                Ok(Step::Continue)
            }

            // ---- comparison -------------------------------------------------
            I::Eq { dst, lhs, rhs } => {
                let a = self.load(ctx, *lhs)?;
                let b = self.load(ctx, *rhs)?;
                let eq = self.with_ncx(ctx, |ncx| convert::loose_equals(ncx, &a, &b))?;
                self.store(ctx, *dst, Value::boolean(eq))?;
                Ok(Step::Continue)
            }
            I::Ne { dst, lhs, rhs } => {
                let a = self.load(ctx, *lhs)?;
                let b = self.load(ctx, *rhs)?;
                let eq = self.with_ncx(ctx, |ncx| convert::loose_equals(ncx, &a, &b))?;
                self.store(ctx, *dst, Value::boolean(!eq))?;
                Ok(Step::Continue)
            }
            I::StrictEq { dst, lhs, rhs } => {
                let a = self.load(ctx, *lhs)?;
                let b = self.load(ctx, *rhs)?;
                self.store(ctx, *dst, Value::boolean(convert::strict_equals(&a, &b)))?;
                Ok(Step::Continue)
            }
            I::StrictNe { dst, lhs, rhs } => {
                let a = self.load(ctx, *lhs)?;
                let b = self.load(ctx, *rhs)?;
                self.store(ctx, *dst, Value::boolean(!convert::strict_equals(&a, &b)))?;
                Ok(Step::Continue)
            }
            I::Lt { dst, lhs, rhs } => self.relational(ctx, *dst, *lhs, *rhs, Relation::Less),
            I::Le { dst, lhs, rhs } => self.relational(ctx, *dst, *lhs, *rhs, Relation::LessEq),
            I::Gt { dst, lhs, rhs } => self.relational(ctx, *dst, *lhs, *rhs, Relation::Greater),
            I::Ge { dst, lhs, rhs } => self.relational(ctx, *dst, *lhs, *rhs, Relation::GreaterEq),

            // ---- control flow -----------------------------------------------
            I::Jump { offset } => Ok(Step::Jump(offset.0)),
            I::JumpIfTrue { cond, offset } => {
                if self.load(ctx, *cond)?.to_boolean() {
                    Ok(Step::Jump(offset.0))
                } else {
                    Ok(Step::Continue)
                }
            }
            I::JumpIfFalse { cond, offset } => {
                if self.load(ctx, *cond)?.to_boolean() {
                    Ok(Step::Continue)
                } else {
                    Ok(Step::Jump(offset.0))
                }
            }
            I::JumpIfEqual { lhs, rhs, offset } => {
                let a = self.load(ctx, *lhs)?;
                let b = self.load(ctx, *rhs)?;
                if convert::strict_equals(&a, &b) {
                    Ok(Step::Jump(offset.0))
                } else {
                    Ok(Step::Continue)
                }
            }
            I::TestIfTrue { src, offset } => {
                if self.load(ctx, *src)?.to_boolean() {
                    Ok(Step::Jump(offset.0))
                } else {
                    Ok(Step::Continue)
                }
            }
            I::TestIfFalse { src, offset } => {
                if self.load(ctx, *src)?.to_boolean() {
                    Ok(Step::Continue)
                } else {
                    Ok(Step::Jump(offset.0))
                }
            }
            I::Coalesce { src, offset } => {
                if self.load(ctx, *src)?.is_nullish() {
                    Ok(Step::Continue)
                } else {
                    Ok(Step::Jump(offset.0))
                }
            }

            // ---- property access --------------------------------------------
            I::PropertyGet { dst, obj, key } => {
                let base = self.load(ctx, *obj)?;
                let key = self.key_operand(ctx, *key)?;
                let value = self.get_property(ctx, &base, &key)?;
                self.store(ctx, *dst, value)?;
                Ok(Step::Continue)
            }
            I::PropertySet { obj, key, src } => {
                let base = self.load(ctx, *obj)?;
                let key = self.key_operand(ctx, *key)?;
                let value = self.load(ctx, *src)?;
                self.set_property(ctx, &base, &key, value)?;
                Ok(Step::Continue)
            }
            I::PropertyInit { obj, key, src } => {
                let base = self.load(ctx, *obj)?;
                let key = self.key_operand(ctx, *key)?;
                let value = self.load(ctx, *src)?;
                let object = base
                    .as_object()
                    .ok_or_else(|| VmError::internal("PropertyInit on non-object"))?;
                if let (true, Some(index)) = (object.is_fast_array(), key.as_index()) {
                    object.set_element(index, value)?;
                } else {
                    object.define_own(key, PropertyDescriptor::data(value))?;
                }
                Ok(Step::Continue)
            }
            I::PropertyAccessor {
                obj,
                key,
                func,
                setter,
            } => {
                let base = self.load(ctx, *obj)?;
                let key = self.key_operand(ctx, *key)?;
                let func = self.load(ctx, *func)?;
                let object = base
                    .as_object()
                    .ok_or_else(|| VmError::internal("PropertyAccessor on non-object"))?;

                // Merge with an existing accessor half
                let (mut get, mut set) = match object.own_descriptor(&key) {
                    Some((PropertyDescriptor::Accessor { get, set, .. }, false)) => (get, set),
                    _ => (None, None),
                };
                if *setter {
                    set = Some(func);
                } else {
                    get = Some(func);
                }
                object.define_own(
                    key,
                    PropertyDescriptor::Accessor {
                        get,
                        set,
                        attributes: PropertyAttributes::data(),
                    },
                )?;
                Ok(Step::Continue)
            }
            I::PropertyDelete { dst, obj, key } => {
                let base = self.load(ctx, *obj)?;
                let key = self.key_operand(ctx, *key)?;
                let deleted = self.delete_property(ctx, &base, &key)?;
                self.store(ctx, *dst, Value::boolean(deleted))?;
                Ok(Step::Continue)
            }
            I::PropertyIn { dst, obj, key } => {
                let base = self.load(ctx, *obj)?;
                if !base.is_object() {
                    return Err(VmError::type_error(
                        "cannot use 'in' operator on a non-object",
                    ));
                }
                let key = self.key_operand(ctx, *key)?;
                let found = self.has_property(ctx, &base, &key)?;
                self.store(ctx, *dst, Value::boolean(found))?;
                Ok(Step::Continue)
            }
            I::PropertyForeach { dst, obj } => {
                let base = self.load(ctx, *obj)?;
                let keys = self.for_in_keys(&base)?;
                let iter = JsObject::new(
                    ObjectKind::ForInIterator(parking_lot::Mutex::new(ForInIter {
                        keys,
                        pos: 0,
                    })),
                    None,
                );
                self.store(ctx, *dst, Value::object(iter))?;
                Ok(Step::Continue)
            }
            I::PropertyNext { dst, iter, offset } => {
                let iter_value = self.load(ctx, *iter)?;
                let next = match iter_value.as_object().map(|o| o.kind()) {
                    Some(ObjectKind::ForInIterator(state)) => {
                        let mut state = state.lock();
                        let key = state.keys.get(state.pos).cloned();
                        state.pos += 1;
                        key
                    }
                    _ => return Err(VmError::internal("PropertyNext on non-iterator")),
                };
                match next {
                    Some(key) => {
                        self.store(ctx, *dst, Value::String(key))?;
                        Ok(Step::Jump(offset.0))
                    }
                    None => Ok(Step::Continue),
                }
            }
            I::ProtoInit { obj, src } => {
                let base = self.load(ctx, *obj)?;
                let proto = self.load(ctx, *src)?;
                let object = base
                    .as_object()
                    .ok_or_else(|| VmError::internal("ProtoInit on non-object"))?;
                match proto {
                    Value::Object(p) => object.set_prototype(Some(p))?,
                    Value::Null => object.set_prototype(None)?,
                    _ => {} // primitive __proto__ assignments are ignored
                }
                Ok(Step::Continue)
            }
            I::ToPropertyKey { dst, src } => {
                let value = self.load(ctx, *src)?;
                let key = if value.is_symbol() || value.is_string() || value.is_number() {
                    value
                } else {
                    self.with_ncx(ctx, |ncx| convert::to_primitive(ncx, &value, Hint::String))?
                };
                self.store(ctx, *dst, key)?;
                Ok(Step::Continue)
            }
            I::ToPropertyKeyChk { dst, src, base } => {
                let base_value = self.load(ctx, *base)?;
                if base_value.is_nullish() {
                    let key = self.load(ctx, *src)?;
                    return Err(VmError::type_error(format!(
                        "cannot read properties of {} (reading '{}')",
                        if base_value.is_null() { "null" } else { "undefined" },
                        crate::format::describe(&key)
                    )));
                }
                let value = self.load(ctx, *src)?;
                let key = if value.is_symbol() || value.is_string() || value.is_number() {
                    value
                } else {
                    self.with_ncx(ctx, |ncx| convert::to_primitive(ncx, &value, Hint::String))?
                };
                self.store(ctx, *dst, key)?;
                Ok(Step::Continue)
            }

            // ---- object creation --------------------------------------------
            I::Object { dst } => {
                let obj = self
                    .state
                    .heap
                    .alloc_plain(Some(self.state.realm.object_proto.clone()))?;
                self.store(ctx, *dst, Value::object(obj))?;
                Ok(Step::Continue)
            }
            I::Array { dst, len, ctor: _ } => {
                let arr = self
                    .state
                    .heap
                    .alloc_array(*len, Some(self.state.realm.array_proto.clone()))?;
                self.store(ctx, *dst, Value::object(arr))?;
                Ok(Step::Continue)
            }
            I::Function { dst, lambda } | I::FunctionCopy { dst, lambda } => {
                let value = self.instantiate_function(ctx, *lambda)?;
                self.store(ctx, *dst, value)?;
                Ok(Step::Continue)
            }
            I::Regexp { dst, pattern } => {
                let (pattern, flags) = {
                    let frame = self.frame(ctx)?;
                    match frame.module.constant(pattern.0)? {
                        Constant::Regexp { pattern, flags } => {
                            (pattern.to_string(), flags.to_string())
                        }
                        _ => return Err(VmError::internal("Regexp constant of wrong kind")),
                    }
                };
                let regexp = JsRegExp::new(&pattern, &flags)?;
                let obj = self.state.heap.alloc_object(
                    ObjectKind::Regexp(regexp),
                    Some(self.state.realm.regexp_proto.clone()),
                )?;
                self.store(ctx, *dst, Value::object(obj))?;
                Ok(Step::Continue)
            }
            I::TemplateLiteral { dst, src } => {
                let parts = self.load(ctx, *src)?;
                let arr = parts
                    .as_object()
                    .ok_or_else(|| VmError::internal("TemplateLiteral on non-array"))?;
                let mut out = String::new();
                for i in 0..arr.array_length() {
                    if let Some(part) = arr.element(i) {
                        let s = self.with_ncx(ctx, |ncx| convert::to_string(ncx, &part))?;
                        out.push_str(s.as_str());
                    }
                }
                let value = self.state.heap.alloc_string_owned(out)?;
                self.store(ctx, *dst, value)?;
                Ok(Step::Continue)
            }

            // ---- calls ------------------------------------------------------
            I::FunctionFrame { callee, argc, ctor } => {
                let callee = self.load(ctx, *callee)?;
                if !callee.is_function() {
                    return Err(VmError::type_error(format!(
                        "{} is not a function",
                        crate::format::describe(&callee)
                    )));
                }
                let (this, ctor_this) = if *ctor {
                    let this = self.make_ctor_this(ctx, &callee)?;
                    (this.clone(), Some(this))
                } else {
                    (Value::undefined(), None)
                };
                self.frame_mut(ctx)?.pending.push(PendingCall {
                    callee,
                    this,
                    args: Vec::with_capacity(*argc as usize),
                    is_ctor: *ctor,
                    ctor_this,
                });
                Ok(Step::Continue)
            }
            I::MethodFrame {
                obj,
                key,
                argc,
                ctor,
            } => {
                let base = self.load(ctx, *obj)?;
                let key = self.key_operand(ctx, *key)?;
                let callee = self.get_property(ctx, &base, &key)?;
                if !callee.is_function() {
                    return Err(VmError::type_error(format!(
                        "{} is not a function",
                        key.to_display_string()
                    )));
                }
                let (this, ctor_this) = if *ctor {
                    let this = self.make_ctor_this(ctx, &callee)?;
                    (this.clone(), Some(this))
                } else {
                    (base, None)
                };
                self.frame_mut(ctx)?.pending.push(PendingCall {
                    callee,
                    this,
                    args: Vec::with_capacity(*argc as usize),
                    is_ctor: *ctor,
                    ctor_this,
                });
                Ok(Step::Continue)
            }
            I::PutArg { src } => {
                let value = self.load(ctx, *src)?;
                self.frame_mut(ctx)?
                    .pending
                    .last_mut()
                    .ok_or_else(|| VmError::internal("PutArg without a pending frame"))?
                    .args
                    .push(value);
                Ok(Step::Continue)
            }
            I::FunctionCall { dst } => {
                let pending = self
                    .frame_mut(ctx)?
                    .pending
                    .pop()
                    .ok_or_else(|| VmError::internal("FunctionCall without a pending frame"))?;
                match self.setup_call(ctx, pending, Some(*dst))? {
                    CallSetup::Finished(value) => {
                        self.store(ctx, *dst, value)?;
                        Ok(Step::Continue)
                    }
                    CallSetup::Frame {
                        frame,
                        promise_object,
                    } => {
                        if let Some(promise_object) = promise_object {
                            self.store(ctx, *dst, promise_object)?;
                        }
                        Ok(Step::Call(frame))
                    }
                    CallSetup::Suspended(promise) => Ok(Step::Suspend {
                        awaited: promise,
                        dst: *dst,
                    }),
                }
            }
            I::Return { src } => {
                let value = self.load(ctx, *src)?;
                Ok(Step::Return(value))
            }
            I::Stop { src } => {
                let value = self.load(ctx, *src)?;
                Ok(Step::Return(value))
            }
            I::SetFunctionName { func, name } => {
                let func = self.load(ctx, *func)?;
                let name = self.const_string(ctx, name.0)?;
                if let Some(obj) = func.as_object() {
                    obj.define_own(
                        PropertyKey::string("name"),
                        PropertyDescriptor::builtin(Value::string(name.as_str())),
                    )?;
                }
                Ok(Step::Continue)
            }

            // ---- exception handling -----------------------------------------
            I::TryStart {
                catch_offset,
                exit_slot,
                exc_slot,
            } => {
                // Prime the routing slots with their "empty" sentinels
                self.store(ctx, *exit_slot, Value::undefined())?;
                self.store(ctx, *exc_slot, Value::hole())?;
                let frame = self.frame_mut(ctx)?;
                let pc = frame.pc;
                let pending = frame.pending.len();
                frame.catch_chain.push(CatchHandler {
                    pc: (pc as i64 + catch_offset.0 as i64) as usize,
                    pending,
                });
                Ok(Step::Continue)
            }
            I::TryEnd { offset } => {
                let frame = self.frame_mut(ctx)?;
                frame.catch_chain.pop();
                Ok(Step::Jump(offset.0))
            }
            I::TryBreak { exit_slot, offset } => {
                let frame = self.frame_mut(ctx)?;
                frame.catch_chain.pop();
                self.store(ctx, *exit_slot, Value::hole())?;
                Ok(Step::Jump(offset.0))
            }
            I::TryContinue { exit_slot, offset } => {
                let frame = self.frame_mut(ctx)?;
                frame.catch_chain.pop();
                self.store(ctx, *exit_slot, Value::uninitialized())?;
                Ok(Step::Jump(offset.0))
            }
            I::TryReturn {
                src,
                exit_slot,
                offset,
            } => {
                let value = self.load(ctx, *src)?;
                let frame = self.frame_mut(ctx)?;
                frame.catch_chain.pop();
                // Wrap so `return undefined` is distinguishable from "no
                // routed exit"
                let wrapper = self.state.heap.alloc_array(0, None)?;
                wrapper.push_element(value)?;
                self.store(ctx, *exit_slot, Value::object(wrapper))?;
                Ok(Step::Jump(offset.0))
            }
            I::Throw { src } => {
                let value = self.load(ctx, *src)?;
                Ok(Step::Throw(value))
            }
            I::Catch { dst } => {
                let exception = ctx
                    .pending_exception
                    .take()
                    .unwrap_or_else(Value::undefined);
                self.store(ctx, *dst, exception)?;
                Ok(Step::Continue)
            }
            I::Finally {
                exit_slot,
                exc_slot,
                break_offset,
                continue_offset,
            } => {
                let exit = self.load(ctx, *exit_slot)?;
                match exit {
                    // break routed through the finally
                    Value::Hole => Ok(Step::Jump(break_offset.0)),
                    // continue routed through the finally
                    Value::Uninitialized => Ok(Step::Jump(continue_offset.0)),
                    // return routed through the finally (wrapped value)
                    Value::Object(wrapper) => {
                        let value = wrapper.element(0).unwrap_or_default();
                        Ok(Step::Return(value))
                    }
                    _ => {
                        // No routed exit: rethrow a parked exception
                        let parked = self.load(ctx, *exc_slot)?;
                        if parked.is_hole() {
                            Ok(Step::Continue)
                        } else {
                            Ok(Step::Throw(parked))
                        }
                    }
                }
            }
            I::Error { kind, message } => {
                let message = self.const_string(ctx, message.0)?;
                let error = self.make_error(ctx, *kind, message.as_str());
                Ok(Step::Throw(error))
            }

            // ---- modules & async --------------------------------------------
            I::Import { dst, module } => {
                let specifier = self.const_string(ctx, module.0)?;
                let value = self.evaluate_import(ctx, specifier.as_str())?;
                self.store(ctx, *dst, value)?;
                Ok(Step::Continue)
            }
            I::Await { dst, src } => {
                let value = self.load(ctx, *src)?;
                let promise = self.promise_of(ctx, &value)?;
                // Awaiting counts as handling a rejection
                self.state.mark_rejection_handled(&promise);
                match promise.state() {
                    PromiseState::Fulfilled(value) => {
                        self.store(ctx, *dst, value)?;
                        Ok(Step::Continue)
                    }
                    PromiseState::Rejected(reason) => Ok(Step::Throw(reason)),
                    PromiseState::Pending => Ok(Step::Suspend {
                        awaited: promise,
                        dst: *dst,
                    }),
                }
            }

            // ---- other ------------------------------------------------------
            I::InstanceOf { dst, lhs, rhs } => {
                let value = self.load(ctx, *lhs)?;
                let ctor = self.load(ctx, *rhs)?;
                let result = self.instance_of(ctx, &value, &ctor)?;
                self.store(ctx, *dst, Value::boolean(result))?;
                Ok(Step::Continue)
            }
            I::Typeof { dst, src } => {
                let value = self.load(ctx, *src)?;
                self.store(ctx, *dst, Value::string(value.type_of()))?;
                Ok(Step::Continue)
            }
            I::TypeofGlobal { dst, name } => {
                let name = self.const_string(ctx, name.0)?;
                let value = match self.try_global_get(ctx, &name)? {
                    Some(value) => Value::string(value.type_of()),
                    None => Value::string("undefined"),
                };
                self.store(ctx, *dst, value)?;
                Ok(Step::Continue)
            }
            I::Void { dst, src } => {
                let _ = self.load(ctx, *src)?;
                self.store(ctx, *dst, Value::undefined())?;
                Ok(Step::Continue)
            }
            I::Delete { dst, src } => {
                let _ = self.load(ctx, *src)?;
                self.store(ctx, *dst, Value::boolean(true))?;
                Ok(Step::Continue)
            }
            I::Debugger | I::Nop => Ok(Step::Continue),
        }
    }

    // ======================================================================
    // Property operations (mode semantics over the query result)
    // ======================================================================

    /// Full `get` semantics: accessors and handlers are invoked, fast
    /// array and string indices resolved, misses yield `undefined`.
    pub fn get_property(
        &self,
        ctx: &mut VmContext,
        base: &Value,
        key: &PropertyKey,
    ) -> VmResult<Value> {
        // Typed-array element reads bypass the table walk entirely
        if let (Some(obj), Some(index)) = (base.as_object(), key.as_index())
            && let ObjectKind::TypedArray(ta) = obj.kind()
        {
            return Ok(match ta.get(index as usize) {
                Some(n) => Value::number(n),
                None => Value::undefined(),
            });
        }
        match query::lookup(&self.state.realm, base, key, QueryMode::Get)? {
            Lookup::Found { descriptor, .. } => match descriptor {
                PropertyDescriptor::Data { value, .. } => Ok(value),
                PropertyDescriptor::Accessor { get, .. } => match get {
                    Some(getter) => self.call_value(ctx, &getter, base, &[]),
                    None => Ok(Value::undefined()),
                },
                PropertyDescriptor::Handler { get, magic, .. } => match get {
                    Some(handler) => {
                        self.with_ncx(ctx, |ncx| handler(ncx, base, magic, None))
                    }
                    None => Ok(Value::undefined()),
                },
                PropertyDescriptor::Whiteout => Ok(Value::undefined()),
            },
            Lookup::Declined | Lookup::External { .. } => Ok(Value::undefined()),
            Lookup::Primitive => Ok(Value::undefined()),
            Lookup::StringIndex { index } => {
                let s = base.as_string().expect("string base");
                Ok(match s.char_at(index as usize) {
                    Some(c) => Value::string(c.to_string().as_str()),
                    None => Value::undefined(),
                })
            }
            Lookup::ArrayIndex { index } => {
                let obj = base.as_object().expect("array base");
                match obj.element(index) {
                    Some(value) => Ok(value),
                    // Miss within a fast array: continue on the prototype
                    None => match obj.prototype() {
                        Some(proto) => self.get_property(ctx, &Value::object(proto), key),
                        None => Ok(Value::undefined()),
                    },
                }
            }
        }
    }

    /// Full `set` semantics: shared descriptors clone into the instance,
    /// setters and handlers run, missing keys insert when extensible.
    /// Failed writes are silent (non-strict assignment).
    pub fn set_property(
        &self,
        ctx: &mut VmContext,
        base: &Value,
        key: &PropertyKey,
        value: Value,
    ) -> VmResult<()> {
        // Typed-array element writes coerce to number and never extend
        if let (Some(obj), Some(index)) = (base.as_object(), key.as_index())
            && let ObjectKind::TypedArray(ta) = obj.kind()
        {
            let n = self.with_ncx(ctx, |ncx| convert::to_number(ncx, &value))?;
            return ta.set(index as usize, n);
        }
        match query::lookup(&self.state.realm, base, key, QueryMode::Set)? {
            Lookup::Found {
                descriptor,
                holder,
                own,
                shared,
            } => match descriptor {
                PropertyDescriptor::Accessor { set, .. } => {
                    if let Some(setter) = set {
                        self.call_value(ctx, &setter, base, &[value])?;
                    }
                    Ok(())
                }
                PropertyDescriptor::Handler { set, magic, .. } => {
                    if let Some(handler) = set {
                        self.with_ncx(ctx, |ncx| handler(ncx, base, magic, Some(&value)))?;
                    }
                    Ok(())
                }
                PropertyDescriptor::Data { attributes, .. } => {
                    if !attributes.writable {
                        return Ok(());
                    }
                    let receiver = base.as_object().expect("object base for set");
                    if own && !shared {
                        holder.define_own(
                            key.clone(),
                            PropertyDescriptor::data_with_attrs(value, attributes),
                        )?;
                    } else {
                        // Inherited or prototype-pool data property: the
                        // write clones onto the receiver's own table
                        let _ = receiver.define_own(
                            key.clone(),
                            PropertyDescriptor::data_with_attrs(value, attributes),
                        );
                    }
                    Ok(())
                }
                PropertyDescriptor::Whiteout => Ok(()),
            },
            Lookup::Declined => {
                if let Some(obj) = base.as_object() {
                    let _ = obj.define_own(key.clone(), PropertyDescriptor::data(value));
                }
                Ok(())
            }
            // Assignments to primitives and externals without a matching
            // handler are dropped
            Lookup::Primitive | Lookup::StringIndex { .. } | Lookup::External { .. } => Ok(()),
            Lookup::ArrayIndex { index } => {
                let obj = base.as_object().expect("array base");
                obj.set_element(index, value)
            }
        }
    }

    /// Full `delete` semantics: only configurable own entries go away;
    /// shadowed shared entries get a whiteout so the pool entry cannot
    /// reappear.
    pub fn delete_property(
        &self,
        ctx: &mut VmContext,
        base: &Value,
        key: &PropertyKey,
    ) -> VmResult<bool> {
        let _ = ctx;
        match query::lookup(&self.state.realm, base, key, QueryMode::Delete)? {
            Lookup::Found {
                descriptor,
                holder,
                own,
                shared,
            } => {
                if !own {
                    // delete never touches inherited properties
                    return Ok(true);
                }
                if !descriptor.attributes().configurable {
                    return Ok(false);
                }
                if shared {
                    holder.whiteout(key.clone());
                } else {
                    holder.remove_own(key);
                }
                Ok(true)
            }
            Lookup::ArrayIndex { index } => {
                let obj = base.as_object().expect("array base");
                Ok(obj.delete_element(index))
            }
            Lookup::Declined
            | Lookup::Primitive
            | Lookup::StringIndex { .. }
            | Lookup::External { .. } => Ok(true),
        }
    }

    /// Full `in` semantics (whiteouts already read as absent)
    pub fn has_property(
        &self,
        ctx: &mut VmContext,
        base: &Value,
        key: &PropertyKey,
    ) -> VmResult<bool> {
        match query::lookup(&self.state.realm, base, key, QueryMode::In)? {
            Lookup::Found { .. } => Ok(true),
            Lookup::StringIndex { index } => {
                let s = base.as_string().expect("string base");
                Ok((index as usize) < s.char_len())
            }
            Lookup::ArrayIndex { index } => {
                let obj = base.as_object().expect("array base");
                if obj.element(index).is_some() {
                    return Ok(true);
                }
                match obj.prototype() {
                    Some(proto) => self.has_property(ctx, &Value::object(proto), key),
                    None => Ok(false),
                }
            }
            Lookup::Declined | Lookup::Primitive | Lookup::External { .. } => Ok(false),
        }
    }

    // ======================================================================
    // Calls
    // ======================================================================

    fn setup_call(
        &self,
        ctx: &mut VmContext,
        pending: PendingCall,
        dst: Option<ScopeIndex>,
    ) -> VmResult<CallSetup> {
        let PendingCall {
            callee,
            mut this,
            mut args,
            is_ctor,
            ctor_this,
        } = pending;

        // Unwrap bound-function chains; the bound this applies except for
        // constructor calls, where the target constructs
        let mut target = callee;
        loop {
            let next = {
                let Some(data) = target.as_function() else {
                    return Err(VmError::type_error(format!(
                        "{} is not a function",
                        crate::format::describe(&target)
                    )));
                };
                match &data.kind {
                    FunctionKind::Bound {
                        target: inner,
                        this: bound_this,
                        args: bound_args,
                    } => {
                        if !is_ctor {
                            this = bound_this.clone();
                        }
                        let mut merged = bound_args.clone();
                        merged.extend(args);
                        args = merged;
                        Some(Value::object(inner.clone()))
                    }
                    _ => None,
                }
            };
            match next {
                Some(inner) => target = inner,
                None => break,
            }
        }

        let data = target.as_function().expect("validated above");
        if is_ctor && !data.is_ctor {
            return Err(VmError::type_error(format!(
                "{} is not a constructor",
                crate::format::describe(&target)
            )));
        }

        match &data.kind {
            FunctionKind::Native {
                func,
                arg_spec,
                magic: _,
            } => {
                let func: NativeFn = func.clone();
                self.coerce_args(ctx, arg_spec, &mut args)?;
                let outcome = {
                    let mut ncx = NativeCtx { interp: self, ctx };
                    func(&mut ncx, &this, &args)
                };
                match outcome {
                    Ok(NativeOutcome::Value(mut value)) => {
                        if is_ctor && !value.is_object() {
                            value = ctor_this.unwrap_or(value);
                        }
                        Ok(CallSetup::Finished(value))
                    }
                    // The native parked its invocation on a promise; the
                    // settled value lands in the call's destination slot
                    Ok(NativeOutcome::Suspend(promise)) => Ok(CallSetup::Suspended(promise)),
                    Err(e) => Err(e),
                }
            }
            FunctionKind::Script {
                lambda,
                module,
                closure,
                globals,
                consts,
            } => {
                let lambda = lambda.clone();
                let argc = args.len();
                args.resize(
                    argc.max(lambda.param_count as usize),
                    Value::undefined(),
                );

                let (result_promise, promise_object) = if lambda.is_async() {
                    let promise = JsPromise::new();
                    let obj = self.state.heap.alloc_object(
                        ObjectKind::Promise(promise.clone()),
                        Some(self.state.realm.promise_proto.clone()),
                    )?;
                    (Some(promise), Some(Value::object(obj)))
                } else {
                    (None, None)
                };

                let module = module.clone();
                let consts = consts.clone();
                let globals = globals.clone();
                let closure = closure.clone();
                let new_target = if is_ctor { target.clone() } else { Value::undefined() };
                let mut frame = self.blank_frame(
                    ctx,
                    lambda.clone(),
                    module,
                    consts,
                    globals,
                    args,
                    closure,
                    this,
                    // Async frames settle their promise instead of
                    // writing the caller's slot
                    if result_promise.is_some() { None } else { dst },
                    is_ctor,
                    result_promise,
                );
                frame.argc = argc;
                frame.new_target = new_target;
                Ok(CallSetup::Frame {
                    frame: Box::new(frame),
                    promise_object,
                })
            }
            FunctionKind::Bound { .. } => unreachable!("bound chain unwrapped above"),
        }
    }

    /// `new.target`-style `this` creation for a constructor call
    fn make_ctor_this(&self, ctx: &mut VmContext, callee: &Value) -> VmResult<Value> {
        // Bound constructors construct their target
        let mut target = callee.clone();
        loop {
            let next = match target.as_function().map(|d| &d.kind) {
                Some(FunctionKind::Bound { target: inner, .. }) => {
                    Some(Value::object(inner.clone()))
                }
                _ => None,
            };
            match next {
                Some(inner) => target = inner,
                None => break,
            }
        }
        let proto = self
            .get_property(ctx, &target, &PropertyKey::string("prototype"))?
            .as_object()
            .cloned()
            .unwrap_or_else(|| self.state.realm.object_proto.clone());
        let obj = self.state.heap.alloc_plain(Some(proto))?;
        Ok(Value::object(obj))
    }

    /// Coerce positional arguments per a native's parameter spec
    fn coerce_args(
        &self,
        ctx: &mut VmContext,
        spec: &[ArgSpec],
        args: &mut Vec<Value>,
    ) -> VmResult<()> {
        if args.len() < spec.len() {
            args.resize(spec.len(), Value::undefined());
        }
        for (i, kind) in spec.iter().enumerate() {
            let current = args[i].clone();
            args[i] = match kind {
                ArgSpec::Any => current,
                ArgSpec::Number => {
                    Value::number(self.with_ncx(ctx, |ncx| convert::to_number(ncx, &current))?)
                }
                ArgSpec::Integer => {
                    let n = self.with_ncx(ctx, |ncx| convert::to_number(ncx, &current))?;
                    Value::number(convert::to_int32(n) as f64)
                }
                ArgSpec::String => {
                    let s = self.with_ncx(ctx, |ncx| convert::to_string(ncx, &current))?;
                    Value::String(s)
                }
                ArgSpec::Boolean => Value::boolean(current.to_boolean()),
            };
        }
        Ok(())
    }

    /// Instantiate a lambda as a function value, copying captured slot
    /// cells per its capture list
    fn instantiate_function(&self, ctx: &mut VmContext, index: LambdaIndex) -> VmResult<Value> {
        let (lambda, module, consts, globals) = {
            let frame = self.frame(ctx)?;
            (
                Arc::new(frame.module.lambda(index)?.clone()),
                frame.module.clone(),
                frame.consts.clone(),
                frame.globals.clone(),
            )
        };

        let mut closure: Vec<SlotCell> = Vec::with_capacity(lambda.captures.len());
        for capture in &lambda.captures {
            let cell = match capture.source.kind() {
                ScopeKind::Local => self.frame_mut(ctx)?.capture_local(capture.source.slot()),
                ScopeKind::Closure => {
                    let frame = self.frame(ctx)?;
                    frame
                        .closure
                        .get(capture.source.slot() as usize)
                        .cloned()
                        .ok_or_else(|| VmError::internal("transitive capture out of bounds"))?
                }
                ScopeKind::Global => {
                    let frame = self.frame(ctx)?;
                    frame
                        .globals
                        .get(capture.source.slot() as usize)
                        .cloned()
                        .ok_or_else(|| VmError::internal("global capture out of bounds"))?
                }
                _ => return Err(VmError::internal("invalid capture source scope")),
            };
            closure.push(cell);
        }

        let is_async = lambda.is_async();
        let is_ctor = !lambda.is_arrow() && !is_async;
        let name = lambda.name.clone();
        let param_count = lambda.param_count;

        let func = self.state.heap.alloc_object(
            ObjectKind::Function(FunctionData {
                kind: FunctionKind::Script {
                    lambda,
                    module,
                    closure,
                    globals,
                    consts,
                },
                is_ctor,
                is_async,
            }),
            Some(self.state.realm.function_proto.clone()),
        )?;

        func.define_own(
            PropertyKey::string("name"),
            PropertyDescriptor::builtin(Value::string(name.as_deref().unwrap_or(""))),
        )?;
        func.define_own(
            PropertyKey::string("length"),
            PropertyDescriptor::builtin(Value::number(param_count as f64)),
        )?;

        if is_ctor {
            let prototype = self
                .state
                .heap
                .alloc_plain(Some(self.state.realm.object_proto.clone()))?;
            prototype.define_own(
                PropertyKey::string("constructor"),
                PropertyDescriptor::builtin(Value::object(func.clone())),
            )?;
            func.define_own(
                PropertyKey::string("prototype"),
                PropertyDescriptor::data_with_attrs(
                    Value::object(prototype),
                    PropertyAttributes {
                        writable: true,
                        enumerable: false,
                        configurable: false,
                    },
                ),
            )?;
        }

        Ok(Value::object(func))
    }

    // ======================================================================
    // Imports, globals, await plumbing
    // ======================================================================

    fn evaluate_import(&self, ctx: &mut VmContext, specifier: &str) -> VmResult<Value> {
        if let Some(cached) = self.state.modules.cached(specifier) {
            return Ok(cached);
        }

        let module = self.state.modules.begin_evaluation(specifier)?;
        let result = (|| -> VmResult<Value> {
            let lambda = Arc::new(
                module
                    .entry()
                    .ok_or_else(|| VmError::internal("imported module has no entry"))?
                    .clone(),
            );
            let consts = Arc::new(self.decode_constants(&module)?);
            let globals = Arc::new(self.link_globals(&module));
            let frame = self.blank_frame(
                ctx,
                lambda,
                module.clone(),
                consts,
                globals,
                Vec::new(),
                Vec::new(),
                Value::undefined(),
                None,
                false,
                None,
            );
            let base = ctx.depth() + 1;
            ctx.push_frame(frame)?;
            match self.run_loop(ctx, base, None)? {
                RunOutcome::Complete(value) => Ok(value),
                RunOutcome::Suspended(_) => Err(VmError::type_error(format!(
                    "module \"{specifier}\" suspended during evaluation; \
                     top-level await in imports is not supported"
                ))),
            }
        })();

        match result {
            Ok(value) => {
                self.state.modules.finish_evaluation(specifier, value.clone());
                Ok(value)
            }
            Err(e) => {
                self.state.modules.abort_evaluation(specifier);
                Err(e)
            }
        }
    }

    fn global_get(&self, ctx: &mut VmContext, name: &JsString) -> VmResult<Value> {
        match self.try_global_get(ctx, name)? {
            Some(value) => Ok(value),
            None => Err(VmError::reference_error(format!(
                "{} is not defined",
                name.as_str()
            ))),
        }
    }

    fn try_global_get(&self, ctx: &mut VmContext, name: &JsString) -> VmResult<Option<Value>> {
        if let Some(cell) = self.state.realm.lookup_global_cell(name.as_str()) {
            let value = cell.get();
            if value.is_uninitialized() {
                return Err(VmError::reference_error(format!(
                    "Cannot access '{}' before initialization",
                    name.as_str()
                )));
            }
            return Ok(Some(value));
        }
        let global = Value::object(self.state.realm.global.clone());
        let key = PropertyKey::string(name.as_str());
        if self.has_property(ctx, &global, &key)? {
            return Ok(Some(self.get_property(ctx, &global, &key)?));
        }
        Ok(None)
    }

    fn global_set(&self, ctx: &mut VmContext, name: &JsString, value: Value) -> VmResult<()> {
        if let Some(cell) = self.state.realm.lookup_global_cell(name.as_str()) {
            cell.set(value);
            return Ok(());
        }
        let global = Value::object(self.state.realm.global.clone());
        self.set_property(ctx, &global, &PropertyKey::string(name.as_str()), value)
    }

    /// PromiseResolve: pass promises through, adopt thenables, wrap
    /// plain values as already-fulfilled
    pub fn promise_of(&self, ctx: &mut VmContext, value: &Value) -> VmResult<Arc<JsPromise>> {
        if let Some(obj) = value.as_object() {
            if let ObjectKind::Promise(promise) = obj.kind() {
                return Ok(promise.clone());
            }
            let then = self.get_property(ctx, value, &PropertyKey::string("then"))?;
            if then.is_function() {
                let promise = JsPromise::new();
                let resolve = self.settle_native(promise.clone(), false)?;
                let reject = self.settle_native(promise.clone(), true)?;
                if let Err(e) = self.call_value(ctx, &then, value, &[resolve, reject]) {
                    promise.reject(self.error_value(ctx, e));
                }
                return Ok(promise);
            }
        }
        Ok(JsPromise::fulfilled(value.clone()))
    }

    /// A one-shot native settling `promise` when called
    fn settle_native(&self, promise: Arc<JsPromise>, rejecting: bool) -> VmResult<Value> {
        let func: NativeFn = Arc::new(move |_ncx, _this, args: &[Value]| {
            let value = args.first().cloned().unwrap_or_default();
            if rejecting {
                promise.reject(value);
            } else {
                promise.resolve(value);
            }
            Ok(NativeOutcome::Value(Value::undefined()))
        });
        let obj = self.state.heap.alloc_object(
            ObjectKind::Function(FunctionData {
                kind: FunctionKind::Native {
                    func,
                    arg_spec: Vec::new(),
                    magic: 0,
                },
                is_ctor: false,
                is_async: false,
            }),
            Some(self.state.realm.function_proto.clone()),
        )?;
        Ok(Value::object(obj))
    }

    fn instance_of(&self, ctx: &mut VmContext, value: &Value, ctor: &Value) -> VmResult<bool> {
        if !ctor.is_function() {
            return Err(VmError::type_error(
                "right-hand side of 'instanceof' is not callable",
            ));
        }
        let prototype = self.get_property(ctx, ctor, &PropertyKey::string("prototype"))?;
        let Some(prototype) = prototype.as_object() else {
            return Err(VmError::type_error(
                "constructor prototype is not an object",
            ));
        };
        let Some(obj) = value.as_object() else {
            return Ok(false);
        };

        let mut current = obj.prototype();
        let mut depth = 0;
        while let Some(p) = current {
            if depth > MAX_PROTO_DEPTH {
                return Err(VmError::range_error("prototype chain too deep"));
            }
            if Arc::ptr_eq(&p, prototype) {
                return Ok(true);
            }
            current = p.prototype();
            depth += 1;
        }
        Ok(false)
    }

    // ======================================================================
    // Helpers
    // ======================================================================

    fn frame<'c>(&self, ctx: &'c VmContext) -> VmResult<&'c Frame> {
        ctx.frame()
            .ok_or_else(|| VmError::internal("no active frame"))
    }

    fn frame_mut<'c>(&self, ctx: &'c mut VmContext) -> VmResult<&'c mut Frame> {
        ctx.frame_mut()
            .ok_or_else(|| VmError::internal("no active frame"))
    }

    fn load(&self, ctx: &VmContext, index: ScopeIndex) -> VmResult<Value> {
        self.frame(ctx)?.load(index)
    }

    fn store(&self, ctx: &mut VmContext, index: ScopeIndex, value: Value) -> VmResult<()> {
        self.frame_mut(ctx)?.store(index, value)
    }

    fn with_ncx<R>(
        &self,
        ctx: &mut VmContext,
        f: impl FnOnce(&mut NativeCtx<'_>) -> VmResult<R>,
    ) -> VmResult<R> {
        let mut ncx = NativeCtx { interp: self, ctx };
        f(&mut ncx)
    }

    fn to_number_op(&self, ctx: &mut VmContext, index: ScopeIndex) -> VmResult<f64> {
        let value = self.load(ctx, index)?;
        self.with_ncx(ctx, |ncx| convert::to_number(ncx, &value))
    }

    fn numeric_binop(
        &self,
        ctx: &mut VmContext,
        dst: ScopeIndex,
        lhs: ScopeIndex,
        rhs: ScopeIndex,
        op: impl Fn(f64, f64) -> f64,
    ) -> VmResult<Step> {
        let a = self.to_number_op(ctx, lhs)?;
        let b = self.to_number_op(ctx, rhs)?;
        self.store(ctx, dst, Value::number(op(a, b)))?;
        Ok(Step::Continue)
    }

    fn int32_binop(
        &self,
        ctx: &mut VmContext,
        dst: ScopeIndex,
        lhs: ScopeIndex,
        rhs: ScopeIndex,
        op: impl Fn(i32, i32) -> i32,
    ) -> VmResult<Step> {
        let a = self.to_number_op(ctx, lhs)?;
        let b = self.to_number_op(ctx, rhs)?;
        let result = op(convert::to_int32(a), convert::to_int32(b));
        self.store(ctx, dst, Value::number(result as f64))?;
        Ok(Step::Continue)
    }

    /// `+`: string concatenation when either primitive is a string
    fn add_values(&self, ctx: &mut VmContext, a: &Value, b: &Value) -> VmResult<Value> {
        let pa = self.with_ncx(ctx, |ncx| convert::to_primitive(ncx, a, Hint::Default))?;
        let pb = self.with_ncx(ctx, |ncx| convert::to_primitive(ncx, b, Hint::Default))?;
        if pa.is_string() || pb.is_string() {
            let sa = self.with_ncx(ctx, |ncx| convert::to_string(ncx, &pa))?;
            let sb = self.with_ncx(ctx, |ncx| convert::to_string(ncx, &pb))?;
            self.state
                .heap
                .alloc_string_owned(format!("{}{}", sa.as_str(), sb.as_str()))
        } else {
            let na = self.with_ncx(ctx, |ncx| convert::to_number(ncx, &pa))?;
            let nb = self.with_ncx(ctx, |ncx| convert::to_number(ncx, &pb))?;
            Ok(Value::number(na + nb))
        }
    }

    fn relational(
        &self,
        ctx: &mut VmContext,
        dst: ScopeIndex,
        lhs: ScopeIndex,
        rhs: ScopeIndex,
        relation: Relation,
    ) -> VmResult<Step> {
        let a = self.load(ctx, lhs)?;
        let b = self.load(ctx, rhs)?;
        let pa = self.with_ncx(ctx, |ncx| convert::to_primitive(ncx, &a, Hint::Number))?;
        let pb = self.with_ncx(ctx, |ncx| convert::to_primitive(ncx, &b, Hint::Number))?;

        let result = if let (Value::String(x), Value::String(y)) = (&pa, &pb) {
            // Strings compare lexicographically by bytes
            let ordering = x.as_str().as_bytes().cmp(y.as_str().as_bytes());
            relation.check_ordering(ordering)
        } else {
            let x = self.with_ncx(ctx, |ncx| convert::to_number(ncx, &pa))?;
            let y = self.with_ncx(ctx, |ncx| convert::to_number(ncx, &pb))?;
            if x.is_nan() || y.is_nan() {
                false
            } else {
                relation.check_numbers(x, y)
            }
        };
        self.store(ctx, dst, Value::boolean(result))?;
        Ok(Step::Continue)
    }

    /// Decode a key operand value into a property key
    fn key_operand(&self, ctx: &mut VmContext, index: ScopeIndex) -> VmResult<PropertyKey> {
        let value = self.load(ctx, index)?;
        match value {
            Value::Symbol(sym) => Ok(PropertyKey::Symbol(sym)),
            Value::String(s) => Ok(PropertyKey::string(s.as_str())),
            Value::Number(n) => {
                if n.fract() == 0.0 && n >= 0.0 && n < u32::MAX as f64 {
                    Ok(PropertyKey::Index(n as u32))
                } else {
                    Ok(PropertyKey::string(&convert::number_to_string(n)))
                }
            }
            other => self.with_ncx(ctx, |ncx| convert::to_property_key(ncx, &other)),
        }
    }

    fn const_string(&self, ctx: &VmContext, index: u32) -> VmResult<JsString> {
        let frame = self.frame(ctx)?;
        Ok(JsString::new(frame.module.string_constant(index)?))
    }

    /// for-in key collection: enumerable string keys along the chain,
    /// deduplicated; whiteouts block inherited names
    fn for_in_keys(&self, base: &Value) -> VmResult<Vec<JsString>> {
        let mut keys = Vec::new();
        let mut seen: FxHashSet<String> = FxHashSet::default();
        let mut current = base.as_object().cloned();
        let mut depth = 0;

        while let Some(obj) = current {
            if depth > MAX_PROTO_DEPTH {
                return Err(VmError::range_error("prototype chain too deep"));
            }
            depth += 1;

            if obj.is_fast_array() {
                for (i, value) in obj.elements_snapshot().iter().enumerate() {
                    if !value.is_hole() {
                        let name = i.to_string();
                        if seen.insert(name.clone()) {
                            keys.push(JsString::from_string(name));
                        }
                    }
                }
            }

            obj.with_table(|table| {
                for (key, descriptor) in table.iter_all() {
                    let name = match key {
                        PropertyKey::Symbol(_) => continue,
                        other => other.to_display_string(),
                    };
                    if seen.insert(name.clone()) {
                        // Whiteouts claim the name without yielding it,
                        // masking shared and inherited entries
                        if !descriptor.is_whiteout() && descriptor.attributes().enumerable {
                            keys.push(JsString::from_string(name));
                        }
                    }
                }
            });

            if let Some(shared) = obj.shared_table() {
                for (key, descriptor) in shared.iterate(crate::property::IterFilter::Enumerable) {
                    let name = match key {
                        PropertyKey::Symbol(_) => continue,
                        other => other.to_display_string(),
                    };
                    if seen.insert(name.clone()) && descriptor.attributes().enumerable {
                        keys.push(JsString::from_string(name));
                    }
                }
            }

            current = obj.prototype();
        }

        Ok(keys)
    }

    // ======================================================================
    // Errors
    // ======================================================================

    /// Build an error object with message and captured stack
    pub fn make_error(&self, ctx: &VmContext, kind: ErrorKind, message: &str) -> Value {
        let proto = self.state.realm.error_proto(kind);
        let Ok(obj) = self.state.heap.alloc_object(ObjectKind::Error, Some(proto)) else {
            // Arena exhausted while building the error itself
            return Value::string(message);
        };
        let _ = obj.define_own(
            PropertyKey::string("message"),
            PropertyDescriptor::builtin(Value::string(message)),
        );
        let mut stack = format!("{}: {message}", kind.name());
        for line in ctx.stack_trace() {
            stack.push('\n');
            stack.push_str(&line);
        }
        let _ = obj.define_own(
            PropertyKey::string("stack"),
            PropertyDescriptor::builtin(Value::string(stack.as_str())),
        );
        Value::object(obj)
    }

    /// Convert an internal failure into the thrown JS value
    pub fn error_value(&self, ctx: &VmContext, error: VmError) -> Value {
        match error {
            VmError::Thrown(value) => *value,
            other => self.make_error(ctx, other.kind(), &other.message()),
        }
    }

    /// Error objects thrown without a stack get one from the throw site
    fn attach_stack_if_missing(&self, ctx: &VmContext, exception: &Value) {
        let Some(obj) = exception.as_object() else {
            return;
        };
        if !obj.flags().error_data {
            return;
        }
        if obj.own_descriptor(&PropertyKey::string("stack")).is_none() {
            let name = self
                .get_own_string(obj, "name")
                .unwrap_or_else(|| "Error".to_string());
            let message = self.get_own_string(obj, "message").unwrap_or_default();
            let mut stack = if message.is_empty() {
                name
            } else {
                format!("{name}: {message}")
            };
            for line in ctx.stack_trace() {
                stack.push('\n');
                stack.push_str(&line);
            }
            let _ = obj.define_own(
                PropertyKey::string("stack"),
                PropertyDescriptor::builtin(Value::string(stack.as_str())),
            );
        }
    }

    fn get_own_string(&self, obj: &Arc<JsObject>, key: &str) -> Option<String> {
        obj.own_descriptor(&PropertyKey::string(key))
            .and_then(|(d, _)| d.value().cloned())
            .and_then(|v| v.as_string().map(|s| s.as_str().to_string()))
    }

    // ======================================================================
    // Module linking
    // ======================================================================

    /// Decode the constant pool into values once per module execution
    fn decode_constants(&self, module: &Module) -> VmResult<Vec<Value>> {
        module
            .constants
            .iter()
            .map(|constant| {
                Ok(match constant {
                    Constant::Undefined => Value::undefined(),
                    Constant::Null => Value::null(),
                    Constant::Boolean(b) => Value::boolean(*b),
                    Constant::Number(n) => Value::number(*n),
                    Constant::String(s) => self.state.heap.alloc_string(s)?,
                    // Regexp constants are instantiated per `Regexp`
                    // instruction, never loaded through the const scope
                    Constant::Regexp { .. } => Value::undefined(),
                })
            })
            .collect()
    }

    /// Resolve the module's top-level binding names to VM-wide cells
    fn link_globals(&self, module: &Module) -> Vec<SlotCell> {
        module
            .globals
            .iter()
            .map(|name| self.state.realm.global_cell(name))
            .collect()
    }

    /// Build a frame, recycling a shell from the spare stack when one is
    /// available. Frames too large for the pool are freshly allocated and
    /// dropped on pop.
    #[allow(clippy::too_many_arguments)]
    fn blank_frame(
        &self,
        ctx: &mut VmContext,
        lambda: Arc<Lambda>,
        module: Arc<Module>,
        consts: Arc<Vec<Value>>,
        globals: Arc<Vec<SlotCell>>,
        args: Vec<Value>,
        closure: Vec<SlotCell>,
        this: Value,
        dst: Option<ScopeIndex>,
        is_ctor: bool,
        result_promise: Option<Arc<JsPromise>>,
    ) -> Frame {
        let local_count = lambda.local_count as usize;
        let argc = args.len();
        let pooled = local_count <= crate::context::POOL_LOCAL_LIMIT;

        let mut frame = match ctx.pool.acquire() {
            Some(mut shell) => {
                shell.lambda = lambda;
                shell.module = module;
                shell.consts = consts;
                shell.globals = globals;
                shell.args = args;
                shell.closure = closure;
                shell.this = this;
                shell.dst = dst;
                shell.is_ctor = is_ctor;
                shell.result_promise = result_promise;
                shell.pc = 0;
                shell.pooled = pooled;
                shell
            }
            None => Frame {
                lambda,
                module,
                consts,
                globals,
                pc: 0,
                locals: Vec::new(),
                args,
                argc: 0,
                closure,
                cells: FxHashMap::default(),
                this,
                new_target: Value::undefined(),
                dst,
                catch_chain: Vec::new(),
                pending: Vec::new(),
                is_ctor,
                result_promise,
                pooled,
            },
        };
        frame.locals.resize(local_count, Value::undefined());
        frame.argc = argc;
        frame
    }
}

/// Relational operator selector
#[derive(Clone, Copy)]
enum Relation {
    Less,
    LessEq,
    Greater,
    GreaterEq,
}

impl Relation {
    fn check_numbers(self, a: f64, b: f64) -> bool {
        match self {
            Self::Less => a < b,
            Self::LessEq => a <= b,
            Self::Greater => a > b,
            Self::GreaterEq => a >= b,
        }
    }

    fn check_ordering(self, ordering: std::cmp::Ordering) -> bool {
        use std::cmp::Ordering::*;
        match self {
            Self::Less => ordering == Less,
            Self::LessEq => ordering != Greater,
            Self::Greater => ordering == Greater,
            Self::GreaterEq => ordering != Less,
        }
    }
}

/// Result of preparing a call
enum CallSetup {
    /// Native completed synchronously
    Finished(Value),
    /// A scripted frame to push; async callees pre-deliver their promise
    Frame {
        frame: Box<Frame>,
        promise_object: Option<Value>,
    },
    /// A native parked the invocation on a promise (the `AGAIN` signal)
    Suspended(Arc<JsPromise>),
}
