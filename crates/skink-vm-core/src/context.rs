//! Execution context: frames, the frame pool and the native-call context
//!
//! A frame is a block of scope slots (locals + temporaries, arguments,
//! closure cells) plus bookkeeping: resume PC, per-frame catch chain,
//! `this`/`new.target`, the caller's destination slot and, for async
//! frames, the promise they settle. Frames recycle through a pool (the
//! spare stack); oversized frames bypass it and drop on pop.

use rustc_hash::FxHashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use skink_vm_bytecode::{Lambda, Module, ScopeIndex, ScopeKind};

use crate::error::{VmError, VmResult};
use crate::promise::JsPromise;
use crate::value::{SlotCell, Value};

/// Frames with more local slots than this bypass the pool
pub const POOL_LOCAL_LIMIT: usize = 256;
/// Maximum number of recycled frames kept around
const POOL_CAPACITY: usize = 64;

/// One catch-chain record
#[derive(Debug, Clone, Copy)]
pub struct CatchHandler {
    /// Instruction index of the `Catch` handler
    pub pc: usize,
    /// Pending-call depth to restore; discards calls whose argument
    /// evaluation threw
    pub pending: usize,
}

/// A call activation record
pub struct Frame {
    /// Compiled body
    pub lambda: Arc<Lambda>,
    /// Owning module image
    pub module: Arc<Module>,
    /// Decoded constant pool of the module execution
    pub consts: Arc<Vec<Value>>,
    /// Resolved global slots of the module execution
    pub globals: Arc<Vec<SlotCell>>,
    /// Program counter (instruction index)
    pub pc: usize,
    /// Local scope: variables plus call temporaries
    pub locals: Vec<Value>,
    /// Argument scope
    pub args: Vec<Value>,
    /// Number of arguments actually passed
    pub argc: usize,
    /// Closure scope
    pub closure: Vec<SlotCell>,
    /// Cells for captured locals, keyed by local slot
    pub cells: FxHashMap<u32, SlotCell>,
    /// `this`
    pub this: Value,
    /// `new.target`
    pub new_target: Value,
    /// Caller slot receiving the return value
    pub dst: Option<ScopeIndex>,
    /// Per-frame stack of catch handlers
    pub catch_chain: Vec<CatchHandler>,
    /// Calls being assembled (`FunctionFrame` … `FunctionCall` nest);
    /// frame-local so suspension carries them
    pub pending: Vec<PendingCall>,
    /// Constructor invocation (`new`)
    pub is_ctor: bool,
    /// Promise settled by this frame (async functions, resumed top level)
    pub result_promise: Option<Arc<JsPromise>>,
    /// Came from the frame pool
    pub pooled: bool,
}

impl Frame {
    /// Read a scope-indexed slot
    pub fn load(&self, index: ScopeIndex) -> VmResult<Value> {
        let slot = index.slot() as usize;
        match index.kind() {
            ScopeKind::Local => {
                if let Some(cell) = self.cells.get(&index.slot()) {
                    return Ok(cell.get());
                }
                self.locals
                    .get(slot)
                    .cloned()
                    .ok_or_else(|| VmError::internal(format!("local slot {slot} out of bounds")))
            }
            ScopeKind::Argument => Ok(self.args.get(slot).cloned().unwrap_or_default()),
            ScopeKind::Closure => self
                .closure
                .get(slot)
                .map(SlotCell::get)
                .ok_or_else(|| VmError::internal(format!("closure slot {slot} out of bounds"))),
            ScopeKind::Global => self
                .globals
                .get(slot)
                .map(SlotCell::get)
                .ok_or_else(|| VmError::internal(format!("global slot {slot} out of bounds"))),
            ScopeKind::Const => self
                .consts
                .get(slot)
                .cloned()
                .ok_or_else(|| VmError::internal(format!("constant slot {slot} out of bounds"))),
        }
    }

    /// Write a scope-indexed slot
    pub fn store(&mut self, index: ScopeIndex, value: Value) -> VmResult<()> {
        let slot = index.slot() as usize;
        match index.kind() {
            ScopeKind::Local => {
                if let Some(cell) = self.cells.get(&index.slot()) {
                    cell.set(value.clone());
                }
                match self.locals.get_mut(slot) {
                    Some(target) => {
                        *target = value;
                        Ok(())
                    }
                    None => Err(VmError::internal(format!(
                        "local slot {slot} out of bounds"
                    ))),
                }
            }
            ScopeKind::Argument => {
                if slot >= self.args.len() {
                    self.args.resize(slot + 1, Value::undefined());
                }
                self.args[slot] = value;
                Ok(())
            }
            ScopeKind::Closure => match self.closure.get(slot) {
                Some(cell) => {
                    cell.set(value);
                    Ok(())
                }
                None => Err(VmError::internal(format!(
                    "closure slot {slot} out of bounds"
                ))),
            },
            ScopeKind::Global => match self.globals.get(slot) {
                Some(cell) => {
                    cell.set(value);
                    Ok(())
                }
                None => Err(VmError::internal(format!(
                    "global slot {slot} out of bounds"
                ))),
            },
            ScopeKind::Const => Err(VmError::internal("store into constant scope")),
        }
    }

    /// Get or create the shared cell for a captured local slot
    pub fn capture_local(&mut self, slot: u32) -> SlotCell {
        if let Some(cell) = self.cells.get(&slot) {
            return cell.clone();
        }
        let current = self
            .locals
            .get(slot as usize)
            .cloned()
            .unwrap_or_default();
        let cell = SlotCell::new(current);
        self.cells.insert(slot, cell.clone());
        cell
    }

    /// Source line/column for the current PC, if mapped
    pub fn source_location(&self) -> Option<(u32, u32)> {
        self.lambda
            .source_map
            .find(self.pc as u32)
            .map(|e| (e.line, e.column))
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("lambda", &self.lambda.display_name())
            .field("pc", &self.pc)
            .finish()
    }
}

/// A call being assembled between `*Frame` and `FunctionCall`
pub struct PendingCall {
    /// The validated callee
    pub callee: Value,
    /// `this` for the invocation
    pub this: Value,
    /// Positional arguments, appended by `PutArg`
    pub args: Vec<Value>,
    /// Constructor call
    pub is_ctor: bool,
    /// For constructor calls, the freshly created `this` object
    pub ctor_this: Option<Value>,
}

/// Recycles frame shells so the call fast path reuses slot vectors
#[derive(Default)]
pub struct FramePool {
    shells: Vec<Frame>,
}

impl FramePool {
    /// Take a recycled shell, if one is available
    pub fn acquire(&mut self) -> Option<Frame> {
        self.shells.pop()
    }

    /// Return a frame to the pool; oversized or non-pooled frames drop
    pub fn release(&mut self, mut frame: Frame) {
        if !frame.pooled
            || frame.locals.capacity() > POOL_LOCAL_LIMIT
            || self.shells.len() >= POOL_CAPACITY
        {
            return;
        }
        frame.locals.clear();
        frame.args.clear();
        frame.closure.clear();
        frame.cells.clear();
        frame.catch_chain.clear();
        frame.pending.clear();
        frame.this = Value::undefined();
        frame.new_target = Value::undefined();
        frame.result_promise = None;
        self.shells.push(frame);
    }

    /// Number of pooled shells
    pub fn len(&self) -> usize {
        self.shells.len()
    }

    /// Whether the pool is empty
    pub fn is_empty(&self) -> bool {
        self.shells.is_empty()
    }
}

/// Execution state for one thread of script execution
pub struct VmContext {
    frames: Vec<Frame>,
    /// Frame pool (the spare stack)
    pub pool: FramePool,
    /// Exception value awaiting a `Catch` instruction
    pub pending_exception: Option<Value>,
    /// Last uncaught exception, visible to the host
    pub exception: Option<Value>,
    interrupt: Arc<AtomicBool>,
    max_stack_depth: usize,
}

impl VmContext {
    /// Create a context with the given stack-depth limit
    pub fn new(max_stack_depth: usize) -> Self {
        Self {
            frames: Vec::with_capacity(16),
            pool: FramePool::default(),
            pending_exception: None,
            exception: None,
            interrupt: Arc::new(AtomicBool::new(false)),
            max_stack_depth,
        }
    }

    /// Push a frame; overflow is a `RangeError`
    pub fn push_frame(&mut self, frame: Frame) -> VmResult<()> {
        if self.frames.len() >= self.max_stack_depth {
            return Err(VmError::range_error("maximum call stack size exceeded"));
        }
        self.frames.push(frame);
        Ok(())
    }

    /// Pop the current frame
    pub fn pop_frame(&mut self) -> Option<Frame> {
        self.frames.pop()
    }

    /// Current frame
    #[inline]
    pub fn frame(&self) -> Option<&Frame> {
        self.frames.last()
    }

    /// Current frame, mutably
    #[inline]
    pub fn frame_mut(&mut self) -> Option<&mut Frame> {
        self.frames.last_mut()
    }

    /// Frame stack depth
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Walk the frame stack from innermost outwards
    pub fn frames(&self) -> impl DoubleEndedIterator<Item = &Frame> {
        self.frames.iter().rev()
    }

    /// The cooperative-cancellation flag; the host sets it, the dispatch
    /// loop observes it at loop top
    pub fn interrupt_flag(&self) -> Arc<AtomicBool> {
        self.interrupt.clone()
    }

    /// Whether cancellation was requested
    #[inline]
    pub fn is_interrupted(&self) -> bool {
        self.interrupt.load(Ordering::Relaxed)
    }

    /// Request cancellation
    pub fn interrupt(&self) {
        self.interrupt.store(true, Ordering::Relaxed);
    }

    /// Clear the cancellation flag
    pub fn clear_interrupt(&self) {
        self.interrupt.store(false, Ordering::Relaxed);
    }

    /// Capture `name (file:line:col)` entries, innermost first
    pub fn stack_trace(&self) -> Vec<String> {
        self.frames()
            .map(|frame| {
                let name = frame.lambda.display_name();
                match frame.source_location() {
                    Some((line, column)) => {
                        format!("    at {name} ({}:{line}:{column})", frame.module.name)
                    }
                    None => format!("    at {name} ({})", frame.module.name),
                }
            })
            .collect()
    }
}

/// Context handed to native callees and protocol conversions
///
/// Wraps the interpreter and the mutable execution context so natives can
/// read properties, call back into script and allocate.
pub struct NativeCtx<'a> {
    /// The interpreter (carries the shared VM state)
    pub interp: &'a crate::interpreter::Interpreter,
    /// The execution context
    pub ctx: &'a mut VmContext,
}

impl<'a> NativeCtx<'a> {
    /// Shared VM state
    pub fn state(&self) -> &Arc<crate::state::VmState> {
        self.interp.state()
    }

    /// The realm
    pub fn realm(&self) -> &crate::realm::Realm {
        &self.interp.state().realm
    }

    /// Well-known symbols
    pub fn well_known(&self) -> crate::symbol::WellKnownSymbols {
        self.interp.state().symbols.well_known().clone()
    }

    /// Full property read through the query protocol
    pub fn get_property(
        &mut self,
        base: &Value,
        key: &crate::property::PropertyKey,
    ) -> VmResult<Value> {
        let interp = self.interp;
        interp.get_property(self.ctx, base, key)
    }

    /// Full property write through the query protocol
    pub fn set_property(
        &mut self,
        base: &Value,
        key: &crate::property::PropertyKey,
        value: Value,
    ) -> VmResult<()> {
        let interp = self.interp;
        interp.set_property(self.ctx, base, key, value)
    }

    /// Re-enter the interpreter for a script or native call
    pub fn call_function(
        &mut self,
        callee: &Value,
        this: &Value,
        args: &[Value],
    ) -> VmResult<Value> {
        let interp = self.interp;
        interp.call_value(self.ctx, callee, this, args)
    }

    /// Build an error object of the given class
    pub fn make_error(&mut self, kind: skink_vm_bytecode::ErrorKind, message: &str) -> Value {
        let interp = self.interp;
        interp.make_error(self.ctx, kind, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skink_vm_bytecode::Lambda;

    fn test_frame(local_count: usize) -> Frame {
        Frame {
            lambda: Arc::new(Lambda::builder().build()),
            module: Arc::new(Module::builder("test.js").build()),
            consts: Arc::new(Vec::new()),
            globals: Arc::new(Vec::new()),
            pc: 0,
            locals: vec![Value::undefined(); local_count],
            args: Vec::new(),
            argc: 0,
            closure: Vec::new(),
            cells: FxHashMap::default(),
            this: Value::undefined(),
            new_target: Value::undefined(),
            dst: None,
            catch_chain: Vec::new(),
            pending: Vec::new(),
            is_ctor: false,
            result_promise: None,
            pooled: true,
        }
    }

    #[test]
    fn test_local_load_store() {
        let mut frame = test_frame(3);
        frame.store(ScopeIndex::local(1), Value::number(7.0)).unwrap();
        assert_eq!(frame.load(ScopeIndex::local(1)).unwrap(), Value::number(7.0));
    }

    #[test]
    fn test_missing_argument_is_undefined() {
        let frame = test_frame(0);
        assert!(frame.load(ScopeIndex::argument(5)).unwrap().is_undefined());
    }

    #[test]
    fn test_captured_local_goes_through_cell() {
        let mut frame = test_frame(2);
        frame.store(ScopeIndex::local(0), Value::number(1.0)).unwrap();
        let cell = frame.capture_local(0);

        // Writes through the frame update the shared cell
        frame.store(ScopeIndex::local(0), Value::number(2.0)).unwrap();
        assert_eq!(cell.get(), Value::number(2.0));

        // Writes through the cell are seen by frame loads
        cell.set(Value::number(3.0));
        assert_eq!(frame.load(ScopeIndex::local(0)).unwrap(), Value::number(3.0));
    }

    #[test]
    fn test_stack_overflow() {
        let mut ctx = VmContext::new(4);
        for _ in 0..4 {
            ctx.push_frame(test_frame(0)).unwrap();
        }
        let err = ctx.push_frame(test_frame(0)).unwrap_err();
        assert!(matches!(err, VmError::Range(_)));
    }

    #[test]
    fn test_frame_pool_recycles() {
        let mut pool = FramePool::default();
        pool.release(test_frame(8));
        assert_eq!(pool.len(), 1);
        let shell = pool.acquire().unwrap();
        assert!(shell.locals.is_empty());
        assert!(pool.is_empty());
    }

    #[test]
    fn test_const_store_rejected() {
        let mut frame = test_frame(1);
        assert!(frame.store(ScopeIndex::constant(0), Value::null()).is_err());
    }
}
