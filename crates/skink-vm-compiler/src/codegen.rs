//! Code generation state
//!
//! One `FunctionContext` per lambda being lowered; nested functions stack.
//! Cross-function name resolution lives here because capture chaining
//! needs to see every enclosing context.

use std::collections::HashMap;

use skink_vm_bytecode::{
    Capture, Constant, ConstantPool, Instruction, JumpOffset, Lambda, LambdaFlags, LambdaIndex,
    Module, ScopeIndex, SourceMap,
};

use crate::error::{CompileError, CompileResult};
use crate::scope::{Binding, BindingKind, FunctionScopes, IndexAllocator};

/// Where a name resolved to
#[derive(Debug, Clone, Copy)]
pub enum Resolved {
    /// Binding in the current function
    Local(Binding),
    /// Captured from an enclosing function; slot in the closure scope
    Closure { slot: u32, kind: BindingKind },
    /// Top-level binding (global scope slot)
    Global { slot: u32, kind: BindingKind },
    /// Unknown name; resolved dynamically against the global object
    Unresolved,
}

/// State for one function being lowered
#[derive(Debug)]
pub struct FunctionContext {
    /// Function name
    pub name: Option<String>,
    /// Emitted instructions
    pub instructions: Vec<Instruction>,
    /// (line, column) per instruction
    pub positions: Vec<(u32, u32)>,
    /// Position applied to subsequently emitted instructions
    pub current_position: (u32, u32),
    /// Local slot allocator
    pub allocator: IndexAllocator,
    /// Block-structured name table
    pub scopes: FunctionScopes,
    /// Lambda flags
    pub flags: LambdaFlags,
    /// Declared parameter count
    pub param_count: u32,
    /// Parameter names (diagnostics)
    pub param_names: Vec<String>,
    /// Captures from enclosing functions
    pub captures: Vec<Capture>,
    /// name → closure slot, for capture dedup
    pub capture_map: HashMap<String, u32>,
    /// Hidden local holding `this` for nested arrows
    pub this_slot: Option<u32>,
    /// Reserved lambda-table index
    pub lambda_index: LambdaIndex,
}

impl FunctionContext {
    fn new(name: Option<String>, lambda_index: LambdaIndex) -> Self {
        Self {
            name,
            instructions: Vec::new(),
            positions: Vec::new(),
            current_position: (1, 1),
            allocator: IndexAllocator::new(),
            scopes: FunctionScopes::new(),
            flags: LambdaFlags::default(),
            param_count: 0,
            param_names: Vec::new(),
            captures: Vec::new(),
            capture_map: HashMap::new(),
            this_slot: None,
            lambda_index,
        }
    }

    /// Record a capture (deduplicated by name); returns the closure slot
    pub fn add_capture(&mut self, name: &str, source: ScopeIndex) -> u32 {
        if let Some(slot) = self.capture_map.get(name) {
            return *slot;
        }
        let slot = self.captures.len() as u32;
        self.captures.push(Capture { source, slot });
        self.capture_map.insert(name.to_string(), slot);
        slot
    }

    fn build(self) -> Lambda {
        let mut source_map = SourceMap::new();
        let mut last = (0, 0);
        for (index, position) in self.positions.iter().enumerate() {
            if *position != last {
                source_map.add(index as u32, position.0, position.1);
                last = *position;
            }
        }
        Lambda {
            name: self.name,
            param_count: self.param_count,
            local_count: self.allocator.max_used(),
            closure_count: self.captures.len() as u32,
            flags: self.flags,
            captures: self.captures,
            instructions: self.instructions,
            source_map,
            param_names: self.param_names,
        }
    }
}

/// Code generator state shared across one compilation
pub struct CodeGen {
    /// Constant pool (deduplicated)
    pub constants: ConstantPool,
    /// Finished lambdas, entry at index 0 (reserved up front)
    lambdas: Vec<Option<Lambda>>,
    /// The function currently being lowered
    pub current: FunctionContext,
    /// Enclosing function contexts, outermost first
    stack: Vec<FunctionContext>,
    /// Top-level binding names by global slot
    globals: Vec<String>,
    global_map: HashMap<String, (u32, BindingKind)>,
    /// Import specifiers
    imports: Vec<String>,
    /// Byte offsets of line starts, for span → line/column
    line_starts: Vec<u32>,
}

impl CodeGen {
    /// Create a generator; the entry lambda's slot is reserved
    pub fn new(source: &str) -> Self {
        let mut line_starts = vec![0u32];
        for (offset, byte) in source.bytes().enumerate() {
            if byte == b'\n' {
                line_starts.push(offset as u32 + 1);
            }
        }
        Self {
            constants: ConstantPool::new(),
            lambdas: vec![None],
            current: FunctionContext::new(Some("main".to_string()), LambdaIndex::new(0)),
            stack: Vec::new(),
            globals: Vec::new(),
            global_map: HashMap::new(),
            imports: Vec::new(),
            line_starts,
        }
    }

    // ---- emission --------------------------------------------------------

    /// Emit an instruction at the current source position
    pub fn emit(&mut self, instruction: Instruction) {
        self.current.instructions.push(instruction);
        self.current.positions.push(self.current.current_position);
    }

    /// Set the source position from a byte offset
    pub fn set_position(&mut self, offset: u32) {
        let line_index = self
            .line_starts
            .partition_point(|start| *start <= offset)
            .saturating_sub(1);
        let line = line_index as u32 + 1;
        let column = offset - self.line_starts[line_index] + 1;
        self.current.current_position = (line, column);
    }

    /// Index of the next instruction (for patch targets)
    pub fn here(&self) -> usize {
        self.current.instructions.len()
    }

    /// Patch a forward jump so it lands on `target`
    pub fn patch_jump(&mut self, index: usize, target: usize) {
        let offset = JumpOffset::new(target as i32 - index as i32);
        match &mut self.current.instructions[index] {
            Instruction::Jump { offset: o }
            | Instruction::JumpIfTrue { offset: o, .. }
            | Instruction::JumpIfFalse { offset: o, .. }
            | Instruction::JumpIfEqual { offset: o, .. }
            | Instruction::TestIfTrue { offset: o, .. }
            | Instruction::TestIfFalse { offset: o, .. }
            | Instruction::Coalesce { offset: o, .. }
            | Instruction::PropertyNext { offset: o, .. }
            | Instruction::TryEnd { offset: o }
            | Instruction::TryBreak { offset: o, .. }
            | Instruction::TryContinue { offset: o, .. }
            | Instruction::TryReturn { offset: o, .. } => *o = offset,
            Instruction::TryStart { catch_offset, .. } => *catch_offset = offset,
            other => panic!("patch target {index} is not a jump: {}", other.name()),
        }
    }

    /// Patch the break target of a `Finally`
    pub fn patch_finally_break(&mut self, index: usize, target: usize) {
        if let Instruction::Finally { break_offset, .. } = &mut self.current.instructions[index] {
            *break_offset = JumpOffset::new(target as i32 - index as i32);
        }
    }

    /// Patch the continue target of a `Finally`
    pub fn patch_finally_continue(&mut self, index: usize, target: usize) {
        if let Instruction::Finally {
            continue_offset, ..
        } = &mut self.current.instructions[index]
        {
            *continue_offset = JumpOffset::new(target as i32 - index as i32);
        }
    }

    // ---- slots -----------------------------------------------------------

    /// Allocate a temporary local slot
    pub fn temp(&mut self) -> ScopeIndex {
        ScopeIndex::local(self.current.allocator.alloc_temp())
    }

    /// Release a temporary (only local-scope temps recycle)
    pub fn free_temp(&mut self, index: ScopeIndex) {
        if index.kind() == skink_vm_bytecode::ScopeKind::Local {
            self.current.allocator.free_temp(index.slot());
        }
    }

    // ---- constants -------------------------------------------------------

    /// Constant-scope index for a pooled constant
    pub fn constant(&mut self, constant: Constant) -> ScopeIndex {
        ScopeIndex::constant(self.constants.add(constant))
    }

    /// Pooled number constant
    pub fn number(&mut self, n: f64) -> ScopeIndex {
        self.constant(Constant::Number(n))
    }

    /// Pooled string constant
    pub fn string(&mut self, s: &str) -> ScopeIndex {
        self.constant(Constant::string(s))
    }

    /// Raw pool index of a string (for name operands)
    pub fn string_index(&mut self, s: &str) -> u32 {
        self.constants.add(Constant::string(s))
    }

    /// `undefined` constant
    pub fn undefined(&mut self) -> ScopeIndex {
        self.constant(Constant::Undefined)
    }

    // ---- declarations ----------------------------------------------------

    /// Whether declarations here are top-level (global-scope) bindings
    pub fn at_top_level(&self) -> bool {
        self.stack.is_empty() && self.current.scopes.depth() == 1
    }

    /// Declare a binding, returning its slot as a scope index
    pub fn declare(&mut self, name: &str, kind: BindingKind) -> CompileResult<ScopeIndex> {
        if self.at_top_level() {
            if let Some((slot, existing)) = self.global_map.get(name).copied() {
                if kind.is_lexical() || existing.is_lexical() {
                    return Err(CompileError::early(format!(
                        "Identifier '{name}' has already been declared"
                    )));
                }
                return Ok(ScopeIndex::new(skink_vm_bytecode::ScopeKind::Global, slot));
            }
            let slot = self.globals.len() as u32;
            self.globals.push(name.to_string());
            self.global_map.insert(name.to_string(), (slot, kind));
            return Ok(ScopeIndex::new(skink_vm_bytecode::ScopeKind::Global, slot));
        }

        let slot = self.current.allocator.alloc_binding();
        match self.current.scopes.declare(name, Binding { slot, kind }) {
            Some(binding) => Ok(ScopeIndex::local(binding.slot)),
            None => Err(CompileError::early(format!(
                "Identifier '{name}' has already been declared"
            ))),
        }
    }

    /// Resolve a name, chaining captures across enclosing functions
    pub fn resolve(&mut self, name: &str) -> Resolved {
        if let Some(binding) = self.current.scopes.lookup(name) {
            return Resolved::Local(binding);
        }

        // Walk enclosing functions, innermost (end of stack) first
        let mut found: Option<(usize, Binding)> = None;
        for (level, ctx) in self.stack.iter().enumerate().rev() {
            if let Some(binding) = ctx.scopes.lookup(name) {
                found = Some((level, binding));
                break;
            }
        }

        if let Some((level, binding)) = found {
            // Chain the capture through every function between the
            // declaring one and the current one
            let mut source = ScopeIndex::local(binding.slot);
            for ctx in self.stack[level + 1..].iter_mut() {
                let slot = ctx.add_capture(name, source);
                source = ScopeIndex::closure(slot);
            }
            let slot = self.current.add_capture(name, source);
            return Resolved::Closure {
                slot,
                kind: binding.kind,
            };
        }

        if let Some((slot, kind)) = self.global_map.get(name).copied() {
            return Resolved::Global { slot, kind };
        }
        Resolved::Unresolved
    }

    // ---- function nesting ------------------------------------------------

    /// Begin a nested function; its lambda-table slot is reserved now so
    /// `Function` instructions can reference it before it is built
    pub fn enter_function(&mut self, name: Option<String>) -> LambdaIndex {
        let index = LambdaIndex::new(self.lambdas.len() as u32);
        self.lambdas.push(None);
        let next = FunctionContext::new(name, index);
        let previous = std::mem::replace(&mut self.current, next);
        self.stack.push(previous);
        index
    }

    /// Finish the current nested function and restore its parent
    pub fn exit_function(&mut self) -> CompileResult<LambdaIndex> {
        let parent = self
            .stack
            .pop()
            .ok_or_else(|| CompileError::internal("exit_function at top level"))?;
        let finished = std::mem::replace(&mut self.current, parent);
        let index = finished.lambda_index;
        self.lambdas[index.index() as usize] = Some(finished.build());
        Ok(index)
    }

    // ---- imports ---------------------------------------------------------

    /// Record an import specifier
    pub fn import(&mut self, specifier: &str) {
        if !self.imports.iter().any(|s| s == specifier) {
            self.imports.push(specifier.to_string());
        }
    }

    // ---- finish ----------------------------------------------------------

    /// Seal the entry lambda and assemble the module
    pub fn finish(mut self, source_name: &str, is_module: bool) -> CompileResult<Module> {
        let entry = std::mem::replace(
            &mut self.current,
            FunctionContext::new(None, LambdaIndex::new(0)),
        );
        self.lambdas[0] = Some(entry.build());

        let mut builder = Module::builder(source_name);
        for lambda in self.lambdas {
            let lambda =
                lambda.ok_or_else(|| CompileError::internal("unfinished nested lambda"))?;
            builder.lambda(lambda);
        }
        for specifier in &self.imports {
            builder.import(specifier.clone());
        }
        Ok(builder
            .constants(self.constants)
            .globals(self.globals)
            .is_module(is_module)
            .build())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_patch_jump_relative() {
        let mut cg = CodeGen::new("x");
        cg.emit(Instruction::Jump {
            offset: JumpOffset::new(0),
        });
        cg.emit(Instruction::Nop);
        cg.emit(Instruction::Nop);
        cg.patch_jump(0, 3);
        assert_eq!(
            cg.current.instructions[0],
            Instruction::Jump {
                offset: JumpOffset::new(3)
            }
        );
    }

    #[test]
    fn test_top_level_declarations_are_globals() {
        let mut cg = CodeGen::new("var x");
        let idx = cg.declare("x", BindingKind::Var).unwrap();
        assert_eq!(idx.kind(), skink_vm_bytecode::ScopeKind::Global);
        assert!(matches!(cg.resolve("x"), Resolved::Global { .. }));
    }

    #[test]
    fn test_capture_chains_through_nesting() {
        let mut cg = CodeGen::new("");
        cg.enter_function(Some("outer".to_string()));
        cg.declare("x", BindingKind::Var).unwrap();
        cg.enter_function(Some("middle".to_string()));
        cg.enter_function(Some("inner".to_string()));

        let resolved = cg.resolve("x");
        assert!(matches!(resolved, Resolved::Closure { slot: 0, .. }));
        // The middle function transitively captures too
        cg.exit_function().unwrap();
        assert_eq!(cg.current.captures.len(), 1);
        cg.exit_function().unwrap();
        cg.exit_function().unwrap();
    }

    #[test]
    fn test_set_position() {
        let mut cg = CodeGen::new("ab\ncd\nef");
        cg.set_position(4);
        assert_eq!(cg.current.current_position, (2, 2));
        cg.set_position(0);
        assert_eq!(cg.current.current_position, (1, 1));
    }

    #[test]
    fn test_lexical_redeclaration_at_top_level() {
        let mut cg = CodeGen::new("");
        cg.declare("x", BindingKind::Let).unwrap();
        assert!(cg.declare("x", BindingKind::Let).is_err());
        cg.declare("y", BindingKind::Var).unwrap();
        cg.declare("y", BindingKind::Var).unwrap(); // var/var tolerated
    }
}
