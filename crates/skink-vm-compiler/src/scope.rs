//! Slot allocation and lexical scopes for one function

use std::collections::HashMap;

/// Allocates local-scope slots: monotonic for bindings, free-listed for
/// short-lived temporaries
#[derive(Debug, Default)]
pub struct IndexAllocator {
    next: u32,
    max: u32,
    free: Vec<u32>,
}

impl IndexAllocator {
    /// Create a new allocator
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a temporary slot, reusing released ones
    pub fn alloc_temp(&mut self) -> u32 {
        if let Some(slot) = self.free.pop() {
            return slot;
        }
        self.alloc_binding()
    }

    /// Release a temporary for reuse
    pub fn free_temp(&mut self, slot: u32) {
        self.free.push(slot);
    }

    /// Allocate a binding slot (never reused)
    pub fn alloc_binding(&mut self) -> u32 {
        let slot = self.next;
        self.next += 1;
        self.max = self.max.max(self.next);
        slot
    }

    /// High-water mark of slots used
    pub fn max_used(&self) -> u32 {
        self.max
    }
}

/// Kind of a declared binding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingKind {
    /// `var` / hoisted function declaration
    Var,
    /// `let`
    Let,
    /// `const`
    Const,
}

impl BindingKind {
    /// Lexical bindings have a temporal dead zone
    pub fn is_lexical(self) -> bool {
        matches!(self, Self::Let | Self::Const)
    }
}

/// A declared binding
#[derive(Debug, Clone, Copy)]
pub struct Binding {
    /// Local slot
    pub slot: u32,
    /// Declaration kind
    pub kind: BindingKind,
}

/// Block-structured name table for one function
#[derive(Debug)]
pub struct FunctionScopes {
    blocks: Vec<HashMap<String, Binding>>,
}

impl FunctionScopes {
    /// Create with the function-body block open
    pub fn new() -> Self {
        Self {
            blocks: vec![HashMap::new()],
        }
    }

    /// Open a nested block
    pub fn enter_block(&mut self) {
        self.blocks.push(HashMap::new());
    }

    /// Close the innermost block
    pub fn exit_block(&mut self) {
        self.blocks.pop();
    }

    /// Block nesting depth (1 = function body)
    pub fn depth(&self) -> usize {
        self.blocks.len()
    }

    /// Declare in the innermost block; `None` on lexical redeclaration
    pub fn declare(&mut self, name: &str, binding: Binding) -> Option<Binding> {
        let block = self.blocks.last_mut().expect("function body block");
        if let Some(existing) = block.get(name) {
            // var may redeclare var; lexical redeclaration is an early error
            if binding.kind == BindingKind::Var && existing.kind == BindingKind::Var {
                return Some(*existing);
            }
            return None;
        }
        block.insert(name.to_string(), binding);
        Some(binding)
    }

    /// Resolve within this function, innermost block first
    pub fn lookup(&self, name: &str) -> Option<Binding> {
        self.blocks
            .iter()
            .rev()
            .find_map(|block| block.get(name).copied())
    }
}

impl Default for FunctionScopes {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn binding(slot: u32, kind: BindingKind) -> Binding {
        Binding { slot, kind }
    }

    #[test]
    fn test_allocator_reuses_temps() {
        let mut alloc = IndexAllocator::new();
        let a = alloc.alloc_temp();
        let b = alloc.alloc_temp();
        alloc.free_temp(a);
        let c = alloc.alloc_temp();
        assert_eq!(c, a);
        assert_ne!(b, c);
        assert_eq!(alloc.max_used(), 2);
    }

    #[test]
    fn test_bindings_never_reused() {
        let mut alloc = IndexAllocator::new();
        let a = alloc.alloc_binding();
        alloc.free_temp(a); // even if freed by mistake, bindings grow
        let b = alloc.alloc_binding();
        assert_ne!(a, b);
    }

    #[test]
    fn test_block_shadowing() {
        let mut scopes = FunctionScopes::new();
        scopes.declare("x", binding(0, BindingKind::Let)).unwrap();
        scopes.enter_block();
        scopes.declare("x", binding(1, BindingKind::Let)).unwrap();
        assert_eq!(scopes.lookup("x").unwrap().slot, 1);
        scopes.exit_block();
        assert_eq!(scopes.lookup("x").unwrap().slot, 0);
    }

    #[test]
    fn test_lexical_redeclaration_rejected() {
        let mut scopes = FunctionScopes::new();
        scopes.declare("x", binding(0, BindingKind::Let)).unwrap();
        assert!(scopes.declare("x", binding(1, BindingKind::Let)).is_none());
        // var/var is tolerated and keeps the first slot
        scopes.declare("y", binding(2, BindingKind::Var)).unwrap();
        assert_eq!(
            scopes
                .declare("y", binding(3, BindingKind::Var))
                .unwrap()
                .slot,
            2
        );
    }
}
