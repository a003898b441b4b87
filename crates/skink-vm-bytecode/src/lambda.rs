//! Compiled function bodies
//!
//! A `Lambda` is the immutable result of lowering one function: its
//! instructions, frame-size descriptor, capture list and source map.
//! Function *values* (closures) pair a lambda with captured slots at run
//! time.

use serde::{Deserialize, Serialize};

use crate::instruction::Instruction;
use crate::operand::ScopeIndex;

/// Lambda flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LambdaFlags {
    /// Async function (implicitly returns a promise)
    pub is_async: bool,
    /// Arrow function (lexical `this`, no own `arguments`)
    pub is_arrow: bool,
    /// May be invoked with `new`
    pub is_ctor: bool,
    /// Uses the `arguments` object
    pub uses_arguments: bool,
    /// Top-level module/script body
    pub is_top_level: bool,
}

/// One captured outer slot
///
/// At `Function` execution the interpreter copies the cell referenced by
/// `source` (resolved in the *declaring* frame) into the new closure's
/// slot vector at `slot`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capture {
    /// Slot in the declaring frame (local, argument or closure scope)
    pub source: ScopeIndex,
    /// Destination index in the new function's closure scope
    pub slot: u32,
}

/// A compiled function body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lambda {
    /// Function name (None for anonymous)
    pub name: Option<String>,
    /// Number of declared formal parameters
    pub param_count: u32,
    /// Local-scope slot count (variables plus call temporaries)
    pub local_count: u32,
    /// Closure-scope slot count
    pub closure_count: u32,
    /// Flags
    pub flags: LambdaFlags,
    /// Capture descriptors, ordered by closure slot
    pub captures: Vec<Capture>,
    /// Instructions
    pub instructions: Vec<Instruction>,
    /// Source location per instruction (for stack traces)
    pub source_map: SourceMap,
    /// Parameter names (diagnostics)
    pub param_names: Vec<String>,
}

impl Lambda {
    /// Start building a lambda
    pub fn builder() -> LambdaBuilder {
        LambdaBuilder::default()
    }

    /// Function name or `<anonymous>`
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("<anonymous>")
    }

    /// Check if async
    #[inline]
    pub fn is_async(&self) -> bool {
        self.flags.is_async
    }

    /// Check if arrow
    #[inline]
    pub fn is_arrow(&self) -> bool {
        self.flags.is_arrow
    }
}

/// Builder for lambdas
#[derive(Debug, Default)]
pub struct LambdaBuilder {
    name: Option<String>,
    param_count: u32,
    local_count: u32,
    closure_count: u32,
    flags: LambdaFlags,
    captures: Vec<Capture>,
    instructions: Vec<Instruction>,
    source_map: SourceMap,
    param_names: Vec<String>,
}

impl LambdaBuilder {
    /// Set function name
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set parameter count
    pub fn param_count(mut self, count: u32) -> Self {
        self.param_count = count;
        self
    }

    /// Set local slot count
    pub fn local_count(mut self, count: u32) -> Self {
        self.local_count = count;
        self
    }

    /// Set closure slot count
    pub fn closure_count(mut self, count: u32) -> Self {
        self.closure_count = count;
        self
    }

    /// Set flags
    pub fn flags(mut self, flags: LambdaFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Set capture descriptors
    pub fn captures(mut self, captures: Vec<Capture>) -> Self {
        self.captures = captures;
        self
    }

    /// Set all instructions
    pub fn instructions(mut self, instructions: Vec<Instruction>) -> Self {
        self.instructions = instructions;
        self
    }

    /// Append a single instruction
    pub fn instruction(mut self, instruction: Instruction) -> Self {
        self.instructions.push(instruction);
        self
    }

    /// Set the source map
    pub fn source_map(mut self, source_map: SourceMap) -> Self {
        self.source_map = source_map;
        self
    }

    /// Set parameter names
    pub fn param_names(mut self, names: Vec<String>) -> Self {
        self.param_names = names;
        self
    }

    /// Build the lambda
    pub fn build(self) -> Lambda {
        Lambda {
            name: self.name,
            param_count: self.param_count,
            local_count: self.local_count,
            closure_count: self.closure_count,
            flags: self.flags,
            captures: self.captures,
            instructions: self.instructions,
            source_map: self.source_map,
            param_names: self.param_names,
        }
    }
}

/// Source location mapping: instruction index → (line, column)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceMap {
    entries: Vec<SourceMapEntry>,
}

/// A single source map entry
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SourceMapEntry {
    /// Instruction index
    pub instruction_index: u32,
    /// Line number (1-indexed)
    pub line: u32,
    /// Column number (1-indexed)
    pub column: u32,
}

impl SourceMap {
    /// Create an empty source map
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a mapping entry; entries must be appended in instruction order
    pub fn add(&mut self, instruction_index: u32, line: u32, column: u32) {
        self.entries.push(SourceMapEntry {
            instruction_index,
            line,
            column,
        });
    }

    /// Find the source location covering an instruction index
    pub fn find(&self, instruction_index: u32) -> Option<&SourceMapEntry> {
        let idx = self
            .entries
            .binary_search_by_key(&instruction_index, |e| e.instruction_index);

        match idx {
            Ok(i) => Some(&self.entries[i]),
            Err(i) if i > 0 => Some(&self.entries[i - 1]),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operand::ScopeIndex;

    #[test]
    fn test_lambda_builder() {
        let lambda = Lambda::builder()
            .name("add")
            .param_count(2)
            .local_count(1)
            .instruction(Instruction::Add {
                dst: ScopeIndex::local(0),
                lhs: ScopeIndex::argument(0),
                rhs: ScopeIndex::argument(1),
            })
            .instruction(Instruction::Return {
                src: ScopeIndex::local(0),
            })
            .build();

        assert_eq!(lambda.display_name(), "add");
        assert_eq!(lambda.param_count, 2);
        assert_eq!(lambda.instructions.len(), 2);
        assert!(!lambda.is_async());
    }

    #[test]
    fn test_source_map_lookup() {
        let mut map = SourceMap::new();
        map.add(0, 1, 1);
        map.add(5, 2, 5);
        map.add(10, 3, 1);

        assert_eq!(map.find(0).unwrap().line, 1);
        assert_eq!(map.find(5).unwrap().line, 2);
        assert_eq!(map.find(7).unwrap().line, 2); // between entries
        assert_eq!(map.find(10).unwrap().line, 3);
    }

    #[test]
    fn test_captures() {
        let lambda = Lambda::builder()
            .closure_count(1)
            .captures(vec![Capture {
                source: ScopeIndex::local(2),
                slot: 0,
            }])
            .build();

        assert_eq!(lambda.captures.len(), 1);
        assert_eq!(lambda.captures[0].source.slot(), 2);
    }
}
