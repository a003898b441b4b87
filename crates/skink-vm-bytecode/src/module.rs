//! Compiled module image
//!
//! A `Module` bundles everything produced by one compilation: the lambda
//! table (entry lambda first), the deduplicated constant pool and the
//! import specifiers referenced by `Import` instructions. Modules are
//! immutable after compilation and shared behind `Arc`.

use serde::{Deserialize, Serialize};

use crate::constant::{Constant, ConstantPool};
use crate::error::BytecodeError;
use crate::lambda::Lambda;
use crate::operand::LambdaIndex;

/// A compiled module
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Module {
    /// Source name (file path or synthetic name like `<inline>`)
    pub name: String,
    /// Lambda table; index 0 is the entry lambda
    pub lambdas: Vec<Lambda>,
    /// Constant pool
    pub constants: ConstantPool,
    /// Import specifiers referenced by `Import` instructions
    pub imports: Vec<String>,
    /// Names of top-level bindings, by global-scope slot. The VM links
    /// these against its global bindings at start so separate compilations
    /// agree on slots by name.
    pub globals: Vec<String>,
    /// Whether the source was compiled as an ES module
    pub is_module: bool,
}

impl Module {
    /// Start building a module
    pub fn builder(name: impl Into<String>) -> ModuleBuilder {
        ModuleBuilder {
            name: name.into(),
            lambdas: Vec::new(),
            constants: ConstantPool::new(),
            imports: Vec::new(),
            globals: Vec::new(),
            is_module: false,
        }
    }

    /// The entry lambda, if compilation produced one
    pub fn entry(&self) -> Option<&Lambda> {
        self.lambdas.first()
    }

    /// Look up a lambda by index
    pub fn lambda(&self, index: LambdaIndex) -> Result<&Lambda, BytecodeError> {
        self.lambdas
            .get(index.index() as usize)
            .ok_or(BytecodeError::LambdaOutOfBounds(index.index()))
    }

    /// Look up a constant by index
    pub fn constant(&self, index: u32) -> Result<&Constant, BytecodeError> {
        self.constants
            .get(index)
            .ok_or(BytecodeError::ConstantOutOfBounds(index))
    }

    /// Look up a string constant, failing on other kinds
    pub fn string_constant(&self, index: u32) -> Result<&str, BytecodeError> {
        match self.constant(index)? {
            Constant::String(s) => Ok(s),
            other => Err(BytecodeError::ConstantType {
                index,
                expected: "string",
                found: kind_name(other),
            }),
        }
    }
}

fn kind_name(c: &Constant) -> &'static str {
    match c {
        Constant::Undefined => "undefined",
        Constant::Null => "null",
        Constant::Boolean(_) => "boolean",
        Constant::Number(_) => "number",
        Constant::String(_) => "string",
        Constant::Regexp { .. } => "regexp",
    }
}

/// Builder for modules
#[derive(Debug)]
pub struct ModuleBuilder {
    name: String,
    lambdas: Vec<Lambda>,
    constants: ConstantPool,
    imports: Vec<String>,
    globals: Vec<String>,
    is_module: bool,
}

impl ModuleBuilder {
    /// Append a lambda, returning its index
    pub fn lambda(&mut self, lambda: Lambda) -> LambdaIndex {
        let idx = LambdaIndex::new(self.lambdas.len() as u32);
        self.lambdas.push(lambda);
        idx
    }

    /// Replace the constant pool
    pub fn constants(mut self, constants: ConstantPool) -> Self {
        self.constants = constants;
        self
    }

    /// Record an import specifier, returning its position
    pub fn import(&mut self, specifier: impl Into<String>) -> usize {
        let specifier = specifier.into();
        if let Some(pos) = self.imports.iter().position(|s| *s == specifier) {
            return pos;
        }
        self.imports.push(specifier);
        self.imports.len() - 1
    }

    /// Mark the source as an ES module
    pub fn is_module(mut self, is_module: bool) -> Self {
        self.is_module = is_module;
        self
    }

    /// Record the top-level binding names, by global-scope slot
    pub fn globals(mut self, globals: Vec<String>) -> Self {
        self.globals = globals;
        self
    }

    /// Build the module
    pub fn build(self) -> Module {
        Module {
            name: self.name,
            lambdas: self.lambdas,
            constants: self.constants,
            imports: self.imports,
            globals: self.globals,
            is_module: self.is_module,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lambda::Lambda;

    #[test]
    fn test_module_builder() {
        let mut builder = Module::builder("test.js");
        let idx = builder.lambda(Lambda::builder().name("main").build());
        let module = builder.build();

        assert_eq!(module.name, "test.js");
        assert_eq!(idx.index(), 0);
        assert_eq!(module.entry().unwrap().display_name(), "main");
    }

    #[test]
    fn test_lambda_out_of_bounds() {
        let module = Module::builder("test.js").build();
        assert!(module.lambda(LambdaIndex::new(3)).is_err());
    }

    #[test]
    fn test_import_dedup() {
        let mut builder = Module::builder("test.js");
        assert_eq!(builder.import("fs"), 0);
        assert_eq!(builder.import("path"), 1);
        assert_eq!(builder.import("fs"), 0);
        assert_eq!(builder.build().imports.len(), 2);
    }
}
