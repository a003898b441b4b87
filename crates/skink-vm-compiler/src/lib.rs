//! # Skink VM compiler
//!
//! Lowers JavaScript source to the skink bytecode format. The parser
//! front end is `oxc`; this crate owns everything after the AST: scope
//! and slot allocation, the lvalue protocol, control-flow patching,
//! try/finally exit routing and closure-capture emission.

#![warn(clippy::all)]
#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod codegen;
pub mod compiler;
pub mod error;
pub mod scope;

pub use compiler::Compiler;
pub use error::{CompileError, CompileResult};

/// Compile script source to a module image
pub fn compile(source: &str, source_name: &str) -> CompileResult<skink_vm_bytecode::Module> {
    Compiler::compile(source, source_name, false)
}

/// Compile ES-module source to a module image
pub fn compile_module(
    source: &str,
    source_name: &str,
) -> CompileResult<skink_vm_bytecode::Module> {
    Compiler::compile(source, source_name, true)
}

/// Render the parsed AST (the CLI's `-a` flag)
pub fn dump_ast(source: &str, source_name: &str) -> CompileResult<String> {
    use oxc_allocator::Allocator;
    use oxc_parser::Parser;
    use oxc_span::SourceType;

    let allocator = Allocator::default();
    let source_type = SourceType::from_path(source_name).unwrap_or_default();
    let result = Parser::new(&allocator, source, source_type).parse();
    if !result.errors.is_empty() {
        return Err(CompileError::Parse(result.errors[0].to_string()));
    }
    Ok(format!("{:#?}", result.program))
}

#[cfg(test)]
mod tests {
    use skink_vm_bytecode::Instruction;

    #[test]
    fn test_compile_simple_expression() {
        let module = super::compile("1 + 2;", "test.js").unwrap();
        let entry = module.entry().unwrap();
        assert!(
            entry
                .instructions
                .iter()
                .any(|i| matches!(i, Instruction::Add { .. }))
        );
        assert!(
            entry
                .instructions
                .iter()
                .any(|i| matches!(i, Instruction::Stop { .. }))
        );
    }

    #[test]
    fn test_parse_error_is_syntax_error() {
        let err = super::compile("function (", "test.js").unwrap_err();
        assert!(matches!(err, super::CompileError::Parse(_)));
    }

    #[test]
    fn test_nested_function_produces_lambda() {
        let module = super::compile("function f() { return 1; } f();", "test.js").unwrap();
        assert_eq!(module.lambdas.len(), 2);
        assert_eq!(module.lambdas[1].display_name(), "f");
    }

    #[test]
    fn test_closure_capture_descriptor() {
        let module = super::compile(
            "function outer() { var x = 1; return function () { return x; }; }",
            "test.js",
        )
        .unwrap();
        let inner = module
            .lambdas
            .iter()
            .find(|l| l.name.is_none())
            .expect("anonymous inner lambda");
        assert_eq!(inner.captures.len(), 1);
    }

    #[test]
    fn test_top_level_var_is_global() {
        let module = super::compile("var x = 1;", "test.js").unwrap();
        assert_eq!(module.globals, vec!["x".to_string()]);
    }

    #[test]
    fn test_try_finally_emits_routing() {
        let module = super::compile(
            "function g(){ try { return 1; } finally { } }",
            "test.js",
        )
        .unwrap();
        let g = module.lambdas.iter().find(|l| l.display_name() == "g").unwrap();
        assert!(
            g.instructions
                .iter()
                .any(|i| matches!(i, Instruction::TryReturn { .. }))
        );
        assert!(
            g.instructions
                .iter()
                .any(|i| matches!(i, Instruction::Finally { .. }))
        );
    }

    #[test]
    fn test_await_requires_async() {
        // Rejected either by the parser (sloppy-mode `await` is not an
        // expression here) or by the lowering's async check
        assert!(super::compile("function f() { await 1; }", "test.js").is_err());
    }

    #[test]
    fn test_top_level_await_accepted() {
        let module = super::compile("await 1;", "test.mjs").unwrap();
        let entry = module.entry().unwrap();
        assert!(
            entry
                .instructions
                .iter()
                .any(|i| matches!(i, Instruction::Await { .. }))
        );
    }

    #[test]
    fn test_import_records_specifier() {
        let module =
            super::compile_module("import fs from \"fs\"; fs;", "test.mjs").unwrap();
        assert_eq!(module.imports, vec!["fs".to_string()]);
    }
}
