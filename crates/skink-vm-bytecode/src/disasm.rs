//! Bytecode disassembler
//!
//! Renders a compiled module as text for the CLI `-d` flag and for
//! compiler debugging.

use std::fmt::Write;

use crate::constant::Constant;
use crate::instruction::Instruction;
use crate::module::Module;

/// Render a whole module
pub fn disassemble(module: &Module) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "module {}", module.name);

    if !module.imports.is_empty() {
        let _ = writeln!(out, "imports: {}", module.imports.join(", "));
    }

    for (i, constant) in module.constants.iter().enumerate() {
        let _ = writeln!(out, "  k{i} = {}", format_constant(constant));
    }

    for (i, lambda) in module.lambdas.iter().enumerate() {
        let _ = writeln!(
            out,
            "\nlambda #{i} {} (params: {}, locals: {}, closure: {}){}",
            lambda.display_name(),
            lambda.param_count,
            lambda.local_count,
            lambda.closure_count,
            if lambda.is_async() { " async" } else { "" },
        );
        for (pc, instruction) in lambda.instructions.iter().enumerate() {
            let _ = writeln!(out, "  {pc:4}  {}", format_instruction(instruction));
        }
    }

    out
}

fn format_constant(constant: &Constant) -> String {
    match constant {
        Constant::Undefined => "undefined".to_string(),
        Constant::Null => "null".to_string(),
        Constant::Boolean(b) => b.to_string(),
        Constant::Number(n) => n.to_string(),
        Constant::String(s) => format!("{s:?}"),
        Constant::Regexp { pattern, flags } => format!("/{pattern}/{flags}"),
    }
}

/// Render a single instruction as `Name operands`
pub fn format_instruction(instruction: &Instruction) -> String {
    // Debug derive on the struct variants already prints the operand
    // fields; strip the braces down to a compact one-line form.
    let debug = format!("{instruction:?}");
    let compact = debug
        .replace(['{', '}'], " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    compact
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lambda::Lambda;
    use crate::operand::ScopeIndex;

    #[test]
    fn test_disassemble_module() {
        let mut builder = Module::builder("demo.js");
        builder.lambda(
            Lambda::builder()
                .name("main")
                .instruction(Instruction::Move {
                    dst: ScopeIndex::local(0),
                    src: ScopeIndex::constant(0),
                })
                .instruction(Instruction::Stop {
                    src: ScopeIndex::local(0),
                })
                .build(),
        );
        let mut module = builder.build();
        module.constants.add_number(42.0);

        let text = disassemble(&module);
        assert!(text.contains("module demo.js"));
        assert!(text.contains("k0 = 42"));
        assert!(text.contains("Move"));
        assert!(text.contains("Stop"));
    }

    #[test]
    fn test_format_instruction_compact() {
        let text = format_instruction(&Instruction::Move {
            dst: ScopeIndex::local(1),
            src: ScopeIndex::constant(2),
        });
        assert!(text.starts_with("Move"));
        assert!(text.contains("l1"));
        assert!(text.contains("k2"));
    }
}
