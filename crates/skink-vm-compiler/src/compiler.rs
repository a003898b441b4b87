//! AST → bytecode lowering
//!
//! Recursive descent over the oxc AST. Expressions compile into a scope
//! index holding their value (a recycled local temporary, a binding slot
//! or a constant-pool slot); statements emit straight into the current
//! function context. Loops and switches open block records with
//! break/continue patch lists; try/finally wires the exit-value routing
//! the `Finally` instruction re-dispatches.

use oxc_allocator::Allocator;
use oxc_ast::ast::*;
use oxc_parser::Parser;
use oxc_span::SourceType;

use skink_vm_bytecode::{
    Constant, ErrorKind, Instruction, JumpOffset, Module, ScopeIndex,
};

use crate::codegen::{CodeGen, Resolved};
use crate::error::{CompileError, CompileResult};
use crate::scope::BindingKind;

/// Maximum AST nesting depth to prevent stack overflow during compilation
const MAX_COMPILE_DEPTH: usize = 500;

/// A loop, switch or labeled construct accepting break/continue
#[derive(Debug)]
struct ControlScope {
    is_loop: bool,
    labels: Vec<String>,
    /// Forward jumps to the break target
    break_jumps: Vec<usize>,
    /// Forward jumps to the continue target
    continue_jumps: Vec<usize>,
    /// `Finally` instructions whose break target is this scope's end
    finally_breaks: Vec<usize>,
    /// `Finally` instructions whose continue target is this scope's
    /// continue point
    finally_continues: Vec<usize>,
    /// Open-try depth when this scope was opened
    try_depth: usize,
}

/// An open protected region
#[derive(Debug)]
struct TryScope {
    exit_slot: ScopeIndex,
    has_finally: bool,
    /// TryBreak/TryContinue/TryReturn indices, patched to the finally
    /// entry once known
    routed: Vec<usize>,
    /// Whether any routed jump was a break / continue (the emitted
    /// `Finally` must then be registered with the enclosing loop)
    routes_break: bool,
    routes_continue: bool,
}

/// The compiler
pub struct Compiler {
    codegen: CodeGen,
    control: Vec<ControlScope>,
    tries: Vec<TryScope>,
    depth: usize,
    pending_labels: Vec<String>,
    /// Named exports: export name → top-level binding name
    exports: Vec<(String, String)>,
    /// Slot of the `export default` value
    default_export: Option<ScopeIndex>,
    is_module: bool,
}

impl Compiler {
    /// Compile source text to a module image
    pub fn compile(source: &str, source_name: &str, as_module: bool) -> CompileResult<Module> {
        let allocator = Allocator::default();
        let mut source_type = SourceType::from_path(source_name).unwrap_or_default();
        if as_module {
            source_type = source_type.with_module(true);
        } else if !source_type.is_module() {
            source_type = source_type.with_script(true);
        }

        let parser = Parser::new(&allocator, source, source_type);
        let result = parser.parse();
        if !result.errors.is_empty() {
            return Err(CompileError::Parse(result.errors[0].to_string()));
        }

        let mut compiler = Self {
            codegen: CodeGen::new(source),
            control: Vec::new(),
            tries: Vec::new(),
            depth: 0,
            pending_labels: Vec::new(),
            exports: Vec::new(),
            default_export: None,
            is_module: as_module,
        };
        compiler.compile_program(&result.program)?;
        compiler.codegen.finish(source_name, as_module)
    }

    fn enter_depth(&mut self) -> CompileResult<()> {
        self.depth += 1;
        if self.depth > MAX_COMPILE_DEPTH {
            return Err(CompileError::internal("maximum AST nesting depth exceeded"));
        }
        Ok(())
    }

    fn exit_depth(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    // ======================================================================
    // Program and statement lists
    // ======================================================================

    fn compile_program(&mut self, program: &Program) -> CompileResult<()> {
        self.codegen.current.flags.is_top_level = true;

        // Completion value of the script (last expression statement)
        let completion = self.codegen.temp();
        let undef = self.codegen.undefined();
        self.codegen.emit(Instruction::Move {
            dst: completion,
            src: undef,
        });

        self.compile_statements(&program.body, Some(completion), true)?;

        if self.is_module && (!self.exports.is_empty() || self.default_export.is_some()) {
            self.emit_module_exports(completion)?;
        }
        self.codegen.emit(Instruction::Stop { src: completion });
        Ok(())
    }

    /// Module completion value: the default export alone, or an object of
    /// the named exports (plus `default` when both exist)
    fn emit_module_exports(&mut self, completion: ScopeIndex) -> CompileResult<()> {
        if self.exports.is_empty() {
            let default = self.default_export.expect("checked by caller");
            self.codegen.emit(Instruction::Move {
                dst: completion,
                src: default,
            });
            return Ok(());
        }

        self.codegen.emit(Instruction::Object { dst: completion });
        let exports = std::mem::take(&mut self.exports);
        for (export_name, binding_name) in exports {
            let key = self.codegen.string(&export_name);
            let value = self.compile_identifier_load(&binding_name)?;
            self.codegen.emit(Instruction::PropertyInit {
                obj: completion,
                key,
                src: value,
            });
            self.codegen.free_temp(value);
        }
        if let Some(default) = self.default_export {
            let key = self.codegen.string("default");
            self.codegen.emit(Instruction::PropertyInit {
                obj: completion,
                key,
                src: default,
            });
        }
        Ok(())
    }

    /// Compile a statement list: lexical dead-zone marks, hoisted function
    /// declarations, then the statements in order. `hoist_vars` runs the
    /// function-scope `var` pass and is set only for function bodies and
    /// the program (nested blocks alias the function-level slots).
    fn compile_statements(
        &mut self,
        statements: &[Statement],
        completion: Option<ScopeIndex>,
        hoist_vars: bool,
    ) -> CompileResult<()> {
        if hoist_vars {
            self.hoist_var_declarations(statements)?;
        }
        self.predeclare_lexicals(statements)?;

        // Function declarations are created before any other statement runs
        let mut hoisted = Vec::new();
        for (index, statement) in statements.iter().enumerate() {
            if let Statement::FunctionDeclaration(func) = statement {
                self.compile_function_declaration(func)?;
                hoisted.push(index);
            }
        }

        for (index, statement) in statements.iter().enumerate() {
            if hoisted.contains(&index) {
                continue;
            }
            match (completion, statement) {
                (Some(slot), Statement::ExpressionStatement(expr_stmt)) => {
                    self.codegen.set_position(expr_stmt.span.start);
                    let value = self.compile_expression(&expr_stmt.expression)?;
                    self.codegen.emit(Instruction::Move {
                        dst: slot,
                        src: value,
                    });
                    self.codegen.free_temp(value);
                }
                _ => self.compile_statement(statement)?,
            }
        }
        Ok(())
    }

    /// Declare every `var` in this function body (descending into nested
    /// blocks but not nested functions) so use-before-declaration reads
    /// undefined.
    fn hoist_var_declarations(&mut self, statements: &[Statement]) -> CompileResult<()> {
        let mut names = Vec::new();
        collect_var_names(statements, &mut names);
        for name in names {
            // Tolerates duplicates: var/var re-declaration shares the slot
            let slot = self.codegen.declare(&name, BindingKind::Var)?;
            self.codegen.emit(Instruction::Let { dst: slot });
        }
        Ok(())
    }

    /// Mark the direct lexical declarations of this block uninitialized
    fn predeclare_lexicals(&mut self, statements: &[Statement]) -> CompileResult<()> {
        for statement in statements {
            if let Statement::VariableDeclaration(decl) = statement {
                let kind = match decl.kind {
                    VariableDeclarationKind::Let => BindingKind::Let,
                    VariableDeclarationKind::Const => BindingKind::Const,
                    _ => continue,
                };
                for declarator in &decl.declarations {
                    let mut names = Vec::new();
                    collect_binding_names(&declarator.id, &mut names);
                    for name in names {
                        let slot = self.codegen.declare(&name, kind)?;
                        self.codegen.emit(Instruction::NotInitialized { dst: slot });
                    }
                }
            }
        }
        Ok(())
    }

    // ======================================================================
    // Statements
    // ======================================================================

    fn compile_statement(&mut self, statement: &Statement) -> CompileResult<()> {
        self.enter_depth()?;
        let result = self.compile_statement_inner(statement);
        self.exit_depth();
        result
    }

    fn compile_statement_inner(&mut self, statement: &Statement) -> CompileResult<()> {
        match statement {
            Statement::ExpressionStatement(expr_stmt) => {
                self.codegen.set_position(expr_stmt.span.start);
                let value = self.compile_expression(&expr_stmt.expression)?;
                self.codegen.free_temp(value);
                Ok(())
            }
            Statement::VariableDeclaration(decl) => self.compile_variable_declaration(decl),
            Statement::EmptyStatement(_) => Ok(()),
            Statement::DebuggerStatement(_) => {
                self.codegen.emit(Instruction::Debugger);
                Ok(())
            }
            Statement::BlockStatement(block) => {
                self.codegen.current.scopes.enter_block();
                let result = self.compile_statements(&block.body, None, false);
                self.codegen.current.scopes.exit_block();
                result
            }
            Statement::IfStatement(if_stmt) => self.compile_if(if_stmt),
            Statement::WhileStatement(while_stmt) => self.compile_while(while_stmt),
            Statement::DoWhileStatement(do_while) => self.compile_do_while(do_while),
            Statement::ForStatement(for_stmt) => self.compile_for(for_stmt),
            Statement::ForInStatement(for_in) => self.compile_for_in(for_in),
            Statement::ForOfStatement(for_of) => self.compile_for_of(for_of),
            Statement::SwitchStatement(switch) => self.compile_switch(switch),
            Statement::TryStatement(try_stmt) => self.compile_try(try_stmt),
            Statement::ThrowStatement(throw_stmt) => {
                self.codegen.set_position(throw_stmt.span.start);
                let value = self.compile_expression(&throw_stmt.argument)?;
                self.codegen.emit(Instruction::Throw { src: value });
                self.codegen.free_temp(value);
                Ok(())
            }
            Statement::ReturnStatement(ret) => self.compile_return(ret),
            Statement::BreakStatement(break_stmt) => {
                self.compile_break(break_stmt.label.as_ref().map(|l| l.name.as_str()))
            }
            Statement::ContinueStatement(continue_stmt) => {
                self.compile_continue(continue_stmt.label.as_ref().map(|l| l.name.as_str()))
            }
            Statement::LabeledStatement(labeled) => {
                self.pending_labels.push(labeled.label.name.to_string());
                match &labeled.body {
                    Statement::ForStatement(_)
                    | Statement::ForInStatement(_)
                    | Statement::ForOfStatement(_)
                    | Statement::WhileStatement(_)
                    | Statement::DoWhileStatement(_)
                    | Statement::SwitchStatement(_) => self.compile_statement(&labeled.body),
                    _ => {
                        self.pending_labels.pop();
                        Err(CompileError::unsupported("label on a non-loop statement"))
                    }
                }
            }
            Statement::FunctionDeclaration(func) => self.compile_function_declaration(func),
            Statement::ImportDeclaration(import) => self.compile_import(import),
            Statement::ExportNamedDeclaration(export) => self.compile_export_named(export),
            Statement::ExportDefaultDeclaration(export) => self.compile_export_default(export),
            Statement::ExportAllDeclaration(_) => {
                Err(CompileError::unsupported("export * re-exports"))
            }
            Statement::WithStatement(_) => Err(CompileError::unsupported("with statement")),
            Statement::ClassDeclaration(_) => Err(CompileError::unsupported("class declarations")),
            other => Err(CompileError::unsupported(format!(
                "statement {:?}",
                std::mem::discriminant(other)
            ))),
        }
    }

    fn compile_variable_declaration(
        &mut self,
        decl: &VariableDeclaration,
    ) -> CompileResult<()> {
        let kind = match decl.kind {
            VariableDeclarationKind::Var => BindingKind::Var,
            VariableDeclarationKind::Let => BindingKind::Let,
            VariableDeclarationKind::Const => BindingKind::Const,
            _ => return Err(CompileError::unsupported("using declarations")),
        };

        for declarator in &decl.declarations {
            self.codegen.set_position(declarator.span.start);
            match &declarator.id {
                BindingPattern::BindingIdentifier(ident) => {
                    // var slots exist from hoisting, lexical slots from
                    // predeclaration; resolve either way
                    let slot = self.binding_slot(&ident.name, kind)?;
                    match &declarator.init {
                        Some(init) => {
                            let value = self.compile_expression(init)?;
                            if kind.is_lexical() {
                                self.codegen
                                    .emit(Instruction::LetUpdate { dst: slot, src: value });
                            } else {
                                self.codegen
                                    .emit(Instruction::Move { dst: slot, src: value });
                            }
                            self.name_anonymous_function(init, value, &ident.name);
                            self.codegen.free_temp(value);
                        }
                        None => {
                            if kind.is_lexical() {
                                self.codegen.emit(Instruction::Let { dst: slot });
                            }
                        }
                    }
                }
                pattern => {
                    let init = declarator
                        .init
                        .as_ref()
                        .ok_or_else(|| CompileError::early("missing destructuring initializer"))?;
                    let value = self.compile_expression(init)?;
                    self.compile_binding_pattern(pattern, value, kind)?;
                    self.codegen.free_temp(value);
                }
            }
        }
        Ok(())
    }

    /// Slot of a binding that hoisting or predeclaration already created
    /// (declaring it on first sight otherwise). Function-scope lookups win;
    /// a hoisted top-level binding aliases its global slot from any block.
    fn binding_slot(&mut self, name: &str, kind: BindingKind) -> CompileResult<ScopeIndex> {
        match self.codegen.resolve(name) {
            Resolved::Local(binding) => Ok(ScopeIndex::local(binding.slot)),
            Resolved::Global { slot, .. } => {
                Ok(ScopeIndex::new(skink_vm_bytecode::ScopeKind::Global, slot))
            }
            _ => self.codegen.declare(name, kind),
        }
    }

    /// Destructure `value` into a binding pattern
    fn compile_binding_pattern(
        &mut self,
        pattern: &BindingPattern,
        value: ScopeIndex,
        kind: BindingKind,
    ) -> CompileResult<()> {
        match pattern {
            BindingPattern::BindingIdentifier(ident) => {
                let slot = self.binding_slot(&ident.name, kind)?;
                if kind.is_lexical() {
                    self.codegen
                        .emit(Instruction::LetUpdate { dst: slot, src: value });
                } else {
                    self.codegen
                        .emit(Instruction::Move { dst: slot, src: value });
                }
                Ok(())
            }
            BindingPattern::AssignmentPattern(assign) => {
                // Default value applies when the incoming value is undefined
                let undef = self.codegen.undefined();
                let cond = self.codegen.temp();
                self.codegen.emit(Instruction::StrictEq {
                    dst: cond,
                    lhs: value,
                    rhs: undef,
                });
                let skip = self.emit_jump_if_false(cond);
                self.codegen.free_temp(cond);
                let default = self.compile_expression(&assign.right)?;
                self.codegen.emit(Instruction::Move {
                    dst: value,
                    src: default,
                });
                self.codegen.free_temp(default);
                let here = self.codegen.here();
                self.codegen.patch_jump(skip, here);
                self.compile_binding_pattern(&assign.left, value, kind)
            }
            BindingPattern::ObjectPattern(object) => {
                for prop in &object.properties {
                    let key = self.compile_property_key(&prop.key, prop.computed)?;
                    let element = self.codegen.temp();
                    self.codegen.emit(Instruction::PropertyGet {
                        dst: element,
                        obj: value,
                        key,
                    });
                    self.compile_binding_pattern(&prop.value, element, kind)?;
                    self.codegen.free_temp(element);
                    self.codegen.free_temp(key);
                }
                if object.rest.is_some() {
                    return Err(CompileError::unsupported("rest element in object pattern"));
                }
                Ok(())
            }
            BindingPattern::ArrayPattern(array) => {
                for (index, element) in array.elements.iter().enumerate() {
                    let Some(element) = element else { continue };
                    let key = self.codegen.number(index as f64);
                    let item = self.codegen.temp();
                    self.codegen.emit(Instruction::PropertyGet {
                        dst: item,
                        obj: value,
                        key,
                    });
                    self.compile_binding_pattern(element, item, kind)?;
                    self.codegen.free_temp(item);
                }
                if array.rest.is_some() {
                    return Err(CompileError::unsupported("rest element in array pattern"));
                }
                Ok(())
            }
        }
    }

    fn compile_if(&mut self, if_stmt: &IfStatement) -> CompileResult<()> {
        let cond = self.compile_expression(&if_stmt.test)?;
        let to_else = self.emit_jump_if_false(cond);
        self.codegen.free_temp(cond);

        self.compile_statement(&if_stmt.consequent)?;
        match &if_stmt.alternate {
            Some(alternate) => {
                let to_end = self.emit_jump();
                let here = self.codegen.here();
                self.codegen.patch_jump(to_else, here);
                self.compile_statement(alternate)?;
                let here = self.codegen.here();
                self.codegen.patch_jump(to_end, here);
            }
            None => {
                let here = self.codegen.here();
                self.codegen.patch_jump(to_else, here);
            }
        }
        Ok(())
    }

    fn open_control(&mut self, is_loop: bool) {
        let labels = std::mem::take(&mut self.pending_labels);
        self.control.push(ControlScope {
            is_loop,
            labels,
            break_jumps: Vec::new(),
            continue_jumps: Vec::new(),
            finally_breaks: Vec::new(),
            finally_continues: Vec::new(),
            try_depth: self.tries.len(),
        });
    }

    /// Close a control scope, patching break and continue targets
    fn close_control(&mut self, continue_target: Option<usize>) {
        let scope = self.control.pop().expect("balanced control scopes");
        let end = self.codegen.here();
        for jump in scope.break_jumps {
            self.codegen.patch_jump(jump, end);
        }
        for finally in scope.finally_breaks {
            self.codegen.patch_finally_break(finally, end);
        }
        if let Some(target) = continue_target {
            for jump in scope.continue_jumps {
                self.codegen.patch_jump(jump, target);
            }
            for finally in scope.finally_continues {
                self.codegen.patch_finally_continue(finally, target);
            }
        }
    }

    fn compile_while(&mut self, while_stmt: &WhileStatement) -> CompileResult<()> {
        self.open_control(true);
        let loop_start = self.codegen.here();

        let cond = self.compile_expression(&while_stmt.test)?;
        let to_end = self.emit_jump_if_false(cond);
        self.codegen.free_temp(cond);

        self.compile_statement(&while_stmt.body)?;
        self.emit_jump_back(loop_start);

        let here = self.codegen.here();
        self.codegen.patch_jump(to_end, here);
        self.close_control(Some(loop_start));
        Ok(())
    }

    fn compile_do_while(&mut self, do_while: &DoWhileStatement) -> CompileResult<()> {
        self.open_control(true);
        let body_start = self.codegen.here();
        self.compile_statement(&do_while.body)?;

        let test_start = self.codegen.here();
        let cond = self.compile_expression(&do_while.test)?;
        let jump = self.codegen.here();
        self.codegen.emit(Instruction::JumpIfTrue {
            cond,
            offset: JumpOffset::new(body_start as i32 - jump as i32),
        });
        self.codegen.free_temp(cond);
        self.close_control(Some(test_start));
        Ok(())
    }

    fn compile_for(&mut self, for_stmt: &ForStatement) -> CompileResult<()> {
        self.codegen.current.scopes.enter_block();

        if let Some(init) = &for_stmt.init {
            match init {
                ForStatementInit::VariableDeclaration(decl) => {
                    // Loop-scoped lexicals need their dead zone first
                    self.predeclare_for_init(decl)?;
                    self.compile_variable_declaration(decl)?;
                }
                other => {
                    let value = self.compile_for_init_expression(other)?;
                    self.codegen.free_temp(value);
                }
            }
        }

        self.open_control(true);
        let loop_start = self.codegen.here();

        let to_end = match &for_stmt.test {
            Some(test) => {
                let cond = self.compile_expression(test)?;
                let jump = self.emit_jump_if_false(cond);
                self.codegen.free_temp(cond);
                Some(jump)
            }
            None => None,
        };

        self.compile_statement(&for_stmt.body)?;

        let continue_target = self.codegen.here();
        if let Some(update) = &for_stmt.update {
            let value = self.compile_expression(update)?;
            self.codegen.free_temp(value);
        }
        self.emit_jump_back(loop_start);

        let here = self.codegen.here();
        if let Some(jump) = to_end {
            self.codegen.patch_jump(jump, here);
        }
        self.close_control(Some(continue_target));
        self.codegen.current.scopes.exit_block();
        Ok(())
    }

    fn predeclare_for_init(&mut self, decl: &VariableDeclaration) -> CompileResult<()> {
        let kind = match decl.kind {
            VariableDeclarationKind::Let => BindingKind::Let,
            VariableDeclarationKind::Const => BindingKind::Const,
            _ => return Ok(()),
        };
        for declarator in &decl.declarations {
            let mut names = Vec::new();
            collect_binding_names(&declarator.id, &mut names);
            for name in names {
                let slot = self.codegen.declare(&name, kind)?;
                self.codegen.emit(Instruction::NotInitialized { dst: slot });
            }
        }
        Ok(())
    }

    fn compile_for_init_expression(
        &mut self,
        init: &ForStatementInit,
    ) -> CompileResult<ScopeIndex> {
        match init {
            ForStatementInit::VariableDeclaration(_) => {
                Err(CompileError::internal("declaration handled by caller"))
            }
            other => {
                let expr = other
                    .as_expression()
                    .ok_or_else(|| CompileError::unsupported("for-init form"))?;
                self.compile_expression(expr)
            }
        }
    }

    fn compile_for_in(&mut self, for_in: &ForInStatement) -> CompileResult<()> {
        self.codegen.current.scopes.enter_block();

        let object = self.compile_expression(&for_in.right)?;
        let iter = self.codegen.temp();
        self.codegen.emit(Instruction::PropertyForeach {
            dst: iter,
            obj: object,
        });
        self.codegen.free_temp(object);

        self.open_control(true);
        // Jump forward to the PropertyNext at the loop tail
        let to_next = self.emit_jump();
        let body_start = self.codegen.here();

        let key = self.codegen.temp();
        self.bind_for_target(&for_in.left, key)?;
        self.compile_statement(&for_in.body)?;

        let next = self.codegen.here();
        self.codegen.patch_jump(to_next, next);
        self.codegen.emit(Instruction::PropertyNext {
            dst: key,
            iter,
            offset: JumpOffset::new(body_start as i32 - next as i32),
        });

        self.codegen.free_temp(key);
        self.codegen.free_temp(iter);
        self.close_control(Some(next));
        self.codegen.current.scopes.exit_block();
        Ok(())
    }

    /// for-of over array-likes and strings: an index-driven loop
    fn compile_for_of(&mut self, for_of: &ForOfStatement) -> CompileResult<()> {
        self.codegen.current.scopes.enter_block();

        let iterable = self.compile_expression(&for_of.right)?;
        let length = self.codegen.temp();
        let length_key = self.codegen.string("length");
        self.codegen.emit(Instruction::PropertyGet {
            dst: length,
            obj: iterable,
            key: length_key,
        });
        let index = self.codegen.temp();
        let zero = self.codegen.number(0.0);
        self.codegen.emit(Instruction::Move {
            dst: index,
            src: zero,
        });

        self.open_control(true);
        let loop_start = self.codegen.here();
        let cond = self.codegen.temp();
        self.codegen.emit(Instruction::Lt {
            dst: cond,
            lhs: index,
            rhs: length,
        });
        let to_end = self.emit_jump_if_false(cond);
        self.codegen.free_temp(cond);

        let element = self.codegen.temp();
        self.codegen.emit(Instruction::PropertyGet {
            dst: element,
            obj: iterable,
            key: index,
        });
        self.bind_for_target(&for_of.left, element)?;
        self.codegen.free_temp(element);

        self.compile_statement(&for_of.body)?;

        let continue_target = self.codegen.here();
        self.codegen.emit(Instruction::Inc {
            dst: index,
            src: index,
        });
        self.emit_jump_back(loop_start);

        let here = self.codegen.here();
        self.codegen.patch_jump(to_end, here);
        self.close_control(Some(continue_target));

        self.codegen.free_temp(index);
        self.codegen.free_temp(length);
        self.codegen.free_temp(iterable);
        self.codegen.current.scopes.exit_block();
        Ok(())
    }

    /// Bind the loop variable of for-in / for-of
    fn bind_for_target(&mut self, left: &ForStatementLeft, value: ScopeIndex) -> CompileResult<()> {
        match left {
            ForStatementLeft::VariableDeclaration(decl) => {
                let kind = match decl.kind {
                    VariableDeclarationKind::Var => BindingKind::Var,
                    VariableDeclarationKind::Let => BindingKind::Let,
                    VariableDeclarationKind::Const => BindingKind::Const,
                    _ => return Err(CompileError::unsupported("using declarations")),
                };
                let declarator = decl
                    .declarations
                    .first()
                    .ok_or_else(|| CompileError::internal("empty for-in declaration"))?;
                self.compile_binding_pattern_fresh(&declarator.id, value, kind)
            }
            other => {
                let target = other
                    .as_assignment_target()
                    .ok_or_else(|| CompileError::unsupported("for-in target form"))?;
                self.compile_assignment_target(target, value)
            }
        }
    }

    /// Like `compile_binding_pattern` but declares fresh bindings
    fn compile_binding_pattern_fresh(
        &mut self,
        pattern: &BindingPattern,
        value: ScopeIndex,
        kind: BindingKind,
    ) -> CompileResult<()> {
        if let BindingPattern::BindingIdentifier(ident) = pattern {
            let slot = self.binding_slot(&ident.name, kind)?;
            self.codegen.emit(Instruction::Move { dst: slot, src: value });
            return Ok(());
        }
        self.compile_binding_pattern(pattern, value, kind)
    }

    fn compile_switch(&mut self, switch: &SwitchStatement) -> CompileResult<()> {
        self.codegen.current.scopes.enter_block();
        let discriminant = self.compile_expression(&switch.discriminant)?;
        self.open_control(false);

        // Dispatch table: a JumpIfEqual per tested case, then the default
        let mut case_jumps = Vec::new();
        for case in &switch.cases {
            match &case.test {
                Some(test) => {
                    let test_value = self.compile_expression(test)?;
                    let jump = self.codegen.here();
                    self.codegen.emit(Instruction::JumpIfEqual {
                        lhs: discriminant,
                        rhs: test_value,
                        offset: JumpOffset::new(0),
                    });
                    self.codegen.free_temp(test_value);
                    case_jumps.push(Some(jump));
                }
                None => case_jumps.push(None),
            }
        }
        let to_default = self.emit_jump();

        // Bodies in order; fall-through is the natural layout
        let mut default_target = None;
        for (case, jump) in switch.cases.iter().zip(&case_jumps) {
            let here = self.codegen.here();
            match jump {
                Some(jump) => self.codegen.patch_jump(*jump, here),
                None => default_target = Some(here),
            }
            for statement in &case.consequent {
                self.compile_statement(statement)?;
            }
        }

        let end = self.codegen.here();
        self.codegen
            .patch_jump(to_default, default_target.unwrap_or(end));

        self.close_control(None);
        self.codegen.free_temp(discriminant);
        self.codegen.current.scopes.exit_block();
        Ok(())
    }

    fn compile_try(&mut self, try_stmt: &TryStatement) -> CompileResult<()> {
        match &try_stmt.finalizer {
            None => self.compile_try_catch(
                &try_stmt.block,
                try_stmt
                    .handler
                    .as_deref()
                    .ok_or_else(|| CompileError::early("try without catch or finally"))?,
            ),
            Some(finalizer) => {
                self.compile_try_finally(try_stmt, finalizer)
            }
        }
    }

    fn compile_try_catch(
        &mut self,
        block: &BlockStatement,
        handler: &CatchClause,
    ) -> CompileResult<()> {
        let exit_slot = self.codegen.temp();
        let exc_slot = self.codegen.temp();
        let try_start = self.codegen.here();
        self.codegen.emit(Instruction::TryStart {
            catch_offset: JumpOffset::new(0),
            exit_slot,
            exc_slot,
        });
        self.tries.push(TryScope {
            exit_slot,
            has_finally: false,
            routed: Vec::new(),
            routes_break: false,
            routes_continue: false,
        });

        self.codegen.current.scopes.enter_block();
        self.compile_statements(&block.body, None, false)?;
        self.codegen.current.scopes.exit_block();

        self.tries.pop();
        let try_end = self.codegen.here();
        self.codegen.emit(Instruction::TryEnd {
            offset: JumpOffset::new(0),
        });

        // Catch handler: materialize the exception, bind the parameter
        let catch_start = self.codegen.here();
        self.codegen.patch_jump(try_start, catch_start);

        self.codegen.current.scopes.enter_block();
        let catch_slot = match &handler.param {
            Some(param) => match &param.pattern {
                BindingPattern::BindingIdentifier(ident) => {
                    self.codegen.declare(&ident.name, BindingKind::Let)?
                }
                _ => return Err(CompileError::unsupported("catch parameter pattern")),
            },
            None => self.codegen.temp(),
        };
        self.codegen.emit(Instruction::Catch { dst: catch_slot });
        self.compile_statements(&handler.body.body, None, false)?;
        self.codegen.current.scopes.exit_block();

        let end = self.codegen.here();
        self.codegen.patch_jump(try_end, end);
        self.codegen.free_temp(exit_slot);
        self.codegen.free_temp(exc_slot);
        Ok(())
    }

    /// try-with-finally; a handler nests as an inner try/catch so the
    /// outer record only routes the finally
    fn compile_try_finally(
        &mut self,
        try_stmt: &TryStatement,
        finalizer: &BlockStatement,
    ) -> CompileResult<()> {
        let exit_slot = self.codegen.temp();
        let exc_slot = self.codegen.temp();
        let try_start = self.codegen.here();
        self.codegen.emit(Instruction::TryStart {
            catch_offset: JumpOffset::new(0),
            exit_slot,
            exc_slot,
        });
        self.tries.push(TryScope {
            exit_slot,
            has_finally: true,
            routed: Vec::new(),
            routes_break: false,
            routes_continue: false,
        });

        match try_stmt.handler.as_deref() {
            Some(handler) => self.compile_try_catch(&try_stmt.block, handler)?,
            None => {
                self.codegen.current.scopes.enter_block();
                self.compile_statements(&try_stmt.block.body, None, false)?;
                self.codegen.current.scopes.exit_block();
            }
        }

        let scope = self.tries.pop().expect("pushed above");
        let try_end = self.codegen.here();
        self.codegen.emit(Instruction::TryEnd {
            offset: JumpOffset::new(0),
        });

        // Exception path into the finally: park the exception
        let finally_catch = self.codegen.here();
        self.codegen.patch_jump(try_start, finally_catch);
        self.codegen.emit(Instruction::Catch { dst: exc_slot });

        // Normal completion and routed exits land here too
        let finally_entry = self.codegen.here();
        self.codegen.patch_jump(try_end, finally_entry);
        for routed in &scope.routed {
            self.codegen.patch_jump(*routed, finally_entry);
        }

        self.codegen.current.scopes.enter_block();
        self.compile_statements(&finalizer.body, None, false)?;
        self.codegen.current.scopes.exit_block();

        let finally_index = self.codegen.here();
        self.codegen.emit(Instruction::Finally {
            exit_slot,
            exc_slot,
            break_offset: JumpOffset::new(0),
            continue_offset: JumpOffset::new(0),
        });

        // Wire routed break/continue into the enclosing loop's patch lists
        if scope.routes_break || scope.routes_continue {
            let target = self
                .control
                .iter_mut()
                .rev()
                .find(|scope| scope.is_loop)
                .ok_or_else(|| CompileError::early("break/continue outside a loop"))?;
            if scope.routes_break {
                target.finally_breaks.push(finally_index);
            }
            if scope.routes_continue {
                target.finally_continues.push(finally_index);
            }
        }

        self.codegen.free_temp(exit_slot);
        self.codegen.free_temp(exc_slot);
        Ok(())
    }

    fn compile_return(&mut self, ret: &ReturnStatement) -> CompileResult<()> {
        let value = match &ret.argument {
            Some(argument) => self.compile_expression(argument)?,
            None => self.codegen.undefined(),
        };

        // A return crossing a try-with-finally routes through the finally.
        // Catch records opened above it pop first; TryReturn pops the
        // finally's own record.
        if let Some(position) = self.tries.iter().rposition(|t| t.has_finally) {
            self.pop_try_records_above(position);
            let exit_slot = self.tries[position].exit_slot;
            let index = self.codegen.here();
            self.codegen.emit(Instruction::TryReturn {
                src: value,
                exit_slot,
                offset: JumpOffset::new(0),
            });
            self.tries[position].routed.push(index);
        } else {
            self.codegen.emit(Instruction::Return { src: value });
        }
        self.codegen.free_temp(value);
        Ok(())
    }

    /// Pop catch records opened above the routed try (the routed
    /// instruction itself pops that try's record)
    fn pop_try_records_above(&mut self, position: usize) {
        for _ in position + 1..self.tries.len() {
            self.codegen.emit(Instruction::TryEnd {
                offset: JumpOffset::new(1),
            });
        }
    }

    fn control_target(&self, label: Option<&str>, needs_loop: bool) -> CompileResult<usize> {
        for (index, scope) in self.control.iter().enumerate().rev() {
            let matches = match label {
                Some(label) => scope.labels.iter().any(|l| l == label),
                None => !needs_loop || scope.is_loop,
            };
            if matches {
                return Ok(index);
            }
        }
        Err(CompileError::early(match label {
            Some(label) => format!("undefined label '{label}'"),
            None => "break/continue outside a loop".to_string(),
        }))
    }

    fn compile_break(&mut self, label: Option<&str>) -> CompileResult<()> {
        let target = self.control_target(label, false)?;
        let crossing_try = self.control[target].try_depth;

        // Any finally between here and the target routes the exit
        if let Some(position) = self.tries[crossing_try..]
            .iter()
            .rposition(|t| t.has_finally)
            .map(|p| p + crossing_try)
        {
            if label.is_some() {
                return Err(CompileError::unsupported("labeled break across finally"));
            }
            self.pop_try_records_above(position);
            let exit_slot = self.tries[position].exit_slot;
            let index = self.codegen.here();
            self.codegen.emit(Instruction::TryBreak {
                exit_slot,
                offset: JumpOffset::new(0),
            });
            self.tries[position].routed.push(index);
            self.tries[position].routes_break = true;
            return Ok(());
        }

        // Catch-only records crossed by the jump are popped explicitly
        for _ in crossing_try..self.tries.len() {
            self.codegen.emit(Instruction::TryEnd {
                offset: JumpOffset::new(1),
            });
        }
        let jump = self.emit_jump();
        self.control[target].break_jumps.push(jump);
        Ok(())
    }

    fn compile_continue(&mut self, label: Option<&str>) -> CompileResult<()> {
        let target = self.control_target(label, true)?;
        let crossing_try = self.control[target].try_depth;

        if let Some(position) = self.tries[crossing_try..]
            .iter()
            .rposition(|t| t.has_finally)
            .map(|p| p + crossing_try)
        {
            if label.is_some() {
                return Err(CompileError::unsupported("labeled continue across finally"));
            }
            self.pop_try_records_above(position);
            let exit_slot = self.tries[position].exit_slot;
            let index = self.codegen.here();
            self.codegen.emit(Instruction::TryContinue {
                exit_slot,
                offset: JumpOffset::new(0),
            });
            self.tries[position].routed.push(index);
            self.tries[position].routes_continue = true;
            return Ok(());
        }

        for _ in crossing_try..self.tries.len() {
            self.codegen.emit(Instruction::TryEnd {
                offset: JumpOffset::new(1),
            });
        }
        let jump = self.emit_jump();
        self.control[target].continue_jumps.push(jump);
        Ok(())
    }

    // ======================================================================
    // Functions
    // ======================================================================

    fn compile_function_declaration(&mut self, func: &Function) -> CompileResult<()> {
        let name = func
            .id
            .as_ref()
            .map(|id| id.name.to_string())
            .ok_or_else(|| CompileError::early("function declaration requires a name"))?;
        let slot = self.binding_slot(&name, BindingKind::Var)?;
        let lambda = self.compile_function_parts(
            Some(name),
            &func.params,
            func.body.as_deref(),
            func.r#async,
            false,
        )?;
        self.codegen
            .emit(Instruction::FunctionCopy { dst: slot, lambda });
        Ok(())
    }

    fn compile_function_expression(&mut self, func: &Function) -> CompileResult<ScopeIndex> {
        let name = func.id.as_ref().map(|id| id.name.to_string());
        let lambda = self.compile_function_parts(
            name,
            &func.params,
            func.body.as_deref(),
            func.r#async,
            false,
        )?;
        let dst = self.codegen.temp();
        self.codegen.emit(Instruction::Function { dst, lambda });
        Ok(dst)
    }

    fn compile_arrow_function(
        &mut self,
        arrow: &ArrowFunctionExpression,
    ) -> CompileResult<ScopeIndex> {
        let lambda_index = self.codegen.enter_function(None);
        self.codegen.current.flags.is_async = arrow.r#async;
        self.codegen.current.flags.is_arrow = true;

        let saved_control = std::mem::take(&mut self.control);
        let saved_tries = std::mem::take(&mut self.tries);

        self.compile_parameters(&arrow.params)?;

        if arrow.expression {
            // Concise body: the single expression is the return value
            if let Some(Statement::ExpressionStatement(expr_stmt)) = arrow.body.statements.first()
            {
                let value = self.compile_expression(&expr_stmt.expression)?;
                self.codegen.emit(Instruction::Return { src: value });
            } else {
                return Err(CompileError::internal("malformed concise arrow body"));
            }
        } else {
            self.compile_statements(&arrow.body.statements, None, true)?;
            let undef = self.codegen.undefined();
            self.codegen.emit(Instruction::Return { src: undef });
        }

        self.control = saved_control;
        self.tries = saved_tries;
        let finished = self.codegen.exit_function()?;
        debug_assert_eq!(finished, lambda_index);

        let dst = self.codegen.temp();
        self.codegen.emit(Instruction::Function {
            dst,
            lambda: lambda_index,
        });
        Ok(dst)
    }

    fn compile_function_parts(
        &mut self,
        name: Option<String>,
        params: &FormalParameters,
        body: Option<&FunctionBody>,
        is_async: bool,
        is_arrow: bool,
    ) -> CompileResult<skink_vm_bytecode::LambdaIndex> {
        let lambda_index = self.codegen.enter_function(name);
        self.codegen.current.flags.is_async = is_async;
        self.codegen.current.flags.is_arrow = is_arrow;

        let saved_control = std::mem::take(&mut self.control);
        let saved_tries = std::mem::take(&mut self.tries);

        self.compile_parameters(params)?;

        // Non-arrow functions pin `this` in a hidden local so nested
        // arrows can capture it
        if !is_arrow {
            let this_slot = self.codegen.declare("<this>", BindingKind::Var)?;
            self.codegen.emit(Instruction::This { dst: this_slot });
            self.codegen.current.this_slot = Some(this_slot.slot());
        }

        if let Some(body) = body {
            self.compile_statements(&body.statements, None, true)?;
        }
        let undef = self.codegen.undefined();
        self.codegen.emit(Instruction::Return { src: undef });

        self.control = saved_control;
        self.tries = saved_tries;
        self.codegen.exit_function()
    }

    /// Parameters spill from the argument scope into locals so captures
    /// and mutation go through one mechanism
    fn compile_parameters(&mut self, params: &FormalParameters) -> CompileResult<()> {
        for (position, param) in params.items.iter().enumerate() {
            let source = ScopeIndex::argument(position as u32);
            match &param.pattern {
                BindingPattern::BindingIdentifier(ident) => {
                    let slot = self.codegen.declare(&ident.name, BindingKind::Var)?;
                    self.codegen.current.param_names.push(ident.name.to_string());
                    self.codegen.emit(Instruction::Move { dst: slot, src: source });
                    if let Some(init) = &param.initializer {
                        self.emit_default_parameter(slot, init)?;
                    }
                }
                BindingPattern::AssignmentPattern(assign) => {
                    if let BindingPattern::BindingIdentifier(ident) = &assign.left {
                        let slot = self.codegen.declare(&ident.name, BindingKind::Var)?;
                        self.codegen.current.param_names.push(ident.name.to_string());
                        self.codegen.emit(Instruction::Move { dst: slot, src: source });
                        self.emit_default_parameter(slot, &assign.right)?;
                    } else {
                        let spill = self.codegen.temp();
                        self.codegen
                            .emit(Instruction::Move { dst: spill, src: source });
                        self.compile_binding_pattern(&assign.left, spill, BindingKind::Var)?;
                        self.codegen.free_temp(spill);
                        self.codegen.current.param_names.push(String::new());
                    }
                }
                pattern => {
                    let spill = self.codegen.temp();
                    self.codegen
                        .emit(Instruction::Move { dst: spill, src: source });
                    self.compile_binding_pattern(pattern, spill, BindingKind::Var)?;
                    self.codegen.free_temp(spill);
                    self.codegen.current.param_names.push(String::new());
                }
            }
            self.codegen.current.param_count += 1;
        }
        if params.rest.is_some() {
            return Err(CompileError::unsupported("rest parameters"));
        }
        Ok(())
    }

    fn emit_default_parameter(
        &mut self,
        slot: ScopeIndex,
        default: &Expression,
    ) -> CompileResult<()> {
        let undef = self.codegen.undefined();
        let cond = self.codegen.temp();
        self.codegen.emit(Instruction::StrictEq {
            dst: cond,
            lhs: slot,
            rhs: undef,
        });
        let skip = self.emit_jump_if_false(cond);
        self.codegen.free_temp(cond);
        let value = self.compile_expression(default)?;
        self.codegen.emit(Instruction::Move { dst: slot, src: value });
        self.codegen.free_temp(value);
        let here = self.codegen.here();
        self.codegen.patch_jump(skip, here);
        Ok(())
    }

    // ======================================================================
    // Modules
    // ======================================================================

    fn compile_import(&mut self, import: &ImportDeclaration) -> CompileResult<()> {
        let specifier = import.source.value.to_string();
        self.codegen.import(&specifier);
        let module = self.codegen.string_index(&specifier);

        let namespace = self.codegen.temp();
        self.codegen.emit(Instruction::Import {
            dst: namespace,
            module: skink_vm_bytecode::ConstIndex::new(module),
        });

        if let Some(specifiers) = &import.specifiers {
            for spec in specifiers {
                match spec {
                    ImportDeclarationSpecifier::ImportDefaultSpecifier(s) => {
                        // The module value is its default export
                        let slot =
                            self.binding_slot(&s.local.name, BindingKind::Const)?;
                        self.codegen.emit(Instruction::LetUpdate {
                            dst: slot,
                            src: namespace,
                        });
                    }
                    ImportDeclarationSpecifier::ImportNamespaceSpecifier(s) => {
                        let slot =
                            self.binding_slot(&s.local.name, BindingKind::Const)?;
                        self.codegen.emit(Instruction::LetUpdate {
                            dst: slot,
                            src: namespace,
                        });
                    }
                    ImportDeclarationSpecifier::ImportSpecifier(s) => {
                        let key = self.codegen.string(&s.imported.name());
                        let value = self.codegen.temp();
                        self.codegen.emit(Instruction::PropertyGet {
                            dst: value,
                            obj: namespace,
                            key,
                        });
                        let slot =
                            self.binding_slot(&s.local.name, BindingKind::Const)?;
                        self.codegen.emit(Instruction::LetUpdate {
                            dst: slot,
                            src: value,
                        });
                        self.codegen.free_temp(value);
                    }
                }
            }
        }
        self.codegen.free_temp(namespace);
        Ok(())
    }

    fn compile_export_named(&mut self, export: &ExportNamedDeclaration) -> CompileResult<()> {
        if export.source.is_some() {
            return Err(CompileError::unsupported("re-exports"));
        }
        if let Some(declaration) = &export.declaration {
            match declaration {
                Declaration::VariableDeclaration(decl) => {
                    self.predeclare_lexicals_single(decl)?;
                    self.compile_variable_declaration(decl)?;
                    for declarator in &decl.declarations {
                        let mut names = Vec::new();
                        collect_binding_names(&declarator.id, &mut names);
                        for name in names {
                            self.exports.push((name.clone(), name));
                        }
                    }
                }
                Declaration::FunctionDeclaration(func) => {
                    self.compile_function_declaration(func)?;
                    if let Some(id) = &func.id {
                        self.exports.push((id.name.to_string(), id.name.to_string()));
                    }
                }
                _ => return Err(CompileError::unsupported("export declaration form")),
            }
        }
        for specifier in &export.specifiers {
            self.exports
                .push((specifier.exported.name().to_string(), specifier.local.name().to_string()));
        }
        Ok(())
    }

    fn predeclare_lexicals_single(&mut self, decl: &VariableDeclaration) -> CompileResult<()> {
        let kind = match decl.kind {
            VariableDeclarationKind::Let => BindingKind::Let,
            VariableDeclarationKind::Const => BindingKind::Const,
            _ => return Ok(()),
        };
        for declarator in &decl.declarations {
            let mut names = Vec::new();
            collect_binding_names(&declarator.id, &mut names);
            for name in names {
                if self.codegen.current.scopes.lookup(&name).is_none() {
                    let slot = self.codegen.declare(&name, kind)?;
                    self.codegen.emit(Instruction::NotInitialized { dst: slot });
                }
            }
        }
        Ok(())
    }

    fn compile_export_default(
        &mut self,
        export: &ExportDefaultDeclaration,
    ) -> CompileResult<()> {
        let value = match &export.declaration {
            ExportDefaultDeclarationKind::FunctionDeclaration(func) => {
                if func.id.is_some() {
                    self.compile_function_declaration(func)?;
                    let name = func.id.as_ref().expect("checked").name.to_string();
                    self.compile_identifier_load(&name)?
                } else {
                    self.compile_function_expression(func)?
                }
            }
            ExportDefaultDeclarationKind::ClassDeclaration(_) => {
                return Err(CompileError::unsupported("class declarations"));
            }
            other => {
                let expr = other
                    .as_expression()
                    .ok_or_else(|| CompileError::unsupported("export default form"))?;
                self.compile_expression(expr)?
            }
        };
        // Pin the value in a dedicated slot that survives to Stop
        let slot = ScopeIndex::local(self.codegen.current.allocator.alloc_binding());
        self.codegen.emit(Instruction::Move { dst: slot, src: value });
        self.codegen.free_temp(value);
        self.default_export = Some(slot);
        Ok(())
    }

    // ======================================================================
    // Expressions
    // ======================================================================

    fn compile_expression(&mut self, expression: &Expression) -> CompileResult<ScopeIndex> {
        self.enter_depth()?;
        let result = self.compile_expression_inner(expression);
        self.exit_depth();
        result
    }

    fn compile_expression_inner(&mut self, expression: &Expression) -> CompileResult<ScopeIndex> {
        match expression {
            Expression::NumericLiteral(lit) => Ok(self.codegen.number(lit.value)),
            Expression::StringLiteral(lit) => Ok(self.codegen.string(&lit.value)),
            Expression::BooleanLiteral(lit) => {
                Ok(self.codegen.constant(Constant::Boolean(lit.value)))
            }
            Expression::NullLiteral(_) => Ok(self.codegen.constant(Constant::Null)),
            Expression::BigIntLiteral(_) => Err(CompileError::unsupported("BigInt literals")),
            Expression::RegExpLiteral(lit) => {
                let pattern = lit.regex.pattern.text.as_str();
                let flags = lit.regex.flags.to_string();
                let index = self
                    .codegen
                    .constants
                    .add(Constant::regexp(pattern, flags));
                let dst = self.codegen.temp();
                self.codegen.emit(Instruction::Regexp {
                    dst,
                    pattern: skink_vm_bytecode::ConstIndex::new(index),
                });
                Ok(dst)
            }
            Expression::TemplateLiteral(template) => self.compile_template_literal(template),
            Expression::Identifier(ident) => self.compile_identifier_load(&ident.name),
            Expression::ThisExpression(_) => self.compile_this(),
            Expression::ParenthesizedExpression(paren) => {
                self.compile_expression(&paren.expression)
            }
            Expression::SequenceExpression(seq) => {
                let mut last = None;
                for expr in &seq.expressions {
                    if let Some(previous) = last.take() {
                        self.codegen.free_temp(previous);
                    }
                    last = Some(self.compile_expression(expr)?);
                }
                last.ok_or_else(|| CompileError::internal("empty sequence expression"))
            }
            Expression::BinaryExpression(binary) => self.compile_binary(binary),
            Expression::LogicalExpression(logical) => self.compile_logical(logical),
            Expression::UnaryExpression(unary) => self.compile_unary(unary),
            Expression::UpdateExpression(update) => self.compile_update(update),
            Expression::ConditionalExpression(cond) => self.compile_conditional(cond),
            Expression::AssignmentExpression(assign) => self.compile_assignment(assign),
            Expression::StaticMemberExpression(member) => {
                let object = self.compile_expression(&member.object)?;
                let key = self.codegen.string(&member.property.name);
                let dst = self.codegen.temp();
                self.codegen.emit(Instruction::PropertyGet {
                    dst,
                    obj: object,
                    key,
                });
                self.codegen.free_temp(object);
                Ok(dst)
            }
            Expression::ComputedMemberExpression(member) => {
                let object = self.compile_expression(&member.object)?;
                let key = self.compile_computed_key(&member.expression, object)?;
                let dst = self.codegen.temp();
                self.codegen.emit(Instruction::PropertyGet {
                    dst,
                    obj: object,
                    key,
                });
                self.codegen.free_temp(key);
                self.codegen.free_temp(object);
                Ok(dst)
            }
            Expression::ChainExpression(chain) => self.compile_chain(chain),
            Expression::CallExpression(call) => self.compile_call(call, None),
            Expression::NewExpression(new_expr) => self.compile_new(new_expr),
            Expression::ObjectExpression(object) => self.compile_object_literal(object),
            Expression::ArrayExpression(array) => self.compile_array_literal(array),
            Expression::FunctionExpression(func) => self.compile_function_expression(func),
            Expression::ArrowFunctionExpression(arrow) => self.compile_arrow_function(arrow),
            Expression::AwaitExpression(await_expr) => self.compile_await(await_expr),
            Expression::YieldExpression(_) => Err(CompileError::unsupported("generators")),
            Expression::ClassExpression(_) => Err(CompileError::unsupported("class expressions")),
            Expression::TaggedTemplateExpression(_) => {
                Err(CompileError::unsupported("tagged templates"))
            }
            Expression::MetaProperty(_) => Err(CompileError::unsupported("meta properties")),
            Expression::Super(_) => Err(CompileError::unsupported("super")),
            other => Err(CompileError::unsupported(format!(
                "expression {:?}",
                std::mem::discriminant(other)
            ))),
        }
    }

    fn compile_identifier_load(&mut self, name: &str) -> CompileResult<ScopeIndex> {
        match self.codegen.resolve(name) {
            Resolved::Local(binding) => {
                let index = ScopeIndex::local(binding.slot);
                if binding.kind.is_lexical() {
                    self.emit_tdz_check(index, name);
                }
                Ok(index)
            }
            Resolved::Closure { slot, kind } => {
                let index = ScopeIndex::closure(slot);
                if kind.is_lexical() {
                    self.emit_tdz_check(index, name);
                }
                Ok(index)
            }
            Resolved::Global { slot, kind } => {
                let index = ScopeIndex::new(skink_vm_bytecode::ScopeKind::Global, slot);
                if kind.is_lexical() {
                    self.emit_tdz_check(index, name);
                }
                Ok(index)
            }
            Resolved::Unresolved => match name {
                "undefined" => Ok(self.codegen.undefined()),
                "NaN" => Ok(self.codegen.number(f64::NAN)),
                "Infinity" => Ok(self.codegen.number(f64::INFINITY)),
                _ => {
                    let name_index = self.codegen.string_index(name);
                    let dst = self.codegen.temp();
                    self.codegen.emit(Instruction::GlobalGet {
                        dst,
                        name: skink_vm_bytecode::ConstIndex::new(name_index),
                    });
                    Ok(dst)
                }
            },
        }
    }

    fn emit_tdz_check(&mut self, index: ScopeIndex, name: &str) {
        let name_index = self.codegen.string_index(name);
        self.codegen.emit(Instruction::InitializationTest {
            src: index,
            name: skink_vm_bytecode::ConstIndex::new(name_index),
        });
    }

    fn compile_this(&mut self) -> CompileResult<ScopeIndex> {
        if self.codegen.current.flags.is_arrow {
            // Lexical this: capture the hidden slot of the nearest
            // non-arrow enclosing function. A top-level arrow has none;
            // its `this` is undefined.
            if matches!(self.codegen.resolve("<this>"), Resolved::Unresolved) {
                return Ok(self.codegen.undefined());
            }
            return self.compile_identifier_load("<this>");
        }
        let dst = self.codegen.temp();
        self.codegen.emit(Instruction::This { dst });
        Ok(dst)
    }

    fn compile_template_literal(
        &mut self,
        template: &TemplateLiteral,
    ) -> CompileResult<ScopeIndex> {
        if template.expressions.is_empty() {
            let text = template
                .quasis
                .first()
                .and_then(|quasi| quasi.value.cooked.as_ref())
                .map(|cooked| cooked.as_str())
                .unwrap_or("");
            return Ok(self.codegen.string(text));
        }

        // Build the parts array, then concatenate in one instruction
        let parts = self.codegen.temp();
        let total = template.quasis.len() + template.expressions.len();
        self.codegen.emit(Instruction::Array {
            dst: parts,
            len: total as u32,
            ctor: false,
        });

        let mut position = 0u32;
        for (index, quasi) in template.quasis.iter().enumerate() {
            let cooked = quasi
                .value
                .cooked
                .as_ref()
                .map(|c| c.as_str())
                .unwrap_or("");
            if !cooked.is_empty() {
                let key = self.codegen.number(position as f64);
                let text = self.codegen.string(cooked);
                self.codegen.emit(Instruction::PropertyInit {
                    obj: parts,
                    key,
                    src: text,
                });
            }
            position += 1;
            if let Some(expr) = template.expressions.get(index) {
                let value = self.compile_expression(expr)?;
                let key = self.codegen.number(position as f64);
                self.codegen.emit(Instruction::PropertyInit {
                    obj: parts,
                    key,
                    src: value,
                });
                self.codegen.free_temp(value);
                position += 1;
            }
        }

        let dst = self.codegen.temp();
        self.codegen
            .emit(Instruction::TemplateLiteral { dst, src: parts });
        self.codegen.free_temp(parts);
        Ok(dst)
    }

    fn compile_binary(&mut self, binary: &BinaryExpression) -> CompileResult<ScopeIndex> {
        let lhs = self.compile_expression(&binary.left)?;
        let rhs = self.compile_expression(&binary.right)?;
        let dst = self.codegen.temp();

        let instruction = match binary.operator {
            BinaryOperator::Addition => Instruction::Add { dst, lhs, rhs },
            BinaryOperator::Subtraction => Instruction::Sub { dst, lhs, rhs },
            BinaryOperator::Multiplication => Instruction::Mul { dst, lhs, rhs },
            BinaryOperator::Division => Instruction::Div { dst, lhs, rhs },
            BinaryOperator::Remainder => Instruction::Mod { dst, lhs, rhs },
            BinaryOperator::Exponential => Instruction::Pow { dst, lhs, rhs },
            BinaryOperator::Equality => Instruction::Eq { dst, lhs, rhs },
            BinaryOperator::Inequality => Instruction::Ne { dst, lhs, rhs },
            BinaryOperator::StrictEquality => Instruction::StrictEq { dst, lhs, rhs },
            BinaryOperator::StrictInequality => Instruction::StrictNe { dst, lhs, rhs },
            BinaryOperator::LessThan => Instruction::Lt { dst, lhs, rhs },
            BinaryOperator::LessEqualThan => Instruction::Le { dst, lhs, rhs },
            BinaryOperator::GreaterThan => Instruction::Gt { dst, lhs, rhs },
            BinaryOperator::GreaterEqualThan => Instruction::Ge { dst, lhs, rhs },
            BinaryOperator::BitwiseAnd => Instruction::BitAnd { dst, lhs, rhs },
            BinaryOperator::BitwiseOR => Instruction::BitOr { dst, lhs, rhs },
            BinaryOperator::BitwiseXOR => Instruction::BitXor { dst, lhs, rhs },
            BinaryOperator::ShiftLeft => Instruction::Shl { dst, lhs, rhs },
            BinaryOperator::ShiftRight => Instruction::Shr { dst, lhs, rhs },
            BinaryOperator::ShiftRightZeroFill => Instruction::Ushr { dst, lhs, rhs },
            BinaryOperator::Instanceof => Instruction::InstanceOf { dst, lhs, rhs },
            BinaryOperator::In => Instruction::PropertyIn {
                dst,
                obj: rhs,
                key: lhs,
            },
        };
        self.codegen.emit(instruction);
        self.codegen.free_temp(rhs);
        self.codegen.free_temp(lhs);
        Ok(dst)
    }

    fn compile_logical(&mut self, logical: &LogicalExpression) -> CompileResult<ScopeIndex> {
        let dst = self.codegen.temp();
        let lhs = self.compile_expression(&logical.left)?;
        self.codegen.emit(Instruction::Move { dst, src: lhs });
        self.codegen.free_temp(lhs);

        let short_circuit = self.codegen.here();
        match logical.operator {
            LogicalOperator::Or => self.codegen.emit(Instruction::TestIfTrue {
                src: dst,
                offset: JumpOffset::new(0),
            }),
            LogicalOperator::And => self.codegen.emit(Instruction::TestIfFalse {
                src: dst,
                offset: JumpOffset::new(0),
            }),
            LogicalOperator::Coalesce => self.codegen.emit(Instruction::Coalesce {
                src: dst,
                offset: JumpOffset::new(0),
            }),
        }

        let rhs = self.compile_expression(&logical.right)?;
        self.codegen.emit(Instruction::Move { dst, src: rhs });
        self.codegen.free_temp(rhs);

        let here = self.codegen.here();
        self.codegen.patch_jump(short_circuit, here);
        Ok(dst)
    }

    fn compile_unary(&mut self, unary: &UnaryExpression) -> CompileResult<ScopeIndex> {
        match unary.operator {
            UnaryOperator::Typeof => {
                // typeof an unresolved name must not throw
                if let Expression::Identifier(ident) = &unary.argument
                    && matches!(self.codegen.resolve(&ident.name), Resolved::Unresolved)
                {
                    let name_index = self.codegen.string_index(&ident.name);
                    let dst = self.codegen.temp();
                    self.codegen.emit(Instruction::TypeofGlobal {
                        dst,
                        name: skink_vm_bytecode::ConstIndex::new(name_index),
                    });
                    return Ok(dst);
                }
                let src = self.compile_expression(&unary.argument)?;
                let dst = self.codegen.temp();
                self.codegen.emit(Instruction::Typeof { dst, src });
                self.codegen.free_temp(src);
                Ok(dst)
            }
            UnaryOperator::Delete => match &unary.argument {
                Expression::StaticMemberExpression(member) => {
                    let object = self.compile_expression(&member.object)?;
                    let key = self.codegen.string(&member.property.name);
                    let dst = self.codegen.temp();
                    self.codegen.emit(Instruction::PropertyDelete {
                        dst,
                        obj: object,
                        key,
                    });
                    self.codegen.free_temp(object);
                    Ok(dst)
                }
                Expression::ComputedMemberExpression(member) => {
                    let object = self.compile_expression(&member.object)?;
                    let key = self.compile_computed_key(&member.expression, object)?;
                    let dst = self.codegen.temp();
                    self.codegen.emit(Instruction::PropertyDelete {
                        dst,
                        obj: object,
                        key,
                    });
                    self.codegen.free_temp(key);
                    self.codegen.free_temp(object);
                    Ok(dst)
                }
                other => {
                    // delete of a non-property reference evaluates it and
                    // produces true
                    let src = self.compile_expression(other)?;
                    let dst = self.codegen.temp();
                    self.codegen.emit(Instruction::Delete { dst, src });
                    self.codegen.free_temp(src);
                    Ok(dst)
                }
            },
            operator => {
                let src = self.compile_expression(&unary.argument)?;
                let dst = self.codegen.temp();
                let instruction = match operator {
                    UnaryOperator::UnaryNegation => Instruction::Neg { dst, src },
                    UnaryOperator::UnaryPlus => Instruction::Plus { dst, src },
                    UnaryOperator::LogicalNot => Instruction::Not { dst, src },
                    UnaryOperator::BitwiseNot => Instruction::BitNot { dst, src },
                    UnaryOperator::Void => Instruction::Void { dst, src },
                    _ => return Err(CompileError::internal("unary operator handled above")),
                };
                self.codegen.emit(instruction);
                self.codegen.free_temp(src);
                Ok(dst)
            }
        }
    }

    fn compile_update(&mut self, update: &UpdateExpression) -> CompileResult<ScopeIndex> {
        let step = |dst, src| match update.operator {
            UpdateOperator::Increment => Instruction::Inc { dst, src },
            UpdateOperator::Decrement => Instruction::Dec { dst, src },
        };

        match &update.argument {
            SimpleAssignmentTarget::AssignmentTargetIdentifier(ident) => {
                let slot = self.resolve_store_slot(&ident.name)?;
                match slot {
                    StoreTarget::Slot(slot) => {
                        // Old value (numeric) first, for postfix results
                        let old = self.codegen.temp();
                        self.codegen.emit(Instruction::Plus { dst: old, src: slot });
                        let new = self.codegen.temp();
                        self.codegen.emit(step(new, old));
                        self.codegen.emit(Instruction::Move { dst: slot, src: new });
                        if update.prefix {
                            self.codegen.free_temp(old);
                            Ok(new)
                        } else {
                            self.codegen.free_temp(new);
                            Ok(old)
                        }
                    }
                    StoreTarget::Global(name_index) => {
                        let current = self.compile_identifier_load(&ident.name)?;
                        let old = self.codegen.temp();
                        self.codegen
                            .emit(Instruction::Plus { dst: old, src: current });
                        self.codegen.free_temp(current);
                        let new = self.codegen.temp();
                        self.codegen.emit(step(new, old));
                        self.codegen.emit(Instruction::GlobalSet {
                            name: skink_vm_bytecode::ConstIndex::new(name_index),
                            src: new,
                        });
                        if update.prefix {
                            self.codegen.free_temp(old);
                            Ok(new)
                        } else {
                            self.codegen.free_temp(new);
                            Ok(old)
                        }
                    }
                }
            }
            SimpleAssignmentTarget::StaticMemberExpression(member) => {
                let object = self.compile_expression(&member.object)?;
                let key = self.codegen.string(&member.property.name);
                self.compile_update_member(object, key, update)
            }
            SimpleAssignmentTarget::ComputedMemberExpression(member) => {
                let object = self.compile_expression(&member.object)?;
                let key = self.compile_computed_key(&member.expression, object)?;
                self.compile_update_member(object, key, update)
            }
            _ => Err(CompileError::unsupported("update target form")),
        }
    }

    fn compile_update_member(
        &mut self,
        object: ScopeIndex,
        key: ScopeIndex,
        update: &UpdateExpression,
    ) -> CompileResult<ScopeIndex> {
        let current = self.codegen.temp();
        self.codegen.emit(Instruction::PropertyGet {
            dst: current,
            obj: object,
            key,
        });
        let old = self.codegen.temp();
        self.codegen
            .emit(Instruction::Plus { dst: old, src: current });
        self.codegen.free_temp(current);
        let new = self.codegen.temp();
        let instruction = match update.operator {
            UpdateOperator::Increment => Instruction::Inc { dst: new, src: old },
            UpdateOperator::Decrement => Instruction::Dec { dst: new, src: old },
        };
        self.codegen.emit(instruction);
        self.codegen.emit(Instruction::PropertySet {
            obj: object,
            key,
            src: new,
        });
        self.codegen.free_temp(key);
        self.codegen.free_temp(object);
        if update.prefix {
            self.codegen.free_temp(old);
            Ok(new)
        } else {
            self.codegen.free_temp(new);
            Ok(old)
        }
    }

    fn compile_conditional(
        &mut self,
        cond: &ConditionalExpression,
    ) -> CompileResult<ScopeIndex> {
        let dst = self.codegen.temp();
        let test = self.compile_expression(&cond.test)?;
        let to_else = self.emit_jump_if_false(test);
        self.codegen.free_temp(test);

        let consequent = self.compile_expression(&cond.consequent)?;
        self.codegen.emit(Instruction::Move {
            dst,
            src: consequent,
        });
        self.codegen.free_temp(consequent);
        let to_end = self.emit_jump();

        let here = self.codegen.here();
        self.codegen.patch_jump(to_else, here);
        let alternate = self.compile_expression(&cond.alternate)?;
        self.codegen.emit(Instruction::Move { dst, src: alternate });
        self.codegen.free_temp(alternate);

        let here = self.codegen.here();
        self.codegen.patch_jump(to_end, here);
        Ok(dst)
    }

    // ---- assignment ------------------------------------------------------

    fn compile_assignment(
        &mut self,
        assign: &AssignmentExpression,
    ) -> CompileResult<ScopeIndex> {
        if assign.operator == AssignmentOperator::Assign {
            let value = self.compile_expression(&assign.right)?;
            if let AssignmentTarget::AssignmentTargetIdentifier(ident) = &assign.left {
                self.name_anonymous_function(&assign.right, value, &ident.name);
            }
            self.compile_assignment_target(&assign.left, value)?;
            return Ok(value);
        }

        // Logical assignment short-circuits before evaluating the rhs
        if matches!(
            assign.operator,
            AssignmentOperator::LogicalAnd
                | AssignmentOperator::LogicalOr
                | AssignmentOperator::LogicalNullish
        ) {
            return self.compile_logical_assignment(assign);
        }

        // Compound assignment: capture object/key temporaries before the
        // rhs to preserve evaluation order
        match &assign.left {
            AssignmentTarget::AssignmentTargetIdentifier(ident) => {
                let current = self.compile_identifier_load(&ident.name)?;
                let rhs = self.compile_expression(&assign.right)?;
                let result = self.codegen.temp();
                self.emit_compound_op(assign.operator, result, current, rhs)?;
                self.codegen.free_temp(rhs);
                self.codegen.free_temp(current);
                self.store_identifier(&ident.name, result)?;
                Ok(result)
            }
            AssignmentTarget::StaticMemberExpression(member) => {
                let object = self.compile_expression(&member.object)?;
                let key = self.codegen.string(&member.property.name);
                self.compile_compound_member(assign, object, key)
            }
            AssignmentTarget::ComputedMemberExpression(member) => {
                let object = self.compile_expression(&member.object)?;
                let key = self.compile_computed_key(&member.expression, object)?;
                self.compile_compound_member(assign, object, key)
            }
            _ => Err(CompileError::unsupported("compound destructuring assignment")),
        }
    }

    fn compile_compound_member(
        &mut self,
        assign: &AssignmentExpression,
        object: ScopeIndex,
        key: ScopeIndex,
    ) -> CompileResult<ScopeIndex> {
        let current = self.codegen.temp();
        self.codegen.emit(Instruction::PropertyGet {
            dst: current,
            obj: object,
            key,
        });
        let rhs = self.compile_expression(&assign.right)?;
        let result = self.codegen.temp();
        self.emit_compound_op(assign.operator, result, current, rhs)?;
        self.codegen.free_temp(rhs);
        self.codegen.free_temp(current);
        self.codegen.emit(Instruction::PropertySet {
            obj: object,
            key,
            src: result,
        });
        self.codegen.free_temp(key);
        self.codegen.free_temp(object);
        Ok(result)
    }

    fn emit_compound_op(
        &mut self,
        operator: AssignmentOperator,
        dst: ScopeIndex,
        lhs: ScopeIndex,
        rhs: ScopeIndex,
    ) -> CompileResult<()> {
        let instruction = match operator {
            AssignmentOperator::Addition => Instruction::Add { dst, lhs, rhs },
            AssignmentOperator::Subtraction => Instruction::Sub { dst, lhs, rhs },
            AssignmentOperator::Multiplication => Instruction::Mul { dst, lhs, rhs },
            AssignmentOperator::Division => Instruction::Div { dst, lhs, rhs },
            AssignmentOperator::Remainder => Instruction::Mod { dst, lhs, rhs },
            AssignmentOperator::Exponential => Instruction::Pow { dst, lhs, rhs },
            AssignmentOperator::BitwiseAnd => Instruction::BitAnd { dst, lhs, rhs },
            AssignmentOperator::BitwiseOR => Instruction::BitOr { dst, lhs, rhs },
            AssignmentOperator::BitwiseXOR => Instruction::BitXor { dst, lhs, rhs },
            AssignmentOperator::ShiftLeft => Instruction::Shl { dst, lhs, rhs },
            AssignmentOperator::ShiftRight => Instruction::Shr { dst, lhs, rhs },
            AssignmentOperator::ShiftRightZeroFill => Instruction::Ushr { dst, lhs, rhs },
            other => {
                return Err(CompileError::internal(format!(
                    "unexpected compound operator {other:?}"
                )));
            }
        };
        self.codegen.emit(instruction);
        Ok(())
    }

    fn compile_logical_assignment(
        &mut self,
        assign: &AssignmentExpression,
    ) -> CompileResult<ScopeIndex> {
        let AssignmentTarget::AssignmentTargetIdentifier(ident) = &assign.left else {
            return Err(CompileError::unsupported(
                "logical assignment to a member expression",
            ));
        };

        let dst = self.codegen.temp();
        let current = self.compile_identifier_load(&ident.name)?;
        self.codegen.emit(Instruction::Move { dst, src: current });
        self.codegen.free_temp(current);

        let short_circuit = self.codegen.here();
        match assign.operator {
            AssignmentOperator::LogicalOr => self.codegen.emit(Instruction::TestIfTrue {
                src: dst,
                offset: JumpOffset::new(0),
            }),
            AssignmentOperator::LogicalAnd => self.codegen.emit(Instruction::TestIfFalse {
                src: dst,
                offset: JumpOffset::new(0),
            }),
            _ => self.codegen.emit(Instruction::Coalesce {
                src: dst,
                offset: JumpOffset::new(0),
            }),
        }

        let rhs = self.compile_expression(&assign.right)?;
        self.codegen.emit(Instruction::Move { dst, src: rhs });
        self.codegen.free_temp(rhs);
        self.store_identifier(&ident.name, dst)?;

        let here = self.codegen.here();
        self.codegen.patch_jump(short_circuit, here);
        Ok(dst)
    }

    fn compile_assignment_target(
        &mut self,
        target: &AssignmentTarget,
        value: ScopeIndex,
    ) -> CompileResult<()> {
        match target {
            AssignmentTarget::AssignmentTargetIdentifier(ident) => {
                self.store_identifier(&ident.name, value)
            }
            AssignmentTarget::StaticMemberExpression(member) => {
                let object = self.compile_expression(&member.object)?;
                let key = self.codegen.string(&member.property.name);
                // Literal `__proto__:` writes go through the cycle check
                if member.property.name == "__proto__" {
                    self.codegen.emit(Instruction::ProtoInit {
                        obj: object,
                        src: value,
                    });
                } else {
                    self.codegen.emit(Instruction::PropertySet {
                        obj: object,
                        key,
                        src: value,
                    });
                }
                self.codegen.free_temp(object);
                Ok(())
            }
            AssignmentTarget::ComputedMemberExpression(member) => {
                let object = self.compile_expression(&member.object)?;
                let key = self.compile_computed_key(&member.expression, object)?;
                self.codegen.emit(Instruction::PropertySet {
                    obj: object,
                    key,
                    src: value,
                });
                self.codegen.free_temp(key);
                self.codegen.free_temp(object);
                Ok(())
            }
            _ => Err(CompileError::unsupported("destructuring assignment target")),
        }
    }

    fn resolve_store_slot(&mut self, name: &str) -> CompileResult<StoreTarget> {
        match self.codegen.resolve(name) {
            Resolved::Local(binding) => {
                if binding.kind == BindingKind::Const {
                    self.emit_const_assignment_error();
                }
                Ok(StoreTarget::Slot(ScopeIndex::local(binding.slot)))
            }
            Resolved::Closure { slot, kind } => {
                if kind == BindingKind::Const {
                    self.emit_const_assignment_error();
                }
                Ok(StoreTarget::Slot(ScopeIndex::closure(slot)))
            }
            Resolved::Global { slot, kind } => {
                if kind == BindingKind::Const {
                    self.emit_const_assignment_error();
                }
                Ok(StoreTarget::Slot(ScopeIndex::new(
                    skink_vm_bytecode::ScopeKind::Global,
                    slot,
                )))
            }
            Resolved::Unresolved => Ok(StoreTarget::Global(self.codegen.string_index(name))),
        }
    }

    /// Assignment to a const raises TypeError at run time
    fn emit_const_assignment_error(&mut self) {
        let message = self.codegen.string_index("Assignment to constant variable.");
        self.codegen.emit(Instruction::Error {
            kind: ErrorKind::Type,
            message: skink_vm_bytecode::ConstIndex::new(message),
        });
    }

    fn store_identifier(&mut self, name: &str, value: ScopeIndex) -> CompileResult<()> {
        match self.resolve_store_slot(name)? {
            StoreTarget::Slot(slot) => {
                self.codegen.emit(Instruction::Move { dst: slot, src: value });
            }
            StoreTarget::Global(name_index) => {
                self.codegen.emit(Instruction::GlobalSet {
                    name: skink_vm_bytecode::ConstIndex::new(name_index),
                    src: value,
                });
            }
        }
        Ok(())
    }

    /// `var f = function(){}` names the anonymous function
    fn name_anonymous_function(&mut self, init: &Expression, value: ScopeIndex, name: &str) {
        let anonymous = match init {
            Expression::FunctionExpression(func) => func.id.is_none(),
            Expression::ArrowFunctionExpression(_) => true,
            _ => false,
        };
        if anonymous {
            let name_index = self.codegen.string_index(name);
            self.codegen.emit(Instruction::SetFunctionName {
                func: value,
                name: skink_vm_bytecode::ConstIndex::new(name_index),
            });
        }
    }

    /// Evaluate a computed key with the nullish-base check folded in
    fn compile_computed_key(
        &mut self,
        expression: &Expression,
        base: ScopeIndex,
    ) -> CompileResult<ScopeIndex> {
        let raw = self.compile_expression(expression)?;
        let dst = self.codegen.temp();
        self.codegen.emit(Instruction::ToPropertyKeyChk {
            dst,
            src: raw,
            base,
        });
        self.codegen.free_temp(raw);
        Ok(dst)
    }

    // ---- calls -----------------------------------------------------------

    /// Compile a call; `chain_jumps` collects optional-chain bailouts
    fn compile_call(
        &mut self,
        call: &CallExpression,
        chain: Option<&mut Vec<usize>>,
    ) -> CompileResult<ScopeIndex> {
        self.codegen.set_position(call.span.start);
        let mut chain_jumps_local = Vec::new();
        let chain_jumps = match chain {
            Some(jumps) => jumps,
            None => &mut chain_jumps_local,
        };

        // Method calls resolve the callee through the receiver
        let dst = match &call.callee {
            Expression::StaticMemberExpression(member) => {
                let object = self.compile_expression(&member.object)?;
                if member.optional {
                    self.emit_chain_guard(object, chain_jumps);
                }
                let key = self.codegen.string(&member.property.name);
                self.codegen.emit(Instruction::MethodFrame {
                    obj: object,
                    key,
                    argc: call.arguments.len() as u16,
                    ctor: false,
                });
                self.compile_arguments(&call.arguments)?;
                let dst = self.codegen.temp();
                self.codegen.emit(Instruction::FunctionCall { dst });
                self.codegen.free_temp(object);
                dst
            }
            Expression::ComputedMemberExpression(member) => {
                let object = self.compile_expression(&member.object)?;
                if member.optional {
                    self.emit_chain_guard(object, chain_jumps);
                }
                let key = self.compile_computed_key(&member.expression, object)?;
                self.codegen.emit(Instruction::MethodFrame {
                    obj: object,
                    key,
                    argc: call.arguments.len() as u16,
                    ctor: false,
                });
                self.compile_arguments(&call.arguments)?;
                let dst = self.codegen.temp();
                self.codegen.emit(Instruction::FunctionCall { dst });
                self.codegen.free_temp(key);
                self.codegen.free_temp(object);
                dst
            }
            callee => {
                let callee_index = self.compile_expression(callee)?;
                if call.optional {
                    self.emit_chain_guard(callee_index, chain_jumps);
                }
                self.codegen.emit(Instruction::FunctionFrame {
                    callee: callee_index,
                    argc: call.arguments.len() as u16,
                    ctor: false,
                });
                self.compile_arguments(&call.arguments)?;
                let dst = self.codegen.temp();
                self.codegen.emit(Instruction::FunctionCall { dst });
                self.codegen.free_temp(callee_index);
                dst
            }
        };

        if !chain_jumps_local.is_empty() {
            self.finish_chain(dst, chain_jumps_local);
        }
        Ok(dst)
    }

    fn compile_arguments(&mut self, arguments: &[Argument]) -> CompileResult<()> {
        for argument in arguments {
            match argument {
                Argument::SpreadElement(_) => {
                    return Err(CompileError::unsupported("spread arguments"));
                }
                other => {
                    let expr = other
                        .as_expression()
                        .ok_or_else(|| CompileError::internal("non-expression argument"))?;
                    let value = self.compile_expression(expr)?;
                    self.codegen.emit(Instruction::PutArg { src: value });
                    self.codegen.free_temp(value);
                }
            }
        }
        Ok(())
    }

    fn compile_new(&mut self, new_expr: &NewExpression) -> CompileResult<ScopeIndex> {
        let callee = self.compile_expression(&new_expr.callee)?;
        self.codegen.emit(Instruction::FunctionFrame {
            callee,
            argc: new_expr.arguments.len() as u16,
            ctor: true,
        });
        self.compile_arguments(&new_expr.arguments)?;
        let dst = self.codegen.temp();
        self.codegen.emit(Instruction::FunctionCall { dst });
        self.codegen.free_temp(callee);
        Ok(dst)
    }

    // ---- optional chains -------------------------------------------------

    fn compile_chain(&mut self, chain: &ChainExpression) -> CompileResult<ScopeIndex> {
        let mut jumps = Vec::new();
        let dst = match &chain.expression {
            ChainElement::CallExpression(call) => self.compile_call(call, Some(&mut jumps))?,
            ChainElement::StaticMemberExpression(member) => {
                let object = self.compile_expression(&member.object)?;
                if member.optional {
                    self.emit_chain_guard(object, &mut jumps);
                }
                let key = self.codegen.string(&member.property.name);
                let dst = self.codegen.temp();
                self.codegen.emit(Instruction::PropertyGet {
                    dst,
                    obj: object,
                    key,
                });
                self.codegen.free_temp(object);
                dst
            }
            ChainElement::ComputedMemberExpression(member) => {
                let object = self.compile_expression(&member.object)?;
                if member.optional {
                    self.emit_chain_guard(object, &mut jumps);
                }
                let key = self.compile_computed_key(&member.expression, object)?;
                let dst = self.codegen.temp();
                self.codegen.emit(Instruction::PropertyGet {
                    dst,
                    obj: object,
                    key,
                });
                self.codegen.free_temp(key);
                self.codegen.free_temp(object);
                dst
            }
            _ => return Err(CompileError::unsupported("optional chain form")),
        };
        self.finish_chain(dst, jumps);
        Ok(dst)
    }

    /// Bail out of the chain with undefined when `guarded` is nullish
    fn emit_chain_guard(&mut self, guarded: ScopeIndex, jumps: &mut Vec<usize>) {
        // Coalesce jumps when NOT nullish: skip over the bailout jump
        self.codegen.emit(Instruction::Coalesce {
            src: guarded,
            offset: JumpOffset::new(2),
        });
        let bail = self.codegen.here();
        self.codegen.emit(Instruction::Jump {
            offset: JumpOffset::new(0),
        });
        jumps.push(bail);
    }

    fn finish_chain(&mut self, dst: ScopeIndex, jumps: Vec<usize>) {
        if jumps.is_empty() {
            return;
        }
        // Normal completion skips the undefined fill
        let over = self.emit_jump();
        let fill = self.codegen.here();
        let undef = self.codegen.undefined();
        self.codegen.emit(Instruction::Move { dst, src: undef });
        for jump in jumps {
            self.codegen.patch_jump(jump, fill);
        }
        let here = self.codegen.here();
        self.codegen.patch_jump(over, here);
    }

    // ---- literals --------------------------------------------------------

    fn compile_object_literal(&mut self, object: &ObjectExpression) -> CompileResult<ScopeIndex> {
        let dst = self.codegen.temp();
        self.codegen.emit(Instruction::Object { dst });

        for property in &object.properties {
            match property {
                ObjectPropertyKind::ObjectProperty(prop) => {
                    // `__proto__:` in a literal sets the prototype
                    if !prop.computed
                        && matches!(prop.kind, PropertyKind::Init)
                        && property_key_name(&prop.key).as_deref() == Some("__proto__")
                    {
                        let value = self.compile_expression(&prop.value)?;
                        self.codegen.emit(Instruction::ProtoInit {
                            obj: dst,
                            src: value,
                        });
                        self.codegen.free_temp(value);
                        continue;
                    }

                    let key = self.compile_property_key(&prop.key, prop.computed)?;
                    let value = self.compile_expression(&prop.value)?;
                    match prop.kind {
                        PropertyKind::Init => {
                            self.codegen.emit(Instruction::PropertyInit {
                                obj: dst,
                                key,
                                src: value,
                            });
                        }
                        PropertyKind::Get => {
                            self.codegen.emit(Instruction::PropertyAccessor {
                                obj: dst,
                                key,
                                func: value,
                                setter: false,
                            });
                        }
                        PropertyKind::Set => {
                            self.codegen.emit(Instruction::PropertyAccessor {
                                obj: dst,
                                key,
                                func: value,
                                setter: true,
                            });
                        }
                    }
                    self.codegen.free_temp(value);
                    self.codegen.free_temp(key);
                }
                ObjectPropertyKind::SpreadProperty(_) => {
                    return Err(CompileError::unsupported("object spread"));
                }
            }
        }
        Ok(dst)
    }

    fn compile_property_key(
        &mut self,
        key: &PropertyKey,
        computed: bool,
    ) -> CompileResult<ScopeIndex> {
        if computed {
            let expr = key
                .as_expression()
                .ok_or_else(|| CompileError::internal("computed key without expression"))?;
            let raw = self.compile_expression(expr)?;
            let dst = self.codegen.temp();
            self.codegen.emit(Instruction::ToPropertyKey { dst, src: raw });
            self.codegen.free_temp(raw);
            return Ok(dst);
        }
        match property_key_name(key) {
            Some(name) => Ok(self.codegen.string(&name)),
            None => match key {
                PropertyKey::NumericLiteral(lit) => Ok(self.codegen.number(lit.value)),
                _ => Err(CompileError::unsupported("property key form")),
            },
        }
    }

    fn compile_array_literal(&mut self, array: &ArrayExpression) -> CompileResult<ScopeIndex> {
        let has_holes = array
            .elements
            .iter()
            .any(|e| matches!(e, ArrayExpressionElement::Elision(_)));
        let dst = self.codegen.temp();
        self.codegen.emit(Instruction::Array {
            dst,
            len: array.elements.len() as u32,
            ctor: has_holes,
        });

        for (index, element) in array.elements.iter().enumerate() {
            match element {
                ArrayExpressionElement::Elision(_) => {}
                ArrayExpressionElement::SpreadElement(_) => {
                    return Err(CompileError::unsupported("array spread"));
                }
                other => {
                    let expr = other
                        .as_expression()
                        .ok_or_else(|| CompileError::internal("non-expression array element"))?;
                    let value = self.compile_expression(expr)?;
                    let key = self.codegen.number(index as f64);
                    self.codegen.emit(Instruction::PropertyInit {
                        obj: dst,
                        key,
                        src: value,
                    });
                    self.codegen.free_temp(value);
                }
            }
        }
        Ok(dst)
    }

    fn compile_await(&mut self, await_expr: &AwaitExpression) -> CompileResult<ScopeIndex> {
        if !self.codegen.current.flags.is_async && !self.codegen.current.flags.is_top_level {
            return Err(CompileError::early(
                "await is only valid in async functions and at the top level",
            ));
        }
        let src = self.compile_expression(&await_expr.argument)?;
        let dst = self.codegen.temp();
        self.codegen.emit(Instruction::Await { dst, src });
        self.codegen.free_temp(src);
        Ok(dst)
    }

    // ---- small emit helpers ----------------------------------------------

    fn emit_jump(&mut self) -> usize {
        let index = self.codegen.here();
        self.codegen.emit(Instruction::Jump {
            offset: JumpOffset::new(0),
        });
        index
    }

    fn emit_jump_if_false(&mut self, cond: ScopeIndex) -> usize {
        let index = self.codegen.here();
        self.codegen.emit(Instruction::JumpIfFalse {
            cond,
            offset: JumpOffset::new(0),
        });
        index
    }

    fn emit_jump_back(&mut self, target: usize) {
        let here = self.codegen.here();
        self.codegen.emit(Instruction::Jump {
            offset: JumpOffset::new(target as i32 - here as i32),
        });
    }
}

/// Where an identifier store lands
enum StoreTarget {
    /// A resolved slot
    Slot(ScopeIndex),
    /// Dynamic global set by name (constant-pool index)
    Global(u32),
}

/// Non-computed property key text
fn property_key_name(key: &PropertyKey) -> Option<String> {
    match key {
        PropertyKey::StaticIdentifier(ident) => Some(ident.name.to_string()),
        PropertyKey::Identifier(ident) => Some(ident.name.to_string()),
        PropertyKey::StringLiteral(lit) => Some(lit.value.to_string()),
        _ => None,
    }
}

/// Collect `var` names in a statement list, descending into blocks and
/// control flow but not into nested functions
fn collect_var_names(statements: &[Statement], out: &mut Vec<String>) {
    for statement in statements {
        match statement {
            Statement::VariableDeclaration(decl) => {
                if decl.kind == VariableDeclarationKind::Var {
                    for declarator in &decl.declarations {
                        collect_binding_names(&declarator.id, out);
                    }
                }
            }
            Statement::BlockStatement(block) => collect_var_names(&block.body, out),
            Statement::IfStatement(if_stmt) => {
                collect_var_names(std::slice::from_ref(&if_stmt.consequent), out);
                if let Some(alternate) = &if_stmt.alternate {
                    collect_var_names(std::slice::from_ref(alternate), out);
                }
            }
            Statement::WhileStatement(while_stmt) => {
                collect_var_names(std::slice::from_ref(&while_stmt.body), out);
            }
            Statement::DoWhileStatement(do_while) => {
                collect_var_names(std::slice::from_ref(&do_while.body), out);
            }
            Statement::ForStatement(for_stmt) => {
                if let Some(ForStatementInit::VariableDeclaration(decl)) = &for_stmt.init
                    && decl.kind == VariableDeclarationKind::Var
                {
                    for declarator in &decl.declarations {
                        collect_binding_names(&declarator.id, out);
                    }
                }
                collect_var_names(std::slice::from_ref(&for_stmt.body), out);
            }
            Statement::ForInStatement(for_in) => {
                if let ForStatementLeft::VariableDeclaration(decl) = &for_in.left
                    && decl.kind == VariableDeclarationKind::Var
                {
                    for declarator in &decl.declarations {
                        collect_binding_names(&declarator.id, out);
                    }
                }
                collect_var_names(std::slice::from_ref(&for_in.body), out);
            }
            Statement::ForOfStatement(for_of) => {
                if let ForStatementLeft::VariableDeclaration(decl) = &for_of.left
                    && decl.kind == VariableDeclarationKind::Var
                {
                    for declarator in &decl.declarations {
                        collect_binding_names(&declarator.id, out);
                    }
                }
                collect_var_names(std::slice::from_ref(&for_of.body), out);
            }
            Statement::TryStatement(try_stmt) => {
                collect_var_names(&try_stmt.block.body, out);
                if let Some(handler) = &try_stmt.handler {
                    collect_var_names(&handler.body.body, out);
                }
                if let Some(finalizer) = &try_stmt.finalizer {
                    collect_var_names(&finalizer.body, out);
                }
            }
            Statement::LabeledStatement(labeled) => {
                collect_var_names(std::slice::from_ref(&labeled.body), out);
            }
            Statement::SwitchStatement(switch) => {
                for case in &switch.cases {
                    collect_var_names(&case.consequent, out);
                }
            }
            _ => {}
        }
    }
}

/// Collect the names bound by a pattern
fn collect_binding_names(pattern: &BindingPattern, out: &mut Vec<String>) {
    match pattern {
        BindingPattern::BindingIdentifier(ident) => out.push(ident.name.to_string()),
        BindingPattern::AssignmentPattern(assign) => collect_binding_names(&assign.left, out),
        BindingPattern::ObjectPattern(object) => {
            for prop in &object.properties {
                collect_binding_names(&prop.value, out);
            }
        }
        BindingPattern::ArrayPattern(array) => {
            for element in array.elements.iter().flatten() {
                collect_binding_names(element, out);
            }
        }
    }
}
