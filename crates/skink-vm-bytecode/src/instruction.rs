//! Bytecode instructions
//!
//! Register-style instruction set over scope-addressed operands. Every
//! `dst`/`src` operand is a [`ScopeIndex`]; jump offsets are relative to
//! the next instruction.

use serde::{Deserialize, Serialize};

use crate::operand::{ConstIndex, JumpOffset, LambdaIndex, ScopeIndex};

/// Error class referenced by the `Error` instruction and by error objects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Plain `Error`
    Error,
    /// `TypeError`
    Type,
    /// `RangeError`
    Range,
    /// `SyntaxError`
    Syntax,
    /// `ReferenceError`
    Reference,
    /// `InternalError`
    Internal,
    /// `MemoryError`
    Memory,
}

impl ErrorKind {
    /// The observable `name` property of the corresponding error object
    pub const fn name(self) -> &'static str {
        match self {
            Self::Error => "Error",
            Self::Type => "TypeError",
            Self::Range => "RangeError",
            Self::Syntax => "SyntaxError",
            Self::Reference => "ReferenceError",
            Self::Internal => "InternalError",
            Self::Memory => "MemoryError",
        }
    }
}

/// A decoded instruction with its operands
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Instruction {
    // ==================== Move & load ====================
    /// dst = src
    Move { dst: ScopeIndex, src: ScopeIndex },
    /// Declare a `var` binding: dst = undefined
    Let { dst: ScopeIndex },
    /// Initialize a lexical binding, ending its dead zone: dst = src
    LetUpdate { dst: ScopeIndex, src: ScopeIndex },
    /// Mark a lexical binding as not yet initialized (dead-zone sentinel)
    NotInitialized { dst: ScopeIndex },
    /// Throw ReferenceError if src is still in its dead zone
    InitializationTest { src: ScopeIndex, name: ConstIndex },
    /// dst = globals\[name\]; throws ReferenceError when unresolved
    GlobalGet { dst: ScopeIndex, name: ConstIndex },
    /// globals\[name\] = src
    GlobalSet { name: ConstIndex, src: ScopeIndex },
    /// Materialize the `arguments` object of the active frame
    Arguments { dst: ScopeIndex },
    /// dst = `this` of the active frame
    This { dst: ScopeIndex },

    // ==================== Arithmetic ====================
    /// dst = lhs + rhs (numeric add or string concatenation)
    Add {
        dst: ScopeIndex,
        lhs: ScopeIndex,
        rhs: ScopeIndex,
    },
    /// dst = lhs - rhs
    Sub {
        dst: ScopeIndex,
        lhs: ScopeIndex,
        rhs: ScopeIndex,
    },
    /// dst = lhs * rhs
    Mul {
        dst: ScopeIndex,
        lhs: ScopeIndex,
        rhs: ScopeIndex,
    },
    /// dst = lhs / rhs
    Div {
        dst: ScopeIndex,
        lhs: ScopeIndex,
        rhs: ScopeIndex,
    },
    /// dst = lhs % rhs
    Mod {
        dst: ScopeIndex,
        lhs: ScopeIndex,
        rhs: ScopeIndex,
    },
    /// dst = lhs ** rhs
    Pow {
        dst: ScopeIndex,
        lhs: ScopeIndex,
        rhs: ScopeIndex,
    },
    /// dst = lhs & rhs
    BitAnd {
        dst: ScopeIndex,
        lhs: ScopeIndex,
        rhs: ScopeIndex,
    },
    /// dst = lhs | rhs
    BitOr {
        dst: ScopeIndex,
        lhs: ScopeIndex,
        rhs: ScopeIndex,
    },
    /// dst = lhs ^ rhs
    BitXor {
        dst: ScopeIndex,
        lhs: ScopeIndex,
        rhs: ScopeIndex,
    },
    /// dst = lhs << rhs
    Shl {
        dst: ScopeIndex,
        lhs: ScopeIndex,
        rhs: ScopeIndex,
    },
    /// dst = lhs >> rhs
    Shr {
        dst: ScopeIndex,
        lhs: ScopeIndex,
        rhs: ScopeIndex,
    },
    /// dst = lhs >>> rhs
    Ushr {
        dst: ScopeIndex,
        lhs: ScopeIndex,
        rhs: ScopeIndex,
    },
    /// dst = -src
    Neg { dst: ScopeIndex, src: ScopeIndex },
    /// dst = +src (ToNumber)
    Plus { dst: ScopeIndex, src: ScopeIndex },
    /// dst = ~src
    BitNot { dst: ScopeIndex, src: ScopeIndex },
    /// dst = !src
    Not { dst: ScopeIndex, src: ScopeIndex },
    /// dst = src + 1
    Inc { dst: ScopeIndex, src: ScopeIndex },
    /// dst = src - 1
    Dec { dst: ScopeIndex, src: ScopeIndex },

    // ==================== Comparison ====================
    /// dst = lhs == rhs
    Eq {
        dst: ScopeIndex,
        lhs: ScopeIndex,
        rhs: ScopeIndex,
    },
    /// dst = lhs != rhs
    Ne {
        dst: ScopeIndex,
        lhs: ScopeIndex,
        rhs: ScopeIndex,
    },
    /// dst = lhs === rhs
    StrictEq {
        dst: ScopeIndex,
        lhs: ScopeIndex,
        rhs: ScopeIndex,
    },
    /// dst = lhs !== rhs
    StrictNe {
        dst: ScopeIndex,
        lhs: ScopeIndex,
        rhs: ScopeIndex,
    },
    /// dst = lhs < rhs
    Lt {
        dst: ScopeIndex,
        lhs: ScopeIndex,
        rhs: ScopeIndex,
    },
    /// dst = lhs <= rhs
    Le {
        dst: ScopeIndex,
        lhs: ScopeIndex,
        rhs: ScopeIndex,
    },
    /// dst = lhs > rhs
    Gt {
        dst: ScopeIndex,
        lhs: ScopeIndex,
        rhs: ScopeIndex,
    },
    /// dst = lhs >= rhs
    Ge {
        dst: ScopeIndex,
        lhs: ScopeIndex,
        rhs: ScopeIndex,
    },

    // ==================== Control flow ====================
    /// Unconditional jump
    Jump { offset: JumpOffset },
    /// Jump when cond is truthy
    JumpIfTrue {
        cond: ScopeIndex,
        offset: JumpOffset,
    },
    /// Jump when cond is falsy
    JumpIfFalse {
        cond: ScopeIndex,
        offset: JumpOffset,
    },
    /// Jump when lhs === rhs (switch dispatch)
    JumpIfEqual {
        lhs: ScopeIndex,
        rhs: ScopeIndex,
        offset: JumpOffset,
    },
    /// Short-circuit `||`: jump when src is truthy, keeping src as the result
    TestIfTrue {
        src: ScopeIndex,
        offset: JumpOffset,
    },
    /// Short-circuit `&&`: jump when src is falsy, keeping src as the result
    TestIfFalse {
        src: ScopeIndex,
        offset: JumpOffset,
    },
    /// Short-circuit `??`: jump when src is neither null nor undefined
    Coalesce {
        src: ScopeIndex,
        offset: JumpOffset,
    },

    // ==================== Property access ====================
    /// dst = obj\[key\]
    PropertyGet {
        dst: ScopeIndex,
        obj: ScopeIndex,
        key: ScopeIndex,
    },
    /// obj\[key\] = src
    PropertySet {
        obj: ScopeIndex,
        key: ScopeIndex,
        src: ScopeIndex,
    },
    /// Define an own data property on an object literal, bypassing setters
    PropertyInit {
        obj: ScopeIndex,
        key: ScopeIndex,
        src: ScopeIndex,
    },
    /// Define a getter (or setter) on an object literal
    PropertyAccessor {
        obj: ScopeIndex,
        key: ScopeIndex,
        func: ScopeIndex,
        setter: bool,
    },
    /// dst = delete obj\[key\]
    PropertyDelete {
        dst: ScopeIndex,
        obj: ScopeIndex,
        key: ScopeIndex,
    },
    /// dst = key in obj
    PropertyIn {
        dst: ScopeIndex,
        obj: ScopeIndex,
        key: ScopeIndex,
    },
    /// Open a for-in iterator over obj's enumerable keys
    PropertyForeach { dst: ScopeIndex, obj: ScopeIndex },
    /// Fetch the next for-in key into dst and loop back; falls through when done
    PropertyNext {
        dst: ScopeIndex,
        iter: ScopeIndex,
        offset: JumpOffset,
    },
    /// Set __proto__ from an object-literal `__proto__:` clause (cycle-checked)
    ProtoInit { obj: ScopeIndex, src: ScopeIndex },
    /// dst = ToPropertyKey(src)
    ToPropertyKey { dst: ScopeIndex, src: ScopeIndex },
    /// ToPropertyKey with a nullish-base check: throws TypeError naming the base
    ToPropertyKeyChk {
        dst: ScopeIndex,
        src: ScopeIndex,
        base: ScopeIndex,
    },

    // ==================== Object creation ====================
    /// dst = {}
    Object { dst: ScopeIndex },
    /// dst = new Array(len); `ctor` marks a hole-carrying literal
    Array {
        dst: ScopeIndex,
        len: u32,
        ctor: bool,
    },
    /// Instantiate a function value, capturing closure slots per the lambda
    Function { dst: ScopeIndex, lambda: LambdaIndex },
    /// Instantiate a hoisted function declaration at frame entry
    FunctionCopy { dst: ScopeIndex, lambda: LambdaIndex },
    /// dst = regexp literal from the constant pool
    Regexp { dst: ScopeIndex, pattern: ConstIndex },
    /// Concatenate the fixed parts array in src into a string
    TemplateLiteral { dst: ScopeIndex, src: ScopeIndex },

    // ==================== Calls ====================
    /// Validate the callee and open a pending call frame
    FunctionFrame {
        callee: ScopeIndex,
        argc: u16,
        ctor: bool,
    },
    /// Resolve obj\[key\] as the callee with obj as `this`, then open a frame
    MethodFrame {
        obj: ScopeIndex,
        key: ScopeIndex,
        argc: u16,
        ctor: bool,
    },
    /// Append the next positional argument to the pending frame
    PutArg { src: ScopeIndex },
    /// Invoke the pending frame; on return the result lands in dst
    FunctionCall { dst: ScopeIndex },
    /// Return src to the caller
    Return { src: ScopeIndex },
    /// End of the top-level lambda; src is the completion value
    Stop { src: ScopeIndex },
    /// Assign the inferred `name` property of a function value
    SetFunctionName { func: ScopeIndex, name: ConstIndex },

    // ==================== Exception handling ====================
    /// Push a catch-chain record. `exit_slot` routes finally exits and
    /// `exc_slot` parks an in-flight exception across the finally body;
    /// both are primed with their "empty" sentinels here.
    TryStart {
        catch_offset: JumpOffset,
        exit_slot: ScopeIndex,
        exc_slot: ScopeIndex,
    },
    /// Pop the catch-chain record and jump past the handler
    TryEnd { offset: JumpOffset },
    /// `break` crossing a try-with-finally: tag exit_slot, run finally
    TryBreak {
        exit_slot: ScopeIndex,
        offset: JumpOffset,
    },
    /// `continue` crossing a try-with-finally: tag exit_slot, run finally
    TryContinue {
        exit_slot: ScopeIndex,
        offset: JumpOffset,
    },
    /// `return` crossing a try-with-finally: store value, run finally
    TryReturn {
        src: ScopeIndex,
        exit_slot: ScopeIndex,
        offset: JumpOffset,
    },
    /// Throw src
    Throw { src: ScopeIndex },
    /// Materialize the in-flight exception into dst
    Catch { dst: ScopeIndex },
    /// Re-dispatch a routed exit after the finally body has run: perform
    /// the routed return, jump to the break/continue target, or rethrow
    /// the exception parked in `exc_slot`
    Finally {
        exit_slot: ScopeIndex,
        exc_slot: ScopeIndex,
        break_offset: JumpOffset,
        continue_offset: JumpOffset,
    },
    /// Construct and throw a predefined error
    Error { kind: ErrorKind, message: ConstIndex },

    // ==================== Modules & async ====================
    /// dst = imported module value (evaluated once per VM)
    Import { dst: ScopeIndex, module: ConstIndex },
    /// Suspend on src; dst receives the settled value on resume
    Await { dst: ScopeIndex, src: ScopeIndex },

    // ==================== Other ====================
    /// dst = lhs instanceof rhs
    InstanceOf {
        dst: ScopeIndex,
        lhs: ScopeIndex,
        rhs: ScopeIndex,
    },
    /// dst = typeof src
    Typeof { dst: ScopeIndex, src: ScopeIndex },
    /// typeof for an unresolved global name (no ReferenceError)
    TypeofGlobal { dst: ScopeIndex, name: ConstIndex },
    /// dst = void src
    Void { dst: ScopeIndex, src: ScopeIndex },
    /// `delete` of a non-property reference: evaluate src, produce true
    Delete { dst: ScopeIndex, src: ScopeIndex },
    /// Debugger statement
    Debugger,
    /// No operation
    Nop,
}

impl Instruction {
    /// Mnemonic used by the disassembler and trace logging
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Move { .. } => "Move",
            Self::Let { .. } => "Let",
            Self::LetUpdate { .. } => "LetUpdate",
            Self::NotInitialized { .. } => "NotInitialized",
            Self::InitializationTest { .. } => "InitializationTest",
            Self::GlobalGet { .. } => "GlobalGet",
            Self::GlobalSet { .. } => "GlobalSet",
            Self::Arguments { .. } => "Arguments",
            Self::This { .. } => "This",
            Self::Add { .. } => "Add",
            Self::Sub { .. } => "Sub",
            Self::Mul { .. } => "Mul",
            Self::Div { .. } => "Div",
            Self::Mod { .. } => "Mod",
            Self::Pow { .. } => "Pow",
            Self::BitAnd { .. } => "BitAnd",
            Self::BitOr { .. } => "BitOr",
            Self::BitXor { .. } => "BitXor",
            Self::Shl { .. } => "Shl",
            Self::Shr { .. } => "Shr",
            Self::Ushr { .. } => "Ushr",
            Self::Neg { .. } => "Neg",
            Self::Plus { .. } => "Plus",
            Self::BitNot { .. } => "BitNot",
            Self::Not { .. } => "Not",
            Self::Inc { .. } => "Inc",
            Self::Dec { .. } => "Dec",
            Self::Eq { .. } => "Eq",
            Self::Ne { .. } => "Ne",
            Self::StrictEq { .. } => "StrictEq",
            Self::StrictNe { .. } => "StrictNe",
            Self::Lt { .. } => "Lt",
            Self::Le { .. } => "Le",
            Self::Gt { .. } => "Gt",
            Self::Ge { .. } => "Ge",
            Self::Jump { .. } => "Jump",
            Self::JumpIfTrue { .. } => "JumpIfTrue",
            Self::JumpIfFalse { .. } => "JumpIfFalse",
            Self::JumpIfEqual { .. } => "JumpIfEqual",
            Self::TestIfTrue { .. } => "TestIfTrue",
            Self::TestIfFalse { .. } => "TestIfFalse",
            Self::Coalesce { .. } => "Coalesce",
            Self::PropertyGet { .. } => "PropertyGet",
            Self::PropertySet { .. } => "PropertySet",
            Self::PropertyInit { .. } => "PropertyInit",
            Self::PropertyAccessor { .. } => "PropertyAccessor",
            Self::PropertyDelete { .. } => "PropertyDelete",
            Self::PropertyIn { .. } => "PropertyIn",
            Self::PropertyForeach { .. } => "PropertyForeach",
            Self::PropertyNext { .. } => "PropertyNext",
            Self::ProtoInit { .. } => "ProtoInit",
            Self::ToPropertyKey { .. } => "ToPropertyKey",
            Self::ToPropertyKeyChk { .. } => "ToPropertyKeyChk",
            Self::Object { .. } => "Object",
            Self::Array { .. } => "Array",
            Self::Function { .. } => "Function",
            Self::FunctionCopy { .. } => "FunctionCopy",
            Self::Regexp { .. } => "Regexp",
            Self::TemplateLiteral { .. } => "TemplateLiteral",
            Self::FunctionFrame { .. } => "FunctionFrame",
            Self::MethodFrame { .. } => "MethodFrame",
            Self::PutArg { .. } => "PutArg",
            Self::FunctionCall { .. } => "FunctionCall",
            Self::Return { .. } => "Return",
            Self::Stop { .. } => "Stop",
            Self::SetFunctionName { .. } => "SetFunctionName",
            Self::TryStart { .. } => "TryStart",
            Self::TryEnd { .. } => "TryEnd",
            Self::TryBreak { .. } => "TryBreak",
            Self::TryContinue { .. } => "TryContinue",
            Self::TryReturn { .. } => "TryReturn",
            Self::Throw { .. } => "Throw",
            Self::Catch { .. } => "Catch",
            Self::Finally { .. } => "Finally",
            Self::Error { .. } => "Error",
            Self::Import { .. } => "Import",
            Self::Await { .. } => "Await",
            Self::InstanceOf { .. } => "InstanceOf",
            Self::Typeof { .. } => "Typeof",
            Self::TypeofGlobal { .. } => "TypeofGlobal",
            Self::Void { .. } => "Void",
            Self::Delete { .. } => "Delete",
            Self::Debugger => "Debugger",
            Self::Nop => "Nop",
        }
    }

    /// Whether this instruction can transfer control non-sequentially
    pub const fn is_jump(&self) -> bool {
        matches!(
            self,
            Self::Jump { .. }
                | Self::JumpIfTrue { .. }
                | Self::JumpIfFalse { .. }
                | Self::JumpIfEqual { .. }
                | Self::TestIfTrue { .. }
                | Self::TestIfFalse { .. }
                | Self::Coalesce { .. }
                | Self::PropertyNext { .. }
                | Self::TryStart { .. }
                | Self::TryEnd { .. }
                | Self::TryBreak { .. }
                | Self::TryContinue { .. }
                | Self::TryReturn { .. }
                | Self::Finally { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operand::ScopeIndex;

    #[test]
    fn test_instruction_name() {
        let add = Instruction::Add {
            dst: ScopeIndex::local(0),
            lhs: ScopeIndex::local(1),
            rhs: ScopeIndex::local(2),
        };
        assert_eq!(add.name(), "Add");
        assert_eq!(Instruction::Nop.name(), "Nop");
    }

    #[test]
    fn test_is_jump() {
        assert!(
            Instruction::Jump {
                offset: JumpOffset(3)
            }
            .is_jump()
        );
        assert!(
            !Instruction::Move {
                dst: ScopeIndex::local(0),
                src: ScopeIndex::local(1),
            }
            .is_jump()
        );
    }

    #[test]
    fn test_error_kind_names() {
        assert_eq!(ErrorKind::Type.name(), "TypeError");
        assert_eq!(ErrorKind::Memory.name(), "MemoryError");
    }
}
