//! # Skink VM bytecode
//!
//! This crate defines the bytecode format for the skink scripting engine.
//!
//! ## Design principles
//!
//! - **Register-based**: operations address slots in operand scopes
//!   (local, argument, closure, global, constant), never a stack
//! - **Immutable**: a compiled [`Module`] never changes after compilation
//! - **Serializable**: modules can be cached and shipped between processes

#![warn(clippy::all)]
#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod constant;
pub mod disasm;
pub mod error;
pub mod instruction;
pub mod lambda;
pub mod module;
pub mod operand;

pub use constant::{Constant, ConstantPool};
pub use error::BytecodeError;
pub use instruction::{ErrorKind, Instruction};
pub use lambda::{Capture, Lambda, LambdaBuilder, LambdaFlags, SourceMap};
pub use module::Module;
pub use operand::{ConstIndex, JumpOffset, LambdaIndex, ScopeIndex, ScopeKind};

/// Bytecode format version
pub const BYTECODE_VERSION: u32 = 1;
