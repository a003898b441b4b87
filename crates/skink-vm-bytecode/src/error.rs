//! Bytecode errors

use thiserror::Error;

/// Errors raised when reading a module image
#[derive(Debug, Error)]
pub enum BytecodeError {
    /// Lambda index out of range
    #[error("lambda index {0} out of bounds")]
    LambdaOutOfBounds(u32),

    /// Constant index out of range
    #[error("constant index {0} out of bounds")]
    ConstantOutOfBounds(u32),

    /// Constant kind mismatch
    #[error("constant {index} is a {found}, expected {expected}")]
    ConstantType {
        /// Pool index
        index: u32,
        /// Expected kind
        expected: &'static str,
        /// Actual kind
        found: &'static str,
    },

    /// Import table index out of range
    #[error("import index {0} out of bounds")]
    ImportOutOfBounds(u32),
}
