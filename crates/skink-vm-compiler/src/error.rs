//! Compile errors

use thiserror::Error;

/// Errors produced while lowering source to bytecode
#[derive(Debug, Error)]
pub enum CompileError {
    /// Parser diagnostic (line/column already embedded in the message)
    #[error("SyntaxError: {0}")]
    Parse(String),

    /// Grammar the compiler does not lower
    #[error("SyntaxError: {0} is not supported")]
    Unsupported(String),

    /// Early error mandated by the language (e.g. redeclaration)
    #[error("SyntaxError: {0}")]
    Early(String),

    /// Compiler invariant violation
    #[error("internal compiler error: {0}")]
    Internal(String),
}

impl CompileError {
    /// Unsupported-grammar error
    pub fn unsupported(what: impl Into<String>) -> Self {
        Self::Unsupported(what.into())
    }

    /// Early (static semantic) error
    pub fn early(msg: impl Into<String>) -> Self {
        Self::Early(msg.into())
    }

    /// Internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

/// Result type for compilation
pub type CompileResult<T> = Result<T, CompileError>;
