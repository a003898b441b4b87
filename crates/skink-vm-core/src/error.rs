//! VM error types
//!
//! Script-visible failures carry an [`ErrorKind`] so the unwinder can build
//! the right error object; thrown JS values travel as `Thrown`.

use skink_vm_bytecode::ErrorKind;
use thiserror::Error;

use crate::value::Value;

/// VM execution errors
#[derive(Debug, Error)]
pub enum VmError {
    /// Wrong type at a coercion or call site
    #[error("TypeError: {0}")]
    Type(String),

    /// Unresolved free variable or dead-zone access
    #[error("ReferenceError: {0}")]
    Reference(String),

    /// Negative/oversized lengths, runaway prototype chains, stack overflow
    #[error("RangeError: {0}")]
    Range(String),

    /// Late syntax failures (e.g. bad regexp pattern at instantiation)
    #[error("SyntaxError: {0}")]
    Syntax(String),

    /// Invariant violations; catchable but marks the VM errored
    #[error("InternalError: {0}")]
    Internal(String),

    /// Arena exhaustion; catchable but marks the VM errored
    #[error("MemoryError: {0}")]
    Memory(String),

    /// A thrown JavaScript value in flight through the unwinder
    #[error("uncaught exception: {}", crate::format::describe(.0))]
    Thrown(Box<Value>),

    /// Cooperative cancellation requested by the host
    #[error("execution interrupted")]
    Interrupted,

    /// Malformed module image
    #[error("bytecode error: {0}")]
    Bytecode(#[from] skink_vm_bytecode::BytecodeError),
}

impl VmError {
    /// Create a type error
    pub fn type_error(msg: impl Into<String>) -> Self {
        Self::Type(msg.into())
    }

    /// Create a reference error
    pub fn reference_error(msg: impl Into<String>) -> Self {
        Self::Reference(msg.into())
    }

    /// Create a range error
    pub fn range_error(msg: impl Into<String>) -> Self {
        Self::Range(msg.into())
    }

    /// Create a syntax error
    pub fn syntax_error(msg: impl Into<String>) -> Self {
        Self::Syntax(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Create a memory error
    pub fn memory(msg: impl Into<String>) -> Self {
        Self::Memory(msg.into())
    }

    /// Wrap a thrown JS value
    pub fn thrown(value: Value) -> Self {
        Self::Thrown(Box::new(value))
    }

    /// The error class this failure maps to when materialized for script
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Type(_) => ErrorKind::Type,
            Self::Reference(_) => ErrorKind::Reference,
            Self::Range(_) | Self::Interrupted => ErrorKind::Range,
            Self::Syntax(_) => ErrorKind::Syntax,
            Self::Internal(_) | Self::Bytecode(_) => ErrorKind::Internal,
            Self::Memory(_) => ErrorKind::Memory,
            Self::Thrown(_) => ErrorKind::Error,
        }
    }

    /// The message carried by this failure, without the class prefix
    pub fn message(&self) -> String {
        match self {
            Self::Type(m)
            | Self::Reference(m)
            | Self::Range(m)
            | Self::Syntax(m)
            | Self::Internal(m)
            | Self::Memory(m) => m.clone(),
            Self::Thrown(v) => crate::format::describe(v),
            Self::Interrupted => "execution interrupted".to_string(),
            Self::Bytecode(e) => e.to_string(),
        }
    }

    /// Whether this failure marks the VM as errored (refuses further work
    /// until the host resets)
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Internal(_) | Self::Memory(_) | Self::Bytecode(_))
    }
}

/// Result type for VM operations
pub type VmResult<T> = Result<T, VmError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_mapping() {
        assert_eq!(VmError::type_error("x").kind(), ErrorKind::Type);
        assert_eq!(VmError::range_error("x").kind(), ErrorKind::Range);
        assert_eq!(VmError::memory("x").kind(), ErrorKind::Memory);
    }

    #[test]
    fn test_fatal() {
        assert!(VmError::internal("bad").is_fatal());
        assert!(VmError::memory("full").is_fatal());
        assert!(!VmError::type_error("nope").is_fatal());
    }

    #[test]
    fn test_message_strips_class() {
        assert_eq!(VmError::type_error("not a function").message(), "not a function");
    }
}
