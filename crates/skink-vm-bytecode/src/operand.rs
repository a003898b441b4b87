//! Bytecode operands
//!
//! All runtime operand references are scope indices: a tagged 32-bit word
//! whose low bits select an operand scope and whose remaining bits are a
//! slot offset into that scope.

use serde::{Deserialize, Serialize};

/// Number of low bits used for the scope tag.
const KIND_BITS: u32 = 3;
const KIND_MASK: u32 = (1 << KIND_BITS) - 1;

/// Maximum slot offset representable in a scope index.
pub const MAX_SLOT: u32 = (u32::MAX >> KIND_BITS) - 1;

/// Operand scope selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ScopeKind {
    /// Local variables and call temporaries
    Local = 0,
    /// Formal arguments of the active frame
    Argument = 1,
    /// Captured closure slots
    Closure = 2,
    /// Global bindings
    Global = 3,
    /// Constant pool of the active module
    Const = 4,
}

impl ScopeKind {
    /// Convert from the low tag bits
    pub fn from_tag(tag: u32) -> Option<Self> {
        match tag {
            0 => Some(Self::Local),
            1 => Some(Self::Argument),
            2 => Some(Self::Closure),
            3 => Some(Self::Global),
            4 => Some(Self::Const),
            _ => None,
        }
    }

    /// Short mnemonic used by the disassembler
    pub const fn mnemonic(self) -> &'static str {
        match self {
            Self::Local => "l",
            Self::Argument => "a",
            Self::Closure => "c",
            Self::Global => "g",
            Self::Const => "k",
        }
    }
}

/// A scope-addressed operand: scope kind + slot offset packed in 32 bits
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct ScopeIndex(pub u32);

impl ScopeIndex {
    /// Pack a scope kind and slot offset
    #[inline]
    pub const fn new(kind: ScopeKind, slot: u32) -> Self {
        debug_assert!(slot <= MAX_SLOT);
        Self((slot << KIND_BITS) | kind as u32)
    }

    /// A local-scope index
    #[inline]
    pub const fn local(slot: u32) -> Self {
        Self::new(ScopeKind::Local, slot)
    }

    /// An argument-scope index
    #[inline]
    pub const fn argument(slot: u32) -> Self {
        Self::new(ScopeKind::Argument, slot)
    }

    /// A closure-scope index
    #[inline]
    pub const fn closure(slot: u32) -> Self {
        Self::new(ScopeKind::Closure, slot)
    }

    /// A constant-pool index
    #[inline]
    pub const fn constant(slot: u32) -> Self {
        Self::new(ScopeKind::Const, slot)
    }

    /// Which scope this index addresses
    #[inline]
    pub fn kind(self) -> ScopeKind {
        ScopeKind::from_tag(self.0 & KIND_MASK).expect("invalid scope tag")
    }

    /// Slot offset within the scope
    #[inline]
    pub const fn slot(self) -> u32 {
        self.0 >> KIND_BITS
    }
}

impl std::fmt::Debug for ScopeIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}", self.kind().mnemonic(), self.slot())
    }
}

/// Index into the module constant pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct ConstIndex(pub u32);

impl ConstIndex {
    /// Create a new constant index
    #[inline]
    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    /// Get index value
    #[inline]
    pub const fn index(self) -> u32 {
        self.0
    }
}

/// Index into the module lambda table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct LambdaIndex(pub u32);

impl LambdaIndex {
    /// Create a new lambda index
    #[inline]
    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    /// Get index value
    #[inline]
    pub const fn index(self) -> u32 {
        self.0
    }
}

/// Signed jump offset in instructions, relative to the next instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct JumpOffset(pub i32);

impl JumpOffset {
    /// Create a new jump offset
    #[inline]
    pub const fn new(offset: i32) -> Self {
        Self(offset)
    }

    /// Get offset value
    #[inline]
    pub const fn offset(self) -> i32 {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_index_packing() {
        let idx = ScopeIndex::new(ScopeKind::Closure, 37);
        assert_eq!(idx.kind(), ScopeKind::Closure);
        assert_eq!(idx.slot(), 37);
    }

    #[test]
    fn test_scope_index_max_slot() {
        let idx = ScopeIndex::new(ScopeKind::Const, MAX_SLOT);
        assert_eq!(idx.slot(), MAX_SLOT);
        assert_eq!(idx.kind(), ScopeKind::Const);
    }

    #[test]
    fn test_scope_kind_roundtrip() {
        for kind in [
            ScopeKind::Local,
            ScopeKind::Argument,
            ScopeKind::Closure,
            ScopeKind::Global,
            ScopeKind::Const,
        ] {
            assert_eq!(ScopeKind::from_tag(kind as u32), Some(kind));
        }
        assert_eq!(ScopeKind::from_tag(7), None);
    }

    #[test]
    fn test_debug_format() {
        assert_eq!(format!("{:?}", ScopeIndex::local(3)), "l3");
        assert_eq!(format!("{:?}", ScopeIndex::constant(0)), "k0");
    }
}
