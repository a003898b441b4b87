//! Constant pool for bytecode modules
//!
//! Literals are referenced through the `Const` operand scope. The pool
//! deduplicates by structural equality so repeated literals share a slot.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::hash::{Hash, Hasher};

/// A constant value in the constant pool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Constant {
    /// `undefined`
    Undefined,
    /// `null`
    Null,
    /// Boolean literal
    Boolean(bool),
    /// 64-bit floating point number
    Number(f64),
    /// String literal (UTF-8)
    String(Box<str>),
    /// Regular expression literal
    Regexp {
        /// The regex pattern
        pattern: Box<str>,
        /// The regex flags (e.g. "gi")
        flags: Box<str>,
    },
}

impl Constant {
    /// Create a number constant
    #[inline]
    pub fn number(n: f64) -> Self {
        Self::Number(n)
    }

    /// Create a string constant
    #[inline]
    pub fn string(s: impl Into<Box<str>>) -> Self {
        Self::String(s.into())
    }

    /// Create a regexp constant
    #[inline]
    pub fn regexp(pattern: impl Into<Box<str>>, flags: impl Into<Box<str>>) -> Self {
        Self::Regexp {
            pattern: pattern.into(),
            flags: flags.into(),
        }
    }

    /// Get as number if this is a number constant
    #[inline]
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Get as string if this is a string constant
    #[inline]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Hash for deduplication. f64 has no `Hash`; numbers hash by bit
    /// pattern, so `+0` and `-0` stay distinct pool entries.
    fn hash_for_dedup<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Self::Undefined | Self::Null => {}
            Self::Boolean(b) => b.hash(state),
            Self::Number(n) => n.to_bits().hash(state),
            Self::String(s) => s.hash(state),
            Self::Regexp { pattern, flags } => {
                pattern.hash(state);
                flags.hash(state);
            }
        }
    }
}

/// Constant pool with hash-based deduplication
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConstantPool {
    constants: Vec<Constant>,
    /// hash -> indices with that hash (collisions keep a list)
    #[serde(skip)]
    dedup_index: FxHashMap<u64, Vec<u32>>,
}

impl ConstantPool {
    /// Create a new empty constant pool
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    fn hash_constant(constant: &Constant) -> u64 {
        let mut hasher = rustc_hash::FxHasher::default();
        constant.hash_for_dedup(&mut hasher);
        hasher.finish()
    }

    /// Add a constant, returning its index; identical constants share a slot
    pub fn add(&mut self, constant: Constant) -> u32 {
        let hash = Self::hash_constant(&constant);

        if let Some(indices) = self.dedup_index.get(&hash) {
            for &idx in indices {
                if self.constants[idx as usize] == constant {
                    return idx;
                }
            }
        }

        let idx = self.constants.len() as u32;
        self.constants.push(constant);
        self.dedup_index.entry(hash).or_default().push(idx);
        idx
    }

    /// Add a number constant
    #[inline]
    pub fn add_number(&mut self, n: f64) -> u32 {
        self.add(Constant::number(n))
    }

    /// Add a string constant
    #[inline]
    pub fn add_string(&mut self, s: &str) -> u32 {
        self.add(Constant::string(s))
    }

    /// Rebuild the dedup index after deserialization
    pub fn rebuild_dedup_index(&mut self) {
        self.dedup_index.clear();
        for (idx, constant) in self.constants.iter().enumerate() {
            let hash = Self::hash_constant(constant);
            self.dedup_index.entry(hash).or_default().push(idx as u32);
        }
    }

    /// Get a constant by index
    #[inline]
    pub fn get(&self, index: u32) -> Option<&Constant> {
        self.constants.get(index as usize)
    }

    /// Number of constants in the pool
    #[inline]
    pub fn len(&self) -> usize {
        self.constants.len()
    }

    /// Check if the pool is empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.constants.is_empty()
    }

    /// Iterate over constants
    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = &Constant> {
        self.constants.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dedup() {
        let mut pool = ConstantPool::new();

        let idx1 = pool.add_string("hello");
        let idx2 = pool.add_string("world");
        let idx3 = pool.add_string("hello");

        assert_eq!(idx1, 0);
        assert_eq!(idx2, 1);
        assert_eq!(idx3, 0);
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn test_number_dedup_by_bits() {
        let mut pool = ConstantPool::new();

        let pos = pool.add_number(0.0);
        let neg = pool.add_number(-0.0);
        let again = pool.add_number(0.0);

        // +0 and -0 differ bitwise and must not collapse
        assert_ne!(pos, neg);
        assert_eq!(pos, again);
    }

    #[test]
    fn test_singleton_constants() {
        let mut pool = ConstantPool::new();
        let u1 = pool.add(Constant::Undefined);
        let n = pool.add(Constant::Null);
        let u2 = pool.add(Constant::Undefined);

        assert_eq!(u1, u2);
        assert_ne!(u1, n);
    }

    #[test]
    fn test_get() {
        let mut pool = ConstantPool::new();
        pool.add_string("test");
        pool.add_number(123.0);

        assert_eq!(pool.get(0), Some(&Constant::string("test")));
        assert_eq!(pool.get(1), Some(&Constant::Number(123.0)));
        assert_eq!(pool.get(2), None);
    }
}
