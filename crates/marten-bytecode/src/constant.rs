//! Constant pool
//!
//! Append-only array of language-level constants referenced by
//! constant-index immediates. Strings are interned on insertion.

use std::sync::Arc;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

/// A language-level constant
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Constant {
    /// The null reference
    Null,
    /// Boolean constant
    Bool(bool),
    /// 8-bit integer constant
    Byte(i8),
    /// UTF-16 code unit constant
    Char(u16),
    /// 32-bit integer constant
    Int(i32),
    /// 64-bit integer constant
    Long(i64),
    /// 32-bit float constant
    Float(f32),
    /// 64-bit float constant
    Double(f64),
    /// Interned string constant
    Str(Arc<str>),
}

impl PartialEq for Constant {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Byte(a), Self::Byte(b)) => a == b,
            (Self::Char(a), Self::Char(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Long(a), Self::Long(b)) => a == b,
            // bit equality so NaN constants dedupe
            (Self::Float(a), Self::Float(b)) => a.to_bits() == b.to_bits(),
            (Self::Double(a), Self::Double(b)) => a.to_bits() == b.to_bits(),
            (Self::Str(a), Self::Str(b)) => a == b,
            _ => false,
        }
    }
}

impl Constant {
    /// View as a string, if this is a string constant
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    /// View as an int, if this is an int constant
    pub fn as_int(&self) -> Option<i32> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }
}

/// Append-only constant pool
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConstantPool {
    constants: Vec<Constant>,
    #[serde(skip)]
    interned: FxHashMap<Arc<str>, u16>,
}

impl ConstantPool {
    /// Create an empty pool
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of constants
    pub fn len(&self) -> usize {
        self.constants.len()
    }

    /// Whether the pool is empty
    pub fn is_empty(&self) -> bool {
        self.constants.is_empty()
    }

    /// Get a constant by index
    #[inline]
    pub fn get(&self, index: u16) -> Option<&Constant> {
        self.constants.get(index as usize)
    }

    /// Append a constant, returning its index
    pub fn add(&mut self, constant: Constant) -> u16 {
        debug_assert!(self.constants.len() < u16::MAX as usize);
        let idx = self.constants.len() as u16;
        self.constants.push(constant);
        idx
    }

    /// Append an int constant
    pub fn add_int(&mut self, value: i32) -> u16 {
        self.add(Constant::Int(value))
    }

    /// Append a long constant
    pub fn add_long(&mut self, value: i64) -> u16 {
        self.add(Constant::Long(value))
    }

    /// Append a double constant
    pub fn add_double(&mut self, value: f64) -> u16 {
        self.add(Constant::Double(value))
    }

    /// Append a string constant, reusing an existing entry for equal text
    pub fn add_str(&mut self, value: impl AsRef<str>) -> u16 {
        let text: Arc<str> = Arc::from(value.as_ref());
        if let Some(&idx) = self.interned.get(&text) {
            return idx;
        }
        let idx = self.add(Constant::Str(Arc::clone(&text)));
        self.interned.insert(text, idx);
        idx
    }

    /// Iterate over all constants in index order
    pub fn iter(&self) -> impl Iterator<Item = &Constant> {
        self.constants.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_and_get() {
        let mut pool = ConstantPool::new();
        let a = pool.add_int(5);
        let b = pool.add_int(3);
        assert_eq!(pool.get(a), Some(&Constant::Int(5)));
        assert_eq!(pool.get(b), Some(&Constant::Int(3)));
        assert_eq!(pool.get(99), None);
    }

    #[test]
    fn strings_are_interned() {
        let mut pool = ConstantPool::new();
        let a = pool.add_str("x");
        let b = pool.add_str("y");
        let c = pool.add_str("x");
        assert_eq!(a, c);
        assert_ne!(a, b);
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn nan_constants_compare_by_bits() {
        assert_eq!(Constant::Double(f64::NAN), Constant::Double(f64::NAN));
    }
}
