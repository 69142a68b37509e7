//! Cached local tags
//!
//! One atomic tag per frame slot records the narrowest type every store to
//! that slot has produced so far. Quickened local accesses trust the cached
//! tag to read raw bits out of the frame. Tags only ever widen: once a slot
//! has been observed at two different primitive types (or holding a
//! reference), it is pinned at [`LocalTag::Object`] until a structural
//! invalidation rebuilds the table from scratch.

use std::sync::atomic::{AtomicU8, Ordering};

use crate::value::Value;

/// Cached type of a frame slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LocalTag {
    /// Never written (or cleared by block-scope exit)
    Illegal = 0,
    /// Boolean bits
    Bool = 1,
    /// 32-bit integer bits
    Int = 2,
    /// 64-bit integer bits
    Long = 3,
    /// 64-bit float bits
    Double = 4,
    /// Boxed values only
    Object = 5,
}

impl LocalTag {
    fn from_raw(raw: u8) -> Self {
        match raw {
            0 => Self::Illegal,
            1 => Self::Bool,
            2 => Self::Int,
            3 => Self::Long,
            4 => Self::Double,
            _ => Self::Object,
        }
    }

    /// Narrowest tag able to hold `value` unboxed
    pub fn of(value: &Value) -> Self {
        match value {
            Value::Bool(_) => Self::Bool,
            Value::Int(_) => Self::Int,
            Value::Long(_) => Self::Long,
            Value::Double(_) => Self::Double,
            _ => Self::Object,
        }
    }

    /// Least upper bound in the widening lattice
    pub fn join(self, other: Self) -> Self {
        match (self, other) {
            (Self::Illegal, t) | (t, Self::Illegal) => t,
            (a, b) if a == b => a,
            _ => Self::Object,
        }
    }
}

/// Per-slot tag table shared by all activations of one root
#[derive(Debug)]
pub struct LocalTagTable {
    tags: Box<[AtomicU8]>,
}

impl LocalTagTable {
    /// Allocate `slots` tags, all [`LocalTag::Illegal`]
    pub fn new(slots: u16) -> Self {
        Self {
            tags: (0..slots).map(|_| AtomicU8::new(LocalTag::Illegal as u8)).collect(),
        }
    }

    /// Current cached tag for a slot
    #[inline]
    pub fn get(&self, slot: u16) -> LocalTag {
        LocalTag::from_raw(self.tags[slot as usize].load(Ordering::Relaxed))
    }

    /// Fold an observed store type into the cached tag, returning the tag
    /// in force after the merge.
    ///
    /// CAS loop so concurrent widenings from different threads never narrow
    /// the tag.
    pub fn widen(&self, slot: u16, observed: LocalTag) -> LocalTag {
        let cell = &self.tags[slot as usize];
        let mut current = cell.load(Ordering::Relaxed);
        loop {
            let merged = LocalTag::from_raw(current).join(observed);
            if merged as u8 == current {
                return merged;
            }
            match cell.compare_exchange_weak(
                current,
                merged as u8,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return merged,
                Err(actual) => current = actual,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_store_sets_tag() {
        let table = LocalTagTable::new(2);
        assert_eq!(table.get(0), LocalTag::Illegal);
        assert_eq!(table.widen(0, LocalTag::Int), LocalTag::Int);
        assert_eq!(table.get(0), LocalTag::Int);
    }

    #[test]
    fn conflicting_tags_widen_to_object() {
        let table = LocalTagTable::new(1);
        table.widen(0, LocalTag::Int);
        assert_eq!(table.widen(0, LocalTag::Double), LocalTag::Object);
        // never narrows back
        assert_eq!(table.widen(0, LocalTag::Int), LocalTag::Object);
    }

    #[test]
    fn join_is_commutative_and_monotonic() {
        use LocalTag::*;
        for a in [Illegal, Bool, Int, Long, Double, Object] {
            for b in [Illegal, Bool, Int, Long, Double, Object] {
                assert_eq!(a.join(b), b.join(a));
                assert_eq!(a.join(b).join(a), a.join(b));
            }
        }
    }
}
