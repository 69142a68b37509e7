//! Local variable descriptor table
//!
//! Describes each logical local: the frame slot it occupies, the bci range
//! over which it is live (for block-scoped languages), and optional name
//! and info constants for diagnostics. Several logical locals may share one
//! frame slot when their live ranges do not overlap.

use serde::{Deserialize, Serialize};

/// One logical local variable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalDescriptor {
    /// First bci at which the local is live (inclusive)
    pub start_bci: u32,
    /// End of the live range (exclusive); `u32::MAX` means live to the end
    pub end_bci: u32,
    /// Frame slot backing this local
    pub frame_index: u16,
    /// Logical index of this descriptor in its table
    pub local_index: u16,
    /// Constant pool index of the local's name, if recorded
    pub name_constant: Option<u16>,
    /// Constant pool index of language-defined extra info, if recorded
    pub info_constant: Option<u16>,
}

impl LocalDescriptor {
    /// Whether the local is live at `bci`
    #[inline]
    pub fn live_at(&self, bci: u32) -> bool {
        self.start_bci <= bci && bci < self.end_bci
    }
}

/// Table of logical locals in declaration order
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LocalDescriptorTable {
    locals: Vec<LocalDescriptor>,
}

impl LocalDescriptorTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of logical locals
    pub fn len(&self) -> usize {
        self.locals.len()
    }

    /// Whether the table is empty
    pub fn is_empty(&self) -> bool {
        self.locals.is_empty()
    }

    /// Append a descriptor, returning its logical index
    pub fn push(&mut self, descriptor: LocalDescriptor) -> u16 {
        debug_assert!(self.locals.len() < u16::MAX as usize);
        let idx = self.locals.len() as u16;
        self.locals.push(descriptor);
        idx
    }

    /// Get a descriptor by logical index
    #[inline]
    pub fn get(&self, index: u16) -> Option<&LocalDescriptor> {
        self.locals.get(index as usize)
    }

    /// Descriptors in declaration order
    pub fn iter(&self) -> impl Iterator<Item = &LocalDescriptor> {
        self.locals.iter()
    }

    /// Logical locals live at `bci`, with their indices
    pub fn live_at(&self, bci: u32) -> impl Iterator<Item = (u16, &LocalDescriptor)> {
        self.locals
            .iter()
            .enumerate()
            .filter(move |(_, d)| d.live_at(bci))
            .map(|(i, d)| (i as u16, d))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn liveness_and_slot_sharing() {
        let mut table = LocalDescriptorTable::new();
        table.push(LocalDescriptor {
            start_bci: 0,
            end_bci: 10,
            frame_index: 0,
            local_index: 0,
            name_constant: None,
            info_constant: None,
        });
        // disjoint live range reuses slot 0
        table.push(LocalDescriptor {
            start_bci: 10,
            end_bci: u32::MAX,
            frame_index: 0,
            local_index: 1,
            name_constant: None,
            info_constant: None,
        });
        let at_5: Vec<u16> = table.live_at(5).map(|(i, _)| i).collect();
        assert_eq!(at_5, vec![0]);
        let at_12: Vec<u16> = table.live_at(12).map(|(i, _)| i).collect();
        assert_eq!(at_12, vec![1]);
    }
}
