//! Source location table
//!
//! Maps bci ranges back to source offsets for diagnostics and stack traces.
//! Entries are sorted by range start; lookup takes the innermost (latest
//! emitted among covering) entry, matching the nesting order producers emit.

use serde::{Deserialize, Serialize};

/// One source range annotation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceEntry {
    /// First annotated bci (inclusive)
    pub start_bci: u32,
    /// End of the annotated range (exclusive)
    pub end_bci: u32,
    /// Which source the offsets refer to, for multi-source roots
    pub source_index: u16,
    /// Byte offset of the source range
    pub source_start: u32,
    /// Length of the source range in bytes
    pub source_length: u32,
}

/// Bci-to-source mapping
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceInfoTable {
    entries: Vec<SourceEntry>,
}

impl SourceInfoTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the table has no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Append an entry
    pub fn push(&mut self, entry: SourceEntry) {
        self.entries.push(entry);
    }

    /// Innermost source range covering `bci`.
    ///
    /// Among covering entries the narrowest wins; ties go to the latest
    /// emitted.
    pub fn find(&self, bci: u32) -> Option<&SourceEntry> {
        self.entries
            .iter()
            .filter(|e| e.start_bci <= bci && bci < e.end_bci)
            .min_by_key(|e| e.end_bci - e.start_bci)
    }

    /// Entries in emission order
    pub fn iter(&self) -> impl Iterator<Item = &SourceEntry> {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn innermost_range_wins() {
        let mut table = SourceInfoTable::new();
        table.push(SourceEntry {
            start_bci: 0,
            end_bci: 20,
            source_index: 0,
            source_start: 0,
            source_length: 100,
        });
        table.push(SourceEntry {
            start_bci: 4,
            end_bci: 10,
            source_index: 0,
            source_start: 30,
            source_length: 12,
        });
        assert_eq!(table.find(5).unwrap().source_start, 30);
        assert_eq!(table.find(15).unwrap().source_start, 0);
        assert!(table.find(25).is_none());
    }
}
