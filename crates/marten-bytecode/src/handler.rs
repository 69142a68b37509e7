//! Exception handler table
//!
//! Flat, producer-ordered list of guarded ranges. Resolution scans from the
//! front and takes the first entry whose range covers the throwing bci, so
//! producers encode priority (innermost-first) purely by emission order.

use serde::{Deserialize, Serialize};

/// What a handler entry responds to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum HandlerKind {
    /// Language-level catch: receives the thrown value on the stack
    Custom = 0,
    /// Epilog handler: runs cleanup on any exceptional exit, then rethrows
    EpilogExceptional = 1,
    /// Instrumentation probe notification on exceptional unwind
    TagExceptional = 2,
}

/// One guarded range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandlerEntry {
    /// First guarded bci (inclusive)
    pub start: u32,
    /// End of the guarded range (exclusive)
    pub end: u32,
    /// Handler discipline
    pub kind: HandlerKind,
    /// Where execution resumes when this entry matches
    pub handler_bci: u32,
    /// Stack pointer to unwind to before entering the handler
    pub handler_sp: u16,
    /// Probe site index for [`HandlerKind::TagExceptional`], else 0
    pub tag_node: u16,
}

impl HandlerEntry {
    /// Whether the guarded range covers `bci`
    #[inline]
    pub fn covers(&self, bci: u32) -> bool {
        self.start <= bci && bci < self.end
    }
}

/// Producer-ordered handler table
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HandlerTable {
    entries: Vec<HandlerEntry>,
}

impl HandlerTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table has no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Append an entry, returning its index
    pub fn push(&mut self, entry: HandlerEntry) -> usize {
        let idx = self.entries.len();
        self.entries.push(entry);
        idx
    }

    /// Get an entry by index
    pub fn get(&self, index: usize) -> Option<&HandlerEntry> {
        self.entries.get(index)
    }

    /// Entries in table order
    pub fn iter(&self) -> impl Iterator<Item = &HandlerEntry> {
        self.entries.iter()
    }

    /// First entry at or after `from` whose range covers `bci`.
    ///
    /// Returns the table index alongside the entry so a resolver can resume
    /// the scan past a handler it decided to skip.
    pub fn find_from(&self, bci: u32, from: usize) -> Option<(usize, &HandlerEntry)> {
        self.entries
            .iter()
            .enumerate()
            .skip(from)
            .find(|(_, e)| e.covers(bci))
    }
}
