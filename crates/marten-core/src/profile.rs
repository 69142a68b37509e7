//! Execution profiles
//!
//! Lock-free counters updated from the dispatch loop. All accesses are
//! relaxed; profiles steer heuristics and may be arbitrarily stale without
//! affecting correctness.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

/// Per-site taken/not-taken counters for conditional branches
#[derive(Debug)]
pub struct BranchProfiles {
    // [taken, not_taken] per site
    counts: Box<[[AtomicU32; 2]]>,
}

impl BranchProfiles {
    /// Allocate `sites` zeroed profiles
    pub fn new(sites: u16) -> Self {
        let counts = (0..sites)
            .map(|_| [AtomicU32::new(0), AtomicU32::new(0)])
            .collect();
        Self { counts }
    }

    /// Record one branch outcome.
    ///
    /// Saturates at `u32::MAX`; on saturation the counterpart counter is
    /// halved (floored at 1) so the ratio keeps meaning instead of freezing.
    pub fn record(&self, site: u16, taken: bool) {
        let pair = &self.counts[site as usize];
        let own = &pair[(!taken) as usize];
        let prev = own.load(Ordering::Relaxed);
        if prev == u32::MAX {
            let other = &pair[taken as usize];
            let counterpart = other.load(Ordering::Relaxed);
            other.store((counterpart / 2).max(1), Ordering::Relaxed);
        } else {
            own.store(prev + 1, Ordering::Relaxed);
        }
    }

    /// Observed probability the branch is taken, or `None` before the first
    /// outcome
    pub fn taken_probability(&self, site: u16) -> Option<f64> {
        let pair = &self.counts[site as usize];
        let taken = pair[0].load(Ordering::Relaxed) as f64;
        let not_taken = pair[1].load(Ordering::Relaxed) as f64;
        let total = not_taken + taken;
        if total == 0.0 {
            return None;
        }
        Some(taken / total)
    }
}

/// Per-back-edge trip counters feeding on-stack replacement
#[derive(Debug)]
pub struct LoopCounters {
    counts: Box<[AtomicU32]>,
}

impl LoopCounters {
    /// Allocate `sites` zeroed counters
    pub fn new(sites: u16) -> Self {
        Self {
            counts: (0..sites).map(|_| AtomicU32::new(0)).collect(),
        }
    }

    /// Bump a counter, returning the new count (saturating)
    #[inline]
    pub fn bump(&self, site: u16) -> u32 {
        let c = &self.counts[site as usize];
        let prev = c.load(Ordering::Relaxed);
        if prev == u32::MAX {
            return prev;
        }
        c.store(prev + 1, Ordering::Relaxed);
        prev + 1
    }

    /// Reset a counter after an OSR decision
    pub fn reset(&self, site: u16) {
        self.counts[site as usize].store(0, Ordering::Relaxed);
    }
}

/// One latch per handler table entry, set the first time the entry catches
#[derive(Debug)]
pub struct HandlerHits {
    hits: Box<[AtomicBool]>,
}

impl HandlerHits {
    /// Allocate `entries` unset latches
    pub fn new(entries: usize) -> Self {
        Self {
            hits: (0..entries).map(|_| AtomicBool::new(false)).collect(),
        }
    }

    /// Latch a hit
    #[inline]
    pub fn mark(&self, entry: usize) {
        self.hits[entry].store(true, Ordering::Relaxed);
    }

    /// Whether the entry has ever caught
    pub fn was_hit(&self, entry: usize) -> bool {
        self.hits[entry].load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probability_tracks_outcomes() {
        let p = BranchProfiles::new(1);
        assert_eq!(p.taken_probability(0), None);
        for _ in 0..3 {
            p.record(0, true);
        }
        p.record(0, false);
        assert_eq!(p.taken_probability(0), Some(0.75));
    }

    #[test]
    fn saturation_halves_counterpart() {
        let p = BranchProfiles::new(1);
        p.counts[0][0].store(u32::MAX, Ordering::Relaxed);
        p.counts[0][1].store(100, Ordering::Relaxed);
        p.record(0, true);
        assert_eq!(p.counts[0][0].load(Ordering::Relaxed), u32::MAX);
        assert_eq!(p.counts[0][1].load(Ordering::Relaxed), 50);
        // counterpart never drops to zero
        p.counts[0][1].store(1, Ordering::Relaxed);
        p.record(0, true);
        assert_eq!(p.counts[0][1].load(Ordering::Relaxed), 1);
    }

    #[test]
    fn entry_layout_is_taken_then_not_taken() {
        let p = BranchProfiles::new(1);
        p.record(0, true);
        p.record(0, true);
        p.record(0, false);
        assert_eq!(p.counts[0][0].load(Ordering::Relaxed), 2);
        assert_eq!(p.counts[0][1].load(Ordering::Relaxed), 1);
    }

    #[test]
    fn loop_counter_saturates() {
        let c = LoopCounters::new(1);
        assert_eq!(c.bump(0), 1);
        c.counts[0].store(u32::MAX, Ordering::Relaxed);
        assert_eq!(c.bump(0), u32::MAX);
    }
}
