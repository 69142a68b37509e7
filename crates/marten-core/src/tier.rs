//! Execution tiers
//!
//! A root moves through three tiers. Uninitialized roots carry no
//! executable state at all. The uncached tier interprets pristine bytecode
//! with no profiles, so short-lived code never pays for profiling
//! allocation. The cached tier owns a rewritable [`BytecodeUnit`] plus the
//! auxiliary profile arrays. The active tier is published behind a lock and
//! swapped atomically; activations sample it once on entry and keep
//! executing their sampled tier even if a newer one is published meanwhile.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};

use marten_bytecode::{BytecodeUnit, CodeDescriptor};
use parking_lot::RwLock;

use crate::config::InterpreterConfig;
use crate::local_tags::LocalTagTable;
use crate::profile::{BranchProfiles, HandlerHits, LoopCounters};

/// Execution tier of a root
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Tier {
    /// No executable state yet
    Uninitialized = 0,
    /// Profile-free interpretation of pristine bytecode
    Uncached = 1,
    /// Quickening interpretation with full profiles
    Cached = 2,
}

/// Profiling state owned by a cached tier
#[derive(Debug)]
pub struct CachedAux {
    /// Cached type per frame slot
    pub local_tags: LocalTagTable,
    /// Taken/not-taken counters per conditional branch site
    pub branch_profiles: BranchProfiles,
    /// Trip counters per loop back-edge
    pub loop_counters: LoopCounters,
    /// Hit latches per handler table entry
    pub handler_hits: HandlerHits,
}

impl CachedAux {
    fn for_descriptor(descriptor: &CodeDescriptor) -> Self {
        Self {
            local_tags: LocalTagTable::new(descriptor.max_locals),
            branch_profiles: BranchProfiles::new(descriptor.branch_profile_count),
            loop_counters: LoopCounters::new(descriptor.loop_counter_count),
            handler_hits: HandlerHits::new(descriptor.handlers.len()),
        }
    }
}

/// One published tier: the executable unit plus its profiles
#[derive(Debug)]
pub struct TierCode {
    /// Which tier this is
    pub tier: Tier,
    /// Executable (and, for the cached tier, rewritable) code
    pub unit: Arc<BytecodeUnit>,
    /// Profiles; `None` in the uncached tier
    pub aux: Option<Arc<CachedAux>>,
}

/// Tier state machine for one root
#[derive(Debug)]
pub struct TierManager {
    tier: AtomicU8,
    current: RwLock<Option<Arc<TierCode>>>,
    uncached_budget: AtomicU32,
}

impl TierManager {
    /// Create an uninitialized manager
    pub fn new(config: &InterpreterConfig) -> Self {
        Self {
            tier: AtomicU8::new(Tier::Uninitialized as u8),
            current: RwLock::new(None),
            uncached_budget: AtomicU32::new(config.uncached_threshold),
        }
    }

    /// Current tier, without touching the published code
    pub fn tier(&self) -> Tier {
        match self.tier.load(Ordering::Acquire) {
            0 => Tier::Uninitialized,
            1 => Tier::Uncached,
            _ => Tier::Cached,
        }
    }

    /// The published tier code, if any
    pub fn current(&self) -> Option<Arc<TierCode>> {
        self.current.read().clone()
    }

    /// Publish the first tier on demand. Exactly one caller builds; racing
    /// callers block briefly and return the winner's code.
    pub fn ensure_initialized(
        &self,
        descriptor: &CodeDescriptor,
        config: &InterpreterConfig,
    ) -> Arc<TierCode> {
        if let Some(code) = self.current.read().clone() {
            return code;
        }
        let mut guard = self.current.write();
        if let Some(code) = guard.as_ref() {
            return Arc::clone(code);
        }
        let tier = if config.enable_uncached && config.uncached_threshold > 0 {
            Tier::Uncached
        } else {
            Tier::Cached
        };
        let code = Arc::new(Self::build(descriptor, tier));
        tracing::debug!(root = descriptor.root_index, ?tier, "tier initialized");
        *guard = Some(Arc::clone(&code));
        self.tier.store(tier as u8, Ordering::Release);
        code
    }

    /// Burn one unit of uncached budget; returns true when exhausted
    pub fn burn_uncached_budget(&self) -> bool {
        let prev = self.uncached_budget.load(Ordering::Relaxed);
        if prev == 0 {
            return true;
        }
        self.uncached_budget.store(prev - 1, Ordering::Relaxed);
        prev == 1
    }

    /// Promote to the cached tier. The pristine uncached unit is reused;
    /// it was never rewritten, so no rebuild is needed.
    pub fn promote_to_cached(&self, descriptor: &CodeDescriptor) -> Arc<TierCode> {
        let mut guard = self.current.write();
        if let Some(code) = guard.as_ref()
            && code.tier == Tier::Cached
        {
            return Arc::clone(code);
        }
        let unit = match guard.as_ref() {
            Some(code) => Arc::clone(&code.unit),
            None => Arc::new(descriptor.make_unit()),
        };
        let code = Arc::new(TierCode {
            tier: Tier::Cached,
            unit,
            aux: Some(Arc::new(CachedAux::for_descriptor(descriptor))),
        });
        tracing::debug!(root = descriptor.root_index, "promoted to cached tier");
        *guard = Some(Arc::clone(&code));
        self.tier.store(Tier::Cached as u8, Ordering::Release);
        code
    }

    /// Discard all accumulated specialization and profiles, rebuilding a
    /// pristine unit from the descriptor. In-flight activations keep their
    /// sampled tier; new activations see the fresh one.
    pub fn invalidate(&self, descriptor: &CodeDescriptor, config: &InterpreterConfig) {
        let mut guard = self.current.write();
        if guard.is_none() {
            return;
        }
        let tier = if config.enable_uncached && config.uncached_threshold > 0 {
            Tier::Uncached
        } else {
            Tier::Cached
        };
        let aux = (tier == Tier::Cached).then(|| Arc::new(CachedAux::for_descriptor(descriptor)));
        tracing::debug!(root = descriptor.root_index, ?tier, "tier invalidated");
        *guard = Some(Arc::new(TierCode {
            tier,
            unit: Arc::new(descriptor.make_unit()),
            aux,
        }));
        self.uncached_budget
            .store(config.uncached_threshold, Ordering::Relaxed);
        self.tier.store(tier as u8, Ordering::Release);
    }

    fn build(descriptor: &CodeDescriptor, tier: Tier) -> TierCode {
        let aux = (tier == Tier::Cached).then(|| Arc::new(CachedAux::for_descriptor(descriptor)));
        TierCode {
            tier,
            unit: Arc::new(descriptor.make_unit()),
            aux,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use marten_bytecode::BytecodeBuilder;

    fn descriptor() -> CodeDescriptor {
        let mut b = BytecodeBuilder::new(0);
        b.emit_load_null();
        b.emit_return();
        b.build().unwrap()
    }

    #[test]
    fn starts_uncached_then_promotes() {
        let desc = descriptor();
        let config = InterpreterConfig::new().with_uncached_threshold(2);
        let tiers = TierManager::new(&config);
        assert_eq!(tiers.tier(), Tier::Uninitialized);
        let code = tiers.ensure_initialized(&desc, &config);
        assert_eq!(code.tier, Tier::Uncached);
        assert!(code.aux.is_none());
        assert!(!tiers.burn_uncached_budget());
        assert!(tiers.burn_uncached_budget());
        let cached = tiers.promote_to_cached(&desc);
        assert_eq!(cached.tier, Tier::Cached);
        assert!(cached.aux.is_some());
        // promotion reuses the pristine unit
        assert!(Arc::ptr_eq(&code.unit, &cached.unit));
    }

    #[test]
    fn uncached_disabled_starts_cached() {
        let desc = descriptor();
        let config = InterpreterConfig::new().without_uncached();
        let tiers = TierManager::new(&config);
        let code = tiers.ensure_initialized(&desc, &config);
        assert_eq!(code.tier, Tier::Cached);
    }

    #[test]
    fn invalidation_rebuilds_fresh_unit() {
        let desc = descriptor();
        let config = InterpreterConfig::new().without_uncached();
        let tiers = TierManager::new(&config);
        let before = tiers.ensure_initialized(&desc, &config);
        tiers.invalidate(&desc, &config);
        let after = tiers.current().unwrap();
        assert_eq!(after.tier, Tier::Cached);
        assert!(!Arc::ptr_eq(&before.unit, &after.unit));
    }
}
