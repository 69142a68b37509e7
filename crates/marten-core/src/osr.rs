//! On-stack replacement
//!
//! When a back-edge counter crosses the configured threshold, the root asks
//! the embedder's [`OsrCompiler`] for a [`CompiledLoop`]. Compiled loops
//! run against a private copy of the frame; only a successful run replaces
//! the interpreter frame, so a loop that bails out mid-iteration leaves
//! interpreter state untouched.

use std::fmt;
use std::sync::Arc;

use marten_bytecode::CodeDescriptor;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::error::VmResult;
use crate::frame::Frame;

/// Compiled replacement for a bytecode loop
pub trait CompiledLoop: fmt::Debug + Send + Sync {
    /// Run from the given control state word.
    ///
    /// Returns the state word to continue interpreting at; a return state
    /// means the whole activation completed and the return value sits on
    /// top of the frame's operand stack.
    fn execute(&self, frame: &mut Frame, state: u64) -> VmResult<u64>;
}

/// Embedder hook producing compiled loops
pub trait OsrCompiler: Send + Sync {
    /// Compile the loop headed at `loop_head`, or decline
    fn compile(&self, descriptor: &CodeDescriptor, loop_head: u32) -> Option<Arc<dyn CompiledLoop>>;
}

enum SiteState {
    Failed,
    Compiled(Arc<dyn CompiledLoop>),
}

/// Per-root cache of compilation outcomes, keyed by loop head bci
#[derive(Default)]
pub(crate) struct OsrSites {
    sites: Mutex<FxHashMap<u32, SiteState>>,
}

impl OsrSites {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Look up or attempt compilation for the loop at `loop_head`.
    ///
    /// A declined compilation is remembered so the compiler is asked at
    /// most once per site between invalidations.
    pub(crate) fn get_or_compile(
        &self,
        compiler: &dyn OsrCompiler,
        descriptor: &CodeDescriptor,
        loop_head: u32,
    ) -> Option<Arc<dyn CompiledLoop>> {
        let mut sites = self.sites.lock();
        match sites.get(&loop_head) {
            Some(SiteState::Compiled(compiled)) => return Some(Arc::clone(compiled)),
            Some(SiteState::Failed) => return None,
            None => {}
        }
        match compiler.compile(descriptor, loop_head) {
            Some(compiled) => {
                tracing::debug!(loop_head, "loop compiled for on-stack replacement");
                sites.insert(loop_head, SiteState::Compiled(Arc::clone(&compiled)));
                Some(compiled)
            }
            None => {
                sites.insert(loop_head, SiteState::Failed);
                None
            }
        }
    }

    /// Forget all outcomes (structural invalidation)
    pub(crate) fn clear(&self) {
        self.sites.lock().clear();
    }
}

impl fmt::Debug for OsrSites {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OsrSites")
            .field("sites", &self.sites.lock().len())
            .finish()
    }
}

/// Run a compiled loop against a private frame copy; commit only on success
pub(crate) fn run(
    compiled: &dyn CompiledLoop,
    frame: &mut Frame,
    state: u64,
) -> VmResult<u64> {
    let mut private = frame.clone();
    let next = compiled.execute(&mut private, state)?;
    *frame = private;
    Ok(next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    use marten_bytecode::BytecodeBuilder;

    #[derive(Default)]
    struct CountingCompiler {
        asked: AtomicU32,
    }

    impl OsrCompiler for CountingCompiler {
        fn compile(&self, _: &CodeDescriptor, _: u32) -> Option<Arc<dyn CompiledLoop>> {
            self.asked.fetch_add(1, Ordering::Relaxed);
            None
        }
    }

    #[test]
    fn declined_compilation_is_cached() {
        let mut b = BytecodeBuilder::new(0);
        b.emit_load_null();
        b.emit_return();
        let descriptor = b.build().unwrap();
        let compiler = CountingCompiler::default();
        let sites = OsrSites::new();
        assert!(sites.get_or_compile(&compiler, &descriptor, 0).is_none());
        assert!(sites.get_or_compile(&compiler, &descriptor, 0).is_none());
        assert_eq!(compiler.asked.load(Ordering::Relaxed), 1);
        sites.clear();
        assert!(sites.get_or_compile(&compiler, &descriptor, 0).is_none());
        assert_eq!(compiler.asked.load(Ordering::Relaxed), 2);
    }
}
