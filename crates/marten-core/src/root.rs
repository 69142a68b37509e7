//! Executable roots
//!
//! A [`Root`] pairs one immutable [`CodeDescriptor`] with its mutable
//! execution state: the tier machinery, OSR site cache, and interruption
//! flag. Roots are cheap to clone uninitialized (sharing the descriptor,
//! nothing else), and a structural invalidation cascades to every live
//! clone.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use marten_bytecode::{
    CodeDescriptor, HandlerEntry, LocalDescriptor, SourceEntry, validate,
};
use parking_lot::Mutex;

use crate::config::InterpreterConfig;
use crate::continuation::{Continuation, MaterializedFrame, Suspended};
use crate::dispatch::{self, Exit};
use crate::error::{VmError, VmResult};
use crate::frame::Frame;
use crate::local_tags::LocalTag;
use crate::osr::{CompiledLoop, OsrCompiler, OsrSites};
use crate::state;
use crate::tier::{Tier, TierCode, TierManager};
use crate::value::{ObjectRef, Value};

/// Outcome of running a root (or resuming one of its continuations)
#[derive(Debug)]
pub enum Execution {
    /// The activation completed
    Return(Value),
    /// The activation suspended at a `yield`
    Yield {
        /// The yielded value
        value: Value,
        /// Handle to resume the suspended activation
        continuation: Arc<Continuation>,
    },
}

impl Execution {
    /// The returned value, if the activation completed
    pub fn into_return(self) -> Option<Value> {
        match self {
            Self::Return(value) => Some(value),
            Self::Yield { .. } => None,
        }
    }
}

/// One executable bytecode root
pub struct Root {
    descriptor: Arc<CodeDescriptor>,
    config: Arc<InterpreterConfig>,
    tiers: TierManager,
    osr_sites: OsrSites,
    interrupt: AtomicBool,
    clones: Mutex<Vec<Weak<Root>>>,
}

impl Root {
    /// Create a root from a validated descriptor
    pub fn new(descriptor: CodeDescriptor, config: Arc<InterpreterConfig>) -> Arc<Self> {
        let tiers = TierManager::new(&config);
        Arc::new(Self {
            descriptor: Arc::new(descriptor),
            config,
            tiers,
            osr_sites: OsrSites::new(),
            interrupt: AtomicBool::new(false),
            clones: Mutex::new(Vec::new()),
        })
    }

    /// The immutable build artifact behind this root
    pub fn descriptor(&self) -> &CodeDescriptor {
        &self.descriptor
    }

    /// The shared configuration
    pub fn config(&self) -> &InterpreterConfig {
        &self.config
    }

    /// Current execution tier
    pub fn tier(&self) -> Tier {
        self.tiers.tier()
    }

    /// Request cooperative interruption; observed at the next back edge
    pub fn interrupt(&self) {
        self.interrupt.store(true, Ordering::Relaxed);
    }

    /// Clear a pending interruption request
    pub fn clear_interrupt(&self) {
        self.interrupt.store(false, Ordering::Relaxed);
    }

    pub(crate) fn is_interrupted(&self) -> bool {
        self.interrupt.load(Ordering::Relaxed)
    }

    pub(crate) fn note_uncached_back_edge(&self) {
        if self.tiers.tier() == Tier::Uncached {
            // the promotion itself happens on the next activation
            let _ = self.tiers.burn_uncached_budget();
        }
    }

    pub(crate) fn osr_loop(
        &self,
        compiler: &dyn OsrCompiler,
        loop_head: u32,
    ) -> Option<Arc<dyn CompiledLoop>> {
        self.osr_sites
            .get_or_compile(compiler, &self.descriptor, loop_head)
    }

    fn active_code(&self) -> Arc<TierCode> {
        let code = self.tiers.ensure_initialized(&self.descriptor, &self.config);
        if code.tier == Tier::Uncached && self.tiers.burn_uncached_budget() {
            return self.tiers.promote_to_cached(&self.descriptor);
        }
        code
    }

    /// Run the root with `args` bound to the leading local slots
    pub fn call(self: &Arc<Self>, args: &[Value]) -> VmResult<Execution> {
        let code = self.active_code();
        let mut frame = Frame::new(
            self.descriptor.max_locals,
            self.descriptor.max_stack,
            self.descriptor.root_index,
        );
        if args.len() > self.descriptor.max_locals as usize {
            return Err(VmError::internal(format!(
                "{} arguments for {} local slots",
                args.len(),
                self.descriptor.max_locals
            )));
        }
        for (i, arg) in args.iter().enumerate() {
            if let Some(aux) = &code.aux {
                aux.local_tags.widen(i as u16, LocalTag::of(arg));
            }
            frame.set_slot(Frame::local_slot(i as u16), arg.clone());
        }
        let state0 = state::encode(0, frame.stack_base(), false);
        let exit = dispatch::run(self, &code, &mut frame, None, state0)?;
        self.finish(exit, None)
    }

    /// Drive the dispatch loop over a caller-managed frame from `state`.
    ///
    /// Completion pushes the result onto the frame's operand stack and
    /// returns a return-sentinel word; suspension pushes the yielded value
    /// and returns the word to resume from. Locals live in the caller's
    /// frame throughout, so to resume after a yield, pop the yielded
    /// value, push the value the suspension produces, and call again with
    /// the returned word.
    pub fn continue_at(self: &Arc<Self>, frame: &mut Frame, state: u64) -> VmResult<u64> {
        let code = self.active_code();
        match dispatch::run(self, &code, frame, None, state)? {
            Exit::Return(value) => {
                frame.push(value);
                Ok(state::encode_return(state))
            }
            Exit::Yield { value, state, .. } => {
                frame.push(value);
                Ok(state::clear_continuation_frame(state))
            }
        }
    }

    /// Re-run structural validation of the underlying descriptor
    pub fn validate(&self) -> VmResult<()> {
        validate::validate(&self.descriptor)?;
        Ok(())
    }

    /// Innermost source range covering `bci`
    pub fn find_location(&self, bci: u32) -> Option<&SourceEntry> {
        self.descriptor.source_info.find(bci)
    }

    /// Handler entries guarding `bci`, in priority (construction) order
    pub fn find_handlers(&self, bci: u32) -> impl Iterator<Item = &HandlerEntry> {
        self.descriptor.handlers.iter().filter(move |e| e.covers(bci))
    }

    /// Logical locals live at `bci`, with their descriptor indices
    pub fn find_locals(&self, bci: u32) -> impl Iterator<Item = (u16, &LocalDescriptor)> {
        self.descriptor.locals.live_at(bci)
    }

    /// Resume a suspended activation; called through [`Continuation`]
    pub(crate) fn resume(self: &Arc<Self>, suspended: Suspended, send: Value) -> VmResult<Execution> {
        let code = self.active_code();
        let Suspended { mat, state } = suspended;
        let mut frame = Frame::new(
            self.descriptor.max_locals,
            self.descriptor.max_stack,
            self.descriptor.root_index,
        );
        let depth = state::sp(state) - frame.stack_base();
        mat.with_frame(|source| frame.copy_stack_from(source, depth));
        frame.push(send);
        let exit = dispatch::run(self, &code, &mut frame, Some(&mat), state)?;
        self.finish(exit, Some(mat))
    }

    fn finish(
        self: &Arc<Self>,
        exit: Exit,
        existing: Option<Arc<MaterializedFrame>>,
    ) -> VmResult<Execution> {
        match exit {
            Exit::Return(value) => Ok(Execution::Return(value)),
            Exit::Yield {
                value,
                snapshot,
                state,
            } => {
                let mat = match existing {
                    // a re-yield keeps its locals in the original
                    // materialized frame; only the stack region moves
                    Some(mat) => {
                        let depth = state::sp(state) - snapshot.stack_base();
                        mat.with_frame(|f| {
                            f.copy_stack_from(&snapshot, depth);
                            f.set_state_word(state);
                        });
                        mat
                    }
                    None => MaterializedFrame::new(Arc::clone(&self.descriptor), snapshot),
                };
                let continuation = Continuation::suspend(Arc::clone(self), Arc::clone(&mat), state);
                let handle: ObjectRef = Arc::clone(&continuation) as ObjectRef;
                mat.with_frame(|f| f.set_coroutine(Value::Object(handle)));
                Ok(Execution::Yield {
                    value,
                    continuation,
                })
            }
        }
    }

    /// Discard all specialization, profiles and OSR state, rebuilding the
    /// pristine unit; cascades to uninitialized clones of this root
    pub fn invalidate(&self) {
        tracing::debug!(root = self.descriptor.root_index, "structural invalidation");
        self.tiers.invalidate(&self.descriptor, &self.config);
        self.osr_sites.clear();
        let mut clones = self.clones.lock();
        clones.retain(|weak| match weak.upgrade() {
            Some(clone) => {
                clone.invalidate();
                true
            }
            None => false,
        });
    }

    /// New root over the same descriptor with fresh execution state
    pub fn clone_uninitialized(self: &Arc<Self>) -> Arc<Root> {
        let clone = Arc::new(Root {
            descriptor: Arc::clone(&self.descriptor),
            config: Arc::clone(&self.config),
            tiers: TierManager::new(&self.config),
            osr_sites: OsrSites::new(),
            interrupt: AtomicBool::new(false),
            clones: Mutex::new(Vec::new()),
        });
        self.clones.lock().push(Arc::downgrade(&clone));
        clone
    }

    /// Disassembly of the active tier (pristine form if uninitialized)
    pub fn dump(&self) -> String {
        match self.tiers.current() {
            Some(code) => code.unit.dump(),
            None => self.descriptor.make_unit().dump(),
        }
    }
}

impl fmt::Debug for Root {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Root")
            .field("index", &self.descriptor.root_index)
            .field("tier", &self.tier())
            .finish()
    }
}
