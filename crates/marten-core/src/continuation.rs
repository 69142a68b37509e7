//! Suspended activations
//!
//! A `yield` splits an activation in two: the locals live on in a
//! [`MaterializedFrame`] shared between the continuation and any reflective
//! access, while the preserved operand stack is copied into a fresh frame
//! on every resume. Resumed execution runs with the continuation-frame bit
//! set in its state word, routing all local access through the
//! materialized frame.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use marten_bytecode::CodeDescriptor;
use parking_lot::Mutex;

use crate::config::{IllegalLocalSemantics, InterpreterConfig};
use crate::error::{VmError, VmResult};
use crate::frame::Frame;
use crate::root::{Execution, Root};
use crate::state;
use crate::value::{HostObject, Value};

/// Heap-escaped frame holding the locals of a suspended (or reflectively
/// inspected) activation
pub struct MaterializedFrame {
    descriptor: Arc<CodeDescriptor>,
    inner: Mutex<Frame>,
}

impl MaterializedFrame {
    pub(crate) fn new(descriptor: Arc<CodeDescriptor>, frame: Frame) -> Arc<Self> {
        Arc::new(Self {
            descriptor,
            inner: Mutex::new(frame),
        })
    }

    /// Index of the root whose activation this frame belongs to
    pub fn root_index(&self) -> u16 {
        self.descriptor.root_index
    }

    /// Bci the suspended activation will resume at
    pub fn suspended_bci(&self) -> u32 {
        state::bci(self.inner.lock().state_word())
    }

    pub(crate) fn with_frame<R>(&self, f: impl FnOnce(&mut Frame) -> R) -> R {
        f(&mut self.inner.lock())
    }

    fn resolve_slot(&self, index: u16, block_scoping: bool, bci: u32) -> VmResult<u16> {
        let descriptor = self
            .descriptor
            .locals
            .get(index)
            .ok_or(VmError::LocalOutOfScope { local: index, bci })?;
        if block_scoping && !descriptor.live_at(bci) {
            return Err(VmError::LocalOutOfScope { local: index, bci });
        }
        Ok(Frame::local_slot(descriptor.frame_index))
    }

    /// Read a logical local, honoring live ranges and the configured
    /// illegal-read semantics
    pub fn read_local(&self, index: u16, config: &InterpreterConfig) -> VmResult<Value> {
        let mut frame = self.inner.lock();
        let bci = state::bci(frame.state_word());
        drop(frame);
        let slot = self.resolve_slot(index, config.block_scoping, bci)?;
        let mut frame = self.inner.lock();
        match frame.get_slot(slot) {
            Some(value) => Ok(value),
            None => match &config.illegal_local {
                IllegalLocalSemantics::DefaultValue(v) => {
                    let v = v.clone();
                    frame.set_slot(slot, v.clone());
                    Ok(v)
                }
                IllegalLocalSemantics::Error => Err(VmError::IllegalLocal { local: slot, bci }),
            },
        }
    }

    /// Write a logical local, honoring live ranges
    pub fn write_local(&self, index: u16, value: Value, config: &InterpreterConfig) -> VmResult<()> {
        let bci = state::bci(self.inner.lock().state_word());
        let slot = self.resolve_slot(index, config.block_scoping, bci)?;
        self.inner.lock().set_slot(slot, value);
        Ok(())
    }
}

impl fmt::Debug for MaterializedFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MaterializedFrame")
            .field("root", &self.root_index())
            .finish()
    }
}

impl HostObject for MaterializedFrame {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn type_name(&self) -> &'static str {
        "frame"
    }
}

pub(crate) struct Suspended {
    pub(crate) mat: Arc<MaterializedFrame>,
    pub(crate) state: u64,
}

/// One-shot handle to a suspended activation
pub struct Continuation {
    root: Arc<Root>,
    inner: Mutex<Option<Suspended>>,
}

impl Continuation {
    pub(crate) fn suspend(root: Arc<Root>, mat: Arc<MaterializedFrame>, state: u64) -> Arc<Self> {
        Arc::new(Self {
            root,
            inner: Mutex::new(Some(Suspended { mat, state })),
        })
    }

    /// Whether the continuation can still be resumed
    pub fn is_suspended(&self) -> bool {
        self.inner.lock().is_some()
    }

    /// The materialized frame, for reflective local access while suspended
    pub fn frame(&self) -> Option<Arc<MaterializedFrame>> {
        self.inner.lock().as_ref().map(|s| Arc::clone(&s.mat))
    }

    /// Resume with `send` as the value of the suspending `yield`
    /// expression. Each continuation resumes at most once.
    pub fn resume(&self, send: Value) -> VmResult<Execution> {
        let suspended = self
            .inner
            .lock()
            .take()
            .ok_or_else(|| VmError::internal("continuation resumed twice"))?;
        self.root.resume(suspended, send)
    }
}

impl fmt::Debug for Continuation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Continuation")
            .field("suspended", &self.is_suspended())
            .finish()
    }
}

impl HostObject for Continuation {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn type_name(&self) -> &'static str {
        "continuation"
    }
}
