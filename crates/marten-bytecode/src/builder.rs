//! Bytecode construction
//!
//! [`BytecodeBuilder`] assembles the immutable template for one root: the
//! code words, constant pool, handler table, local descriptors, source
//! ranges and the profiling site counts. The result, a [`CodeDescriptor`],
//! is validated on `build` and never mutated afterwards; execution tiers
//! materialize fresh [`BytecodeUnit`]s from it.

use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};

use crate::constant::{Constant, ConstantPool};
use crate::error::{BytecodeError, Result};
use crate::handler::{HandlerEntry, HandlerKind, HandlerTable};
use crate::local_table::{LocalDescriptor, LocalDescriptorTable};
use crate::opcode::Opcode;
use crate::source_info::{SourceEntry, SourceInfoTable};
use crate::unit::BytecodeUnit;
use crate::validate;

/// Immutable build artifact for one bytecode root
///
/// Holds everything needed to rebuild the executable form from scratch,
/// which is how structural invalidation discards accumulated profiling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeDescriptor {
    /// Pristine code words (all opcodes in generic form)
    pub words: Vec<u16>,
    /// Constant pool
    pub constants: ConstantPool,
    /// Exception handler table
    pub handlers: HandlerTable,
    /// Source range annotations
    pub source_info: SourceInfoTable,
    /// Logical local descriptors
    pub locals: LocalDescriptorTable,
    /// Number of frame slots for locals
    pub max_locals: u16,
    /// Maximum operand stack depth
    pub max_stack: u16,
    /// Number of branch profile sites
    pub branch_profile_count: u16,
    /// Number of loop counter sites
    pub loop_counter_count: u16,
    /// Number of instrumentation probe sites
    pub tag_node_count: u16,
    /// Sites that skip intermediate specializations and deopt straight to
    /// the boxed form
    pub pinned_sites: FxHashSet<u32>,
    /// Index identifying this root among its siblings
    pub root_index: u16,
}

impl CodeDescriptor {
    /// Materialize a fresh executable unit from the pristine words
    pub fn make_unit(&self) -> BytecodeUnit {
        BytecodeUnit::from_words(&self.words)
    }

    /// Length of the code stream in code units
    pub fn code_len(&self) -> u32 {
        self.words.len() as u32
    }
}

/// Unresolved branch target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Label(usize);

#[derive(Debug, Default)]
struct LabelState {
    target: Option<u32>,
    patches: Vec<u32>,
}

/// Builder for a single root's [`CodeDescriptor`]
#[derive(Debug)]
pub struct BytecodeBuilder {
    words: Vec<u16>,
    constants: ConstantPool,
    handlers: HandlerTable,
    source_info: SourceInfoTable,
    locals: Vec<LocalDescriptor>,
    labels: Vec<LabelState>,
    max_locals: u16,
    cur_sp: u16,
    max_stack: u16,
    branch_profiles: u16,
    loop_counters: u16,
    tag_nodes: u16,
    pinned_sites: FxHashSet<u32>,
    root_index: u16,
    last_bci: u32,
    error: Option<BytecodeError>,
}

impl BytecodeBuilder {
    /// Start building the root with the given sibling index
    pub fn new(root_index: u16) -> Self {
        Self {
            words: Vec::new(),
            constants: ConstantPool::new(),
            handlers: HandlerTable::new(),
            source_info: SourceInfoTable::new(),
            locals: Vec::new(),
            labels: Vec::new(),
            max_locals: 0,
            cur_sp: 0,
            max_stack: 0,
            branch_profiles: 0,
            loop_counters: 0,
            tag_nodes: 0,
            pinned_sites: FxHashSet::default(),
            root_index,
            last_bci: 0,
            error: None,
        }
    }

    /// Bci the next instruction will be emitted at
    #[inline]
    pub fn current_bci(&self) -> u32 {
        self.words.len() as u32
    }

    /// Bci of the most recently emitted instruction
    #[inline]
    pub fn last_bci(&self) -> u32 {
        self.last_bci
    }

    /// Operand stack depth after the most recent emission
    #[inline]
    pub fn current_sp(&self) -> u16 {
        self.cur_sp
    }

    /// Reset the tracked stack depth at a point reached by non-fallthrough
    /// control transfer, such as the entry of an exception handler (which
    /// begins at its recorded handler sp, plus one for the pushed
    /// exception).
    pub fn set_current_sp(&mut self, sp: u16) {
        self.cur_sp = sp;
        self.max_stack = self.max_stack.max(sp);
    }

    fn fail(&mut self, message: impl Into<String>) {
        if self.error.is_none() {
            self.error = Some(BytecodeError::Builder(message.into()));
        }
    }

    fn effect(&mut self, pops: u16, pushes: u16) {
        if self.cur_sp < pops {
            let bci = self.last_bci;
            self.fail(format!("operand stack underflow at bci {bci}"));
            self.cur_sp = 0;
        } else {
            self.cur_sp -= pops;
        }
        self.cur_sp += pushes;
        self.max_stack = self.max_stack.max(self.cur_sp);
    }

    fn emit(&mut self, op: Opcode, operands: &[u16]) -> u32 {
        let bci = self.current_bci();
        debug_assert_eq!(1 + operands.len() as u32, op.len(), "{op} operand count");
        self.words.push(op.to_raw());
        self.words.extend_from_slice(operands);
        self.last_bci = bci;
        bci
    }

    fn split_u32(value: u32) -> [u16; 2] {
        [(value & 0xFFFF) as u16, (value >> 16) as u16]
    }

    fn split_u64(value: u64) -> [u16; 4] {
        [
            (value & 0xFFFF) as u16,
            ((value >> 16) & 0xFFFF) as u16,
            ((value >> 32) & 0xFFFF) as u16,
            ((value >> 48) & 0xFFFF) as u16,
        ]
    }

    // ==================== Constants and locals ====================

    /// Add a constant to the pool
    pub fn add_constant(&mut self, constant: Constant) -> u16 {
        self.constants.add(constant)
    }

    /// Add an interned string constant
    pub fn add_str_constant(&mut self, text: impl AsRef<str>) -> u16 {
        self.constants.add_str(text)
    }

    /// Reserve a frame slot for locals, returning its index
    pub fn reserve_local(&mut self) -> u16 {
        let idx = self.max_locals;
        self.max_locals += 1;
        idx
    }

    /// Declare a logical local backed by `frame_index`, live from the
    /// current bci until [`Self::close_local`] (or the end of the unit).
    /// `name_constant` and `info_constant` are optional constant-pool
    /// indices carried for diagnostics.
    pub fn declare_local(
        &mut self,
        frame_index: u16,
        name_constant: Option<u16>,
        info_constant: Option<u16>,
    ) -> u16 {
        let idx = self.locals.len() as u16;
        self.locals.push(LocalDescriptor {
            start_bci: self.current_bci(),
            end_bci: u32::MAX,
            frame_index,
            local_index: idx,
            name_constant,
            info_constant,
        });
        idx
    }

    /// End a logical local's live range at the current bci
    pub fn close_local(&mut self, index: u16) {
        let bci = self.current_bci();
        match self.locals.get_mut(index as usize) {
            Some(d) if d.end_bci == u32::MAX => d.end_bci = bci,
            Some(_) => self.fail(format!("local {index} closed twice")),
            None => self.fail(format!("close of undeclared local {index}")),
        }
    }

    // ==================== Emission ====================

    /// Emit `nop`
    pub fn emit_nop(&mut self) -> u32 {
        self.emit(Opcode::Nop, &[])
    }

    /// Emit a null push
    pub fn emit_load_null(&mut self) -> u32 {
        self.effect(0, 1);
        self.emit(Opcode::LoadNull, &[])
    }

    /// Emit an inline boolean push
    pub fn emit_load_bool(&mut self, value: bool) -> u32 {
        self.effect(0, 1);
        self.emit(Opcode::LoadBool, &[value as u16])
    }

    /// Emit an inline byte push
    pub fn emit_load_byte(&mut self, value: i8) -> u32 {
        self.effect(0, 1);
        self.emit(Opcode::LoadByte, &[value as u8 as u16])
    }

    /// Emit an inline char push
    pub fn emit_load_char(&mut self, value: u16) -> u32 {
        self.effect(0, 1);
        self.emit(Opcode::LoadChar, &[value])
    }

    /// Emit an inline short push
    pub fn emit_load_short(&mut self, value: i16) -> u32 {
        self.effect(0, 1);
        self.emit(Opcode::LoadShort, &[value as u16])
    }

    /// Emit an inline int push
    pub fn emit_load_int(&mut self, value: i32) -> u32 {
        self.effect(0, 1);
        let [lo, hi] = Self::split_u32(value as u32);
        self.emit(Opcode::LoadInt, &[lo, hi])
    }

    /// Emit an inline float push
    pub fn emit_load_float(&mut self, value: f32) -> u32 {
        self.effect(0, 1);
        let [lo, hi] = Self::split_u32(value.to_bits());
        self.emit(Opcode::LoadFloat, &[lo, hi])
    }

    /// Emit an inline long push
    pub fn emit_load_long(&mut self, value: i64) -> u32 {
        self.effect(0, 1);
        let units = Self::split_u64(value as u64);
        self.emit(Opcode::LoadLong, &units)
    }

    /// Emit an inline double push
    pub fn emit_load_double(&mut self, value: f64) -> u32 {
        self.effect(0, 1);
        let units = Self::split_u64(value.to_bits());
        self.emit(Opcode::LoadDouble, &units)
    }

    /// Emit a constant-pool push
    pub fn emit_load_const(&mut self, index: u16) -> u32 {
        self.effect(0, 1);
        self.emit(Opcode::LoadConst, &[index])
    }

    /// Emit `pop`
    pub fn emit_pop(&mut self) -> u32 {
        self.effect(1, 0);
        self.emit(Opcode::Pop, &[])
    }

    /// Emit `dup`
    pub fn emit_dup(&mut self) -> u32 {
        self.effect(1, 2);
        self.emit(Opcode::Dup, &[])
    }

    /// Emit a local load
    pub fn emit_load_local(&mut self, frame_index: u16) -> u32 {
        self.effect(0, 1);
        self.emit(Opcode::LoadLocal, &[frame_index])
    }

    /// Emit a local store
    pub fn emit_store_local(&mut self, frame_index: u16) -> u32 {
        self.effect(1, 0);
        self.emit(Opcode::StoreLocal, &[frame_index])
    }

    /// Emit a local clear (block-scope exit)
    pub fn emit_clear_local(&mut self, frame_index: u16) -> u32 {
        self.emit(Opcode::ClearLocal, &[frame_index])
    }

    /// Emit a materialized-frame local load; pops the frame operand
    pub fn emit_load_local_mat(&mut self, root: u16, local_index: u16) -> u32 {
        self.effect(1, 1);
        self.emit(Opcode::LoadLocalMat, &[root, local_index])
    }

    /// Emit a materialized-frame local store; pops the value, then the
    /// frame operand beneath it
    pub fn emit_store_local_mat(&mut self, root: u16, local_index: u16) -> u32 {
        self.effect(2, 0);
        self.emit(Opcode::StoreLocalMat, &[root, local_index])
    }

    /// Emit a binary arithmetic or comparison operation in generic form
    pub fn emit_binary(&mut self, op: Opcode) -> u32 {
        debug_assert_eq!(op.generic(), op, "emit generic forms only");
        debug_assert!(
            matches!(
                op,
                Opcode::Add
                    | Opcode::Sub
                    | Opcode::Mul
                    | Opcode::Div
                    | Opcode::Lt
                    | Opcode::Le
                    | Opcode::Gt
                    | Opcode::Ge
                    | Opcode::Eq
            ),
            "{op} is not a binary operation"
        );
        self.effect(2, 1);
        self.emit(op, &[])
    }

    /// Emit arithmetic negation
    pub fn emit_neg(&mut self) -> u32 {
        self.effect(1, 1);
        self.emit(Opcode::Neg, &[])
    }

    /// Emit boolean negation
    pub fn emit_not(&mut self) -> u32 {
        self.effect(1, 1);
        self.emit(Opcode::Not, &[])
    }

    // ==================== Control flow ====================

    /// Create an unbound label
    pub fn create_label(&mut self) -> Label {
        self.labels.push(LabelState::default());
        Label(self.labels.len() - 1)
    }

    /// Bind a label to the current bci, patching forward references
    pub fn bind_label(&mut self, label: Label) {
        let here = self.current_bci();
        let state = &mut self.labels[label.0];
        if state.target.is_some() {
            self.fail(format!("label bound twice at bci {here}"));
            return;
        }
        state.target = Some(here);
        let patches = std::mem::take(&mut state.patches);
        for at in patches {
            let [lo, hi] = Self::split_u32(here);
            self.words[at as usize] = lo;
            self.words[at as usize + 1] = hi;
        }
    }

    fn branch_target_units(&mut self, label: Label) -> [u16; 2] {
        match self.labels[label.0].target {
            Some(bci) => Self::split_u32(bci),
            None => {
                // placeholder patched in bind_label; +1 skips the opcode unit
                let at = self.current_bci() + 1;
                self.labels[label.0].patches.push(at);
                [0, 0]
            }
        }
    }

    /// Emit an unconditional forward branch
    pub fn emit_branch(&mut self, label: Label) -> u32 {
        let [lo, hi] = self.branch_target_units(label);
        self.emit(Opcode::Branch, &[lo, hi])
    }

    /// Emit a loop back-edge to an already-bound label, allocating its loop
    /// counter site
    pub fn emit_branch_backward(&mut self, label: Label) -> u32 {
        if self.labels[label.0].target.is_none() {
            self.fail("backward branch to unbound label");
        }
        let [lo, hi] = self.branch_target_units(label);
        let counter = self.loop_counters;
        self.loop_counters += 1;
        self.emit(Opcode::BranchBackward, &[lo, hi, counter])
    }

    /// Emit a conditional branch taken when the condition is falsy,
    /// allocating its branch profile site
    pub fn emit_branch_false(&mut self, label: Label) -> u32 {
        self.effect(1, 0);
        let [lo, hi] = self.branch_target_units(label);
        let profile = self.branch_profiles;
        self.branch_profiles += 1;
        self.emit(Opcode::BranchFalse, &[lo, hi, profile])
    }

    /// Emit `return`
    pub fn emit_return(&mut self) -> u32 {
        self.effect(1, 0);
        self.emit(Opcode::Return, &[])
    }

    /// Emit `yield`.
    ///
    /// Records the operand stack depth beneath the yielded value; resumption
    /// restores exactly that region and pushes the sent value in place of
    /// the yielded one.
    pub fn emit_yield(&mut self) -> u32 {
        if self.cur_sp == 0 {
            self.fail("yield with empty operand stack");
            return self.emit(Opcode::Yield, &[0]);
        }
        let preserved = self.cur_sp - 1;
        // net zero: the sent value replaces the yielded one
        self.effect(1, 1);
        self.emit(Opcode::Yield, &[preserved])
    }

    /// Emit `throw`
    pub fn emit_throw(&mut self) -> u32 {
        self.effect(1, 0);
        self.emit(Opcode::Throw, &[])
    }

    /// Emit an instrumentation probe, allocating its site index
    pub fn emit_tag_probe(&mut self) -> u32 {
        let node = self.tag_nodes;
        self.tag_nodes += 1;
        self.emit(Opcode::TagProbe, &[node])
    }

    // ==================== Metadata ====================

    /// Mark the most recently emitted site as single-specialization: its
    /// first deopt rewrites straight to the boxed form.
    pub fn pin_last(&mut self) {
        self.pinned_sites.insert(self.last_bci);
    }

    /// Record an exception handler over `[start, end)`
    pub fn add_handler(
        &mut self,
        start: u32,
        end: u32,
        kind: HandlerKind,
        handler_bci: u32,
        handler_sp: u16,
    ) -> usize {
        self.handlers.push(HandlerEntry {
            start,
            end,
            kind,
            handler_bci,
            handler_sp,
            tag_node: 0,
        })
    }

    /// Record a probe-notification handler over `[start, end)`
    pub fn add_tag_handler(
        &mut self,
        start: u32,
        end: u32,
        tag_node: u16,
        handler_bci: u32,
        handler_sp: u16,
    ) -> usize {
        self.handlers.push(HandlerEntry {
            start,
            end,
            kind: HandlerKind::TagExceptional,
            handler_bci,
            handler_sp,
            tag_node,
        })
    }

    /// Annotate `[start_bci, end_bci)` with a range of source `source_index`
    pub fn add_source_range(
        &mut self,
        start_bci: u32,
        end_bci: u32,
        source_index: u16,
        source_start: u32,
        source_length: u32,
    ) {
        self.source_info.push(SourceEntry {
            start_bci,
            end_bci,
            source_index,
            source_start,
            source_length,
        });
    }

    /// Finish and validate the descriptor
    pub fn build(mut self) -> Result<CodeDescriptor> {
        if let Some(err) = self.error.take() {
            return Err(err);
        }
        for (i, state) in self.labels.iter().enumerate() {
            if state.target.is_none() && !state.patches.is_empty() {
                return Err(BytecodeError::Builder(format!("label {i} never bound")));
            }
        }
        let mut locals = LocalDescriptorTable::new();
        for d in self.locals {
            locals.push(d);
        }
        let descriptor = CodeDescriptor {
            words: self.words,
            constants: self.constants,
            handlers: self.handlers,
            source_info: self.source_info,
            locals,
            max_locals: self.max_locals,
            max_stack: self.max_stack,
            branch_profile_count: self.branch_profiles,
            loop_counter_count: self.loop_counters,
            tag_node_count: self.tag_nodes,
            pinned_sites: self.pinned_sites,
            root_index: self.root_index,
        };
        validate::validate(&descriptor)?;
        Ok(descriptor)
    }
}
