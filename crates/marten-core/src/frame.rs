//! Activation frames
//!
//! A frame is three parallel arrays over one slot space: a tag, the raw
//! 64-bit payload for unboxed primitives, and a boxed side slot for
//! everything else. The first [`RESERVED_SLOTS`] slots hold activation
//! metadata (the suspended state word and the coroutine handle), locals
//! follow, and the operand stack occupies the tail. `sp` is an absolute
//! slot index into this space so it fits the 16-bit field of the control
//! state word.

use crate::local_tags::LocalTag;
use crate::value::Value;

/// Slot holding the suspended control state word
pub const BCI_SLOT: u16 = 0;
/// Slot holding the coroutine handle while an activation is suspended
pub const COROUTINE_SLOT: u16 = 1;
/// Number of metadata slots preceding the locals
pub const RESERVED_SLOTS: u16 = 2;

/// One activation's slot space
#[derive(Debug, Clone)]
pub struct Frame {
    tags: Box<[LocalTag]>,
    raw: Box<[u64]>,
    boxed: Box<[Option<Value>]>,
    sp: u16,
    stack_base: u16,
    root_index: u16,
    epilog_fired: bool,
}

impl Frame {
    /// Allocate a frame for a root with the given shape
    pub fn new(max_locals: u16, max_stack: u16, root_index: u16) -> Self {
        let slots = (RESERVED_SLOTS + max_locals + max_stack) as usize;
        let stack_base = RESERVED_SLOTS + max_locals;
        Self {
            tags: vec![LocalTag::Illegal; slots].into_boxed_slice(),
            raw: vec![0; slots].into_boxed_slice(),
            boxed: vec![None; slots].into_boxed_slice(),
            sp: stack_base,
            stack_base,
            root_index,
            epilog_fired: false,
        }
    }

    /// Index of the root this frame belongs to
    #[inline]
    pub fn root_index(&self) -> u16 {
        self.root_index
    }

    /// First operand stack slot
    #[inline]
    pub fn stack_base(&self) -> u16 {
        self.stack_base
    }

    /// Current stack pointer (absolute slot index of the next free slot)
    #[inline]
    pub fn sp(&self) -> u16 {
        self.sp
    }

    /// Restore the stack pointer, clearing any slots being discarded
    pub fn set_sp(&mut self, sp: u16) {
        debug_assert!(sp >= self.stack_base && sp as usize <= self.tags.len());
        for slot in sp..self.sp {
            self.clear_slot(slot);
        }
        self.sp = sp;
    }

    /// Physical slot of logical local `index`
    #[inline]
    pub fn local_slot(index: u16) -> u16 {
        RESERVED_SLOTS + index
    }

    // ==================== Slot access ====================

    /// Tag currently held by a slot
    #[inline]
    pub fn slot_tag(&self, slot: u16) -> LocalTag {
        self.tags[slot as usize]
    }

    /// Read a slot as a boxed value; `None` when the slot is illegal
    pub fn get_slot(&self, slot: u16) -> Option<Value> {
        let i = slot as usize;
        match self.tags[i] {
            LocalTag::Illegal => None,
            LocalTag::Bool => Some(Value::Bool(self.raw[i] != 0)),
            LocalTag::Int => Some(Value::Int(self.raw[i] as u32 as i32)),
            LocalTag::Long => Some(Value::Long(self.raw[i] as i64)),
            LocalTag::Double => Some(Value::Double(f64::from_bits(self.raw[i]))),
            LocalTag::Object => self.boxed[i].clone(),
        }
    }

    /// Write a slot, storing the common primitives unboxed
    pub fn set_slot(&mut self, slot: u16, value: Value) {
        let i = slot as usize;
        self.boxed[i] = None;
        match value {
            Value::Bool(b) => {
                self.tags[i] = LocalTag::Bool;
                self.raw[i] = b as u64;
            }
            Value::Int(v) => {
                self.tags[i] = LocalTag::Int;
                self.raw[i] = v as u32 as u64;
            }
            Value::Long(v) => {
                self.tags[i] = LocalTag::Long;
                self.raw[i] = v as u64;
            }
            Value::Double(v) => {
                self.tags[i] = LocalTag::Double;
                self.raw[i] = v.to_bits();
            }
            other => {
                self.tags[i] = LocalTag::Object;
                self.boxed[i] = Some(other);
            }
        }
    }

    /// Reset a slot to illegal
    pub fn clear_slot(&mut self, slot: u16) {
        let i = slot as usize;
        self.tags[i] = LocalTag::Illegal;
        self.boxed[i] = None;
    }

    /// Read raw int bits, checking the slot tag
    #[inline]
    pub fn get_slot_int(&self, slot: u16) -> Option<i32> {
        let i = slot as usize;
        (self.tags[i] == LocalTag::Int).then(|| self.raw[i] as u32 as i32)
    }

    /// Read raw long bits, checking the slot tag
    #[inline]
    pub fn get_slot_long(&self, slot: u16) -> Option<i64> {
        let i = slot as usize;
        (self.tags[i] == LocalTag::Long).then(|| self.raw[i] as i64)
    }

    /// Read raw double bits, checking the slot tag
    #[inline]
    pub fn get_slot_double(&self, slot: u16) -> Option<f64> {
        let i = slot as usize;
        (self.tags[i] == LocalTag::Double).then(|| f64::from_bits(self.raw[i]))
    }

    /// Read raw bool bits, checking the slot tag
    #[inline]
    pub fn get_slot_bool(&self, slot: u16) -> Option<bool> {
        let i = slot as usize;
        (self.tags[i] == LocalTag::Bool).then(|| self.raw[i] != 0)
    }

    /// Write raw int bits
    #[inline]
    pub fn set_slot_int(&mut self, slot: u16, value: i32) {
        let i = slot as usize;
        self.tags[i] = LocalTag::Int;
        self.raw[i] = value as u32 as u64;
        self.boxed[i] = None;
    }

    /// Write raw long bits
    #[inline]
    pub fn set_slot_long(&mut self, slot: u16, value: i64) {
        let i = slot as usize;
        self.tags[i] = LocalTag::Long;
        self.raw[i] = value as u64;
        self.boxed[i] = None;
    }

    /// Write raw double bits
    #[inline]
    pub fn set_slot_double(&mut self, slot: u16, value: f64) {
        let i = slot as usize;
        self.tags[i] = LocalTag::Double;
        self.raw[i] = value.to_bits();
        self.boxed[i] = None;
    }

    /// Write raw bool bits
    #[inline]
    pub fn set_slot_bool(&mut self, slot: u16, value: bool) {
        let i = slot as usize;
        self.tags[i] = LocalTag::Bool;
        self.raw[i] = value as u64;
        self.boxed[i] = None;
    }

    // ==================== Operand stack ====================

    /// Push a boxed value
    #[inline]
    pub fn push(&mut self, value: Value) {
        let slot = self.sp;
        self.set_slot(slot, value);
        self.sp += 1;
    }

    /// Push an unboxed int
    #[inline]
    pub fn push_int(&mut self, value: i32) {
        let slot = self.sp;
        self.set_slot_int(slot, value);
        self.sp += 1;
    }

    /// Push an unboxed long
    #[inline]
    pub fn push_long(&mut self, value: i64) {
        let slot = self.sp;
        self.set_slot_long(slot, value);
        self.sp += 1;
    }

    /// Push an unboxed double
    #[inline]
    pub fn push_double(&mut self, value: f64) {
        let slot = self.sp;
        self.set_slot_double(slot, value);
        self.sp += 1;
    }

    /// Push an unboxed bool
    #[inline]
    pub fn push_bool(&mut self, value: bool) {
        let slot = self.sp;
        self.set_slot_bool(slot, value);
        self.sp += 1;
    }

    /// Pop the top of stack as a boxed value
    pub fn pop(&mut self) -> Value {
        debug_assert!(self.sp > self.stack_base, "operand stack underflow");
        self.sp -= 1;
        let i = self.sp as usize;
        let value = match self.tags[i] {
            LocalTag::Illegal => Value::Null,
            LocalTag::Bool => Value::Bool(self.raw[i] != 0),
            LocalTag::Int => Value::Int(self.raw[i] as u32 as i32),
            LocalTag::Long => Value::Long(self.raw[i] as i64),
            LocalTag::Double => Value::Double(f64::from_bits(self.raw[i])),
            LocalTag::Object => self.boxed[i].take().unwrap_or(Value::Null),
        };
        self.tags[i] = LocalTag::Illegal;
        value
    }

    /// Clone the top of stack
    pub fn peek(&self) -> Option<Value> {
        if self.sp == self.stack_base {
            return None;
        }
        self.get_slot(self.sp - 1)
    }

    /// Pop two ints `(lhs, rhs)` if both top slots hold unboxed ints;
    /// leaves the stack untouched otherwise
    #[inline]
    pub fn pop2_int(&mut self) -> Option<(i32, i32)> {
        if self.sp < self.stack_base + 2 {
            return None;
        }
        let rhs = self.get_slot_int(self.sp - 1)?;
        let lhs = self.get_slot_int(self.sp - 2)?;
        self.sp -= 2;
        Some((lhs, rhs))
    }

    /// Pop two longs `(lhs, rhs)` if both top slots hold unboxed longs
    #[inline]
    pub fn pop2_long(&mut self) -> Option<(i64, i64)> {
        if self.sp < self.stack_base + 2 {
            return None;
        }
        let rhs = self.get_slot_long(self.sp - 1)?;
        let lhs = self.get_slot_long(self.sp - 2)?;
        self.sp -= 2;
        Some((lhs, rhs))
    }

    /// Pop two doubles `(lhs, rhs)` if both top slots hold unboxed doubles
    #[inline]
    pub fn pop2_double(&mut self) -> Option<(f64, f64)> {
        if self.sp < self.stack_base + 2 {
            return None;
        }
        let rhs = self.get_slot_double(self.sp - 1)?;
        let lhs = self.get_slot_double(self.sp - 2)?;
        self.sp -= 2;
        Some((lhs, rhs))
    }

    /// Pop an unboxed bool if the top slot holds one
    #[inline]
    pub fn pop_bool(&mut self) -> Option<bool> {
        if self.sp == self.stack_base {
            return None;
        }
        let value = self.get_slot_bool(self.sp - 1)?;
        self.sp -= 1;
        Some(value)
    }

    /// Latch the per-activation epilog, returning whether it was unfired.
    ///
    /// An exceptional epilog runs at most once per activation even when its
    /// own cleanup code rethrows back through the guarded range.
    pub fn fire_epilog(&mut self) -> bool {
        !std::mem::replace(&mut self.epilog_fired, true)
    }

    // ==================== Suspension metadata ====================

    /// Record the bci of a location-sensitive instruction in the reserved
    /// slot. Writes only the bci bits of the slot, so a tracked bci and a
    /// suspended state word agree on layout.
    pub fn set_current_bci(&mut self, bci: u32) {
        let i = BCI_SLOT as usize;
        self.raw[i] = (self.raw[i] & !0xFFFF_FFFF) | bci as u64;
        self.tags[i] = LocalTag::Long;
    }

    /// Most recently recorded bci (zero if never tracked)
    pub fn current_bci(&self) -> u32 {
        self.raw[BCI_SLOT as usize] as u32
    }

    /// Store the control state word of a suspended activation
    pub fn set_state_word(&mut self, state: u64) {
        self.raw[BCI_SLOT as usize] = state;
        self.tags[BCI_SLOT as usize] = LocalTag::Long;
    }

    /// Control state word stored at suspension
    pub fn state_word(&self) -> u64 {
        self.raw[BCI_SLOT as usize]
    }

    /// Attach the coroutine handle of a suspended activation
    pub fn set_coroutine(&mut self, handle: Value) {
        let i = COROUTINE_SLOT as usize;
        self.tags[i] = LocalTag::Object;
        self.boxed[i] = Some(handle);
    }

    /// Copy the operand stack region `[stack_base, stack_base + depth)`
    /// from another frame. Locals are deliberately not copied; a resumed
    /// continuation reads those through its materialized frame.
    pub fn copy_stack_from(&mut self, source: &Frame, depth: u16) {
        debug_assert_eq!(self.stack_base, source.stack_base);
        for offset in 0..depth {
            let slot = (self.stack_base + offset) as usize;
            self.tags[slot] = source.tags[slot];
            self.raw[slot] = source.raw[slot];
            self.boxed[slot] = source.boxed[slot].clone();
        }
        self.sp = self.stack_base + depth;
    }
}
