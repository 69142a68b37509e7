//! The dispatch loop
//!
//! One flat loop over the sampled tier's code unit. Quickened opcodes take
//! raw-bits fast paths and, when an operand falls outside the specialized
//! domain, rewrite themselves to the terminal boxed sibling and execute the
//! generic path directly in the same step, so a deopt never replays an
//! instruction. Exception resolution scans the handler table from the
//! front; producers encode priority by emission order.

use std::sync::Arc;

use marten_bytecode::{
    BytecodeUnit, CodeDescriptor, Constant, HandlerEntry, HandlerKind, Opcode,
};

use crate::config::{IllegalLocalSemantics, InterpreterConfig};
use crate::continuation::MaterializedFrame;
use crate::error::{ThrownValue, VmError, VmResult};
use crate::exception::ProbeResolution;
use crate::frame::Frame;
use crate::local_tags::LocalTag;
use crate::osr;
use crate::quicken;
use crate::root::Root;
use crate::state;
use crate::tier::{CachedAux, TierCode};
use crate::value::{OpError, Value};

/// How an activation left the dispatch loop
pub(crate) enum Exit {
    /// Normal completion
    Return(Value),
    /// Suspension; `snapshot` carries the frame as of the yield and
    /// `state` the resumption state word
    Yield {
        /// Yielded value
        value: Value,
        /// Frame clone taken at the yield point
        snapshot: Frame,
        /// Resumption state word (continuation bit set)
        state: u64,
    },
}

enum Control {
    Next,
    Jump(u32),
    Return(Value),
    Yield { value: Value, preserved: u16 },
}

enum Resolved {
    Continue(u32),
    Complete(Value),
}

struct Machine<'a> {
    root: &'a Root,
    config: &'a InterpreterConfig,
    descriptor: &'a CodeDescriptor,
    unit: &'a BytecodeUnit,
    aux: Option<&'a CachedAux>,
    frame: &'a mut Frame,
    mat: Option<&'a MaterializedFrame>,
    cont_frame: bool,
}

/// Interpret `frame` starting from `state0` on the given tier
pub(crate) fn run(
    root: &Root,
    code: &TierCode,
    frame: &mut Frame,
    mat: Option<&MaterializedFrame>,
    state0: u64,
) -> VmResult<Exit> {
    let mut machine = Machine {
        root,
        config: root.config(),
        descriptor: root.descriptor(),
        unit: &code.unit,
        aux: code.aux.as_deref(),
        frame,
        mat,
        cont_frame: state::uses_continuation_frame(state0),
    };
    let mut bci = state::bci(state0);
    loop {
        let op = machine
            .unit
            .opcode_at(bci)
            .ok_or_else(|| VmError::internal(format!("undecodable opcode at bci {bci}")))?;
        match machine.step(bci, op) {
            Ok(Control::Next) => bci += op.len(),
            Ok(Control::Jump(target)) => bci = target,
            Ok(Control::Return(value)) => return Ok(Exit::Return(value)),
            Ok(Control::Yield { value, preserved }) => {
                let sp = machine.frame.stack_base() + preserved;
                debug_assert_eq!(machine.frame.sp(), sp);
                let state = state::encode(bci + op.len(), sp, true);
                machine.frame.set_state_word(state);
                let snapshot = machine.frame.clone();
                return Ok(Exit::Yield {
                    value,
                    snapshot,
                    state,
                });
            }
            Err(err) => match machine.resolve(bci, err)? {
                Resolved::Continue(target) => bci = target,
                Resolved::Complete(value) => return Ok(Exit::Return(value)),
            },
        }
    }
}

impl<'a> Machine<'a> {
    #[inline]
    fn quickening(&self) -> bool {
        self.aux.is_some() && self.config.enable_quickening
    }

    #[inline]
    fn pinned(&self, bci: u32) -> bool {
        self.descriptor.pinned_sites.contains(&bci)
    }

    fn guest(&self, err: OpError, bci: u32) -> VmError {
        VmError::thrown(Value::Str(Arc::from(err.message())), bci)
    }

    /// Route a local access to the executing frame or, after a resume, to
    /// the materialized continuation frame.
    fn with_locals<R>(&mut self, f: impl FnOnce(&mut Frame) -> R) -> VmResult<R> {
        if self.cont_frame {
            let mat = self
                .mat
                .ok_or_else(|| VmError::internal("continuation bit set without a frame"))?;
            Ok(mat.with_frame(f))
        } else {
            Ok(f(self.frame))
        }
    }

    fn local_value(&mut self, index: u16, bci: u32) -> VmResult<Value> {
        let slot = Frame::local_slot(index);
        match self.with_locals(|f| f.get_slot(slot))? {
            Some(value) => Ok(value),
            None => match &self.config.illegal_local {
                IllegalLocalSemantics::DefaultValue(v) => Ok(v.clone()),
                IllegalLocalSemantics::Error => Err(VmError::IllegalLocal { local: index, bci }),
            },
        }
    }

    fn step(&mut self, bci: u32, op: Opcode) -> VmResult<Control> {
        match op {
            Opcode::Nop => Ok(Control::Next),

            // ==================== Literals ====================
            Opcode::LoadNull => {
                self.frame.push(Value::Null);
                Ok(Control::Next)
            }
            Opcode::LoadBool => {
                self.frame.push_bool(self.unit.read_u16(bci + 1) != 0);
                Ok(Control::Next)
            }
            Opcode::LoadByte => {
                self.frame.push(Value::Byte(self.unit.read_u16(bci + 1) as u8 as i8));
                Ok(Control::Next)
            }
            Opcode::LoadChar => {
                self.frame.push(Value::Char(self.unit.read_u16(bci + 1)));
                Ok(Control::Next)
            }
            Opcode::LoadShort => {
                self.frame.push_int(self.unit.read_u16(bci + 1) as i16 as i32);
                Ok(Control::Next)
            }
            Opcode::LoadInt => {
                self.frame.push_int(self.unit.read_i32(bci + 1));
                Ok(Control::Next)
            }
            Opcode::LoadFloat => {
                self.frame.push(Value::Float(self.unit.read_f32(bci + 1)));
                Ok(Control::Next)
            }
            Opcode::LoadLong => {
                self.frame.push_long(self.unit.read_i64(bci + 1));
                Ok(Control::Next)
            }
            Opcode::LoadDouble => {
                self.frame.push_double(self.unit.read_f64(bci + 1));
                Ok(Control::Next)
            }
            Opcode::LoadConst => {
                let index = self.unit.read_u16(bci + 1);
                let constant = self
                    .descriptor
                    .constants
                    .get(index)
                    .ok_or_else(|| VmError::internal(format!("constant {index} missing")))?;
                self.frame.push(constant_value(constant));
                Ok(Control::Next)
            }

            // ==================== Stack ====================
            Opcode::Pop => {
                self.frame.pop();
                Ok(Control::Next)
            }
            Opcode::Dup => {
                let top = self
                    .frame
                    .peek()
                    .ok_or_else(|| VmError::internal("dup on empty stack"))?;
                self.frame.push(top);
                Ok(Control::Next)
            }

            // ==================== Locals ====================
            Opcode::LoadLocal | Opcode::LoadLocalBoxed => {
                let index = self.unit.read_u16(bci + 1);
                let value = self.local_value(index, bci)?;
                if op == Opcode::LoadLocal
                    && self.quickening()
                    && let Some(aux) = self.aux
                {
                    let tag = aux.local_tags.get(index);
                    if tag != LocalTag::Illegal {
                        quicken::quicken_to(self.unit, bci, quicken::load_for_tag(tag), false);
                    }
                }
                self.frame.push(value);
                Ok(Control::Next)
            }
            Opcode::LoadLocalBool => self.load_local_primitive(bci, |f, s| {
                f.get_slot_bool(s).map(Value::Bool)
            }),
            Opcode::LoadLocalInt => self.load_local_primitive(bci, |f, s| {
                f.get_slot_int(s).map(Value::Int)
            }),
            Opcode::LoadLocalLong => self.load_local_primitive(bci, |f, s| {
                f.get_slot_long(s).map(Value::Long)
            }),
            Opcode::LoadLocalDouble => self.load_local_primitive(bci, |f, s| {
                f.get_slot_double(s).map(Value::Double)
            }),

            Opcode::StoreLocal | Opcode::StoreLocalBoxed => {
                let index = self.unit.read_u16(bci + 1);
                let value = self.frame.pop();
                if op == Opcode::StoreLocal
                    && self.quickening()
                    && let Some(aux) = self.aux
                {
                    let merged = aux.local_tags.widen(index, LocalTag::of(&value));
                    quicken::quicken_to(self.unit, bci, quicken::store_for_tag(merged), false);
                }
                let slot = Frame::local_slot(index);
                self.with_locals(|f| f.set_slot(slot, value))?;
                Ok(Control::Next)
            }
            Opcode::StoreLocalBool => self.store_local_primitive(bci, |v| match v {
                Value::Bool(b) => Some(Value::Bool(*b)),
                _ => None,
            }),
            Opcode::StoreLocalInt => self.store_local_primitive(bci, |v| match v {
                Value::Int(i) => Some(Value::Int(*i)),
                _ => None,
            }),
            Opcode::StoreLocalLong => self.store_local_primitive(bci, |v| match v {
                Value::Long(l) => Some(Value::Long(*l)),
                _ => None,
            }),
            Opcode::StoreLocalDouble => self.store_local_primitive(bci, |v| match v {
                Value::Double(d) => Some(Value::Double(*d)),
                _ => None,
            }),

            Opcode::ClearLocal => {
                let index = self.unit.read_u16(bci + 1);
                let slot = Frame::local_slot(index);
                self.with_locals(|f| f.clear_slot(slot))?;
                Ok(Control::Next)
            }

            Opcode::LoadLocalMat => {
                let expected = self.unit.read_u16(bci + 1);
                let index = self.unit.read_u16(bci + 2);
                let value =
                    self.with_frame_operand(expected, |target, config| {
                        target.read_local(index, config)
                    })?;
                self.frame.push(value);
                Ok(Control::Next)
            }
            Opcode::StoreLocalMat => {
                let expected = self.unit.read_u16(bci + 1);
                let index = self.unit.read_u16(bci + 2);
                let value = self.frame.pop();
                self.with_frame_operand(expected, |target, config| {
                    target.write_local(index, value, config)
                })?;
                Ok(Control::Next)
            }

            // ==================== Arithmetic ====================
            Opcode::Add | Opcode::AddBoxed => self.binary_generic(bci, op, Value::add),
            Opcode::Sub | Opcode::SubBoxed => self.binary_generic(bci, op, Value::sub),
            Opcode::Mul | Opcode::MulBoxed => self.binary_generic(bci, op, Value::mul),
            Opcode::Div | Opcode::DivBoxed => self.binary_generic(bci, op, Value::div),

            Opcode::AddInt => self.binary_int(bci, i32::wrapping_add, Value::add),
            Opcode::SubInt => self.binary_int(bci, i32::wrapping_sub, Value::sub),
            Opcode::MulInt => self.binary_int(bci, i32::wrapping_mul, Value::mul),
            Opcode::DivInt => {
                if let Some((a, b)) = self.frame.pop2_int() {
                    if b == 0 {
                        return Err(self.guest(OpError::DivisionByZero, bci));
                    }
                    self.frame.push_int(a.wrapping_div(b));
                    return Ok(Control::Next);
                }
                quicken::generalize(self.unit, bci);
                self.binary_slow(bci, Value::div)
            }

            Opcode::AddLong => self.binary_long(bci, i64::wrapping_add, Value::add),
            Opcode::SubLong => self.binary_long(bci, i64::wrapping_sub, Value::sub),
            Opcode::MulLong => self.binary_long(bci, i64::wrapping_mul, Value::mul),
            Opcode::DivLong => {
                if let Some((a, b)) = self.frame.pop2_long() {
                    if b == 0 {
                        return Err(self.guest(OpError::DivisionByZero, bci));
                    }
                    self.frame.push_long(a.wrapping_div(b));
                    return Ok(Control::Next);
                }
                quicken::generalize(self.unit, bci);
                self.binary_slow(bci, Value::div)
            }

            Opcode::AddDouble => self.binary_double(bci, |a, b| a + b, Value::add),
            Opcode::SubDouble => self.binary_double(bci, |a, b| a - b, Value::sub),
            Opcode::MulDouble => self.binary_double(bci, |a, b| a * b, Value::mul),
            Opcode::DivDouble => self.binary_double(bci, |a, b| a / b, Value::div),

            Opcode::Neg => {
                let value = self.frame.pop();
                let result = Value::neg(&value).map_err(|e| self.guest(e, bci))?;
                self.frame.push(result);
                Ok(Control::Next)
            }
            Opcode::Not => {
                let value = self.frame.pop();
                self.frame.push_bool(!value.is_truthy());
                Ok(Control::Next)
            }

            // comparisons share a secondary dispatcher: every member pops
            // two operands and pushes one bool
            Opcode::Lt
            | Opcode::LtInt
            | Opcode::LtBoxed
            | Opcode::Le
            | Opcode::LeInt
            | Opcode::LeBoxed
            | Opcode::Gt
            | Opcode::GtInt
            | Opcode::GtBoxed
            | Opcode::Ge
            | Opcode::GeInt
            | Opcode::GeBoxed
            | Opcode::Eq
            | Opcode::EqInt
            | Opcode::EqBoxed => self.step_compare(bci, op),

            // ==================== Control flow ====================
            Opcode::Branch => Ok(Control::Jump(self.unit.read_u32(bci + 1))),
            Opcode::BranchBackward => self.branch_backward(bci),
            Opcode::BranchFalse => {
                let condition = self.frame.pop();
                if self.quickening() && matches!(condition, Value::Bool(_)) {
                    quicken::quicken_to(self.unit, bci, Opcode::BranchFalseBool, false);
                }
                self.finish_branch_false(bci, !condition.is_truthy())
            }
            Opcode::BranchFalseBool => {
                let taken = match self.frame.pop_bool() {
                    Some(b) => !b,
                    // megamorphic condition: fall back to truthiness
                    // without leaving the specialized form
                    None => !self.frame.pop().is_truthy(),
                };
                self.finish_branch_false(bci, taken)
            }

            // ==================== Terminal ====================
            Opcode::Return => {
                self.note_location(bci);
                Ok(Control::Return(self.frame.pop()))
            }
            Opcode::Yield => {
                self.note_location(bci);
                let preserved = self.unit.read_u16(bci + 1);
                let value = self.frame.pop();
                Ok(Control::Yield { value, preserved })
            }
            Opcode::Throw => {
                self.note_location(bci);
                let value = self.frame.pop();
                Err(VmError::thrown(value, bci))
            }

            // ==================== Instrumentation ====================
            Opcode::TagProbe => {
                self.note_location(bci);
                let node = self.unit.read_u16(bci + 1);
                if let Some(probe) = &self.config.probe {
                    probe.on_enter(node, bci);
                }
                Ok(Control::Next)
            }
        }
    }

    // ==================== Helpers ====================

    /// Record the bci of a location-sensitive instruction in the frame's
    /// reserved slot so diagnostics and reflective access can see where an
    /// activation last was.
    #[inline]
    fn note_location(&mut self, bci: u32) {
        if self.config.track_location {
            self.frame.set_current_bci(bci);
        }
    }

    fn with_frame_operand<R>(
        &mut self,
        expected: u16,
        f: impl FnOnce(&MaterializedFrame, &InterpreterConfig) -> VmResult<R>,
    ) -> VmResult<R> {
        let operand = self.frame.pop();
        let Value::Object(object) = &operand else {
            return Err(VmError::internal(format!(
                "materialized local access on a {}",
                operand.type_name()
            )));
        };
        let Some(target) = object.as_any().downcast_ref::<MaterializedFrame>() else {
            return Err(VmError::internal(format!(
                "materialized local access on a {}",
                object.type_name()
            )));
        };
        if target.root_index() != expected {
            return Err(VmError::FrameMismatch {
                expected,
                actual: target.root_index(),
            });
        }
        f(target, self.config)
    }

    fn load_local_primitive(
        &mut self,
        bci: u32,
        fast: impl Fn(&mut Frame, u16) -> Option<Value>,
    ) -> VmResult<Control> {
        let index = self.unit.read_u16(bci + 1);
        let slot = Frame::local_slot(index);
        if let Some(value) = self.with_locals(|f| fast(f, slot))? {
            self.frame.push(value);
            return Ok(Control::Next);
        }
        // frame slot no longer matches this load's cached type; heal the
        // load and read boxed
        quicken::generalize(self.unit, bci);
        let value = self.local_value(index, bci)?;
        self.frame.push(value);
        Ok(Control::Next)
    }

    fn store_local_primitive(
        &mut self,
        bci: u32,
        accepts: impl Fn(&Value) -> Option<Value>,
    ) -> VmResult<Control> {
        let index = self.unit.read_u16(bci + 1);
        let slot = Frame::local_slot(index);
        let value = self.frame.pop();
        if let Some(primitive) = accepts(&value) {
            self.with_locals(|f| f.set_slot(slot, primitive))?;
            return Ok(Control::Next);
        }
        // type departed from the cached tag: widen, generalize the store,
        // and store boxed
        if let Some(aux) = self.aux {
            aux.local_tags.widen(index, LocalTag::of(&value));
        }
        quicken::generalize(self.unit, bci);
        self.with_locals(|f| f.set_slot(slot, value))?;
        Ok(Control::Next)
    }

    fn binary_generic(
        &mut self,
        bci: u32,
        op: Opcode,
        apply: fn(&Value, &Value) -> Result<Value, OpError>,
    ) -> VmResult<Control> {
        let rhs = self.frame.pop();
        let lhs = self.frame.pop();
        let result = apply(&lhs, &rhs).map_err(|e| self.guest(e, bci))?;
        if op == op.generic() && self.quickening() {
            let desired = match (&lhs, &rhs) {
                (Value::Int(_), Value::Int(_)) => specialized_int(op),
                (Value::Long(_), Value::Long(_)) => specialized_long(op),
                (Value::Double(_), Value::Double(_)) => specialized_double(op),
                _ => op.boxed_form().unwrap_or(op),
            };
            quicken::quicken_to(self.unit, bci, desired, self.pinned(bci));
        }
        self.frame.push(result);
        Ok(Control::Next)
    }

    fn binary_slow(
        &mut self,
        bci: u32,
        apply: fn(&Value, &Value) -> Result<Value, OpError>,
    ) -> VmResult<Control> {
        let rhs = self.frame.pop();
        let lhs = self.frame.pop();
        let result = apply(&lhs, &rhs).map_err(|e| self.guest(e, bci))?;
        self.frame.push(result);
        Ok(Control::Next)
    }

    fn binary_int(
        &mut self,
        bci: u32,
        fast: fn(i32, i32) -> i32,
        slow: fn(&Value, &Value) -> Result<Value, OpError>,
    ) -> VmResult<Control> {
        if let Some((a, b)) = self.frame.pop2_int() {
            self.frame.push_int(fast(a, b));
            return Ok(Control::Next);
        }
        quicken::generalize(self.unit, bci);
        self.binary_slow(bci, slow)
    }

    fn binary_long(
        &mut self,
        bci: u32,
        fast: fn(i64, i64) -> i64,
        slow: fn(&Value, &Value) -> Result<Value, OpError>,
    ) -> VmResult<Control> {
        if let Some((a, b)) = self.frame.pop2_long() {
            self.frame.push_long(fast(a, b));
            return Ok(Control::Next);
        }
        quicken::generalize(self.unit, bci);
        self.binary_slow(bci, slow)
    }

    fn binary_double(
        &mut self,
        bci: u32,
        fast: fn(f64, f64) -> f64,
        slow: fn(&Value, &Value) -> Result<Value, OpError>,
    ) -> VmResult<Control> {
        if let Some((a, b)) = self.frame.pop2_double() {
            self.frame.push_double(fast(a, b));
            return Ok(Control::Next);
        }
        quicken::generalize(self.unit, bci);
        self.binary_slow(bci, slow)
    }

    /// Secondary dispatcher for the comparison group
    fn step_compare(&mut self, bci: u32, op: Opcode) -> VmResult<Control> {
        // int fast path for the specialized members
        if matches!(
            op,
            Opcode::LtInt | Opcode::LeInt | Opcode::GtInt | Opcode::GeInt | Opcode::EqInt
        ) {
            if let Some((a, b)) = self.frame.pop2_int() {
                self.frame.push_bool(compare_outcome(op, a.cmp(&b)));
                return Ok(Control::Next);
            }
            quicken::generalize(self.unit, bci);
        }
        let rhs = self.frame.pop();
        let lhs = self.frame.pop();
        let result = if op.generic() == Opcode::Eq {
            values_equal(&lhs, &rhs)
        } else {
            let ordering = Value::compare(&lhs, &rhs).map_err(|e| self.guest(e, bci))?;
            compare_outcome(op, ordering)
        };
        if op == op.generic() && self.quickening() {
            let desired = match (&lhs, &rhs) {
                (Value::Int(_), Value::Int(_)) => specialized_int(op),
                _ => op.boxed_form().unwrap_or(op),
            };
            quicken::quicken_to(self.unit, bci, desired, self.pinned(bci));
        }
        self.frame.push_bool(result);
        Ok(Control::Next)
    }

    fn finish_branch_false(&mut self, bci: u32, taken: bool) -> VmResult<Control> {
        if let Some(aux) = self.aux {
            let site = self.unit.read_u16(bci + 3);
            aux.branch_profiles.record(site, taken);
        }
        if taken {
            Ok(Control::Jump(self.unit.read_u32(bci + 1)))
        } else {
            Ok(Control::Next)
        }
    }

    fn branch_backward(&mut self, bci: u32) -> VmResult<Control> {
        let target = self.unit.read_u32(bci + 1);
        // safepoint: back edges are the only poll sites
        if self.root.is_interrupted() {
            return Err(VmError::Interrupted);
        }
        match self.aux {
            Some(aux) => {
                let site = self.unit.read_u16(bci + 3);
                let trips = aux.loop_counters.bump(site);
                if trips >= self.config.osr_threshold
                    && let Some(compiler) = &self.config.osr_compiler
                    && let Some(compiled) = self.root.osr_loop(compiler.as_ref(), target)
                {
                    let entry = state::encode(target, self.frame.sp(), self.cont_frame);
                    let next = osr::run(compiled.as_ref(), self.frame, entry)?;
                    aux.loop_counters.reset(site);
                    if state::is_return(next) {
                        return Ok(Control::Return(self.frame.pop()));
                    }
                    return Ok(Control::Jump(state::bci(next)));
                }
            }
            // back edges burn uncached budget; the switch happens on the
            // next activation
            None => self.root.note_uncached_back_edge(),
        }
        Ok(Control::Jump(target))
    }

    // ==================== Exception resolution ====================

    fn resolve(&mut self, bci: u32, err: VmError) -> VmResult<Resolved> {
        let thrown: ThrownValue = match err {
            VmError::Interrupted => return Err(VmError::Interrupted),
            VmError::Language(boxed) => match &self.config.interceptor {
                Some(interceptor) => interceptor.intercept_language(*boxed),
                None => *boxed,
            },
            engine => {
                let translated = match &self.config.interceptor {
                    Some(interceptor) => interceptor.intercept_internal(engine),
                    None => engine,
                };
                match translated {
                    VmError::Language(boxed) => *boxed,
                    still_engine => return Err(still_engine),
                }
            }
        };

        // always rescan from the front: guard ranges disambiguate and
        // handler code itself sits outside the ranges that guard it
        let mut from = 0;
        loop {
            let Some((index, entry)) = self.descriptor.handlers.find_from(bci, from) else {
                return Err(VmError::Language(Box::new(thrown)));
            };
            let entry = *entry;
            match entry.kind {
                HandlerKind::Custom => {
                    if let Some(aux) = self.aux {
                        aux.handler_hits.mark(index);
                    }
                    self.enter_handler(&entry, Some(thrown.value));
                    return Ok(Resolved::Continue(entry.handler_bci));
                }
                HandlerKind::EpilogExceptional => {
                    if self.frame.fire_epilog() {
                        if let Some(aux) = self.aux {
                            aux.handler_hits.mark(index);
                        }
                        self.enter_handler(&entry, Some(thrown.value));
                        return Ok(Resolved::Continue(entry.handler_bci));
                    }
                    from = index + 1;
                }
                HandlerKind::TagExceptional => {
                    let resolution = match &self.config.probe {
                        Some(probe) => probe.on_exceptional(entry.tag_node, bci, &thrown),
                        None => ProbeResolution::Rethrow,
                    };
                    match resolution {
                        ProbeResolution::Rethrow => from = index + 1,
                        ProbeResolution::ReenterAt(target) => {
                            if let Some(aux) = self.aux {
                                aux.handler_hits.mark(index);
                            }
                            self.enter_handler(&entry, None);
                            return Ok(Resolved::Continue(target));
                        }
                        ProbeResolution::SubstituteReturn(value) => {
                            if let Some(aux) = self.aux {
                                aux.handler_hits.mark(index);
                            }
                            // the substitute lands where the tagged
                            // operation's result would have; push goes
                            // through the frame's typed stores
                            self.enter_handler(&entry, Some(value));
                            return Ok(Resolved::Continue(entry.handler_bci));
                        }
                        ProbeResolution::Unwind(value) => {
                            return Ok(Resolved::Complete(value));
                        }
                    }
                }
            }
        }
    }

    fn enter_handler(&mut self, entry: &HandlerEntry, push: Option<Value>) {
        let sp = self.frame.stack_base() + entry.handler_sp;
        self.frame.set_sp(sp);
        if let Some(value) = push {
            self.frame.push(value);
        }
    }
}

fn constant_value(constant: &Constant) -> Value {
    match constant {
        Constant::Null => Value::Null,
        Constant::Bool(b) => Value::Bool(*b),
        Constant::Byte(b) => Value::Byte(*b),
        Constant::Char(c) => Value::Char(*c),
        Constant::Int(i) => Value::Int(*i),
        Constant::Long(l) => Value::Long(*l),
        Constant::Float(f) => Value::Float(*f),
        Constant::Double(d) => Value::Double(*d),
        Constant::Str(s) => Value::Str(Arc::clone(s)),
    }
}

fn values_equal(lhs: &Value, rhs: &Value) -> bool {
    match Value::compare(lhs, rhs) {
        Ok(ordering) => ordering.is_eq(),
        Err(_) => lhs == rhs,
    }
}

fn compare_outcome(op: Opcode, ordering: std::cmp::Ordering) -> bool {
    match op.generic() {
        Opcode::Lt => ordering.is_lt(),
        Opcode::Le => ordering.is_le(),
        Opcode::Gt => ordering.is_gt(),
        Opcode::Ge => ordering.is_ge(),
        Opcode::Eq => ordering.is_eq(),
        other => unreachable!("{other} is not a comparison"),
    }
}

fn specialized_int(op: Opcode) -> Opcode {
    match op {
        Opcode::Add => Opcode::AddInt,
        Opcode::Sub => Opcode::SubInt,
        Opcode::Mul => Opcode::MulInt,
        Opcode::Div => Opcode::DivInt,
        Opcode::Lt => Opcode::LtInt,
        Opcode::Le => Opcode::LeInt,
        Opcode::Gt => Opcode::GtInt,
        Opcode::Ge => Opcode::GeInt,
        Opcode::Eq => Opcode::EqInt,
        other => other,
    }
}

fn specialized_long(op: Opcode) -> Opcode {
    match op {
        Opcode::Add => Opcode::AddLong,
        Opcode::Sub => Opcode::SubLong,
        Opcode::Mul => Opcode::MulLong,
        Opcode::Div => Opcode::DivLong,
        other => other.boxed_form().unwrap_or(other),
    }
}

fn specialized_double(op: Opcode) -> Opcode {
    match op {
        Opcode::Add => Opcode::AddDouble,
        Opcode::Sub => Opcode::SubDouble,
        Opcode::Mul => Opcode::MulDouble,
        Opcode::Div => Opcode::DivDouble,
        other => other.boxed_form().unwrap_or(other),
    }
}
