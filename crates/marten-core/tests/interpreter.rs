//! End-to-end interpreter scenarios: tier movement, quickening and deopt,
//! exception resolution, continuations, and on-stack replacement.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use marten_bytecode::{BytecodeBuilder, CodeDescriptor, HandlerKind, Opcode};
use marten_core::{
    CompiledLoop, Execution, Frame, IllegalLocalSemantics, InterpreterConfig, ObjectRef,
    OsrCompiler, ProbeResolution, Root, TagProbe, ThrownValue, Tier, Value, VmError, VmResult,
    state,
};

fn cached_config() -> Arc<InterpreterConfig> {
    Arc::new(InterpreterConfig::new().without_uncached())
}

fn returned(execution: Execution) -> Value {
    execution.into_return().expect("activation should complete")
}

/// acc = 0; for i in 0..n { acc += i }; acc
fn sum_loop(config: Arc<InterpreterConfig>) -> Arc<Root> {
    let mut b = BytecodeBuilder::new(0);
    let n = b.reserve_local();
    let i = b.reserve_local();
    let acc = b.reserve_local();
    b.emit_load_int(0);
    b.emit_store_local(i);
    b.emit_load_int(0);
    b.emit_store_local(acc);
    let head = b.create_label();
    let exit = b.create_label();
    b.bind_label(head);
    b.emit_load_local(i);
    b.emit_load_local(n);
    b.emit_binary(Opcode::Lt);
    b.emit_branch_false(exit);
    b.emit_load_local(acc);
    b.emit_load_local(i);
    b.emit_binary(Opcode::Add);
    b.emit_store_local(acc);
    b.emit_load_local(i);
    b.emit_load_int(1);
    b.emit_binary(Opcode::Add);
    b.emit_store_local(i);
    b.emit_branch_backward(head);
    b.bind_label(exit);
    b.emit_load_local(acc);
    b.emit_return();
    Root::new(b.build().unwrap(), config)
}

#[test]
fn loop_sums_and_quickens() {
    let root = sum_loop(cached_config());
    let result = returned(root.call(&[Value::Int(10)]).unwrap());
    assert_eq!(result, Value::Int(45));
    let listing = root.dump();
    assert!(listing.contains("add$int"), "{listing}");
    assert!(listing.contains("lt$int"), "{listing}");
    assert!(listing.contains("load.local$int"), "{listing}");
    assert!(listing.contains("store.local$int"), "{listing}");
}

#[test]
fn type_change_deopts_to_boxed() {
    let mut b = BytecodeBuilder::new(0);
    b.reserve_local();
    b.reserve_local();
    b.emit_load_local(0);
    b.emit_load_local(1);
    b.emit_binary(Opcode::Add);
    b.emit_return();
    let root = Root::new(b.build().unwrap(), cached_config());

    let first = returned(root.call(&[Value::Int(2), Value::Int(3)]).unwrap());
    assert_eq!(first, Value::Int(5));
    assert!(root.dump().contains("add$int"));

    let second = returned(
        root.call(&[Value::Double(2.5), Value::Double(0.5)]).unwrap(),
    );
    assert_eq!(second, Value::Double(3.0));
    let listing = root.dump();
    assert!(listing.contains("add$boxed"), "{listing}");
    assert!(listing.contains("load.local$boxed"), "{listing}");
}

#[test]
fn invalidation_restores_pristine_code() {
    let root = sum_loop(cached_config());
    returned(root.call(&[Value::Int(5)]).unwrap());
    assert!(root.dump().contains("add$int"));
    root.invalidate();
    let listing = root.dump();
    assert!(!listing.contains('$'), "{listing}");
    // still runs (and re-quickens) after the rebuild
    let result = returned(root.call(&[Value::Int(10)]).unwrap());
    assert_eq!(result, Value::Int(45));
}

#[test]
fn uncached_tier_promotes_after_budget() {
    let config = Arc::new(InterpreterConfig::new().with_uncached_threshold(2));
    let root = sum_loop(Arc::clone(&config));
    assert_eq!(root.tier(), Tier::Uninitialized);
    returned(root.call(&[Value::Int(3)]).unwrap());
    assert_eq!(root.tier(), Tier::Uncached);
    // uncached execution never rewrites
    assert!(!root.dump().contains('$'));
    returned(root.call(&[Value::Int(3)]).unwrap());
    assert_eq!(root.tier(), Tier::Cached);
}

#[test]
fn clone_starts_cold_and_invalidation_cascades() {
    let root = sum_loop(cached_config());
    returned(root.call(&[Value::Int(5)]).unwrap());
    let clone = root.clone_uninitialized();
    assert_eq!(clone.tier(), Tier::Uninitialized);
    returned(clone.call(&[Value::Int(5)]).unwrap());
    assert!(clone.dump().contains("add$int"));
    root.invalidate();
    assert!(!clone.dump().contains('$'));
}

#[test]
fn interruption_is_observed_at_back_edges() {
    let mut b = BytecodeBuilder::new(0);
    let head = b.create_label();
    b.bind_label(head);
    b.emit_nop();
    b.emit_branch_backward(head);
    let root = Root::new(b.build().unwrap(), cached_config());
    root.interrupt();
    assert!(matches!(root.call(&[]), Err(VmError::Interrupted)));
}

#[test]
fn concurrent_callers_agree_while_quickening() {
    let root = sum_loop(cached_config());
    std::thread::scope(|scope| {
        for _ in 0..4 {
            let root = Arc::clone(&root);
            scope.spawn(move || {
                for _ in 0..16 {
                    let result = returned(root.call(&[Value::Int(100)]).unwrap());
                    assert_eq!(result, Value::Int(4950));
                }
            });
        }
    });
    assert!(root.dump().contains("add$int"));
}

#[test]
fn division_by_zero_is_catchable() {
    let mut b = BytecodeBuilder::new(0);
    let start = b.current_bci();
    b.emit_load_int(1);
    b.emit_load_int(0);
    b.emit_binary(Opcode::Div);
    b.emit_return();
    let end = b.current_bci();
    let handler = b.current_bci();
    b.set_current_sp(1);
    b.emit_return();
    b.add_handler(start, end, HandlerKind::Custom, handler, 0);
    let root = Root::new(b.build().unwrap(), cached_config());
    let caught = returned(root.call(&[]).unwrap());
    assert_eq!(caught, Value::Str(Arc::from("division by zero")));
}

#[test]
fn first_table_entry_wins_handler_resolution() {
    fn build(inner_first: bool) -> Arc<Root> {
        let mut b = BytecodeBuilder::new(0);
        let boom = b.add_str_constant("boom");
        let inner = b.add_str_constant("inner");
        let outer = b.add_str_constant("outer");
        let start = b.current_bci();
        b.emit_load_const(boom);
        b.emit_throw();
        let end = b.current_bci();
        let h_inner = b.current_bci();
        b.set_current_sp(1);
        b.emit_pop();
        b.emit_load_const(inner);
        b.emit_return();
        let h_outer = b.current_bci();
        b.set_current_sp(1);
        b.emit_pop();
        b.emit_load_const(outer);
        b.emit_return();
        if inner_first {
            b.add_handler(start, end, HandlerKind::Custom, h_inner, 0);
            b.add_handler(start, end, HandlerKind::Custom, h_outer, 0);
        } else {
            b.add_handler(start, end, HandlerKind::Custom, h_outer, 0);
            b.add_handler(start, end, HandlerKind::Custom, h_inner, 0);
        }
        Root::new(b.build().unwrap(), cached_config())
    }

    let inner_wins = returned(build(true).call(&[]).unwrap());
    assert_eq!(inner_wins, Value::Str(Arc::from("inner")));
    let outer_wins = returned(build(false).call(&[]).unwrap());
    assert_eq!(outer_wins, Value::Str(Arc::from("outer")));
}

#[derive(Debug, Default)]
struct CountingProbe {
    enters: AtomicU32,
}

impl TagProbe for CountingProbe {
    fn on_enter(&self, _node: u16, _bci: u32) {
        self.enters.fetch_add(1, Ordering::Relaxed);
    }
}

#[test]
fn exceptional_epilog_fires_once_per_activation() {
    let probe = Arc::new(CountingProbe::default());
    let mut b = BytecodeBuilder::new(0);
    let boom = b.add_str_constant("boom");
    b.emit_load_const(boom);
    b.emit_throw();
    let epilog = b.current_bci();
    b.set_current_sp(1);
    b.emit_tag_probe();
    b.emit_throw();
    // guard the whole unit, epilog code included, so the rethrow scans
    // straight back over this entry
    let end = b.current_bci();
    b.add_handler(0, end, HandlerKind::EpilogExceptional, epilog, 0);
    let root = Root::new(
        b.build().unwrap(),
        Arc::new(
            InterpreterConfig::new()
                .without_uncached()
                .with_probe(Arc::clone(&probe) as Arc<dyn TagProbe>),
        ),
    );
    let result = root.call(&[]);
    assert!(matches!(result, Err(VmError::Language(_))));
    assert_eq!(probe.enters.load(Ordering::Relaxed), 1);
}

#[derive(Debug)]
struct UnwindProbe;

impl TagProbe for UnwindProbe {
    fn on_enter(&self, _node: u16, _bci: u32) {}

    fn on_exceptional(&self, _node: u16, _bci: u32, _thrown: &ThrownValue) -> ProbeResolution {
        ProbeResolution::Unwind(Value::Int(99))
    }
}

#[test]
fn probe_can_unwind_with_a_value() {
    let mut b = BytecodeBuilder::new(0);
    let boom = b.add_str_constant("boom");
    b.emit_tag_probe();
    let start = b.current_bci();
    b.emit_load_const(boom);
    b.emit_throw();
    let end = b.current_bci();
    b.add_tag_handler(start, end, 0, 0, 0);
    let root = Root::new(
        b.build().unwrap(),
        Arc::new(
            InterpreterConfig::new()
                .without_uncached()
                .with_probe(Arc::new(UnwindProbe)),
        ),
    );
    assert_eq!(returned(root.call(&[]).unwrap()), Value::Int(99));
}

#[derive(Debug)]
struct ReenterProbe {
    recover_bci: u32,
}

impl TagProbe for ReenterProbe {
    fn on_enter(&self, _node: u16, _bci: u32) {}

    fn on_exceptional(&self, _node: u16, _bci: u32, _thrown: &ThrownValue) -> ProbeResolution {
        ProbeResolution::ReenterAt(self.recover_bci)
    }
}

#[test]
fn probe_can_discard_and_reenter() {
    let mut b = BytecodeBuilder::new(0);
    let boom = b.add_str_constant("boom");
    let recovered = b.add_str_constant("recovered");
    b.emit_tag_probe();
    let start = b.current_bci();
    b.emit_load_const(boom);
    b.emit_throw();
    let end = b.current_bci();
    let recover = b.current_bci();
    b.emit_load_const(recovered);
    b.emit_return();
    b.add_tag_handler(start, end, 0, recover, 0);
    let root = Root::new(
        b.build().unwrap(),
        Arc::new(
            InterpreterConfig::new()
                .without_uncached()
                .with_probe(Arc::new(ReenterProbe { recover_bci: recover })),
        ),
    );
    assert_eq!(
        returned(root.call(&[]).unwrap()),
        Value::Str(Arc::from("recovered"))
    );
}

#[derive(Debug)]
struct SubstituteProbe;

impl TagProbe for SubstituteProbe {
    fn on_enter(&self, _node: u16, _bci: u32) {}

    fn on_exceptional(&self, _node: u16, _bci: u32, _thrown: &ThrownValue) -> ProbeResolution {
        ProbeResolution::SubstituteReturn(Value::Int(42))
    }
}

#[test]
fn probe_can_substitute_the_result_of_a_tagged_operation() {
    let mut b = BytecodeBuilder::new(0);
    let boom = b.add_str_constant("boom");
    b.emit_tag_probe();
    let start = b.current_bci();
    b.emit_load_const(boom);
    b.emit_throw();
    let end = b.current_bci();
    // the substitute lands at the handler sp, where the tagged
    // operation's result would have been
    let resume = b.current_bci();
    b.set_current_sp(1);
    b.emit_return();
    b.add_tag_handler(start, end, 0, resume, 0);
    let root = Root::new(
        b.build().unwrap(),
        Arc::new(
            InterpreterConfig::new()
                .without_uncached()
                .with_probe(Arc::new(SubstituteProbe)),
        ),
    );
    assert_eq!(returned(root.call(&[]).unwrap()), Value::Int(42));
}

#[test]
fn pinned_site_deopts_straight_to_boxed() {
    let mut b = BytecodeBuilder::new(0);
    b.reserve_local();
    b.reserve_local();
    b.emit_load_local(0);
    b.emit_load_local(1);
    b.emit_binary(Opcode::Add);
    b.pin_last();
    b.emit_return();
    let root = Root::new(b.build().unwrap(), cached_config());
    let result = returned(root.call(&[Value::Int(2), Value::Int(3)]).unwrap());
    assert_eq!(result, Value::Int(5));
    let listing = root.dump();
    assert!(listing.contains("add$boxed"), "{listing}");
    assert!(!listing.contains("add$int"), "{listing}");
}

#[test]
fn illegal_local_semantics() {
    fn reader(semantics: IllegalLocalSemantics) -> Arc<Root> {
        let mut b = BytecodeBuilder::new(0);
        b.reserve_local();
        b.emit_load_local(0);
        b.emit_return();
        Root::new(
            b.build().unwrap(),
            Arc::new(
                InterpreterConfig::new()
                    .without_uncached()
                    .with_illegal_local(semantics),
            ),
        )
    }

    let defaulted = reader(IllegalLocalSemantics::DefaultValue(Value::Int(42)));
    assert_eq!(returned(defaulted.call(&[]).unwrap()), Value::Int(42));

    let strict = reader(IllegalLocalSemantics::Error);
    assert!(matches!(
        strict.call(&[]),
        Err(VmError::IllegalLocal { local: 0, .. })
    ));
}

#[test]
fn cleared_local_reads_as_illegal() {
    let mut b = BytecodeBuilder::new(0);
    let slot = b.reserve_local();
    b.emit_load_int(7);
    b.emit_store_local(slot);
    b.emit_clear_local(slot);
    b.emit_load_local(slot);
    b.emit_return();
    let root = Root::new(
        b.build().unwrap(),
        Arc::new(
            InterpreterConfig::new()
                .without_uncached()
                .with_illegal_local(IllegalLocalSemantics::Error),
        ),
    );
    assert!(matches!(root.call(&[]), Err(VmError::IllegalLocal { .. })));
}

// ==================== Continuations ====================

#[test]
fn yield_suspends_and_resume_substitutes_the_sent_value() {
    let mut b = BytecodeBuilder::new(0);
    b.emit_load_int(1);
    b.emit_yield();
    b.emit_load_int(10);
    b.emit_binary(Opcode::Add);
    b.emit_return();
    let root = Root::new(b.build().unwrap(), cached_config());
    let Execution::Yield {
        value,
        continuation,
    } = root.call(&[]).unwrap()
    else {
        panic!("expected a yield");
    };
    assert_eq!(value, Value::Int(1));
    assert!(continuation.is_suspended());
    let result = returned(continuation.resume(Value::Int(5)).unwrap());
    assert_eq!(result, Value::Int(15));
    assert!(!continuation.is_suspended());
    assert!(continuation.resume(Value::Null).is_err());
}

#[test]
fn locals_survive_suspension_through_the_materialized_frame() {
    let mut b = BytecodeBuilder::new(0);
    let slot = b.reserve_local();
    b.declare_local(slot, None, None);
    b.emit_load_int(7);
    b.emit_store_local(slot);
    b.emit_load_int(1);
    b.emit_yield();
    b.emit_pop();
    b.emit_load_int(2);
    b.emit_yield();
    b.emit_pop();
    b.emit_load_local(slot);
    b.emit_return();
    let root = Root::new(b.build().unwrap(), cached_config());

    let Execution::Yield { value, continuation } = root.call(&[]).unwrap() else {
        panic!("expected first yield");
    };
    assert_eq!(value, Value::Int(1));

    // reflective read through the materialized frame while suspended
    let mat = continuation.frame().unwrap();
    assert_eq!(
        mat.read_local(0, root.config()).unwrap(),
        Value::Int(7)
    );

    let Execution::Yield { value, continuation } =
        continuation.resume(Value::Null).unwrap()
    else {
        panic!("expected second yield");
    };
    assert_eq!(value, Value::Int(2));

    let result = returned(continuation.resume(Value::Null).unwrap());
    assert_eq!(result, Value::Int(7));
}

#[test]
fn materialized_local_access_checks_the_owning_root() {
    // root 0 suspends with local 0 = 7
    let mut a = BytecodeBuilder::new(0);
    let slot = a.reserve_local();
    a.declare_local(slot, None, None);
    a.emit_load_int(7);
    a.emit_store_local(slot);
    a.emit_load_int(1);
    a.emit_yield();
    a.emit_pop();
    a.emit_load_local(slot);
    a.emit_return();
    let generator = Root::new(a.build().unwrap(), cached_config());
    let Execution::Yield { continuation, .. } = generator.call(&[]).unwrap() else {
        panic!("expected yield");
    };
    let mat = continuation.frame().unwrap();

    // root 1 reads local 0 of a root-0 frame passed as its argument
    fn accessor(expected_root: u16) -> Arc<Root> {
        let mut b = BytecodeBuilder::new(1);
        b.reserve_local();
        b.emit_load_local(0);
        b.emit_load_local_mat(expected_root, 0);
        b.emit_return();
        Root::new(b.build().unwrap(), cached_config())
    }

    let frame_value = Value::Object(Arc::clone(&mat) as ObjectRef);
    let ok = accessor(0);
    assert_eq!(
        returned(ok.call(std::slice::from_ref(&frame_value)).unwrap()),
        Value::Int(7)
    );

    let mismatched = accessor(5);
    assert!(matches!(
        mismatched.call(&[frame_value]),
        Err(VmError::FrameMismatch {
            expected: 5,
            actual: 0
        })
    ));
}

// ==================== On-stack replacement ====================

#[derive(Debug)]
struct FinishWith(i32);

impl CompiledLoop for FinishWith {
    fn execute(&self, frame: &mut Frame, state: u64) -> VmResult<u64> {
        frame.set_sp(frame.stack_base());
        frame.push(Value::Int(self.0));
        Ok(state::encode_return(state))
    }
}

struct AlwaysCompile;

impl OsrCompiler for AlwaysCompile {
    fn compile(
        &self,
        _descriptor: &CodeDescriptor,
        _loop_head: u32,
    ) -> Option<Arc<dyn CompiledLoop>> {
        Some(Arc::new(FinishWith(777)))
    }
}

#[test]
fn hot_back_edge_transfers_to_the_compiled_loop() {
    let config = Arc::new(
        InterpreterConfig::new()
            .without_uncached()
            .with_osr_threshold(5)
            .with_osr_compiler(Arc::new(AlwaysCompile)),
    );
    let root = sum_loop(config);
    // plenty of iterations left when the threshold trips
    let result = returned(root.call(&[Value::Int(1000)]).unwrap());
    assert_eq!(result, Value::Int(777));
    // a cold call below the threshold interprets to completion
    let cold = returned(root.call(&[Value::Int(3)]).unwrap());
    assert_eq!(cold, Value::Int(3));
}

// ==================== Caller-managed frames and descriptor queries ====================

fn fresh_frame(root: &Root) -> Frame {
    let d = root.descriptor();
    Frame::new(d.max_locals, d.max_stack, d.root_index)
}

#[test]
fn continue_at_runs_on_a_caller_managed_frame() {
    let root = sum_loop(cached_config());
    let mut frame = fresh_frame(&root);
    frame.set_slot(Frame::local_slot(0), Value::Int(10));
    let state0 = state::encode(0, frame.stack_base(), false);
    let done = root.continue_at(&mut frame, state0).unwrap();
    assert!(state::is_return(done));
    assert_eq!(frame.pop(), Value::Int(45));
}

#[test]
fn continue_at_resumes_across_a_yield() {
    let mut b = BytecodeBuilder::new(0);
    b.emit_load_int(1);
    b.emit_yield();
    b.emit_load_int(10);
    b.emit_binary(Opcode::Add);
    b.emit_return();
    let root = Root::new(b.build().unwrap(), cached_config());

    let mut frame = fresh_frame(&root);
    let state0 = state::encode(0, frame.stack_base(), false);
    let suspended = root.continue_at(&mut frame, state0).unwrap();
    assert!(!state::is_return(suspended));
    // locals stay in the caller's frame across the suspension
    assert!(!state::uses_continuation_frame(suspended));
    assert_eq!(frame.pop(), Value::Int(1));

    frame.push(Value::Int(5));
    let done = root.continue_at(&mut frame, suspended).unwrap();
    assert!(state::is_return(done));
    assert_eq!(frame.pop(), Value::Int(15));
}

#[test]
fn throw_location_lands_in_the_frame_when_tracked() {
    fn thrower(config: Arc<InterpreterConfig>) -> (Arc<Root>, u32) {
        let mut b = BytecodeBuilder::new(0);
        let boom = b.add_str_constant("boom");
        b.emit_load_const(boom);
        let throw_bci = b.current_bci();
        b.emit_throw();
        (Root::new(b.build().unwrap(), config), throw_bci)
    }

    let (root, throw_bci) = thrower(cached_config());
    let mut frame = fresh_frame(&root);
    let state0 = state::encode(0, frame.stack_base(), false);
    assert!(matches!(
        root.continue_at(&mut frame, state0),
        Err(VmError::Language(_))
    ));
    assert_eq!(frame.current_bci(), throw_bci);

    let (quiet, _) = thrower(Arc::new(
        InterpreterConfig::new()
            .without_uncached()
            .without_location_tracking(),
    ));
    let mut frame = fresh_frame(&quiet);
    let state0 = state::encode(0, frame.stack_base(), false);
    assert!(quiet.continue_at(&mut frame, state0).is_err());
    assert_eq!(frame.current_bci(), 0);
}

#[test]
fn descriptor_queries_answer_at_a_bci() {
    let mut b = BytecodeBuilder::new(0);
    let slot = b.reserve_local();
    let name = b.add_str_constant("x");
    let local = b.declare_local(slot, Some(name), None);
    b.emit_load_int(7);
    let mid = b.current_bci();
    b.emit_store_local(slot);
    b.emit_load_local(slot);
    b.emit_return();
    let end = b.current_bci();
    b.close_local(local);
    let handler = b.current_bci();
    b.set_current_sp(1);
    b.emit_return();
    b.add_handler(0, end, HandlerKind::Custom, handler, 0);
    b.add_source_range(0, end, 0, 0, 100);
    b.add_source_range(mid, end, 1, 10, 5);
    let root = Root::new(b.build().unwrap(), cached_config());

    root.validate().unwrap();

    // the innermost covering range wins
    assert_eq!(root.find_location(mid).unwrap().source_index, 1);
    assert_eq!(root.find_location(0).unwrap().source_index, 0);

    let guarding: Vec<_> = root.find_handlers(mid).collect();
    assert_eq!(guarding.len(), 1);
    assert_eq!(guarding[0].handler_bci, handler);
    assert_eq!(root.find_handlers(handler).count(), 0);

    let live: Vec<_> = root.find_locals(mid).collect();
    assert_eq!(live.len(), 1);
    let (index, descriptor) = live[0];
    assert_eq!(index, local);
    assert_eq!(descriptor.frame_index, slot);
    assert_eq!(descriptor.name_constant, Some(name));
    assert_eq!(root.find_locals(handler).count(), 0);
}
