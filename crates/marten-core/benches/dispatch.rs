//! Dispatch Loop Benchmarks
//!
//! Measures the effect of quickening and cached local tags on a numeric
//! loop. The same program runs with quickening on, with quickening off
//! (generic dispatch throughout), and in the profile-free uncached tier.

use std::hint::black_box;
use std::sync::Arc;

use criterion::{Criterion, criterion_group, criterion_main};
use marten_bytecode::{BytecodeBuilder, CodeDescriptor, Opcode};
use marten_core::{InterpreterConfig, Root, Value};

/// sum = 0; for (i = 0; i < n; i++) sum += i
fn sum_loop() -> CodeDescriptor {
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
    b.build().unwrap()
}

fn bench_quickened_loop(c: &mut Criterion) {
    let config = Arc::new(InterpreterConfig::new().without_uncached());
    let root = Root::new(sum_loop(), config);
    // warm call so the steady state measures fully quickened code
    root.call(&[Value::Int(10_000)]).unwrap();

    c.bench_function("sum_loop_10000_quickened", |b| {
        b.iter(|| {
            let result = root.call(black_box(&[Value::Int(10_000)])).unwrap();
            black_box(result)
        });
    });
}

fn bench_generic_loop(c: &mut Criterion) {
    let config = Arc::new(
        InterpreterConfig::new()
            .without_uncached()
            .without_quickening(),
    );
    let root = Root::new(sum_loop(), config);

    c.bench_function("sum_loop_10000_generic", |b| {
        b.iter(|| {
            let result = root.call(black_box(&[Value::Int(10_000)])).unwrap();
            black_box(result)
        });
    });
}

fn bench_uncached_loop(c: &mut Criterion) {
    let config = Arc::new(InterpreterConfig::new().with_uncached_threshold(u32::MAX));
    let root = Root::new(sum_loop(), config);

    c.bench_function("sum_loop_10000_uncached", |b| {
        b.iter(|| {
            let result = root.call(black_box(&[Value::Int(10_000)])).unwrap();
            black_box(result)
        });
    });
}

fn bench_first_call(c: &mut Criterion) {
    // cold start: tier initialization plus quickening warmup every iteration
    let config = Arc::new(InterpreterConfig::new().without_uncached());
    let descriptor = sum_loop();

    c.bench_function("sum_loop_1000_cold", |b| {
        b.iter(|| {
            let root = Root::new(descriptor.clone(), Arc::clone(&config));
            let result = root.call(black_box(&[Value::Int(1000)])).unwrap();
            black_box(result)
        });
    });
}

criterion_group!(
    benches,
    bench_quickened_loop,
    bench_generic_loop,
    bench_uncached_loop,
    bench_first_call
);
criterion_main!(benches);
