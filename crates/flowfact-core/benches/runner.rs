//! Worklist throughput over a chain of branches.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use flowfact_core::{
    ArithOp, InstKind, MemoryState, ProgramBuilder, RelOp, RunConfig, Runner, ValueFactory, Width,
};

/// A chain of `depth` independent if/else diamonds over one counter.
fn diamond_chain(depth: usize) -> (ValueFactory, flowfact_core::Program) {
    let mut f = ValueFactory::new();
    let x = f.variable("x", Width::Int, false);
    let y = f.variable("y", Width::Int, false);
    let zero = f.int(0);
    let one = f.int(1);

    let mut b = ProgramBuilder::new();
    b.emit(InstKind::Push(zero));
    b.emit(InstKind::Assign(x));
    b.emit(InstKind::Pop);
    for _ in 0..depth {
        let then = b.fresh_label();
        let end = b.fresh_label();
        b.emit(InstKind::Push(y));
        b.emit(InstKind::Push(zero));
        b.emit(InstKind::Cmp(RelOp::Gt));
        b.branch(then, None);
        b.emit(InstKind::Push(x));
        b.emit(InstKind::Push(one));
        b.emit(InstKind::BinOp(ArithOp::Add, Width::Int));
        b.emit(InstKind::Assign(x));
        b.emit(InstKind::Pop);
        b.goto(end);
        b.bind_label(then);
        b.emit(InstKind::Nop);
        b.bind_label(end);
        b.emit(InstKind::Flush(vec![x]));
    }
    (f, b.build().expect("valid program"))
}

fn bench_runner(c: &mut Criterion) {
    let mut group = c.benchmark_group("runner");
    for depth in [4usize, 16, 64] {
        group.bench_with_input(BenchmarkId::new("diamond_chain", depth), &depth, |b, &d| {
            b.iter_batched(
                || diamond_chain(d),
                |(mut factory, program)| {
                    Runner::new(&program, &mut factory, RunConfig::default())
                        .run(MemoryState::new())
                        .expect("well-formed program")
                },
                criterion::BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

criterion_group!(benches, bench_runner);
criterion_main!(benches);
