//! Map builder benchmarks.
//!
//! Measures the load-time cost of the abstract interpretation pass over
//! synthetic functions: a straight allocation-heavy body and a chain of
//! branch diamonds.

use codeswitch_bytecode::{BytecodeWriter, Opcode};
use codeswitch_runtime::{
    BuiltinId, ClassRegistry, DefnId, Function, FunctionInit, Name, Package, Roots, WORD_SIZE,
};
use codeswitch_vm::{build_stack_pointer_map, BuildConfig};
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::sync::Arc;

struct Harness {
    registry: ClassRegistry,
    roots: Roots,
    package: Arc<Package>,
}

fn harness() -> Harness {
    let registry = ClassRegistry::new();
    let roots = Roots::new(&registry);
    let package = Package::new(Name::simple("bench"));
    Harness {
        registry,
        roots,
        package,
    }
}

/// A straight-line body with `count` allocation safe points.
fn alloc_heavy_function(harness: &Harness, count: usize) -> Function {
    let mut asm = BytecodeWriter::new();
    for _ in 0..count {
        asm.op(Opcode::AllocObj).vbn(BuiltinId::STRING_CLASS.raw());
        asm.op(Opcode::Drop);
    }
    asm.op(Opcode::Unit).op(Opcode::Ret);

    let mut init = FunctionInit::new(DefnId::next(), Name::simple("f"), harness.roots.unit_type());
    init.locals_size = 4 * WORD_SIZE;
    init.instructions = asm.finish();
    init.block_offsets = vec![0];
    Function::new(init).unwrap()
}

/// A chain of `count` branch diamonds, each side allocating before the
/// paths re-join.
fn diamond_chain_function(harness: &Harness, count: usize) -> Function {
    let mut asm = BytecodeWriter::new();
    let mut block_offsets = Vec::new();
    for i in 0..count {
        let base = (i * 4) as i64;
        // header
        block_offsets.push(asm.offset() as u32);
        asm.op(Opcode::True);
        asm.op(Opcode::BranchIf).vbn(base + 1).vbn(base + 2);
        // left
        block_offsets.push(asm.offset() as u32);
        asm.op(Opcode::AllocObj).vbn(BuiltinId::STRING_CLASS.raw());
        asm.op(Opcode::Drop);
        asm.op(Opcode::Branch).vbn(base + 3);
        // right
        block_offsets.push(asm.offset() as u32);
        asm.op(Opcode::AllocObj).vbn(BuiltinId::STRING_CLASS.raw());
        asm.op(Opcode::Drop);
        asm.op(Opcode::Branch).vbn(base + 3);
        // join: falls through to the next header (or the tail).
        block_offsets.push(asm.offset() as u32);
        asm.op(Opcode::Branch).vbn(base + 4);
    }
    block_offsets.push(asm.offset() as u32);
    asm.op(Opcode::Unit).op(Opcode::Ret);

    let mut init = FunctionInit::new(DefnId::next(), Name::simple("f"), harness.roots.unit_type());
    init.locals_size = 2 * WORD_SIZE;
    init.instructions = asm.finish();
    init.block_offsets = block_offsets;
    Function::new(init).unwrap()
}

fn bench_build_map(c: &mut Criterion) {
    let harness = harness();
    let config = BuildConfig {
        verify_joins: false,
    };

    let mut group = c.benchmark_group("build_map");
    for count in [16usize, 256] {
        let alloc_fn = alloc_heavy_function(&harness, count);
        group.bench_function(format!("alloc_heavy/{}", count), |b| {
            b.iter(|| {
                build_stack_pointer_map(
                    black_box(&alloc_fn),
                    &harness.package,
                    &harness.roots,
                    &harness.registry,
                    &config,
                )
                .unwrap()
            })
        });

        let diamond_fn = diamond_chain_function(&harness, count);
        group.bench_function(format!("diamond_chain/{}", count), |b| {
            b.iter(|| {
                build_stack_pointer_map(
                    black_box(&diamond_fn),
                    &harness.package,
                    &harness.roots,
                    &harness.registry,
                    &config,
                )
                .unwrap()
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_build_map);
criterion_main!(benches);
