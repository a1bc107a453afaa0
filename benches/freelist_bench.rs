use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use qalloc::{DynamicMemory, FreeList, FreeNode, GlobalStatistics, MemoryTag, Pool};
use std::sync::Arc;

/// Allocate then free one block with a varying number of live holes ahead of it
fn bench_freelist_first_fit(c: &mut Criterion) {
    let mut group = c.benchmark_group("freelist_first_fit");
    const TOTAL: u64 = 4 * 1024 * 1024;

    for holes in [0u64, 16, 128, 512].iter() {
        group.bench_with_input(BenchmarkId::new("alloc_free", holes), holes, |b, &holes| {
            let mut nodes = vec![FreeNode::default(); FreeList::node_count_for(TOTAL)];
            let mut list = FreeList::create(&mut nodes, TOTAL).unwrap();
            // Small holes that a 256-byte request must skip.
            let blocks: Vec<u64> = (0..holes * 2).map(|_| list.allocate(64).unwrap()).collect();
            for offset in blocks.iter().step_by(2) {
                list.free(64, *offset).unwrap();
            }

            b.iter(|| {
                let offset = list.allocate(black_box(256)).unwrap();
                list.free(256, offset).unwrap();
            });
        });
    }

    group.finish();
}

/// Pool chunk churn, raw and through the instrumented allocator
fn bench_pool(c: &mut Criterion) {
    let mut group = c.benchmark_group("pool");

    group.bench_function("raw_alloc_free", |b| {
        let mut pool = Pool::new(64, 1024).unwrap();
        b.iter(|| {
            let p = pool.alloc().unwrap();
            pool.free(black_box(p)).unwrap();
        });
    });

    group.bench_function("allocator_alloc_free", |b| {
        let mut alloc = qalloc::Allocator::from_pool(
            Pool::new(64, 1024).unwrap(),
            Arc::new(GlobalStatistics::new()),
        );
        b.iter(|| {
            let p = alloc.alloc(black_box(48), MemoryTag::Entity).unwrap();
            alloc.free(p, 48, MemoryTag::Entity).unwrap();
        });
    });

    group.finish();
}

/// Mixed-size traffic on DynamicMemory
fn bench_dynamic_mixed(c: &mut Criterion) {
    c.bench_function("dynamic_mixed_sizes", |b| {
        let mut mem = DynamicMemory::new(16 * 1024 * 1024).unwrap();
        let sizes = [32usize, 4096, 128, 65536, 512, 16];
        b.iter(|| {
            let ptrs: Vec<_> = sizes.iter().map(|&s| (mem.alloc(s).unwrap(), s)).collect();
            for (p, s) in ptrs.into_iter().rev() {
                mem.free(p, s).unwrap();
            }
        });
    });
}

criterion_group!(benches, bench_freelist_first_fit, bench_pool, bench_dynamic_mixed);
criterion_main!(benches);
