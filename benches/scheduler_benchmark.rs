//! Task Graph and Scheduler Benchmarks
//!
//! Comparing:
//! - Cell-tree rebuild cost across particle counts
//! - Task graph construction cost
//! - Drain throughput (tasks/second) across worker counts

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use swift_scheduler::cell::{Cell, CellArena};
use swift_scheduler::graph::{PassMask, TaskGraph};
use swift_scheduler::scheduler::{allow_all, Scheduler};
use swift_scheduler::CellId;

fn random_positions(count: usize, seed: u64) -> Vec<[f64; 3]> {
    let mut state = seed.wrapping_add(1);
    let mut next = move || {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        (state % 1_000_000) as f64 / 1_000_000.0
    };
    (0..count).map(|_| [next(), next(), next()]).collect()
}

fn build_tree(particle_count: usize) -> CellArena {
    let mut arena = CellArena::new();
    let mut root = Cell::new([0.0; 3], [1.0; 3]);
    root.count = particle_count;
    let root_id = arena.insert(root);

    let mut positions = random_positions(particle_count, 0xC0FFEE);
    let mut stack = vec![root_id];
    while let Some(id) = stack.pop() {
        if arena.get(id).count <= 400 {
            continue;
        }
        let children = arena.split(id, &mut positions, &mut |_, _| {});
        for child in children {
            stack.push(child);
        }
    }
    arena
}

fn build_graph(arena: &CellArena) -> TaskGraph {
    let mask = PassMask { density: true, force: true, gravity: true, ..Default::default() };
    TaskGraph::build(arena, &[CellId(0)], mask).expect("graph build over a valid tree")
}

fn drain(scheduler: &Scheduler, n_workers: usize) -> usize {
    scheduler.start();
    let mut completed = 0;
    let mut worker = 0;
    loop {
        match scheduler.get_task(worker) {
            Some(id) => {
                scheduler.done(id, worker);
                completed += 1;
            }
            None => {
                if scheduler.is_drained() {
                    break;
                }
            }
        }
        worker = (worker + 1) % n_workers.max(1);
    }
    completed
}

fn bench_tree_rebuild(c: &mut Criterion) {
    let mut group = c.benchmark_group("tree_rebuild");
    for particle_count in [1_000usize, 10_000, 100_000].iter() {
        group.bench_with_input(
            BenchmarkId::new("rebuild", particle_count),
            particle_count,
            |b, &n| {
                b.iter(|| black_box(build_tree(n)));
            },
        );
    }
    group.finish();
}

fn bench_graph_construction(c: &mut Criterion) {
    let mut group = c.benchmark_group("graph_construction");
    for particle_count in [1_000usize, 10_000, 100_000].iter() {
        let arena = build_tree(*particle_count);
        group.bench_with_input(
            BenchmarkId::new("build", particle_count),
            particle_count,
            |b, _| {
                b.iter(|| black_box(build_graph(&arena)));
            },
        );
    }
    group.finish();
}

fn bench_drain_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("drain_throughput");
    let arena = build_tree(20_000);

    for n_workers in [1usize, 2, 4, 8].iter() {
        group.bench_with_input(
            BenchmarkId::new("workers", n_workers),
            n_workers,
            |b, &w| {
                b.iter_batched(
                    || build_graph(&arena),
                    |graph| {
                        let sched = Scheduler::new(graph, w, allow_all);
                        black_box(drain(&sched, w));
                    },
                    criterion::BatchSize::LargeInput,
                );
            },
        );
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_tree_rebuild,
    bench_graph_construction,
    bench_drain_throughput,
);

criterion_main!(benches);
