//! Cell Tree and Task Graph Benchmark
//!
//! Run with: cargo run --release --example cell_tree_benchmark

use swift_scheduler::cell::{Cell, CellArena};
use swift_scheduler::graph::{PassMask, TaskGraph};
use swift_scheduler::scheduler::{allow_all, Scheduler};
use std::time::Instant;

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

fn build_tree(particle_count: usize, split_threshold: usize) -> (CellArena, usize) {
    let mut arena = CellArena::new();
    let mut root = Cell::new([0.0; 3], [1.0; 3]);
    root.count = particle_count;
    let root_id = arena.insert(root);

    let mut positions = random_positions(particle_count, 0xC0FFEE);
    let mut stack = vec![root_id];
    let mut splits = 0;
    while let Some(id) = stack.pop() {
        if arena.get(id).count <= split_threshold {
            continue;
        }
        let children = arena.split(id, &mut positions, &mut |_, _| {});
        splits += 1;
        for child in children {
            stack.push(child);
        }
    }
    (arena, splits)
}

fn drain(scheduler: &Scheduler) -> usize {
    scheduler.start();
    let mut completed = 0;
    loop {
        match scheduler.get_task(0) {
            Some(id) => {
                scheduler.done(id, 0);
                completed += 1;
            }
            None => {
                if scheduler.is_drained() {
                    break;
                }
            }
        }
    }
    completed
}

fn main() {
    println!("cell tree + task graph benchmark");
    println!();

    for &particle_count in &[1_000usize, 10_000, 100_000] {
        let build_start = Instant::now();
        let (arena, splits) = build_tree(particle_count, 400);
        let build_time = build_start.elapsed();

        let graph_start = Instant::now();
        let mask = PassMask { density: true, force: true, gravity: true, ..Default::default() };
        let graph = TaskGraph::build(&arena, &[swift_scheduler::CellId(0)], mask)
            .expect("graph build should succeed over a freshly split tree");
        let graph_time = graph_start.elapsed();
        let n_tasks = graph.tasks.len();

        let sched = Scheduler::new(graph, 4, allow_all);
        let drain_start = Instant::now();
        let completed = drain(&sched);
        let drain_time = drain_start.elapsed();

        println!(
            "{particle_count:>7} particles: {splits:>4} splits, {n_tasks:>5} tasks \
             (build {build_time:>8.2?}, graph {graph_time:>8.2?}, drain {drain_time:>8.2?}, \
             completed {completed})"
        );
    }
}
