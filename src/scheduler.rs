//! Scheduler (§4.3): owns the task pool and per-worker queues, and turns a
//! built [`TaskGraph`] into a running dataflow.

use crate::cell::CellArena;
use crate::graph::TaskGraph;
use crate::queue::QueueSet;
use crate::task::{Task, TaskType};
use crate::types::TaskId;
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::debug;

/// Which (type, subtype) combinations should actually run this step; all
/// other tasks are dropped at enqueue time without touching their
/// dependencies (§4.3 mask-based step filtering).
pub type StepFilter = fn(&Task) -> bool;

/// Owns the task pool, queue set, and the `waiting` counter that gates the
/// sleep condition workers block on between bursts of available work.
pub struct Scheduler {
    graph: Mutex<TaskGraph>,
    queues: QueueSet,
    waiting: AtomicUsize,
    owners: Mutex<std::collections::HashMap<crate::types::CellId, usize>>,
    sleep: Condvar,
    sleep_lock: Mutex<()>,
    filter: StepFilter,
}

impl Scheduler {
    /// Build a scheduler over an already-constructed task graph.
    pub fn new(graph: TaskGraph, n_workers: usize, filter: StepFilter) -> Self {
        Self {
            graph: Mutex::new(graph),
            queues: QueueSet::new(n_workers.max(1)),
            waiting: AtomicUsize::new(0),
            owners: Mutex::new(Default::default()),
            sleep: Condvar::new(),
            sleep_lock: Mutex::new(()),
            filter,
        }
    }

    /// Number of workers this scheduler was built for.
    pub fn n_workers(&self) -> usize {
        self.queues.workers.len()
    }

    /// §4.3 "start": reset waits, compute in-degree, seed every ready task
    /// (masked-out or not) into its proper fate, then wake sleeping workers.
    ///
    /// Every task — whether it will actually run or is `skip` (masked out by
    /// `filter`, or already dead from `TaskGraph::split_recursive`) — gets
    /// exactly one completion event: [`Self::done`] for a real task, or
    /// [`Self::finish_skipped`] for a skip. `waiting` is the count of tasks
    /// still owed that event, so it starts at the total task count, not just
    /// the non-skip count; routing skip tasks through `enqueue` (rather than
    /// dropping them) is what makes their successors' `wait` actually reach
    /// zero.
    pub fn start(&self) {
        let mut graph = self.graph.lock();
        let n = graph.tasks.len();
        for i in 0..n {
            if !(self.filter)(&graph.tasks[i]) {
                graph.tasks[i].skip = true;
            }
        }
        let mut ready = Vec::new();
        for i in 0..n {
            graph.tasks[i].wait = graph.tasks[i].wait.max(1) - 1;
            if graph.tasks[i].wait == 0 {
                ready.push(TaskId(i as u32));
            }
        }
        self.waiting.store(n, Ordering::SeqCst);
        drop(graph);
        for t in ready {
            self.enqueue(t);
        }
        self.sleep.notify_all();
    }

    /// Route a ready task to a queue (§4.3 enqueue policy).
    pub fn enqueue(&self, id: TaskId) {
        let mut graph = self.graph.lock();
        let task = graph.tasks[id.0 as usize].clone();
        if task.skip {
            self.finish_skipped(&mut graph, id);
            return;
        }
        drop(graph);

        match task.ttype {
            TaskType::Send => self.queues.send.push(id),
            TaskType::Recv => self.queues.recv.push(id),
            TaskType::Pair | TaskType::SubPair => {
                let ci_owner = self.owner_of(task.ci);
                let cj_owner = task.cj.map(|c| self.owner_of(c)).unwrap_or(ci_owner);
                let target = if self.queues.workers[ci_owner].len()
                    <= self.queues.workers[cj_owner].len()
                {
                    ci_owner
                } else {
                    cj_owner
                };
                self.queues.workers[target].push(id);
            }
            _ => {
                let owner = self.owner_of(task.ci);
                self.queues.workers[owner].push(id);
            }
        }
    }

    fn owner_of(&self, cell: crate::types::CellId) -> usize {
        let mut owners = self.owners.lock();
        let n = self.queues.workers.len();
        *owners.entry(cell).or_insert_with(|| {
            // First touch: clock-salted fallback, consistent with queue.rs's
            // no-extra-dependency stealing RNG.
            (cell.0 as usize).wrapping_mul(2654435761) % n.max(1)
        })
    }

    /// Record which worker most recently ran a task's primary cell, so
    /// future steps keep routing it to the same worker (cache locality).
    fn set_owner(&self, cell: crate::types::CellId, worker: usize) {
        self.owners.lock().insert(cell, worker);
    }

    /// A worker's get-task call: own queue, then steal, then sleep if the
    /// scheduler has no outstanding work at all (§4.3, §4.4).
    pub fn get_task(&self, worker: usize) -> Option<TaskId> {
        loop {
            if let Some(t) = self.queues.get_task(worker) {
                return Some(t);
            }
            if self.waiting.load(Ordering::SeqCst) == 0 {
                return None;
            }
            let guard = self.sleep_lock.lock();
            let mut guard = guard;
            self.sleep.wait_for(&mut guard, std::time::Duration::from_millis(5));
            if self.waiting.load(Ordering::SeqCst) == 0 {
                return None;
            }
        }
    }

    /// §4.3 "done": propagate completion to successors, decrementing
    /// `waiting`, and wake sleepers.
    pub fn done(&self, id: TaskId, worker: usize) {
        let mut graph = self.graph.lock();
        let ci = graph.tasks[id.0 as usize].ci;
        let unlocks = graph.tasks[id.0 as usize].unlocks.clone();
        let mut ready = Vec::new();
        for s in unlocks {
            let t = &mut graph.tasks[s.0 as usize];
            if t.wait == 0 {
                continue;
            }
            t.wait -= 1;
            if t.wait == 0 {
                ready.push(s);
            }
        }
        drop(graph);

        self.set_owner(ci, worker);
        for r in ready {
            self.enqueue(r);
        }
        let remaining = self.waiting.fetch_sub(1, Ordering::SeqCst) - 1;
        debug!(task = %id, remaining, "task done");
        self.sleep.notify_all();
    }

    fn finish_skipped(&self, graph: &mut TaskGraph, id: TaskId) {
        let unlocks = graph.tasks[id.0 as usize].unlocks.clone();
        let mut ready = Vec::new();
        for s in unlocks {
            let t = &mut graph.tasks[s.0 as usize];
            if t.wait == 0 {
                continue;
            }
            t.wait -= 1;
            if t.wait == 0 {
                ready.push(s);
            }
        }
        self.waiting.fetch_sub(1, Ordering::SeqCst);
        for r in ready {
            self.enqueue(r);
        }
    }

    /// Whether every non-skipped task has run (§8 completion property).
    pub fn is_drained(&self) -> bool {
        self.waiting.load(Ordering::SeqCst) == 0
    }

    /// Borrow the underlying graph (for inspection/testing).
    pub fn graph(&self) -> parking_lot::MutexGuard<'_, TaskGraph> {
        self.graph.lock()
    }
}

/// Always-run filter used outside of masked passes (dry runs, tests).
pub fn allow_all(_: &Task) -> bool {
    true
}

/// Placeholder top-level cell list builder used by callers that already
/// have an arena; kept here so `engine.rs` doesn't need to reach into
/// `cell` internals directly for the common "every top cell" case.
pub fn all_top_cells(arena: &CellArena, top_count: usize) -> Vec<crate::types::CellId> {
    (0..top_count.min(arena.len()))
        .map(|i| crate::types::CellId(i as u32))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::{Cell, CellArena};
    use crate::graph::{PassMask, TaskGraph};

    fn single_cell_graph() -> (CellArena, TaskGraph) {
        let mut arena = CellArena::new();
        let mut c = Cell::new([0.0; 3], [1.0; 3]);
        c.count = 8;
        let id = arena.insert(c);
        let g = TaskGraph::build(&arena, &[id], PassMask { density: true, ..Default::default() }).unwrap();
        (arena, g)
    }

    #[test]
    fn start_and_drain_completes_every_task() {
        let (_arena, graph) = single_cell_graph();
        let n = graph.tasks.len();
        let sched = Scheduler::new(graph, 2, allow_all);
        sched.start();

        let mut completed = 0;
        'outer: loop {
            for w in 0..sched.n_workers() {
                match sched.get_task(w) {
                    Some(id) => {
                        sched.done(id, w);
                        completed += 1;
                    }
                    None => {
                        if sched.is_drained() {
                            break 'outer;
                        }
                    }
                }
            }
        }
        assert_eq!(completed, n);
        assert!(sched.is_drained());
    }

    #[test]
    fn masked_out_tasks_are_skipped_without_running() {
        let (_arena, graph) = single_cell_graph();
        fn no_ghost(t: &Task) -> bool {
            !matches!(t.ttype, TaskType::Ghost)
        }
        let sched = Scheduler::new(graph, 1, no_ghost);
        sched.start();
        let mut ran = Vec::new();
        while let Some(id) = sched.get_task(0) {
            ran.push(sched.graph().tasks[id.0 as usize].ttype);
            sched.done(id, 0);
        }
        assert!(!ran.contains(&TaskType::Ghost));
        assert!(sched.is_drained());
    }
}
