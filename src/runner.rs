//! Runner (§4.4): the worker thread loop.

use crate::cell::CellArena;
use crate::kernel::KernelSet;
use crate::particle::ParticleSet;
use crate::scheduler::Scheduler;
use crate::task::{Task, TaskAction, TaskType};
use tracing::trace;

/// Everything a runner needs to execute one step against a shared scheduler.
pub struct Runner<'a> {
    /// This runner's worker index, used for queue ownership and stealing.
    pub id: usize,
    scheduler: &'a Scheduler,
    arena: &'a CellArena,
    kernels: &'a KernelSet,
}

impl<'a> Runner<'a> {
    /// Build a runner bound to a scheduler, cell arena, and kernel set.
    pub fn new(id: usize, scheduler: &'a Scheduler, arena: &'a CellArena, kernels: &'a KernelSet) -> Self {
        Self { id, scheduler, arena, kernels }
    }

    /// Drain the scheduler until no task is available and no one is
    /// waiting (§4.4). Returns the number of tasks this runner executed.
    pub fn run(&self, particles: &mut ParticleSet) -> usize {
        let mut executed = 0;
        loop {
            let Some(task_id) = self.scheduler.get_task(self.id) else {
                break;
            };
            let requeued = {
                let mut graph = self.scheduler.graph();
                let task = graph.tasks[task_id.0 as usize].clone();
                drop(graph);
                if !self.try_lock(&task) {
                    true
                } else {
                    self.dispatch_and_release(&task, particles);
                    false
                }
            };
            if requeued {
                self.scheduler.enqueue(task_id);
                continue;
            }
            self.scheduler.done(task_id, self.id);
            executed += 1;
        }
        executed
    }

    /// Attempt to acquire whichever locks `task`'s action requires. On
    /// partial failure (pair tasks needing both cells), release anything
    /// already taken and report failure so the caller re-queues instead of
    /// spinning (§5 deadlock avoidance: fixed lock order by pointer/id
    /// compare, release-on-fail rather than block).
    fn try_lock(&self, task: &Task) -> bool {
        if task.implicit {
            return true;
        }
        let cells: Vec<_> = std::iter::once(task.ci).chain(task.cj).collect();
        let mut sorted = cells.clone();
        sorted.sort();

        let lock_fn: fn(&CellArena, crate::types::CellId) -> bool = match task.ttype.action() {
            TaskAction::GPart => CellArena::try_lock_gparts,
            _ => CellArena::try_lock_parts,
        };
        let unlock_fn: fn(&CellArena, crate::types::CellId) = match task.ttype.action() {
            TaskAction::GPart => CellArena::unlock_gparts,
            _ => CellArena::unlock_parts,
        };

        let mut acquired = Vec::new();
        for &c in &sorted {
            if lock_fn(self.arena, c) {
                acquired.push(c);
            } else {
                for a in acquired {
                    unlock_fn(self.arena, a);
                }
                return false;
            }
        }
        true
    }

    fn dispatch_and_release(&self, task: &Task, particles: &mut ParticleSet) {
        trace!(ttype = ?task.ttype, ci = %task.ci, "running task");
        match task.ttype {
            TaskType::Init | TaskType::Ghost | TaskType::ExtraGhost | TaskType::Kick
            | TaskType::Cooling | TaskType::SourceTerms | TaskType::GravUp | TaskType::GravMM
            | TaskType::GravGather | TaskType::GravFFT | TaskType::GravExternal
            | TaskType::Sort | TaskType::Send | TaskType::Recv => {
                // Hierarchy/MPI bookkeeping: no kernel, the task's mere
                // completion is the point.
            }
            TaskType::Self_ | TaskType::Pair | TaskType::SubSelf | TaskType::SubPair => {
                let _ = self.kernels.dispatch(task, self.arena, particles);
            }
        }
        if !task.implicit {
            let action = task.ttype.action();
            let unlock_fn: fn(&CellArena, crate::types::CellId) = match action {
                TaskAction::GPart => CellArena::unlock_gparts,
                _ => CellArena::unlock_parts,
            };
            unlock_fn(self.arena, task.ci);
            if let Some(cj) = task.cj {
                unlock_fn(self.arena, cj);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::Cell;
    use crate::graph::{PassMask, TaskGraph};
    use crate::scheduler::allow_all;

    #[test]
    fn single_worker_drains_single_cell_graph() {
        let mut arena = CellArena::new();
        let mut c = Cell::new([0.0; 3], [1.0; 3]);
        c.count = 4;
        let id = arena.insert(c);
        let graph = TaskGraph::build(&arena, &[id], PassMask { density: true, ..Default::default() }).unwrap();
        let n = graph.tasks.len();
        let sched = Scheduler::new(graph, 1, allow_all);
        let kernels = KernelSet::default();
        sched.start();

        let runner = Runner::new(0, &sched, &arena, &kernels);
        let mut particles = ParticleSet::new();
        let executed = runner.run(&mut particles);

        assert_eq!(executed, n);
        assert!(sched.is_drained());
    }

    #[test]
    fn locks_are_released_after_each_task() {
        let mut arena = CellArena::new();
        let mut c = Cell::new([0.0; 3], [1.0; 3]);
        c.count = 4;
        let id = arena.insert(c);
        let graph = TaskGraph::build(&arena, &[id], PassMask { density: true, ..Default::default() }).unwrap();
        let sched = Scheduler::new(graph, 1, allow_all);
        let kernels = KernelSet::default();
        sched.start();
        let runner = Runner::new(0, &sched, &arena, &kernels);
        let mut particles = ParticleSet::new();
        runner.run(&mut particles);

        assert!(arena.try_lock_parts(id));
        arena.unlock_parts(id);
    }
}
