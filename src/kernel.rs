//! Pluggable physics kernels (§1 non-goals: the kernels themselves are out
//! of scope; the scheduler only needs something to dispatch to).
//!
//! A `KernelSet` holds one `Arc<dyn Kernel>` per physics pass, so a caller
//! can plug in real density/force/gravity math without touching the runner
//! or scheduler.

use crate::cell::CellArena;
use crate::error::Result;
use crate::particle::ParticleSet;
use crate::sid::{needs_swap, sid_from_offset};
use crate::task::{Task, TaskSubtype, TaskType};
use crate::types::CellId;
use std::sync::Arc;

/// A pairwise or self interaction kernel invoked by the runner.
pub trait Kernel: Send + Sync {
    /// Run the kernel against `ci` alone.
    fn run_self(&self, ci: &crate::cell::Cell, particles: &mut ParticleSet) -> Result<()>;

    /// Run the kernel against the `ci`/`cj` pair along sort direction `sid`.
    fn run_pair(
        &self,
        ci: &crate::cell::Cell,
        cj: &crate::cell::Cell,
        sid: usize,
        particles: &mut ParticleSet,
    ) -> Result<()>;
}

/// A kernel that does nothing, used when a pass has no registered physics
/// (e.g. running the scheduler in isolation for graph/lock tests, §8).
#[derive(Debug, Default)]
pub struct NoopKernel;

impl Kernel for NoopKernel {
    fn run_self(&self, _ci: &crate::cell::Cell, _particles: &mut ParticleSet) -> Result<()> {
        Ok(())
    }

    fn run_pair(
        &self,
        _ci: &crate::cell::Cell,
        _cj: &crate::cell::Cell,
        _sid: usize,
        _particles: &mut ParticleSet,
    ) -> Result<()> {
        Ok(())
    }
}

/// One kernel per physics pass, dispatched by `(type, subtype)`.
pub struct KernelSet {
    /// Density pass kernel.
    pub density: Arc<dyn Kernel>,
    /// Gradient pass kernel.
    pub gradient: Arc<dyn Kernel>,
    /// Force pass kernel.
    pub force: Arc<dyn Kernel>,
    /// Gravity kernel.
    pub grav: Arc<dyn Kernel>,
}

impl Default for KernelSet {
    fn default() -> Self {
        let noop: Arc<dyn Kernel> = Arc::new(NoopKernel);
        Self {
            density: noop.clone(),
            gradient: noop.clone(),
            force: noop.clone(),
            grav: noop,
        }
    }
}

impl KernelSet {
    /// Dispatch `task` to the kernel for its subtype. Hierarchy task types
    /// (init/ghost/kick/sort/...) have no kernel — the runner handles them
    /// directly (§4.4).
    pub fn dispatch(
        &self,
        task: &Task,
        arena: &CellArena,
        particles: &mut ParticleSet,
    ) -> Result<()> {
        let kernel: &Arc<dyn Kernel> = match task.subtype {
            TaskSubtype::Density => &self.density,
            TaskSubtype::Gradient => &self.gradient,
            TaskSubtype::Force => &self.force,
            TaskSubtype::Grav => &self.grav,
            TaskSubtype::Tend | TaskSubtype::None => return Ok(()),
        };
        match task.ttype {
            TaskType::Self_ => kernel.run_self(arena.get(task.ci), particles),
            TaskType::SubSelf => Self::dispatch_sub_self(kernel, arena, task.ci, particles),
            TaskType::Pair => {
                if let Some(cj) = task.cj {
                    kernel.run_pair(arena.get(task.ci), arena.get(cj), task.flags as usize, particles)
                } else {
                    Ok(())
                }
            }
            TaskType::SubPair => {
                if let Some(cj) = task.cj {
                    Self::dispatch_sub_pair(kernel, arena, task.ci, cj, task.flags as usize, particles)
                } else {
                    Ok(())
                }
            }
            _ => Ok(()),
        }
    }

    /// A deferred self-task (§4.4 sub_self) recurses into each non-empty
    /// child's own self-task, plus the pair between every non-empty pair of
    /// children, following the same split+tight gate `graph.rs` uses at
    /// construction time, bottoming out at `run_self` once a cell is no
    /// longer both split and tight.
    fn dispatch_sub_self(
        kernel: &Arc<dyn Kernel>,
        arena: &CellArena,
        ci: CellId,
        particles: &mut ParticleSet,
    ) -> Result<()> {
        let cell = arena.get(ci);
        if !(cell.split && cell.is_tight()) {
            return kernel.run_self(cell, particles);
        }
        let live: Vec<CellId> = cell
            .progeny
            .into_iter()
            .filter(|c| !c.is_none() && arena.get(*c).count > 0)
            .collect();
        for &c in &live {
            Self::dispatch_sub_self(kernel, arena, c, particles)?;
        }
        for i in 0..live.len() {
            for &cq in &live[i + 1..] {
                let cp = live[i];
                if let Some((dx, dy, dz)) = arena.offset_between(cp, cq) {
                    if dx.abs() > 1 || dy.abs() > 1 || dz.abs() > 1 {
                        continue;
                    }
                    if let Some(sid) = sid_from_offset(dx, dy, dz) {
                        let (a, b) = if needs_swap(dx, dy, dz) { (cq, cp) } else { (cp, cq) };
                        Self::dispatch_sub_pair(kernel, arena, a, b, sid, particles)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// A deferred pair-task (§4.4 sub_pair) recurses into the cross product
    /// of child pairs, following the same offset/sid invariants `graph.rs`'s
    /// `expand_pair` uses at construction time, until both sides bottom out
    /// at a leaf or non-tight cell and `run_pair` actually fires.
    fn dispatch_sub_pair(
        kernel: &Arc<dyn Kernel>,
        arena: &CellArena,
        ci: CellId,
        cj: CellId,
        sid: usize,
        particles: &mut ParticleSet,
    ) -> Result<()> {
        let (ci_cell, cj_cell) = (arena.get(ci), arena.get(cj));
        if !(ci_cell.split && cj_cell.split && ci_cell.is_tight() && cj_cell.is_tight()) {
            return kernel.run_pair(ci_cell, cj_cell, sid, particles);
        }
        let ci_children = ci_cell.progeny;
        let cj_children = cj_cell.progeny;
        for &cp in ci_children.iter().filter(|c| !c.is_none() && arena.get(*c).count > 0) {
            for &cq in cj_children.iter().filter(|c| !c.is_none() && arena.get(*c).count > 0) {
                if let Some((dx, dy, dz)) = arena.offset_between(cp, cq) {
                    if dx.abs() > 1 || dy.abs() > 1 || dz.abs() > 1 {
                        continue;
                    }
                    if let Some(child_sid) = sid_from_offset(dx, dy, dz) {
                        let (a, b) = if needs_swap(dx, dy, dz) { (cq, cp) } else { (cp, cq) };
                        Self::dispatch_sub_pair(kernel, arena, a, b, child_sid, particles)?;
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::Cell;

    #[test]
    fn noop_kernel_dispatch_never_errors() {
        let kernels = KernelSet::default();
        let mut arena = CellArena::new();
        let id = arena.insert(Cell::new([0.0; 3], [1.0; 3]));
        let task = Task::new(TaskType::Self_, TaskSubtype::Density, id, None);
        let mut particles = ParticleSet::new();
        assert!(kernels.dispatch(&task, &arena, &mut particles).is_ok());
    }

    #[test]
    fn sub_self_dispatch_recurses_into_children_and_their_pair() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        #[derive(Default)]
        struct CountingKernel {
            self_calls: AtomicUsize,
            pair_calls: AtomicUsize,
        }
        impl Kernel for CountingKernel {
            fn run_self(&self, _ci: &Cell, _particles: &mut ParticleSet) -> Result<()> {
                self.self_calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            fn run_pair(
                &self,
                _ci: &Cell,
                _cj: &Cell,
                _sid: usize,
                _particles: &mut ParticleSet,
            ) -> Result<()> {
                self.pair_calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }

        let mut arena = CellArena::new();
        let mut parent = Cell::new([0.0; 3], [1.0; 3]);
        parent.split = true;
        parent.count = 2;
        let parent_id = arena.insert(parent);

        let mut c0 = Cell::new([0.0, 0.0, 0.0], [0.5, 0.5, 0.5]);
        c0.count = 1;
        let c0_id = arena.insert(c0);
        let mut c1 = Cell::new([0.5, 0.0, 0.0], [0.5, 0.5, 0.5]);
        c1.count = 1;
        let c1_id = arena.insert(c1);
        arena.get_mut(parent_id).progeny[0] = c0_id;
        arena.get_mut(parent_id).progeny[1] = c1_id;

        let counting = Arc::new(CountingKernel::default());
        let kernel: Arc<dyn Kernel> = counting.clone();
        let mut particles = ParticleSet::new();
        KernelSet::dispatch_sub_self(&kernel, &arena, parent_id, &mut particles).unwrap();

        assert_eq!(counting.self_calls.load(Ordering::SeqCst), 2);
        assert_eq!(counting.pair_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn sub_pair_dispatch_falls_through_to_run_pair_at_leaves() {
        let kernels = KernelSet::default();
        let mut arena = CellArena::new();
        let ci = arena.insert(Cell::new([0.0, 0.0, 0.0], [1.0; 3]));
        let cj = arena.insert(Cell::new([1.0, 0.0, 0.0], [1.0; 3]));
        let mut task = Task::new(TaskType::SubPair, TaskSubtype::Density, ci, Some(cj));
        task.flags = 0;
        let mut particles = ParticleSet::new();
        assert!(kernels.dispatch(&task, &arena, &mut particles).is_ok());
    }

    #[test]
    fn hierarchy_task_dispatch_is_a_noop() {
        let kernels = KernelSet::default();
        let mut arena = CellArena::new();
        let id = arena.insert(Cell::new([0.0; 3], [1.0; 3]));
        let task = Task::new(TaskType::Ghost, TaskSubtype::None, id, None);
        let mut particles = ParticleSet::new();
        assert!(kernels.dispatch(&task, &arena, &mut particles).is_ok());
    }
}
