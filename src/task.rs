//! Task graph node (§3) — mirrors the engine's `task_type`/`task_subtype`
//! enums and the `task` struct layout.

use crate::types::CellId;
use serde::{Deserialize, Serialize};

/// Kind of work a task performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskType {
    /// Sort a cell's particles along a set of directions.
    Sort,
    /// Self-interaction within one cell.
    Self_,
    /// Pair interaction between two cells.
    Pair,
    /// Deferred self-recursion, expanded by the runner.
    SubSelf,
    /// Deferred pair-recursion, expanded by the runner.
    SubPair,
    /// Per-cell setup before the density pass.
    Init,
    /// Hierarchical sync point between density and force passes.
    Ghost,
    /// Extra sync point between gradient and force passes.
    ExtraGhost,
    /// Time integration kick.
    Kick,
    /// Send to a remote rank.
    Send,
    /// Receive from a remote rank.
    Recv,
    /// Upward multipole propagation.
    GravUp,
    /// Long-range multipole-multipole interaction.
    GravMM,
    /// Gather step before the long-range FFT.
    GravGather,
    /// Long-range gravity FFT.
    GravFFT,
    /// External (analytic) gravity field.
    GravExternal,
    /// Radiative cooling.
    Cooling,
    /// Source terms (e.g. feedback).
    SourceTerms,
}

/// Physics pass a task belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskSubtype {
    /// No specific subtype (hierarchy/MPI tasks).
    None,
    /// Density pass.
    Density,
    /// Gradient pass (second hydro loop, only with a gradient scheme).
    Gradient,
    /// Force pass.
    Force,
    /// Gravity pass.
    Grav,
    /// `send`/`recv` of end-of-step data (`tend`).
    Tend,
}

/// Which particle arrays a task acts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskAction {
    /// Touches nothing directly (hierarchy bookkeeping).
    None,
    /// Touches `parts`.
    Part,
    /// Touches `gparts`.
    GPart,
    /// Touches every array.
    All,
    /// Touches only multipole data.
    Multipole,
}

impl TaskType {
    /// The particle arrays this task type acts on, used to pick which lock(s)
    /// a runner must hold before dispatch (§4.1 lock protocol).
    pub fn action(self) -> TaskAction {
        use TaskType::*;
        match self {
            Sort | Self_ | Pair | SubSelf | SubPair | Init | Ghost | ExtraGhost | Kick
            | Cooling | SourceTerms => TaskAction::Part,
            GravUp | GravMM | GravGather | GravFFT | GravExternal => TaskAction::GPart,
            Send | Recv => TaskAction::All,
        }
    }

    /// Whether this task type never runs a kernel itself and merely
    /// propagates completion to its successors (§3 task lifecycle).
    pub fn is_implicit(self) -> bool {
        matches!(self, TaskType::GravGather)
    }
}

/// A node in the task dependency graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Kind of work.
    pub ttype: TaskType,
    /// Physics pass.
    pub subtype: TaskSubtype,
    /// Primary cell.
    pub ci: CellId,
    /// Secondary cell, for pair-shaped tasks.
    pub cj: Option<CellId>,
    /// Sort-direction bitset (sort tasks) or sid (pair tasks) or MPI tag
    /// (send/recv tasks).
    pub flags: i32,
    /// Owning rank, for tasks whose cells are not all local.
    pub rank: i32,
    /// Estimated cost, set by the weighting pass (§4.2 step 11).
    pub weight: f32,
    /// Topological rank assigned by Kahn's algorithm (§4.2 step 10).
    pub tree_rank: i32,
    /// Outstanding in-degree; the task is ready when this reaches zero.
    pub wait: u32,
    /// Successor task indices (populated during unlock compaction).
    pub unlocks: Vec<crate::types::TaskId>,
    /// Whether this task should be dropped without running (outside the
    /// current (type,subtype) mask, or empty cells).
    pub skip: bool,
    /// Whether this pair was split from a "tight" parent (both cells'
    /// `h_max` comfortably smaller than cell width) — affects splitting
    /// heuristics only.
    pub tight: bool,
    /// Whether this task completes instantly without holding any cell lock.
    pub implicit: bool,
    /// Start tick, recorded by the runner.
    pub tic: u64,
    /// End tick, recorded by the runner.
    pub toc: u64,
}

impl Task {
    /// Construct a new task with no dependents yet.
    pub fn new(ttype: TaskType, subtype: TaskSubtype, ci: CellId, cj: Option<CellId>) -> Self {
        let implicit = ttype.is_implicit();
        Self {
            ttype,
            subtype,
            ci,
            cj,
            flags: 0,
            rank: 0,
            weight: 0.0,
            tree_rank: -1,
            wait: 1,
            unlocks: Vec::new(),
            skip: false,
            tight: false,
            implicit,
            tic: 0,
            toc: 0,
        }
    }

    /// Whether two tasks could legitimately run concurrently without
    /// touching a shared cell (mirrors `task_overlap`: false means they are
    /// independent, true means a lock conflict is possible).
    pub fn overlaps(&self, other: &Task) -> bool {
        let mine = [Some(self.ci), self.cj];
        let theirs = [Some(other.ci), other.cj];
        mine.iter()
            .flatten()
            .any(|a| theirs.iter().flatten().any(|b| a == b))
    }

    /// Duration recorded by the runner, in ticks.
    pub fn duration(&self) -> u64 {
        self.toc.saturating_sub(self.tic)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(ci: u32, cj: Option<u32>) -> Task {
        Task::new(
            TaskType::Pair,
            TaskSubtype::Density,
            CellId(ci),
            cj.map(CellId),
        )
    }

    #[test]
    fn overlapping_tasks_share_a_cell() {
        assert!(t(1, Some(2)).overlaps(&t(2, Some(3))));
        assert!(!t(1, Some(2)).overlaps(&t(3, Some(4))));
    }

    #[test]
    fn gather_is_implicit() {
        let task = Task::new(TaskType::GravGather, TaskSubtype::Grav, CellId(0), None);
        assert!(task.implicit);
    }

    #[test]
    fn action_routes_send_recv_to_all() {
        assert_eq!(TaskType::Send.action(), TaskAction::All);
        assert_eq!(TaskType::Self_.action(), TaskAction::Part);
        assert_eq!(TaskType::GravMM.action(), TaskAction::GPart);
    }
}
