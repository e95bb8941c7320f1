//! Cell tree (§3, §4.1): recursive spatial decomposition, lock/hold
//! protocol, and sort indices.

use crate::error::{Result, SwiftError};
use crate::sid::NR_SID;
use crate::types::{CellId, Rank, TaskId};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicI32, Ordering};

/// Number of particles above which a cell is split during a rebuild.
pub const SPLIT_SIZE: usize = 400;
/// Safety factor applied to `h_max` when deciding whether a cell is "tight"
/// enough that its faces safely bound any neighbor search.
pub const STRETCH: f64 = 1.1;

/// One entry in a cell's sort array: a particle index and its projected
/// distance along the sort direction, ascending.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SortEntry {
    /// Index into the cell's local particle slice.
    pub index: u32,
    /// Projected distance along the sort direction.
    pub distance: f32,
}

/// A node in the cell tree. Stored in a [`CellArena`]; children/parent are
/// referenced by [`CellId`] rather than pointers (§9 re-architecture note).
#[derive(Debug)]
pub struct Cell {
    /// Lower corner of this cell's region.
    pub loc: [f64; 3],
    /// Width along each axis.
    pub width: [f64; 3],
    /// First index of this cell's slice into the gas particle array.
    pub begin: usize,
    /// Number of gas particles in this cell.
    pub count: usize,
    /// First index into the gravity particle array.
    pub gbegin: usize,
    /// Number of gravity particles.
    pub gcount: usize,
    /// Parent cell, or `CellId::NONE` at the root.
    pub parent: CellId,
    /// The eight children, populated iff `split`.
    pub progeny: [CellId; 8],
    /// Whether this cell has been split into `progeny`.
    pub split: bool,
    /// Largest smoothing length among this cell's particles (or its
    /// children's, after a reduction pass).
    pub h_max: f64,
    /// Largest particle displacement since the last rebuild.
    pub dx_max: f64,
    /// Owning rank; a cell is "local" iff this equals the engine's own rank.
    pub node_id: Rank,
    /// The shallowest ancestor (possibly self) that owns hierarchy tasks.
    pub super_cell: CellId,
    /// Bitmask of valid sort directions (bit `d` set iff `sorts[d]` is current).
    pub sorted: u16,
    /// Per-direction sort arrays, lazily populated by sort tasks.
    pub sorts: [Option<Vec<SortEntry>>; NR_SID],

    /// Hierarchy task shortcuts, set during task graph construction.
    pub init_task: Option<TaskId>,
    /// Ghost synchronization task.
    pub ghost_task: Option<TaskId>,
    /// Kick task.
    pub kick_task: Option<TaskId>,
    /// Single sort task covering all directions requested so far this step.
    pub sort_task: Option<TaskId>,

    hold: AtomicI32,
    parts_lock: Mutex<bool>,
    gparts_lock: Mutex<bool>,
}

impl Cell {
    /// A freshly constructed, unsplit leaf cell spanning `[loc, loc+width)`.
    pub fn new(loc: [f64; 3], width: [f64; 3]) -> Self {
        Self {
            loc,
            width,
            begin: 0,
            count: 0,
            gbegin: 0,
            gcount: 0,
            parent: CellId::NONE,
            progeny: [CellId::NONE; 8],
            split: false,
            h_max: 0.0,
            dx_max: 0.0,
            node_id: Rank::LOCAL,
            super_cell: CellId::NONE,
            sorted: 0,
            sorts: Default::default(),
            init_task: None,
            ghost_task: None,
            kick_task: None,
            sort_task: None,
            hold: AtomicI32::new(0),
            parts_lock: Mutex::new(false),
            gparts_lock: Mutex::new(false),
        }
    }

    /// Whether `p` (in box coordinates) lies within this cell's region,
    /// within `tol` of the cell faces (§3 partition invariant).
    pub fn contains(&self, p: [f64; 3], tol: f64) -> bool {
        (0..3).all(|d| p[d] >= self.loc[d] - tol && p[d] <= self.loc[d] + self.width[d] + tol)
    }

    /// Half the shortest edge, the radius within which this cell's
    /// 26-neighborhood safely bounds any interaction with `h_max`.
    pub fn min_half_width(&self) -> f64 {
        self.width.iter().cloned().fold(f64::INFINITY, f64::min) / 2.0
    }

    /// Whether this cell is "tight": `h_max` scaled by `STRETCH` still fits
    /// within half its width, so its faces bound any search safely without
    /// recursing further (§4.1, §4.2 step 4).
    pub fn is_tight(&self) -> bool {
        self.h_max * STRETCH < self.min_half_width()
    }
}

/// Arena owning every cell by index. Children are allocated contiguously
/// during a split; cells are never individually freed within a step (a
/// rebuild clears and repopulates the whole arena).
#[derive(Debug, Default)]
pub struct CellArena {
    cells: Vec<Cell>,
}

impl CellArena {
    /// An empty arena.
    pub fn new() -> Self {
        Self { cells: Vec::new() }
    }

    /// Insert a cell, returning its freshly assigned id.
    pub fn insert(&mut self, cell: Cell) -> CellId {
        let id = CellId(self.cells.len() as u32);
        self.cells.push(cell);
        id
    }

    /// Borrow a cell.
    pub fn get(&self, id: CellId) -> &Cell {
        &self.cells[id.0 as usize]
    }

    /// Mutably borrow a cell.
    pub fn get_mut(&mut self, id: CellId) -> &mut Cell {
        &mut self.cells[id.0 as usize]
    }

    /// Number of cells in the arena.
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    /// Whether the arena holds no cells.
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Clear the arena for a rebuild.
    pub fn clear(&mut self) {
        self.cells.clear();
    }

    /// Split `id` into eight children by a counting sort on the octant bit
    /// of each particle's position relative to the cell center, performed
    /// in-place on `positions[begin..begin+count)` (§4.1 construction).
    ///
    /// `positions` gives each particle's coordinates by its current index in
    /// the slice; `reorder` is called with the final permutation so the
    /// caller can apply it to the backing particle array(s).
    pub fn split(
        &mut self,
        id: CellId,
        positions: &mut [[f64; 3]],
        reorder: &mut dyn FnMut(usize, usize),
    ) -> [CellId; 8] {
        let (loc, width, begin, count) = {
            let c = self.get(id);
            (c.loc, c.width, c.begin, c.count)
        };
        let center = [
            loc[0] + width[0] / 2.0,
            loc[1] + width[1] / 2.0,
            loc[2] + width[2] / 2.0,
        ];

        // Counting sort into 8 octant buckets, in place on [0, count).
        let octant = |p: [f64; 3]| -> usize {
            ((p[0] >= center[0]) as usize) << 2
                | ((p[1] >= center[1]) as usize) << 1
                | (p[2] >= center[2]) as usize
        };

        let mut counts = [0usize; 8];
        for p in positions.iter().take(count) {
            counts[octant(*p)] += 1;
        }
        let mut offsets = [0usize; 9];
        for o in 0..8 {
            offsets[o + 1] = offsets[o] + counts[o];
        }

        // Stable-ish bucket fill using a scratch copy; swaps are reported
        // via `reorder` in terms of absolute indices (begin-relative -> global).
        let scratch: Vec<[f64; 3]> = positions[..count].to_vec();
        let mut cursor = offsets;
        let mut perm = vec![0usize; count];
        for (local_i, p) in scratch.iter().enumerate() {
            let o = octant(*p);
            let dest = cursor[o];
            cursor[o] += 1;
            perm[dest] = local_i;
            positions[dest] = *p;
        }
        for (dest, &src) in perm.iter().enumerate() {
            if dest != src {
                reorder(begin + src, begin + dest);
            }
        }

        let mut children = [CellId::NONE; 8];
        for o in 0..8 {
            let sub_loc = [
                loc[0] + if o & 4 != 0 { width[0] / 2.0 } else { 0.0 },
                loc[1] + if o & 2 != 0 { width[1] / 2.0 } else { 0.0 },
                loc[2] + if o & 1 != 0 { width[2] / 2.0 } else { 0.0 },
            ];
            let sub_width = [width[0] / 2.0, width[1] / 2.0, width[2] / 2.0];
            let mut child = Cell::new(sub_loc, sub_width);
            child.parent = id;
            child.begin = begin + offsets[o];
            child.count = counts[o];
            let child_id = self.insert(child);
            children[o] = child_id;
        }

        let c = self.get_mut(id);
        c.split = true;
        c.progeny = children;
        children
    }

    /// Build the uniform top-level grid of `cdim[0]*cdim[1]*cdim[2]` cells
    /// covering `box_size`, bucketing `positions[0..positions.len())` into
    /// them by integer division of each coordinate by the cell width (§4.1:
    /// "a uniform top-level grid of cdim[3] cells covers the domain ...
    /// particles are bucketed into top cells by integer division"). Returns
    /// the cell ids in row-major `(k*cdim[1]+j)*cdim[0]+i` order.
    ///
    /// `reorder` receives the same before/after index pairs as
    /// [`Self::split`]'s permutation callback, so a caller can apply the
    /// same bucketing to a backing particle array.
    pub fn build_top_level_grid(
        &mut self,
        cdim: [usize; 3],
        box_size: [f64; 3],
        positions: &mut [[f64; 3]],
        reorder: &mut dyn FnMut(usize, usize),
    ) -> Vec<CellId> {
        let cell_width = [
            box_size[0] / cdim[0] as f64,
            box_size[1] / cdim[1] as f64,
            box_size[2] / cdim[2] as f64,
        ];
        let n_top = cdim[0] * cdim[1] * cdim[2];
        let count = positions.len();

        let bucket_of = |p: [f64; 3]| -> usize {
            let i = ((p[0] / cell_width[0]) as usize).min(cdim[0] - 1);
            let j = ((p[1] / cell_width[1]) as usize).min(cdim[1] - 1);
            let k = ((p[2] / cell_width[2]) as usize).min(cdim[2] - 1);
            (k * cdim[1] + j) * cdim[0] + i
        };

        let mut counts = vec![0usize; n_top];
        for p in positions.iter().take(count) {
            counts[bucket_of(*p)] += 1;
        }
        let mut offsets = vec![0usize; n_top + 1];
        for b in 0..n_top {
            offsets[b + 1] = offsets[b] + counts[b];
        }

        let scratch: Vec<[f64; 3]> = positions[..count].to_vec();
        let mut cursor = offsets.clone();
        let mut perm = vec![0usize; count];
        for (local_i, p) in scratch.iter().enumerate() {
            let b = bucket_of(*p);
            let dest = cursor[b];
            cursor[b] += 1;
            perm[dest] = local_i;
            positions[dest] = *p;
        }
        for (dest, &src) in perm.iter().enumerate() {
            if dest != src {
                reorder(src, dest);
            }
        }

        let mut ids = Vec::with_capacity(n_top);
        for k in 0..cdim[2] {
            for j in 0..cdim[1] {
                for i in 0..cdim[0] {
                    let b = (k * cdim[1] + j) * cdim[0] + i;
                    let loc = [
                        i as f64 * cell_width[0],
                        j as f64 * cell_width[1],
                        k as f64 * cell_width[2],
                    ];
                    let mut cell = Cell::new(loc, cell_width);
                    cell.begin = offsets[b];
                    cell.count = counts[b];
                    ids.push(self.insert(cell));
                }
            }
        }
        ids
    }

    /// Integer offset between two cells' grid coordinates, clamped to
    /// `{-1,0,1}` per axis when they are 26-neighbors sharing the same
    /// width, else `None` (§4.2 pair construction, used both when building
    /// the static graph and when a runner recurses into a sub-task).
    pub fn offset_between(&self, a: CellId, b: CellId) -> Option<(i32, i32, i32)> {
        let ca = self.get(a);
        let cb = self.get(b);
        let mut offset = [0i32; 3];
        for d in 0..3 {
            let delta = (cb.loc[d] - ca.loc[d]) / ca.width[d];
            let rounded = delta.round();
            if (delta - rounded).abs() > 1e-6 || rounded.abs() > 1.0 {
                return None;
            }
            offset[d] = rounded as i32;
        }
        Some((offset[0], offset[1], offset[2]))
    }

    /// Reduce `h_max`/`dx_max` up the tree from every split cell's children.
    pub fn reduce_bounds(&mut self, id: CellId) {
        let split = self.get(id).split;
        if !split {
            return;
        }
        let children = self.get(id).progeny;
        for child in children {
            if !child.is_none() {
                self.reduce_bounds(child);
            }
        }
        let mut h_max = 0.0f64;
        let mut dx_max = 0.0f64;
        for child in children {
            if !child.is_none() {
                let c = self.get(child);
                h_max = h_max.max(c.h_max);
                dx_max = dx_max.max(c.dx_max);
            }
        }
        let c = self.get_mut(id);
        c.h_max = c.h_max.max(h_max);
        c.dx_max = c.dx_max.max(dx_max);
    }

    /// Check the partition invariant: a split cell's children's counts sum
    /// to its own, and (transitively) so on (§3, §8 testable property).
    pub fn check_partition(&self, id: CellId) -> Result<()> {
        let c = self.get(id);
        if c.split {
            let mut sum = 0;
            for child in c.progeny {
                if !child.is_none() {
                    self.check_partition(child)?;
                    sum += self.get(child).count;
                }
            }
            if sum != c.count {
                return Err(SwiftError::invariant(format!(
                    "cell {id} split but children counts sum to {sum} != {}",
                    c.count
                )));
            }
        }
        Ok(())
    }

    /// Attempt to lock `id` for particle mutation. Fails (without blocking)
    /// if any ancestor is locked or any descendant currently holds a lock
    /// (§4.1 lock protocol, §5 deadlock avoidance).
    pub fn try_lock_parts(&self, id: CellId) -> bool {
        if self.get(id).hold.load(Ordering::Acquire) > 0 {
            return false;
        }
        let mut ancestor = self.get(id).parent;
        while !ancestor.is_none() {
            if *self.get(ancestor).parts_lock.lock() {
                return false;
            }
            ancestor = self.get(ancestor).parent;
        }
        let mut guard = self.get(id).parts_lock.lock();
        if *guard {
            return false;
        }
        *guard = true;
        drop(guard);
        self.bump_hold(id, 1);
        true
    }

    /// Release a parts-lock acquired via [`Self::try_lock_parts`].
    pub fn unlock_parts(&self, id: CellId) {
        *self.get(id).parts_lock.lock() = false;
        self.bump_hold(id, -1);
    }

    /// Same as [`Self::try_lock_parts`] but for the gravity-particle lock.
    pub fn try_lock_gparts(&self, id: CellId) -> bool {
        if self.get(id).hold.load(Ordering::Acquire) > 0 {
            return false;
        }
        let mut ancestor = self.get(id).parent;
        while !ancestor.is_none() {
            if *self.get(ancestor).gparts_lock.lock() {
                return false;
            }
            ancestor = self.get(ancestor).parent;
        }
        let mut guard = self.get(id).gparts_lock.lock();
        if *guard {
            return false;
        }
        *guard = true;
        drop(guard);
        self.bump_hold(id, 1);
        true
    }

    /// Release a gparts-lock acquired via [`Self::try_lock_gparts`].
    pub fn unlock_gparts(&self, id: CellId) {
        *self.get(id).gparts_lock.lock() = false;
        self.bump_hold(id, -1);
    }

    fn bump_hold(&self, id: CellId, delta: i32) {
        let mut ancestor = self.get(id).parent;
        while !ancestor.is_none() {
            self.get(ancestor).hold.fetch_add(delta, Ordering::AcqRel);
            ancestor = self.get(ancestor).parent;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_root(count: usize) -> (CellArena, CellId) {
        let mut arena = CellArena::new();
        let mut root = Cell::new([0.0; 3], [8.0; 3]);
        root.count = count;
        let id = arena.insert(root);
        (arena, id)
    }

    #[test]
    fn split_preserves_total_count() {
        let (mut arena, id) = make_root(16);
        let mut positions: Vec<[f64; 3]> = (0..16)
            .map(|i| {
                let x = (i % 2) as f64 * 5.0 + 1.0;
                let y = ((i / 2) % 2) as f64 * 5.0 + 1.0;
                let z = ((i / 4) % 2) as f64 * 5.0 + 1.0;
                [x, y, z]
            })
            .collect();
        let mut moves = Vec::new();
        arena.split(id, &mut positions, &mut |a, b| moves.push((a, b)));
        arena.check_partition(id).unwrap();
        let children = arena.get(id).progeny;
        let sum: usize = children.iter().map(|c| arena.get(*c).count).sum();
        assert_eq!(sum, 16);
    }

    #[test]
    fn lock_excludes_parent_and_children() {
        let (mut arena, root) = make_root(8);
        let mut positions = vec![[1.0, 1.0, 1.0]; 8];
        arena.split(root, &mut positions, &mut |_, _| {});
        let child = arena.get(root).progeny[0];

        assert!(arena.try_lock_parts(child));
        assert!(!arena.try_lock_parts(root), "parent must not lock while child holds");
        arena.unlock_parts(child);
        assert!(arena.try_lock_parts(root));
        arena.unlock_parts(root);
    }

    #[test]
    fn double_lock_on_same_cell_fails() {
        let (arena, root) = make_root(8);
        assert!(arena.try_lock_parts(root));
        assert!(!arena.try_lock_parts(root));
        arena.unlock_parts(root);
        assert!(arena.try_lock_parts(root));
    }

    #[test]
    fn is_tight_compares_against_half_width() {
        let mut cell = Cell::new([0.0; 3], [10.0; 3]);
        cell.h_max = 1.0;
        assert!(cell.is_tight()); // 1.1 < 5.0
        cell.h_max = 10.0;
        assert!(!cell.is_tight());
    }

    #[test]
    fn build_top_level_grid_buckets_by_integer_division() {
        let mut arena = CellArena::new();
        let mut positions = vec![
            [0.1, 0.1, 0.1], // cell (0,0,0)
            [0.9, 0.1, 0.1], // cell (2,0,0)
            [0.1, 0.9, 0.9], // cell (0,2,2)
        ];
        let mut moves = Vec::new();
        let ids = arena.build_top_level_grid(
            [3, 3, 3],
            [1.0; 3],
            &mut positions,
            &mut |a, b| moves.push((a, b)),
        );
        assert_eq!(ids.len(), 27);
        let counts: Vec<usize> = ids.iter().map(|&id| arena.get(id).count).collect();
        assert_eq!(counts.iter().sum::<usize>(), 3);
        assert_eq!(counts.iter().filter(|&&c| c == 1).count(), 3);
    }

    #[test]
    fn neighboring_top_cells_report_unit_offset() {
        let mut arena = CellArena::new();
        let mut positions = Vec::new();
        let ids = arena.build_top_level_grid([2, 1, 1], [2.0, 1.0, 1.0], &mut positions, &mut |_, _| {});
        assert_eq!(arena.offset_between(ids[0], ids[1]), Some((1, 0, 0)));
        assert_eq!(arena.offset_between(ids[1], ids[0]), Some((-1, 0, 0)));
    }

    #[test]
    fn non_adjacent_cells_have_no_offset() {
        let mut arena = CellArena::new();
        let mut positions = Vec::new();
        let ids = arena.build_top_level_grid([4, 1, 1], [4.0, 1.0, 1.0], &mut positions, &mut |_, _| {});
        assert_eq!(arena.offset_between(ids[0], ids[3]), None);
    }
}
