//! Graph-weighted repartitioning (§4.6).
//!
//! No `metis` crate exists anywhere in the retrieved reference pack, so this
//! module hand-rolls a greedy k-way partitioner instead of fabricating a
//! binding (see `DESIGN.md`). The weight accumulation and rescale policy
//! below reproduce `partition.c`'s `repart_edge_metis_accumulate` and its
//! `metis_maxweight` clamp exactly (range-based affine remap plus a
//! zero-weight floor, not a plain ratio-preserving scale); only the actual
//! graph-cut algorithm (`pick_metis`'s call into `METIS_PartGraphKway`) is a
//! substitution.

use crate::task::{Task, TaskType};
use crate::types::Rank;

/// Clamp used by the source to keep accumulated weights within a range
/// METIS's integer vertex/edge weights can represent.
pub const METIS_MAXWEIGHT: f32 = 10000.0;

/// `wscale` from `scheduler_reweight`/`partition.c`: converts raw tick
/// counts into the same weight units used for task weighting.
pub const WSCALE: f32 = 0.001;

/// Accumulated per-cell vertex weights and per-neighbor-direction edge
/// weights, ready to feed a graph partitioner.
#[derive(Debug, Default, Clone)]
pub struct GraphWeights {
    /// One entry per top-level cell.
    pub vertices: Vec<f32>,
    /// `edges[cell * 26 + neighbor_slot]`, matching the source's flattened
    /// 26-neighbor adjacency layout.
    pub edges: Vec<f32>,
    n_cells: usize,
}

impl GraphWeights {
    /// Zero-initialized weights for `n_cells` top-level cells.
    pub fn new(n_cells: usize) -> Self {
        Self { vertices: vec![0.0; n_cells], edges: vec![0.0; n_cells * 26], n_cells }
    }

    /// Accumulate one task's measured cost into the relevant vertex/edge
    /// entries (`repart_edge_metis_accumulate`): ghost/kick/init and local
    /// self-interactions add to the vertex weight of their top-level cell;
    /// pair interactions between distinct local top cells add to the edge
    /// weight for that neighbor slot.
    pub fn accumulate(
        &mut self,
        task: &Task,
        top_of: impl Fn(crate::types::CellId) -> usize,
        neighbor_slot: impl Fn(usize, usize) -> Option<usize>,
        local_rank: Rank,
        cell_rank: impl Fn(crate::types::CellId) -> Rank,
    ) {
        if !matches!(
            task.ttype,
            TaskType::Self_
                | TaskType::Pair
                | TaskType::SubSelf
                | TaskType::SubPair
                | TaskType::Ghost
                | TaskType::Kick
                | TaskType::Init
        ) {
            return;
        }
        let w = (WSCALE * task.duration() as f32).max(0.0);
        if w == 0.0 {
            return;
        }

        let ci_top = top_of(task.ci);
        match task.ttype {
            TaskType::Ghost | TaskType::Kick | TaskType::Init => {
                self.vertices[ci_top] += w;
            }
            TaskType::Self_ | TaskType::SubSelf if task.cj.is_none() => {
                if cell_rank(task.ci) == local_rank {
                    self.vertices[ci_top] += w;
                }
            }
            TaskType::Pair | TaskType::SubPair => {
                let cj = task.cj.unwrap();
                let cj_top = top_of(cj);
                if ci_top == cj_top {
                    self.vertices[ci_top] += w;
                } else if cell_rank(task.ci) == local_rank {
                    if let Some(slot) = neighbor_slot(ci_top, cj_top) {
                        self.edges[ci_top * 26 + slot] += w;
                    }
                }
            }
            _ => {}
        }
    }

    /// Rescale both weight arrays together if their combined *range* exceeds
    /// [`METIS_MAXWEIGHT`], then floor any exactly-zero weight to 1.0, mirroring
    /// the source's clamp before handing weights to METIS as `idx_t`. This is
    /// an affine remap `(w - wmin) * wscale + 1`, not a ratio-preserving scale
    /// by the raw maximum — the source checks `wmax - wmin` against the clamp,
    /// not `wmax` itself.
    pub fn rescale(&mut self) {
        let mut wmin = f32::MAX;
        let mut wmax = 0.0f32;
        for &w in self.edges.iter().chain(self.vertices.iter()) {
            wmax = wmax.max(w);
            wmin = wmin.min(w);
        }
        if (wmax - wmin) > METIS_MAXWEIGHT {
            let wscale = METIS_MAXWEIGHT / (wmax - wmin);
            for e in &mut self.edges {
                *e = (*e - wmin) * wscale + 1.0;
            }
            for v in &mut self.vertices {
                *v = (*v - wmin) * wscale + 1.0;
            }
        }
        for e in &mut self.edges {
            if *e == 0.0 {
                *e = 1.0;
            }
        }
        for v in &mut self.vertices {
            if *v == 0.0 {
                *v = 1.0;
            }
        }
    }

    /// Number of top-level cells this weight set covers.
    pub fn n_cells(&self) -> usize {
        self.n_cells
    }
}

/// Greedy k-way graph partitioner: repeatedly moves the vertex with the
/// best gain (more weight pulling it to another region than keeping it)
/// into that region, until no move improves the cut, bounded by a pass
/// limit. A stand-in for METIS's `METIS_PartGraphKway` (see module docs).
pub fn partition_greedy(
    weights: &GraphWeights,
    adjacency: &[[Option<usize>; 26]],
    n_regions: usize,
    max_passes: usize,
) -> Vec<usize> {
    let n = weights.n_cells();
    assert_eq!(adjacency.len(), n);
    if n_regions <= 1 || n == 0 {
        return vec![0; n];
    }

    // Seed regions by round-robin on vertex weight order (heaviest first),
    // a simple balanced starting point before local-search improves the cut.
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| weights.vertices[b].partial_cmp(&weights.vertices[a]).unwrap());
    let mut region = vec![0usize; n];
    for (i, &v) in order.iter().enumerate() {
        region[v] = i % n_regions;
    }

    for _ in 0..max_passes {
        let mut improved = false;
        for v in 0..n {
            let mut cut_cost = vec![0.0f32; n_regions];
            for (slot, maybe_nb) in adjacency[v].iter().enumerate() {
                if let Some(nb) = maybe_nb {
                    let w = weights.edges[v * 26 + slot];
                    cut_cost[region[*nb]] += w;
                }
            }
            let current = region[v];
            let (best_region, &best_cost) = cut_cost
                .iter()
                .enumerate()
                .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())
                .unwrap();
            if best_region != current && best_cost > cut_cost[current] {
                region[v] = best_region;
                improved = true;
            }
        }
        if !improved {
            break;
        }
    }
    region
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rescale_is_a_noop_below_threshold() {
        let mut w = GraphWeights::new(2);
        w.vertices[0] = 5.0;
        w.rescale();
        assert_eq!(w.vertices[0], 5.0);
    }

    #[test]
    fn rescale_applies_affine_remap_above_threshold() {
        // edges default to 0.0 (n_cells=2 -> 52 entries), so wmin=0.0 and
        // wmax=20000.0: range 20000.0 > METIS_MAXWEIGHT triggers the remap.
        let mut w = GraphWeights::new(2);
        w.vertices[0] = 20000.0;
        w.vertices[1] = 10000.0;
        w.rescale();
        let wscale = METIS_MAXWEIGHT / 20000.0;
        assert!((w.vertices[0] - (20000.0 * wscale + 1.0)).abs() < 1e-3);
        assert!((w.vertices[1] - (10000.0 * wscale + 1.0)).abs() < 1e-3);
        assert!(w.edges.iter().all(|&e| (e - 1.0).abs() < 1e-6));
    }

    #[test]
    fn rescale_floors_zero_weights_to_one() {
        let mut w = GraphWeights::new(2);
        w.vertices[0] = 5.0;
        w.rescale();
        assert_eq!(w.vertices[1], 1.0);
        assert!(w.edges.iter().all(|&e| e == 1.0));
    }

    #[test]
    fn greedy_partition_assigns_every_vertex_a_region() {
        let weights = GraphWeights::new(4);
        let adjacency = vec![[None; 26]; 4];
        let regions = partition_greedy(&weights, &adjacency, 2, 5);
        assert_eq!(regions.len(), 4);
        assert!(regions.iter().all(|&r| r < 2));
    }

    #[test]
    fn single_region_partition_is_trivial() {
        let weights = GraphWeights::new(3);
        let adjacency = vec![[None; 26]; 3];
        let regions = partition_greedy(&weights, &adjacency, 1, 5);
        assert_eq!(regions, vec![0, 0, 0]);
    }
}
