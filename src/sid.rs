//! Sort directions (sid): the 13 canonical pair orientations (§4.1, §4.2)
//!
//! Every ordered pair of neighboring top-level cells has one of 26 integer
//! offsets in `{-1,0,1}^3 \ {0,0,0}`. Opposite offsets describe the same
//! physical pair with `ci`/`cj` swapped, so they canonicalize onto the same
//! sort direction; that leaves 13 distinct ids. `SORTLIST` maps a raw
//! `(dx,dy,dz)` offset (each in `{-1,0,1}`, encoded as `(d+1)`) to its sid,
//! mirroring the symmetric indexing scheme the engine's cell tree documents
//! for `sortlistID` (the table itself lives in a source file outside the
//! retrieved set, so the index convention here is reconstructed from that
//! documented symmetry and validated by the round-trip test below).

/// Number of canonical sort directions.
pub const NR_SID: usize = 13;

/// `SORTLIST[(dz+1) + 3*((dy+1) + 3*(dx+1))]` gives the sid for offset
/// `(dx,dy,dz)`. The center entry (offset `(0,0,0)`) is unused (self pairs
/// don't have a sid) and set to `NR_SID` as a guard value.
pub const SORTLIST: [usize; 27] = [
    0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, NR_SID, 12, 11, 10, 9, 8, 7, 6, 5, 4, 3, 2, 1, 0,
];

/// Relative work-fraction of each sid, used to weight pair tasks (§4.2 step
/// 11). Face-on directions (4, 10, 12) carry roughly 3x the work of
/// edge/corner directions because more of the kernel's support radius
/// overlaps along the cell-normal axis.
pub const SID_SCALE: [f32; NR_SID] = [
    0.1897, 0.4025, 0.1897, 0.4025, 0.5788, 0.4025, 0.1897, 0.4025, 0.1897, 0.4025, 0.5788,
    0.4025, 0.5788,
];

/// Canonicalize a cell-pair offset (each component in `{-1,0,1}`) into a
/// sort direction id. Returns `None` for the zero offset (self pairs).
pub fn sid_from_offset(dx: i32, dy: i32, dz: i32) -> Option<usize> {
    debug_assert!((-1..=1).contains(&dx) && (-1..=1).contains(&dy) && (-1..=1).contains(&dz));
    let idx = ((dz + 1) + 3 * ((dy + 1) + 3 * (dx + 1))) as usize;
    let sid = SORTLIST[idx];
    (sid < NR_SID).then_some(sid)
}

/// Whether swapping `ci`/`cj` is needed to match the canonical direction of
/// `sid` (true when the raw offset was the "later" half of an opposite
/// pair, i.e. any positive leading nonzero component).
pub fn needs_swap(dx: i32, dy: i32, dz: i32) -> bool {
    if dx != 0 {
        dx > 0
    } else if dy != 0 {
        dy > 0
    } else {
        dz > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opposite_offsets_share_a_sid() {
        for dx in -1..=1 {
            for dy in -1..=1 {
                for dz in -1..=1 {
                    if dx == 0 && dy == 0 && dz == 0 {
                        continue;
                    }
                    let a = sid_from_offset(dx, dy, dz).unwrap();
                    let b = sid_from_offset(-dx, -dy, -dz).unwrap();
                    assert_eq!(a, b, "offset ({dx},{dy},{dz}) vs its opposite");
                }
            }
        }
    }

    #[test]
    fn exactly_thirteen_distinct_sids_used() {
        let mut seen = std::collections::HashSet::new();
        for dx in -1..=1 {
            for dy in -1..=1 {
                for dz in -1..=1 {
                    if dx == 0 && dy == 0 && dz == 0 {
                        continue;
                    }
                    seen.insert(sid_from_offset(dx, dy, dz).unwrap());
                }
            }
        }
        assert_eq!(seen.len(), NR_SID);
    }

    #[test]
    fn zero_offset_has_no_sid() {
        assert_eq!(sid_from_offset(0, 0, 0), None);
    }

    #[test]
    fn sid_scale_values_are_in_unit_range() {
        assert!(SID_SCALE.iter().all(|&s| s > 0.0 && s < 1.0));
    }
}
