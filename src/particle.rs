//! Particle arrays (§3)
//!
//! ## Table of Contents
//! - **Particle**: gas particle (SPH)
//! - **GPart**: gravity-only particle, possibly back-linked to a `Particle`
//! - **SPart**: star particle
//! - **ParticleSet**: struct-of-arrays container, sorted by cell index

use serde::{Deserialize, Serialize};

/// A gas particle carrying SPH state plus kernel scratch fields.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Particle {
    /// Unique, stable particle id (preserved across redistribute).
    pub id: u64,
    /// Position in box coordinates.
    pub x: [f64; 3],
    /// Velocity.
    pub v: [f64; 3],
    /// Mass.
    pub mass: f64,
    /// Smoothing length.
    pub h: f64,
    /// Internal energy (or entropy, depending on `entropy_flag`).
    pub u: f64,
    /// Start of this particle's current time-bin, as a `StepTime` tick.
    pub ti_begin: u64,
    /// End of this particle's current time-bin.
    pub ti_end: u64,
    /// Index into the gpart array of this particle's gravity partner, or
    /// `None` if it has none. Stored as `Option<usize>` in memory; on the
    /// wire (snapshot/restart) this round-trips through a signed offset
    /// the way the source's `gpart->id_or_neg_offset` does (§3, §9).
    pub gpart: Option<usize>,

    // Kernel scratch, recomputed every density/force pass.
    /// Accumulated density.
    pub rho: f64,
    /// Neighbor count (weighted kernel sum).
    pub wcount: f64,
    /// Acceleration.
    pub a_hydro: [f64; 3],
    /// Rate of change of smoothing length.
    pub h_dt: f64,
}

impl Particle {
    /// A particle at the origin with the given id; callers set the rest.
    pub fn new(id: u64) -> Self {
        Self {
            id,
            x: [0.0; 3],
            v: [0.0; 3],
            mass: 0.0,
            h: 0.0,
            u: 0.0,
            ti_begin: 0,
            ti_end: 0,
            gpart: None,
            rho: 0.0,
            wcount: 0.0,
            a_hydro: [0.0; 3],
            h_dt: 0.0,
        }
    }

    /// Whether this particle is active (due to finish its step) at `ti_current`.
    pub fn is_active(&self, ti_current: u64) -> bool {
        ti_current >= self.ti_end
    }
}

/// A gravity-only particle. Either standalone (`id_or_neg_offset > 0`, an
/// ordinary id) or the gravity half of a gas particle
/// (`id_or_neg_offset <= 0`, `-id_or_neg_offset` is the partner's index).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GPart {
    /// See type docs: positive id, or `-(part index)` for a gas partner.
    pub id_or_neg_offset: i64,
    /// Position.
    pub x: [f64; 3],
    /// Velocity.
    pub v: [f64; 3],
    /// Mass.
    pub mass: f64,
    /// End of this particle's current time-bin.
    pub ti_end: u64,
    /// Accumulated acceleration.
    pub a_grav: [f64; 3],
    /// Accumulated potential.
    pub potential: f64,
}

impl GPart {
    /// Whether this gravity particle has a gas partner.
    pub fn has_gas_partner(&self) -> bool {
        self.id_or_neg_offset <= 0
    }

    /// The gas partner's index in the `parts` array, if any.
    pub fn partner_index(&self) -> Option<usize> {
        self.has_gas_partner().then(|| (-self.id_or_neg_offset) as usize)
    }
}

/// A star particle (structurally analogous to `Particle`, no hydro fields).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SPart {
    /// Unique id.
    pub id: u64,
    /// Position.
    pub x: [f64; 3],
    /// Velocity.
    pub v: [f64; 3],
    /// Mass.
    pub mass: f64,
    /// End of this particle's current time-bin.
    pub ti_end: u64,
}

/// Struct-of-arrays container for one rank's local particles. Arrays are
/// kept sorted by cell index so each cell owns a contiguous
/// `[begin, begin + count)` slice (§3 invariant).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParticleSet {
    /// Gas particles.
    pub parts: Vec<Particle>,
    /// Gravity particles (standalone DM + gas partners).
    pub gparts: Vec<GPart>,
    /// Star particles.
    pub sparts: Vec<SPart>,
}

impl ParticleSet {
    /// An empty particle set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Total particle count across all three arrays.
    pub fn len(&self) -> usize {
        self.parts.len() + self.gparts.len() + self.sparts.len()
    }

    /// Whether every array is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Verify every gas particle with a gravity partner points back at it
    /// and vice versa (§3 partner-link invariant, §8 testable property).
    pub fn check_partner_links(&self) -> crate::error::Result<()> {
        for (i, p) in self.parts.iter().enumerate() {
            if let Some(gi) = p.gpart {
                let g = self
                    .gparts
                    .get(gi)
                    .ok_or_else(|| crate::error::SwiftError::invariant(
                        format!("part {i} points at missing gpart {gi}")
                    ))?;
                if g.partner_index() != Some(i) {
                    return Err(crate::error::SwiftError::invariant(format!(
                        "part {i} <-> gpart {gi} back-link mismatch"
                    )));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gpart_partner_index_from_negative_offset() {
        let g = GPart {
            id_or_neg_offset: -7,
            x: [0.0; 3],
            v: [0.0; 3],
            mass: 1.0,
            ti_end: 0,
            a_grav: [0.0; 3],
            potential: 0.0,
        };
        assert!(g.has_gas_partner());
        assert_eq!(g.partner_index(), Some(7));
    }

    #[test]
    fn standalone_gpart_has_no_partner() {
        let g = GPart {
            id_or_neg_offset: 42,
            x: [0.0; 3],
            v: [0.0; 3],
            mass: 1.0,
            ti_end: 0,
            a_grav: [0.0; 3],
            potential: 0.0,
        };
        assert!(!g.has_gas_partner());
        assert_eq!(g.partner_index(), None);
    }

    #[test]
    fn partner_links_round_trip() {
        let mut set = ParticleSet::new();
        let mut p = Particle::new(0);
        p.gpart = Some(0);
        set.parts.push(p);
        set.gparts.push(GPart {
            id_or_neg_offset: 0,
            x: [0.0; 3],
            v: [0.0; 3],
            mass: 1.0,
            ti_end: 0,
            a_grav: [0.0; 3],
            potential: 0.0,
        });
        assert!(set.check_partner_links().is_ok());
    }

    #[test]
    fn broken_partner_link_is_rejected() {
        let mut set = ParticleSet::new();
        let mut p = Particle::new(0);
        p.gpart = Some(0);
        set.parts.push(p);
        set.gparts.push(GPart {
            id_or_neg_offset: -5, // points at a different (missing) part
            x: [0.0; 3],
            v: [0.0; 3],
            mass: 1.0,
            ti_end: 0,
            a_grav: [0.0; 3],
            potential: 0.0,
        });
        assert!(set.check_partner_links().is_err());
    }
}
