//! Snapshot manifest structures (§6).
//!
//! Models the Gadget-3-style hierarchical snapshot layout as data only; the
//! actual HDF5 codec is out of scope (§1) so [`SnapshotWriter`] only tracks
//! what *would* be written, for use by tests and the XMF sidecar.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// `/Header` group fields.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Header {
    pub box_size: [f64; 3],
    pub dimension: u8,
    pub flag_entropy_ics: bool,
    pub num_part_total: [u64; 6],
    pub num_part_total_high_word: [u32; 6],
    pub mass_table: [f64; 6],
    pub num_files_per_snapshot: u32,
}

/// `/Units` group: base unit definitions in CGS.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Units {
    pub unit_length_cgs: f64,
    pub unit_mass_cgs: f64,
    pub unit_time_cgs: f64,
    pub unit_current_cgs: f64,
    pub unit_temperature_cgs: f64,
}

/// `/InternalCodeUnits` group: what the sim actually integrates in.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InternalCodeUnits {
    pub unit_length: f64,
    pub unit_mass: f64,
    pub unit_time: f64,
}

/// `/HydroScheme` group: a free-form label plus key parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct HydroScheme {
    pub scheme: String,
    pub kernel: String,
    pub neighbours_target: f64,
    pub eta: f64,
}

/// Per-field conversion metadata attached to every dataset (§6).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FieldAttrs {
    pub name: String,
    pub cgs_conversion_factor: f64,
    pub h_scale_exponent: f64,
    pub a_scale_exponent: f64,
    pub conversion_string: String,
}

/// A `/PartType{0..5}` group: which fields it carries and how many rows.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct PartTypeGroup {
    pub part_type: u8,
    pub count: u64,
    pub fields: Vec<FieldAttrs>,
}

/// A full snapshot manifest, everything `SnapshotWriter::write` would need
/// to serialize to disk through an HDF5 layer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SnapshotManifest {
    pub header: Header,
    pub units: Units,
    pub internal_code_units: InternalCodeUnits,
    pub hydro_scheme: HydroScheme,
    pub parameters: Vec<(String, String)>,
    pub runtime_pars: Vec<(String, String)>,
    pub part_types: Vec<PartTypeGroup>,
}

impl SnapshotManifest {
    /// Basename this manifest would be written to, e.g. `output_0007`.
    pub fn basename(&self, prefix: &str, step: u64) -> String {
        format!("{prefix}_{step:04}")
    }

    /// Total particle count across every `/PartType` group.
    pub fn total_particles(&self) -> u64 {
        self.part_types.iter().map(|g| g.count).sum()
    }
}

/// Tracks every manifest written so far, for the XMF sidecar.
#[derive(Debug, Default)]
pub struct SnapshotWriter {
    output_dir: PathBuf,
    written: Vec<(u64, String)>,
}

impl SnapshotWriter {
    /// Build a writer rooted at `output_dir`.
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self { output_dir: output_dir.into(), written: Vec::new() }
    }

    /// Record a manifest as written at `step`, returning the path it would
    /// occupy on disk. No bytes are actually written (§1 non-goal).
    pub fn write(&mut self, manifest: &SnapshotManifest, prefix: &str, step: u64) -> Result<PathBuf> {
        let basename = manifest.basename(prefix, step);
        let path = self.output_dir.join(format!("{basename}.hdf5"));
        self.written.push((step, basename));
        Ok(path)
    }

    /// Render the XMF sidecar listing every snapshot written so far.
    pub fn xmf_sidecar(&self) -> String {
        let mut out = String::from("<?xml version=\"1.0\" ?>\n<Xdmf Version=\"2.0\">\n<Domain>\n<Grid GridType=\"Collection\" CollectionType=\"Temporal\">\n");
        for (step, basename) in &self.written {
            out.push_str(&format!(
                "  <Grid Name=\"step_{step}\"><xi:include href=\"{basename}.hdf5.xmf\"/></Grid>\n"
            ));
        }
        out.push_str("</Grid>\n</Domain>\n</Xdmf>\n");
        out
    }

    /// Directory snapshots are written into.
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_manifest() -> SnapshotManifest {
        SnapshotManifest {
            header: Header {
                box_size: [1.0, 1.0, 1.0],
                dimension: 3,
                flag_entropy_ics: false,
                num_part_total: [100, 50, 0, 0, 0, 0],
                num_part_total_high_word: [0; 6],
                mass_table: [0.0; 6],
                num_files_per_snapshot: 1,
            },
            units: Units {
                unit_length_cgs: 3.0857e24,
                unit_mass_cgs: 1.989e43,
                unit_time_cgs: 3.0857e19,
                unit_current_cgs: 1.0,
                unit_temperature_cgs: 1.0,
            },
            internal_code_units: InternalCodeUnits { unit_length: 1.0, unit_mass: 1.0, unit_time: 1.0 },
            hydro_scheme: HydroScheme::default(),
            parameters: Vec::new(),
            runtime_pars: Vec::new(),
            part_types: vec![
                PartTypeGroup { part_type: 0, count: 100, fields: Vec::new() },
                PartTypeGroup { part_type: 1, count: 50, fields: Vec::new() },
            ],
        }
    }

    #[test]
    fn manifest_total_particles_sums_part_type_groups() {
        let m = sample_manifest();
        assert_eq!(m.total_particles(), 150);
    }

    #[test]
    fn basename_is_zero_padded() {
        let m = sample_manifest();
        assert_eq!(m.basename("output", 7), "output_0007");
    }

    #[test]
    fn writer_tracks_written_snapshots_and_renders_sidecar() {
        let mut writer = SnapshotWriter::new("/tmp/out");
        let m = sample_manifest();
        writer.write(&m, "output", 0).unwrap();
        writer.write(&m, "output", 1).unwrap();
        let xmf = writer.xmf_sidecar();
        assert!(xmf.contains("output_0000"));
        assert!(xmf.contains("output_0001"));
    }
}
