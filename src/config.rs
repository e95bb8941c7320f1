//! Parameter file and engine configuration (§6).
//!
//! ## Table of Contents
//! - **ParameterMap**: flat key=value reader for the `Section:key` parameter
//!   file format
//! - **EngineConfig**: fully resolved configuration consumed by `Engine`
//! - **EngineBuilder**: fluent builder assembling an `EngineConfig`

use crate::error::{Result, SwiftError};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::info;

/// A parsed `Section:key = value` parameter file (§6).
#[derive(Debug, Clone, Default)]
pub struct ParameterMap {
    values: HashMap<String, String>,
}

impl ParameterMap {
    /// Parse from file contents. Blank lines and lines starting with `%` or
    /// `#` are ignored; every other non-blank line must be `key = value`.
    pub fn parse(contents: &str) -> Result<Self> {
        let mut values = HashMap::new();
        for (lineno, raw) in contents.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('%') || line.starts_with('#') {
                continue;
            }
            let (key, value) = line.split_once('=').ok_or_else(|| {
                SwiftError::config(format!("parameter file line {}: missing '='", lineno + 1))
            })?;
            values.insert(key.trim().to_string(), value.trim().to_string());
        }
        Ok(Self { values })
    }

    /// Read and parse a parameter file from disk.
    pub fn read(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Required string value for `key` (e.g. `"TimeIntegration:dt_min"`).
    pub fn get(&self, key: &str) -> Result<&str> {
        self.values
            .get(key)
            .map(String::as_str)
            .ok_or_else(|| SwiftError::config(format!("missing required parameter {key}")))
    }

    /// Optional string value.
    pub fn get_opt(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Required numeric value, parsed as `f64`.
    pub fn get_f64(&self, key: &str) -> Result<f64> {
        self.get(key)?
            .parse()
            .map_err(|_| SwiftError::config(format!("parameter {key} is not a number")))
    }

    /// Optional numeric value with a default.
    pub fn get_f64_or(&self, key: &str, default: f64) -> Result<f64> {
        match self.get_opt(key) {
            Some(v) => v
                .parse()
                .map_err(|_| SwiftError::config(format!("parameter {key} is not a number"))),
            None => Ok(default),
        }
    }

    /// Required integer value.
    pub fn get_usize(&self, key: &str) -> Result<usize> {
        self.get(key)?
            .parse()
            .map_err(|_| SwiftError::config(format!("parameter {key} is not an integer")))
    }
}

/// Domain decomposition strategy for the initial split (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitialDecomposition {
    /// Grid decomposition.
    Grid,
    /// Vectorized (space-filling curve) decomposition.
    Vectorized,
    /// METIS-weighted-by-particle-count decomposition.
    MetisParticles,
    /// METIS unweighted decomposition.
    MetisUnweighted,
}

/// Repartitioning trigger/weighting strategy (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepartitionType {
    /// Never repartition.
    None,
    /// Edge+vertex time-weighted.
    EdgeVertexTime,
    /// Vertex particle-count weighted.
    VertexParticleCount,
    /// Edge time-weighted only.
    EdgeTime,
    /// No repartitioning, but still validate the graph is connected.
    ValidateOnly,
}

/// Fully resolved configuration consumed by [`crate::engine::Engine`].
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Simulation start time.
    pub time_begin: f64,
    /// Simulation end time.
    pub time_end: f64,
    /// Minimum allowed time-step.
    pub dt_min: f64,
    /// Maximum allowed time-step.
    pub dt_max: f64,

    /// Snapshot basename.
    pub snapshot_basename: String,
    /// Time of the first snapshot.
    pub snapshot_time_first: f64,
    /// Time between snapshots.
    pub snapshot_delta_time: f64,

    /// Restart subdirectory.
    pub restart_subdir: PathBuf,
    /// Restart basename.
    pub restart_basename: String,
    /// Steps between stop-file checks (§6 stop-file protocol).
    pub restart_stop_steps: u32,

    /// Initial domain decomposition.
    pub initial_decomposition: InitialDecomposition,
    /// Initial grid dimensions, used when `initial_decomposition == Grid`.
    pub initial_grid: [usize; 3],
    /// Repartition strategy.
    pub repartition_type: RepartitionType,

    /// Number of worker queues/threads.
    pub nr_queues: usize,

    /// Cosmological integration enabled.
    pub cosmology: bool,
    /// Cooling enabled.
    pub cooling: bool,
    /// Self-gravity enabled.
    pub self_gravity: bool,
    /// External gravity field enabled.
    pub external_gravity: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            time_begin: 0.0,
            time_end: 1.0,
            dt_min: 1e-10,
            dt_max: 1e-2,
            snapshot_basename: "output".to_string(),
            snapshot_time_first: 0.0,
            snapshot_delta_time: 0.1,
            restart_subdir: PathBuf::from("restart"),
            restart_basename: "swift".to_string(),
            restart_stop_steps: 100,
            initial_decomposition: InitialDecomposition::Grid,
            initial_grid: [1, 1, 1],
            repartition_type: RepartitionType::None,
            nr_queues: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            cosmology: false,
            cooling: false,
            self_gravity: false,
            external_gravity: false,
        }
    }
}

impl EngineConfig {
    /// Build a config from a parsed parameter file, falling back to
    /// defaults for every optional key (§6).
    pub fn from_parameters(params: &ParameterMap) -> Result<Self> {
        let mut cfg = Self::default();
        cfg.time_begin = params.get_f64_or("TimeIntegration:time_begin", cfg.time_begin)?;
        cfg.time_end = params.get_f64_or("TimeIntegration:time_end", cfg.time_end)?;
        cfg.dt_min = params.get_f64_or("TimeIntegration:dt_min", cfg.dt_min)?;
        cfg.dt_max = params.get_f64_or("TimeIntegration:dt_max", cfg.dt_max)?;

        if let Some(v) = params.get_opt("Snapshots:basename") {
            cfg.snapshot_basename = v.to_string();
        }
        cfg.snapshot_time_first =
            params.get_f64_or("Snapshots:time_first", cfg.snapshot_time_first)?;
        cfg.snapshot_delta_time =
            params.get_f64_or("Snapshots:delta_time", cfg.snapshot_delta_time)?;

        if let Some(v) = params.get_opt("Restarts:subdir") {
            cfg.restart_subdir = PathBuf::from(v);
        }
        if let Some(v) = params.get_opt("Restarts:basename") {
            cfg.restart_basename = v.to_string();
        }

        if let Some(v) = params.get_opt("DomainDecomposition:initial_type") {
            cfg.initial_decomposition = match v {
                "g" => InitialDecomposition::Grid,
                "v" => InitialDecomposition::Vectorized,
                "m" => InitialDecomposition::MetisParticles,
                "w" => InitialDecomposition::MetisUnweighted,
                other => {
                    return Err(SwiftError::config(format!(
                        "unknown DomainDecomposition:initial_type '{other}'"
                    )))
                }
            };
        }
        if let Some(v) = params.get_opt("DomainDecomposition:repartition_type") {
            cfg.repartition_type = match v {
                "n" => RepartitionType::None,
                "b" => RepartitionType::EdgeVertexTime,
                "e" => RepartitionType::VertexParticleCount,
                "v" => RepartitionType::EdgeTime,
                "x" => RepartitionType::ValidateOnly,
                other => {
                    return Err(SwiftError::config(format!(
                        "unknown DomainDecomposition:repartition_type '{other}'"
                    )))
                }
            };
        }

        if let Some(v) = params.get_opt("Scheduler:nr_queues") {
            cfg.nr_queues = v
                .parse()
                .map_err(|_| SwiftError::config("Scheduler:nr_queues is not an integer"))?;
        }

        Ok(cfg)
    }
}

/// Fluent builder over [`EngineConfig`], for callers (tests, the CLI
/// driver) that want to set a few fields without hand-writing a parameter
/// file.
#[derive(Debug, Clone, Default)]
pub struct EngineBuilder {
    config: EngineConfig,
}

impl EngineBuilder {
    /// Start from the default configuration.
    pub fn new() -> Self {
        Self { config: EngineConfig::default() }
    }

    /// Start from an already-parsed parameter file.
    pub fn from_parameters(params: &ParameterMap) -> Result<Self> {
        Ok(Self { config: EngineConfig::from_parameters(params)? })
    }

    /// Set the simulation time range.
    pub fn with_time_range(mut self, begin: f64, end: f64) -> Self {
        self.config.time_begin = begin;
        self.config.time_end = end;
        self
    }

    /// Set the worker queue count.
    pub fn with_nr_queues(mut self, n: usize) -> Self {
        self.config.nr_queues = n.max(1);
        self
    }

    /// Enable or disable self-gravity.
    pub fn with_self_gravity(mut self, enabled: bool) -> Self {
        self.config.self_gravity = enabled;
        self
    }

    /// Enable or disable cooling.
    pub fn with_cooling(mut self, enabled: bool) -> Self {
        self.config.cooling = enabled;
        self
    }

    /// Set the repartition strategy.
    pub fn with_repartition_type(mut self, t: RepartitionType) -> Self {
        self.config.repartition_type = t;
        self
    }

    /// Finish, producing the resolved config.
    pub fn build(self) -> EngineConfig {
        info!(nr_queues = self.config.nr_queues, "engine configuration resolved");
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_parameter_file() {
        let text = "% comment\nTimeIntegration:dt_min = 1e-8\nScheduler:nr_queues = 4\n";
        let p = ParameterMap::parse(text).unwrap();
        assert_eq!(p.get_f64("TimeIntegration:dt_min").unwrap(), 1e-8);
        assert_eq!(p.get_usize("Scheduler:nr_queues").unwrap(), 4);
    }

    #[test]
    fn missing_required_key_errors() {
        let p = ParameterMap::parse("").unwrap();
        assert!(p.get("TimeIntegration:dt_min").is_err());
    }

    #[test]
    fn malformed_line_errors() {
        assert!(ParameterMap::parse("not-a-kv-line").is_err());
    }

    #[test]
    fn engine_config_from_parameters_applies_overrides() {
        let p = ParameterMap::parse("DomainDecomposition:initial_type = m\n").unwrap();
        let cfg = EngineConfig::from_parameters(&p).unwrap();
        assert_eq!(cfg.initial_decomposition, InitialDecomposition::MetisParticles);
    }

    #[test]
    fn unknown_decomposition_type_is_a_config_error() {
        let p = ParameterMap::parse("DomainDecomposition:initial_type = q\n").unwrap();
        assert!(EngineConfig::from_parameters(&p).is_err());
    }

    #[test]
    fn builder_overrides_defaults() {
        let cfg = EngineBuilder::new().with_nr_queues(8).with_self_gravity(true).build();
        assert_eq!(cfg.nr_queues, 8);
        assert!(cfg.self_gravity);
    }
}
