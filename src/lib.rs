//! # swift-scheduler
//!
//! A task-based cell engine and scheduler for SPH/gravity simulations:
//! octree cell decomposition, a work-stealing task-graph runtime, and
//! MPI-style cross-rank cell exchange.
//!
//! ## Features
//!
//! - **Cell tree**: recursive octree decomposition with a hold-counter lock
//!   protocol for safe concurrent particle mutation
//! - **Task graph**: density/gradient/force/gravity passes compiled into a
//!   ranked, weighted DAG each rebuild
//! - **Scheduler**: per-worker queues with bounded work-stealing
//! - **Proxies**: MPI-style two-step cell exchange over a pluggable transport
//! - **Repartition**: graph-weighted k-way repartitioning between ranks
//! - **Restart/snapshot**: restart-file persistence and a snapshot manifest
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use swift_scheduler::{EngineBuilder, Engine, ParticleSet};
//! use swift_scheduler::storage::memory_store;
//!
//! #[tokio::main]
//! async fn main() -> swift_scheduler::Result<()> {
//!     let config = EngineBuilder::new().with_nr_queues(4).build();
//!     let particles = ParticleSet::new();
//!     let mut engine = Engine::new(config, particles, memory_store())?;
//!     engine.run(Some(10)).await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod cell;
pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod graph;
pub mod kernel;
pub mod metrics;
pub mod particle;
pub mod partition;
pub mod proxy;
pub mod queue;
pub mod resilience;
pub mod runner;
pub mod scheduler;
pub mod sid;
pub mod snapshot;
pub mod storage;
pub mod task;
pub mod types;

// Re-exports for ergonomic API
pub use cell::{Cell, CellArena};
pub use cli::DriverArgs;
pub use config::{EngineBuilder, EngineConfig};
pub use engine::{Engine, EngineState, RuntimeState};
pub use error::{Result, SwiftError};
pub use kernel::{Kernel, KernelSet};
pub use metrics::SchedulerMetrics;
pub use particle::{GPart, Particle, ParticleSet, SPart};
pub use proxy::{Proxy, ProxyMessage, Transport};
pub use runner::Runner;
pub use scheduler::Scheduler;
pub use snapshot::{SnapshotManifest, SnapshotWriter};
pub use storage::{FileStore, MemoryStore, RestartStore};
pub use task::{Task, TaskSubtype, TaskType};
pub use types::{CellId, Rank, StepTime, TaskId};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::cell::{Cell, CellArena};
    pub use crate::config::{EngineBuilder, EngineConfig};
    pub use crate::engine::Engine;
    pub use crate::error::Result;
    pub use crate::kernel::{Kernel, KernelSet};
    pub use crate::particle::ParticleSet;
    pub use crate::scheduler::Scheduler;
    pub use crate::types::{CellId, Rank, TaskId};
}
