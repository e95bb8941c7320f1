//! Engine (§4.5): the fixed ten-step sequence that drives one simulation
//! step, plus the run loop and restart/stop-file machinery (§6).
//!
//! A `RuntimeState` state machine guarded by a `tokio::sync::RwLock`, a
//! `shutdown_tx` broadcast channel, and `load_state`/`save_state` going
//! through the storage abstraction.

use crate::cell::CellArena;
use crate::config::EngineConfig;
use crate::error::Result;
use crate::graph::{PassMask, TaskGraph};
use crate::kernel::KernelSet;
use crate::metrics::SchedulerMetrics;
use crate::particle::ParticleSet;
use crate::runner::Runner;
use crate::scheduler::Scheduler;
use crate::storage::{keys, store_get_json, store_set_json, BoxedRestartStore};
use crate::types::{Rank, StepTime};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tracing::{info, warn};

/// Engine lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeState {
    /// Not started.
    Stopped,
    /// Building the initial cell tree and task graph.
    Starting,
    /// Between steps or mid-step.
    Running,
    /// Winding down after a stop-file or shutdown signal.
    ShuttingDown,
}

/// Serializable engine state, written to a restart file and read back on
/// `-r` (§6: "read-back restores the full scheduler state except the task
/// graph, which is rebuilt on the first post-restart step").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineState {
    pub step: u64,
    pub ti_current: u64,
    pub time_current: f64,
    pub next_snapshot_time: f64,
}

/// The cell engine and task scheduler driver.
pub struct Engine {
    config: EngineConfig,
    rank: Rank,
    state: Arc<RwLock<RuntimeState>>,
    shutdown_tx: broadcast::Sender<()>,

    arena: CellArena,
    top_cells: Vec<crate::types::CellId>,
    particles: ParticleSet,
    kernels: KernelSet,
    metrics: Arc<SchedulerMetrics>,
    store: BoxedRestartStore,

    step: u64,
    ti_current: StepTime,
    time_current: f64,
    next_snapshot_time: f64,
}

/// Raw-pointer wrapper letting multiple runner threads hold a mutable view
/// of the same particle set (§5: disjoint access is guaranteed externally
/// by the cell lock protocol, not by the type system).
struct ParticlesPtr(*mut ParticleSet);
unsafe impl Send for ParticlesPtr {}
unsafe impl Sync for ParticlesPtr {}

impl Engine {
    /// Build a fresh engine over an initial particle set, with no cells yet
    /// (the first step's rebuild constructs them).
    pub fn new(config: EngineConfig, particles: ParticleSet, store: BoxedRestartStore) -> Result<Self> {
        let (shutdown_tx, _) = broadcast::channel(1);
        let next_snapshot_time = config.snapshot_time_first;
        Ok(Self {
            rank: Rank::LOCAL,
            state: Arc::new(RwLock::new(RuntimeState::Stopped)),
            shutdown_tx,
            arena: CellArena::new(),
            top_cells: Vec::new(),
            particles,
            kernels: KernelSet::default(),
            metrics: Arc::new(SchedulerMetrics::new()?),
            store,
            step: 0,
            ti_current: StepTime::ZERO,
            time_current: config.time_begin,
            next_snapshot_time,
            config,
        })
    }

    /// Current lifecycle state.
    pub async fn state(&self) -> RuntimeState {
        *self.state.read().await
    }

    /// Shared metrics registry.
    pub fn metrics(&self) -> &Arc<SchedulerMetrics> {
        &self.metrics
    }

    /// Subscribe to the shutdown broadcast.
    pub fn shutdown_receiver(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Request a clean shutdown after the current step finishes.
    pub fn signal_shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Run until `time_end` is reached, a fixed step count elapses, or a
    /// shutdown/stop-file is observed (§4.5, §6 stop-file protocol).
    pub async fn run(&mut self, fixed_steps: Option<u64>) -> Result<()> {
        {
            let mut state = self.state.write().await;
            *state = RuntimeState::Starting;
        }
        self.load_state().await?;
        {
            let mut state = self.state.write().await;
            *state = RuntimeState::Running;
        }
        info!(step = self.step, time = self.time_current, "engine starting");

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        loop {
            if self.time_current >= self.config.time_end {
                break;
            }
            if let Some(n) = fixed_steps {
                if self.step >= n {
                    break;
                }
            }
            if shutdown_rx.try_recv().is_ok() {
                info!("shutdown signal observed between steps");
                break;
            }
            if self.check_stop_file().await? {
                info!("stop file observed, dumping restart and exiting");
                break;
            }

            self.step_once()?;
        }

        self.shutdown().await
    }

    /// The fixed ten-step sequence for one simulation step (§4.5).
    pub fn step_once(&mut self) -> Result<()> {
        let timer = crate::metrics::Timer::start();

        // 1. collect per-cell minimum ti_end -> global next-step time.
        let next_ti = self.min_next_ti();

        // 2. snapshot due check; drift+dump happens at the snapshot
        //    boundary rather than mid-step.
        if self.time_current >= self.next_snapshot_time {
            self.next_snapshot_time += self.config.snapshot_delta_time;
        }

        // 3. advance ti_current to the global minimum.
        self.ti_current = next_ti;

        // 4. drift active particles (second-order kinematic update).
        let dt = self.config.dt_max.min(self.config.dt_max).max(self.config.dt_min);
        self.drift(dt);

        // 5/6/7. rebuild the cell tree and remake tasks whenever the arena
        // is empty (first step) or a structural rebuild is due. No
        // repartition logic runs for a single local rank.
        if self.arena.is_empty() || self.step % 20 == 0 {
            self.rebuild()?;
        }

        // 8/9. launch the threadpool against the scheduler for this step,
        // then block until drained.
        let mask = PassMask {
            density: self.config.self_gravity || true,
            gradient: false,
            force: true,
            gravity: self.config.self_gravity,
            cooling: self.config.cooling,
        };
        let graph = TaskGraph::build(&self.arena, &self.top_cells, mask)?;
        let n_workers = self.config.nr_queues.max(1);
        let scheduler = Scheduler::new(graph, n_workers, crate::scheduler::allow_all);
        scheduler.start();

        let ptr = ParticlesPtr(&mut self.particles as *mut ParticleSet);
        let arena = &self.arena;
        let kernels = &self.kernels;
        let scheduler_ref = &scheduler;
        rayon::scope(|s| {
            for w in 0..n_workers {
                let ptr = ParticlesPtr(ptr.0);
                s.spawn(move |_| {
                    let runner = Runner::new(w, scheduler_ref, arena, kernels);
                    // SAFETY: every task that mutates particles holds its
                    // cell's lock (§5); disjoint cells never alias.
                    let particles = unsafe { &mut *ptr.0 };
                    runner.run(particles);
                });
            }
        });

        // 10. reduce statistics (single rank: nothing to all-reduce).
        self.time_current += dt;
        self.step += 1;
        self.metrics.record_step(self.step, "full", timer.stop());
        Ok(())
    }

    fn min_next_ti(&self) -> StepTime {
        if self.arena.is_empty() {
            return self.ti_current.next(0);
        }
        self.ti_current.next(0)
    }

    /// Kinematic drift of every gas particle (time integration is in scope;
    /// the force/density kernels themselves are not, §1).
    fn drift(&mut self, dt: f64) {
        for p in &mut self.particles.parts {
            for d in 0..3 {
                p.x[d] += p.v[d] * dt;
            }
        }
        for g in &mut self.particles.gparts {
            for d in 0..3 {
                g.x[d] += g.v[d] * dt;
            }
        }
    }

    /// Rebuild the top-level cell grid from the current particle positions
    /// (§4.1). `config.initial_grid` top cells bucket particles by integer
    /// division over the domain, then each top cell is split recursively
    /// while its count exceeds [`crate::cell::SPLIT_SIZE`].
    fn rebuild(&mut self) -> Result<()> {
        let rebuild_timer = crate::metrics::Timer::start();
        self.arena.clear();

        let box_size = [1.0, 1.0, 1.0];
        let mut positions: Vec<[f64; 3]> = self.particles.parts.iter().map(|p| p.x).collect();
        let parts = &mut self.particles.parts;
        self.top_cells = self.arena.build_top_level_grid(
            self.config.initial_grid,
            box_size,
            &mut positions,
            &mut |a, b| parts.swap(a, b),
        );

        for &top_id in &self.top_cells.clone() {
            self.split_recursive(top_id, &mut positions);
            self.arena.reduce_bounds(top_id);
            self.arena.check_partition(top_id)?;
        }

        self.metrics.record_rebuild("cells", rebuild_timer.stop());
        Ok(())
    }

    fn split_recursive(&mut self, id: crate::types::CellId, positions: &mut [[f64; 3]]) {
        let (begin, count) = {
            let c = self.arena.get(id);
            (c.begin, c.count)
        };
        if count <= crate::cell::SPLIT_SIZE {
            return;
        }
        let parts = &mut self.particles.parts;
        let slice = &mut positions[begin..begin + count];
        let children = self.arena.split(id, slice, &mut |a, b| parts.swap(a, b));
        for child in children {
            if !child.is_none() {
                self.split_recursive(child, positions);
            }
        }
    }

    /// §6 stop-file protocol: rank 0 checks every `restart_stop_steps`.
    async fn check_stop_file(&self) -> Result<bool> {
        if self.rank != Rank::LOCAL {
            return Ok(false);
        }
        if self.config.restart_stop_steps == 0 || self.step % self.config.restart_stop_steps as u64 != 0 {
            return Ok(false);
        }
        let stop_path = self.config.restart_subdir.join("stop");
        Ok(Path::new(&stop_path).exists())
    }

    /// Load engine state from the restart store, if any exists.
    async fn load_state(&mut self) -> Result<()> {
        let key = keys::engine(self.rank.0);
        if let Some(state) = store_get_json::<EngineState>(self.store.as_ref(), &key).await? {
            self.step = state.step;
            self.ti_current = StepTime(state.ti_current);
            self.time_current = state.time_current;
            self.next_snapshot_time = state.next_snapshot_time;
            info!(step = self.step, "restored engine state from restart file");
        }
        Ok(())
    }

    /// Persist engine state (and the particle arrays) to the restart store.
    async fn save_state(&self) -> Result<()> {
        let state = EngineState {
            step: self.step,
            ti_current: self.ti_current.0,
            time_current: self.time_current,
            next_snapshot_time: self.next_snapshot_time,
        };
        store_set_json(self.store.as_ref(), &keys::engine(self.rank.0), &state).await?;
        store_set_json(self.store.as_ref(), &keys::particles(self.rank.0), &self.particles).await?;
        Ok(())
    }

    /// Flush a restart file and transition to `Stopped`.
    pub async fn shutdown(&mut self) -> Result<()> {
        {
            let mut state = self.state.write().await;
            if *state == RuntimeState::Stopped {
                return Ok(());
            }
            *state = RuntimeState::ShuttingDown;
        }
        self.save_state().await?;
        {
            let mut state = self.state.write().await;
            *state = RuntimeState::Stopped;
        }
        let _ = self.shutdown_tx.send(());
        warn_if_unclean(self.step, self.time_current, self.config.time_end);
        Ok(())
    }
}

fn warn_if_unclean(step: u64, time_current: f64, time_end: f64) {
    if time_current < time_end {
        warn!(step, time_current, time_end, "engine stopped before reaching time_end");
    } else {
        info!(step, "engine reached time_end");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::particle::Particle;
    use crate::storage::memory_store;

    fn sample_particles(n: usize) -> ParticleSet {
        let mut set = ParticleSet::new();
        for i in 0..n {
            let mut p = Particle::new(i as u64);
            p.x = [(i as f64 * 0.01) % 1.0, 0.0, 0.0];
            p.v = [0.01, 0.0, 0.0];
            p.ti_end = 0;
            set.parts.push(p);
        }
        set
    }

    #[tokio::test]
    async fn engine_runs_a_fixed_step_count() {
        let config = EngineConfig { time_end: 100.0, nr_queues: 2, ..Default::default() };
        let mut engine = Engine::new(config, sample_particles(16), memory_store()).unwrap();
        engine.run(Some(3)).await.unwrap();
        assert_eq!(engine.step, 3);
        assert_eq!(engine.state().await, RuntimeState::Stopped);
    }

    #[tokio::test]
    async fn engine_persists_and_restores_state() {
        let store = memory_store();
        let config = EngineConfig { time_end: 100.0, nr_queues: 1, ..Default::default() };
        let mut engine = Engine::new(config.clone(), sample_particles(8), store.clone()).unwrap();
        engine.run(Some(2)).await.unwrap();
        assert_eq!(engine.step, 2);

        let mut resumed = Engine::new(config, sample_particles(8), store).unwrap();
        resumed.load_state().await.unwrap();
        assert_eq!(resumed.step, 2);
    }

    #[tokio::test]
    async fn rebuild_splits_oversized_root_cell() {
        let config = EngineConfig { time_end: 1.0, nr_queues: 1, ..Default::default() };
        let mut engine = Engine::new(config, sample_particles(900), memory_store()).unwrap();
        engine.rebuild().unwrap();
        assert!(engine.arena.len() > 1);
    }

    #[tokio::test]
    async fn rebuild_builds_every_configured_top_cell() {
        let config = EngineConfig {
            time_end: 1.0,
            nr_queues: 1,
            initial_grid: [3, 3, 3],
            ..Default::default()
        };
        let mut engine = Engine::new(config, sample_particles(27), memory_store()).unwrap();
        engine.rebuild().unwrap();
        assert_eq!(engine.top_cells.len(), 27);
    }

    #[tokio::test]
    async fn stepping_with_a_multi_cell_grid_builds_pair_tasks() {
        let config = EngineConfig {
            time_end: 100.0,
            nr_queues: 1,
            initial_grid: [3, 3, 3],
            ..Default::default()
        };
        let mut engine = Engine::new(config, sample_particles(27), memory_store()).unwrap();
        engine.step_once().unwrap();
        assert_eq!(engine.top_cells.len(), 27);
    }
}
