//! Metrics for the scheduler and engine (ambient stack, §10).
//!
//! ## Table of Contents
//! - **SchedulerMetrics**: Central Prometheus registry
//! - **Timer**: Simple wall-clock timer for duration metrics

use crate::error::Result;
use prometheus::{Counter, CounterVec, Gauge, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry};

/// Core metrics for the task scheduler and engine step loop.
pub struct SchedulerMetrics {
    registry: Registry,

    /// Tasks enqueued, by task type.
    pub tasks_enqueued: CounterVec,
    /// Tasks completed, by task type.
    pub tasks_done: CounterVec,
    /// Tasks skipped by the active pass mask.
    pub tasks_skipped: Counter,

    /// Work-stealing attempts and successes.
    pub steal_attempts: Counter,
    /// Work-stealing successes.
    pub steal_successes: Counter,

    /// Cell-tree rebuilds.
    pub rebuild_count: Counter,
    /// Rebuild duration.
    pub rebuild_duration: HistogramVec,
    /// Repartition operations.
    pub repartition_count: Counter,
    /// Repartition duration.
    pub repartition_duration: HistogramVec,

    /// Current queue depth, by worker.
    pub queue_depth: GaugeVec,

    /// Bytes sent/received over proxies, by peer rank and direction.
    pub proxy_bytes: CounterVec,

    /// Current simulation step number.
    pub step_number: Gauge,
    /// Duration of the last engine step.
    pub step_duration: HistogramVec,
}

impl SchedulerMetrics {
    /// Build a fresh registry with every metric registered.
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let tasks_enqueued = CounterVec::new(
            Opts::new("swift_tasks_enqueued_total", "Tasks enqueued"),
            &["task_type"],
        )?;
        let tasks_done = CounterVec::new(
            Opts::new("swift_tasks_done_total", "Tasks completed"),
            &["task_type"],
        )?;
        let tasks_skipped =
            Counter::new("swift_tasks_skipped_total", "Tasks skipped by pass mask")?;

        let steal_attempts =
            Counter::new("swift_steal_attempts_total", "Work-stealing attempts")?;
        let steal_successes =
            Counter::new("swift_steal_successes_total", "Work-stealing successes")?;

        let rebuild_count = Counter::new("swift_rebuild_total", "Cell-tree rebuilds")?;
        let rebuild_duration = HistogramVec::new(
            HistogramOpts::new("swift_rebuild_duration_seconds", "Cell-tree rebuild duration")
                .buckets(vec![0.001, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
            &["phase"],
        )?;
        let repartition_count =
            Counter::new("swift_repartition_total", "Repartition operations")?;
        let repartition_duration = HistogramVec::new(
            HistogramOpts::new("swift_repartition_duration_seconds", "Repartition duration")
                .buckets(vec![0.001, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
            &["strategy"],
        )?;

        let queue_depth = GaugeVec::new(
            Opts::new("swift_queue_depth", "Current queue depth"),
            &["worker"],
        )?;

        let proxy_bytes = CounterVec::new(
            Opts::new("swift_proxy_bytes_total", "Bytes exchanged over proxies"),
            &["peer", "direction"],
        )?;

        let step_number = Gauge::new("swift_step_number", "Current simulation step")?;
        let step_duration = HistogramVec::new(
            HistogramOpts::new("swift_step_duration_seconds", "Engine step duration")
                .buckets(vec![0.001, 0.01, 0.1, 1.0, 10.0, 60.0]),
            &["step_phase"],
        )?;

        registry.register(Box::new(tasks_enqueued.clone()))?;
        registry.register(Box::new(tasks_done.clone()))?;
        registry.register(Box::new(tasks_skipped.clone()))?;
        registry.register(Box::new(steal_attempts.clone()))?;
        registry.register(Box::new(steal_successes.clone()))?;
        registry.register(Box::new(rebuild_count.clone()))?;
        registry.register(Box::new(rebuild_duration.clone()))?;
        registry.register(Box::new(repartition_count.clone()))?;
        registry.register(Box::new(repartition_duration.clone()))?;
        registry.register(Box::new(queue_depth.clone()))?;
        registry.register(Box::new(proxy_bytes.clone()))?;
        registry.register(Box::new(step_number.clone()))?;
        registry.register(Box::new(step_duration.clone()))?;

        Ok(Self {
            registry,
            tasks_enqueued,
            tasks_done,
            tasks_skipped,
            steal_attempts,
            steal_successes,
            rebuild_count,
            rebuild_duration,
            repartition_count,
            repartition_duration,
            queue_depth,
            proxy_bytes,
            step_number,
            step_duration,
        })
    }

    /// Access the underlying registry (e.g. to merge with a host process's
    /// own registry).
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Record a task being enqueued.
    pub fn record_enqueued(&self, task_type: &str) {
        self.tasks_enqueued.with_label_values(&[task_type]).inc();
    }

    /// Record a task completing.
    pub fn record_done(&self, task_type: &str) {
        self.tasks_done.with_label_values(&[task_type]).inc();
    }

    /// Record a work-stealing attempt, and whether it succeeded.
    pub fn record_steal(&self, succeeded: bool) {
        self.steal_attempts.inc();
        if succeeded {
            self.steal_successes.inc();
        }
    }

    /// Record a completed rebuild.
    pub fn record_rebuild(&self, phase: &str, duration_secs: f64) {
        self.rebuild_count.inc();
        self.rebuild_duration.with_label_values(&[phase]).observe(duration_secs);
    }

    /// Record a completed repartition.
    pub fn record_repartition(&self, strategy: &str, duration_secs: f64) {
        self.repartition_count.inc();
        self.repartition_duration.with_label_values(&[strategy]).observe(duration_secs);
    }

    /// Update a worker's current queue depth.
    pub fn set_queue_depth(&self, worker: usize, depth: f64) {
        self.queue_depth.with_label_values(&[&worker.to_string()]).set(depth);
    }

    /// Record bytes exchanged with a peer rank.
    pub fn record_proxy_bytes(&self, peer: i32, direction: &str, bytes: u64) {
        self.proxy_bytes
            .with_label_values(&[&peer.to_string(), direction])
            .inc_by(bytes as f64);
    }

    /// Record the completion of an engine step.
    pub fn record_step(&self, step: u64, phase: &str, duration_secs: f64) {
        self.step_number.set(step as f64);
        self.step_duration.with_label_values(&[phase]).observe(duration_secs);
    }

    /// Gather all metrics as Prometheus text-exposition format.
    pub fn gather_text(&self) -> Result<String> {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer).map_err(|e| {
            crate::error::SwiftError::metrics(format!("encode error: {e}"))
        })?;
        String::from_utf8(buffer)
            .map_err(|e| crate::error::SwiftError::metrics(format!("utf8 error: {e}")))
    }
}

impl Default for SchedulerMetrics {
    fn default() -> Self {
        Self::new().expect("metric registration uses fixed, non-conflicting names")
    }
}

/// Wall-clock timer for duration metrics.
pub struct Timer {
    start: std::time::Instant,
}

impl Timer {
    /// Start a new timer.
    pub fn start() -> Self {
        Self { start: std::time::Instant::now() }
    }

    /// Elapsed seconds since start.
    pub fn elapsed_secs(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }

    /// Consume the timer, returning elapsed seconds.
    pub fn stop(self) -> f64 {
        self.elapsed_secs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_creation_registers_without_conflict() {
        let metrics = SchedulerMetrics::new().unwrap();
        assert!(metrics.gather_text().is_ok());
    }

    #[test]
    fn task_counters_increment() {
        let metrics = SchedulerMetrics::new().unwrap();
        metrics.record_enqueued("self");
        metrics.record_enqueued("self");
        metrics.record_done("self");

        let text = metrics.gather_text().unwrap();
        assert!(text.contains("swift_tasks_enqueued_total"));
        assert!(text.contains("swift_tasks_done_total"));
    }

    #[test]
    fn steal_metrics_track_success_rate() {
        let metrics = SchedulerMetrics::new().unwrap();
        metrics.record_steal(true);
        metrics.record_steal(false);
        let text = metrics.gather_text().unwrap();
        assert!(text.contains("swift_steal_attempts_total 2"));
        assert!(text.contains("swift_steal_successes_total 1"));
    }

    #[test]
    fn timer_measures_elapsed_time() {
        let timer = Timer::start();
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert!(timer.stop() > 0.0);
    }
}
