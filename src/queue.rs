//! Per-worker task queue with work stealing (§4.3).

use crate::types::TaskId;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

/// Maximum number of steal attempts before a worker gives up and sleeps.
pub const MAX_STEAL_ATTEMPTS: usize = 4;

/// A single worker's queue of ready tasks, weighted so the owner pops from
/// the LIFO end (cache-hot) while thieves steal from the FIFO end.
#[derive(Debug, Default)]
pub struct TaskQueue {
    tasks: Mutex<VecDeque<TaskId>>,
}

impl TaskQueue {
    /// An empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a newly-ready task onto the owner's end.
    pub fn push(&self, task: TaskId) {
        self.tasks.lock().push_back(task);
    }

    /// Pop from the owner's end (LIFO, for cache locality across a run).
    pub fn pop_own(&self) -> Option<TaskId> {
        self.tasks.lock().pop_back()
    }

    /// Pop from the opposite end (FIFO), used by a thief.
    pub fn steal(&self) -> Option<TaskId> {
        self.tasks.lock().pop_front()
    }

    /// Number of ready tasks currently queued.
    pub fn len(&self) -> usize {
        self.tasks.lock().len()
    }

    /// Whether the queue currently holds no tasks.
    pub fn is_empty(&self) -> bool {
        self.tasks.lock().is_empty()
    }
}

/// A fixed set of per-worker queues plus dedicated MPI progress queues,
/// with randomized stealing (§4.3).
#[derive(Debug)]
pub struct QueueSet {
    /// One queue per worker thread.
    pub workers: Vec<TaskQueue>,
    /// Dedicated send queue (excluded from stealing to preserve MPI order).
    pub send: TaskQueue,
    /// Dedicated recv queue (excluded from stealing).
    pub recv: TaskQueue,
}

impl QueueSet {
    /// Build a queue set for `n_workers` worker threads.
    pub fn new(n_workers: usize) -> Self {
        Self {
            workers: (0..n_workers).map(|_| TaskQueue::new()).collect(),
            send: TaskQueue::new(),
            recv: TaskQueue::new(),
        }
    }

    /// Total number of ready tasks across every queue (workers + MPI).
    pub fn total_len(&self) -> usize {
        self.workers.iter().map(TaskQueue::len).sum::<usize>() + self.send.len() + self.recv.len()
    }

    /// A worker's full get-task loop for this call: try its own queue, then
    /// drain the MPI send/recv queues in submission order, then attempt a
    /// bounded number of random steals from peer worker queues. `send`/`recv`
    /// are excluded from the *random* steal below to preserve MPI ordering
    /// (§4.3), but every worker still drains them directly and in FIFO order
    /// whenever its own queue runs dry — otherwise nothing would ever run a
    /// send/recv task at all.
    pub fn get_task(&self, worker: usize) -> Option<TaskId> {
        if let Some(t) = self.workers[worker].pop_own() {
            return Some(t);
        }
        if let Some(t) = self.send.steal() {
            return Some(t);
        }
        if let Some(t) = self.recv.steal() {
            return Some(t);
        }
        if self.workers.len() <= 1 {
            return None;
        }
        for _ in 0..MAX_STEAL_ATTEMPTS {
            let victim = next_index(worker, self.workers.len());
            if victim == worker {
                continue;
            }
            if let Some(t) = self.workers[victim].steal() {
                return Some(t);
            }
        }
        None
    }
}

/// Clock-seeded pick of a queue index other than `self`, avoiding a new
/// random-number dependency (mirrors `resilience::retry`'s `rand_jitter`,
/// which draws entropy from the wall clock rather than pulling in `rand`).
fn next_index(worker: usize, n: usize) -> usize {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::SystemTime::UNIX_EPOCH)
        .map(|d| d.subsec_nanos() as u64)
        .unwrap_or(0);
    let salt = COUNTER.fetch_add(1, Ordering::Relaxed);
    ((nanos ^ salt.wrapping_mul(2654435761)) as usize + worker + 1) % n
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn own_queue_pops_lifo() {
        let q = TaskQueue::new();
        q.push(TaskId(1));
        q.push(TaskId(2));
        assert_eq!(q.pop_own(), Some(TaskId(2)));
        assert_eq!(q.pop_own(), Some(TaskId(1)));
    }

    #[test]
    fn steal_pops_fifo() {
        let q = TaskQueue::new();
        q.push(TaskId(1));
        q.push(TaskId(2));
        assert_eq!(q.steal(), Some(TaskId(1)));
    }

    #[test]
    fn get_task_falls_back_to_stealing() {
        let qs = QueueSet::new(2);
        qs.workers[1].push(TaskId(9));
        assert_eq!(qs.get_task(0), Some(TaskId(9)));
    }

    #[test]
    fn single_worker_never_steals_from_itself() {
        let qs = QueueSet::new(1);
        assert_eq!(qs.get_task(0), None);
    }

    #[test]
    fn get_task_drains_send_and_recv_queues() {
        let qs = QueueSet::new(1);
        qs.send.push(TaskId(5));
        qs.recv.push(TaskId(6));
        assert_eq!(qs.get_task(0), Some(TaskId(5)));
        assert_eq!(qs.get_task(0), Some(TaskId(6)));
        assert_eq!(qs.get_task(0), None);
    }

    #[test]
    fn total_len_sums_all_queues() {
        let qs = QueueSet::new(2);
        qs.workers[0].push(TaskId(1));
        qs.send.push(TaskId(2));
        qs.recv.push(TaskId(3));
        assert_eq!(qs.total_len(), 3);
    }
}
