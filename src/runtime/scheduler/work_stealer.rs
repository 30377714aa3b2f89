//! Work stealing for load balancing across worker threads.
//!
//! Each worker owns a LIFO deque it pushes released successors onto. Root
//! tasks enter through a global injector. An idle worker first drains the
//! injector, then probes the other workers' deques starting from a random
//! victim.

use std::iter;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crossbeam::deque::{Injector, Steal, Stealer, Worker};
use rand::Rng;

use super::task::TaskRef;

/// Statistics about work stealing operations.
#[derive(Debug, Default)]
pub struct StealStats {
    /// Number of successful steals.
    pub steal_successes: AtomicUsize,
    /// Number of failed steal attempts.
    pub steal_failures: AtomicUsize,
    /// Total number of steal attempts.
    pub total_attempts: AtomicUsize,
}

impl StealStats {
    /// Record a successful steal.
    #[inline]
    pub fn record_success(&self) {
        self.steal_successes.fetch_add(1, Ordering::Relaxed);
        self.total_attempts.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a failed steal attempt.
    #[inline]
    pub fn record_failure(&self) {
        self.steal_failures.fetch_add(1, Ordering::Relaxed);
        self.total_attempts.fetch_add(1, Ordering::Relaxed);
    }

    /// Get success rate in `[0, 1]`.
    pub fn success_rate(&self) -> f64 {
        let total = self.total_attempts.load(Ordering::Relaxed);
        if total == 0 {
            return 1.0;
        }
        let successes = self.steal_successes.load(Ordering::Relaxed);
        successes as f64 / total as f64
    }
}

/// Shared half of the pool's queues.
#[derive(Debug)]
pub struct WorkStealer {
    /// Global queue for root submissions.
    injector: Injector<TaskRef>,
    /// One stealer per worker deque, indexed by worker id.
    stealers: Vec<Stealer<TaskRef>>,
    /// Statistics.
    stats: Arc<StealStats>,
}

impl WorkStealer {
    /// Create a work stealer and the local deques for `num_workers` workers.
    pub fn new(num_workers: usize) -> (Self, Vec<Worker<TaskRef>>) {
        let workers: Vec<Worker<TaskRef>> = (0..num_workers.max(1)).map(|_| Worker::new_lifo()).collect();
        let stealers = workers.iter().map(Worker::stealer).collect();

        let stealer = Self {
            injector: Injector::new(),
            stealers,
            stats: Arc::new(StealStats::default()),
        };
        (stealer, workers)
    }

    /// Get the number of workers.
    #[inline]
    pub fn num_workers(&self) -> usize {
        self.stealers.len()
    }

    /// Push a task onto the global queue.
    #[inline]
    pub fn inject(
        &self,
        task: TaskRef,
    ) {
        self.injector.push(task);
    }

    /// Find the next task for `worker_id`: local deque, then the global
    /// queue, then the other workers.
    pub fn find_task(
        &self,
        worker_id: usize,
        local: &Worker<TaskRef>,
    ) -> Option<TaskRef> {
        local
            .pop()
            .or_else(|| self.steal_global(local))
            .or_else(|| self.steal_random(worker_id))
    }

    /// Move a batch from the global queue into `local` and pop one of them.
    fn steal_global(
        &self,
        local: &Worker<TaskRef>,
    ) -> Option<TaskRef> {
        iter::repeat_with(|| self.injector.steal_batch_and_pop(local))
            .find(|steal| !steal.is_retry())
            .and_then(Steal::success)
    }

    /// Steal a single task, probing every other worker once from a random start.
    pub fn steal_random(
        &self,
        worker_id: usize,
    ) -> Option<TaskRef> {
        let num_workers = self.num_workers();
        if num_workers <= 1 {
            return None;
        }

        let start = rand::rng().random_range(0..num_workers);
        let found = (0..num_workers)
            .map(|offset| (start + offset) % num_workers)
            .filter(|&victim| victim != worker_id)
            .find_map(|victim| self.steal_from(victim));

        match found {
            Some(task) => {
                self.stats.record_success();
                Some(task)
            },
            None => {
                self.stats.record_failure();
                None
            },
        }
    }

    /// Steal from a specific victim's deque.
    fn steal_from(
        &self,
        victim_id: usize,
    ) -> Option<TaskRef> {
        let stealer = self.stealers.get(victim_id)?;
        iter::repeat_with(|| stealer.steal())
            .find(|steal| !steal.is_retry())
            .and_then(Steal::success)
    }

    /// Get steal statistics.
    #[inline]
    pub fn stats(&self) -> &Arc<StealStats> {
        &self.stats
    }
}
