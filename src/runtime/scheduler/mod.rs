//! Fork-join task scheduler
//!
//! The [`Scheduler`] runs a task graph rooted at one task on a fixed pool of
//! worker threads. A task is handed to the pool exactly when its retain count
//! reaches zero; when the last outstanding task finishes the pool is torn
//! down and [`Scheduler::submit_root`] returns.

pub mod context;
pub(crate) mod pool;
pub mod task;
pub mod work_stealer;

pub use context::{CurrentTask, TaskContext};
pub use task::{Task, TaskBody, TaskRef, TaskState, TaskValue};
pub use work_stealer::{StealStats, WorkStealer};

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam::deque::Worker;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::runtime::permissions::{self, Registry};
use crate::util::config::RuntimeConfig;

use pool::Pool;

/// Scheduler configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Number of worker threads.
    #[serde(default = "default_num_workers")]
    pub num_workers: usize,
    /// Worker thread stack size; `None` keeps the platform default.
    #[serde(default)]
    pub stack_size: Option<usize>,
    /// How long an idle worker sleeps before polling the queues again.
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,
}

fn default_num_workers() -> usize {
    thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

fn default_idle_timeout_ms() -> u64 {
    1
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            num_workers: default_num_workers(),
            stack_size: None,
            idle_timeout_ms: default_idle_timeout_ms(),
        }
    }
}

impl SchedulerConfig {
    /// Idle timeout as a duration.
    #[inline]
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }
}

/// Scheduler statistics, accumulated over every root submission.
#[derive(Debug, Default)]
pub struct SchedulerStats {
    /// Total tasks handed to a pool.
    pub tasks_scheduled: AtomicUsize,
    /// Total tasks whose body returned successfully.
    pub tasks_completed: AtomicUsize,
    /// Total tasks whose body failed.
    pub tasks_failed: AtomicUsize,
    /// Peak number of outstanding tasks in one pool.
    pub peak_parallelism: AtomicUsize,
    /// Total steal attempts across all pools.
    pub steal_attempts: AtomicUsize,
    /// Total successful steals across all pools.
    pub tasks_stolen: AtomicUsize,
}

impl SchedulerStats {
    /// Record a scheduled task.
    #[inline]
    pub fn record_scheduled(&self) {
        self.tasks_scheduled.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a completed task.
    #[inline]
    pub fn record_completed(&self) {
        self.tasks_completed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a failed task.
    #[inline]
    pub fn record_failed(&self) {
        self.tasks_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Update parallelism.
    #[inline]
    pub fn update_parallelism(
        &self,
        current: usize,
    ) {
        self.peak_parallelism.fetch_max(current, Ordering::Relaxed);
    }

    /// Fold one pool's steal counters into the totals.
    pub fn record_steals(
        &self,
        steals: &StealStats,
    ) {
        self.steal_attempts
            .fetch_add(steals.total_attempts.load(Ordering::Relaxed), Ordering::Relaxed);
        self.tasks_stolen
            .fetch_add(steals.steal_successes.load(Ordering::Relaxed), Ordering::Relaxed);
    }
}

/// Runs happens-before task graphs on a work-stealing pool.
#[derive(Debug)]
pub struct Scheduler {
    /// Configuration.
    config: SchedulerConfig,
    /// Capability registry shared with every task body.
    registry: Arc<Registry>,
    /// Whether `add_edge` checks acyclicity and provenance.
    check_wellformedness: bool,
    /// Statistics.
    stats: Arc<SchedulerStats>,
}

impl Scheduler {
    /// Create a scheduler with default config and the process-wide registry.
    #[inline]
    pub fn new() -> Self {
        Self::with_config(SchedulerConfig::default())
    }

    /// Create a scheduler with custom configuration.
    pub fn with_config(config: SchedulerConfig) -> Self {
        Self {
            config,
            registry: permissions::global(),
            check_wellformedness: true,
            stats: Arc::new(SchedulerStats::default()),
        }
    }

    /// Create a scheduler from a loaded runtime configuration.
    pub fn from_runtime_config(config: &RuntimeConfig) -> Self {
        Self::with_config(config.scheduler.clone()).with_wellformedness_checks(config.check_wellformedness)
    }

    /// Use `registry` instead of the process-wide one.
    #[inline]
    pub fn with_registry(
        mut self,
        registry: Arc<Registry>,
    ) -> Self {
        self.registry = registry;
        self
    }

    /// Turn the acyclicity and provenance checks of `add_edge` on or off.
    #[inline]
    pub fn with_wellformedness_checks(
        mut self,
        enabled: bool,
    ) -> Self {
        self.check_wellformedness = enabled;
        self
    }

    /// Get the number of workers.
    #[inline]
    pub fn num_workers(&self) -> usize {
        self.config.num_workers.max(1)
    }

    /// Get statistics.
    #[inline]
    pub fn stats(&self) -> &Arc<SchedulerStats> {
        &self.stats
    }

    /// Get the capability registry.
    #[inline]
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Run `body` as the root of a new task graph and wait for the graph.
    pub fn run<F>(
        &self,
        name: impl Into<String>,
        body: F,
    ) -> Result<()>
    where
        F: FnOnce(&TaskContext<'_>) -> anyhow::Result<()> + Send + 'static,
    {
        self.submit_root(Task::with_body(name, body))
    }

    /// Force `root` ready, execute it and everything it transitively
    /// schedules, and return once no task is outstanding.
    ///
    /// The first error escaping any body aborts the pool and is returned.
    pub fn submit_root(
        &self,
        root: TaskRef,
    ) -> Result<()> {
        if !root.is_bound() {
            return Err(Error::Unbound(root.id()));
        }
        if !root.force_ready() {
            return Err(Error::AlreadyScheduled(root.id()));
        }

        let (stealer, locals) = WorkStealer::new(self.num_workers());
        let pool = Arc::new(Pool::new(
            stealer,
            self.registry.clone(),
            self.check_wellformedness,
            self.stats.clone(),
            self.config.idle_timeout(),
        ));

        let root_id = root.id();
        debug!("submitting root {} to {} workers", root, locals.len());
        pool.submit_root(root);

        let workers = match self.spawn_workers(&pool, locals) {
            Ok(workers) => workers,
            Err((workers, err)) => {
                pool.shutdown();
                Self::join_workers(workers);
                return Err(Error::WorkerSpawn(err));
            },
        };

        pool.wait_until_finished();
        Self::join_workers(workers);

        let steals = pool.stealer.stats();
        self.stats.record_steals(steals);
        debug!(
            "root {} finished; {} steal attempts, success rate {:.2}",
            root_id,
            steals.total_attempts.load(Ordering::Relaxed),
            steals.success_rate()
        );

        match pool.take_failure() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Spawn worker threads.
    #[allow(clippy::type_complexity)]
    fn spawn_workers(
        &self,
        pool: &Arc<Pool>,
        locals: Vec<Worker<TaskRef>>,
    ) -> std::result::Result<Vec<thread::JoinHandle<()>>, (Vec<thread::JoinHandle<()>>, std::io::Error)> {
        let mut workers = Vec::with_capacity(locals.len());

        for (worker_id, local) in locals.into_iter().enumerate() {
            let pool = pool.clone();
            let mut builder = thread::Builder::new().name(format!("flow-worker-{}", worker_id));
            if let Some(stack_size) = self.config.stack_size {
                builder = builder.stack_size(stack_size);
            }

            match builder.spawn(move || Self::worker_loop(worker_id, local, &pool)) {
                Ok(worker) => workers.push(worker),
                Err(err) => return Err((workers, err)),
            }
        }

        Ok(workers)
    }

    fn join_workers(workers: Vec<thread::JoinHandle<()>>) {
        for worker in workers {
            if worker.join().is_err() {
                warn!("worker thread panicked outside a task body");
            }
        }
    }

    /// Worker thread main loop.
    fn worker_loop(
        worker_id: usize,
        local: Worker<TaskRef>,
        pool: &Pool,
    ) {
        trace!("worker {} started", worker_id);

        while !pool.is_finished() {
            match pool.stealer.find_task(worker_id, &local) {
                Some(task) => Self::execute_task(task, &local, pool),
                None => pool.park(),
            }
        }

        trace!("worker {} stopped", worker_id);
    }

    /// Run one ready task, release its successors, and account for it.
    fn execute_task(
        task: TaskRef,
        local: &Worker<TaskRef>,
        pool: &Pool,
    ) {
        // After an abort no further body may start.
        if pool.is_aborted() {
            pool.task_done();
            return;
        }

        task.begin();
        trace!("executing {}", task);

        let outcome = match task.take_body() {
            Some(body) => {
                let ctx = TaskContext::new(&task, pool);
                match panic::catch_unwind(AssertUnwindSafe(|| body(&ctx))) {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(err)) => Err(Error::from_body(err)),
                    Err(payload) => Err(Error::TaskPanicked {
                        task: task.id(),
                        message: panic_message(payload.as_ref()),
                    }),
                }
            },
            None => Err(Error::Unbound(task.id())),
        };

        match outcome {
            Ok(()) => {
                pool.stats.record_completed();
                for successor in task.retire() {
                    if successor.release() {
                        debug!("{} released {}; scheduling it", task.id(), successor.id());
                        pool.submit_local(local, successor);
                    } else {
                        trace!("{} released {} ({})", task.id(), successor.id(), successor.state());
                    }
                }
            },
            Err(err) => {
                pool.stats.record_failed();
                pool.abort(task.id(), err);
            },
        }

        pool.task_done();
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
