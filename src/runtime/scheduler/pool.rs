//! Shared state of one fork-join pool.
//!
//! A pool lives for exactly one root submission. It counts outstanding
//! tasks (submitted but not yet finished) and shuts down when that count
//! drops to zero or when a body fails.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam::deque::Worker;
use parking_lot::{Condvar, Mutex};
use tracing::{debug, error};

use crate::error::Error;
use crate::runtime::dag::TaskId;
use crate::runtime::permissions::Registry;

use super::task::TaskRef;
use super::work_stealer::WorkStealer;
use super::SchedulerStats;

#[derive(Debug)]
pub(crate) struct Pool {
    pub(crate) stealer: WorkStealer,
    pub(crate) registry: Arc<Registry>,
    pub(crate) check_wellformedness: bool,
    pub(crate) stats: Arc<SchedulerStats>,
    idle_timeout: Duration,
    outstanding: AtomicUsize,
    finished: AtomicBool,
    aborted: AtomicBool,
    failure: Mutex<Option<Error>>,
    /// Held across checked edge insertions.
    edges: Mutex<()>,
    lock: Mutex<()>,
    /// Idle workers wait here for new work.
    wake: Condvar,
    /// The submitting thread waits here for shutdown.
    done: Condvar,
}

impl Pool {
    pub(crate) fn new(
        stealer: WorkStealer,
        registry: Arc<Registry>,
        check_wellformedness: bool,
        stats: Arc<SchedulerStats>,
        idle_timeout: Duration,
    ) -> Self {
        Self {
            stealer,
            registry,
            check_wellformedness,
            stats,
            idle_timeout,
            outstanding: AtomicUsize::new(0),
            finished: AtomicBool::new(false),
            aborted: AtomicBool::new(false),
            failure: Mutex::new(None),
            edges: Mutex::new(()),
            lock: Mutex::new(()),
            wake: Condvar::new(),
            done: Condvar::new(),
        }
    }

    /// The lock `add_edge` holds while checking, or `None` when edges are
    /// accepted unchecked.
    pub(crate) fn edge_checks(&self) -> Option<&Mutex<()>> {
        self.check_wellformedness.then_some(&self.edges)
    }

    /// Count and enqueue the root task.
    pub(crate) fn submit_root(
        &self,
        root: TaskRef,
    ) {
        self.outstanding.fetch_add(1, Ordering::AcqRel);
        self.stats.record_scheduled();
        self.stealer.inject(root);
    }

    /// Count a successor whose retain count reached zero and push it onto
    /// the releasing worker's deque.
    pub(crate) fn submit_local(
        &self,
        local: &Worker<TaskRef>,
        task: TaskRef,
    ) {
        let outstanding = self.outstanding.fetch_add(1, Ordering::AcqRel) + 1;
        self.stats.record_scheduled();
        self.stats.update_parallelism(outstanding);
        local.push(task);
        self.wake.notify_one();
    }

    /// One submitted task is done with; shuts the pool down on the last one.
    pub(crate) fn task_done(&self) {
        if self.outstanding.fetch_sub(1, Ordering::AcqRel) == 1 {
            debug!("no outstanding tasks left; shutting pool down");
            self.shutdown();
        }
    }

    /// Record the first failure and stop the pool.
    pub(crate) fn abort(
        &self,
        task: TaskId,
        err: Error,
    ) {
        error!("{} failed: {}", task, err);
        {
            let mut failure = self.failure.lock();
            if failure.is_none() {
                *failure = Some(err);
            }
        }
        self.aborted.store(true, Ordering::Release);
        self.shutdown();
    }

    pub(crate) fn shutdown(&self) {
        let _guard = self.lock.lock();
        self.finished.store(true, Ordering::Release);
        self.wake.notify_all();
        self.done.notify_all();
    }

    #[inline]
    pub(crate) fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    #[inline]
    pub(crate) fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::Acquire)
    }

    /// Sleep until new work may be available.
    pub(crate) fn park(&self) {
        let mut guard = self.lock.lock();
        if !self.is_finished() {
            self.wake.wait_for(&mut guard, self.idle_timeout);
        }
    }

    /// Block the submitting thread until the pool shuts down.
    pub(crate) fn wait_until_finished(&self) {
        let mut guard = self.lock.lock();
        while !self.is_finished() {
            self.done.wait(&mut guard);
        }
    }

    pub(crate) fn take_failure(&self) -> Option<Error> {
        self.failure.lock().take()
    }
}
