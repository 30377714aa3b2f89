//! Task definitions for the scheduler.
//!
//! A task's whole lifecycle is encoded in one atomic retain counter:
//!
//! ```text
//! UNINITIALIZED --edge--> Pending(n) --release--> Ready(0) --> EXECUTING --> RETIRED
//!       \_________________ submit_root __________/
//! ```
//!
//! Transitions only move forward. Once out of `UNINITIALIZED`, a positive
//! counter equals the number of live predecessors that retain the task.

use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use smallvec::SmallVec;

use crate::error::{Error, Result};
use crate::runtime::dag::{self, task_id::TASK_IDS, TaskId};

use super::context::TaskContext;

/// Shared handle to a task.
pub type TaskRef = Arc<Task>;

/// Type-erased value stored in a task's result slot.
pub type TaskValue = Arc<dyn Any + Send + Sync>;

/// The work a task runs once all of its predecessors have retired.
pub type TaskBody = Box<dyn FnOnce(&TaskContext<'_>) -> anyhow::Result<()> + Send + 'static>;

/// Successor list; most tasks fork or join only a handful of others.
pub(crate) type Successors = SmallVec<[TaskRef; 4]>;

const UNINITIALIZED: i64 = -99;
const EXECUTING: i64 = -42;
const RETIRED: i64 = -84;

/// Task state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Nobody has added an edge into the task yet.
    Uninitialized,
    /// Waiting for this many predecessors to retire.
    Pending(usize),
    /// All predecessors retired; handed to the pool.
    Ready,
    /// Body is running on a worker.
    Executing,
    /// Body finished and successors were released.
    Retired,
}

impl TaskState {
    #[inline]
    fn from_count(count: i64) -> Self {
        match count {
            UNINITIALIZED => TaskState::Uninitialized,
            EXECUTING => TaskState::Executing,
            RETIRED => TaskState::Retired,
            0 => TaskState::Ready,
            n if n > 0 => TaskState::Pending(n as usize),
            n => unreachable!("illegal retain count {}", n),
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            TaskState::Uninitialized => f.write_str("UNINITIALIZED"),
            TaskState::Pending(n) => write!(f, "PENDING({})", n),
            TaskState::Ready => f.write_str("READY"),
            TaskState::Executing => f.write_str("EXECUTING"),
            TaskState::Retired => f.write_str("RETIRED"),
        }
    }
}

/// What happened when a predecessor tried to retain a successor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RetainOutcome {
    Retained,
    AlreadyRetired,
    SuccessorStarted,
}

/// A schedulable unit of work.
pub struct Task {
    /// Unique task ID.
    id: TaskId,
    /// Task name for debugging.
    name: String,
    /// Retain counter doubling as the state word.
    retain_count: AtomicI64,
    /// Tasks this task retains. The lock also orders retirement against
    /// concurrent edge insertion.
    successors: Mutex<Successors>,
    /// The work to run; taken when the task starts.
    body: Mutex<Option<TaskBody>>,
    /// Set once a body was bound, even after it has been taken.
    bound: AtomicBool,
    /// Write-once result slot.
    result: OnceCell<TaskValue>,
}

impl fmt::Debug for Task {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("state", &self.state())
            .field("bound", &self.is_bound())
            .finish()
    }
}

impl fmt::Display for Task {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "{}({}, {})", self.id, self.name, self.state())
    }
}

impl Task {
    /// Create a new, uninitialized task with no body.
    pub fn new(name: impl Into<String>) -> TaskRef {
        let id = TASK_IDS.generate();
        let mut name = name.into();
        if name.is_empty() {
            name = id.to_string();
        }
        Arc::new(Self {
            id,
            name,
            retain_count: AtomicI64::new(UNINITIALIZED),
            successors: Mutex::new(SmallVec::new()),
            body: Mutex::new(None),
            bound: AtomicBool::new(false),
            result: OnceCell::new(),
        })
    }

    /// Create a task and bind its body in one step.
    pub fn with_body<F>(
        name: impl Into<String>,
        body: F,
    ) -> TaskRef
    where
        F: FnOnce(&TaskContext<'_>) -> anyhow::Result<()> + Send + 'static,
    {
        let task = Self::new(name);
        *task.body.lock() = Some(Box::new(body));
        task.bound.store(true, Ordering::Release);
        task
    }

    /// Get the task ID.
    #[inline]
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Get the task name.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the current state.
    #[inline]
    pub fn state(&self) -> TaskState {
        TaskState::from_count(self.retain_count.load(Ordering::Acquire))
    }

    /// Whether a body has been bound.
    #[inline]
    pub fn is_bound(&self) -> bool {
        self.bound.load(Ordering::Acquire)
    }

    /// Whether the task has not started yet.
    #[inline]
    pub fn is_in_future(&self) -> bool {
        matches!(self.state(), TaskState::Uninitialized | TaskState::Pending(_))
    }

    /// Whether the task has retired.
    #[inline]
    pub fn has_retired(&self) -> bool {
        self.state() == TaskState::Retired
    }

    /// Attach the work to run. A task accepts exactly one body.
    pub fn bind<F>(
        &self,
        body: F,
    ) -> Result<()>
    where
        F: FnOnce(&TaskContext<'_>) -> anyhow::Result<()> + Send + 'static,
    {
        let mut slot = self.body.lock();
        if self.bound.load(Ordering::Acquire) {
            return Err(Error::AlreadyBound(self.id));
        }
        *slot = Some(Box::new(body));
        self.bound.store(true, Ordering::Release);
        Ok(())
    }

    /// Whether this task is transitively ordered before `later`.
    #[inline]
    pub fn is_ordered_before(
        &self,
        later: &Task,
    ) -> bool {
        dag::ordered_before(self, later)
    }

    /// Read the result as `T`.
    ///
    /// Returns `None` if nothing was written yet or the value is not a `T`.
    pub fn result<T>(&self) -> Option<Arc<T>>
    where
        T: Any + Send + Sync,
    {
        self.result
            .get()
            .cloned()
            .and_then(|value| value.downcast::<T>().ok())
    }

    /// Whether the result slot has been written.
    #[inline]
    pub fn has_result(&self) -> bool {
        self.result.get().is_some()
    }

    /// Write the result. A second write fails with `ResultAlreadySet`.
    pub fn set_result<T>(
        &self,
        value: T,
    ) -> Result<()>
    where
        T: Any + Send + Sync,
    {
        self.result
            .set(Arc::new(value))
            .map_err(|_| Error::ResultAlreadySet(self.id))
    }

    /// Copy of the successor list.
    pub(crate) fn successors_snapshot(&self) -> Successors {
        self.successors.lock().clone()
    }

    /// Retain `later` on behalf of an edge `self -> later`.
    ///
    /// Runs under this task's successor lock so that it cannot interleave
    /// with this task's retirement.
    pub(crate) fn retain(
        &self,
        later: &TaskRef,
    ) -> RetainOutcome {
        let mut successors = self.successors.lock();
        if self.retain_count.load(Ordering::Acquire) == RETIRED {
            return RetainOutcome::AlreadyRetired;
        }
        if !later.increment() {
            return RetainOutcome::SuccessorStarted;
        }
        successors.push(later.clone());
        RetainOutcome::Retained
    }

    /// UNINITIALIZED -> 1, or n -> n + 1 for a pending task.
    fn increment(&self) -> bool {
        let mut current = self.retain_count.load(Ordering::Acquire);
        loop {
            let next = match current {
                UNINITIALIZED => 1,
                n if n > 0 => n + 1,
                _ => return false,
            };
            match self.retain_count.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    /// Drop one retain; `true` when this was the last one.
    pub(crate) fn release(&self) -> bool {
        let previous = self.retain_count.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(previous > 0, "released {} with retain count {}", self.id, previous);
        previous == 1
    }

    /// UNINITIALIZED -> Ready, used for root tasks only.
    pub(crate) fn force_ready(&self) -> bool {
        self.retain_count
            .compare_exchange(UNINITIALIZED, 0, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Ready -> EXECUTING.
    pub(crate) fn begin(&self) {
        let previous = self.retain_count.swap(EXECUTING, Ordering::AcqRel);
        debug_assert_eq!(previous, 0, "{} started with retain count {}", self.id, previous);
    }

    /// EXECUTING -> RETIRED; hands back the tasks to release.
    pub(crate) fn retire(&self) -> Successors {
        let mut successors = self.successors.lock();
        self.retain_count.store(RETIRED, Ordering::Release);
        std::mem::take(&mut *successors)
    }

    /// Take the executor closure from the task.
    #[inline]
    pub(crate) fn take_body(&self) -> Option<TaskBody> {
        self.body.lock().take()
    }
}
