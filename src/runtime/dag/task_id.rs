//! Task identifiers
//!
//! Every task carries a process-unique identifier that is never reused.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

/// A unique identifier for a task in the happens-before graph.
///
/// `TaskId` is also the identity the capability layer stores in keychains,
/// so a keychain never keeps a task alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(pub usize);

impl TaskId {
    /// Create a new TaskId with the given value.
    ///
    /// # Examples
    ///
    /// ```
    /// use permflow::runtime::dag::TaskId;
    ///
    /// let id = TaskId::new(42);
    /// assert_eq!(id.value(), 42);
    /// ```
    #[inline]
    pub fn new(value: usize) -> Self {
        TaskId(value)
    }

    /// Returns the inner value of the task ID.
    #[inline]
    pub fn value(&self) -> usize {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "Task({})", self.0)
    }
}

/// Generator for creating unique task IDs.
#[derive(Debug)]
pub struct TaskIdGenerator {
    next_id: AtomicUsize,
}

/// Process-wide generator used by [`Task::new`](crate::runtime::scheduler::Task::new).
pub(crate) static TASK_IDS: TaskIdGenerator = TaskIdGenerator::starting_at(1);

impl TaskIdGenerator {
    /// Create a new task ID generator.
    ///
    /// # Examples
    ///
    /// ```
    /// use permflow::runtime::dag::TaskIdGenerator;
    ///
    /// let generator = TaskIdGenerator::new();
    /// let id1 = generator.generate();
    /// let id2 = generator.generate();
    /// assert_ne!(id1, id2);
    /// ```
    #[inline]
    pub const fn new() -> Self {
        Self::starting_at(0)
    }

    const fn starting_at(first: usize) -> Self {
        Self {
            next_id: AtomicUsize::new(first),
        }
    }

    /// Generate a new unique task ID.
    #[inline]
    pub fn generate(&self) -> TaskId {
        TaskId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for TaskIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}
