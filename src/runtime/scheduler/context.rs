//! Execution context handed to every task body.
//!
//! There is no ambient "current task": a body receives a [`TaskContext`]
//! and every scheduler or capability call names its caller through it.
//! Tests can stand in for a task with a bare [`TaskId`].

use std::any::Any;
use std::sync::Arc;

use crate::error::Result;
use crate::runtime::dag::{edge, TaskId};
use crate::runtime::permissions::{ObjectId, Registry};

use super::pool::Pool;
use super::task::{Task, TaskRef};

/// Anything that can say which task is performing an operation.
pub trait CurrentTask {
    /// Identity of the calling task.
    fn current_task(&self) -> TaskId;
}

impl CurrentTask for TaskId {
    #[inline]
    fn current_task(&self) -> TaskId {
        *self
    }
}

impl CurrentTask for Task {
    #[inline]
    fn current_task(&self) -> TaskId {
        self.id()
    }
}

impl<T: CurrentTask + ?Sized> CurrentTask for &T {
    #[inline]
    fn current_task(&self) -> TaskId {
        (**self).current_task()
    }
}

impl<T: CurrentTask + ?Sized> CurrentTask for Arc<T> {
    #[inline]
    fn current_task(&self) -> TaskId {
        (**self).current_task()
    }
}

/// The view a running task has of the runtime.
pub struct TaskContext<'a> {
    task: &'a TaskRef,
    pool: &'a Pool,
}

impl CurrentTask for TaskContext<'_> {
    #[inline]
    fn current_task(&self) -> TaskId {
        self.task.id()
    }
}

impl<'a> TaskContext<'a> {
    pub(crate) fn new(
        task: &'a TaskRef,
        pool: &'a Pool,
    ) -> Self {
        Self { task, pool }
    }

    /// Identity of the executing task.
    #[inline]
    pub fn now(&self) -> TaskId {
        self.task.id()
    }

    /// The executing task.
    #[inline]
    pub fn task(&self) -> &TaskRef {
        self.task
    }

    /// Capability registry used by this pool.
    #[inline]
    pub fn registry(&self) -> &Arc<Registry> {
        &self.pool.registry
    }

    /// Create a new, uninitialized task.
    #[inline]
    pub fn create(
        &self,
        name: impl Into<String>,
    ) -> TaskRef {
        Task::new(name)
    }

    /// Add the happens-before edge `from -> to`.
    pub fn add_edge(
        &self,
        from: &TaskRef,
        to: &TaskRef,
    ) -> Result<()> {
        edge::add_edge(self.task, from, to, self.pool.edge_checks())
    }

    /// Create a task with `body` that runs after the current task retires.
    pub fn spawn<F>(
        &self,
        name: impl Into<String>,
        body: F,
    ) -> Result<TaskRef>
    where
        F: FnOnce(&TaskContext<'_>) -> anyhow::Result<()> + Send + 'static,
    {
        let task = Task::with_body(name, body);
        self.add_edge(self.task, &task)?;
        Ok(task)
    }

    /// Write the executing task's result.
    #[inline]
    pub fn set_result<T>(
        &self,
        value: T,
    ) -> Result<()>
    where
        T: Any + Send + Sync,
    {
        self.task.set_result(value)
    }

    /// Register a fresh object owned by the executing task.
    #[inline]
    pub fn new_object(&self) -> ObjectId {
        self.pool.registry.new_object(self)
    }

    /// Drop `object` from the registry; its handle stops resolving.
    #[inline]
    pub fn release(
        &self,
        object: ObjectId,
    ) -> Result<()> {
        self.pool.registry.release(object)
    }

    #[inline]
    pub fn register(
        &self,
        object: ObjectId,
    ) -> Result<()> {
        self.pool.registry.register(self, object)
    }

    #[inline]
    pub fn check_read(
        &self,
        object: ObjectId,
    ) -> Result<()> {
        self.pool.registry.check_read(self, object)
    }

    #[inline]
    pub fn check_write(
        &self,
        object: ObjectId,
    ) -> Result<()> {
        self.pool.registry.check_write(self, object)
    }

    #[inline]
    pub fn add_reader(
        &self,
        object: ObjectId,
        reader: &Task,
    ) -> Result<()> {
        self.pool.registry.add_reader(self, object, reader.id())
    }

    #[inline]
    pub fn replace_owner(
        &self,
        object: ObjectId,
        new_owner: &Task,
    ) -> Result<()> {
        self.pool.registry.replace_owner(self, object, new_owner.id())
    }

    #[inline]
    pub fn link(
        &self,
        master: ObjectId,
        slave: ObjectId,
    ) -> Result<()> {
        self.pool.registry.link(self, master, slave)
    }

    #[inline]
    pub fn unlink(
        &self,
        slave: ObjectId,
    ) -> Result<()> {
        self.pool.registry.unlink(self, slave)
    }

    #[inline]
    pub fn freeze_immutable(
        &self,
        object: ObjectId,
    ) -> Result<()> {
        self.pool.registry.freeze_immutable(self, object)
    }

    #[inline]
    pub fn freeze_shared(
        &self,
        object: ObjectId,
    ) -> Result<()> {
        self.pool.registry.freeze_shared(self, object)
    }
}
