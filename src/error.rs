//! Runtime errors
//!
//! Every error here describes a programming mistake in the client task graph
//! rather than an operational fault. None of them is recovered locally: an
//! error escaping a task body aborts the whole worker pool and is returned to
//! whoever submitted the root task.

use std::fmt;

use thiserror::Error;

use crate::runtime::dag::TaskId;
use crate::runtime::permissions::ObjectId;
use crate::util::config::ConfigError;

/// Runtime result
pub type Result<T> = std::result::Result<T, Error>;

/// The kind of access a task attempted on a tracked object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Access {
    Read,
    Write,
    AddReader,
    ReplaceOwner,
    Link,
    Unlink,
    Freeze,
}

impl fmt::Display for Access {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        let name = match self {
            Access::Read => "read",
            Access::Write => "write",
            Access::AddReader => "add a reader to",
            Access::ReplaceOwner => "hand over",
            Access::Link => "link",
            Access::Unlink => "unlink",
            Access::Freeze => "freeze",
        };
        f.write_str(name)
    }
}

/// Runtime errors
#[derive(Debug, Error)]
pub enum Error {
    #[error("{task} cannot {access} {object}; keychain={keychain}")]
    AccessDenied {
        /// What the task tried to do
        access: Access,
        /// The task that was refused
        task: TaskId,
        /// The tracked object
        object: ObjectId,
        /// Rendering of the keychain observed at the time of the check
        keychain: String,
    },

    #[error("{0} was already registered; register an object only once")]
    AlreadyRegistered(ObjectId),

    #[error("no keychain for {0}; register the object before checking it")]
    NotRegistered(ObjectId),

    #[error("happens-before edge {from} -> {to} would create a cycle")]
    CycleDetected {
        /// Predecessor of the rejected edge
        from: TaskId,
        /// Successor of the rejected edge
        to: TaskId,
    },

    #[error("{now} cannot add happens-before edge {from} -> {to}: {reason}")]
    OrderingViolation {
        /// The task issuing the edge
        now: TaskId,
        /// Predecessor of the rejected edge
        from: TaskId,
        /// Successor of the rejected edge
        to: TaskId,
        /// Which rule was broken
        reason: &'static str,
    },

    #[error("result of {0} has already been set")]
    ResultAlreadySet(TaskId),

    #[error("{0} already has a body bound")]
    AlreadyBound(TaskId),

    #[error("{0} has no body bound")]
    Unbound(TaskId),

    #[error("{0} was already scheduled and cannot be submitted as a root")]
    AlreadyScheduled(TaskId),

    #[error("{task} panicked: {message}")]
    TaskPanicked {
        /// The task whose body panicked
        task: TaskId,
        /// Panic payload, if it was a string
        message: String,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to spawn worker thread: {0}")]
    WorkerSpawn(#[source] std::io::Error),

    /// An error raised by client code inside a task body.
    #[error(transparent)]
    Task(#[from] anyhow::Error),
}

impl Error {
    /// Recover a runtime error from whatever a task body returned.
    ///
    /// Bodies return `anyhow::Result`, so runtime errors raised with `?`
    /// inside a body arrive wrapped; unwrap them so the caller of the root
    /// task sees the runtime error kind it raised.
    pub(crate) fn from_body(err: anyhow::Error) -> Self {
        match err.downcast::<Error>() {
            Ok(err) => err,
            Err(err) => Error::Task(err),
        }
    }

    /// Whether this is an access-control failure.
    #[inline]
    pub fn is_access_denied(&self) -> bool {
        matches!(self, Error::AccessDenied { .. })
    }
}
