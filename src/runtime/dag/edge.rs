//! Happens-before edges
//!
//! An edge `P -> S` makes `P` retain `S`: `S` cannot become ready before `P`
//! retires. Edges are only accepted when they keep the graph acyclic and when
//! the issuing task is entitled to touch `S`.

use hashbrown::HashSet;
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::runtime::scheduler::task::{RetainOutcome, Task, TaskRef};

use super::TaskId;

/// Whether `earlier` is transitively ordered before `later`.
///
/// Walks successor lists depth first. Each list is copied out under its own
/// lock, so no two task locks are ever held together. Retired tasks have
/// dropped their successors and contribute no ordering.
pub fn ordered_before(
    earlier: &Task,
    later: &Task,
) -> bool {
    let target = later.id();
    let mut visited: HashSet<TaskId> = HashSet::new();
    let mut stack: Vec<TaskRef> = earlier.successors_snapshot().into_vec();

    while let Some(task) = stack.pop() {
        if task.id() == target {
            return true;
        }
        if visited.insert(task.id()) {
            stack.extend(task.successors_snapshot());
        }
    }
    false
}

/// Add the edge `from -> to` on behalf of the executing task `now`.
///
/// `checks` is the lock serializing checked insertions in one pool. While
/// it is held the acyclicity and provenance walks and the retain form one
/// step, so two concurrent edges cannot close a cycle between them. With
/// `None` the walks are skipped; the successor must still be in the future
/// either way, since the retain increment can never resurrect a task that
/// already became ready.
pub(crate) fn add_edge(
    now: &Task,
    from: &TaskRef,
    to: &TaskRef,
    checks: Option<&Mutex<()>>,
) -> Result<()> {
    if from.id() == to.id() {
        return Err(Error::CycleDetected {
            from: from.id(),
            to: to.id(),
        });
    }
    if !to.is_bound() {
        return Err(Error::Unbound(to.id()));
    }

    // taken before any task lock, never while one is held
    let serialized = checks.map(|edges| edges.lock());
    if serialized.is_some() {
        if ordered_before(to, from) {
            return Err(Error::CycleDetected {
                from: from.id(),
                to: to.id(),
            });
        }
        if now.id() != from.id() && !ordered_before(now, to) {
            return Err(Error::OrderingViolation {
                now: now.id(),
                from: from.id(),
                to: to.id(),
                reason: "the issuing task must happen before the successor",
            });
        }
    }

    match from.retain(to) {
        RetainOutcome::Retained => {
            debug!("{} retains {} ({:?})", from.id(), to.id(), to.state());
            Ok(())
        },
        RetainOutcome::AlreadyRetired => {
            trace!("{} already retired; edge to {} is satisfied", from.id(), to.id());
            Ok(())
        },
        RetainOutcome::SuccessorStarted => Err(Error::OrderingViolation {
            now: now.id(),
            from: from.id(),
            to: to.id(),
            reason: "the successor is no longer in the future",
        }),
    }
}
