//! KeyChains
//!
//! A keychain records which tasks may read or write one tracked object.
//! Keychains are immutable values: every transfer computes a replacement and
//! the registry swaps it in whole.
//!
//! | Variant | Readers | Writers |
//! |---|---|---|
//! | `Single(owner)` | owner | owner |
//! | `Multi(set)` | members | nobody |
//! | `Delegating(target)` | as target | as target |
//! | `Immutable` | everyone | nobody |
//! | `Shared` | everyone | everyone |

use std::fmt;

use indexmap::IndexSet;

use crate::runtime::dag::TaskId;

use super::ObjectId;

/// Capability attached to one tracked object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyChain {
    /// One task may read and write.
    Single(TaskId),
    /// Two or more tasks may read; nobody may write.
    Multi(IndexSet<TaskId>),
    /// Checks are answered by the keychain of another object.
    Delegating(ObjectId),
    /// Everyone may read, nobody may write. Terminal.
    Immutable,
    /// Everyone may read and write. Terminal.
    Shared,
}

/// Result of applying a transfer to a keychain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// The keychain already expresses the requested rights.
    Unchanged,
    /// Swap in this keychain.
    Replace(KeyChain),
}

impl KeyChain {
    /// Whether `now` may read. A delegating keychain must be resolved first
    /// and answers `false` here.
    pub fn can_read(
        &self,
        now: TaskId,
    ) -> bool {
        match self {
            KeyChain::Single(owner) => *owner == now,
            KeyChain::Multi(tasks) => tasks.contains(&now),
            KeyChain::Immutable | KeyChain::Shared => true,
            KeyChain::Delegating(_) => false,
        }
    }

    /// Whether `now` may write.
    pub fn can_write(
        &self,
        now: TaskId,
    ) -> bool {
        match self {
            KeyChain::Single(owner) => *owner == now,
            KeyChain::Shared => true,
            KeyChain::Multi(_) | KeyChain::Immutable | KeyChain::Delegating(_) => false,
        }
    }

    /// True only for a `Single` keychain owned by `now`.
    #[inline]
    pub fn is_owned_by(
        &self,
        now: TaskId,
    ) -> bool {
        matches!(self, KeyChain::Single(owner) if *owner == now)
    }

    #[inline]
    pub fn is_delegating(&self) -> bool {
        matches!(self, KeyChain::Delegating(_))
    }

    /// Immutable and Shared can never be left again.
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, KeyChain::Immutable | KeyChain::Shared)
    }

    /// `now` lets `reader` read too. `None` when `now` may not do that.
    pub fn add_reader(
        &self,
        now: TaskId,
        reader: TaskId,
    ) -> Option<Transition> {
        match self {
            KeyChain::Single(owner) if *owner == now => {
                if reader == *owner {
                    Some(Transition::Unchanged)
                } else {
                    let tasks: IndexSet<TaskId> = [*owner, reader].into_iter().collect();
                    Some(Transition::Replace(KeyChain::Multi(tasks)))
                }
            },
            KeyChain::Multi(tasks) if tasks.contains(&now) => {
                if tasks.contains(&reader) {
                    Some(Transition::Unchanged)
                } else {
                    let mut tasks = tasks.clone();
                    tasks.insert(reader);
                    Some(Transition::Replace(KeyChain::Multi(tasks)))
                }
            },
            // everybody reads already
            KeyChain::Immutable | KeyChain::Shared => Some(Transition::Unchanged),
            KeyChain::Single(_) | KeyChain::Multi(_) | KeyChain::Delegating(_) => None,
        }
    }

    /// `now` hands its key to `with`. `None` when `now` holds no key here.
    pub fn replace_owner(
        &self,
        now: TaskId,
        with: TaskId,
    ) -> Option<Transition> {
        match self {
            KeyChain::Single(owner) if *owner == now => {
                if with == now {
                    Some(Transition::Unchanged)
                } else {
                    Some(Transition::Replace(KeyChain::Single(with)))
                }
            },
            KeyChain::Multi(tasks) if tasks.contains(&now) => {
                if with == now {
                    return Some(Transition::Unchanged);
                }
                let mut tasks = tasks.clone();
                tasks.shift_remove(&now);
                tasks.insert(with);
                if tasks.len() == 1 {
                    Some(Transition::Replace(KeyChain::Single(with)))
                } else {
                    Some(Transition::Replace(KeyChain::Multi(tasks)))
                }
            },
            KeyChain::Immutable | KeyChain::Shared => Some(Transition::Unchanged),
            KeyChain::Single(_) | KeyChain::Multi(_) | KeyChain::Delegating(_) => None,
        }
    }
}

impl fmt::Display for KeyChain {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            KeyChain::Single(owner) => write!(f, "Single({})", owner),
            KeyChain::Multi(tasks) => {
                f.write_str("Multi{")?;
                for (i, task) in tasks.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", task)?;
                }
                f.write_str("}")
            },
            KeyChain::Delegating(target) => write!(f, "Delegating({})", target),
            KeyChain::Immutable => f.write_str("Immutable"),
            KeyChain::Shared => f.write_str("Shared"),
        }
    }
}
