//! Values whose every access is checked against their keychain.

use std::fmt;
use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::trace;

use crate::error::Result;
use crate::runtime::scheduler::CurrentTask;

use super::{ObjectId, Registry};

/// A value registered as one tracked object.
///
/// `read` and `write` run `check_read` / `check_write` for the caller
/// before handing out a guard; the lock only keeps the Rust aliasing rules,
/// the keychain decides who may ask. Dropping the value releases its
/// registry slot.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use permflow::runtime::dag::TaskId;
/// use permflow::runtime::permissions::{Guarded, Registry};
///
/// let registry = Arc::new(Registry::new());
/// let owner = TaskId::new(1);
/// let counter = Guarded::new(registry, owner, 0u32);
///
/// *counter.write(owner).unwrap() += 1;
/// assert_eq!(*counter.read(owner).unwrap(), 1);
/// assert!(counter.read(TaskId::new(2)).is_err());
/// ```
pub struct Guarded<T> {
    registration: Registration,
    value: RwLock<T>,
}

/// Releases the slot when the tracked value goes away.
struct Registration {
    id: ObjectId,
    registry: Arc<Registry>,
}

impl Drop for Registration {
    fn drop(&mut self) {
        if let Err(err) = self.registry.release(self.id) {
            trace!("{} was already released: {}", self.id, err);
        }
    }
}

impl<T> Guarded<T> {
    /// Register `value` as a new object owned by `now`.
    pub fn new(
        registry: Arc<Registry>,
        now: impl CurrentTask,
        value: T,
    ) -> Self {
        let id = registry.new_object(now);
        Self {
            registration: Registration { id, registry },
            value: RwLock::new(value),
        }
    }

    /// Handle of the tracked object.
    #[inline]
    pub fn id(&self) -> ObjectId {
        self.registration.id
    }

    #[inline]
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registration.registry
    }

    /// Read access for `now`.
    pub fn read(
        &self,
        now: impl CurrentTask,
    ) -> Result<RwLockReadGuard<'_, T>> {
        self.registry().check_read(now, self.id())?;
        Ok(self.value.read())
    }

    /// Write access for `now`.
    pub fn write(
        &self,
        now: impl CurrentTask,
    ) -> Result<RwLockWriteGuard<'_, T>> {
        self.registry().check_write(now, self.id())?;
        Ok(self.value.write())
    }

    /// Give up tracking, release the slot and return the value.
    pub fn into_inner(self) -> T {
        let Guarded { registration, value } = self;
        drop(registration);
        value.into_inner()
    }
}

impl<T> fmt::Debug for Guarded<T> {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("Guarded")
            .field("id", &self.id())
            .field("keychain", &self.registry().keychain(self.id()).ok())
            .finish_non_exhaustive()
    }
}
