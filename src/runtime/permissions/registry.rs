//! Capability registry
//!
//! Maps object handles to their current keychain. Every mutation is an
//! optimistic loop: load the keychain, authorize the caller against it,
//! compute the replacement, compare-and-swap the slot, and start over if
//! another task swapped it first. Readers never retry; they observe either
//! the old or the new keychain, never a half-built one.
//!
//! Slots live in segments that double in size and are never moved, so a
//! handle is looked up without taking any lock. Released slots go on a free
//! list and come back with a bumped generation; handles from an earlier
//! generation are then reported as not registered.

use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use crossbeam::epoch::{self, Atomic, Guard, Owned, Shared};
use crossbeam::queue::SegQueue;
use once_cell::sync::Lazy;
use tracing::trace;

use crate::error::{Access, Error, Result};
use crate::runtime::dag::TaskId;
use crate::runtime::scheduler::CurrentTask;

use super::keychain::{KeyChain, Transition};
use super::ObjectId;

static NEXT_REGISTRY_TAG: AtomicU64 = AtomicU64::new(1);

static GLOBAL: Lazy<Arc<Registry>> = Lazy::new(|| Arc::new(Registry::new()));

/// The process-wide registry.
pub fn global() -> Arc<Registry> {
    GLOBAL.clone()
}

const FIRST_SEGMENT_BITS: u32 = 5;
const FIRST_SEGMENT_LEN: usize = 1 << FIRST_SEGMENT_BITS;
/// Enough segments to address every `u32` slot index.
const SEGMENTS: usize = (u32::BITS + 1 - FIRST_SEGMENT_BITS) as usize;

/// Segment and offset of slot `index`. Segment `k` holds
/// `FIRST_SEGMENT_LEN << k` slots.
fn locate(index: u32) -> (usize, usize) {
    let shifted = u64::from(index) + FIRST_SEGMENT_LEN as u64;
    let bit = u64::BITS - 1 - shifted.leading_zeros();
    let segment = (bit - FIRST_SEGMENT_BITS) as usize;
    let offset = (shifted - (1u64 << bit)) as usize;
    (segment, offset)
}

/// What one slot holds for one generation. `None` means issued but not
/// registered yet, or released and waiting for reuse.
struct Cell {
    generation: u32,
    keychain: Option<KeyChain>,
}

struct Segment {
    slots: Box<[Atomic<Cell>]>,
}

impl Segment {
    fn new(len: usize) -> Self {
        Self {
            slots: (0..len).map(|_| Atomic::null()).collect(),
        }
    }
}

impl Drop for Segment {
    fn drop(&mut self) {
        // SAFETY: a segment is only dropped with its registry, so no other
        // thread can still load these slots; swapped-out cells were handed
        // to the collector.
        unsafe {
            let guard = epoch::unprotected();
            for slot in self.slots.iter() {
                let cell = slot.load(Ordering::Relaxed, guard);
                if !cell.is_null() {
                    drop(cell.into_owned());
                }
            }
        }
    }
}

/// Concurrent map from [`ObjectId`] to [`KeyChain`].
pub struct Registry {
    tag: u64,
    segments: [Atomic<Segment>; SEGMENTS],
    /// Next never-used slot index.
    next: AtomicU32,
    /// Released slots, ready to be reissued.
    free: SegQueue<u32>,
    live: AtomicUsize,
}

impl fmt::Debug for Registry {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("Registry")
            .field("tag", &self.tag)
            .field("live", &self.len())
            .field("free", &self.free.len())
            .finish()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Registry {
    fn drop(&mut self) {
        // SAFETY: `&mut self` proves no other thread holds a guard-bound
        // reference into the segments.
        unsafe {
            let guard = epoch::unprotected();
            for segment in self.segments.iter() {
                let segment = segment.load(Ordering::Relaxed, guard);
                if !segment.is_null() {
                    drop(segment.into_owned());
                }
            }
        }
    }
}

impl Registry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            tag: NEXT_REGISTRY_TAG.fetch_add(1, Ordering::Relaxed),
            segments: std::array::from_fn(|_| Atomic::null()),
            next: AtomicU32::new(0),
            free: SegQueue::new(),
            live: AtomicUsize::new(0),
        }
    }

    /// Number of handles issued and not released.
    pub fn len(&self) -> usize {
        self.live.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of released slots waiting to be reissued.
    pub fn free_slots(&self) -> usize {
        self.free.len()
    }

    /// Issue a handle for an object that is not registered yet.
    pub fn allocate(&self) -> ObjectId {
        self.issue(None)
    }

    /// Issue a handle already registered to `now`.
    pub fn new_object(
        &self,
        now: impl CurrentTask,
    ) -> ObjectId {
        let now = now.current_task();
        let object = self.issue(Some(KeyChain::Single(now)));
        trace!("{} registers {}", now, object);
        object
    }

    fn issue(
        &self,
        keychain: Option<KeyChain>,
    ) -> ObjectId {
        let guard = &epoch::pin();
        let reused = self
            .free
            .pop()
            .and_then(|index| self.slot_at(index, guard).map(|slot| (index, slot)));
        let (index, slot) = match reused {
            Some(reused) => reused,
            None => self.fresh_slot(guard),
        };

        let current = slot.load(Ordering::Acquire, guard);
        // SAFETY: cells are only reclaimed through `defer_destroy` and
        // `guard` keeps this thread pinned.
        let generation = unsafe { current.as_ref() }.map_or(0, |cell| cell.generation);
        // no handle for this generation exists yet, so nothing races the store
        let previous = slot.swap(Owned::new(Cell { generation, keychain }), Ordering::AcqRel, guard);
        if !previous.is_null() {
            // SAFETY: `previous` is unreachable from the slot now.
            unsafe { guard.defer_destroy(previous) };
        }

        self.live.fetch_add(1, Ordering::Relaxed);
        ObjectId {
            registry: self.tag,
            index,
            generation,
        }
    }

    fn fresh_slot<'g>(
        &'g self,
        guard: &'g Guard,
    ) -> (u32, &'g Atomic<Cell>) {
        let index = self.next.fetch_add(1, Ordering::Relaxed);
        let (segment, offset) = locate(index);
        let head = &self.segments[segment];

        let mut current = head.load(Ordering::Acquire, guard);
        if current.is_null() {
            let fresh = Owned::new(Segment::new(FIRST_SEGMENT_LEN << segment));
            current = match head.compare_exchange(Shared::null(), fresh, Ordering::AcqRel, Ordering::Acquire, guard) {
                Ok(installed) => installed,
                // another thread installed it first; ours is dropped
                Err(err) => err.current,
            };
        }
        // SAFETY: non-null here, and segments are only freed with the registry.
        let segment = unsafe { current.deref() };
        (index, &segment.slots[offset])
    }

    /// Release `object`, making its slot available for a new handle.
    ///
    /// Every copy of the handle, and every object delegating to it, is
    /// reported as not registered from now on.
    pub fn release(
        &self,
        object: ObjectId,
    ) -> Result<()> {
        let guard = &epoch::pin();
        let slot = self.slot(object, guard)?;
        loop {
            let (current, _) = Self::cell(slot, object, guard)?;
            let vacant = Owned::new(Cell {
                generation: object.generation.wrapping_add(1),
                keychain: None,
            });
            if slot
                .compare_exchange(current, vacant, Ordering::AcqRel, Ordering::Acquire, guard)
                .is_ok()
            {
                // SAFETY: `current` is unreachable from the slot now.
                unsafe { guard.defer_destroy(current) };
                self.free.push(object.index);
                self.live.fetch_sub(1, Ordering::Relaxed);
                trace!("released {}", object);
                return Ok(());
            }
        }
    }

    /// Give `object` the keychain `Single(now)`.
    pub fn register(
        &self,
        now: impl CurrentTask,
        object: ObjectId,
    ) -> Result<()> {
        let now = now.current_task();
        let guard = &epoch::pin();
        let slot = self.slot(object, guard)?;
        loop {
            let (current, cell) = Self::cell(slot, object, guard)?;
            if cell.keychain.is_some() {
                return Err(Error::AlreadyRegistered(object));
            }
            let registered = Owned::new(Cell {
                generation: object.generation,
                keychain: Some(KeyChain::Single(now)),
            });
            if slot
                .compare_exchange(current, registered, Ordering::AcqRel, Ordering::Acquire, guard)
                .is_ok()
            {
                // SAFETY: `current` is unreachable from the slot now.
                unsafe { guard.defer_destroy(current) };
                trace!("{} registers {}", now, object);
                return Ok(());
            }
        }
    }

    /// Fail with `AccessDenied` unless `now` may read `object`.
    pub fn check_read(
        &self,
        now: impl CurrentTask,
        object: ObjectId,
    ) -> Result<()> {
        self.check(now.current_task(), object, Access::Read, KeyChain::can_read)
    }

    /// Fail with `AccessDenied` unless `now` may write `object`.
    pub fn check_write(
        &self,
        now: impl CurrentTask,
        object: ObjectId,
    ) -> Result<()> {
        self.check(now.current_task(), object, Access::Write, KeyChain::can_write)
    }

    fn check(
        &self,
        now: TaskId,
        object: ObjectId,
        access: Access,
        allowed: fn(&KeyChain, TaskId) -> bool,
    ) -> Result<()> {
        let guard = &epoch::pin();
        let (_, keychain) = self.load(object, guard)?;
        let effective = self.resolve(keychain, guard)?;
        if allowed(effective, now) {
            Ok(())
        } else {
            Err(self.denied(access, now, object, keychain, guard))
        }
    }

    /// Let `reader` read `object` as well; `now` must be able to read it.
    pub fn add_reader(
        &self,
        now: impl CurrentTask,
        object: ObjectId,
        reader: TaskId,
    ) -> Result<()> {
        let now = now.current_task();
        self.update(object, |keychain, guard| {
            keychain
                .add_reader(now, reader)
                .ok_or_else(|| self.denied(Access::AddReader, now, object, keychain, guard))
        })
    }

    /// Hand `now`'s key for `object` to `new_owner`.
    pub fn replace_owner(
        &self,
        now: impl CurrentTask,
        object: ObjectId,
        new_owner: TaskId,
    ) -> Result<()> {
        let now = now.current_task();
        self.update(object, |keychain, guard| {
            keychain
                .replace_owner(now, new_owner)
                .ok_or_else(|| self.denied(Access::ReplaceOwner, now, object, keychain, guard))
        })
    }

    /// Make `slave` answer every check with `master`'s keychain.
    ///
    /// `now` must solely own `slave`, which therefore cannot be delegating
    /// already, and `master` must not be delegating either. The master is
    /// read outside the swap on `slave`, so a concurrent link of `master`
    /// itself can still leave a two-hop chain; `resolve` follows one hop
    /// only, so such a chain grants nothing.
    pub fn link(
        &self,
        now: impl CurrentTask,
        master: ObjectId,
        slave: ObjectId,
    ) -> Result<()> {
        let now = now.current_task();
        self.update(slave, |keychain, guard| {
            if master == slave || !keychain.is_owned_by(now) {
                return Err(self.denied(Access::Link, now, slave, keychain, guard));
            }
            let (_, master_keychain) = self.load(master, guard)?;
            if master_keychain.is_delegating() {
                return Err(self.denied(Access::Link, now, master, master_keychain, guard));
            }
            Ok(Transition::Replace(KeyChain::Delegating(master)))
        })
    }

    /// Give `slave` its own keychain again, owned by `now`.
    ///
    /// `now` must solely own the master `slave` delegates to.
    pub fn unlink(
        &self,
        now: impl CurrentTask,
        slave: ObjectId,
    ) -> Result<()> {
        let now = now.current_task();
        self.update(slave, |keychain, guard| {
            if keychain.is_delegating() && self.resolve(keychain, guard)?.is_owned_by(now) {
                Ok(Transition::Replace(KeyChain::Single(now)))
            } else {
                Err(self.denied(Access::Unlink, now, slave, keychain, guard))
            }
        })
    }

    /// Make `object` readable by everyone and writable by nobody, forever.
    pub fn freeze_immutable(
        &self,
        now: impl CurrentTask,
        object: ObjectId,
    ) -> Result<()> {
        self.freeze(now.current_task(), object, KeyChain::Immutable)
    }

    /// Make `object` readable and writable by everyone, forever.
    pub fn freeze_shared(
        &self,
        now: impl CurrentTask,
        object: ObjectId,
    ) -> Result<()> {
        self.freeze(now.current_task(), object, KeyChain::Shared)
    }

    fn freeze(
        &self,
        now: TaskId,
        object: ObjectId,
        target: KeyChain,
    ) -> Result<()> {
        self.update(object, |keychain, guard| {
            let writable = self.resolve(keychain, guard)?.can_write(now);
            if !writable || (keychain.is_terminal() && *keychain != target) {
                return Err(self.denied(Access::Freeze, now, object, keychain, guard));
            }
            if *keychain == target {
                Ok(Transition::Unchanged)
            } else {
                Ok(Transition::Replace(target.clone()))
            }
        })
    }

    /// Whether `object` is (or delegates to) an immutable keychain.
    pub fn is_immutable(
        &self,
        object: ObjectId,
    ) -> bool {
        matches!(self.effective_keychain(object), Ok(KeyChain::Immutable))
    }

    /// Whether `object` is (or delegates to) a shared keychain.
    pub fn is_shared(
        &self,
        object: ObjectId,
    ) -> bool {
        matches!(self.effective_keychain(object), Ok(KeyChain::Shared))
    }

    /// Whether `now` is the sole owner of `object`, following delegation.
    pub fn is_owned_by(
        &self,
        now: impl CurrentTask,
        object: ObjectId,
    ) -> bool {
        let now = now.current_task();
        self.effective_keychain(object)
            .map(|keychain| keychain.is_owned_by(now))
            .unwrap_or(false)
    }

    /// Snapshot of the keychain stored for `object`.
    pub fn keychain(
        &self,
        object: ObjectId,
    ) -> Result<KeyChain> {
        let guard = &epoch::pin();
        let (_, keychain) = self.load(object, guard)?;
        Ok(keychain.clone())
    }

    /// Snapshot of the keychain that answers checks on `object`.
    pub fn effective_keychain(
        &self,
        object: ObjectId,
    ) -> Result<KeyChain> {
        let guard = &epoch::pin();
        let (_, keychain) = self.load(object, guard)?;
        Ok(self.resolve(keychain, guard)?.clone())
    }

    fn slot_at<'g>(
        &'g self,
        index: u32,
        guard: &'g Guard,
    ) -> Option<&'g Atomic<Cell>> {
        let (segment, offset) = locate(index);
        let segment = self.segments[segment].load(Ordering::Acquire, guard);
        // SAFETY: segments are only freed with the registry.
        unsafe { segment.as_ref() }.map(|segment| &segment.slots[offset])
    }

    fn slot<'g>(
        &'g self,
        object: ObjectId,
        guard: &'g Guard,
    ) -> Result<&'g Atomic<Cell>> {
        if object.registry != self.tag {
            return Err(Error::NotRegistered(object));
        }
        self.slot_at(object.index, guard).ok_or(Error::NotRegistered(object))
    }

    /// The cell `object` refers to, registered or not. A cell of another
    /// generation means the handle is stale.
    fn cell<'g>(
        slot: &Atomic<Cell>,
        object: ObjectId,
        guard: &'g Guard,
    ) -> Result<(Shared<'g, Cell>, &'g Cell)> {
        let current = slot.load(Ordering::Acquire, guard);
        // SAFETY: a cell is only reclaimed through `defer_destroy` after it
        // was swapped out, and `guard` keeps this thread pinned.
        match unsafe { current.as_ref() } {
            Some(cell) if cell.generation == object.generation => Ok((current, cell)),
            _ => Err(Error::NotRegistered(object)),
        }
    }

    fn load<'g>(
        &self,
        object: ObjectId,
        guard: &'g Guard,
    ) -> Result<(Shared<'g, Cell>, &'g KeyChain)> {
        let slot = self.slot(object, guard)?;
        Self::registered(slot, object, guard)
    }

    fn registered<'g>(
        slot: &Atomic<Cell>,
        object: ObjectId,
        guard: &'g Guard,
    ) -> Result<(Shared<'g, Cell>, &'g KeyChain)> {
        let (current, cell) = Self::cell(slot, object, guard)?;
        match &cell.keychain {
            Some(keychain) => Ok((current, keychain)),
            None => Err(Error::NotRegistered(object)),
        }
    }

    /// Follow one delegation hop. A target that started delegating itself
    /// after the link is returned as is and grants nothing.
    fn resolve<'g>(
        &self,
        keychain: &'g KeyChain,
        guard: &'g Guard,
    ) -> Result<&'g KeyChain> {
        match keychain {
            KeyChain::Delegating(target) => {
                let (_, target_keychain) = self.load(*target, guard)?;
                Ok(target_keychain)
            },
            other => Ok(other),
        }
    }

    /// The optimistic read-authorize-swap loop shared by every transfer.
    fn update<F>(
        &self,
        object: ObjectId,
        mut transition: F,
    ) -> Result<()>
    where
        F: FnMut(&KeyChain, &Guard) -> Result<Transition>,
    {
        let guard = &epoch::pin();
        let slot = self.slot(object, guard)?;
        loop {
            let (current, keychain) = Self::registered(slot, object, guard)?;
            let next = match transition(keychain, guard)? {
                Transition::Unchanged => return Ok(()),
                Transition::Replace(next) => next,
            };
            trace!("{}: {} -> {}", object, keychain, next);

            let replacement = Owned::new(Cell {
                generation: object.generation,
                keychain: Some(next),
            });
            match slot.compare_exchange(current, replacement, Ordering::AcqRel, Ordering::Acquire, guard) {
                Ok(_) => {
                    // SAFETY: `current` is unreachable from the slot now;
                    // readers that loaded it are pinned and the collector
                    // waits for them.
                    unsafe { guard.defer_destroy(current) };
                    return Ok(());
                },
                Err(_) => trace!("{}: keychain swapped concurrently; retrying", object),
            }
        }
    }

    fn denied(
        &self,
        access: Access,
        task: TaskId,
        object: ObjectId,
        keychain: &KeyChain,
        guard: &Guard,
    ) -> Error {
        let keychain = match self.resolve(keychain, guard) {
            Ok(effective) if keychain.is_delegating() => format!("{} -> {}", keychain, effective),
            _ => keychain.to_string(),
        };
        Error::AccessDenied {
            access,
            task,
            object,
            keychain,
        }
    }
}
