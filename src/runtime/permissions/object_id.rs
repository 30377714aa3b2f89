//! Handles for tracked objects.

use std::fmt;

/// Opaque handle to an object tracked by a [`Registry`](super::Registry).
///
/// Handles are issued by the registry and keyed by arena slot. They remember
/// which registry issued them, so a handle presented to a different registry
/// is reported as not registered instead of aliasing an unrelated slot. The
/// generation does the same for a slot that was released and reissued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectId {
    pub(crate) registry: u64,
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

impl ObjectId {
    /// Arena slot of this handle.
    #[inline]
    pub fn index(&self) -> u32 {
        self.index
    }

    /// How many times the slot was released before this handle was issued.
    #[inline]
    pub fn generation(&self) -> u32 {
        self.generation
    }
}

impl fmt::Display for ObjectId {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        if self.generation == 0 {
            write!(f, "Object({})", self.index)
        } else {
            write!(f, "Object({}#{})", self.index, self.generation)
        }
    }
}
