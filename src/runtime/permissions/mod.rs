//! Capability tracking
//!
//! Every tracked object has a [`KeyChain`] saying which tasks may read or
//! write it. Tasks move rights along happens-before edges: a parent adds a
//! child as reader before forking it, or hands its ownership to the child
//! outright. Checks only consult the keychain; they never block.

pub mod guarded;
pub mod keychain;
pub mod object_id;
pub mod registry;

pub use guarded::Guarded;
pub use keychain::{KeyChain, Transition};
pub use object_id::ObjectId;
pub use registry::{global, Registry};
