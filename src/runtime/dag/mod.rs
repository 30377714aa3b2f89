//! Happens-before DAG
//!
//! Tasks are the nodes of the graph and the successor lists they hold are its
//! edges; there is no separate graph object. This module owns the rules for
//! growing that graph.
//!
//! - [`TaskId`](task_id::TaskId) - Unique identifier for a task
//! - [`TaskIdGenerator`](task_id::TaskIdGenerator) - Thread-safe ID generator
//! - [`ordered_before`](edge::ordered_before) - Transitive reachability query

pub mod edge;
pub mod task_id;

pub use edge::ordered_before;
pub use task_id::{TaskId, TaskIdGenerator};

#[cfg(test)]
mod tests;
