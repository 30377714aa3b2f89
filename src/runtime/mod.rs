//! Runtime system
//!
//! This module contains the happens-before task graph, the fork-join
//! scheduler that executes it, and the capability registry tasks use to
//! check their accesses.

pub mod dag;
pub mod permissions;
pub mod scheduler;
