//! permflow
//!
//! A task-parallel runtime that catches data races while the program runs.
//! Work is a DAG of tasks joined by explicit happens-before edges; every
//! object tasks share carries a keychain saying who may read or write it,
//! and rights move between tasks along those edges.
//!
//! # Example
//!
//! ```rust
//! use permflow::{Scheduler, Task};
//!
//! fn main() -> permflow::Result<()> {
//!     Scheduler::new().run("main", |ctx| {
//!         let data = ctx.new_object();
//!         let join = Task::with_body("join", move |ctx| Ok(ctx.check_write(data)?));
//!         ctx.add_edge(ctx.task(), &join)?;
//!
//!         let handoff = join.clone();
//!         let reader = ctx.spawn("reader", move |ctx| {
//!             ctx.check_read(data)?;
//!             ctx.replace_owner(data, &handoff)?;
//!             Ok(())
//!         })?;
//!         ctx.add_edge(&reader, &join)?;
//!         ctx.add_reader(data, &reader)?;
//!         ctx.replace_owner(data, &join)?;
//!         Ok(())
//!     })
//! }
//! ```

#![doc(html_root_url = "https://docs.rs/permflow")]
#![warn(rust_2018_idioms)]

pub mod error;
pub mod runtime;
pub mod util;

// Re-exports
pub use error::{Access, Error, Result};
pub use runtime::dag::TaskId;
pub use runtime::permissions::{Guarded, KeyChain, ObjectId, Registry};
pub use runtime::scheduler::{CurrentTask, Scheduler, SchedulerConfig, Task, TaskContext, TaskRef, TaskState};
pub use util::config::RuntimeConfig;

use tracing::debug;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Run `body` as the root task on a scheduler configured from the
/// environment, and wait for everything it spawns.
///
/// # Example
///
/// ```no_run
/// fn main() -> permflow::Result<()> {
///     permflow::run("main", |ctx| {
///         let object = ctx.new_object();
///         ctx.freeze_immutable(object)?;
///         Ok(())
///     })
/// }
/// ```
pub fn run<F>(
    name: impl Into<String>,
    body: F,
) -> Result<()>
where
    F: FnOnce(&TaskContext<'_>) -> anyhow::Result<()> + Send + 'static,
{
    let config = RuntimeConfig::from_env()?;
    util::logger::init_with_level(config.log_level);
    debug!("permflow {} starting with {:?}", VERSION, config);
    Scheduler::from_runtime_config(&config).run(name, body)
}
