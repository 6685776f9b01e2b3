//! Execution engine for notebook cells.
//!
//! This module provides:
//! - [`Notebook`]: the scheduler that re-runs cells in dependency order
//! - [`RunContext`]: what a cell body sees while it runs
//! - [`InvalidationToken`]: the per-generation disposal contract
//! - [`CellCompiler`]: the seam turning source text into runnable bodies
//! - [`ModuleResolver`]: import resolution

mod compiler;
mod context;
mod invalidation;
mod modules;
mod scheduler;

pub use compiler::{BodyRegistry, CellBody, CellCompiler};
pub use context::{CellOutput, Emitter, KeyedEcho, NotebookObserver, RunContext};
pub(crate) use context::{Event, MutableUpdate};
pub use invalidation::InvalidationToken;
pub use modules::{ModuleResolver, ModuleSpec, NoModules, StaticModules};
pub use scheduler::Notebook;
