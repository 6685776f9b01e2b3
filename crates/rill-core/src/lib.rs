//! Core engine for the Rill reactive notebook runtime.
//!
//! This crate provides:
//! - Name analysis and the incremental dependency graph
//! - Reactive value cells (constant, promise, generator, mutable)
//! - The scheduler with per-generation invalidation
//! - Deterministic value formatting and keyed echo tables
//! - A small interpreter for Rust-syntax cells

pub mod config;
pub mod error;
pub mod execute;
pub mod graph;
pub mod inspect;
pub mod interp;
pub mod value;
pub mod view;

pub use config::RuntimeConfig;
pub use error::{CellError, Error, Result};
pub use execute::{
    BodyRegistry, CellBody, CellCompiler, CellOutput, Emitter, InvalidationToken, ModuleResolver,
    ModuleSpec, Notebook, NotebookObserver, RunContext, StaticModules,
};
pub use graph::{
    CellId, CellNames, CellSource, CellStatus, DependencyGraph, IdAllocator, NameAnalyzer,
    SourceSpan, split_cells,
};
pub use inspect::{FormatOptions, Indent, KeyedEchoAggregator, Quote, format};
pub use interp::Interpreter;
pub use value::{Function, MutableHandle, Produced, Value, ValueCell, ValueKind, ValueState};
pub use view::{BindingView, CellView};
