//! Graph engine for dependency resolution.
//!
//! This module provides:
//! - Name analysis of cell source (declared and free names)
//! - Splitting notebook text into cells with stable ids
//! - Incremental dependency graph maintenance
//! - Topological ordering and cycle detection

mod analyzer;
mod dependency;
mod source;
mod types;

pub use analyzer::NameAnalyzer;
pub(crate) use analyzer::{parse_stmts, syntax_error};
pub use dependency::DependencyGraph;
pub use source::{CellSource, IdAllocator, SourceBlock, split_cells};
pub use types::{CellId, CellNames, CellStatus, SourceSpan};
