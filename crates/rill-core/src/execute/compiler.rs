//! Turning cell source into runnable bodies.

use std::sync::Arc;

use rustc_hash::FxHashMap;

use super::context::RunContext;
use crate::error::CellError;
use crate::graph::CellNames;

/// A runnable cell body.
///
/// Called once per generation with a fresh context. Returning `Err` marks
/// the cell as errored; a panic is caught and reported the same way.
pub type CellBody = Arc<dyn Fn(&mut RunContext<'_>) -> Result<(), CellError> + Send + Sync>;

/// Compiles a cell's source once its names are known.
///
/// Compilation runs on every text edit, not on re-runs triggered by
/// upstream changes.
pub trait CellCompiler: Send + Sync {
    fn compile(&self, source: &str, names: &CellNames) -> Result<CellBody, CellError>;
}

/// Compiler backed by hand-written bodies, keyed by the trimmed source text.
///
/// Lets host code drive the scheduler with native Rust closures while the
/// name analysis still comes from the source.
#[derive(Default)]
pub struct BodyRegistry {
    bodies: FxHashMap<String, CellBody>,
}

impl BodyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, source: &str, body: F)
    where
        F: Fn(&mut RunContext<'_>) -> Result<(), CellError> + Send + Sync + 'static,
    {
        self.bodies.insert(source.trim().to_string(), Arc::new(body));
    }

    pub fn with<F>(mut self, source: &str, body: F) -> Self
    where
        F: Fn(&mut RunContext<'_>) -> Result<(), CellError> + Send + Sync + 'static,
    {
        self.register(source, body);
        self
    }
}

impl CellCompiler for BodyRegistry {
    fn compile(&self, source: &str, _names: &CellNames) -> Result<CellBody, CellError> {
        self.bodies
            .get(source.trim())
            .cloned()
            .ok_or_else(|| CellError::runtime(format!("no body registered for `{}`", source.trim())))
    }
}
