//! Interpreter for Rust-syntax cells.
//!
//! Cells are sequences of Rust statements evaluated by a tree-walking
//! interpreter over `syn` syntax trees. Numbers are `f64`; tuples and arrays
//! are both arrays; struct literals build instances of the named class, and
//! `Object { .. }` builds a plain object.
//!
//! Built-ins, unless shadowed by a cell or a local:
//! - `echo(..)`, `echo.key(k)(v)`, `echo.clear()`, `echo.dispose(f)`
//! - `invalidation.then(f)`
//! - `let x = delay(ms, v)` and `let x = reject(ms, message)` (promises)
//! - `let x = interval(ms, count)` (a generator of `0, 1, ..`)
//! - `let (x, set_x, get_x) = mutable(initial)`
//! - `import("name@version", ..)`
//! - `vec!`, `format!`, `println!` (emits the formatted text) and `panic!`

mod eval;
mod function;

use std::sync::Arc;

use crate::config::RuntimeConfig;
use crate::error::CellError;
use crate::execute::{CellBody, CellCompiler, RunContext};
use crate::graph::{CellNames, parse_stmts};

use eval::{Builtins, Evaluator};
use function::cached_stmts;

/// Compiles cell source into bodies run by the interpreter.
#[derive(Debug, Clone)]
pub struct Interpreter {
    builtins: Arc<Builtins>,
}

impl Interpreter {
    pub fn new(config: &RuntimeConfig) -> Self {
        Self {
            builtins: Arc::new(Builtins {
                echo: config.echo_name.clone(),
                invalidation: config.invalidation_name.clone(),
            }),
        }
    }
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new(&RuntimeConfig::default())
    }
}

impl CellCompiler for Interpreter {
    fn compile(&self, source: &str, names: &CellNames) -> Result<CellBody, CellError> {
        parse_stmts(source)?;

        let source = source.to_string();
        let declared = names.declared.clone();
        let builtins = self.builtins.clone();
        Ok(Arc::new(move |ctx: &mut RunContext<'_>| {
            let stmts = cached_stmts(&source)?;
            Evaluator::new(ctx, builtins.clone()).run_cell(&stmts, &declared)
        }))
    }
}
