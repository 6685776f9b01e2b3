//! Error types for rill-core.
//!
//! Two layers: [`Error`] is returned by API calls that were used incorrectly
//! (unknown cell ids, malformed configuration), while [`CellError`] is the
//! per-cell taxonomy reported to the display collaborator. A `CellError` is
//! data attached to a cell, never a reason for the scheduler to stop.

use thiserror::Error;

use crate::graph::CellId;

/// Result type for rill-core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by the rill-core API.
#[derive(Debug, Error)]
pub enum Error {
    /// Cell not found.
    #[error("cell not found: {0}")]
    CellNotFound(CellId),

    /// The same cell id appeared twice in one edit.
    #[error("duplicate cell id in edit: {0}")]
    DuplicateCell(CellId),

    /// Invalid runtime configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// JSON error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors attached to an individual cell.
#[derive(Debug, Clone, PartialEq, Eq, Error, serde::Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CellError {
    /// The cell text does not parse.
    #[error("SyntaxError: {message} ({line}:{column})")]
    Syntax {
        message: String,
        line: usize,
        column: usize,
    },

    /// Two live cells declare the same top-level name.
    #[error("BindingConflictError: `{name}` is defined more than once ({})", join_cells(.cells))]
    BindingConflict { name: String, cells: Vec<CellId> },

    /// The cell takes part in a dependency cycle.
    #[error("CycleError: circular definition through {}", join_cells(.cells))]
    Cycle { cells: Vec<CellId> },

    /// The cell body failed, or a promise it produced was rejected.
    #[error("RuntimeError: {message}")]
    Runtime { message: String },

    /// An import target could not be satisfied.
    #[error("ModuleResolutionError: module not found: {specifier}")]
    ModuleResolution { specifier: String },

    /// A disposal callback failed while tearing down a generation.
    #[error("DisposalError: {message}")]
    Disposal { message: String },
}

impl CellError {
    /// Build a runtime error from anything displayable.
    pub fn runtime(message: impl std::fmt::Display) -> Self {
        Self::Runtime {
            message: message.to_string(),
        }
    }

    /// Static errors are reported without running the cell.
    pub fn is_static(&self) -> bool {
        matches!(
            self,
            Self::Syntax { .. } | Self::BindingConflict { .. } | Self::Cycle { .. }
        )
    }
}

fn join_cells(cells: &[CellId]) -> String {
    cells
        .iter()
        .map(|c| c.to_string())
        .collect::<Vec<_>>()
        .join(" → ")
}

/// Render a caught panic payload as a message.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic with non-string payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_message_lists_cells() {
        let err = CellError::Cycle {
            cells: vec![CellId::new(1), CellId::new(2)],
        };
        assert_eq!(
            err.to_string(),
            "CycleError: circular definition through cell_1 → cell_2"
        );
    }

    #[test]
    fn test_static_errors() {
        assert!(
            CellError::Syntax {
                message: "x".into(),
                line: 1,
                column: 0
            }
            .is_static()
        );
        assert!(!CellError::runtime("boom").is_static());
    }
}
