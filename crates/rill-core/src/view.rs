//! What the display collaborator sees of each cell.

use serde::Serialize;

use crate::error::CellError;
use crate::graph::{CellId, CellStatus, SourceSpan};
use crate::value::ValueKind;

/// Rendered state of one declared name.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BindingView {
    pub name: String,
    pub kind: ValueKind,
    pub version: u64,
    /// Formatted value; `None` while pending.
    pub value: Option<String>,
}

/// Rendered state of one cell.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CellView {
    pub id: CellId,
    pub span: SourceSpan,
    pub status: CellStatus,
    /// Number of times the body has run.
    pub generation: u64,
    pub declared: Vec<String>,
    /// Formatted emissions of the current run, in call order.
    pub outputs: Vec<String>,
    /// Keyed emissions rendered as a table.
    pub table: Option<String>,
    pub values: Vec<BindingView>,
    pub error: Option<CellError>,
    /// Disposal failures of the previous generation.
    pub warnings: Vec<CellError>,
    /// Inputs this cell is waiting for.
    pub waiting_on: Vec<String>,
}

impl CellView {
    /// Plain-text rendering, used by the CLI.
    pub fn render(&self) -> String {
        let mut lines = vec![format!("{} {} #{}", self.id, self.status, self.generation)];
        for output in &self.outputs {
            lines.extend(output.lines().map(|l| format!("  {l}")));
        }
        if let Some(table) = &self.table {
            lines.extend(table.lines().map(|l| format!("  {l}")));
        }
        if let Some(error) = &self.error {
            lines.push(format!("  error: {error}"));
        }
        if !self.waiting_on.is_empty() {
            lines.push(format!("  waiting on: {}", self.waiting_on.join(", ")));
        }
        for warning in &self.warnings {
            lines.push(format!("  warning: {warning}"));
        }
        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render() {
        let view = CellView {
            id: CellId::new(2),
            span: SourceSpan::default(),
            status: CellStatus::Stale,
            generation: 1,
            declared: vec!["b".into()],
            outputs: vec!["[\n  1\n]".into()],
            table: Some("k │ 0".into()),
            values: Vec::new(),
            error: None,
            warnings: vec![CellError::Disposal {
                message: "close failed".into(),
            }],
            waiting_on: vec!["a".into()],
        };
        assert_eq!(
            view.render(),
            "cell_2 stale #1\n  [\n    1\n  ]\n  k │ 0\n  waiting on: a\n  warning: DisposalError: close failed"
        );
    }
}
