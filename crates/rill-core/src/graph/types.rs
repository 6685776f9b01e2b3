//! Types shared by the graph engine and the scheduler.

/// Unique identifier for a cell within a notebook.
///
/// Ids are stable across edits that keep the cell recognisable (see
/// [`IdAllocator`](super::IdAllocator)); the dependency graph only ever
/// holds ids, never cells.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
pub struct CellId(pub(crate) usize);

impl CellId {
    pub fn new(id: usize) -> Self {
        Self(id)
    }

    pub fn as_usize(&self) -> usize {
        self.0
    }
}

impl std::fmt::Display for CellId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "cell_{}", self.0)
    }
}

/// Source span of a cell inside the notebook text.
///
/// Lines are 1-based, columns 0-based (in characters), `start`/`end` are
/// byte offsets into the notebook text.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SourceSpan {
    pub start_line: usize,
    pub start_col: usize,
    pub end_line: usize,
    pub end_col: usize,
    pub start: usize,
    pub end: usize,
}

/// The names a cell declares and reads.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CellNames {
    /// Top-level bindings, in declaration order, without duplicates.
    pub declared: Vec<String>,
    /// Names read but not bound inside the cell, sorted.
    pub free: Vec<String>,
}

impl CellNames {
    pub fn declares(&self, name: &str) -> bool {
        self.declared.iter().any(|d| d == name)
    }

    pub fn reads(&self, name: &str) -> bool {
        self.free.binary_search_by(|f| f.as_str().cmp(name)).is_ok()
    }
}

/// Scheduling state of a cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CellStatus {
    /// Observed in source, never scheduled.
    Unscheduled,
    /// Collected by the current drain, waiting for its turn.
    Queued,
    /// Body is executing.
    Running,
    /// Last run completed; outputs are current.
    Idle,
    /// Needs a run: edited, upstream changed, or waiting on a pending input.
    Stale,
    /// Static error, thrown body or rejected promise.
    Error,
    /// Removed from source.
    Disposed,
}

impl std::fmt::Display for CellStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Unscheduled => "unscheduled",
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Idle => "idle",
            Self::Stale => "stale",
            Self::Error => "error",
            Self::Disposed => "disposed",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cell_id_display() {
        assert_eq!(CellId::new(7).to_string(), "cell_7");
        assert_eq!(CellId::new(7).as_usize(), 7);
    }

    #[test]
    fn test_cell_names_lookup() {
        let names = CellNames {
            declared: vec!["b".into(), "a".into()],
            free: vec!["x".into(), "y".into()],
        };
        assert!(names.declares("a"));
        assert!(!names.declares("x"));
        assert!(names.reads("y"));
        assert!(!names.reads("b"));
    }
}
