//! Terminal color constants and utilities for CLI output.

use std::io::{self, Write};

use rill_core::CellStatus;

pub const RESET: &str = "\x1b[0m";
pub const BOLD: &str = "\x1b[1m";
pub const DIM: &str = "\x1b[2m";
pub const GREEN: &str = "\x1b[32m";
pub const YELLOW: &str = "\x1b[33m";
pub const CYAN: &str = "\x1b[36m";
pub const RED: &str = "\x1b[31m";

/// Color for a cell status header.
pub fn status(status: CellStatus) -> &'static str {
    match status {
        CellStatus::Idle => GREEN,
        CellStatus::Error => RED,
        CellStatus::Stale | CellStatus::Queued | CellStatus::Running => YELLOW,
        CellStatus::Unscheduled | CellStatus::Disposed => DIM,
    }
}

/// Flush stdout to ensure progress output is visible immediately.
#[inline]
pub fn flush_stdout() {
    io::stdout().flush().ok();
}
