//! Printing cell views to the terminal.

use rill_core::{CellId, CellView};

use crate::colors;

/// Print one cell: a colored header line, then its rendered body.
pub fn print_view(view: &CellView, rerun: bool) {
    let rendered = view.render();
    let mut lines = rendered.lines();
    if let Some(header) = lines.next() {
        let marker = if rerun { "●" } else { " " };
        println!(
            "{}{} {}{}{}",
            colors::status(view.status),
            marker,
            colors::BOLD,
            header,
            colors::RESET
        );
    }
    for line in lines {
        println!("  {line}");
    }
}

/// Print every cell, marking the ones that just ran.
pub fn print_views(views: &[CellView], ran: &[CellId]) {
    println!("\n{}Cells:{}", colors::BOLD, colors::RESET);
    println!("{}", "─".repeat(50));
    for view in views {
        print_view(view, ran.contains(&view.id));
    }
}
