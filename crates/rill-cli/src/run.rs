//! Run command implementation for Rill CLI.
//!
//! Runs a notebook headlessly until every cell settles.

use std::path::Path;
use std::time::Instant;

use crate::colors;
use crate::output::print_views;
use crate::session::Session;

/// Execute a notebook.
pub async fn execute(
    notebook_path: &Path,
    config: Option<&Path>,
    timeout_ms: u64,
) -> anyhow::Result<()> {
    let start = Instant::now();
    let mut session = Session::open(notebook_path, config, timeout_ms)?;

    println!(
        "\n{}Running{} {}{}{}",
        colors::BOLD,
        colors::RESET,
        colors::CYAN,
        notebook_path.display(),
        colors::RESET
    );

    let pass = session.reload().await?;
    let views = session.views();
    if views.is_empty() {
        println!("\n{}No cells found in notebook.{}", colors::YELLOW, colors::RESET);
        return Ok(());
    }
    print_views(&views, &pass.ran);

    println!("\n{}", "─".repeat(50));
    if !pass.idle {
        println!(
            "{}Timed out{} after {}ms with work still pending",
            colors::YELLOW,
            colors::RESET,
            timeout_ms
        );
    }

    let errors = session.error_count();
    if errors > 0 {
        anyhow::bail!("{} of {} cells failed", errors, views.len());
    }
    println!(
        "{}Completed{} {} cells in {:.2}s",
        colors::GREEN,
        colors::RESET,
        views.len(),
        start.elapsed().as_secs_f64()
    );
    Ok(())
}
