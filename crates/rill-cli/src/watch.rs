//! Watch command implementation for Rill CLI.
//!
//! Re-applies the notebook file on every change. Cell ids stay stable
//! across saves, so only edited cells and their dependents re-run.

use std::path::Path;
use std::time::Instant;

use crate::colors;
use crate::output::print_views;
use crate::session::Session;
use crate::watcher::{FileEvent, FileWatcher};

/// Execute the watch command.
pub async fn execute(
    notebook_path: &Path,
    config: Option<&Path>,
    timeout_ms: u64,
    clear_screen: bool,
) -> anyhow::Result<()> {
    let mut session = Session::open(notebook_path, config, timeout_ms)?;
    let notebook_name = notebook_path
        .file_name()
        .unwrap_or_default()
        .to_string_lossy()
        .to_string();

    println!(
        "\n{}Rill Watch{} - {}{}{}",
        colors::BOLD,
        colors::RESET,
        colors::CYAN,
        notebook_name,
        colors::RESET
    );
    println!("{}", "─".repeat(50));
    println!(
        "{}Watching for changes... (Ctrl+C to stop){}",
        colors::DIM,
        colors::RESET
    );

    if clear_screen {
        clear_terminal();
    }
    run_pass(&mut session).await?;

    let mut watcher = FileWatcher::new(session.path())?;
    while let Some(event) = watcher.recv().await {
        match event {
            FileEvent::Modified(_) => {
                if clear_screen {
                    clear_terminal();
                }
                println!(
                    "\n{}File changed, re-running...{}",
                    colors::YELLOW,
                    colors::RESET
                );
                if let Err(e) = run_pass(&mut session).await {
                    eprintln!("{}Error:{} {}", colors::RED, colors::RESET, e);
                }
            }
            FileEvent::Removed(path) => {
                eprintln!(
                    "\n{}Warning:{} Notebook file removed: {}",
                    colors::YELLOW,
                    colors::RESET,
                    path.display()
                );
            }
        }
    }

    Ok(())
}

/// Clear the terminal screen.
fn clear_terminal() {
    print!("\x1B[2J\x1B[1;1H");
    colors::flush_stdout();
}

async fn run_pass(session: &mut Session) -> anyhow::Result<()> {
    let start = Instant::now();
    let pass = session.reload().await?;
    print_views(&session.views(), &pass.ran);

    println!("\n{}", "─".repeat(50));
    let errors = session.error_count();
    let color = if errors > 0 { colors::RED } else { colors::GREEN };
    println!(
        "{}Re-ran{} {} cells in {:.2}s, {} with errors{}",
        color,
        colors::RESET,
        pass.ran.len(),
        start.elapsed().as_secs_f64(),
        errors,
        if pass.idle { "" } else { " (still pending)" }
    );
    Ok(())
}
