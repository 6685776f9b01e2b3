//! Rill CLI - headless runner for reactive notebooks.

mod colors;
mod output;
mod run;
mod session;
mod watch;
mod watcher;

use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "rill")]
#[command(about = "Reactive notebook runtime with Rust-syntax cells")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a notebook until it settles and print every cell
    Run {
        /// Path to the notebook file
        notebook: PathBuf,

        /// Runtime configuration (JSON)
        #[arg(long)]
        config: Option<PathBuf>,

        /// How long to wait for promises and generators
        #[arg(long, default_value = "10000")]
        timeout_ms: u64,
    },

    /// Watch a notebook and re-run edited cells on every save
    Watch {
        /// Path to the notebook file
        notebook: PathBuf,

        /// Runtime configuration (JSON)
        #[arg(long)]
        config: Option<PathBuf>,

        /// How long to wait for promises and generators after each change
        #[arg(long, default_value = "10000")]
        timeout_ms: u64,

        /// Keep earlier output instead of clearing the screen before each run
        #[arg(long = "no-clear", action = ArgAction::SetFalse)]
        clear: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        tracing_subscriber::EnvFilter::from_default_env()
            .add_directive(tracing::Level::DEBUG.into())
    } else {
        tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into())
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    match cli.command {
        Commands::Run {
            notebook,
            config,
            timeout_ms,
        } => run::execute(&notebook, config.as_deref(), timeout_ms).await?,

        Commands::Watch {
            notebook,
            config,
            timeout_ms,
            clear,
        } => watch::execute(&notebook, config.as_deref(), timeout_ms, clear).await?,
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn watch_clear(args: &[&str]) -> bool {
        match Cli::try_parse_from(args).unwrap().command {
            Commands::Watch { clear, .. } => clear,
            Commands::Run { .. } => panic!("expected the watch command"),
        }
    }

    #[test]
    fn test_watch_clears_by_default() {
        assert!(watch_clear(&["rill", "watch", "nb.rs"]));
    }

    #[test]
    fn test_watch_no_clear_flag() {
        assert!(!watch_clear(&["rill", "watch", "nb.rs", "--no-clear"]));
    }
}
