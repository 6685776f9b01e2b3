//! File watcher for detecting notebook changes.

use std::path::{Path, PathBuf};
use std::time::Duration;

use notify_debouncer_mini::{DebounceEventResult, new_debouncer, notify::RecursiveMode};
use tokio::sync::mpsc;

/// File change event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileEvent {
    /// File was written or recreated.
    Modified(PathBuf),
    /// File was removed.
    Removed(PathBuf),
}

/// Watches a single notebook file.
pub struct FileWatcher {
    /// Debouncer handle (kept alive to maintain watcher).
    _debouncer: notify_debouncer_mini::Debouncer<notify::RecommendedWatcher>,
    rx: mpsc::UnboundedReceiver<FileEvent>,
}

impl FileWatcher {
    pub fn new(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let target = path.as_ref().canonicalize()?;
        let watch_path = target.parent().unwrap_or(Path::new(".")).to_path_buf();

        let (tx, rx) = mpsc::unbounded_channel();
        let mut debouncer = new_debouncer(
            Duration::from_millis(200),
            move |result: DebounceEventResult| match result {
                Ok(events) => {
                    for event in events {
                        // the whole directory is watched; only the notebook itself counts
                        if event.path != target {
                            continue;
                        }
                        let file_event = if event.path.exists() {
                            FileEvent::Modified(event.path.clone())
                        } else {
                            FileEvent::Removed(event.path.clone())
                        };
                        let _ = tx.send(file_event);
                    }
                }
                Err(e) => tracing::warn!("Watch error: {}", e),
            },
        )
        .map_err(|e| anyhow::anyhow!("Failed to create file watcher: {}", e))?;

        debouncer
            .watcher()
            .watch(&watch_path, RecursiveMode::NonRecursive)
            .map_err(|e| anyhow::anyhow!("Failed to watch {}: {}", watch_path.display(), e))?;

        Ok(Self {
            _debouncer: debouncer,
            rx,
        })
    }

    /// Receive the next file event.
    pub async fn recv(&mut self) -> Option<FileEvent> {
        self.rx.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_watcher_creation() {
        let temp = TempDir::new().unwrap();
        let notebook = temp.path().join("notebook.rs");
        fs::write(&notebook, "let a = 1;").unwrap();

        assert!(FileWatcher::new(&notebook).is_ok());
        assert!(FileWatcher::new(temp.path().join("missing.rs")).is_err());
    }
}
