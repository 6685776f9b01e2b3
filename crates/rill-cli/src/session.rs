//! A notebook file loaded into a running `Notebook`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use rill_core::{CellId, CellStatus, CellView, Interpreter, Notebook, RuntimeConfig};

/// Outcome of one load of the notebook file.
#[derive(Debug)]
pub struct Pass {
    /// Cells whose body ran during this pass.
    pub ran: Vec<CellId>,
    /// Whether every promise and generator finished before the timeout.
    pub idle: bool,
}

pub struct Session {
    path: PathBuf,
    notebook: Notebook,
    timeout: Duration,
}

impl Session {
    pub fn open(path: &Path, config: Option<&Path>, timeout_ms: u64) -> anyhow::Result<Self> {
        if !path.exists() {
            anyhow::bail!("Notebook not found: {}", path.display());
        }
        let config = match config {
            Some(config) => RuntimeConfig::from_file(config)
                .with_context(|| format!("Failed to load config {}", config.display()))?,
            None => RuntimeConfig::default(),
        };
        let interpreter = Interpreter::new(&config);
        Ok(Self {
            path: path.to_path_buf(),
            notebook: Notebook::new(config, interpreter),
            timeout: Duration::from_millis(timeout_ms),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Re-read the file, apply it as one edit and wait until the notebook settles.
    pub async fn reload(&mut self) -> anyhow::Result<Pass> {
        let source = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read {}", self.path.display()))?;

        let before: Vec<(CellId, u64)> = self.run_counts();
        let ids = self.notebook.set_source(&source)?;
        tracing::debug!("Loaded {} cells from {}", ids.len(), self.path.display());

        let idle = self.notebook.run_until_idle(self.timeout).await;
        if !idle {
            tracing::warn!("Notebook still busy after {:?}", self.timeout);
        }

        let ran = self
            .run_counts()
            .into_iter()
            .filter(|(id, count)| !before.contains(&(*id, *count)))
            .map(|(id, _)| id)
            .collect();
        Ok(Pass { ran, idle })
    }

    fn run_counts(&self) -> Vec<(CellId, u64)> {
        self.notebook
            .cell_ids()
            .into_iter()
            .filter_map(|id| self.notebook.run_count(id).map(|count| (id, count)))
            .collect()
    }

    pub fn views(&self) -> Vec<CellView> {
        self.notebook.views()
    }

    /// Number of cells currently in error.
    pub fn error_count(&self) -> usize {
        self.notebook
            .cell_ids()
            .into_iter()
            .filter(|id| self.notebook.status(*id) == Some(CellStatus::Error))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_reload_reports_rerun_cells() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("notebook.rs");
        fs::write(&path, "let a = 1;\n\nlet b = 2;\n\necho(a);\n").unwrap();

        let mut session = Session::open(&path, None, 1000).unwrap();
        let first = session.reload().await.unwrap();
        assert!(first.idle);
        assert_eq!(first.ran.len(), 3);

        fs::write(&path, "let a = 5;\n\nlet b = 2;\n\necho(a);\n").unwrap();
        let second = session.reload().await.unwrap();
        let ids: Vec<CellId> = session.views().iter().map(|v| v.id).collect();
        assert_eq!(second.ran, vec![ids[0], ids[2]]);
        assert_eq!(session.views()[2].outputs, vec!["5"]);
        assert_eq!(session.error_count(), 0);
    }

    #[test]
    fn test_missing_notebook() {
        let temp = TempDir::new().unwrap();
        let result = Session::open(&temp.path().join("missing.rs"), None, 1000);
        assert!(result.is_err());
    }

    #[test]
    fn test_config_file() {
        let temp = TempDir::new().unwrap();
        let notebook = temp.path().join("notebook.rs");
        let config = temp.path().join("rill.json");
        fs::write(&notebook, "show(1);\n").unwrap();
        fs::write(&config, r#"{"echo_name": "show"}"#).unwrap();

        assert!(Session::open(&notebook, Some(&config), 1000).is_ok());

        fs::write(&config, r#"{"max_drain_passes": "many"}"#).unwrap();
        assert!(Session::open(&notebook, Some(&config), 1000).is_err());
    }
}
