//! Runtime configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::inspect::FormatOptions;

/// Names every cell may read without a defining cell: Rust primitives, the
/// prelude, and path roots.
pub const PRELUDE_GLOBALS: &[&str] = &[
    // path roots
    "std", "core", "alloc", "crate", "self", "Self", "super",
    // primitives
    "bool", "char", "str", "i8", "i16", "i32", "i64", "i128", "isize", "u8", "u16", "u32",
    "u64", "u128", "usize", "f32", "f64",
    // prelude types and variants
    "Box", "String", "Vec", "Option", "Some", "None", "Result", "Ok", "Err", "ToString",
    "Clone", "Copy", "Default", "Iterator", "IntoIterator", "Fn", "FnMut", "FnOnce", "drop",
    // dialect built-ins
    "delay", "reject", "interval", "mutable", "import",
];

/// Configuration for a [`Notebook`](crate::Notebook).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Name of the emission function handed to every cell.
    pub echo_name: String,
    /// Name of the per-generation invalidation token.
    pub invalidation_name: String,
    /// Globals on top of [`PRELUDE_GLOBALS`].
    pub extra_globals: Vec<String>,
    /// Default formatting for emitted values.
    pub format: FormatOptions,
    /// Upper bound on settle passes within one drain.
    pub max_drain_passes: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            echo_name: "echo".to_string(),
            invalidation_name: "invalidation".to_string(),
            extra_globals: Vec::new(),
            format: FormatOptions::default(),
            max_drain_passes: 64,
        }
    }
}

impl RuntimeConfig {
    /// Parse a JSON configuration; missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a JSON configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    fn validate(&self) -> Result<()> {
        if self.echo_name.is_empty() || self.invalidation_name.is_empty() {
            return Err(Error::Config(
                "echo_name and invalidation_name must not be empty".to_string(),
            ));
        }
        if self.echo_name == self.invalidation_name {
            return Err(Error::Config(format!(
                "echo_name and invalidation_name are both `{}`",
                self.echo_name
            )));
        }
        if self.max_drain_passes == 0 {
            return Err(Error::Config("max_drain_passes must be at least 1".to_string()));
        }
        Ok(())
    }

    /// Whether `name` is supplied by the runtime rather than by a cell.
    pub fn is_runtime_provided(&self, name: &str) -> bool {
        name == self.echo_name
            || name == self.invalidation_name
            || PRELUDE_GLOBALS.contains(&name)
            || self.extra_globals.iter().any(|g| g == name)
    }
}
