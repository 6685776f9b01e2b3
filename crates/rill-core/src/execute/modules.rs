//! Module import resolution.

use rustc_hash::FxHashMap;

use crate::value::Value;

/// A parsed import specifier: `name`, `name@1.2`, `@scope/name@^1`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleSpec {
    pub name: String,
    pub version: Option<String>,
}

impl ModuleSpec {
    pub fn parse(specifier: &str) -> Option<Self> {
        let specifier = specifier.trim();
        // a leading '@' belongs to the scope, not the version
        let search_from = usize::from(specifier.starts_with('@'));
        let (name, version) = match specifier[search_from..].find('@') {
            Some(i) => {
                let at = search_from + i;
                (&specifier[..at], Some(&specifier[at + 1..]))
            }
            None => (specifier, None),
        };
        if name.is_empty() || name == "@" || version.is_some_and(str::is_empty) {
            return None;
        }
        Some(Self {
            name: name.to_string(),
            version: version.map(str::to_string),
        })
    }
}

/// Resolves import specifiers to module values.
pub trait ModuleResolver: Send + Sync {
    /// `None` when the module cannot be satisfied.
    fn resolve(&self, spec: &ModuleSpec) -> Option<Value>;
}

/// Resolver that knows no modules.
#[derive(Debug, Default)]
pub struct NoModules;

impl ModuleResolver for NoModules {
    fn resolve(&self, _spec: &ModuleSpec) -> Option<Value> {
        None
    }
}

/// In-memory module registry.
///
/// A version qualifier matches an equal version or a dotted prefix of it,
/// so `"1"` and `"1.4"` both match `"1.4.2"`. A leading `^`, `~` or `=` is
/// ignored.
#[derive(Debug, Default)]
pub struct StaticModules {
    modules: FxHashMap<String, Vec<(String, Value)>>,
}

impl StaticModules {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, version: impl Into<String>, module: Value) {
        self.modules
            .entry(name.into())
            .or_default()
            .push((version.into(), module));
    }

    pub fn with(mut self, name: impl Into<String>, version: impl Into<String>, module: Value) -> Self {
        self.register(name, version, module);
        self
    }
}

impl ModuleResolver for StaticModules {
    fn resolve(&self, spec: &ModuleSpec) -> Option<Value> {
        let candidates = self.modules.get(&spec.name)?;
        let Some(wanted) = &spec.version else {
            // unqualified imports take the most recently registered version
            return candidates.last().map(|(_, m)| m.clone());
        };
        let wanted = wanted.trim_start_matches(['^', '~', '=']);
        candidates
            .iter()
            .rev()
            .find(|(version, _)| version_matches(wanted, version))
            .map(|(_, m)| m.clone())
    }
}

fn version_matches(wanted: &str, version: &str) -> bool {
    version == wanted
        || version
            .strip_prefix(wanted)
            .is_some_and(|rest| rest.starts_with('.'))
}
