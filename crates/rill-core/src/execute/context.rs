//! Execution context and callbacks for running cells.
//!
//! A [`RunContext`] is handed to a cell body for exactly one generation. It
//! carries the resolved inputs, the emission interface, the generation's
//! invalidation token, and collects what the body defines.

use std::sync::Arc;

use rustc_hash::FxHashMap;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;

use super::invalidation::InvalidationToken;
use super::modules::{ModuleResolver, ModuleSpec};
use crate::error::CellError;
use crate::graph::{CellId, CellStatus};
use crate::inspect::KeyedEchoAggregator;
use crate::value::{Function, MutableHandle, Produced, Value, ValueCell, ValueKind};

/// Callback trait for execution progress reporting.
pub trait NotebookObserver: Send + Sync {
    /// Called when a cell starts a new generation.
    fn on_cell_started(&self, cell_id: CellId, generation: u64);

    /// Called when a cell body returns without error.
    fn on_cell_completed(&self, cell_id: CellId, status: CellStatus);

    /// Called when a cell gets an error, static or at runtime.
    fn on_cell_error(&self, cell_id: CellId, error: &CellError);

    /// Called when a cell is removed from the notebook.
    fn on_cell_disposed(&self, _cell_id: CellId) {}
}

/// Messages delivered back into the scheduler loop from outside a run.
pub(crate) enum Event {
    Settled {
        cell: CellId,
        generation: u64,
        name: String,
        result: Result<Value, Value>,
    },
    Yielded {
        cell: CellId,
        generation: u64,
        name: String,
        item: Value,
    },
    GeneratorDone {
        cell: CellId,
        generation: u64,
        name: String,
        error: Option<Value>,
    },
    MutableSet {
        cell: CellId,
        generation: u64,
        name: String,
        update: MutableUpdate,
    },
    Emit {
        cell: CellId,
        generation: u64,
        value: Value,
    },
}

impl Event {
    pub(crate) fn target(&self) -> (CellId, u64) {
        match self {
            Self::Settled {
                cell, generation, ..
            }
            | Self::Yielded {
                cell, generation, ..
            }
            | Self::GeneratorDone {
                cell, generation, ..
            }
            | Self::MutableSet {
                cell, generation, ..
            }
            | Self::Emit {
                cell, generation, ..
            } => (*cell, *generation),
        }
    }
}

/// A pending change to a mutable value.
pub(crate) enum MutableUpdate {
    Replace(Value),
    Apply(Box<dyn FnOnce(&Value) -> Value + Send>),
    Call(Function),
}

/// Display output accumulated by one generation.
#[derive(Debug, Clone, Default)]
pub struct CellOutput {
    pub display: Vec<Value>,
    pub table: KeyedEchoAggregator,
}

impl CellOutput {
    pub fn is_empty(&self) -> bool {
        self.display.is_empty() && self.table.is_empty()
    }
}

/// Something a body defined for a declared name.
pub(crate) enum Definition {
    Produced(Produced),
    Mutable(MutableHandle),
}

/// Context for one generation of a running cell.
pub struct RunContext<'a> {
    cell: CellId,
    generation: u64,
    inputs: &'a FxHashMap<String, Value>,
    modules: &'a dyn ModuleResolver,
    token: InvalidationToken,
    events: UnboundedSender<Event>,
    output: CellOutput,
    defined: Vec<(String, Definition)>,
    tasks: Vec<JoinHandle<()>>,
}

impl<'a> RunContext<'a> {
    pub(crate) fn new(
        cell: CellId,
        token: InvalidationToken,
        inputs: &'a FxHashMap<String, Value>,
        modules: &'a dyn ModuleResolver,
        events: UnboundedSender<Event>,
    ) -> Self {
        Self {
            cell,
            generation: token.generation(),
            inputs,
            modules,
            token,
            events,
            output: CellOutput::default(),
            defined: Vec::new(),
            tasks: Vec::new(),
        }
    }

    pub fn cell_id(&self) -> CellId {
        self.cell
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Value of a free name, if an upstream cell supplies it.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.inputs.get(name)
    }

    pub fn inputs(&self) -> &FxHashMap<String, Value> {
        self.inputs
    }

    /// Record one value for display and return it.
    pub fn echo(&mut self, value: Value) -> Value {
        self.output.display.push(value.clone());
        value
    }

    /// Record several values; returns the single value for one argument
    /// and an array otherwise.
    pub fn echo_all(&mut self, mut values: Vec<Value>) -> Value {
        self.output.display.extend(values.iter().cloned());
        match values.len() {
            0 => Value::Undefined,
            1 => values.remove(0),
            _ => Value::Array(values),
        }
    }

    /// Emission tagged with a table row key.
    pub fn key(&mut self, key: impl Into<String>) -> KeyedEcho<'_, 'a> {
        KeyedEcho {
            ctx: self,
            key: key.into(),
        }
    }

    /// Clear the display output of the current run.
    pub fn clear(&mut self) {
        self.output.display.clear();
        self.output.table.reset();
    }

    /// Register a disposal callback for this generation.
    pub fn dispose(&self, f: impl FnOnce() + Send + 'static) {
        self.token.on_dispose(f);
    }

    pub fn invalidation(&self) -> &InvalidationToken {
        &self.token
    }

    /// A `Send` handle for emitting from timers and tasks.
    pub fn emitter(&self) -> Emitter {
        Emitter {
            cell: self.cell,
            generation: self.generation,
            events: self.events.clone(),
        }
    }

    /// Spawn a task owned by this generation; it is aborted on invalidation.
    pub fn spawn<F>(&mut self, future: F) -> Result<(), CellError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::runtime::Handle::try_current()
            .map_err(|_| CellError::runtime("async work needs a running tokio runtime"))?;
        let task = handle.spawn(future);
        let abort = task.abort_handle();
        self.token.on_dispose(move || abort.abort());
        self.tasks.push(task);
        Ok(())
    }

    /// Define a declared name.
    pub fn define(&mut self, name: impl Into<String>, produced: impl Into<Produced>) {
        let name = name.into();
        self.defined.retain(|(n, _)| *n != name);
        self.defined.push((name, Definition::Produced(produced.into())));
    }

    /// Define a declared name as a mutable value and return its handle.
    pub fn define_mutable(&mut self, name: impl Into<String>, initial: Value) -> MutableHandle {
        let name: String = name.into();
        let handle = MutableHandle {
            cell: self.cell,
            generation: self.generation,
            name: Arc::from(name.as_str()),
            value: ValueCell::ready(ValueKind::Mutable, initial),
            events: self.events.clone(),
        };
        self.defined.retain(|(n, _)| *n != name);
        self.defined
            .push((name, Definition::Mutable(handle.clone())));
        handle
    }

    /// Resolve one or more module specifiers.
    ///
    /// One specifier yields the module itself, several yield an array.
    pub fn import(&self, specifiers: &[&str]) -> Result<Value, CellError> {
        let mut modules = Vec::with_capacity(specifiers.len());
        for specifier in specifiers {
            let module = ModuleSpec::parse(specifier)
                .and_then(|spec| self.modules.resolve(&spec))
                .ok_or_else(|| {
                    tracing::warn!("module not found: {specifier}");
                    CellError::ModuleResolution {
                        specifier: specifier.to_string(),
                    }
                })?;
            modules.push(module);
        }
        Ok(match modules.len() {
            1 => modules.remove(0),
            _ => Value::Array(modules),
        })
    }

    pub fn output(&self) -> &CellOutput {
        &self.output
    }

    pub(crate) fn finish(self) -> (CellOutput, Vec<(String, Definition)>, Vec<JoinHandle<()>>) {
        (self.output, self.defined, self.tasks)
    }
}

/// Emission bound to one table row key, returned by [`RunContext::key`].
pub struct KeyedEcho<'c, 'a> {
    ctx: &'c mut RunContext<'a>,
    key: String,
}

impl KeyedEcho<'_, '_> {
    /// Append a value to this key's row and return it.
    pub fn echo(self, value: Value) -> Value {
        self.ctx.output.table.push(&self.key, value.clone());
        value
    }
}

/// Emits display values into a cell from outside its body.
///
/// Emissions reaching the scheduler after the generation was superseded
/// are dropped.
#[derive(Clone)]
pub struct Emitter {
    cell: CellId,
    generation: u64,
    events: UnboundedSender<Event>,
}

impl Emitter {
    pub fn emit(&self, value: impl Into<Value>) {
        let _ = self.events.send(Event::Emit {
            cell: self.cell,
            generation: self.generation,
            value: value.into(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execute::modules::{NoModules, StaticModules};
    use tokio::sync::mpsc;

    fn context<'a>(
        inputs: &'a FxHashMap<String, Value>,
        modules: &'a dyn ModuleResolver,
    ) -> (RunContext<'a>, mpsc::UnboundedReceiver<Event>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let ctx = RunContext::new(CellId::new(0), InvalidationToken::new(1), inputs, modules, tx);
        (ctx, rx)
    }

    #[test]
    fn test_echo_return_values() {
        let inputs = FxHashMap::default();
        let (mut ctx, _rx) = context(&inputs, &NoModules);

        assert_eq!(ctx.echo_all(vec![]), Value::Undefined);
        assert_eq!(ctx.echo_all(vec![1.into()]), Value::from(1));
        assert_eq!(
            ctx.echo_all(vec![1.into(), 2.into()]),
            Value::Array(vec![1.into(), 2.into()])
        );
        assert_eq!(ctx.output().display.len(), 3);

        ctx.clear();
        assert!(ctx.output().is_empty());
    }

    #[test]
    fn test_keyed_echo_accumulates() {
        let inputs = FxHashMap::default();
        let (mut ctx, _rx) = context(&inputs, &NoModules);
        for i in 0..3 {
            ctx.key("k").echo(Value::from(i));
        }
        assert_eq!(ctx.output().table.row("k").map(<[Value]>::len), Some(3));
    }

    #[test]
    fn test_import_reports_missing_module() {
        let inputs = FxHashMap::default();
        let modules = StaticModules::new().with("d3", "7.8.5", Value::from("d3"));
        let (ctx, _rx) = context(&inputs, &modules);

        assert_eq!(ctx.import(&["d3@7"]), Ok(Value::from("d3")));
        assert_eq!(
            ctx.import(&["d3@7", "plot"]),
            Err(CellError::ModuleResolution {
                specifier: "plot".into()
            })
        );
    }

    #[test]
    fn test_emitter_sends_event() {
        let inputs = FxHashMap::default();
        let (ctx, mut rx) = context(&inputs, &NoModules);
        ctx.emitter().emit("tick");

        match rx.try_recv() {
            Ok(Event::Emit { value, generation, .. }) => {
                assert_eq!(value, Value::from("tick"));
                assert_eq!(generation, 1);
            }
            _ => panic!("expected an emit event"),
        }
    }

    #[test]
    fn test_define_replaces_earlier_definition() {
        let inputs = FxHashMap::default();
        let (mut ctx, _rx) = context(&inputs, &NoModules);
        ctx.define("a", Value::from(1));
        ctx.define("a", Value::from(2));

        let (_, defined, _) = ctx.finish();
        assert_eq!(defined.len(), 1);
        match &defined[0].1 {
            Definition::Produced(Produced::Constant(v)) => assert_eq!(v, &Value::from(2)),
            _ => panic!("expected a constant"),
        }
    }
}
