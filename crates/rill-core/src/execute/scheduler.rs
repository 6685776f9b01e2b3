//! The notebook scheduler.
//!
//! [`Notebook`] owns every cell. Edits mark cells stale; [`Notebook::drain`]
//! runs the stale cells and everything downstream of them in dependency
//! order. Asynchronous completions (settled promises, generator items,
//! mutable setter calls, emissions from timers) arrive as events on a
//! channel and are applied only between drain passes, so a pass always sees
//! one consistent set of upstream values.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use futures::future::BoxFuture;
use futures::stream::BoxStream;
use rustc_hash::{FxHashMap, FxHashSet};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::compiler::{CellBody, CellCompiler};
use super::context::{CellOutput, Definition, Event, MutableUpdate, NotebookObserver, RunContext};
use super::invalidation::InvalidationToken;
use super::modules::{ModuleResolver, NoModules};
use crate::config::RuntimeConfig;
use crate::error::{CellError, Error, Result, panic_message};
use crate::graph::{
    CellId, CellNames, CellSource, CellStatus, DependencyGraph, IdAllocator, NameAnalyzer,
    SourceSpan, split_cells,
};
use crate::inspect::format;
use crate::value::{Produced, Value, ValueCell, ValueKind, ValueState};
use crate::view::{BindingView, CellView};

/// Scheduler-owned state of one cell.
struct CellState {
    span: SourceSpan,
    source: String,
    /// `Err` holds the syntax error.
    names: std::result::Result<CellNames, CellError>,
    body: std::result::Result<CellBody, CellError>,
    /// Syntax, conflict or cycle error; the cell does not run while set.
    static_error: Option<CellError>,
    status: CellStatus,
    generation: u64,
    token: Option<InvalidationToken>,
    /// Declared names and their value cells for the current generation.
    bindings: Vec<(String, ValueCell)>,
    /// Pull channels of running generators, by name.
    pullers: FxHashMap<String, mpsc::Sender<()>>,
    tasks: Vec<JoinHandle<()>>,
    output: CellOutput,
    error: Option<CellError>,
    warnings: Vec<CellError>,
    waiting_on: Vec<String>,
}

impl CellState {
    fn new(
        source: CellSource,
        names: std::result::Result<CellNames, CellError>,
        body: std::result::Result<CellBody, CellError>,
    ) -> Self {
        Self {
            span: source.span,
            source: source.text,
            names,
            body,
            static_error: None,
            status: CellStatus::Unscheduled,
            generation: 0,
            token: None,
            bindings: Vec::new(),
            pullers: FxHashMap::default(),
            tasks: Vec::new(),
            output: CellOutput::default(),
            error: None,
            warnings: Vec::new(),
            waiting_on: Vec::new(),
        }
    }

    fn declared(&self) -> &[String] {
        self.names.as_ref().map(|n| n.declared.as_slice()).unwrap_or(&[])
    }

    fn binding(&self, name: &str) -> Option<&ValueCell> {
        self.bindings.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    /// Whether `generation` is the live generation of this cell.
    fn is_live(&self, generation: u64) -> bool {
        self.generation == generation && self.token.as_ref().is_some_and(|t| !t.is_fired())
    }
}

/// A reactive notebook: cells, their dependency graph, and the scheduler.
///
/// Must be drained from within a tokio runtime when cells produce promises
/// or generators.
pub struct Notebook {
    config: RuntimeConfig,
    analyzer: NameAnalyzer,
    compiler: Arc<dyn CellCompiler>,
    modules: Arc<dyn ModuleResolver>,
    observer: Option<Arc<dyn NotebookObserver>>,
    graph: DependencyGraph,
    cells: FxHashMap<CellId, CellState>,
    disposed: FxHashSet<CellId>,
    stale: FxHashSet<CellId>,
    ids: IdAllocator,
    events_tx: mpsc::UnboundedSender<Event>,
    events_rx: mpsc::UnboundedReceiver<Event>,
    /// Generator pulls to request once the current drain finishes.
    pending_pulls: Vec<mpsc::Sender<()>>,
}

impl Notebook {
    pub fn new(config: RuntimeConfig, compiler: impl CellCompiler + 'static) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            analyzer: NameAnalyzer::new(&config),
            config,
            compiler: Arc::new(compiler),
            modules: Arc::new(NoModules),
            observer: None,
            graph: DependencyGraph::new(),
            cells: FxHashMap::default(),
            disposed: FxHashSet::default(),
            stale: FxHashSet::default(),
            ids: IdAllocator::new(),
            events_tx,
            events_rx,
            pending_pulls: Vec::new(),
        }
    }

    /// Use `modules` to resolve imports.
    pub fn with_modules(mut self, modules: impl ModuleResolver + 'static) -> Self {
        self.modules = Arc::new(modules);
        self
    }

    pub fn set_observer(&mut self, observer: Arc<dyn NotebookObserver>) {
        self.observer = Some(observer);
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    /// Replace the whole notebook text.
    ///
    /// The text is split into cells whose ids stay stable across calls.
    /// Returns the ids in source order. Does not run anything; call
    /// [`drain`](Self::drain).
    pub fn set_source(&mut self, text: &str) -> Result<Vec<CellId>> {
        let cells = self.ids.assign(split_cells(text));
        let ids = cells.iter().map(|c| c.id).collect();
        self.apply_edit(cells)?;
        Ok(ids)
    }

    /// Apply one edit: the complete list of cells, in source order.
    ///
    /// Cells missing from the list are disposed. Cells whose text changed
    /// are re-analyzed and marked stale, together with every cell whose
    /// inputs were rewired.
    pub fn apply_edit(&mut self, cells: Vec<CellSource>) -> Result<()> {
        let mut seen = FxHashSet::default();
        for cell in &cells {
            if !seen.insert(cell.id) {
                return Err(Error::DuplicateCell(cell.id));
            }
        }

        let mut removed: Vec<CellId> = self
            .cells
            .keys()
            .filter(|id| !seen.contains(id))
            .copied()
            .collect();
        removed.sort();
        for id in removed {
            self.remove_cell(id);
        }

        for (position, cell) in cells.into_iter().enumerate() {
            self.upsert_cell(position, cell);
        }

        self.refresh_static_errors();
        Ok(())
    }

    /// Replace the text of one existing cell.
    pub fn edit_cell(&mut self, id: CellId, text: &str) -> Result<()> {
        let position = self.graph.position(id).ok_or(Error::CellNotFound(id))?;
        let span = self.cells.get(&id).map(|c| c.span).unwrap_or_default();
        self.upsert_cell(
            position,
            CellSource {
                id,
                span,
                text: text.to_string(),
            },
        );
        self.refresh_static_errors();
        Ok(())
    }

    fn upsert_cell(&mut self, position: usize, source: CellSource) {
        let id = source.id;
        if let Some(cell) = self.cells.get_mut(&id)
            && cell.source == source.text
        {
            cell.span = source.span;
            self.graph.set_position(id, position);
            return;
        }

        let names = self.analyzer.analyze(&source.text);
        let body = match &names {
            Ok(names) => self.compiler.compile(&source.text, names),
            Err(e) => Err(e.clone()),
        };
        let rewired = self.graph.upsert(id, position, names.as_ref().ok());

        match self.cells.get_mut(&id) {
            Some(cell) => {
                tracing::debug!("Cell {} edited", id);
                cell.span = source.span;
                cell.source = source.text;
                cell.names = names;
                cell.body = body;
            }
            None => {
                tracing::info!("Cell {} added", id);
                self.disposed.remove(&id);
                self.cells.insert(id, CellState::new(source, names, body));
            }
        }

        self.mark_stale(id);
        for reader in rewired {
            self.mark_stale(reader);
        }
    }

    fn remove_cell(&mut self, id: CellId) {
        self.teardown(id);
        self.stale.remove(&id);
        let rewired = self.graph.remove(id);
        if self.cells.remove(&id).is_some() {
            tracing::info!("Cell {} removed", id);
            self.disposed.insert(id);
            if let Some(observer) = &self.observer {
                observer.on_cell_disposed(id);
            }
        }
        for reader in rewired {
            self.mark_stale(reader);
        }
    }

    /// Recompute syntax, conflict and cycle errors for every cell.
    fn refresh_static_errors(&mut self) {
        let conflicts = self.graph.conflicts();
        let cycles = self.graph.cycles();

        for id in self.graph.cell_ids() {
            let Some(cell) = self.cells.get(&id) else {
                continue;
            };
            let wanted = match &cell.names {
                Err(syntax) => Some(syntax.clone()),
                Ok(_) => conflicts
                    .iter()
                    .find(|(_, cells)| cells.contains(&id))
                    .map(|(name, cells)| CellError::BindingConflict {
                        name: name.clone(),
                        cells: cells.clone(),
                    })
                    .or_else(|| {
                        cycles
                            .iter()
                            .find(|scc| scc.contains(&id))
                            .map(|scc| CellError::Cycle { cells: scc.clone() })
                    }),
            };
            if wanted == cell.static_error {
                continue;
            }

            match wanted {
                Some(error) => self.fail_static(id, error),
                None => {
                    if let Some(cell) = self.cells.get_mut(&id) {
                        cell.static_error = None;
                        cell.error = None;
                        cell.status = if cell.generation == 0 {
                            CellStatus::Unscheduled
                        } else {
                            CellStatus::Stale
                        };
                    }
                    self.mark_stale(id);
                }
            }
        }
    }

    fn fail_static(&mut self, id: CellId, error: CellError) {
        tracing::debug!("Cell {} has a static error: {}", id, error);
        self.teardown(id);
        self.stale.remove(&id);
        if let Some(cell) = self.cells.get_mut(&id) {
            cell.static_error = Some(error.clone());
            cell.error = Some(error.clone());
            cell.status = CellStatus::Error;
            cell.output = CellOutput::default();
            cell.waiting_on.clear();
        }
        if let Some(observer) = &self.observer {
            observer.on_cell_error(id, &error);
        }
        self.mark_readers_stale(id);
    }

    fn mark_stale(&mut self, id: CellId) {
        let Some(cell) = self.cells.get_mut(&id) else {
            return;
        };
        if cell.static_error.is_some() {
            return;
        }
        self.stale.insert(id);
        if cell.status != CellStatus::Unscheduled {
            cell.status = CellStatus::Stale;
        }
    }

    fn mark_readers_stale(&mut self, id: CellId) {
        for reader in self.graph.edges_from(id) {
            self.mark_stale(reader);
        }
    }

    fn mark_name_readers_stale(&mut self, id: CellId, name: &str) {
        for reader in self.graph.readers_of(id, name) {
            self.mark_stale(reader);
        }
    }

    /// Fire the current generation's token and drop its values.
    fn teardown(&mut self, id: CellId) {
        let Some(cell) = self.cells.get_mut(&id) else {
            return;
        };
        if let Some(token) = cell.token.take() {
            let errors = token.fire();
            for error in &errors {
                tracing::warn!("Cell {} disposal failed: {}", id, error);
                if let Some(observer) = &self.observer {
                    observer.on_cell_error(id, error);
                }
            }
            cell.warnings = errors;
        }
        cell.bindings.clear();
        cell.pullers.clear();
        cell.tasks.clear();
    }

    /// Run every stale cell, and everything downstream of it, in dependency
    /// order. Events that arrived since the last drain are applied first.
    ///
    /// Returns the number of cell runs.
    pub fn drain(&mut self) -> usize {
        let mut runs = 0;
        for pass in 0..self.config.max_drain_passes {
            self.apply_events();
            if self.stale.is_empty() {
                break;
            }
            tracing::debug!("Drain pass {} over {} stale cells", pass, self.stale.len());
            runs += self.run_pass();
        }
        self.apply_events();
        if !self.stale.is_empty() {
            tracing::warn!(
                "Drain stopped after {} passes with {} cells still stale",
                self.config.max_drain_passes,
                self.stale.len()
            );
        }

        for pull in self.pending_pulls.drain(..) {
            let _ = pull.try_send(());
        }
        runs
    }

    fn run_pass(&mut self) -> usize {
        let mut seeds: Vec<CellId> = self.stale.iter().copied().collect();
        seeds.sort();
        let order = self.graph.topo_order(&seeds);

        // stale cells left out of the order sit downstream of a cycle
        let ordered: FxHashSet<CellId> = order.iter().copied().collect();
        for id in seeds.into_iter().filter(|id| !ordered.contains(id)) {
            self.stale.remove(&id);
            let waiting = self.resolve_inputs(id).err().unwrap_or_default();
            self.block(id, waiting);
        }

        for id in &order {
            if self.stale.contains(id)
                && let Some(cell) = self.cells.get_mut(id)
            {
                cell.status = CellStatus::Queued;
            }
        }

        let mut runs = 0;
        for id in order {
            if !self.stale.remove(&id) {
                continue;
            }
            match self.resolve_inputs(id) {
                Ok(inputs) => {
                    self.run_cell(id, inputs);
                    runs += 1;
                }
                Err(waiting) => self.block(id, waiting),
            }
        }
        runs
    }

    /// Current values of a cell's free names, or the names it must wait for.
    ///
    /// A name nobody declares is left out; the body reports it when read.
    fn resolve_inputs(
        &self,
        id: CellId,
    ) -> std::result::Result<FxHashMap<String, Value>, Vec<String>> {
        let mut inputs = FxHashMap::default();
        let mut waiting = Vec::new();
        let Some(Ok(names)) = self.cells.get(&id).map(|c| &c.names) else {
            return Ok(inputs);
        };

        for name in &names.free {
            match self.graph.provider(name) {
                Some(provider) => {
                    let value = self
                        .cells
                        .get(&provider)
                        .and_then(|p| p.binding(name))
                        .and_then(ValueCell::get);
                    match value {
                        Some(value) => {
                            inputs.insert(name.clone(), value);
                        }
                        None => waiting.push(name.clone()),
                    }
                }
                None if !self.graph.providers_of(name).is_empty() => waiting.push(name.clone()),
                None => {}
            }
        }

        if waiting.is_empty() {
            Ok(inputs)
        } else {
            Err(waiting)
        }
    }

    /// Park a cell that cannot run: its previous generation is disposed and
    /// it stays stale until its inputs resolve. A cell downstream of a cycle
    /// reports that cycle as its error.
    fn block(&mut self, id: CellId, waiting: Vec<String>) {
        let cycle = self
            .graph
            .upstream_cycle(id)
            .map(|cells| CellError::Cycle { cells });
        let was_live = self
            .cells
            .get(&id)
            .is_some_and(|c| c.token.is_some() || !c.bindings.is_empty());
        self.teardown(id);
        if let Some(cell) = self.cells.get_mut(&id) {
            if cell.static_error.is_some() {
                return;
            }
            match &cycle {
                Some(error) => tracing::debug!("Cell {} blocked: {}", id, error),
                None => tracing::debug!("Cell {} waiting on {:?}", id, waiting),
            }
            cell.output = CellOutput::default();
            cell.error = cycle;
            cell.status = CellStatus::Stale;
            cell.waiting_on = waiting;
        }
        if was_live {
            self.mark_readers_stale(id);
        }
    }

    fn run_cell(&mut self, id: CellId, inputs: FxHashMap<String, Value>) {
        self.teardown(id);
        let Some(cell) = self.cells.get_mut(&id) else {
            return;
        };
        cell.generation += 1;
        let generation = cell.generation;
        let token = InvalidationToken::new(generation);
        cell.token = Some(token.clone());
        cell.status = CellStatus::Running;
        cell.error = None;
        cell.waiting_on.clear();
        cell.output = CellOutput::default();
        let body = cell.body.clone();

        if let Some(observer) = &self.observer {
            observer.on_cell_started(id, generation);
        }
        tracing::debug!("Running cell {} (generation {})", id, generation);

        let (output, defined, tasks, outcome) = match body {
            Ok(body) => {
                let mut ctx = RunContext::new(
                    id,
                    token.clone(),
                    &inputs,
                    self.modules.as_ref(),
                    self.events_tx.clone(),
                );
                let outcome = catch_unwind(AssertUnwindSafe(|| body(&mut ctx)))
                    .unwrap_or_else(|payload| {
                        Err(CellError::runtime(panic_message(payload.as_ref())))
                    });
                let (output, defined, tasks) = ctx.finish();
                (output, defined, tasks, outcome)
            }
            Err(error) => (CellOutput::default(), Vec::new(), Vec::new(), Err(error)),
        };

        let outcome = match outcome {
            Ok(()) => self.install(id, generation, &token, defined),
            Err(error) => Err(error),
        };

        if let Some(cell) = self.cells.get_mut(&id) {
            cell.output = output;
            cell.tasks.extend(tasks);
            match &outcome {
                Ok(()) => cell.status = CellStatus::Idle,
                Err(error) => {
                    cell.bindings.clear();
                    cell.status = CellStatus::Error;
                    cell.error = Some(error.clone());
                }
            }
        }
        if let Some(observer) = &self.observer {
            match &outcome {
                Ok(()) => observer.on_cell_completed(id, CellStatus::Idle),
                Err(error) => observer.on_cell_error(id, error),
            }
        }
        self.mark_readers_stale(id);
    }

    /// Bind the declared names of a finished run to fresh value cells.
    fn install(
        &mut self,
        id: CellId,
        generation: u64,
        token: &InvalidationToken,
        mut defined: Vec<(String, Definition)>,
    ) -> std::result::Result<(), CellError> {
        let declared: Vec<String> = self
            .cells
            .get(&id)
            .map(|c| c.declared().to_vec())
            .unwrap_or_default();

        let mut bindings = Vec::with_capacity(declared.len());
        let mut pullers = FxHashMap::default();
        let mut tasks = Vec::new();

        for name in declared {
            let definition = defined
                .iter()
                .position(|(n, _)| *n == name)
                .map(|i| defined.remove(i).1);
            let value = match definition {
                None => ValueCell::constant(Value::Undefined),
                Some(Definition::Produced(Produced::Constant(value))) => ValueCell::constant(value),
                Some(Definition::Produced(Produced::Promise(future))) => {
                    tasks.push(self.spawn_promise(id, generation, token, &name, future)?);
                    ValueCell::pending(ValueKind::Promise)
                }
                Some(Definition::Produced(Produced::Generator(stream))) => {
                    let (task, pull) = self.spawn_generator(id, generation, token, &name, stream)?;
                    tasks.push(task);
                    self.pending_pulls.push(pull.clone());
                    pullers.insert(name.clone(), pull);
                    ValueCell::pending(ValueKind::Generator)
                }
                Some(Definition::Mutable(handle)) => handle.value,
            };
            bindings.push((name, value));
        }

        for (name, _) in defined {
            tracing::warn!("Cell {} defined `{}`, which it does not declare", id, name);
        }

        if let Some(cell) = self.cells.get_mut(&id) {
            cell.bindings = bindings;
            cell.pullers = pullers;
            cell.tasks.extend(tasks);
        }
        Ok(())
    }

    fn spawn_promise(
        &self,
        cell: CellId,
        generation: u64,
        token: &InvalidationToken,
        name: &str,
        future: BoxFuture<'static, std::result::Result<Value, Value>>,
    ) -> std::result::Result<JoinHandle<()>, CellError> {
        let runtime = runtime_handle()?;
        let events = self.events_tx.clone();
        let name = name.to_string();
        let task = runtime.spawn(async move {
            let result = future.await;
            let _ = events.send(Event::Settled {
                cell,
                generation,
                name,
                result,
            });
        });
        let abort = task.abort_handle();
        token.on_dispose(move || abort.abort());
        Ok(task)
    }

    /// Spawn the pull loop of a generator: one item per request on the
    /// returned channel, until the stream ends or fails.
    fn spawn_generator(
        &self,
        cell: CellId,
        generation: u64,
        token: &InvalidationToken,
        name: &str,
        mut stream: BoxStream<'static, std::result::Result<Value, Value>>,
    ) -> std::result::Result<(JoinHandle<()>, mpsc::Sender<()>), CellError> {
        let runtime = runtime_handle()?;
        let events = self.events_tx.clone();
        let name = name.to_string();
        let (pull_tx, mut pull_rx) = mpsc::channel::<()>(1);

        let task = runtime.spawn(async move {
            while pull_rx.recv().await.is_some() {
                let (event, done) = match stream.next().await {
                    Some(Ok(item)) => (
                        Event::Yielded {
                            cell,
                            generation,
                            name: name.clone(),
                            item,
                        },
                        false,
                    ),
                    Some(Err(error)) => (
                        Event::GeneratorDone {
                            cell,
                            generation,
                            name: name.clone(),
                            error: Some(error),
                        },
                        true,
                    ),
                    None => (
                        Event::GeneratorDone {
                            cell,
                            generation,
                            name: name.clone(),
                            error: None,
                        },
                        true,
                    ),
                };
                if events.send(event).is_err() || done {
                    break;
                }
            }
        });
        let abort = task.abort_handle();
        token.on_dispose(move || abort.abort());
        Ok((task, pull_tx))
    }

    fn apply_events(&mut self) {
        while let Ok(event) = self.events_rx.try_recv() {
            self.apply_event(event);
        }
    }

    fn apply_event(&mut self, event: Event) {
        let (id, generation) = event.target();
        let Some(cell) = self.cells.get_mut(&id) else {
            return;
        };
        if !cell.is_live(generation) {
            tracing::debug!("Dropping event for superseded generation {} of cell {}", generation, id);
            return;
        }

        match event {
            Event::Settled { name, result, .. } => {
                let Some(value) = cell.binding(&name).cloned() else {
                    return;
                };
                match result {
                    Ok(resolved) => {
                        value.set(resolved);
                    }
                    Err(rejected) => {
                        let error = CellError::runtime(&rejected);
                        value.set(rejected);
                        cell.status = CellStatus::Error;
                        cell.error = Some(error.clone());
                        if let Some(observer) = &self.observer {
                            observer.on_cell_error(id, &error);
                        }
                    }
                }
                self.mark_name_readers_stale(id, &name);
            }
            Event::Yielded { name, item, .. } => {
                let Some(value) = cell.binding(&name).cloned() else {
                    return;
                };
                value.set(item);
                if let Some(pull) = cell.pullers.get(&name) {
                    self.pending_pulls.push(pull.clone());
                }
                tracing::debug!("Cell {} generator `{}` yielded", id, name);
                self.mark_name_readers_stale(id, &name);
            }
            Event::GeneratorDone { name, error, .. } => {
                cell.pullers.remove(&name);
                match error {
                    Some(thrown) => {
                        let error = CellError::runtime(&thrown);
                        cell.status = CellStatus::Error;
                        cell.error = Some(error.clone());
                        if let Some(observer) = &self.observer {
                            observer.on_cell_error(id, &error);
                        }
                    }
                    None => tracing::debug!("Cell {} generator `{}` finished", id, name),
                }
            }
            Event::MutableSet { name, update, .. } => {
                let Some(value) = cell.binding(&name).cloned() else {
                    return;
                };
                let current = value.get().unwrap_or(Value::Undefined);
                let next = match update {
                    MutableUpdate::Replace(next) => next,
                    MutableUpdate::Apply(f) => f(&current),
                    MutableUpdate::Call(f) => match f.call(vec![current]) {
                        Ok(next) => next,
                        Err(thrown) => {
                            tracing::warn!("Cell {} setter for `{}` failed: {}", id, name, thrown);
                            cell.warnings.push(CellError::runtime(&thrown));
                            return;
                        }
                    },
                };
                value.set(next);
                self.mark_name_readers_stale(id, &name);
            }
            Event::Emit { value, .. } => cell.output.display.push(value),
        }
    }

    /// Wait for the next asynchronous event and apply it.
    pub async fn next_event(&mut self) {
        if let Some(event) = self.events_rx.recv().await {
            self.apply_event(event);
        }
    }

    /// Whether promises, generators or spawned tasks are still running.
    pub fn has_live_tasks(&self) -> bool {
        self.cells
            .values()
            .any(|c| c.tasks.iter().any(|t| !t.is_finished()))
    }

    /// Drain repeatedly until nothing is stale and no task is running, or
    /// until `timeout` passes. Returns `true` if the notebook went idle.
    pub async fn run_until_idle(&mut self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            self.drain();
            if !self.has_live_tasks() {
                match self.events_rx.try_recv() {
                    Ok(event) => {
                        self.apply_event(event);
                        continue;
                    }
                    Err(_) => return true,
                }
            }
            match tokio::time::timeout_at(deadline, self.events_rx.recv()).await {
                Ok(Some(event)) => self.apply_event(event),
                Ok(None) => return true,
                Err(_) => return false,
            }
        }
    }

    /// Cell ids in source order.
    pub fn cell_ids(&self) -> Vec<CellId> {
        self.graph.cell_ids()
    }

    pub fn status(&self, id: CellId) -> Option<CellStatus> {
        match self.cells.get(&id) {
            Some(cell) => Some(cell.status),
            None if self.disposed.contains(&id) => Some(CellStatus::Disposed),
            None => None,
        }
    }

    /// How many times the cell's body has run.
    pub fn run_count(&self, id: CellId) -> Option<u64> {
        self.cells.get(&id).map(|c| c.generation)
    }

    pub fn error(&self, id: CellId) -> Option<&CellError> {
        self.cells.get(&id).and_then(|c| c.error.as_ref())
    }

    pub fn output(&self, id: CellId) -> Option<&CellOutput> {
        self.cells.get(&id).map(|c| &c.output)
    }

    /// Value cell currently bound to `name`, if one cell supplies it.
    pub fn value_cell(&self, name: &str) -> Option<ValueCell> {
        let provider = self.graph.provider(name)?;
        self.cells.get(&provider)?.binding(name).cloned()
    }

    pub fn value(&self, name: &str) -> Option<ValueState> {
        self.value_cell(name).map(|v| v.state())
    }

    /// Whether every cell is up to date with its inputs.
    pub fn is_settled(&self) -> bool {
        self.stale.is_empty()
    }

    pub fn view(&self, id: CellId) -> Option<CellView> {
        let cell = self.cells.get(&id)?;
        let options = &self.config.format;
        Some(CellView {
            id,
            span: cell.span,
            status: cell.status,
            generation: cell.generation,
            declared: cell.declared().to_vec(),
            outputs: cell
                .output
                .display
                .iter()
                .map(|v| format(v, options))
                .collect(),
            table: (!cell.output.table.is_empty()).then(|| cell.output.table.render(options)),
            values: cell
                .bindings
                .iter()
                .map(|(name, value)| BindingView {
                    name: name.clone(),
                    kind: value.kind(),
                    version: value.version(),
                    value: value.get().map(|v| format(&v, options)),
                })
                .collect(),
            error: cell.error.clone(),
            warnings: cell.warnings.clone(),
            waiting_on: cell.waiting_on.clone(),
        })
    }

    /// Views of every cell, in source order.
    pub fn views(&self) -> Vec<CellView> {
        self.cell_ids()
            .into_iter()
            .filter_map(|id| self.view(id))
            .collect()
    }
}

impl Drop for Notebook {
    fn drop(&mut self) {
        let ids: Vec<CellId> = self.cells.keys().copied().collect();
        for id in ids {
            self.teardown(id);
        }
    }
}

fn runtime_handle() -> std::result::Result<tokio::runtime::Handle, CellError> {
    tokio::runtime::Handle::try_current()
        .map_err(|_| CellError::runtime("async values need a running tokio runtime"))
}
