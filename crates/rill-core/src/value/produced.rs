//! What a cell body produces for its declared names.

use std::sync::Arc;

use futures::future::BoxFuture;
use futures::stream::BoxStream;
use futures::{FutureExt, Stream, StreamExt};
use tokio::sync::mpsc::UnboundedSender;

use super::cell::ValueCell;
use super::types::{Function, Value};
use crate::execute::{Event, MutableUpdate};
use crate::graph::CellId;

/// The outcome of a body for one declared name.
///
/// A future or stream yields `Err` with the thrown value when it fails.
pub enum Produced {
    /// A plain value, resolved immediately.
    Constant(Value),
    /// Settles once; readers wait until then.
    Promise(BoxFuture<'static, Result<Value, Value>>),
    /// Pulled one item at a time by the scheduler.
    Generator(BoxStream<'static, Result<Value, Value>>),
}

impl Produced {
    pub fn promise<F>(future: F) -> Self
    where
        F: Future<Output = Result<Value, Value>> + Send + 'static,
    {
        Self::Promise(future.boxed())
    }

    pub fn generator<S>(stream: S) -> Self
    where
        S: Stream<Item = Result<Value, Value>> + Send + 'static,
    {
        Self::Generator(stream.boxed())
    }
}

impl From<Value> for Produced {
    fn from(value: Value) -> Self {
        Self::Constant(value)
    }
}

impl std::fmt::Debug for Produced {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Constant(v) => f.debug_tuple("Constant").field(v).finish(),
            Self::Promise(_) => f.write_str("Promise(..)"),
            Self::Generator(_) => f.write_str("Generator(..)"),
        }
    }
}

/// Handle to a mutable value.
///
/// Setting never re-runs the defining cell. Updates travel through the
/// scheduler loop and are applied one at a time in arrival order, so a
/// read-modify-write through [`update`](Self::update) never loses a
/// concurrent write.
#[derive(Clone)]
pub struct MutableHandle {
    pub(crate) cell: CellId,
    pub(crate) generation: u64,
    pub(crate) name: Arc<str>,
    pub(crate) value: ValueCell,
    pub(crate) events: UnboundedSender<Event>,
}

impl MutableHandle {
    /// Replace the value.
    pub fn set(&self, value: impl Into<Value>) {
        self.send(MutableUpdate::Replace(value.into()));
    }

    /// Apply `f` to the value current when the update is processed.
    pub fn update(&self, f: impl FnOnce(&Value) -> Value + Send + 'static) {
        self.send(MutableUpdate::Apply(Box::new(f)));
    }

    /// Current value; `Undefined` only if the handle was never resolved.
    pub fn get(&self) -> Value {
        self.value.get().unwrap_or(Value::Undefined)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value_cell(&self) -> &ValueCell {
        &self.value
    }

    /// The setter as a function value. A function argument is applied to
    /// the previous value; anything else replaces it.
    pub fn setter(&self) -> Function {
        let handle = self.clone();
        Function::native(format!("set_{}", self.name), move |args| {
            let arg = args.into_iter().next().unwrap_or(Value::Undefined);
            match arg {
                Value::Function(f) => handle.send(MutableUpdate::Call(f)),
                other => handle.send(MutableUpdate::Replace(other)),
            }
            Ok(Value::Undefined)
        })
    }

    /// The getter as a function value.
    pub fn getter(&self) -> Function {
        let value = self.value.clone();
        Function::native(format!("get_{}", self.name), move |_| {
            Ok(value.get().unwrap_or(Value::Undefined))
        })
    }

    fn send(&self, update: MutableUpdate) {
        let event = Event::MutableSet {
            cell: self.cell,
            generation: self.generation,
            name: self.name.to_string(),
            update,
        };
        if self.events.send(event).is_err() {
            tracing::debug!("mutable {} set after its notebook was dropped", self.name);
        }
    }
}

impl std::fmt::Debug for MutableHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MutableHandle")
            .field("cell", &self.cell)
            .field("generation", &self.generation)
            .field("name", &self.name)
            .field("value", &self.value)
            .finish()
    }
}
