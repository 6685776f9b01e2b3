//! Value model: dynamic values, reactive value cells, and produced kinds.

mod cell;
mod produced;
mod types;

pub use cell::{Subscription, ValueCell, ValueKind, ValueState};
pub use produced::{MutableHandle, Produced};
pub use types::{Callable, Function, Value};
