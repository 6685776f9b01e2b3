//! The reactive single-slot value holder.

use std::sync::{Arc, Mutex, MutexGuard, Weak};

use super::types::Value;

/// How a [`ValueCell`] gets its value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
    /// Resolved once when the owning cell runs.
    Constant,
    /// Pending until a future settles.
    Promise,
    /// Updated with every item pulled from a stream.
    Generator,
    /// Updated by its setter, from anywhere.
    Mutable,
}

/// Current content of a [`ValueCell`].
#[derive(Debug, Clone, PartialEq)]
pub enum ValueState {
    /// Not resolved yet. Readers wait.
    Pending,
    Ready(Value),
}

impl ValueState {
    pub fn value(&self) -> Option<&Value> {
        match self {
            Self::Pending => None,
            Self::Ready(v) => Some(v),
        }
    }
}

type Subscriber = Arc<dyn Fn(u64, &ValueState) + Send + Sync>;

struct Inner {
    kind: ValueKind,
    state: ValueState,
    version: u64,
    /// Last version handed to subscribers.
    delivered: u64,
    notifying: bool,
    next_subscriber: u64,
    subscribers: Vec<(u64, Subscriber)>,
}

/// Holder of one declared name's time-varying value.
///
/// Every change bumps a monotonic version. Subscribers are told about each
/// version at most once and never reentrantly: a change made from inside a
/// subscriber is delivered after the current round, and several changes
/// made meanwhile are delivered as one, carrying the latest state.
#[derive(Clone)]
pub struct ValueCell {
    inner: Arc<Mutex<Inner>>,
}

impl ValueCell {
    /// A pending cell of the given kind.
    pub fn pending(kind: ValueKind) -> Self {
        Self::with_state(kind, ValueState::Pending, 0)
    }

    /// A resolved constant.
    pub fn constant(value: Value) -> Self {
        Self::with_state(ValueKind::Constant, ValueState::Ready(value), 1)
    }

    /// A resolved cell of the given kind.
    pub fn ready(kind: ValueKind, value: Value) -> Self {
        Self::with_state(kind, ValueState::Ready(value), 1)
    }

    fn with_state(kind: ValueKind, state: ValueState, version: u64) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                kind,
                state,
                version,
                delivered: version,
                notifying: false,
                next_subscriber: 0,
                subscribers: Vec::new(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn kind(&self) -> ValueKind {
        self.lock().kind
    }

    pub fn state(&self) -> ValueState {
        self.lock().state.clone()
    }

    /// The resolved value, or `None` while pending.
    pub fn get(&self) -> Option<Value> {
        self.lock().state.value().cloned()
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.lock().state, ValueState::Pending)
    }

    pub fn version(&self) -> u64 {
        self.lock().version
    }

    /// Replace the value and bump the version.
    pub fn set(&self, value: Value) -> u64 {
        self.update(ValueState::Ready(value))
    }

    /// Return to pending and bump the version.
    pub fn mark_pending(&self) -> u64 {
        self.update(ValueState::Pending)
    }

    fn update(&self, state: ValueState) -> u64 {
        let version = {
            let mut inner = self.lock();
            inner.state = state;
            inner.version += 1;
            if inner.notifying {
                return inner.version;
            }
            inner.notifying = true;
            inner.version
        };
        self.notify();
        version
    }

    fn notify(&self) {
        let mut round = NotifyRound {
            cell: self,
            finished: false,
        };
        loop {
            let (version, state, subscribers) = {
                let mut inner = self.lock();
                if inner.delivered == inner.version {
                    inner.notifying = false;
                    round.finished = true;
                    return;
                }
                inner.delivered = inner.version;
                let subscribers: Vec<Subscriber> =
                    inner.subscribers.iter().map(|(_, s)| s.clone()).collect();
                (inner.version, inner.state.clone(), subscribers)
            };
            for subscriber in subscribers {
                subscriber(version, &state);
            }
        }
    }

    /// Register a callback for version changes. Dropping the returned
    /// guard unsubscribes.
    pub fn subscribe(&self, f: impl Fn(u64, &ValueState) + Send + Sync + 'static) -> Subscription {
        let mut inner = self.lock();
        let id = inner.next_subscriber;
        inner.next_subscriber += 1;
        inner.subscribers.push((id, Arc::new(f)));
        Subscription {
            cell: Arc::downgrade(&self.inner),
            id,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }

    /// Whether two handles refer to the same cell.
    pub fn same_cell(&self, other: &ValueCell) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl std::fmt::Debug for ValueCell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock();
        f.debug_struct("ValueCell")
            .field("kind", &inner.kind)
            .field("state", &inner.state)
            .field("version", &inner.version)
            .finish()
    }
}

/// Clears the notifying flag if a subscriber unwinds out of a round.
struct NotifyRound<'a> {
    cell: &'a ValueCell,
    finished: bool,
}

impl Drop for NotifyRound<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.cell.lock().notifying = false;
        }
    }
}

/// Subscription guard returned by [`ValueCell::subscribe`].
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    cell: Weak<Mutex<Inner>>,
    id: u64,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cell) = self.cell.upgrade() {
            let mut inner = cell.lock().unwrap_or_else(|e| e.into_inner());
            inner.subscribers.retain(|(id, _)| *id != self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    #[test]
    fn test_versions_are_monotonic() {
        let cell = ValueCell::pending(ValueKind::Promise);
        assert!(cell.is_pending());
        assert_eq!(cell.version(), 0);

        assert_eq!(cell.set(Value::from(1)), 1);
        assert_eq!(cell.set(Value::from(2)), 2);
        assert_eq!(cell.get(), Some(Value::from(2)));
        assert_eq!(cell.kind(), ValueKind::Promise);
    }

    #[test]
    fn test_subscribers_see_every_version_once() {
        let cell = ValueCell::constant(Value::from(0));
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let sink = seen.clone();
        let _sub = cell.subscribe(move |version, state| {
            sink.lock().unwrap().push((version, state.clone()));
        });

        cell.set(Value::from(1));
        cell.set(Value::from(2));

        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                (2, ValueState::Ready(Value::from(1))),
                (3, ValueState::Ready(Value::from(2))),
            ]
        );
    }

    #[test]
    fn test_change_inside_subscriber_is_queued() {
        let cell = ValueCell::constant(Value::from(0));
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let sink = seen.clone();
        let writer = cell.clone();
        let _sub = cell.subscribe(move |version, state| {
            sink.lock().unwrap().push(version);
            if state.value() == Some(&Value::from(1)) {
                // runs before this callback returns, delivered afterwards
                writer.set(Value::from(10));
                writer.set(Value::from(11));
            }
        });

        cell.set(Value::from(1));

        // 3 and 4 were coalesced into one delivery of the latest version
        assert_eq!(*seen.lock().unwrap(), vec![2, 4]);
        assert_eq!(cell.get(), Some(Value::from(11)));
    }

    #[test]
    fn test_panicking_subscriber_does_not_stall_later_rounds() {
        let cell = ValueCell::constant(Value::from(0));
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let _failing = cell.subscribe(|_, state| {
            if state.value() == Some(&Value::from(1)) {
                panic!("subscriber failed");
            }
        });
        let sink = seen.clone();
        let _counting = cell.subscribe(move |version, _| sink.lock().unwrap().push(version));

        let writer = cell.clone();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
            writer.set(Value::from(1));
        }));
        assert!(result.is_err());

        cell.set(Value::from(2));
        assert_eq!(*seen.lock().unwrap(), vec![3]);
        assert_eq!(cell.get(), Some(Value::from(2)));
    }

    #[test]
    fn test_drop_subscription_unsubscribes() {
        let cell = ValueCell::constant(Value::Null);
        let sub = cell.subscribe(|_, _| {});
        assert_eq!(cell.subscriber_count(), 1);
        drop(sub);
        assert_eq!(cell.subscriber_count(), 0);
    }

    #[test]
    fn test_mark_pending() {
        let cell = ValueCell::ready(ValueKind::Generator, Value::from(1));
        cell.mark_pending();
        assert!(cell.is_pending());
        assert_eq!(cell.get(), None);
        assert_eq!(cell.version(), 2);
    }
}
