//! Per-generation invalidation tokens.
//!
//! Each run of a cell gets a fresh [`InvalidationToken`]. It fires exactly
//! once, right before the next run of the same cell or when the cell is
//! removed, and runs the disposal callbacks registered during the run.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex};

use tokio::sync::watch;

use crate::error::{CellError, panic_message};

type DisposeFn = Box<dyn FnOnce() -> Result<(), String> + Send>;

struct State {
    fired: bool,
    callbacks: Vec<DisposeFn>,
}

struct Inner {
    generation: u64,
    state: Mutex<State>,
    fired_tx: watch::Sender<bool>,
}

/// Disposal contract for one generation of a cell.
#[derive(Clone)]
pub struct InvalidationToken {
    inner: Arc<Inner>,
}

impl InvalidationToken {
    pub fn new(generation: u64) -> Self {
        let (fired_tx, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                generation,
                state: Mutex::new(State {
                    fired: false,
                    callbacks: Vec::new(),
                }),
                fired_tx,
            }),
        }
    }

    pub fn generation(&self) -> u64 {
        self.inner.generation
    }

    pub fn is_fired(&self) -> bool {
        self.lock().fired
    }

    /// Register a disposal callback.
    pub fn on_dispose(&self, f: impl FnOnce() + Send + 'static) {
        self.try_on_dispose(move || {
            f();
            Ok(())
        });
    }

    /// Register a disposal callback that can fail.
    ///
    /// Registering on a token that already fired runs the callback at once.
    pub fn try_on_dispose(&self, f: impl FnOnce() -> Result<(), String> + Send + 'static) {
        {
            let mut state = self.lock();
            if !state.fired {
                state.callbacks.push(Box::new(f));
                return;
            }
        }
        if let Some(err) = run_callback(Box::new(f)) {
            tracing::warn!("late disposal callback failed: {err}");
        }
    }

    /// Promise-style registration: `f` runs when this generation is
    /// superseded.
    pub fn then(&self, f: impl FnOnce() + Send + 'static) {
        self.on_dispose(f);
    }

    /// Resolves once the token has fired.
    pub async fn invalidated(&self) {
        let mut rx = self.inner.fired_tx.subscribe();
        let _ = rx.wait_for(|fired| *fired).await;
    }

    /// Fire the token. Callbacks run in registration order; a failing or
    /// panicking callback is reported and the rest still run. Firing twice
    /// is a no-op.
    pub(crate) fn fire(&self) -> Vec<CellError> {
        let callbacks = {
            let mut state = self.lock();
            if state.fired {
                return Vec::new();
            }
            state.fired = true;
            std::mem::take(&mut state.callbacks)
        };
        self.inner.fired_tx.send_replace(true);
        callbacks.into_iter().filter_map(run_callback).collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.inner.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl std::fmt::Debug for InvalidationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InvalidationToken")
            .field("generation", &self.inner.generation)
            .field("fired", &self.is_fired())
            .finish()
    }
}

fn run_callback(f: DisposeFn) -> Option<CellError> {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(())) => None,
        Ok(Err(message)) => Some(CellError::Disposal { message }),
        Err(payload) => Some(CellError::Disposal {
            message: panic_message(payload.as_ref()),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_fires_once_in_registration_order() {
        let token = InvalidationToken::new(1);
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..3 {
            let order = order.clone();
            token.on_dispose(move || order.lock().unwrap().push(i));
        }

        assert!(token.fire().is_empty());
        assert!(token.fire().is_empty());
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
        assert!(token.is_fired());
    }

    #[test]
    fn test_failing_callback_does_not_block_others() {
        let token = InvalidationToken::new(1);
        let count = Arc::new(AtomicUsize::new(0));

        let c = count.clone();
        token.on_dispose(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        token.try_on_dispose(|| Err("close failed".to_string()));
        token.on_dispose(|| panic!("boom"));
        let c = count.clone();
        token.on_dispose(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });

        let errors = token.fire();
        assert_eq!(count.load(Ordering::SeqCst), 2);
        assert_eq!(
            errors,
            vec![
                CellError::Disposal {
                    message: "close failed".into()
                },
                CellError::Disposal {
                    message: "boom".into()
                },
            ]
        );
    }

    #[test]
    fn test_register_after_fire_runs_immediately() {
        let token = InvalidationToken::new(1);
        token.fire();

        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        token.then(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_invalidated_resolves_on_fire() {
        let token = InvalidationToken::new(3);
        let waiter = token.clone();
        let task = tokio::spawn(async move {
            waiter.invalidated().await;
            waiter.generation()
        });

        tokio::task::yield_now().await;
        assert!(!task.is_finished());
        token.fire();
        assert_eq!(task.await.unwrap(), 3);
    }
}
