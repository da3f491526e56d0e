//! # Settle-once result channels.
//!
//! A supervisor hands out three asynchronous results: readiness, the task
//! result and completion. Each is an [`Outcome`] fed by exactly one
//! [`Settler`].
//!
//! ## Rules
//! - The first `settle` wins; later ones are ignored and return `false`.
//! - Dropping an unsettled `Settler` settles it with [`WorkerError::Cancelled`],
//!   so a waiter never hangs.
//! - Any number of clones may wait; all see the same value.
//!
//! ```text
//! Settler::settle(v) ──► watch<Option<Result<T>>> ──► Outcome::wait() (many)
//! drop(Settler)      ──► Err(Cancelled { what })
//! ```

use tokio::sync::watch;

use crate::error::WorkerError;

type Slot<T> = Option<Result<T, WorkerError>>;

/// Producer side of an [`Outcome`].
pub(crate) struct Settler<T> {
    tx: watch::Sender<Slot<T>>,
    what: &'static str,
}

/// Result that becomes available exactly once.
///
/// Cheap to clone; every clone observes the same value.
#[derive(Debug)]
pub struct Outcome<T> {
    rx: watch::Receiver<Slot<T>>,
    what: &'static str,
}

impl<T> Clone for Outcome<T> {
    fn clone(&self) -> Self {
        Self {
            rx: self.rx.clone(),
            what: self.what,
        }
    }
}

/// Creates a connected settler/outcome pair; `what` names the result in
/// [`WorkerError::Cancelled`].
pub(crate) fn outcome<T>(what: &'static str) -> (Settler<T>, Outcome<T>) {
    let (tx, rx) = watch::channel(None);
    (Settler { tx, what }, Outcome { rx, what })
}

impl<T> Settler<T> {
    /// Stores `value` unless something was stored before.
    ///
    /// Returns `true` if this call settled the outcome.
    pub(crate) fn settle(&self, value: Result<T, WorkerError>) -> bool {
        self.tx.send_if_modified(move |slot| {
            if slot.is_some() {
                return false;
            }
            *slot = Some(value);
            true
        })
    }
}

impl<T> Drop for Settler<T> {
    fn drop(&mut self) {
        let what = self.what;
        self.settle(Err(WorkerError::Cancelled { what }));
    }
}

impl<T: Clone> Outcome<T> {
    /// Waits until the outcome is settled and returns a copy of it.
    pub async fn wait(&self) -> Result<T, WorkerError> {
        let mut rx = self.rx.clone();
        loop {
            if let Some(value) = rx.borrow_and_update().as_ref() {
                return value.clone();
            }
            if rx.changed().await.is_err() {
                return rx.borrow().clone().unwrap_or(Err(WorkerError::Cancelled {
                    what: self.what,
                }));
            }
        }
    }

    /// Returns the value if already settled, without waiting.
    pub fn peek(&self) -> Option<Result<T, WorkerError>> {
        self.rx.borrow().clone()
    }
}

impl<T> Outcome<T> {
    /// True once a value (or an error) is stored.
    pub fn is_settled(&self) -> bool {
        self.rx.borrow().is_some()
    }

    /// Name of this result, as used in [`WorkerError::Cancelled`].
    pub fn what(&self) -> &'static str {
        self.what
    }
}
