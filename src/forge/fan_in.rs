//! Fan-in barrier with first-failure-wins, exactly-once delivery.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use tracing::debug;

use crate::completion::Callback;

/// Joins `n` indexed results into one outcome.
///
/// The gate closes on the first error or when the last success arrives;
/// `done` runs exactly once, at that moment. Results arriving after the
/// gate closed are dropped. Each index must be completed at most once.
pub(crate) struct FanIn<T, E> {
    closed: AtomicBool,
    remaining: AtomicUsize,
    results: Mutex<Vec<Option<T>>>,
    done: Mutex<Option<Callback<Result<Vec<T>, E>>>>,
}

impl<T: Send + 'static, E: Send + 'static> FanIn<T, E> {
    /// Creates a gate for `n` results. With `n == 0` the gate delivers an
    /// empty success immediately.
    pub(crate) fn new(n: usize, done: Callback<Result<Vec<T>, E>>) -> Self {
        let gate = Self {
            closed: AtomicBool::new(false),
            remaining: AtomicUsize::new(n),
            results: Mutex::new((0..n).map(|_| None).collect()),
            done: Mutex::new(Some(done)),
        };
        if n == 0 && gate.close() {
            gate.deliver(Ok(Vec::new()));
        }
        gate
    }

    /// True once an outcome has been delivered.
    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Records the outcome for `index`.
    pub(crate) fn complete(&self, index: usize, result: Result<T, E>) {
        match result {
            Ok(value) => {
                if self.is_closed() {
                    debug!(index, "discarding success after gate closed");
                    return;
                }
                {
                    let mut results = self.results.lock().unwrap_or_else(PoisonError::into_inner);
                    if let Some(slot) = results.get_mut(index) {
                        *slot = Some(value);
                    }
                }
                if self.remaining.fetch_sub(1, Ordering::AcqRel) == 1 && self.close() {
                    let values = self
                        .results
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .drain(..)
                        .flatten()
                        .collect();
                    self.deliver(Ok(values));
                }
            }
            Err(err) => {
                if self.close() {
                    self.deliver(Err(err));
                } else {
                    debug!(index, "discarding failure after gate closed");
                }
            }
        }
    }

    fn close(&self) -> bool {
        self.closed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn deliver(&self, outcome: Result<Vec<T>, E>) {
        let done = self.done.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(done) = done {
            done(outcome);
        }
    }
}
