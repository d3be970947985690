//! Completion plumbing.
//!
//! Every externally visible operation in spacehost reports its outcome
//! through a one-shot [`Callback`]. [`Pending`] adapts that style to a
//! blocking handle for synchronous callers and tests.

use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};

use crate::error::{HostError, HostResult};

/// One-shot continuation invoked with an operation's outcome.
pub type Callback<T> = Box<dyn FnOnce(T) + Send + 'static>;

/// Blocking handle for an outcome delivered through a [`Callback`].
pub struct Pending<T> {
    label: &'static str,
    rx: Receiver<T>,
}

impl<T: Send + 'static> Pending<T> {
    /// Creates a handle and the callback that completes it.
    ///
    /// `label` names the operation in disconnect and timeout errors.
    #[must_use]
    pub fn new(label: &'static str) -> (Callback<T>, Self) {
        let (tx, rx) = bounded::<T>(1);
        let callback: Callback<T> = Box::new(move |value| {
            let _ = tx.send(value);
        });
        (callback, Self { label, rx })
    }

    /// Waits for the outcome.
    ///
    /// Fails with `Internal` if the callback was dropped without being called.
    pub fn join(self) -> HostResult<T> {
        self.rx
            .recv()
            .map_err(|_| HostError::internal(format!("{}: completion dropped", self.label)))
    }

    /// Waits for the outcome with a timeout.
    pub fn join_timeout(self, timeout: Duration) -> HostResult<T> {
        self.rx.recv_timeout(timeout).map_err(|err| match err {
            RecvTimeoutError::Timeout => HostError::internal(format!(
                "{}: timed out after {}ms",
                self.label,
                timeout.as_millis().min(u128::from(u64::MAX))
            )),
            RecvTimeoutError::Disconnected => {
                HostError::internal(format!("{}: completion dropped", self.label))
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_returns_delivered_value() {
        let (done, pending) = Pending::<u32>::new("answer");
        std::thread::spawn(move || done(42));
        assert_eq!(pending.join().unwrap(), 42);
    }

    #[test]
    fn test_join_reports_dropped_callback() {
        let (done, pending) = Pending::<u32>::new("dropped");
        drop(done);
        let err = pending.join().unwrap_err();
        assert!(err.to_string().contains("dropped"));
    }

    #[test]
    fn test_join_timeout_reports_timeout_not_disconnect() {
        let (_done, pending) = Pending::<u32>::new("slow");
        let err = pending.join_timeout(Duration::from_millis(10)).unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }
}
