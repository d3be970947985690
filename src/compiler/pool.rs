//! Bounded thread pool for offloaded compiles.

use std::cell::Cell;
use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, SendTimeoutError, Sender, TrySendError};

thread_local! {
    /// True on threads owned by any [`WorkerPool`].
    static IN_WORKER: Cell<bool> = const { Cell::new(false) };
}

/// Why a job was not accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SubmitError {
    Full { capacity: usize },
    Disconnected,
}

impl std::fmt::Display for SubmitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Full { capacity } => write!(f, "compile queue full (capacity {capacity})"),
            Self::Disconnected => write!(f, "compile workers shut down"),
        }
    }
}

/// Fixed set of named threads draining one bounded queue of `J`.
pub(crate) struct WorkerPool<J: Send + 'static> {
    tx: Option<Sender<J>>,
    workers: Vec<JoinHandle<()>>,
    handler: Arc<dyn Fn(J) + Send + Sync>,
    queue_capacity: usize,
}

impl<J: Send + 'static> WorkerPool<J> {
    pub(crate) fn start(
        name: &str,
        workers: usize,
        queue_capacity: usize,
        handler: Arc<dyn Fn(J) + Send + Sync>,
    ) -> io::Result<Self> {
        let workers = workers.max(1);
        let queue_capacity = queue_capacity.max(1);
        let (tx, rx) = bounded::<J>(queue_capacity);

        let mut handles = Vec::with_capacity(workers);
        for idx in 0..workers {
            let rx: Receiver<J> = rx.clone();
            let handler = Arc::clone(&handler);
            let handle = thread::Builder::new()
                .name(format!("spacehost-{name}-{idx}"))
                .spawn(move || {
                    IN_WORKER.with(|flag| flag.set(true));
                    while let Ok(job) = rx.recv() {
                        handler(job);
                    }
                })?;
            handles.push(handle);
        }

        Ok(Self {
            tx: Some(tx),
            workers: handles,
            handler,
            queue_capacity,
        })
    }

    /// Enqueues `job`, waiting up to `wait` for queue space.
    ///
    /// A pool thread never waits: when the queue is full it runs the job
    /// itself, since the workers it would wait on may include itself. A
    /// rejected job is handed back.
    pub(crate) fn submit(&self, job: J, wait: Duration) -> Result<(), (SubmitError, J)> {
        let Some(tx) = self.tx.as_ref() else {
            return Err((SubmitError::Disconnected, job));
        };
        let job = match tx.try_send(job) {
            Ok(()) => return Ok(()),
            Err(TrySendError::Full(job)) => job,
            Err(TrySendError::Disconnected(job)) => return Err((SubmitError::Disconnected, job)),
        };
        if IN_WORKER.with(Cell::get) {
            (self.handler)(job);
            return Ok(());
        }
        match tx.send_timeout(job, wait) {
            Ok(()) => Ok(()),
            Err(SendTimeoutError::Timeout(job)) => Err((
                SubmitError::Full {
                    capacity: self.queue_capacity,
                },
                job,
            )),
            Err(SendTimeoutError::Disconnected(job)) => Err((SubmitError::Disconnected, job)),
        }
    }
}

impl<J: Send + 'static> Drop for WorkerPool<J> {
    fn drop(&mut self) {
        // Close the channel: workers drain queued jobs then exit.
        drop(self.tx.take());
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}
