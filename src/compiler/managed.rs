//! External-store-backed compilation with worker-pool offload.
//!
//! Each request is handed to a bounded worker pool. A worker first asks the
//! external artifact store for the artifact by name; on a miss it compiles
//! through the inner compiler and writes the result back. Store failures
//! never fail the caller: a read error degrades to a compile, and a write
//! error is logged while the fresh artifact is still delivered.
//!
//! A full queue applies backpressure: the submitting thread waits up to
//! [`ManagedConfig::submit_timeout`] for space, so one large deploy is
//! throttled rather than refused.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::completion::Callback;
use crate::error::{CompileError, HostError, HostResult};
use crate::metrics::Metrics;
use crate::store::ArtifactStore;

use super::pool::WorkerPool;
use super::{CompileRequest, CompileResult, Compiler};

/// Offload pool sizing.
#[derive(Debug, Clone)]
pub struct ManagedConfig {
    /// Number of compile workers.
    pub workers: usize,
    /// Maximum queued compiles before submitters wait.
    pub queue_capacity: usize,
    /// How long a submitter waits for queue space before the request is
    /// refused with `CompileError::Unavailable`.
    pub submit_timeout: Duration,
}

impl Default for ManagedConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            queue_capacity: 256,
            submit_timeout: Duration::from_secs(30),
        }
    }
}

struct CompileJob {
    request: CompileRequest,
    done: Callback<CompileResult>,
}

struct Worker {
    inner: Arc<dyn Compiler>,
    store: Arc<dyn ArtifactStore>,
    metrics: Arc<Metrics>,
}

impl Worker {
    fn run(&self, job: CompileJob) {
        let CompileJob { request, done } = job;

        match self.store.get(&request.artifact_name) {
            Ok(Some(artifact)) => {
                self.metrics.bytecode_found.inc();
                debug!(artifact = %request.artifact_name, "artifact found in store");
                done(Ok(Arc::new(artifact)));
                return;
            }
            Ok(None) => {}
            Err(err) => {
                warn!(artifact = %request.artifact_name, error = %err, "artifact store lookup failed; compiling");
            }
        }

        let store = Arc::clone(&self.store);
        let metrics = Arc::clone(&self.metrics);
        self.inner.fetch_or_compile(
            request,
            Box::new(move |result| {
                match &result {
                    Ok(artifact) => {
                        metrics.bytecode_compiled.inc();
                        match store.put(artifact) {
                            Ok(()) => metrics.bytecode_stored.inc(),
                            Err(err) => {
                                metrics.bytecode_store_failed.inc();
                                warn!(
                                    artifact = %artifact.artifact_name(),
                                    error = %err,
                                    "failed to store compiled artifact"
                                );
                            }
                        }
                    }
                    Err(err) => {
                        metrics.bytecode_compile_failed.inc();
                        debug!(error = %err, "compile failed");
                    }
                }
                done(result);
            }),
        );
    }
}

/// Compiler that consults an external store and offloads misses to a pool.
pub struct ManagedCompiler {
    pool: WorkerPool<CompileJob>,
    submit_timeout: Duration,
}

impl ManagedCompiler {
    /// Starts the worker pool.
    pub fn new(
        inner: Arc<dyn Compiler>,
        store: Arc<dyn ArtifactStore>,
        config: ManagedConfig,
        metrics: Arc<Metrics>,
    ) -> HostResult<Self> {
        let worker = Arc::new(Worker { inner, store, metrics });
        let pool = WorkerPool::start(
            "compile",
            config.workers,
            config.queue_capacity,
            Arc::new(move |job| worker.run(job)),
        )
        .map_err(|e| HostError::internal(format!("spawn compile workers: {e}")))?;
        Ok(Self {
            pool,
            submit_timeout: config.submit_timeout,
        })
    }
}

impl Compiler for ManagedCompiler {
    fn fetch_or_compile(&self, request: CompileRequest, done: Callback<CompileResult>) {
        if let Err((err, job)) = self.pool.submit(CompileJob { request, done }, self.submit_timeout) {
            warn!(artifact = %job.request.artifact_name, error = %err, "compile offload refused");
            (job.done)(Err(CompileError::Unavailable {
                reason: err.to_string(),
            }));
        }
    }
}
