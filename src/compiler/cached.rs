//! Herd-protected in-memory artifact cache.
//!
//! Each key maps to either a pending slot (an inner compile is in flight and
//! late arrivals queue their callbacks on it) or a ready entry. The map, the
//! byte total and the entry count live behind one mutex, so lookups,
//! completions and the background sweep never disagree about accounting.
//! No callback runs while the lock is held.

use std::collections::HashMap;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use rand::Rng;
use tracing::debug;

use crate::artifact::{ArtifactKey, CompiledArtifact};
use crate::completion::Callback;
use crate::error::{HostError, HostResult};
use crate::metrics::Metrics;

use super::{CompileRequest, CompileResult, Compiler};

/// Cache bounds and sweep cadence.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum number of ready entries.
    pub max_entries: usize,
    /// Maximum summed `size_estimate` of ready entries.
    pub max_bytes: u64,
    /// Entries older than this are treated as absent and swept.
    pub max_age: Duration,
    /// Lower bound of the jittered sweep interval.
    pub sweep_min: Duration,
    /// Upper bound of the jittered sweep interval.
    pub sweep_max: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 1024,
            max_bytes: 256 * 1024 * 1024,
            max_age: Duration::from_secs(60 * 60),
            sweep_min: Duration::from_secs(30),
            sweep_max: Duration::from_secs(90),
        }
    }
}

impl CacheConfig {
    fn sweep_interval(&self) -> Duration {
        let lo = self.sweep_min.min(self.sweep_max).as_millis().min(u128::from(u64::MAX)) as u64;
        let hi = self.sweep_min.max(self.sweep_max).as_millis().min(u128::from(u64::MAX)) as u64;
        let ms = if lo == hi { lo } else { rand::thread_rng().gen_range(lo..=hi) };
        Duration::from_millis(ms.max(1))
    }
}

/// Point-in-time cache occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    /// Ready entries.
    pub entries: usize,
    /// Summed size of ready entries.
    pub bytes: u64,
    /// Keys with an inner compile in flight.
    pub pending: usize,
}

struct Entry {
    artifact: Arc<CompiledArtifact>,
    inserted_at: Instant,
    last_used: u64,
}

enum Slot {
    Pending(Vec<Callback<CompileResult>>),
    Ready(Entry),
}

#[derive(Default)]
struct CacheState {
    slots: HashMap<ArtifactKey, Slot>,
    ready: usize,
    bytes: u64,
    tick: u64,
}

impl CacheState {
    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    fn insert_ready(&mut self, key: ArtifactKey, artifact: Arc<CompiledArtifact>) {
        let last_used = self.next_tick();
        self.remove_ready(&key);
        self.ready += 1;
        self.bytes += artifact.size_estimate();
        self.slots.insert(
            key,
            Slot::Ready(Entry {
                artifact,
                inserted_at: Instant::now(),
                last_used,
            }),
        );
    }

    fn remove_ready(&mut self, key: &ArtifactKey) -> bool {
        if !matches!(self.slots.get(key), Some(Slot::Ready(_))) {
            return false;
        }
        if let Some(Slot::Ready(entry)) = self.slots.remove(key) {
            self.ready -= 1;
            self.bytes -= entry.artifact.size_estimate();
        }
        true
    }

    fn evict_expired(&mut self, max_age: Duration) -> usize {
        let expired: Vec<ArtifactKey> = self
            .slots
            .iter()
            .filter_map(|(key, slot)| match slot {
                Slot::Ready(entry) if entry.inserted_at.elapsed() > max_age => Some(key.clone()),
                _ => None,
            })
            .collect();
        expired.iter().filter(|key| self.remove_ready(key)).count()
    }

    fn within(&self, config: &CacheConfig) -> bool {
        self.ready <= config.max_entries && self.bytes <= config.max_bytes
    }

    /// Evicts least-recently-used entries until both bounds hold.
    fn evict_to_fit(&mut self, config: &CacheConfig) -> usize {
        if self.within(config) {
            return 0;
        }
        let mut candidates: Vec<(u64, ArtifactKey)> = self
            .slots
            .iter()
            .filter_map(|(key, slot)| match slot {
                Slot::Ready(entry) => Some((entry.last_used, key.clone())),
                Slot::Pending(_) => None,
            })
            .collect();
        candidates.sort_unstable_by_key(|(last_used, _)| *last_used);

        let mut evicted = 0;
        for (_, key) in candidates {
            if self.within(config) {
                break;
            }
            if self.remove_ready(&key) {
                evicted += 1;
            }
        }
        evicted
    }
}

struct Shared {
    config: CacheConfig,
    state: Mutex<CacheState>,
    metrics: Arc<Metrics>,
}

impl Shared {
    // Callbacks never run under this lock, so a poisoned guard still holds
    // consistent state and is recovered rather than propagated.
    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn complete(&self, key: ArtifactKey, result: CompileResult) {
        let (waiters, evicted) = {
            let mut state = self.lock();
            let waiters = match state.slots.remove(&key) {
                Some(Slot::Pending(waiters)) => waiters,
                Some(Slot::Ready(entry)) => {
                    state.slots.insert(key.clone(), Slot::Ready(entry));
                    Vec::new()
                }
                None => Vec::new(),
            };
            let mut evicted = 0;
            if let Ok(artifact) = &result {
                state.insert_ready(key.clone(), Arc::clone(artifact));
                evicted = state.evict_to_fit(&self.config);
            }
            (waiters, evicted)
        };

        if evicted > 0 {
            self.metrics.artifact_evictions.add(evicted as u64);
        }
        debug!(
            artifact = %key.artifact_name,
            waiters = waiters.len(),
            success = result.is_ok(),
            "completing coalesced compile"
        );
        for waiter in waiters {
            waiter(result.clone());
        }
    }

    fn sweep(&self) -> usize {
        let evicted = {
            let mut state = self.lock();
            let expired = state.evict_expired(self.config.max_age);
            expired + state.evict_to_fit(&self.config)
        };
        if evicted > 0 {
            self.metrics.artifact_evictions.add(evicted as u64);
            debug!(evicted, "artifact cache sweep");
        }
        evicted
    }
}

fn spawn_sweeper(shared: Arc<Shared>, shutdown: Receiver<()>) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("spacehost-cache-sweep".to_string())
        .spawn(move || loop {
            match shutdown.recv_timeout(shared.config.sweep_interval()) {
                Err(RecvTimeoutError::Timeout) => {
                    shared.sweep();
                }
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            }
        })
}

/// Wraps any compiler with a bounded, herd-protected cache.
///
/// At most one inner `fetch_or_compile` is in flight per distinct
/// [`ArtifactKey`]; concurrent requests for that key share its result.
/// Failures are delivered to every waiter but are not cached.
pub struct CachedCompiler {
    inner: Arc<dyn Compiler>,
    shared: Arc<Shared>,
    shutdown: Option<Sender<()>>,
    sweeper: Option<JoinHandle<()>>,
}

impl CachedCompiler {
    /// Creates the cache and starts its sweeper thread.
    pub fn new(inner: Arc<dyn Compiler>, config: CacheConfig, metrics: Arc<Metrics>) -> HostResult<Self> {
        let shared = Arc::new(Shared {
            config,
            state: Mutex::new(CacheState::default()),
            metrics,
        });
        let (shutdown_tx, shutdown_rx) = bounded::<()>(1);
        let sweeper = spawn_sweeper(Arc::clone(&shared), shutdown_rx)
            .map_err(|e| HostError::internal(format!("spawn cache sweeper: {e}")))?;
        Ok(Self {
            inner,
            shared,
            shutdown: Some(shutdown_tx),
            sweeper: Some(sweeper),
        })
    }

    /// Runs one sweep immediately, returning the number of evicted entries.
    pub fn sweep_now(&self) -> usize {
        self.shared.sweep()
    }

    /// Current occupancy.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let state = self.shared.lock();
        CacheStats {
            entries: state.ready,
            bytes: state.bytes,
            pending: state.slots.len() - state.ready,
        }
    }
}

impl Compiler for CachedCompiler {
    fn fetch_or_compile(&self, request: CompileRequest, done: Callback<CompileResult>) {
        let key = request.key();
        let mut state = self.shared.lock();
        let tick = state.next_tick();

        if let Some(slot) = state.slots.get_mut(&key) {
            match slot {
                Slot::Ready(entry) if entry.inserted_at.elapsed() <= self.shared.config.max_age => {
                    entry.last_used = tick;
                    let artifact = Arc::clone(&entry.artifact);
                    drop(state);
                    debug!(artifact = %key.artifact_name, "artifact cache hit");
                    done(Ok(artifact));
                    return;
                }
                Slot::Pending(waiters) => {
                    waiters.push(done);
                    debug!(artifact = %key.artifact_name, waiters = waiters.len(), "joined in-flight compile");
                    return;
                }
                Slot::Ready(_) => {}
            }
        }

        // Absent or expired: this caller leads the compile.
        state.remove_ready(&key);
        state.slots.insert(key.clone(), Slot::Pending(vec![done]));
        drop(state);

        let shared = Arc::clone(&self.shared);
        self.inner
            .fetch_or_compile(request, Box::new(move |result| shared.complete(key, result)));
    }
}

impl Drop for CachedCompiler {
    fn drop(&mut self) {
        drop(self.shutdown.take());
        if let Some(handle) = self.sweeper.take() {
            let _ = handle.join();
        }
    }
}
