//! Compiler capability.
//!
//! A [`Compiler`] turns generated source into a [`CompiledArtifact`],
//! delivering the result through a callback. Three implementations stack:
//!
//! ```text
//! CachedCompiler      bounded, herd-protected in-memory cache
//!   └─ ManagedCompiler  external store lookup + worker-pool offload
//!        └─ DirectCompiler  host toolchain on the calling thread
//! ```
//!
//! [`assemble`] builds that stack from a toolchain and a store.

mod cached;
mod direct;
mod managed;
mod pool;

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::artifact::{ArtifactKey, CompiledArtifact};
use crate::completion::Callback;
use crate::error::{CompileError, HostResult};
use crate::metrics::Metrics;
use crate::store::ArtifactStore;

pub use cached::{CacheConfig, CacheStats, CachedCompiler};
pub use direct::DirectCompiler;
pub use managed::{ManagedCompiler, ManagedConfig};

/// Outcome of a compile.
pub type CompileResult = Result<Arc<CompiledArtifact>, CompileError>;

/// One compile request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileRequest {
    /// Owning space.
    pub space: String,
    /// Content-addressed artifact (class) name.
    pub artifact_name: String,
    /// Generated target source.
    pub source: String,
    /// Reflection metadata emitted by the front end.
    pub reflection: String,
}

impl CompileRequest {
    /// Cache identity of this request.
    #[must_use]
    pub fn key(&self) -> ArtifactKey {
        ArtifactKey {
            space: self.space.clone(),
            artifact_name: self.artifact_name.clone(),
            source: self.source.clone(),
            reflection: self.reflection.clone(),
        }
    }
}

/// Fetches a compiled artifact, compiling it if necessary.
///
/// Implementations may complete `done` on the calling thread or on a thread
/// of their own; callers must not hold locks `done` needs.
pub trait Compiler: Send + Sync {
    /// Delivers the artifact for `request` to `done` exactly once.
    fn fetch_or_compile(&self, request: CompileRequest, done: Callback<CompileResult>);
}

/// The host toolchain that turns target source into binary blobs.
pub trait Toolchain: Send + Sync {
    /// Compiles `source`, returning named blobs or the toolchain's diagnostics.
    fn compile(&self, artifact_name: &str, source: &str) -> Result<BTreeMap<String, Vec<u8>>, Vec<String>>;
}

/// Configuration of the assembled compiler stack.
#[derive(Debug, Clone, Default)]
pub struct CompilerConfig {
    /// In-memory cache bounds and sweep cadence.
    pub cache: CacheConfig,
    /// Offload pool sizing.
    pub managed: ManagedConfig,
}

/// Builds `Cached(Managed(Direct(toolchain)))`.
pub fn assemble<T: Toolchain + 'static>(
    toolchain: T,
    store: Arc<dyn ArtifactStore>,
    config: &CompilerConfig,
    metrics: Arc<Metrics>,
) -> HostResult<Arc<dyn Compiler>> {
    let direct: Arc<dyn Compiler> = Arc::new(DirectCompiler::new(toolchain));
    let managed: Arc<dyn Compiler> = Arc::new(ManagedCompiler::new(
        direct,
        store,
        config.managed.clone(),
        Arc::clone(&metrics),
    )?);
    let cached = CachedCompiler::new(managed, config.cache.clone(), metrics)?;
    Ok(Arc::new(cached))
}
