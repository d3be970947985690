//! External artifact stores.
//!
//! An [`ArtifactStore`] persists compiled artifacts by name so that a fresh
//! process (or a peer host) can skip recompiling. Artifacts are stored in
//! their packed form (see [`crate::artifact::codec`]).

mod fs;
mod memory;

pub use fs::FsArtifactStore;
pub use memory::MemoryArtifactStore;

use crate::artifact::CompiledArtifact;
use crate::error::StoreError;

/// Name-addressed persistence for compiled artifacts.
///
/// Artifact names are content addressed, so a stored artifact never goes
/// stale: `put` of an existing name may simply overwrite it.
pub trait ArtifactStore: Send + Sync {
    /// Looks up an artifact. A stored entry that fails to decode is a miss.
    fn get(&self, artifact_name: &str) -> Result<Option<CompiledArtifact>, StoreError>;

    /// Persists an artifact under its name.
    fn put(&self, artifact: &CompiledArtifact) -> Result<(), StoreError>;
}
