//! In-memory artifact store for embedded use and tests.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::artifact::{pack, unpack, CompiledArtifact};
use crate::error::StoreError;

use super::ArtifactStore;

fn lock_err(context: &'static str) -> StoreError {
    StoreError::Backend(format!("poisoned lock: {context}"))
}

/// Keeps packed artifacts in a map, exercising the same codec as a real
/// backend.
#[derive(Debug, Default)]
pub struct MemoryArtifactStore {
    packed: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryArtifactStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored artifacts.
    pub fn len(&self) -> Result<usize, StoreError> {
        Ok(self.packed.read().map_err(|_| lock_err("artifacts"))?.len())
    }

    /// Returns true if nothing is stored.
    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len()? == 0)
    }

    /// Overwrites the raw bytes stored under `artifact_name`.
    pub fn put_raw(&self, artifact_name: impl Into<String>, bytes: Vec<u8>) -> Result<(), StoreError> {
        self.packed
            .write()
            .map_err(|_| lock_err("artifacts"))?
            .insert(artifact_name.into(), bytes);
        Ok(())
    }
}

impl ArtifactStore for MemoryArtifactStore {
    fn get(&self, artifact_name: &str) -> Result<Option<CompiledArtifact>, StoreError> {
        let packed = self.packed.read().map_err(|_| lock_err("artifacts"))?;
        Ok(packed.get(artifact_name).and_then(|bytes| unpack(bytes)))
    }

    fn put(&self, artifact: &CompiledArtifact) -> Result<(), StoreError> {
        self.put_raw(artifact.artifact_name(), pack(artifact))
    }
}
