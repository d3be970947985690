//! Compiled artifacts and their cache identity.

pub mod codec;

use std::collections::BTreeMap;

pub use codec::{pack, unpack, MAGIC};

/// Identity of a compile: equal keys always produce interchangeable
/// artifacts, so the cache may serve one for the other.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ArtifactKey {
    /// Owning space.
    pub space: String,
    /// Content-addressed artifact (class) name.
    pub artifact_name: String,
    /// Generated target source.
    pub source: String,
    /// Reflection metadata emitted alongside the source.
    pub reflection: String,
}

/// Output of a successful compile. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledArtifact {
    space: String,
    artifact_name: String,
    reflection: String,
    blobs: BTreeMap<String, Vec<u8>>,
    size_estimate: u64,
}

impl CompiledArtifact {
    /// Creates an artifact; the size estimate is derived from its contents.
    #[must_use]
    pub fn new(
        space: impl Into<String>,
        artifact_name: impl Into<String>,
        reflection: impl Into<String>,
        blobs: BTreeMap<String, Vec<u8>>,
    ) -> Self {
        let space = space.into();
        let artifact_name = artifact_name.into();
        let reflection = reflection.into();
        let blob_bytes: usize = blobs.iter().map(|(name, data)| name.len() + data.len()).sum();
        let size_estimate = (space.len() + artifact_name.len() + reflection.len() + blob_bytes) as u64;
        Self {
            space,
            artifact_name,
            reflection,
            blobs,
            size_estimate,
        }
    }

    /// Owning space.
    #[must_use]
    pub fn space(&self) -> &str {
        &self.space
    }

    /// Artifact (class) name.
    #[must_use]
    pub fn artifact_name(&self) -> &str {
        &self.artifact_name
    }

    /// Reflection metadata.
    #[must_use]
    pub fn reflection(&self) -> &str {
        &self.reflection
    }

    /// Named binary blobs, ordered by name.
    #[must_use]
    pub fn blobs(&self) -> &BTreeMap<String, Vec<u8>> {
        &self.blobs
    }

    /// Approximate resident size in bytes.
    #[must_use]
    pub const fn size_estimate(&self) -> u64 {
        self.size_estimate
    }
}
