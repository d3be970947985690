//! Directory-backed artifact store.
//!
//! Each artifact lives in `<dir>/<artifact_name>.bin`. Writes go to a
//! uniquely named temporary file that is fsynced and renamed into place, so
//! concurrent writers of the same (content-addressed) name never expose a
//! partial file.

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use uuid::Uuid;

use crate::artifact::{pack, unpack, CompiledArtifact};
use crate::error::StoreError;

use super::ArtifactStore;

const EXTENSION: &str = "bin";

/// Stores packed artifacts as files in one directory.
#[derive(Debug, Clone)]
pub struct FsArtifactStore {
    dir: PathBuf,
}

impl FsArtifactStore {
    /// Opens (creating if needed) the store directory.
    ///
    /// Temporary files left behind by an interrupted write are removed.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            let is_temp = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.contains(".tmp."));
            if is_temp {
                debug!(path = %path.display(), "removing stale temporary artifact");
                let _ = fs::remove_file(&path);
            }
        }
        Ok(Self { dir })
    }

    /// Store directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, artifact_name: &str) -> Result<PathBuf, StoreError> {
        let valid = !artifact_name.is_empty()
            && artifact_name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(StoreError::Backend(format!(
                "invalid artifact name '{artifact_name}'"
            )));
        }
        Ok(self.dir.join(format!("{artifact_name}.{EXTENSION}")))
    }
}

impl ArtifactStore for FsArtifactStore {
    fn get(&self, artifact_name: &str) -> Result<Option<CompiledArtifact>, StoreError> {
        let path = self.path_for(artifact_name)?;
        let mut file = match File::open(&path) {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)?;
        let artifact = unpack(&bytes);
        if artifact.is_none() {
            warn!(path = %path.display(), "stored artifact failed to decode; treating as missing");
        }
        Ok(artifact)
    }

    fn put(&self, artifact: &CompiledArtifact) -> Result<(), StoreError> {
        let final_path = self.path_for(artifact.artifact_name())?;
        let temp_path = final_path.with_extension(format!("{EXTENSION}.tmp.{}", Uuid::new_v4()));

        let write = || -> std::io::Result<()> {
            let mut file = OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&temp_path)?;
            file.write_all(&pack(artifact))?;
            file.sync_all()?;
            fs::rename(&temp_path, &final_path)
        };

        if let Err(err) = write() {
            let _ = fs::remove_file(&temp_path);
            return Err(err.into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use tempfile::TempDir;

    use super::*;

    fn artifact(name: &str) -> CompiledArtifact {
        let mut blobs = BTreeMap::new();
        blobs.insert("Main.class".to_string(), vec![0xCA, 0xFE, 0xBA, 0xBE]);
        CompiledArtifact::new("acme", name, "{}", blobs)
    }

    #[test]
    fn test_survives_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let store = FsArtifactStore::open(dir.path()).unwrap();
            store.put(&artifact("acme_9f")).unwrap();
        }
        let store = FsArtifactStore::open(dir.path()).unwrap();
        assert_eq!(store.get("acme_9f").unwrap(), Some(artifact("acme_9f")));
        assert!(dir.path().join("acme_9f.bin").exists());
    }

    #[test]
    fn test_missing_and_corrupt_files_are_misses() {
        let dir = TempDir::new().unwrap();
        let store = FsArtifactStore::open(dir.path()).unwrap();
        assert!(store.get("nope").unwrap().is_none());

        fs::write(dir.path().join("broken.bin"), b"not an artifact").unwrap();
        assert!(store.get("broken").unwrap().is_none());
    }

    #[test]
    fn test_rejects_names_that_escape_the_directory() {
        let dir = TempDir::new().unwrap();
        let store = FsArtifactStore::open(dir.path()).unwrap();
        assert!(matches!(store.get("../etc/passwd"), Err(StoreError::Backend(_))));
        assert!(matches!(store.put(&artifact("a/b")), Err(StoreError::Backend(_))));
    }

    #[test]
    fn test_open_removes_stale_temporaries() {
        let dir = TempDir::new().unwrap();
        let stale = dir.path().join("acme_1.bin.tmp.1234");
        fs::write(&stale, b"partial").unwrap();
        FsArtifactStore::open(dir.path()).unwrap();
        assert!(!stale.exists());
    }
}
