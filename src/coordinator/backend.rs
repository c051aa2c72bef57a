//! Persistence backends for the committed config
//!
//! A backend stores one versioned document and enforces compare-and-swap on
//! its version, so writers in other processes sharing the same backend
//! conflict exactly like local ones.

use crate::common::{Error, Result};
use crate::coordinator::store::VersionStamp;
use crate::model::ConfigSnapshot;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// A committed config and its version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredConfig {
    pub version: VersionStamp,
    pub config: ConfigSnapshot,
}

impl Default for StoredConfig {
    fn default() -> Self {
        Self {
            version: VersionStamp::INITIAL,
            config: ConfigSnapshot::default(),
        }
    }
}

/// Trait for config persistence backends
pub trait ConfigBackend: Send + Sync {
    /// Load the stored document, `None` if nothing was ever written
    fn load(&self) -> Result<Option<StoredConfig>>;

    /// Store `next` iff the stored version equals `expected`.
    ///
    /// An empty backend is at [`VersionStamp::INITIAL`].
    fn compare_and_swap(&self, expected: VersionStamp, next: &StoredConfig) -> Result<()>;

    fn name(&self) -> &'static str;
}

fn check_version(expected: VersionStamp, stored: Option<&StoredConfig>) -> Result<()> {
    let actual = stored.map(|s| s.version).unwrap_or(VersionStamp::INITIAL);
    if actual != expected {
        return Err(Error::Conflict { expected, actual });
    }
    Ok(())
}

/// In-memory backend (default)
#[derive(Default)]
pub struct MemoryBackend {
    doc: Mutex<Option<StoredConfig>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_initial(config: ConfigSnapshot) -> Self {
        Self {
            doc: Mutex::new(Some(StoredConfig {
                version: VersionStamp::INITIAL.next(),
                config,
            })),
        }
    }
}

impl ConfigBackend for MemoryBackend {
    fn load(&self) -> Result<Option<StoredConfig>> {
        Ok(self.doc.lock().clone())
    }

    fn compare_and_swap(&self, expected: VersionStamp, next: &StoredConfig) -> Result<()> {
        let mut doc = self.doc.lock();
        check_version(expected, doc.as_ref())?;
        *doc = Some(next.clone());
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

/// JSON file backend
///
/// Writes go to a sibling temp file that is renamed over the target, so a
/// reader never sees a half-written document. The version check and the
/// rename are serialized within this process only.
pub struct FileBackend {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileBackend {
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        Ok(Self {
            path,
            write_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Result<Option<StoredConfig>> {
        match fs::read(&self.path) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

impl ConfigBackend for FileBackend {
    fn load(&self) -> Result<Option<StoredConfig>> {
        self.read()
    }

    fn compare_and_swap(&self, expected: VersionStamp, next: &StoredConfig) -> Result<()> {
        let _guard = self.write_lock.lock();
        check_version(expected, self.read()?.as_ref())?;

        let tmp = self.path.with_extension("tmp");
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(&serde_json::to_vec_pretty(next)?)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "file"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::IntKey;
    use tempfile::tempdir;

    fn doc(version: u64, port: i64) -> StoredConfig {
        StoredConfig {
            version: VersionStamp::new(version),
            config: ConfigSnapshot::default().with_int(IntKey::ClientPort, port),
        }
    }

    #[test]
    fn test_memory_backend_cas() {
        let backend = MemoryBackend::new();
        assert!(backend.load().unwrap().is_none());

        backend.compare_and_swap(VersionStamp::INITIAL, &doc(1, 2181)).unwrap();
        let err = backend
            .compare_and_swap(VersionStamp::INITIAL, &doc(1, 9999))
            .unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(backend.load().unwrap().unwrap(), doc(1, 2181));
    }

    #[test]
    fn test_file_backend_persists() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("state.json");

        {
            let backend = FileBackend::new(&path).unwrap();
            assert!(backend.load().unwrap().is_none());
            backend.compare_and_swap(VersionStamp::INITIAL, &doc(1, 2181)).unwrap();
            backend.compare_and_swap(VersionStamp::new(1), &doc(2, 2182)).unwrap();
        }

        let reopened = FileBackend::new(&path).unwrap();
        assert_eq!(reopened.load().unwrap().unwrap(), doc(2, 2182));
        let err = reopened
            .compare_and_swap(VersionStamp::new(1), &doc(2, 9999))
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Conflict { expected, actual } if expected == VersionStamp::new(1) && actual == VersionStamp::new(2)
        ));
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn test_file_backend_rejects_garbage() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, b"not json").unwrap();
        let backend = FileBackend::new(&path).unwrap();
        assert!(matches!(backend.load(), Err(Error::Serde(_))));
    }
}
