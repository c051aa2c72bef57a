//! Versioned config store with optimistic concurrency
//!
//! Readers load the committed `(snapshot, stamp)` pair through an atomic
//! pointer and never wait on writers. Every write goes through
//! [`WriteGuard::update`], which holds the store's single write lock.

use crate::common::{Error, Result};
use crate::coordinator::backend::{ConfigBackend, StoredConfig};
use crate::model::ConfigSnapshot;
use arc_swap::ArcSwap;
use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;

/// Version of a committed config. Strictly increases with every write.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct VersionStamp(u64);

impl VersionStamp {
    /// Stamp of a store that has never been written
    pub const INITIAL: VersionStamp = VersionStamp(0);

    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    pub const fn value(&self) -> u64 {
        self.0
    }

    pub const fn next(&self) -> Self {
        Self(self.0 + 1)
    }
}

impl std::fmt::Display for VersionStamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// The committed config
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Committed {
    pub snapshot: ConfigSnapshot,
    pub stamp: VersionStamp,
}

pub struct ConfigStore {
    committed: ArcSwap<Committed>,
    write_lock: Mutex<()>,
    backend: Arc<dyn ConfigBackend>,
    changes: watch::Sender<VersionStamp>,
}

impl ConfigStore {
    /// Open a store over a backend, loading whatever it holds
    pub fn open(backend: Arc<dyn ConfigBackend>) -> Result<Self> {
        let stored = backend.load()?.unwrap_or_default();
        tracing::info!(
            backend = backend.name(),
            stamp = %stored.version,
            "config store opened"
        );

        let (changes, _) = watch::channel(stored.version);
        Ok(Self {
            committed: ArcSwap::from_pointee(Committed {
                snapshot: stored.config,
                stamp: stored.version,
            }),
            write_lock: Mutex::new(()),
            backend,
            changes,
        })
    }

    /// Latest locally known config and its stamp
    pub fn get_config(&self) -> (ConfigSnapshot, VersionStamp) {
        let committed = self.committed.load();
        (committed.snapshot.clone(), committed.stamp)
    }

    /// Shared handle to the committed pair, without cloning the snapshot
    pub fn committed(&self) -> Arc<Committed> {
        self.committed.load_full()
    }

    pub fn stamp(&self) -> VersionStamp {
        self.committed.load().stamp
    }

    /// Replace the config iff the current stamp is `expected`
    pub fn update_config(
        &self,
        candidate: ConfigSnapshot,
        expected: VersionStamp,
    ) -> Result<VersionStamp> {
        self.lock_writes().update(candidate, expected)
    }

    /// Reload from the backend to pick up writes made by other processes.
    ///
    /// Returns true when the committed config changed.
    pub fn refresh(&self) -> Result<bool> {
        self.lock_writes().reload()
    }

    /// Notified with the new stamp after every committed change. Anything
    /// derived from an older snapshot is stale once this fires.
    pub fn subscribe(&self) -> watch::Receiver<VersionStamp> {
        self.changes.subscribe()
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Take the store's write lock.
    ///
    /// Rollout start/cancel hold this across their whole decision so they
    /// serialize with direct updates.
    pub fn lock_writes(&self) -> WriteGuard<'_> {
        WriteGuard {
            store: self,
            _guard: self.write_lock.lock(),
        }
    }

    fn publish(&self, stored: StoredConfig) {
        let stamp = stored.version;
        self.committed.store(Arc::new(Committed {
            snapshot: stored.config,
            stamp,
        }));
        self.changes.send_replace(stamp);
    }
}

/// Exclusive write access to a [`ConfigStore`]
pub struct WriteGuard<'a> {
    store: &'a ConfigStore,
    _guard: MutexGuard<'a, ()>,
}

impl WriteGuard<'_> {
    pub fn committed(&self) -> Arc<Committed> {
        self.store.committed()
    }

    /// Compare-and-swap. Nothing is applied on failure.
    pub fn update(&self, candidate: ConfigSnapshot, expected: VersionStamp) -> Result<VersionStamp> {
        let current = self.store.stamp();
        if current != expected {
            tracing::warn!(%expected, %current, "config update rejected: stale stamp");
            return Err(Error::Conflict {
                expected,
                actual: current,
            });
        }

        let next = StoredConfig {
            version: expected.next(),
            config: candidate,
        };
        if let Err(e) = self.store.backend.compare_and_swap(expected, &next) {
            if e.is_conflict() {
                tracing::warn!(%expected, "config update rejected by backend: {}", e);
                // Local view is behind the backend; catch up so callers re-fetch fresh state.
                if let Err(reload) = self.reload() {
                    tracing::warn!("reload after conflict failed: {}", reload);
                }
            }
            return Err(e);
        }

        let stamp = next.version;
        self.store.publish(next);
        tracing::info!(previous = %expected, %stamp, "config committed");
        Ok(stamp)
    }

    /// Fail with a conflict if the backend moved past the local stamp.
    ///
    /// On conflict the local view is caught up first, so a re-fetch sees the
    /// newer config.
    pub fn verify_baseline(&self) -> Result<VersionStamp> {
        let local = self.store.stamp();
        if self.reload()? {
            let actual = self.store.stamp();
            tracing::warn!(expected = %local, %actual, "backend moved past local config");
            return Err(Error::Conflict {
                expected: local,
                actual,
            });
        }
        Ok(local)
    }

    fn reload(&self) -> Result<bool> {
        let stored = self.store.backend.load()?.unwrap_or_default();
        if stored.version == self.store.stamp() {
            return Ok(false);
        }
        tracing::info!(
            previous = %self.store.stamp(),
            stamp = %stored.version,
            "config reloaded from backend"
        );
        self.store.publish(stored);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::backend::MemoryBackend;
    use crate::model::IntKey;

    fn store_with_port(port: i64) -> (Arc<MemoryBackend>, ConfigStore) {
        let backend = Arc::new(MemoryBackend::with_initial(
            ConfigSnapshot::default().with_int(IntKey::ClientPort, port),
        ));
        let store = ConfigStore::open(backend.clone()).unwrap();
        (backend, store)
    }

    #[test]
    fn test_open_empty_backend() {
        let store = ConfigStore::open(Arc::new(MemoryBackend::new())).unwrap();
        let (snapshot, stamp) = store.get_config();
        assert_eq!(stamp, VersionStamp::INITIAL);
        assert_eq!(snapshot, ConfigSnapshot::default());

        let stamp = store
            .update_config(snapshot.with_int(IntKey::ClientPort, 2181), stamp)
            .unwrap();
        assert_eq!(stamp, VersionStamp::new(1));
    }

    #[test]
    fn test_stale_stamp_conflicts() {
        let (_, store) = store_with_port(2181);
        let (base, v1) = store.get_config();

        let v2 = store
            .update_config(base.with_int(IntKey::ClientPort, 2182), v1)
            .unwrap();
        assert!(v2 > v1);

        let err = store
            .update_config(base.with_int(IntKey::ClientPort, 9999), v1)
            .unwrap_err();
        assert!(matches!(err, Error::Conflict { .. }));

        let (snapshot, stamp) = store.get_config();
        assert_eq!(snapshot.get_int(IntKey::ClientPort), 2182);
        assert_eq!(stamp, v2);
    }

    #[test]
    fn test_foreign_write_detected_and_refreshed() {
        let (backend, store) = store_with_port(2181);
        let (base, v1) = store.get_config();

        // Another process sharing the backend writes first
        backend
            .compare_and_swap(
                v1,
                &StoredConfig {
                    version: v1.next(),
                    config: base.with_int(IntKey::ClientPort, 3000),
                },
            )
            .unwrap();

        assert!(store.lock_writes().verify_baseline().is_err());
        let err = store
            .update_config(base.with_int(IntKey::ClientPort, 9999), v1)
            .unwrap_err();
        assert!(err.is_conflict());

        // The failed baseline check pulled in the foreign change
        let (snapshot, stamp) = store.get_config();
        assert_eq!(snapshot.get_int(IntKey::ClientPort), 3000);
        assert_eq!(stamp, v1.next());
        assert!(!store.refresh().unwrap());
    }

    #[test]
    fn test_failed_baseline_check_catches_up() {
        let (backend, store) = store_with_port(2181);
        let (base, v1) = store.get_config();
        let foreign = base.with_int(IntKey::ClientPort, 3000);
        backend
            .compare_and_swap(
                v1,
                &StoredConfig {
                    version: v1.next(),
                    config: foreign.clone(),
                },
            )
            .unwrap();

        let err = store.lock_writes().verify_baseline().unwrap_err();
        assert!(matches!(
            err,
            Error::Conflict { expected, actual } if expected == v1 && actual == v1.next()
        ));
        assert_eq!(store.get_config(), (foreign, v1.next()));
        assert_eq!(store.lock_writes().verify_baseline().unwrap(), v1.next());
    }

    #[test]
    fn test_subscribers_see_new_stamp() {
        let (_, store) = store_with_port(2181);
        let mut rx = store.subscribe();
        let (base, v1) = store.get_config();
        assert_eq!(*rx.borrow_and_update(), v1);

        let v2 = store.update_config(base, v1).unwrap();
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), v2);
    }
}
