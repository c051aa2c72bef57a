//! Values derived from the committed config, recomputed when its stamp moves

use crate::coordinator::store::{ConfigStore, VersionStamp};
use crate::model::ConfigSnapshot;
use parking_lot::Mutex;
use std::sync::Arc;

pub struct StampedCache<T> {
    slot: Mutex<Option<(VersionStamp, Arc<T>)>>,
    derive: fn(&ConfigSnapshot) -> T,
}

impl<T> StampedCache<T> {
    pub fn new(derive: fn(&ConfigSnapshot) -> T) -> Self {
        Self {
            slot: Mutex::new(None),
            derive,
        }
    }

    /// Cached value for the store's current config
    pub fn get(&self, store: &ConfigStore) -> Arc<T> {
        let committed = store.committed();
        let mut slot = self.slot.lock();
        match slot.as_ref() {
            Some((stamp, value)) if *stamp == committed.stamp => value.clone(),
            _ => {
                let value = Arc::new((self.derive)(&committed.snapshot));
                *slot = Some((committed.stamp, value.clone()));
                value
            }
        }
    }

    pub fn invalidate(&self) {
        *self.slot.lock() = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::backend::MemoryBackend;
    use crate::model::{ServerList, StringKey};

    #[test]
    fn test_recomputes_after_update() {
        let store = ConfigStore::open(Arc::new(MemoryBackend::with_initial(
            ConfigSnapshot::default().with_string(StringKey::ServersSpec, "1:zk-a"),
        )))
        .unwrap();
        let cache = StampedCache::new(ConfigSnapshot::servers);

        let first = cache.get(&store);
        assert_eq!(first.hostnames(), vec!["zk-a"]);
        assert!(Arc::ptr_eq(&first, &cache.get(&store)));

        let (base, stamp) = store.get_config();
        store
            .update_config(base.with_string(StringKey::ServersSpec, "1:zk-a,2:zk-b"), stamp)
            .unwrap();

        let second: Arc<ServerList> = cache.get(&store);
        assert_eq!(second.hostnames(), vec!["zk-a", "zk-b"]);
        assert_eq!(first.hostnames(), vec!["zk-a"]);
    }
}
