//! Per-entity async locks
//!
//! Single writer per entity: every read-modify-write on an agent, user or
//! listing holds that entity's guard. Different entities proceed in parallel.

use std::hash::Hash;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Exclusive access to one entity until dropped
pub type EntityGuard = OwnedMutexGuard<()>;

pub struct EntityLocks<K> {
    locks: DashMap<K, Arc<Mutex<()>>>,
}

impl<K: Eq + Hash + Clone> EntityLocks<K> {
    pub fn new() -> Self {
        Self {
            locks: DashMap::new(),
        }
    }

    /// Wait for exclusive access to `key`
    pub async fn lock(&self, key: &K) -> EntityGuard {
        // the map shard guard must be released before awaiting
        let mutex = self.locks.entry(key.clone()).or_default().clone();
        mutex.lock_owned().await
    }

    /// Number of keys that have ever been locked
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

impl<K: Eq + Hash + Clone> Default for EntityLocks<K> {
    fn default() -> Self {
        Self::new()
    }
}
