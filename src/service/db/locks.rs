//! Per-key write serialization.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Number of idle entries tolerated before the map is pruned.
const PRUNE_THRESHOLD: usize = 1024;

/// A set of named async locks, one per record key.
///
/// Holding the guard for a key makes the holder the only writer of that record; writers
/// of different keys never wait on each other.
#[derive(Default)]
pub(crate) struct KeyedLocks {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl KeyedLocks {
    /// Waits until the caller is the only holder of `key`.
    pub(crate) async fn lock(&self, key: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());

            if locks.len() > PRUNE_THRESHOLD {
                locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            }

            locks.entry(key.to_string()).or_default().clone()
        };

        lock.lock_owned().await
    }
}
