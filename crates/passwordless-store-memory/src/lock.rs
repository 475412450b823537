// Per-device lock table.
//
// One exclusive async mutex per (tenant, device id hash). This is the
// explicit counterpart of a SELECT ... FOR UPDATE row lock: a transaction
// acquires the lock on first touch of a device and holds it until the
// transaction ends. There is no shared/read mode; transactional reads and
// deletes block each other symmetrically.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

use passwordless_store_core::TenantId;

/// Key of one lockable device row.
pub(crate) type LockKey = (TenantId, String);

/// Lock table shared by all transactions of one store.
#[derive(Debug, Default)]
pub(crate) struct DeviceLockManager {
    entries: Mutex<HashMap<LockKey, Arc<Mutex<()>>>>,
}

impl DeviceLockManager {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Acquire the exclusive lock for `key`, blocking the calling task
    /// until the current holder (if any) releases it at transaction end.
    pub(crate) async fn acquire(&self, key: LockKey) -> OwnedMutexGuard<()> {
        let entry = {
            let mut entries = self.entries.lock().await;
            entries
                .entry(key)
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        entry.lock_owned().await
    }

    /// Release one lock and prune its table entry if nobody else holds a
    /// handle to it. Handle clones only happen under the table mutex, so a
    /// strong count of 1 after dropping our guard means the entry is idle.
    pub(crate) async fn release(&self, key: &LockKey, guard: OwnedMutexGuard<()>) {
        drop(guard);
        let mut entries = self.entries.lock().await;
        if let Some(entry) = entries.get(key) {
            if Arc::strong_count(entry) == 1 {
                entries.remove(key);
            }
        }
    }

    /// Release every lock a finished transaction was holding.
    pub(crate) async fn release_all(
        &self,
        locks: HashMap<LockKey, OwnedMutexGuard<()>>,
    ) {
        for (key, guard) in locks {
            self.release(&key, guard).await;
        }
    }

    #[cfg(test)]
    pub(crate) async fn entry_count(&self) -> usize {
        self.entries.lock().await.len()
    }
}
