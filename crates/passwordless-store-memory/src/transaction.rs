// Transaction state: held device locks plus an overlay of staged writes.
//
// Nothing in here touches the shared tables. Reads inside the transaction
// merge this overlay over the base state (read-your-writes); commit applies
// the overlay under the global table lock after an authoritative uniqueness
// re-check. Dropping the transaction releases its locks and discards the
// overlay, which makes rollback the default on every exit path.

use std::collections::{BTreeSet, HashMap};

use tokio::sync::OwnedMutexGuard;

use passwordless_store_core::{TenantId, UserRecord};

use crate::lock::LockKey;

/// An open transaction against a [`MemoryPasswordlessStore`].
///
/// Obtained from `begin_transaction`; consumed by `commit_transaction` or
/// `rollback_transaction`, so a finished transaction cannot be reused.
///
/// [`MemoryPasswordlessStore`]: crate::MemoryPasswordlessStore
pub struct StoreTransaction {
    /// Exclusive device locks held by this transaction, released together
    /// at transaction end.
    pub(crate) locks: HashMap<LockKey, OwnedMutexGuard<()>>,
    /// Updated user records staged for commit, keyed by (tenant, user id).
    pub(crate) staged_users: HashMap<(TenantId, String), UserRecord>,
    /// Base-table copy of each staged user as of its first staging call.
    /// Commit refuses to apply over a row that no longer matches this copy.
    pub(crate) base_users: HashMap<(TenantId, String), UserRecord>,
    /// Devices staged for cascading deletion. The cascade over owned codes
    /// is resolved at commit time against the then-current code set.
    pub(crate) staged_device_deletes: BTreeSet<LockKey>,
}

impl StoreTransaction {
    pub(crate) fn new() -> Self {
        Self {
            locks: HashMap::new(),
            staged_users: HashMap::new(),
            base_users: HashMap::new(),
            staged_device_deletes: BTreeSet::new(),
        }
    }

    pub(crate) fn holds_lock(&self, key: &LockKey) -> bool {
        self.locks.contains_key(key)
    }

    pub(crate) fn is_device_staged_deleted(&self, tenant: &TenantId, device_id_hash: &str) -> bool {
        self.staged_device_deletes
            .contains(&(tenant.clone(), device_id_hash.to_string()))
    }

    /// The user as this transaction sees it: staged copy if present.
    pub(crate) fn staged_user(&self, tenant: &TenantId, user_id: &str) -> Option<&UserRecord> {
        self.staged_users.get(&(tenant.clone(), user_id.to_string()))
    }

    pub(crate) fn stage_user(&mut self, tenant: &TenantId, record: UserRecord) {
        self.staged_users
            .insert((tenant.clone(), record.user_id.clone()), record);
    }

    /// Remember the base-table copy of a user the first time this
    /// transaction stages it. Later stagings keep the original copy.
    pub(crate) fn record_user_base(&mut self, tenant: &TenantId, record: &UserRecord) {
        self.base_users
            .entry((tenant.clone(), record.user_id.clone()))
            .or_insert_with(|| record.clone());
    }

    pub(crate) fn user_base(&self, tenant: &TenantId, user_id: &str) -> Option<&UserRecord> {
        self.base_users.get(&(tenant.clone(), user_id.to_string()))
    }

    pub(crate) fn stage_device_delete(&mut self, tenant: &TenantId, device_id_hash: &str) {
        self.staged_device_deletes
            .insert((tenant.clone(), device_id_hash.to_string()));
    }

    /// Whether any other user staged in this transaction holds `email`.
    pub(crate) fn staged_email_held_by_other(
        &self,
        tenant: &TenantId,
        user_id: &str,
        email: &str,
    ) -> bool {
        self.staged_users.iter().any(|((t, id), record)| {
            t == tenant
                && id != user_id
                && record.login_method().email.as_deref() == Some(email)
        })
    }

    /// Whether any other user staged in this transaction holds `phone_number`.
    pub(crate) fn staged_phone_held_by_other(
        &self,
        tenant: &TenantId,
        user_id: &str,
        phone_number: &str,
    ) -> bool {
        self.staged_users.iter().any(|((t, id), record)| {
            t == tenant
                && id != user_id
                && record.login_method().phone_number.as_deref() == Some(phone_number)
        })
    }
}

impl std::fmt::Debug for StoreTransaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreTransaction")
            .field("locked_devices", &self.locks.len())
            .field("staged_users", &self.staged_users.len())
            .field("staged_device_deletes", &self.staged_device_deletes.len())
            .finish()
    }
}
