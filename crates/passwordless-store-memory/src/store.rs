// In-memory storage engine implementing the passwordless storage contract.
//
// Shared state is a single table set behind a tokio RwLock. Plain creates
// check every uniqueness dimension and insert under one write-lock scope,
// so they are trivially all-or-nothing. Transactional operations stage
// their writes in the transaction overlay and only touch the shared tables
// at commit, after re-verifying uniqueness against the then-current state.
//
// Device locks are acquired while no table lock is held, so a transaction
// blocked on a device lock never stalls readers.

use async_trait::async_trait;
use tokio::sync::RwLock;

use passwordless_store_core::{
    CodeRecord, CommitError, CreateCodeError, CreateDeviceError, CreateUserError, DeviceRecord,
    PasswordlessStorage, StorageError, StorageOptions, StoreLogger, TenantId,
    UpdateUserEmailError, UpdateUserPhoneNumberError, UserRecord,
};

use crate::lock::{DeviceLockManager, LockKey};
use crate::tables::Tables;
use crate::transaction::StoreTransaction;

/// In-memory passwordless store.
///
/// Data lives only as long as the store value; intended for tests and for
/// single-process deployments that do not need durability.
#[derive(Debug)]
pub struct MemoryPasswordlessStore {
    tables: RwLock<Tables>,
    locks: DeviceLockManager,
    logger: StoreLogger,
    default_tenant: TenantId,
}

impl Default for MemoryPasswordlessStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryPasswordlessStore {
    pub fn new() -> Self {
        Self::with_options(StorageOptions::default())
    }

    pub fn with_options(options: StorageOptions) -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            locks: DeviceLockManager::new(),
            logger: StoreLogger::new(options.logger),
            default_tenant: options.default_tenant,
        }
    }

    /// Tenant used by callers that do not manage tenants themselves.
    pub fn default_tenant(&self) -> &TenantId {
        &self.default_tenant
    }

    fn lock_key(tenant: &TenantId, device_id_hash: &str) -> LockKey {
        (tenant.clone(), device_id_hash.to_string())
    }

    /// Acquire the device lock for this transaction unless it already holds
    /// it, then stage a cascade delete if the device matches `predicate`.
    /// The lock is not retained when the device turns out to be absent.
    async fn lock_and_stage_delete(
        &self,
        tx: &mut StoreTransaction,
        tenant: &TenantId,
        device_id_hash: &str,
        predicate: impl Fn(&DeviceRecord) -> bool,
    ) {
        let key = Self::lock_key(tenant, device_id_hash);

        if tx.holds_lock(&key) {
            if tx.is_device_staged_deleted(tenant, device_id_hash) {
                return;
            }
            let matches = {
                let tables = self.tables.read().await;
                tables.device(tenant, device_id_hash).is_some_and(&predicate)
            };
            if matches {
                tx.stage_device_delete(tenant, device_id_hash);
            }
            return;
        }

        let guard = self.locks.acquire(key.clone()).await;
        let matches = {
            let tables = self.tables.read().await;
            tables.device(tenant, device_id_hash).is_some_and(&predicate)
        };
        if matches {
            tx.locks.insert(key, guard);
            tx.stage_device_delete(tenant, device_id_hash);
        } else {
            self.locks.release(&key, guard).await;
        }
    }

    /// Authoritative re-check and overlay application, run under the table
    /// write lock. Every staged user row must still match the base copy this
    /// transaction derived it from, and every staged uniqueness dimension
    /// must be free. Returns without applying anything on conflict.
    fn check_and_apply(
        tables: &mut Tables,
        tx: &StoreTransaction,
    ) -> Result<(), CommitError> {
        for (tenant, user_id) in tx.staged_users.keys() {
            let unchanged = tx
                .user_base(tenant, user_id)
                .is_some_and(|base| tables.user(tenant, user_id) == Some(base));
            if !unchanged {
                return Err(CommitError::Conflict {
                    dimension: "userId",
                    value: user_id.clone(),
                });
            }
        }

        let staged_keys: std::collections::HashSet<(&TenantId, &str)> = tx
            .staged_users
            .keys()
            .map(|(tenant, user_id)| (tenant, user_id.as_str()))
            .collect();

        for ((tenant, user_id), record) in &tx.staged_users {
            let method = record.login_method();
            if let Some(email) = &method.email {
                if let Some(owner) = tables.email_owner(tenant, email) {
                    if owner != user_id && !staged_keys.contains(&(tenant, owner)) {
                        return Err(CommitError::Conflict {
                            dimension: "email",
                            value: email.clone(),
                        });
                    }
                }
            }
            if let Some(phone) = &method.phone_number {
                if let Some(owner) = tables.phone_owner(tenant, phone) {
                    if owner != user_id && !staged_keys.contains(&(tenant, owner)) {
                        return Err(CommitError::Conflict {
                            dimension: "phoneNumber",
                            value: phone.clone(),
                        });
                    }
                }
            }
        }

        for ((tenant, _), record) in &tx.staged_users {
            tables.update_user(tenant, record.clone());
        }
        for (tenant, device_id_hash) in &tx.staged_device_deletes {
            tables.remove_device_cascade(tenant, device_id_hash);
        }
        Ok(())
    }
}

#[async_trait]
impl PasswordlessStorage for MemoryPasswordlessStore {
    type Transaction = StoreTransaction;

    // ─── Transactions ────────────────────────────────────────────────

    async fn begin_transaction(&self) -> Result<StoreTransaction, StorageError> {
        Ok(StoreTransaction::new())
    }

    async fn commit_transaction(&self, tx: StoreTransaction) -> Result<(), CommitError> {
        let result = {
            let mut tables = self.tables.write().await;
            Self::check_and_apply(&mut tables, &tx)
        };
        let StoreTransaction { locks, .. } = tx;
        self.locks.release_all(locks).await;

        match &result {
            Ok(()) => self.logger.debug("transaction committed"),
            Err(err) => self.logger.warn(&format!("transaction rolled back: {err}")),
        }
        result
    }

    async fn rollback_transaction(&self, tx: StoreTransaction) -> Result<(), StorageError> {
        let StoreTransaction { locks, .. } = tx;
        self.locks.release_all(locks).await;
        self.logger.debug("transaction rolled back");
        Ok(())
    }

    // ─── Identity store ──────────────────────────────────────────────

    async fn create_user(
        &self,
        tenant: &TenantId,
        user_id: &str,
        email: Option<&str>,
        phone_number: Option<&str>,
        time_joined: i64,
    ) -> Result<UserRecord, CreateUserError> {
        if email.is_none() && phone_number.is_none() {
            return Err(CreateUserError::InvalidInput);
        }

        let mut tables = self.tables.write().await;
        if tables.user(tenant, user_id).is_some() {
            return Err(CreateUserError::DuplicateUserId {
                user_id: user_id.to_string(),
            });
        }
        if let Some(email) = email {
            if tables.email_owner(tenant, email).is_some() {
                return Err(CreateUserError::DuplicateEmail {
                    email: email.to_string(),
                });
            }
        }
        if let Some(phone) = phone_number {
            if tables.phone_owner(tenant, phone).is_some() {
                return Err(CreateUserError::DuplicatePhoneNumber {
                    phone_number: phone.to_string(),
                });
            }
        }

        let record = UserRecord::new(
            user_id,
            email.map(str::to_string),
            phone_number.map(str::to_string),
            time_joined,
        );
        tables.insert_user(tenant, record.clone());
        self.logger
            .debug(&format!("created user {user_id} in tenant {tenant}"));
        Ok(record)
    }

    async fn get_user_by_id(
        &self,
        tenant: &TenantId,
        user_id: &str,
    ) -> Result<Option<UserRecord>, StorageError> {
        let tables = self.tables.read().await;
        Ok(tables.user(tenant, user_id).cloned())
    }

    async fn list_users_by_email(
        &self,
        tenant: &TenantId,
        email: &str,
    ) -> Result<Vec<UserRecord>, StorageError> {
        let tables = self.tables.read().await;
        let users = tables
            .email_owner(tenant, email)
            .map(str::to_string)
            .and_then(|owner| tables.user(tenant, &owner).cloned())
            .into_iter()
            .collect();
        Ok(users)
    }

    async fn list_users_by_phone_number(
        &self,
        tenant: &TenantId,
        phone_number: &str,
    ) -> Result<Vec<UserRecord>, StorageError> {
        let tables = self.tables.read().await;
        let users = tables
            .phone_owner(tenant, phone_number)
            .map(str::to_string)
            .and_then(|owner| tables.user(tenant, &owner).cloned())
            .into_iter()
            .collect();
        Ok(users)
    }

    async fn update_user_email(
        &self,
        tx: &mut StoreTransaction,
        tenant: &TenantId,
        user_id: &str,
        email: Option<&str>,
    ) -> Result<(), UpdateUserEmailError> {
        let mut record = match tx.staged_user(tenant, user_id) {
            Some(staged) => staged.clone(),
            None => {
                let Some(base) = self.tables.read().await.user(tenant, user_id).cloned() else {
                    return Err(UpdateUserEmailError::UnknownUserId {
                        user_id: user_id.to_string(),
                    });
                };
                tx.record_user_base(tenant, &base);
                base
            }
        };

        if let Some(new_email) = email {
            if tx.staged_email_held_by_other(tenant, user_id, new_email) {
                return Err(UpdateUserEmailError::DuplicateEmail {
                    email: new_email.to_string(),
                });
            }
            let tables = self.tables.read().await;
            if let Some(owner) = tables.email_owner(tenant, new_email) {
                // A base-table owner staged in this transaction may have
                // moved off the email already; the staged value wins.
                let still_held = owner != user_id
                    && tx.staged_user(tenant, owner).map_or(true, |staged| {
                        staged.login_method().email.as_deref() == Some(new_email)
                    });
                if still_held {
                    return Err(UpdateUserEmailError::DuplicateEmail {
                        email: new_email.to_string(),
                    });
                }
            }
        }

        record.login_method_mut().email = email.map(str::to_string);
        tx.stage_user(tenant, record);
        Ok(())
    }

    async fn update_user_phone_number(
        &self,
        tx: &mut StoreTransaction,
        tenant: &TenantId,
        user_id: &str,
        phone_number: Option<&str>,
    ) -> Result<(), UpdateUserPhoneNumberError> {
        let mut record = match tx.staged_user(tenant, user_id) {
            Some(staged) => staged.clone(),
            None => {
                let Some(base) = self.tables.read().await.user(tenant, user_id).cloned() else {
                    return Err(UpdateUserPhoneNumberError::UnknownUserId {
                        user_id: user_id.to_string(),
                    });
                };
                tx.record_user_base(tenant, &base);
                base
            }
        };

        if let Some(new_phone) = phone_number {
            if tx.staged_phone_held_by_other(tenant, user_id, new_phone) {
                return Err(UpdateUserPhoneNumberError::DuplicatePhoneNumber {
                    phone_number: new_phone.to_string(),
                });
            }
            let tables = self.tables.read().await;
            if let Some(owner) = tables.phone_owner(tenant, new_phone) {
                let still_held = owner != user_id
                    && tx.staged_user(tenant, owner).map_or(true, |staged| {
                        staged.login_method().phone_number.as_deref() == Some(new_phone)
                    });
                if still_held {
                    return Err(UpdateUserPhoneNumberError::DuplicatePhoneNumber {
                        phone_number: new_phone.to_string(),
                    });
                }
            }
        }

        record.login_method_mut().phone_number = phone_number.map(str::to_string);
        tx.stage_user(tenant, record);
        Ok(())
    }

    // ─── Device store ────────────────────────────────────────────────

    async fn create_device_with_code(
        &self,
        tenant: &TenantId,
        email: Option<&str>,
        phone_number: Option<&str>,
        link_code_salt: &str,
        code: &CodeRecord,
    ) -> Result<DeviceRecord, CreateDeviceError> {
        if email.is_some() == phone_number.is_some() {
            return Err(CreateDeviceError::InvalidInput);
        }

        let mut tables = self.tables.write().await;
        if tables.device(tenant, &code.device_id_hash).is_some() {
            return Err(CreateDeviceError::DuplicateDeviceIdHash {
                device_id_hash: code.device_id_hash.clone(),
            });
        }
        if tables.code(tenant, &code.id).is_some() {
            return Err(CreateDeviceError::DuplicateCodeId {
                code_id: code.id.clone(),
            });
        }
        if tables.link_code_hash_exists(tenant, &code.link_code_hash) {
            return Err(CreateDeviceError::DuplicateLinkCodeHash);
        }

        let device = DeviceRecord {
            device_id_hash: code.device_id_hash.clone(),
            email: email.map(str::to_string),
            phone_number: phone_number.map(str::to_string),
            link_code_salt: link_code_salt.to_string(),
        };
        tables.insert_device(tenant, device.clone());
        tables.insert_code(tenant, code.clone());
        self.logger.debug(&format!(
            "created device {} with code {} in tenant {tenant}",
            device.device_id_hash, code.id
        ));
        Ok(device)
    }

    async fn get_device(
        &self,
        tenant: &TenantId,
        device_id_hash: &str,
    ) -> Result<Option<DeviceRecord>, StorageError> {
        let tables = self.tables.read().await;
        Ok(tables.device(tenant, device_id_hash).cloned())
    }

    async fn get_device_for_update(
        &self,
        tx: &mut StoreTransaction,
        tenant: &TenantId,
        device_id_hash: &str,
    ) -> Result<Option<DeviceRecord>, StorageError> {
        let key = Self::lock_key(tenant, device_id_hash);

        if tx.holds_lock(&key) {
            if tx.is_device_staged_deleted(tenant, device_id_hash) {
                return Ok(None);
            }
            let tables = self.tables.read().await;
            return Ok(tables.device(tenant, device_id_hash).cloned());
        }

        // Absent devices are reported without retaining any lock.
        {
            let tables = self.tables.read().await;
            if tables.device(tenant, device_id_hash).is_none() {
                return Ok(None);
            }
        }

        let guard = self.locks.acquire(key.clone()).await;
        let device = {
            let tables = self.tables.read().await;
            tables.device(tenant, device_id_hash).cloned()
        };
        match device {
            Some(device) => {
                tx.locks.insert(key, guard);
                Ok(Some(device))
            }
            None => {
                // Deleted while we waited for the lock.
                self.locks.release(&key, guard).await;
                Ok(None)
            }
        }
    }

    async fn get_devices_by_email(
        &self,
        tenant: &TenantId,
        email: &str,
    ) -> Result<Vec<DeviceRecord>, StorageError> {
        let tables = self.tables.read().await;
        Ok(tables
            .devices_where(tenant, |device| device.email.as_deref() == Some(email))
            .cloned()
            .collect())
    }

    async fn get_devices_by_phone_number(
        &self,
        tenant: &TenantId,
        phone_number: &str,
    ) -> Result<Vec<DeviceRecord>, StorageError> {
        let tables = self.tables.read().await;
        Ok(tables
            .devices_where(tenant, |device| {
                device.phone_number.as_deref() == Some(phone_number)
            })
            .cloned()
            .collect())
    }

    async fn delete_device(
        &self,
        tx: &mut StoreTransaction,
        tenant: &TenantId,
        device_id_hash: &str,
    ) -> Result<(), StorageError> {
        self.lock_and_stage_delete(tx, tenant, device_id_hash, |_| true)
            .await;
        Ok(())
    }

    async fn delete_devices_by_email(
        &self,
        tx: &mut StoreTransaction,
        tenant: &TenantId,
        email: &str,
    ) -> Result<(), StorageError> {
        // The device set is fixed at call time; locks are taken in
        // device-id-hash order. A device that changed or disappeared while
        // we waited for its lock is skipped.
        let matching: Vec<String> = {
            let tables = self.tables.read().await;
            tables
                .devices_where(tenant, |device| device.email.as_deref() == Some(email))
                .map(|device| device.device_id_hash.clone())
                .collect()
        };
        for device_id_hash in matching {
            self.lock_and_stage_delete(tx, tenant, &device_id_hash, |device| {
                device.email.as_deref() == Some(email)
            })
            .await;
        }
        Ok(())
    }

    async fn delete_devices_by_phone_number(
        &self,
        tx: &mut StoreTransaction,
        tenant: &TenantId,
        phone_number: &str,
    ) -> Result<(), StorageError> {
        let matching: Vec<String> = {
            let tables = self.tables.read().await;
            tables
                .devices_where(tenant, |device| {
                    device.phone_number.as_deref() == Some(phone_number)
                })
                .map(|device| device.device_id_hash.clone())
                .collect()
        };
        for device_id_hash in matching {
            self.lock_and_stage_delete(tx, tenant, &device_id_hash, |device| {
                device.phone_number.as_deref() == Some(phone_number)
            })
            .await;
        }
        Ok(())
    }

    // ─── Code store ──────────────────────────────────────────────────

    async fn create_code(
        &self,
        tenant: &TenantId,
        code: &CodeRecord,
    ) -> Result<(), CreateCodeError> {
        let mut tables = self.tables.write().await;
        if tables.device(tenant, &code.device_id_hash).is_none() {
            return Err(CreateCodeError::UnknownDeviceIdHash {
                device_id_hash: code.device_id_hash.clone(),
            });
        }
        if tables.code(tenant, &code.id).is_some() {
            return Err(CreateCodeError::DuplicateCodeId {
                code_id: code.id.clone(),
            });
        }
        if tables.link_code_hash_exists(tenant, &code.link_code_hash) {
            return Err(CreateCodeError::DuplicateLinkCodeHash);
        }

        tables.insert_code(tenant, code.clone());
        self.logger.debug(&format!(
            "created code {} for device {} in tenant {tenant}",
            code.id, code.device_id_hash
        ));
        Ok(())
    }

    async fn get_code(
        &self,
        tenant: &TenantId,
        code_id: &str,
    ) -> Result<Option<CodeRecord>, StorageError> {
        let tables = self.tables.read().await;
        Ok(tables.code(tenant, code_id).cloned())
    }

    async fn get_codes_of_device(
        &self,
        tenant: &TenantId,
        device_id_hash: &str,
    ) -> Result<Vec<CodeRecord>, StorageError> {
        let tables = self.tables.read().await;
        Ok(tables.codes_of_device(tenant, device_id_hash))
    }
}
