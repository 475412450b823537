// The passwordless storage contract.
//
// Every backend (memory, SQL) implements this trait. Multi-step operations
// run against an explicit transaction handle obtained from
// `begin_transaction`; commit and rollback consume the handle, so using a
// finished transaction is a compile error rather than a runtime fault.

use async_trait::async_trait;

use crate::error::{
    CommitError, CreateCodeError, CreateDeviceError, CreateUserError, StorageError,
    UpdateUserEmailError, UpdateUserPhoneNumberError,
};
use crate::models::{CodeRecord, DeviceRecord, TenantId, UserRecord};

/// Storage contract for passwordless devices, codes and user identities.
///
/// Locking discipline: operations that read a device's state and then
/// mutate something dependent on it (`get_device_for_update`,
/// `delete_device`, the bulk deletes) take an exclusive per-device lock
/// held until the enclosing transaction commits or rolls back. There is a
/// single lock mode: transactional reads and deletes block each other
/// symmetrically. Non-transactional lookups never block on these locks.
///
/// Deadlock avoidance across transactions is the caller's responsibility
/// (consistent acquisition ordering); re-locking a device already held by
/// the same transaction is always a no-op.
#[async_trait]
pub trait PasswordlessStorage: Send + Sync {
    /// Transaction handle. Locks and staged writes live exactly as long as
    /// the handle does; dropping it without committing rolls back.
    type Transaction: Send;

    // ─── Transactions ────────────────────────────────────────────────

    /// Begin a transaction. Never blocks.
    async fn begin_transaction(&self) -> Result<Self::Transaction, StorageError>;

    /// Commit: re-verify that every staged user row is unchanged since this
    /// transaction first read it and that every staged uniqueness dimension
    /// is free, then apply all staged writes atomically and release all
    /// locks. On `CommitError::Conflict` nothing was applied.
    async fn commit_transaction(&self, tx: Self::Transaction) -> Result<(), CommitError>;

    /// Discard staged writes and release all locks.
    async fn rollback_transaction(&self, tx: Self::Transaction) -> Result<(), StorageError>;

    // ─── Identity store ──────────────────────────────────────────────

    /// Create a user with one passwordless login method. At least one of
    /// `email`/`phone_number` must be provided. All-or-nothing: on any
    /// failure no user is persisted.
    async fn create_user(
        &self,
        tenant: &TenantId,
        user_id: &str,
        email: Option<&str>,
        phone_number: Option<&str>,
        time_joined: i64,
    ) -> Result<UserRecord, CreateUserError>;

    /// Absence is a normal outcome, not an error.
    async fn get_user_by_id(
        &self,
        tenant: &TenantId,
        user_id: &str,
    ) -> Result<Option<UserRecord>, StorageError>;

    /// Snapshot read; ordering is stable within a snapshot.
    async fn list_users_by_email(
        &self,
        tenant: &TenantId,
        email: &str,
    ) -> Result<Vec<UserRecord>, StorageError>;

    /// Snapshot read; ordering is stable within a snapshot.
    async fn list_users_by_phone_number(
        &self,
        tenant: &TenantId,
        phone_number: &str,
    ) -> Result<Vec<UserRecord>, StorageError>;

    /// Stage an email update for the user. `None` clears the field. On
    /// failure the stored record is unchanged and an identical retry fails
    /// identically. Staged within the transaction: later reads and updates
    /// in the same transaction observe the new value.
    async fn update_user_email(
        &self,
        tx: &mut Self::Transaction,
        tenant: &TenantId,
        user_id: &str,
        email: Option<&str>,
    ) -> Result<(), UpdateUserEmailError>;

    /// Phone-number counterpart of [`update_user_email`].
    ///
    /// [`update_user_email`]: PasswordlessStorage::update_user_email
    async fn update_user_phone_number(
        &self,
        tx: &mut Self::Transaction,
        tenant: &TenantId,
        user_id: &str,
        phone_number: Option<&str>,
    ) -> Result<(), UpdateUserPhoneNumberError>;

    // ─── Device store ────────────────────────────────────────────────

    /// Create a device and its first code as one atomic unit. The device id
    /// hash is taken from `code.device_id_hash`. Exactly one of
    /// `email`/`phone_number` must be set. On any failure neither the
    /// device nor the code is persisted.
    async fn create_device_with_code(
        &self,
        tenant: &TenantId,
        email: Option<&str>,
        phone_number: Option<&str>,
        link_code_salt: &str,
        code: &CodeRecord,
    ) -> Result<DeviceRecord, CreateDeviceError>;

    /// Plain lookup, no locking.
    async fn get_device(
        &self,
        tenant: &TenantId,
        device_id_hash: &str,
    ) -> Result<Option<DeviceRecord>, StorageError>;

    /// Same lookup, but acquires the exclusive per-device lock for the rest
    /// of the transaction. Returns `None` without retaining a lock if the
    /// device does not exist.
    async fn get_device_for_update(
        &self,
        tx: &mut Self::Transaction,
        tenant: &TenantId,
        device_id_hash: &str,
    ) -> Result<Option<DeviceRecord>, StorageError>;

    /// Snapshot read, ordered by device id hash, no locking.
    async fn get_devices_by_email(
        &self,
        tenant: &TenantId,
        email: &str,
    ) -> Result<Vec<DeviceRecord>, StorageError>;

    /// Snapshot read, ordered by device id hash, no locking.
    async fn get_devices_by_phone_number(
        &self,
        tenant: &TenantId,
        phone_number: &str,
    ) -> Result<Vec<DeviceRecord>, StorageError>;

    /// Lock the device (if not already held by this transaction) and stage
    /// a cascading delete of it and every code it owns. No-op if the device
    /// does not exist.
    async fn delete_device(
        &self,
        tx: &mut Self::Transaction,
        tenant: &TenantId,
        device_id_hash: &str,
    ) -> Result<(), StorageError>;

    /// Bulk cascading delete of every device under `email`. Locks the
    /// matching devices in device-id-hash order. Devices under other
    /// identifiers are untouched.
    async fn delete_devices_by_email(
        &self,
        tx: &mut Self::Transaction,
        tenant: &TenantId,
        email: &str,
    ) -> Result<(), StorageError>;

    /// Bulk cascading delete of every device under `phone_number`.
    async fn delete_devices_by_phone_number(
        &self,
        tx: &mut Self::Transaction,
        tenant: &TenantId,
        phone_number: &str,
    ) -> Result<(), StorageError>;

    // ─── Code store ──────────────────────────────────────────────────

    /// Create a code against an existing device. Fails with
    /// `UnknownDeviceIdHash` if the parent device does not exist; on any
    /// failure no code is persisted.
    async fn create_code(
        &self,
        tenant: &TenantId,
        code: &CodeRecord,
    ) -> Result<(), CreateCodeError>;

    async fn get_code(
        &self,
        tenant: &TenantId,
        code_id: &str,
    ) -> Result<Option<CodeRecord>, StorageError>;

    /// All codes owned by the device, ordered by code id. Empty if the
    /// device has no codes or does not exist.
    async fn get_codes_of_device(
        &self,
        tenant: &TenantId,
        device_id_hash: &str,
    ) -> Result<Vec<CodeRecord>, StorageError>;
}
