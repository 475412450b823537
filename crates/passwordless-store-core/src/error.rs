// Typed failure taxonomy for the storage contract.
//
// Each operation family gets its own closed enum so call sites can match
// exhaustively on exactly the failures that operation can produce. Expected
// failures (duplicate/unknown/invalid) are values, never panics, and are
// never swallowed inside the store.

use thiserror::Error;

/// Engine-level failure: the underlying store could not execute the
/// operation at all. The in-memory engine never produces one; SQL-backed
/// engines surface query and connection problems here.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage query failed: {0}")]
    Query(String),

    #[error("storage connection failed: {0}")]
    Connection(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Failures of `create_user`.
#[derive(Debug, Error)]
pub enum CreateUserError {
    /// Both email and phone number were `None`.
    #[error("either email or phone number must be provided")]
    InvalidInput,

    #[error("user id already exists: {user_id}")]
    DuplicateUserId { user_id: String },

    #[error("email already in use: {email}")]
    DuplicateEmail { email: String },

    #[error("phone number already in use: {phone_number}")]
    DuplicatePhoneNumber { phone_number: String },

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Failures of `update_user_email`.
#[derive(Debug, Error)]
pub enum UpdateUserEmailError {
    #[error("unknown user id: {user_id}")]
    UnknownUserId { user_id: String },

    #[error("email already in use: {email}")]
    DuplicateEmail { email: String },

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Failures of `update_user_phone_number`.
#[derive(Debug, Error)]
pub enum UpdateUserPhoneNumberError {
    #[error("unknown user id: {user_id}")]
    UnknownUserId { user_id: String },

    #[error("phone number already in use: {phone_number}")]
    DuplicatePhoneNumber { phone_number: String },

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Failures of `create_device_with_code`.
#[derive(Debug, Error)]
pub enum CreateDeviceError {
    /// Exactly one of email/phone number must be set at device creation.
    #[error("exactly one of email or phone number must be provided")]
    InvalidInput,

    #[error("device id hash already exists: {device_id_hash}")]
    DuplicateDeviceIdHash { device_id_hash: String },

    #[error("code id already exists: {code_id}")]
    DuplicateCodeId { code_id: String },

    #[error("link code hash already exists")]
    DuplicateLinkCodeHash,

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Failures of `create_code`.
#[derive(Debug, Error)]
pub enum CreateCodeError {
    #[error("unknown device id hash: {device_id_hash}")]
    UnknownDeviceIdHash { device_id_hash: String },

    #[error("code id already exists: {code_id}")]
    DuplicateCodeId { code_id: String },

    #[error("link code hash already exists")]
    DuplicateLinkCodeHash,

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Failures of `commit_transaction`.
///
/// `Conflict` is the races-fail-closed path: a staged write lost an
/// authoritative uniqueness re-check against state committed by another
/// transaction after the staging call succeeded. Nothing was applied.
#[derive(Debug, Error)]
pub enum CommitError {
    #[error("uniqueness conflict on commit: {dimension} = {value}")]
    Conflict { dimension: &'static str, value: String },

    #[error(transparent)]
    Storage(#[from] StorageError),
}
