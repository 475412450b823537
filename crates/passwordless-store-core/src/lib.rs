// passwordless-store-core: the storage contract for a passwordless login
// flow: devices (login attempts), codes (OTP/magic-link tokens) and user
// identities, with tenant-scoped uniqueness and explicit transactions.

pub mod error;
pub mod logger;
pub mod models;
pub mod options;
pub mod storage;

// Re-exports for convenience
pub use error::{
    CommitError, CreateCodeError, CreateDeviceError, CreateUserError, StorageError,
    UpdateUserEmailError, UpdateUserPhoneNumberError,
};
pub use logger::{LogHandler, LogLevel, LoggerConfig, StoreLogger};
pub use models::{CodeRecord, DeviceRecord, LoginMethod, TenantId, UserRecord};
pub use options::StorageOptions;
pub use storage::PasswordlessStorage;
