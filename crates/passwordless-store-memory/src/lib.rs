// passwordless-store-memory: in-memory engine for the passwordless
// storage contract, with per-device exclusive locking and buffered
// transactions.

mod lock;
mod store;
mod tables;
mod transaction;

pub use store::MemoryPasswordlessStore;
pub use transaction::StoreTransaction;
