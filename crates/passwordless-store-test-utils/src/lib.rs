// passwordless-store-test-utils: fixture generators for store tests.
//
// Hashes are 32 random bytes, base64url-encoded, the same shape real
// callers produce; code and user ids are UUIDv4.

use base64::engine::general_purpose::URL_SAFE;
use base64::Engine;
use rand::RngCore;

use passwordless_store_core::CodeRecord;

/// A base64url-encoded 32-byte random value, the shape of device id hashes
/// and link code hashes.
pub fn random_hash() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE.encode(bytes)
}

pub fn random_user_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// A fresh code against a fresh device.
pub fn random_code_info() -> CodeRecord {
    random_code_info_for_device(&random_hash())
}

/// A fresh code against an existing device.
pub fn random_code_info_for_device(device_id_hash: &str) -> CodeRecord {
    CodeRecord {
        id: uuid::Uuid::new_v4().to_string(),
        device_id_hash: device_id_hash.to_string(),
        link_code_hash: random_hash(),
        created_at: chrono::Utc::now().timestamp_millis(),
    }
}
