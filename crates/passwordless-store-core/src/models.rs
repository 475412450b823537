// Storage models for the passwordless login flow.
//
// A Device is one login attempt scoped to an email or a phone number,
// identified by a hash of a client-held secret. Codes are the OTP/magic-link
// tokens issued against a device. Users are the durable identities that a
// successful code consumption resolves into. All hashes are opaque strings
// produced by the caller; this crate never derives them.

use serde::{Deserialize, Serialize};

/// Tenant/app scoping identifier.
///
/// Opaque to the store: it is an extra equality dimension on every key and
/// uniqueness check, isolating independent customer environments. The
/// default tenant is `"public"`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(String);

impl TenantId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TenantId {
    fn default() -> Self {
        Self("public".to_string())
    }
}

impl std::fmt::Display for TenantId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One passwordless identity fact attached to a user.
///
/// At creation exactly one of `email`/`phone_number` is set; later scoped
/// updates may set both or clear one, but never both at once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginMethod {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
    /// Caller-supplied creation timestamp, unix milliseconds.
    pub time_joined: i64,
}

/// A durable user identity.
///
/// `login_methods` is an ordered sequence; this core always stores exactly
/// one passwordless method per user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    pub user_id: String,
    pub login_methods: Vec<LoginMethod>,
}

impl UserRecord {
    pub fn new(
        user_id: impl Into<String>,
        email: Option<String>,
        phone_number: Option<String>,
        time_joined: i64,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            login_methods: vec![LoginMethod {
                email,
                phone_number,
                time_joined,
            }],
        }
    }

    /// The user's single passwordless login method.
    pub fn login_method(&self) -> &LoginMethod {
        &self.login_methods[0]
    }

    pub fn login_method_mut(&mut self) -> &mut LoginMethod {
        &mut self.login_methods[0]
    }
}

/// One login attempt.
///
/// `device_id_hash` is the unique key, a caller-side hash of the device
/// secret. `link_code_salt` is stored verbatim so the caller can re-derive
/// per-code link hashes; the store never interprets it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceRecord {
    pub device_id_hash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
    pub link_code_salt: String,
}

/// One OTP/magic-link token issued against a device.
///
/// `link_code_hash` is unique tenant-wide, not just per device: it is the
/// value a link click resolves against, so a collision anywhere must fail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeRecord {
    pub id: String,
    pub device_id_hash: String,
    pub link_code_hash: String,
    /// Unix milliseconds.
    pub created_at: i64,
}
