// Table set for the in-memory engine.
//
// Primary tables are BTreeMaps keyed by (tenant, primary key), which makes
// snapshot reads naturally ordered and stable. Every secondary uniqueness
// dimension (user email, user phone number, code link hash) is its own
// index map maintained in lockstep with the primary table, so an
// insert-if-absent check against the index is authoritative.

use std::collections::{BTreeMap, HashMap};

use passwordless_store_core::{CodeRecord, DeviceRecord, TenantId, UserRecord};

#[derive(Debug, Default)]
pub(crate) struct Tables {
    users: BTreeMap<(TenantId, String), UserRecord>,
    users_by_email: HashMap<(TenantId, String), String>,
    users_by_phone: HashMap<(TenantId, String), String>,
    devices: BTreeMap<(TenantId, String), DeviceRecord>,
    codes: BTreeMap<(TenantId, String), CodeRecord>,
    codes_by_link_hash: HashMap<(TenantId, String), String>,
}

impl Tables {
    // ─── Users ───────────────────────────────────────────────────────

    pub(crate) fn user(&self, tenant: &TenantId, user_id: &str) -> Option<&UserRecord> {
        self.users.get(&(tenant.clone(), user_id.to_string()))
    }

    /// User id currently holding `email` in this tenant, if any.
    pub(crate) fn email_owner(&self, tenant: &TenantId, email: &str) -> Option<&str> {
        self.users_by_email
            .get(&(tenant.clone(), email.to_string()))
            .map(String::as_str)
    }

    /// User id currently holding `phone_number` in this tenant, if any.
    pub(crate) fn phone_owner(&self, tenant: &TenantId, phone_number: &str) -> Option<&str> {
        self.users_by_phone
            .get(&(tenant.clone(), phone_number.to_string()))
            .map(String::as_str)
    }

    pub(crate) fn insert_user(&mut self, tenant: &TenantId, record: UserRecord) {
        self.index_user(tenant, &record);
        self.users
            .insert((tenant.clone(), record.user_id.clone()), record);
    }

    /// Replace a user record, reindexing its email/phone dimensions. An old
    /// index entry is removed only while it still maps to this user: when a
    /// batch of updates moves an identifier between users, the new owner may
    /// already have been applied, and its entry must survive.
    pub(crate) fn update_user(&mut self, tenant: &TenantId, record: UserRecord) {
        let key = (tenant.clone(), record.user_id.clone());
        if let Some(old) = self.users.get(&key) {
            let method = old.login_method();
            if let Some(email) = &method.email {
                let index_key = (tenant.clone(), email.clone());
                if self.users_by_email.get(&index_key) == Some(&old.user_id) {
                    self.users_by_email.remove(&index_key);
                }
            }
            if let Some(phone) = &method.phone_number {
                let index_key = (tenant.clone(), phone.clone());
                if self.users_by_phone.get(&index_key) == Some(&old.user_id) {
                    self.users_by_phone.remove(&index_key);
                }
            }
        }
        self.index_user(tenant, &record);
        self.users.insert(key, record);
    }

    fn index_user(&mut self, tenant: &TenantId, record: &UserRecord) {
        let method = record.login_method();
        if let Some(email) = &method.email {
            self.users_by_email
                .insert((tenant.clone(), email.clone()), record.user_id.clone());
        }
        if let Some(phone) = &method.phone_number {
            self.users_by_phone
                .insert((tenant.clone(), phone.clone()), record.user_id.clone());
        }
    }

    // ─── Devices ─────────────────────────────────────────────────────

    pub(crate) fn device(&self, tenant: &TenantId, device_id_hash: &str) -> Option<&DeviceRecord> {
        self.devices.get(&(tenant.clone(), device_id_hash.to_string()))
    }

    pub(crate) fn insert_device(&mut self, tenant: &TenantId, record: DeviceRecord) {
        self.devices
            .insert((tenant.clone(), record.device_id_hash.clone()), record);
    }

    /// Devices in this tenant matching the predicate, in device-id-hash
    /// order (BTreeMap iteration order).
    pub(crate) fn devices_where<'a>(
        &'a self,
        tenant: &'a TenantId,
        predicate: impl Fn(&DeviceRecord) -> bool + 'a,
    ) -> impl Iterator<Item = &'a DeviceRecord> + 'a {
        self.devices
            .iter()
            .filter(move |((t, _), device)| t == tenant && predicate(device))
            .map(|(_, device)| device)
    }

    /// Remove a device and every code it owns. Returns `false` if the
    /// device was not present (nothing is touched).
    pub(crate) fn remove_device_cascade(&mut self, tenant: &TenantId, device_id_hash: &str) -> bool {
        let key = (tenant.clone(), device_id_hash.to_string());
        if self.devices.remove(&key).is_none() {
            return false;
        }
        let owned: Vec<String> = self
            .codes
            .iter()
            .filter(|((t, _), code)| t == tenant && code.device_id_hash == device_id_hash)
            .map(|((_, id), _)| id.clone())
            .collect();
        for code_id in owned {
            if let Some(code) = self.codes.remove(&(tenant.clone(), code_id)) {
                self.codes_by_link_hash
                    .remove(&(tenant.clone(), code.link_code_hash));
            }
        }
        true
    }

    // ─── Codes ───────────────────────────────────────────────────────

    pub(crate) fn code(&self, tenant: &TenantId, code_id: &str) -> Option<&CodeRecord> {
        self.codes.get(&(tenant.clone(), code_id.to_string()))
    }

    pub(crate) fn link_code_hash_exists(&self, tenant: &TenantId, link_code_hash: &str) -> bool {
        self.codes_by_link_hash
            .contains_key(&(tenant.clone(), link_code_hash.to_string()))
    }

    pub(crate) fn insert_code(&mut self, tenant: &TenantId, record: CodeRecord) {
        self.codes_by_link_hash.insert(
            (tenant.clone(), record.link_code_hash.clone()),
            record.id.clone(),
        );
        self.codes.insert((tenant.clone(), record.id.clone()), record);
    }

    /// Codes owned by a device, in code-id order.
    pub(crate) fn codes_of_device(&self, tenant: &TenantId, device_id_hash: &str) -> Vec<CodeRecord> {
        self.codes
            .iter()
            .filter(|((t, _), code)| t == tenant && code.device_id_hash == device_id_hash)
            .map(|(_, code)| code.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tenant() -> TenantId {
        TenantId::default()
    }

    fn device(hash: &str, email: &str) -> DeviceRecord {
        DeviceRecord {
            device_id_hash: hash.to_string(),
            email: Some(email.to_string()),
            phone_number: None,
            link_code_salt: "salt".to_string(),
        }
    }

    fn code(id: &str, device_hash: &str, link_hash: &str) -> CodeRecord {
        CodeRecord {
            id: id.to_string(),
            device_id_hash: device_hash.to_string(),
            link_code_hash: link_hash.to_string(),
            created_at: 0,
        }
    }

    #[test]
    fn test_update_user_reindexes_email() {
        let mut tables = Tables::default();
        let t = tenant();
        tables.insert_user(&t, UserRecord::new("u1", Some("a@x.com".into()), None, 0));
        assert_eq!(tables.email_owner(&t, "a@x.com"), Some("u1"));

        tables.update_user(&t, UserRecord::new("u1", Some("b@x.com".into()), None, 0));
        assert_eq!(tables.email_owner(&t, "a@x.com"), None);
        assert_eq!(tables.email_owner(&t, "b@x.com"), Some("u1"));
    }

    #[test]
    fn test_update_user_email_move_is_order_independent() {
        // An email moving from u2 to u1 must survive either apply order.
        for new_owner_first in [true, false] {
            let mut tables = Tables::default();
            let t = tenant();
            tables.insert_user(&t, UserRecord::new("u1", None, Some("+441".into()), 0));
            tables.insert_user(&t, UserRecord::new("u2", Some("a@x.com".into()), None, 0));

            let u1_updated = UserRecord::new("u1", Some("a@x.com".into()), Some("+441".into()), 0);
            let u2_updated = UserRecord::new("u2", None, None, 0);
            if new_owner_first {
                tables.update_user(&t, u1_updated);
                tables.update_user(&t, u2_updated);
            } else {
                tables.update_user(&t, u2_updated);
                tables.update_user(&t, u1_updated);
            }

            assert_eq!(tables.email_owner(&t, "a@x.com"), Some("u1"));
            assert_eq!(tables.phone_owner(&t, "+441"), Some("u1"));
        }
    }

    #[test]
    fn test_cascade_removes_only_owned_codes() {
        let mut tables = Tables::default();
        let t = tenant();
        tables.insert_device(&t, device("d1", "a@x.com"));
        tables.insert_device(&t, device("d2", "b@x.com"));
        tables.insert_code(&t, code("c1", "d1", "l1"));
        tables.insert_code(&t, code("c2", "d1", "l2"));
        tables.insert_code(&t, code("c3", "d2", "l3"));

        assert!(tables.remove_device_cascade(&t, "d1"));
        assert!(tables.code(&t, "c1").is_none());
        assert!(tables.code(&t, "c2").is_none());
        assert!(!tables.link_code_hash_exists(&t, "l1"));
        assert!(tables.code(&t, "c3").is_some());
        assert!(tables.link_code_hash_exists(&t, "l3"));
    }

    #[test]
    fn test_cascade_on_absent_device_is_noop() {
        let mut tables = Tables::default();
        assert!(!tables.remove_device_cascade(&tenant(), "missing"));
    }

    #[test]
    fn test_tenants_are_isolated() {
        let mut tables = Tables::default();
        let t1 = TenantId::new("t1");
        let t2 = TenantId::new("t2");
        tables.insert_code(&tenant(), code("c1", "d1", "l1"));
        tables.insert_device(&t1, device("d1", "a@x.com"));
        assert!(tables.device(&t2, "d1").is_none());
        assert!(!tables.link_code_hash_exists(&t1, "l1"));
    }
}
