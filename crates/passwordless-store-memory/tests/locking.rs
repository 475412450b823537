// Pairwise blocking behavior of the lock-taking device operations.
//
// Two tasks target the same device: the first acquires the lock inside an
// open transaction, the second attempts its own lock-taking operation and
// must stall until the first commits. Disjoint devices must not interfere.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::{sleep, timeout};

use passwordless_store_core::{PasswordlessStorage, TenantId};
use passwordless_store_memory::{MemoryPasswordlessStore, StoreTransaction};
use passwordless_store_test_utils::random_code_info;

const EMAIL: &str = "test@example.com";
const PHONE: &str = "+442071838750";
const SALT: &str = "linkCodeSalt";

#[derive(Clone, Copy, Debug, PartialEq)]
enum LockingOp {
    GetDeviceForUpdate,
    DeleteDevice,
    DeleteDevicesByEmail,
    DeleteDevicesByPhoneNumber,
}

#[derive(Clone)]
struct DeviceTarget {
    device_id_hash: String,
    email: Option<String>,
    phone_number: Option<String>,
}

async fn run_op(
    store: &MemoryPasswordlessStore,
    tx: &mut StoreTransaction,
    tenant: &TenantId,
    op: LockingOp,
    target: &DeviceTarget,
) {
    match op {
        LockingOp::GetDeviceForUpdate => {
            store
                .get_device_for_update(tx, tenant, &target.device_id_hash)
                .await
                .unwrap();
        }
        LockingOp::DeleteDevice => {
            store
                .delete_device(tx, tenant, &target.device_id_hash)
                .await
                .unwrap();
        }
        LockingOp::DeleteDevicesByEmail => {
            store
                .delete_devices_by_email(tx, tenant, target.email.as_deref().unwrap())
                .await
                .unwrap();
        }
        LockingOp::DeleteDevicesByPhoneNumber => {
            store
                .delete_devices_by_phone_number(
                    tx,
                    tenant,
                    target.phone_number.as_deref().unwrap(),
                )
                .await
                .unwrap();
        }
    }
}

/// The core blocking check: `op1` holds the device lock in an open
/// transaction while `op2` runs in a second transaction. `op2` must not
/// get past the lock until `op1`'s transaction commits.
async fn check_locking_calls(
    store: &Arc<MemoryPasswordlessStore>,
    tenant: &TenantId,
    target: &DeviceTarget,
    op1: LockingOp,
    op2: LockingOp,
) {
    let state = Arc::new(Mutex::new("init"));
    let locked = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());

    let holder = {
        let store = Arc::clone(store);
        let tenant = tenant.clone();
        let target = target.clone();
        let locked = Arc::clone(&locked);
        let release = Arc::clone(&release);
        tokio::spawn(async move {
            let mut tx = store.begin_transaction().await.unwrap();
            run_op(&store, &mut tx, &tenant, op1, &target).await;
            locked.notify_one();
            release.notified().await;
            store.commit_transaction(tx).await.unwrap();
        })
    };

    let waiter = {
        let store = Arc::clone(store);
        let tenant = tenant.clone();
        let target = target.clone();
        let state = Arc::clone(&state);
        let locked = Arc::clone(&locked);
        tokio::spawn(async move {
            locked.notified().await;
            let mut tx = store.begin_transaction().await.unwrap();
            *state.lock().unwrap() = "waiting";
            run_op(&store, &mut tx, &tenant, op2, &target).await;
            *state.lock().unwrap() = "acquired";
            store.commit_transaction(tx).await.unwrap();
        })
    };

    sleep(Duration::from_millis(250)).await;
    assert_eq!(
        *state.lock().unwrap(),
        "waiting",
        "{op1:?} should block {op2:?} on the same device"
    );

    release.notify_one();
    waiter.await.unwrap();
    holder.await.unwrap();
    assert_eq!(*state.lock().unwrap(), "acquired");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_locking_matrix_email_device() {
    let store = Arc::new(MemoryPasswordlessStore::new());
    let tenant = store.default_tenant().clone();
    let ops = [
        LockingOp::GetDeviceForUpdate,
        LockingOp::DeleteDevice,
        LockingOp::DeleteDevicesByEmail,
    ];

    for op1 in ops {
        for op2 in ops {
            let code = random_code_info();
            store
                .create_device_with_code(&tenant, Some(EMAIL), None, SALT, &code)
                .await
                .unwrap();
            let target = DeviceTarget {
                device_id_hash: code.device_id_hash.clone(),
                email: Some(EMAIL.to_string()),
                phone_number: None,
            };
            check_locking_calls(&store, &tenant, &target, op1, op2).await;

            // Reset: whichever devices survived the pair, clear them out.
            let mut tx = store.begin_transaction().await.unwrap();
            store
                .delete_devices_by_email(&mut tx, &tenant, EMAIL)
                .await
                .unwrap();
            store.commit_transaction(tx).await.unwrap();
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_locking_matrix_phone_device() {
    let store = Arc::new(MemoryPasswordlessStore::new());
    let tenant = store.default_tenant().clone();
    let ops = [
        LockingOp::GetDeviceForUpdate,
        LockingOp::DeleteDevice,
        LockingOp::DeleteDevicesByPhoneNumber,
    ];

    for op1 in ops {
        for op2 in ops {
            let code = random_code_info();
            store
                .create_device_with_code(&tenant, None, Some(PHONE), SALT, &code)
                .await
                .unwrap();
            let target = DeviceTarget {
                device_id_hash: code.device_id_hash.clone(),
                email: None,
                phone_number: Some(PHONE.to_string()),
            };
            check_locking_calls(&store, &tenant, &target, op1, op2).await;

            let mut tx = store.begin_transaction().await.unwrap();
            store
                .delete_devices_by_phone_number(&mut tx, &tenant, PHONE)
                .await
                .unwrap();
            store.commit_transaction(tx).await.unwrap();
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_waiter_observes_committed_delete() {
    let store = Arc::new(MemoryPasswordlessStore::new());
    let tenant = store.default_tenant().clone();

    let code = random_code_info();
    store
        .create_device_with_code(&tenant, Some(EMAIL), None, SALT, &code)
        .await
        .unwrap();

    let locked = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());

    let deleter = {
        let store = Arc::clone(&store);
        let tenant = tenant.clone();
        let hash = code.device_id_hash.clone();
        let locked = Arc::clone(&locked);
        let release = Arc::clone(&release);
        tokio::spawn(async move {
            let mut tx = store.begin_transaction().await.unwrap();
            store.delete_device(&mut tx, &tenant, &hash).await.unwrap();
            locked.notify_one();
            release.notified().await;
            store.commit_transaction(tx).await.unwrap();
        })
    };

    let reader = {
        let store = Arc::clone(&store);
        let tenant = tenant.clone();
        let hash = code.device_id_hash.clone();
        let locked = Arc::clone(&locked);
        tokio::spawn(async move {
            locked.notified().await;
            let mut tx = store.begin_transaction().await.unwrap();
            let device = store.get_device_for_update(&mut tx, &tenant, &hash).await.unwrap();
            store.commit_transaction(tx).await.unwrap();
            device
        })
    };

    sleep(Duration::from_millis(100)).await;
    release.notify_one();
    deleter.await.unwrap();

    // The waiter got past the lock only after commit, so it must see the
    // device gone rather than the pre-delete row.
    assert!(reader.await.unwrap().is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_disjoint_devices_do_not_block() {
    let store = Arc::new(MemoryPasswordlessStore::new());
    let tenant = store.default_tenant().clone();

    let code1 = random_code_info();
    let code2 = random_code_info();
    store
        .create_device_with_code(&tenant, Some(EMAIL), None, SALT, &code1)
        .await
        .unwrap();
    store
        .create_device_with_code(&tenant, None, Some(PHONE), SALT, &code2)
        .await
        .unwrap();

    let mut tx1 = store.begin_transaction().await.unwrap();
    assert!(store
        .get_device_for_update(&mut tx1, &tenant, &code1.device_id_hash)
        .await
        .unwrap()
        .is_some());

    // A different device's lock is free; this must complete immediately.
    let mut tx2 = store.begin_transaction().await.unwrap();
    let got = timeout(
        Duration::from_millis(500),
        store.get_device_for_update(&mut tx2, &tenant, &code2.device_id_hash),
    )
    .await
    .expect("disjoint device lock should not block")
    .unwrap();
    assert!(got.is_some());

    store.commit_transaction(tx2).await.unwrap();
    store.commit_transaction(tx1).await.unwrap();
}

#[tokio::test]
async fn test_relocking_within_transaction_is_noop() {
    let store = MemoryPasswordlessStore::new();
    let tenant = store.default_tenant().clone();

    let code = random_code_info();
    store
        .create_device_with_code(&tenant, Some(EMAIL), None, SALT, &code)
        .await
        .unwrap();

    // Lock, then run every other lock-taking op against the same device in
    // the same transaction; none may self-deadlock.
    let mut tx = store.begin_transaction().await.unwrap();
    assert!(store
        .get_device_for_update(&mut tx, &tenant, &code.device_id_hash)
        .await
        .unwrap()
        .is_some());
    assert!(store
        .get_device_for_update(&mut tx, &tenant, &code.device_id_hash)
        .await
        .unwrap()
        .is_some());
    store
        .delete_devices_by_email(&mut tx, &tenant, EMAIL)
        .await
        .unwrap();
    store
        .delete_device(&mut tx, &tenant, &code.device_id_hash)
        .await
        .unwrap();
    store.commit_transaction(tx).await.unwrap();

    assert!(store
        .get_device(&tenant, &code.device_id_hash)
        .await
        .unwrap()
        .is_none());
    assert!(store.get_code(&tenant, &code.id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_same_hash_in_other_tenant_is_disjoint() {
    let store = MemoryPasswordlessStore::new();
    let tenant_a = TenantId::new("tenant-a");
    let tenant_b = TenantId::new("tenant-b");

    let code = random_code_info();
    store
        .create_device_with_code(&tenant_a, Some(EMAIL), None, SALT, &code)
        .await
        .unwrap();
    store
        .create_device_with_code(&tenant_b, Some(EMAIL), None, SALT, &code)
        .await
        .unwrap();

    let mut tx1 = store.begin_transaction().await.unwrap();
    assert!(store
        .get_device_for_update(&mut tx1, &tenant_a, &code.device_id_hash)
        .await
        .unwrap()
        .is_some());

    let mut tx2 = store.begin_transaction().await.unwrap();
    let got = timeout(
        Duration::from_millis(500),
        store.get_device_for_update(&mut tx2, &tenant_b, &code.device_id_hash),
    )
    .await
    .expect("lock keys are tenant-scoped")
    .unwrap();
    assert!(got.is_some());

    store.commit_transaction(tx2).await.unwrap();
    store.commit_transaction(tx1).await.unwrap();
}
