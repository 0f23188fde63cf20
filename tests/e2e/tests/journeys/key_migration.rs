//! Journey: legacy key migration and key failure modes.

use strongbox_core::keys::{KEY_SPEC_ENTRY, LEGACY_KEY_ENTRY};
use strongbox_e2e_tests::harness::{TableExtension, TestStorageManager};
use strongbox_core::{CredentialStore, ExtensionPlan, ReadinessGate, Storage, StorageError};

const LEGACY_KEY: [u8; 32] = [7u8; 32];

#[test]
fn setup_migrates_a_legacy_key_and_keeps_the_data() {
    let manager = TestStorageManager::new();
    manager.store.set(LEGACY_KEY_ENTRY, &LEGACY_KEY).unwrap();

    let storage = manager.setup(
        "primary",
        ExtensionPlan::new().sync_extension("notes", TableExtension::new("notes")),
    );
    assert!(storage.is_ready());

    // Exactly the new representation is present.
    assert!(manager.store.get(LEGACY_KEY_ENTRY).unwrap().is_none());
    assert!(manager.store.get(KEY_SPEC_ENTRY).unwrap().is_some());

    let mut conn = storage.connection().unwrap();
    conn.write_transaction(|tx| {
        tx.execute("INSERT INTO notes (body) VALUES ('survives rekey')", [])?;
        Ok(())
    })
    .unwrap();
    drop(conn);
    let config = manager.config("primary");
    drop(storage);

    // Reopen under the migrated key spec: the same bytes must decrypt it.
    let fresh_gate = ReadinessGate::new();
    let reopened = Storage::setup(
        config,
        &manager.keys,
        &fresh_gate,
        ExtensionPlan::new().sync_extension("notes", TableExtension::new("notes")),
    )
    .unwrap();

    let mut conn = reopened.connection().unwrap();
    let count: i64 = conn
        .read_transaction(|tx| Ok(tx.query_row("SELECT count(*) FROM notes", [], |r| r.get(0))?))
        .unwrap();
    assert_eq!(count, 1);
}

#[test]
fn migration_interrupted_between_steps_converges_on_retry() {
    let manager = TestStorageManager::new();
    manager.store.set(LEGACY_KEY_ENTRY, &LEGACY_KEY).unwrap();

    // Simulate a crash after the new spec was written but before the legacy
    // entry was deleted: both representations exist.
    let key = manager.keys.load_legacy_key().unwrap();
    manager.keys.store_key_spec(&key).unwrap();
    assert!(manager.store.get(LEGACY_KEY_ENTRY).unwrap().is_some());
    assert!(manager.store.get(KEY_SPEC_ENTRY).unwrap().is_some());

    // Retried setup finishes the migration; at no point was neither present.
    let storage = manager.setup("primary", ExtensionPlan::new());
    assert!(storage.is_ready());
    assert!(manager.store.get(LEGACY_KEY_ENTRY).unwrap().is_none());
    assert!(manager.store.get(KEY_SPEC_ENTRY).unwrap().is_some());
}

#[test]
fn locked_credential_store_is_surfaced_as_retryable() {
    let manager = TestStorageManager::new();
    manager.store.set_locked(true);

    let err = Storage::setup(
        manager.config("primary"),
        &manager.keys,
        &manager.gate,
        ExtensionPlan::new(),
    )
    .unwrap_err();
    assert!(matches!(err, StorageError::Key(_)));

    // After the store unlocks, the same configuration succeeds.
    manager.store.set_locked(false);
    let storage = manager.setup("primary", ExtensionPlan::new());
    assert!(storage.is_ready());
}

#[test]
fn corrupt_key_spec_fails_setup_and_is_preserved() {
    let manager = TestStorageManager::new();
    manager.store.set(KEY_SPEC_ENTRY, b"garbage").unwrap();

    let err = Storage::setup(
        manager.config("primary"),
        &manager.keys,
        &manager.gate,
        ExtensionPlan::new(),
    )
    .unwrap_err();
    assert!(matches!(err, StorageError::Key(_)));

    // No silent regeneration: the broken record is untouched.
    assert_eq!(manager.store.get(KEY_SPEC_ENTRY).unwrap().unwrap(), b"garbage");
}
