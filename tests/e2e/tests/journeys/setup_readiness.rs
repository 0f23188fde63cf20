//! Journey: bring-up, readiness gating, first writes.

use std::time::Duration;

use strongbox_e2e_tests::harness::{SlowExtension, TableExtension, TestStorageManager};
use strongbox_core::{ExtensionPlan, StorageError};

#[tokio::test(flavor = "multi_thread")]
async fn write_is_gated_until_every_registration_completes() {
    let manager = TestStorageManager::new();
    let storage = manager.setup(
        "primary",
        ExtensionPlan::new()
            .sync_extension("inbox", TableExtension::new("inbox"))
            .async_extension("fulltext", SlowExtension::new("fulltext", Duration::from_millis(300))),
    );

    // The slow background registration holds the gate open.
    assert!(!storage.is_ready());

    // A premature write on a general connection is rejected...
    let mut conn = storage.connection().unwrap();
    let premature = conn.write_transaction(|tx| {
        tx.execute("INSERT INTO inbox (body) VALUES ('too early')", [])?;
        Ok(())
    });
    assert!(matches!(premature, Err(StorageError::NotReady)));

    // ...while the registration connection is exempt.
    let mut reg_conn = storage.registration_connection().unwrap();
    reg_conn
        .write_transaction(|tx| {
            tx.execute(
                "INSERT OR REPLACE INTO storage_meta (key, value, updated_at)
                 VALUES ('setup_probe', 'x', datetime('now'))",
                [],
            )?;
            Ok(())
        })
        .unwrap();

    manager.wait_ready().await;

    // The identical write now succeeds.
    conn.write_transaction(|tx| {
        tx.execute("INSERT INTO inbox (body) VALUES ('on time')", [])?;
        Ok(())
    })
    .unwrap();

    let count: i64 = conn
        .read_transaction(|tx| Ok(tx.query_row("SELECT count(*) FROM inbox", [], |r| r.get(0))?))
        .unwrap();
    assert_eq!(count, 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn sync_registration_is_visible_before_setup_returns() {
    let manager = TestStorageManager::new();
    let storage = manager.setup(
        "primary",
        ExtensionPlan::new().sync_extension("inbox", TableExtension::new("inbox")),
    );

    // No observable Pending/Registering gap for the setup caller.
    assert!(storage.registered_extension("inbox").is_some());
    assert!(storage.is_ready());
}

#[tokio::test(flavor = "multi_thread")]
async fn late_subscriber_observes_readiness_immediately() {
    let manager = TestStorageManager::new();
    let _storage = manager.setup(
        "primary",
        ExtensionPlan::new().async_extension("fulltext", TableExtension::new("fulltext")),
    );
    manager.wait_ready().await;

    // Subscribing after the flip must not wait for another event.
    let rx = manager.gate.subscribe();
    assert!(*rx.borrow());
}
