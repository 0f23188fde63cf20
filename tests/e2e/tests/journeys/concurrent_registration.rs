//! Journey: concurrent asynchronous registration across instances.

use std::time::Duration;

use strongbox_e2e_tests::harness::{BrokenExtension, TableExtension, TestStorageManager};
use strongbox_core::{ExtensionPlan, ExtensionState, Storage};

async fn wait_terminal(storage: &Storage, names: &[&str]) {
    loop {
        let all_terminal = names.iter().all(|name| {
            matches!(
                storage.extension_state(name),
                Some(ExtensionState::Registered) | Some(ExtensionState::Failed)
            )
        });
        if all_terminal {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn readiness_flips_only_after_all_n_registrations() {
    let manager = TestStorageManager::new();

    let mut plan = ExtensionPlan::new();
    let names: Vec<String> = (0..8).map(|i| format!("view_{i}")).collect();
    for name in &names {
        plan = plan.async_extension(name.clone(), TableExtension::new(name.clone()));
    }
    let storage = manager.setup("primary", plan);

    manager.wait_ready().await;

    for name in &names {
        assert_eq!(
            storage.extension_state(name),
            Some(ExtensionState::Registered),
            "{name} must be registered before the gate flips"
        );
        assert!(storage.registered_extension(name).is_some());
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn readiness_is_a_total_barrier_across_instances() {
    let manager = TestStorageManager::new();

    let primary = manager.setup(
        "primary",
        ExtensionPlan::new().async_extension("inbox", TableExtension::new("inbox")),
    );
    let attachments = manager.setup(
        "attachments",
        ExtensionPlan::new().async_extension("blobs", TableExtension::new("blobs")),
    );

    manager.wait_ready().await;
    assert!(primary.is_ready());
    assert!(attachments.is_ready());
    assert_eq!(
        primary.extension_state("inbox"),
        Some(ExtensionState::Registered)
    );
    assert_eq!(
        attachments.extension_state("blobs"),
        Some(ExtensionState::Registered)
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn one_failed_registration_freezes_readiness() {
    let manager = TestStorageManager::new();
    let storage = manager.setup(
        "primary",
        ExtensionPlan::new()
            .async_extension("good", TableExtension::new("good"))
            .async_extension("bad", BrokenExtension::new()),
    );

    wait_terminal(&storage, &["good", "bad"]).await;

    assert_eq!(storage.extension_state("good"), Some(ExtensionState::Registered));
    assert_eq!(storage.extension_state("bad"), Some(ExtensionState::Failed));
    assert!(!manager.gate.is_ready());
    assert!(storage.registered_extension("bad").is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn readiness_stays_true_once_flipped() {
    let manager = TestStorageManager::new();
    let storage = manager.setup(
        "primary",
        ExtensionPlan::new().async_extension("inbox", TableExtension::new("inbox")),
    );
    manager.wait_ready().await;

    // Late registrations and ongoing writes never revert the flag.
    storage.register_extension("late", TableExtension::new("late"));
    let mut conn = storage.connection().unwrap();
    for i in 0..10 {
        conn.write_transaction(|tx| {
            tx.execute("INSERT INTO inbox (body) VALUES (?1)", [format!("msg {i}")])?;
            Ok(())
        })
        .unwrap();
        assert!(manager.gate.is_ready());
    }
}
