//! Pairing record durability and atomicity properties (P4, P9).

use sage_provisiond::pairing::{PairingRecord, PairingStore};

fn sample(name: &str) -> PairingRecord {
    PairingRecord {
        device_id: "device-abc".to_string(),
        device_name: name.to_string(),
        paired_at: chrono::Utc::now(),
    }
}

#[tokio::test]
async fn absent_until_first_successful_pairing() {
    let dir = tempfile::tempdir().unwrap();
    let store = PairingStore::new(dir.path().join("pairing.json"));
    assert!(store.load().await.is_none());
}

#[tokio::test]
async fn reports_exactly_one_record_after_several_overwrites() {
    let dir = tempfile::tempdir().unwrap();
    let store = PairingStore::new(dir.path().join("pairing.json"));

    for i in 0..5 {
        store.save(&sample(&format!("SAGE-{i}"))).await.unwrap();
    }

    let loaded = store.load().await.unwrap();
    assert_eq!(loaded.device_name, "SAGE-4");

    let mut entries = tokio::fs::read_dir(dir.path()).await.unwrap();
    let mut count = 0;
    while entries.next_entry().await.unwrap().is_some() {
        count += 1;
    }
    assert_eq!(count, 1, "no leftover temp file after repeated saves");
}

#[tokio::test]
async fn clearing_after_unpair_leaves_no_record() {
    let dir = tempfile::tempdir().unwrap();
    let store = PairingStore::new(dir.path().join("pairing.json"));
    store.save(&sample("SAGE-1")).await.unwrap();

    store.clear().await.unwrap();
    assert!(store.load().await.is_none());
}
