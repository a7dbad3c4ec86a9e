//! TTL countdown, eviction and self-originated refresh.

mod common;
use common::TestStore;
use lodestone_types::Value;
use std::collections::HashMap;
use std::time::Duration;

#[tokio::test(start_paused = true)]
async fn foreign_key_expires_and_notifies_subscribers() {
    let store = TestStore::spawn("node-1", &["spine"]).await;
    let (_, mut sub) = store
        .handle
        .subscribe(None, vec![], false, false)
        .await
        .unwrap();

    // originated elsewhere, so nobody here will refresh it
    store
        .handle
        .set_key_vals(
            "spine",
            HashMap::from([(
                "k1".to_string(),
                Value::full(1, "remote-node", b"x".to_vec(), 200, 1),
            )]),
        )
        .await
        .unwrap();

    // the write itself
    let first = sub.recv().await.unwrap().expect("delta");
    assert!(first.key_vals.contains_key("k1"));

    // the eviction
    let removal = tokio::time::timeout(Duration::from_secs(5), sub.recv())
        .await
        .expect("eviction within ttl")
        .unwrap()
        .expect("removal publication");
    assert!(removal.key_vals.is_empty());
    assert_eq!(removal.expired_keys, vec!["k1".to_string()]);

    assert!(store
        .handle
        .get_key_vals("spine", vec!["k1".to_string()])
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test(start_paused = true)]
async fn self_originated_key_stays_alive() {
    let store = TestStore::spawn("node-1", &["spine"]).await;
    store
        .handle
        .set_key_vals(
            "spine",
            HashMap::from([(
                "self-key".to_string(),
                Value::full(1, "node-1", b"mine".to_vec(), 300, 1),
            )]),
        )
        .await
        .unwrap();

    // several ttl periods later the key must still be there, kept alive
    // by ttl-version bumps alone
    tokio::time::sleep(Duration::from_millis(1_500)).await;

    let got = store
        .handle
        .get_key_vals("spine", vec!["self-key".to_string()])
        .await
        .unwrap();
    let v = got.get("self-key").expect("refreshed, not evicted");
    assert_eq!(v.version, 1, "refresh never bumps the version");
    assert_eq!(v.value(), Some(&b"mine"[..]));
    assert!(v.ttl_version > 1, "ttl version advanced, got {}", v.ttl_version);
}

#[tokio::test(start_paused = true)]
async fn re_advertised_key_outlives_first_deadline() {
    let store = TestStore::spawn("node-1", &["spine"]).await;

    store
        .handle
        .set_key_vals(
            "spine",
            HashMap::from([(
                "k".to_string(),
                Value::full(1, "remote", b"a".to_vec(), 200, 1),
            )]),
        )
        .await
        .unwrap();

    // a newer version arrives before the first deadline
    tokio::time::sleep(Duration::from_millis(100)).await;
    store
        .handle
        .set_key_vals(
            "spine",
            HashMap::from([(
                "k".to_string(),
                Value::full(2, "remote", b"b".to_vec(), 10_000, 1),
            )]),
        )
        .await
        .unwrap();

    // the stale countdown must not evict the replacement
    tokio::time::sleep(Duration::from_millis(300)).await;
    let got = store
        .handle
        .get_key_vals("spine", vec!["k".to_string()])
        .await
        .unwrap();
    assert_eq!(got["k"].version, 2);
}
