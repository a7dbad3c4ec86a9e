//! Dispatcher operations against a running store.

mod common;
use common::{full, TestStore};
use lodestone_store::StoreError;
use lodestone_types::wire::WireFilterParams;
use std::collections::HashMap;

#[tokio::test]
async fn set_and_get_round_trip() {
    let store = TestStore::spawn("node-1", &["spine"]).await;

    let v = lodestone_types::Value::full(1, "A", b"x".to_vec(), 30_000, 1);
    store
        .handle
        .set_key_vals("spine", HashMap::from([("k1".to_string(), v)]))
        .await
        .unwrap();

    let got = store
        .handle
        .get_key_vals("spine", vec!["k1".to_string(), "absent".to_string()])
        .await
        .unwrap();
    assert_eq!(got.len(), 1);
    let v = &got["k1"];
    assert_eq!(v.version, 1);
    assert_eq!(v.originator_id, "A");
    assert_eq!(v.value(), Some(&b"x"[..]));
    assert_eq!(v.ttl_version, 1);
    assert!(v.ttl_ms > 0 && v.ttl_ms <= 30_000, "remaining ttl, got {}", v.ttl_ms);

    let counters = store.handle.counters("spine").await.unwrap();
    assert_eq!(counters.keys, 1);
    assert!(counters.merges >= 1);
}

#[tokio::test]
async fn unknown_area_is_rejected_everywhere() {
    let store = TestStore::spawn("node-1", &["spine"]).await;

    let err = store
        .handle
        .get_key_vals("nope", vec!["k".into()])
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::UnknownArea(_)));

    let err = store
        .handle
        .set_key_vals("nope", HashMap::from([("k".to_string(), full(1, "A", b"x"))]))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::UnknownArea(_)));

    let err = store.handle.get_peers("nope").await.unwrap_err();
    assert!(matches!(err, StoreError::UnknownArea(_)));

    let err = store
        .handle
        .subscribe(None, vec!["nope".to_string()], false, false)
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::UnknownArea(_)));
}

#[tokio::test]
async fn bad_filter_regex_is_invalid_argument() {
    let store = TestStore::spawn("node-1", &["spine"]).await;
    let filters = WireFilterParams {
        key_prefixes: vec!["[".to_string()],
        originator_ids: vec![],
        operator: 0,
    };
    let err = store
        .handle
        .dump_key_vals("spine", Some(&filters), false)
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::InvalidArgument(_)));
}

#[tokio::test]
async fn dump_with_or_filter_matches_any_criterion() {
    let store = TestStore::spawn("node-1", &["spine"]).await;
    store
        .handle
        .set_key_vals(
            "spine",
            HashMap::from([
                ("k1".to_string(), full(1, "A", b"1")),
                ("k2".to_string(), full(1, "A", b"2")),
                ("k3".to_string(), full(1, "B", b"3")),
                ("key_foo".to_string(), full(1, "A", b"4")),
                ("other".to_string(), full(1, "A", b"5")),
            ]),
        )
        .await
        .unwrap();

    let filters = WireFilterParams {
        key_prefixes: vec!["k".to_string()],
        originator_ids: vec!["B".to_string()],
        operator: 0,
    };
    let dump = store
        .handle
        .dump_key_vals("spine", Some(&filters), false)
        .await
        .unwrap();
    let mut keys: Vec<_> = dump.keys().cloned().collect();
    keys.sort();
    assert_eq!(keys, vec!["k1", "k2", "k3", "key_foo"]);
}

#[tokio::test]
async fn hash_dump_strips_values() {
    let store = TestStore::spawn("node-1", &["spine"]).await;
    store
        .handle
        .set_key_vals(
            "spine",
            HashMap::from([("k1".to_string(), full(4, "A", b"payload"))]),
        )
        .await
        .unwrap();

    let hashes = store.handle.dump_hashes("spine", None).await.unwrap();
    let v = &hashes["k1"];
    assert!(v.value().is_none());
    assert!(v.hash().is_some());
    assert_eq!(v.version, 4);
}

#[tokio::test]
async fn empty_batch_is_invalid() {
    let store = TestStore::spawn("node-1", &["spine"]).await;
    let err = store
        .handle
        .set_key_vals("spine", HashMap::new())
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::InvalidArgument(_)));

    let err = store
        .handle
        .set_key_vals("spine", HashMap::from([(String::new(), full(1, "A", b"x"))]))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::InvalidArgument(_)));
}

#[tokio::test]
async fn peer_table_round_trip() {
    let store = TestStore::spawn("node-1", &["spine"]).await;
    store
        .handle
        .add_peers(
            "spine",
            vec![("node-2".to_string(), "127.0.0.1:1".parse().unwrap())],
        )
        .await
        .unwrap();

    let peers = store.handle.get_peers("spine").await.unwrap();
    assert_eq!(peers.len(), 1);
    assert_eq!(peers[0].peer_name, "node-2");

    store
        .handle
        .del_peers("spine", vec!["node-2".to_string()])
        .await
        .unwrap();
    assert!(store.handle.get_peers("spine").await.unwrap().is_empty());
}

#[tokio::test]
async fn areas_are_isolated() {
    let store = TestStore::spawn("node-1", &["spine", "pod"]).await;
    store
        .handle
        .set_key_vals("spine", HashMap::from([("k".to_string(), full(1, "A", b"s"))]))
        .await
        .unwrap();

    assert!(store
        .handle
        .get_key_vals("pod", vec!["k".to_string()])
        .await
        .unwrap()
        .is_empty());

    let mut areas = store.handle.areas();
    areas.sort();
    assert_eq!(areas, vec!["pod", "spine"]);
}
