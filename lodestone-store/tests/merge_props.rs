//! Property tests for the merge protocol.

use lodestone_store::db::{merge_key_values, KeyValMap};
use lodestone_types::{Value, ValueBody};
use proptest::prelude::*;

/// TTL derived from the identity fields, so records with equal identity
/// always carry equal TTLs (a ttl refresh without a ttl-version bump is
/// not expected to commute, and real originators never emit one).
fn ttl_for(version: u64, ttl_version: u64) -> i64 {
    5_000 + (version * 1_000 + ttl_version * 100) as i64
}

fn arb_value() -> impl Strategy<Value = Value> {
    (
        1u64..6,
        prop::sample::select(vec!["node-a", "node-b", "node-c"]),
        prop::collection::vec(any::<u8>(), 0..4),
        0u64..4,
        // 0 = full, 1 = hash-only, 2 = ttl-only
        0u8..3,
    )
        .prop_map(|(version, orig, bytes, ttlv, kind)| {
            let ttl = ttl_for(version, ttlv);
            let full = Value::full(version, orig, bytes, ttl, ttlv);
            match kind {
                0 => full,
                1 => full.to_hash_only().expect("full has a hash"),
                _ => Value::ttl_only(version, orig, ttl, ttlv),
            }
        })
}

fn arb_batch() -> impl Strategy<Value = KeyValMap> {
    prop::collection::hash_map(
        prop::sample::select(vec![
            "k1".to_string(),
            "k2".to_string(),
            "k3".to_string(),
        ]),
        arb_value(),
        0..4,
    )
}

fn value_view(db: &KeyValMap) -> Vec<(String, u64, String, Option<Vec<u8>>)> {
    let mut view: Vec<_> = db
        .iter()
        .map(|(k, v)| {
            (
                k.clone(),
                v.version,
                v.originator_id.clone(),
                v.value().map(|b| b.to_vec()),
            )
        })
        .collect();
    view.sort();
    view
}

proptest! {
    /// Applying a merge's own delta again changes nothing.
    #[test]
    fn merge_idempotent(base in arb_batch(), incoming in arb_batch()) {
        let mut db = KeyValMap::new();
        merge_key_values(&mut db, base, None);
        let (delta, _) = merge_key_values(&mut db, incoming, None);

        let snapshot = db.clone();
        let (delta2, _) = merge_key_values(&mut db, delta, None);
        prop_assert!(delta2.is_empty());
        prop_assert_eq!(db, snapshot);
    }

    /// Batches commute: both orders converge on the same database. Each
    /// batch is offered twice, as re-flooding does in the running
    /// system; a single pass cannot apply a ttl refresh that arrives
    /// before the record it refreshes.
    #[test]
    fn merge_commutative(m1 in arb_batch(), m2 in arb_batch()) {
        let mut db_a = KeyValMap::new();
        merge_key_values(&mut db_a, m1.clone(), None);
        merge_key_values(&mut db_a, m2.clone(), None);
        merge_key_values(&mut db_a, m1.clone(), None);
        merge_key_values(&mut db_a, m2.clone(), None);

        let mut db_b = KeyValMap::new();
        merge_key_values(&mut db_b, m2.clone(), None);
        merge_key_values(&mut db_b, m1.clone(), None);
        merge_key_values(&mut db_b, m2, None);
        merge_key_values(&mut db_b, m1, None);

        prop_assert_eq!(db_a, db_b);
    }

    /// No sequence of value-less records creates a key or alters stored
    /// versions, originators or bytes.
    #[test]
    fn ttl_only_safety(
        seed in arb_batch(),
        updates in prop::collection::vec(
            (prop::sample::select(vec!["k1".to_string(), "k2".to_string(), "k3".to_string()]),
             1u64..6,
             prop::sample::select(vec!["node-a", "node-b", "node-c"]),
             1_000i64..60_000,
             0u64..8),
            0..12,
        ),
    ) {
        let mut db = KeyValMap::new();
        merge_key_values(&mut db, seed, None);
        let before = value_view(&db);

        for (key, version, orig, ttl, ttlv) in updates {
            let batch = KeyValMap::from([(key, Value::ttl_only(version, orig, ttl, ttlv))]);
            merge_key_values(&mut db, batch, None);
        }

        prop_assert_eq!(before, value_view(&db));
    }

    /// Every stored full value carries a digest consistent with its
    /// contents.
    #[test]
    fn stored_values_carry_hashes(batches in prop::collection::vec(arb_batch(), 1..4)) {
        let mut db = KeyValMap::new();
        for batch in batches {
            merge_key_values(&mut db, batch, None);
        }
        for value in db.values() {
            if let ValueBody::Full { value: bytes, hash } = &value.body {
                let expected =
                    lodestone_types::value::hash_value(value.version, &value.originator_id, bytes);
                prop_assert_eq!(*hash, Some(expected));
            }
        }
    }
}
