//! The per-area key-value database and its merge protocol.
//!
//! Pure functions over an in-memory map; the area actor owns the map and
//! is the only caller. The merge delta returned here is the single source
//! of truth for both peer flooding and subscriber notification.

use lodestone_types::consts::{TTL_INFINITY_MS, TTL_THRESHOLD_MS};
use lodestone_types::{compare_values, KeyFilters, Value, ValueCompare};
use std::collections::HashMap;

/// Per-area database: key to the arbiter-maximum value seen so far.
pub type KeyValMap = HashMap<String, Value>;

/// Why an incoming record was not merged.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NoMergeReason {
    NoMatchedKey,
    InvalidTtl,
    OldVersion,
    NoNeedToUpdate,
}

/// Per-merge statistics, keyed by the rejected keys.
#[derive(Clone, Debug, Default)]
pub struct MergeStats {
    pub no_merge_reasons: HashMap<String, NoMergeReason>,
    pub no_matched_keys: u32,
    pub invalid_ttls: Vec<i64>,
    pub old_versions: Vec<u64>,
    pub no_need_to_update: u32,
}

impl MergeStats {
    fn record(&mut self, key: &str, reason: NoMergeReason) {
        match reason {
            NoMergeReason::NoMatchedKey => self.no_matched_keys += 1,
            NoMergeReason::NoNeedToUpdate => self.no_need_to_update += 1,
            _ => {}
        }
        self.no_merge_reasons.insert(key.to_string(), reason);
    }
}

/// Merge a batch of incoming records into the database.
///
/// Returns the delta: exactly the entries that changed the database, in
/// the form they should be flooded (full records for value changes,
/// ttl-only records for pure TTL refreshes).
pub fn merge_key_values(
    db: &mut KeyValMap,
    key_vals: KeyValMap,
    filters: Option<&KeyFilters>,
) -> (KeyValMap, MergeStats) {
    let mut delta = KeyValMap::new();
    let mut stats = MergeStats::default();

    for (key, mut value) in key_vals {
        if let Some(f) = filters {
            if !f.matches(&key, &value) {
                stats.record(&key, NoMergeReason::NoMatchedKey);
                continue;
            }
        }
        if value.ttl_ms != TTL_INFINITY_MS && value.ttl_ms <= TTL_THRESHOLD_MS {
            stats.invalid_ttls.push(value.ttl_ms);
            stats.record(&key, NoMergeReason::InvalidTtl);
            continue;
        }

        match db.get_mut(&key) {
            None => {
                // Only a full record can create a key.
                if value.body.is_full() {
                    value.ensure_hash();
                    delta.insert(key.clone(), value.clone());
                    db.insert(key, value);
                } else {
                    stats.record(&key, NoMergeReason::NoNeedToUpdate);
                }
            }
            Some(current) => match compare_values(&value, current) {
                ValueCompare::Greater if value.body.is_full() => {
                    value.ensure_hash();
                    delta.insert(key.clone(), value.clone());
                    *current = value;
                }
                ValueCompare::Greater => {
                    // Same identity proven by digest, newer ttl version:
                    // refresh in place, flood a value-less update.
                    apply_ttl_refresh(&key, &value, current, &mut delta);
                }
                ValueCompare::Less => {
                    stats.old_versions.push(value.version);
                    stats.record(&key, NoMergeReason::OldVersion);
                }
                ValueCompare::Equal => {
                    stats.record(&key, NoMergeReason::NoNeedToUpdate);
                }
                ValueCompare::Unknown => {
                    // A ttl-only record cannot be digest-matched; accept
                    // the refresh iff identity matches and it is newer.
                    if !value.body.is_full()
                        && value.version == current.version
                        && value.originator_id == current.originator_id
                        && value.ttl_version > current.ttl_version
                    {
                        apply_ttl_refresh(&key, &value, current, &mut delta);
                    } else {
                        // Full value stays put; sync will fetch the real
                        // record from the owner if hashes diverge.
                        stats.record(&key, NoMergeReason::NoNeedToUpdate);
                    }
                }
            },
        }
    }

    (delta, stats)
}

fn apply_ttl_refresh(key: &str, incoming: &Value, current: &mut Value, delta: &mut KeyValMap) {
    current.ttl_ms = incoming.ttl_ms;
    current.ttl_version = incoming.ttl_version;
    delta.insert(
        key.to_string(),
        Value::ttl_only(
            current.version,
            current.originator_id.clone(),
            current.ttl_ms,
            current.ttl_version,
        ),
    );
}

/// Filtered full dump. With `do_not_publish_value` the payloads are
/// replaced by their digests.
pub fn dump_all_with_filters(
    db: &KeyValMap,
    filters: &KeyFilters,
    do_not_publish_value: bool,
) -> KeyValMap {
    db.iter()
        .filter(|(k, v)| filters.matches(k, v))
        .filter_map(|(k, v)| {
            let out = if do_not_publish_value {
                v.to_hash_only()?
            } else {
                v.clone()
            };
            Some((k.clone(), out))
        })
        .collect()
}

/// Filtered hash dump: every value reduced to its digest.
pub fn dump_hash_with_filters(db: &KeyValMap, filters: &KeyFilters) -> KeyValMap {
    db.iter()
        .filter(|(k, v)| filters.matches(k, v))
        .filter_map(|(k, v)| Some((k.clone(), v.to_hash_only()?)))
        .collect()
}

/// Entries of `mine` that the holder of `theirs` needs: keys they lack,
/// and keys where our record is better or the order is unknown.
pub fn dump_difference(mine: &KeyValMap, theirs: &KeyValMap) -> KeyValMap {
    mine.iter()
        .filter(|(key, value)| match theirs.get(*key) {
            None => true,
            Some(other) => matches!(
                compare_values(value, other),
                ValueCompare::Greater | ValueCompare::Unknown
            ),
        })
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// Keys we should fetch from a peer, given their hash dump.
pub fn keys_to_request(local: &KeyValMap, peer_hashes: &KeyValMap) -> Vec<String> {
    peer_hashes
        .iter()
        .filter(|(key, peer_val)| match local.get(*key) {
            None => true,
            Some(mine) => matches!(
                compare_values(peer_val, mine),
                ValueCompare::Greater | ValueCompare::Unknown
            ),
        })
        .map(|(k, _)| k.clone())
        .collect()
}

/// Restamp remaining TTLs on an outgoing batch and apply the per-hop
/// decrement. Entries that would arrive already expired are dropped.
pub fn update_publication_ttl(
    remaining_ms: impl Fn(&str, &Value) -> Option<i64>,
    ttl_decrement_ms: i64,
    key_vals: &mut KeyValMap,
) {
    key_vals.retain(|key, value| {
        if value.ttl_ms == TTL_INFINITY_MS {
            return true;
        }
        match remaining_ms(key, value) {
            Some(left) => {
                let left = left - ttl_decrement_ms;
                if left > TTL_THRESHOLD_MS {
                    value.ttl_ms = left;
                    true
                } else {
                    false
                }
            }
            // No countdown record: keep the emitted ttl, decremented.
            None => {
                value.ttl_ms -= ttl_decrement_ms;
                value.ttl_ms > TTL_THRESHOLD_MS
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use lodestone_types::FilterOperator;

    fn full(version: u64, orig: &str, val: &[u8]) -> Value {
        Value::full(version, orig, val.to_vec(), 30_000, 1)
    }

    #[test]
    fn set_then_lookup() {
        let mut db = KeyValMap::new();
        let v = full(1, "A", b"x");
        let (delta, stats) = merge_key_values(
            &mut db,
            [("k1".to_string(), v.clone())].into(),
            None,
        );
        assert_eq!(delta.len(), 1);
        assert!(stats.no_merge_reasons.is_empty());
        assert_eq!(db.get("k1").unwrap().value(), Some(&b"x"[..]));
    }

    #[test]
    fn higher_version_replaces() {
        let mut db = KeyValMap::from([("k1".to_string(), full(1, "A", b"x"))]);
        let (delta, _) = merge_key_values(
            &mut db,
            [("k1".to_string(), full(2, "A", b"y"))].into(),
            None,
        );
        assert_eq!(db.get("k1").unwrap().version, 2);
        assert_eq!(db.get("k1").unwrap().value(), Some(&b"y"[..]));
        assert_eq!(delta.get("k1").unwrap().value(), Some(&b"y"[..]));
    }

    #[test]
    fn originator_tiebreak() {
        let mut db = KeyValMap::from([("k1".to_string(), full(1, "A", b"x"))]);
        let (delta, _) = merge_key_values(
            &mut db,
            [("k1".to_string(), full(1, "B", b"y"))].into(),
            None,
        );
        assert_eq!(db.get("k1").unwrap().originator_id, "B");
        assert_eq!(db.get("k1").unwrap().value(), Some(&b"y"[..]));
        assert_eq!(delta.len(), 1);
    }

    #[test]
    fn older_version_rejected() {
        let mut db = KeyValMap::from([("k1".to_string(), full(5, "A", b"x"))]);
        let (delta, stats) = merge_key_values(
            &mut db,
            [("k1".to_string(), full(4, "A", b"y"))].into(),
            None,
        );
        assert!(delta.is_empty());
        assert_eq!(
            stats.no_merge_reasons.get("k1"),
            Some(&NoMergeReason::OldVersion)
        );
        assert_eq!(stats.old_versions, vec![4]);
    }

    #[test]
    fn ttl_only_refreshes_but_never_creates() {
        let mut db = KeyValMap::new();
        let refresh = Value::ttl_only(1, "A", 50_000, 2);

        // cannot create
        let (delta, stats) = merge_key_values(
            &mut db,
            [("k1".to_string(), refresh.clone())].into(),
            None,
        );
        assert!(delta.is_empty());
        assert!(db.is_empty());
        assert_eq!(
            stats.no_merge_reasons.get("k1"),
            Some(&NoMergeReason::NoNeedToUpdate)
        );

        // refreshes matching (version, originator)
        db.insert("k1".to_string(), full(1, "A", b"x"));
        let (delta, _) = merge_key_values(&mut db, [("k1".to_string(), refresh)].into(), None);
        let stored = db.get("k1").unwrap();
        assert_eq!(stored.value(), Some(&b"x"[..]), "value untouched");
        assert_eq!(stored.ttl_ms, 50_000);
        assert_eq!(stored.ttl_version, 2);
        let flooded = delta.get("k1").unwrap();
        assert!(flooded.value().is_none(), "delta is value-less");
        assert_eq!(flooded.ttl_version, 2);
    }

    #[test]
    fn ttl_only_with_stale_ttl_version_ignored() {
        let mut db = KeyValMap::from([("k1".to_string(), {
            let mut v = full(1, "A", b"x");
            v.ttl_version = 5;
            v
        })]);
        let (delta, _) = merge_key_values(
            &mut db,
            [("k1".to_string(), Value::ttl_only(1, "A", 50_000, 4))].into(),
            None,
        );
        assert!(delta.is_empty());
        assert_eq!(db.get("k1").unwrap().ttl_version, 5);
    }

    #[test]
    fn hash_only_never_overwrites_even_when_newer() {
        let mut db = KeyValMap::from([("k1".to_string(), full(1, "A", b"x"))]);
        let newer_hash_only = full(2, "A", b"y").to_hash_only().unwrap();
        let (delta, _) = merge_key_values(
            &mut db,
            [("k1".to_string(), newer_hash_only)].into(),
            None,
        );
        assert!(delta.is_empty());
        assert_eq!(db.get("k1").unwrap().version, 1);
        assert_eq!(db.get("k1").unwrap().value(), Some(&b"x"[..]));
    }

    #[test]
    fn expired_incoming_rejected() {
        let mut db = KeyValMap::new();
        let mut v = full(1, "A", b"x");
        v.ttl_ms = TTL_THRESHOLD_MS;
        let (delta, stats) = merge_key_values(&mut db, [("k1".to_string(), v)].into(), None);
        assert!(delta.is_empty());
        assert_eq!(stats.invalid_ttls, vec![TTL_THRESHOLD_MS]);
    }

    #[test]
    fn admission_filter_skips_unmatched() {
        let filters =
            KeyFilters::new(vec!["adj:".into()], [], FilterOperator::Or).unwrap();
        let mut db = KeyValMap::new();
        let (delta, stats) = merge_key_values(
            &mut db,
            [
                ("adj:n1".to_string(), full(1, "A", b"x")),
                ("prefix:n1".to_string(), full(1, "A", b"y")),
            ]
            .into(),
            Some(&filters),
        );
        assert_eq!(delta.len(), 1);
        assert!(delta.contains_key("adj:n1"));
        assert_eq!(
            stats.no_merge_reasons.get("prefix:n1"),
            Some(&NoMergeReason::NoMatchedKey)
        );
    }

    #[test]
    fn merge_is_idempotent() {
        let mut db = KeyValMap::from([("k1".to_string(), full(1, "A", b"x"))]);
        let incoming = KeyValMap::from([
            ("k1".to_string(), full(2, "A", b"y")),
            ("k2".to_string(), full(1, "B", b"z")),
        ]);
        let (delta, _) = merge_key_values(&mut db, incoming, None);
        let snapshot = db.clone();
        let (delta2, _) = merge_key_values(&mut db, delta, None);
        assert!(delta2.is_empty(), "re-applying a delta changes nothing");
        assert_eq!(db, snapshot);
    }

    #[test]
    fn difference_includes_missing_and_better() {
        let mine = KeyValMap::from([
            ("a".to_string(), full(2, "A", b"x")),
            ("b".to_string(), full(1, "A", b"y")),
            ("c".to_string(), full(1, "A", b"z")),
        ]);
        let theirs = KeyValMap::from([
            ("b".to_string(), full(1, "A", b"y")),
            ("c".to_string(), full(3, "A", b"w")),
        ]);
        let diff = dump_difference(&mine, &theirs);
        assert!(diff.contains_key("a"), "they lack it");
        assert!(!diff.contains_key("b"), "identical");
        assert!(!diff.contains_key("c"), "theirs is better");
    }

    #[test]
    fn hash_dump_and_request_computation() {
        let local = KeyValMap::from([
            ("same".to_string(), full(1, "A", b"x")),
            ("stale".to_string(), full(1, "A", b"y")),
        ]);
        let mut remote = local.clone();
        remote.insert("stale".to_string(), full(2, "A", b"y2"));
        remote.insert("new".to_string(), full(1, "B", b"z"));

        let peer_hashes = dump_hash_with_filters(&remote, &KeyFilters::match_all());
        let mut need = keys_to_request(&local, &peer_hashes);
        need.sort();
        assert_eq!(need, vec!["new".to_string(), "stale".to_string()]);
    }
}
