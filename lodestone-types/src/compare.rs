//! The merge arbiter: a deterministic order over [`Value`]s.
//!
//! Every node runs the same comparison, so any interleaving of
//! publications converges on the same winner per key.

use crate::value::{Value, ValueBody};
use std::cmp::Ordering;

/// Outcome of comparing two values.
///
/// `Unknown` is a first-class result: a record without a full payload can
/// never displace one that has it, even at a higher version. Callers treat
/// `Unknown` as "fetch the full value from the owner".
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ValueCompare {
    /// The first value wins.
    Greater,
    /// The second value wins.
    Less,
    Equal,
    Unknown,
}

impl ValueCompare {
    pub fn flip(self) -> Self {
        match self {
            ValueCompare::Greater => ValueCompare::Less,
            ValueCompare::Less => ValueCompare::Greater,
            other => other,
        }
    }
}

/// Compare two values for merge.
///
/// Rules, in order:
/// 1. Higher version wins, provided the winner carries a full payload;
///    a hash-only or ttl-only record at a newer version yields `Unknown`.
/// 2. Versions equal, both full: greater originator, then greater value
///    bytes, then greater ttl version.
/// 3. Versions equal, payload missing on either side: `Unknown` unless
///    originator and digest match exactly, in which case only the ttl
///    version can differ.
pub fn compare_values(a: &Value, b: &Value) -> ValueCompare {
    if a.version != b.version {
        let (winner, outcome) = if a.version > b.version {
            (a, ValueCompare::Greater)
        } else {
            (b, ValueCompare::Less)
        };
        return if winner.body.is_full() {
            outcome
        } else {
            ValueCompare::Unknown
        };
    }

    match (&a.body, &b.body) {
        (ValueBody::Full { value: av, .. }, ValueBody::Full { value: bv, .. }) => {
            let ord = a
                .originator_id
                .cmp(&b.originator_id)
                .then_with(|| av.cmp(bv))
                .then_with(|| a.ttl_version.cmp(&b.ttl_version));
            from_ordering(ord)
        }
        _ => {
            // A digest tie is the only way a payload-less record can be
            // ordered: it proves (version, originator, value) all match.
            let hashes_match = match (a.hash(), b.hash()) {
                (Some(ha), Some(hb)) => ha == hb,
                _ => false,
            };
            if a.originator_id == b.originator_id && hashes_match {
                from_ordering(a.ttl_version.cmp(&b.ttl_version))
            } else {
                ValueCompare::Unknown
            }
        }
    }
}

fn from_ordering(ord: Ordering) -> ValueCompare {
    match ord {
        Ordering::Greater => ValueCompare::Greater,
        Ordering::Less => ValueCompare::Less,
        Ordering::Equal => ValueCompare::Equal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full(version: u64, orig: &str, val: &[u8], ttl_version: u64) -> Value {
        Value::full(version, orig, val.to_vec(), 30_000, ttl_version)
    }

    #[test]
    fn higher_version_wins() {
        let a = full(2, "a", b"x", 1);
        let b = full(1, "z", b"y", 9);
        assert_eq!(compare_values(&a, &b), ValueCompare::Greater);
        assert_eq!(compare_values(&b, &a), ValueCompare::Less);
    }

    #[test]
    fn originator_breaks_version_tie() {
        let a = full(1, "a", b"x", 1);
        let b = full(1, "b", b"y", 1);
        assert_eq!(compare_values(&a, &b), ValueCompare::Less);
    }

    #[test]
    fn value_bytes_break_originator_tie() {
        let a = full(1, "a", b"xx", 1);
        let b = full(1, "a", b"xy", 1);
        assert_eq!(compare_values(&a, &b), ValueCompare::Less);
    }

    #[test]
    fn ttl_version_breaks_value_tie() {
        let a = full(1, "a", b"x", 2);
        let b = full(1, "a", b"x", 1);
        assert_eq!(compare_values(&a, &b), ValueCompare::Greater);
        assert_eq!(compare_values(&a, &a.clone()), ValueCompare::Equal);
    }

    #[test]
    fn newer_hash_only_is_unknown() {
        let stored = full(1, "a", b"x", 1);
        let newer_hash_only = full(2, "a", b"y", 1).to_hash_only().unwrap();
        assert_eq!(compare_values(&newer_hash_only, &stored), ValueCompare::Unknown);
        assert_eq!(compare_values(&stored, &newer_hash_only), ValueCompare::Unknown);
    }

    #[test]
    fn matching_hash_only_orders_by_ttl_version() {
        let stored = full(3, "a", b"x", 1);
        let mut refreshed = stored.to_hash_only().unwrap();
        refreshed.ttl_version = 2;
        assert_eq!(compare_values(&refreshed, &stored), ValueCompare::Greater);
    }

    #[test]
    fn mismatched_hash_only_is_unknown() {
        let stored = full(1, "a", b"x", 1);
        let other = full(1, "a", b"different", 1).to_hash_only().unwrap();
        assert_eq!(compare_values(&other, &stored), ValueCompare::Unknown);
    }
}
