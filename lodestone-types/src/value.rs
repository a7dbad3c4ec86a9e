//! The versioned, TTL-carrying record replicated between stores.

use std::fmt;

/// Identifier of a flooding partition within a node.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AreaId(pub String);

impl AreaId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AreaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AreaId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Payload portion of a [`Value`].
///
/// Hash-only records travel in hash dumps during full sync; TTL-only
/// records refresh the countdown of an existing entry. Neither may create
/// a key or overwrite a full value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ValueBody {
    /// Full payload, with the digest if one was attached at origination.
    Full { value: Vec<u8>, hash: Option<u64> },
    /// Digest of `(version, originator_id, value)` with the payload omitted.
    HashOnly(u64),
    /// Neither payload nor digest: a TTL/ttl-version refresh.
    TtlOnly,
}

impl ValueBody {
    pub fn is_full(&self) -> bool {
        matches!(self, ValueBody::Full { .. })
    }
}

/// The atomic replicated unit: one revision of one key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Value {
    /// Monotonic per key; the primary merge tiebreak.
    pub version: u64,
    /// Node that minted this revision; lexicographic max wins version ties.
    pub originator_id: String,
    pub body: ValueBody,
    /// Time remaining when emitted, decremented per hop.
    pub ttl_ms: i64,
    /// Monotonic per (key, version, originator); lets the originator refresh
    /// TTL without bumping the version.
    pub ttl_version: u64,
}

impl Value {
    /// A full record as a local writer would originate it, digest attached.
    pub fn full(
        version: u64,
        originator_id: impl Into<String>,
        value: Vec<u8>,
        ttl_ms: i64,
        ttl_version: u64,
    ) -> Self {
        let originator_id = originator_id.into();
        let hash = hash_value(version, &originator_id, &value);
        Self {
            version,
            originator_id,
            body: ValueBody::Full {
                value,
                hash: Some(hash),
            },
            ttl_ms,
            ttl_version,
        }
    }

    /// A TTL refresh record for an existing `(version, originator)`.
    pub fn ttl_only(
        version: u64,
        originator_id: impl Into<String>,
        ttl_ms: i64,
        ttl_version: u64,
    ) -> Self {
        Self {
            version,
            originator_id: originator_id.into(),
            body: ValueBody::TtlOnly,
            ttl_ms,
            ttl_version,
        }
    }

    /// The full payload, if this record carries one.
    pub fn value(&self) -> Option<&[u8]> {
        match &self.body {
            ValueBody::Full { value, .. } => Some(value),
            _ => None,
        }
    }

    /// The digest known for this record: stored, carried, or (for full
    /// records without one) computed on the fly.
    pub fn hash(&self) -> Option<u64> {
        match &self.body {
            ValueBody::Full { value, hash } => {
                Some(hash.unwrap_or_else(|| hash_value(self.version, &self.originator_id, value)))
            }
            ValueBody::HashOnly(h) => Some(*h),
            ValueBody::TtlOnly => None,
        }
    }

    /// Attach the computed digest to a full record that lacks one.
    pub fn ensure_hash(&mut self) {
        if let ValueBody::Full { value, hash } = &mut self.body {
            if hash.is_none() {
                *hash = Some(hash_value(self.version, &self.originator_id, value));
            }
        }
    }

    /// The same record with the payload replaced by its digest.
    pub fn to_hash_only(&self) -> Option<Value> {
        self.hash().map(|h| Value {
            version: self.version,
            originator_id: self.originator_id.clone(),
            body: ValueBody::HashOnly(h),
            ttl_ms: self.ttl_ms,
            ttl_version: self.ttl_version,
        })
    }
}

/// Deterministic 64-bit digest of `(version, originator_id, value)`.
///
/// Low 8 bytes of the blake3 digest, little-endian. Stable across
/// processes and platforms, which hash-dump diffing depends on.
pub fn hash_value(version: u64, originator_id: &str, value: &[u8]) -> u64 {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&version.to_le_bytes());
    hasher.update(&(originator_id.len() as u64).to_le_bytes());
    hasher.update(originator_id.as_bytes());
    hasher.update(value);
    let digest = hasher.finalize();
    let mut out = [0u8; 8];
    out.copy_from_slice(&digest.as_bytes()[..8]);
    u64::from_le_bytes(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_depends_only_on_identity_fields() {
        let a = Value::full(1, "node-a", b"payload".to_vec(), 30_000, 1);
        let mut b = a.clone();
        b.ttl_ms = 5;
        b.ttl_version = 42;
        assert_eq!(a.hash(), b.hash());

        let c = Value::full(2, "node-a", b"payload".to_vec(), 30_000, 1);
        assert_ne!(a.hash(), c.hash());
    }

    #[test]
    fn hash_unambiguous_across_field_boundary() {
        // originator/value boundary is length-prefixed, so shifting bytes
        // between the two fields must change the digest
        assert_ne!(hash_value(1, "ab", b"c"), hash_value(1, "a", b"bc"));
    }

    #[test]
    fn ttl_only_has_no_hash() {
        let v = Value::ttl_only(1, "node-a", 30_000, 2);
        assert_eq!(v.hash(), None);
        assert!(v.to_hash_only().is_none());
    }
}
