//! TTL countdown for a single area.
//!
//! A min-heap ordered by expiry plus a latest-record map. Heap entries go
//! stale when a key is re-merged; they are skipped when popped if they no
//! longer match the latest record.

use lodestone_types::consts::{TTL_INFINITY_MS, TTL_THRESHOLD_MS};
use lodestone_types::Value;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::time::Duration;
use tokio::time::Instant;

/// Entries are evicted once their remaining TTL falls to the threshold,
/// not at zero.
const THRESHOLD: Duration = Duration::from_millis(TTL_THRESHOLD_MS as u64);

/// Identity of the record a countdown was armed for.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TtlRecord {
    pub expires_at: Instant,
    pub version: u64,
    pub originator_id: String,
    pub ttl_version: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct HeapEntry {
    expires_at: Instant,
    key: String,
    version: u64,
    originator_id: String,
    ttl_version: u64,
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.expires_at
            .cmp(&other.expires_at)
            .then_with(|| self.key.cmp(&other.key))
    }
}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Default)]
pub struct TtlCountdownQueue {
    heap: BinaryHeap<Reverse<HeapEntry>>,
    latest: HashMap<String, TtlRecord>,
}

impl TtlCountdownQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm (or re-arm) the countdown for a just-merged record. Records
    /// with infinite TTL are tracked without a heap entry.
    pub fn upsert(&mut self, key: &str, value: &Value, now: Instant) {
        if value.ttl_ms == TTL_INFINITY_MS {
            self.latest.remove(key);
            return;
        }
        let expires_at = now + std::time::Duration::from_millis(value.ttl_ms.max(0) as u64);
        let record = TtlRecord {
            expires_at,
            version: value.version,
            originator_id: value.originator_id.clone(),
            ttl_version: value.ttl_version,
        };
        self.heap.push(Reverse(HeapEntry {
            expires_at,
            key: key.to_string(),
            version: record.version,
            originator_id: record.originator_id.clone(),
            ttl_version: record.ttl_version,
        }));
        self.latest.insert(key.to_string(), record);
    }

    pub fn remove(&mut self, key: &str) {
        self.latest.remove(key);
    }

    /// Milliseconds left for a record matching this value's identity.
    pub fn remaining_ms(&self, key: &str, value: &Value, now: Instant) -> Option<i64> {
        let record = self.latest.get(key)?;
        if record.version != value.version || record.originator_id != value.originator_id {
            return None;
        }
        Some(record.expires_at.saturating_duration_since(now).as_millis() as i64)
    }

    /// Earliest live eviction deadline, skipping stale heap entries.
    pub fn next_deadline(&mut self) -> Option<Instant> {
        while let Some(Reverse(top)) = self.heap.peek() {
            if self.is_live(top) {
                return Some(top.expires_at - THRESHOLD);
            }
            self.heap.pop();
        }
        None
    }

    /// Pop every record whose remaining TTL has reached the threshold;
    /// stale entries are discarded silently.
    pub fn pop_expired(&mut self, now: Instant) -> Vec<(String, TtlRecord)> {
        let mut expired = Vec::new();
        while let Some(Reverse(top)) = self.heap.peek() {
            if top.expires_at - THRESHOLD > now {
                break;
            }
            let entry = self.heap.pop().expect("peeked").0;
            if self.is_live(&entry) {
                if let Some(record) = self.latest.remove(&entry.key) {
                    expired.push((entry.key, record));
                }
            }
        }
        expired
    }

    fn is_live(&self, entry: &HeapEntry) -> bool {
        self.latest.get(&entry.key).is_some_and(|r| {
            r.expires_at == entry.expires_at
                && r.version == entry.version
                && r.originator_id == entry.originator_id
                && r.ttl_version == entry.ttl_version
        })
    }

    pub fn len(&self) -> usize {
        self.latest.len()
    }

    pub fn is_empty(&self) -> bool {
        self.latest.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn val(ttl_ms: i64, ttl_version: u64) -> Value {
        Value::full(1, "A", b"x".to_vec(), ttl_ms, ttl_version)
    }

    #[test]
    fn earliest_deadline_first() {
        let now = Instant::now();
        let mut q = TtlCountdownQueue::new();
        q.upsert("slow", &val(10_000, 1), now);
        q.upsert("fast", &val(1_000, 1), now);
        let deadline = q.next_deadline().unwrap();
        assert_eq!(deadline, now + Duration::from_millis(1_000) - THRESHOLD);
    }

    #[test]
    fn refresh_supersedes_old_entry() {
        let now = Instant::now();
        let mut q = TtlCountdownQueue::new();
        q.upsert("k", &val(1_000, 1), now);
        q.upsert("k", &val(30_000, 2), now);

        // old heap entry is stale; nothing expires at the old deadline
        let expired = q.pop_expired(now + Duration::from_millis(1_500));
        assert!(expired.is_empty());
        assert_eq!(q.len(), 1);

        let expired = q.pop_expired(now + Duration::from_millis(30_001));
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].0, "k");
        assert!(q.is_empty());
    }

    #[test]
    fn infinite_ttl_never_queued() {
        let now = Instant::now();
        let mut q = TtlCountdownQueue::new();
        q.upsert("k", &val(TTL_INFINITY_MS, 1), now);
        assert!(q.next_deadline().is_none());
        assert!(q.pop_expired(now + Duration::from_secs(3600)).is_empty());
    }

    #[test]
    fn remaining_requires_matching_identity() {
        let now = Instant::now();
        let mut q = TtlCountdownQueue::new();
        q.upsert("k", &val(5_000, 1), now);
        let later = now + Duration::from_millis(2_000);
        let left = q.remaining_ms("k", &val(5_000, 1), later).unwrap();
        assert!((2_900..=3_000).contains(&left));

        let other_version = Value::full(9, "A", b"x".to_vec(), 5_000, 1);
        assert!(q.remaining_ms("k", &other_version, later).is_none());
    }
}
