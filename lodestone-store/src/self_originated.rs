//! Keys this node originated, and their refresh schedule.
//!
//! Only the originator keeps a key alive: before the advertised TTL runs
//! down past the refresh threshold, the ttl version is bumped and the
//! record re-merged and re-flooded. Value and version stay untouched.

use lodestone_types::consts::TTL_REFRESH_FACTOR;
use lodestone_types::{Value, ValueBody};
use std::collections::HashMap;
use tokio::time::Instant;

#[derive(Clone, Debug)]
struct SelfEntry {
    value: Value,
    refresh_at: Option<Instant>,
}

#[derive(Debug)]
pub struct SelfOriginatedTable {
    node_id: String,
    entries: HashMap<String, SelfEntry>,
}

impl SelfOriginatedTable {
    pub fn new(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            entries: HashMap::new(),
        }
    }

    /// Track a key written locally. Infinite-TTL keys are tracked (for
    /// version-bump recovery) but never scheduled for refresh.
    pub fn upsert(&mut self, key: &str, value: Value, now: Instant) {
        debug_assert!(value.body.is_full());
        let refresh_at = refresh_deadline(&value, now);
        self.entries
            .insert(key.to_string(), SelfEntry { value, refresh_at });
    }

    pub fn remove(&mut self, key: &str) {
        self.entries.remove(key);
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn next_refresh(&self) -> Option<Instant> {
        self.entries.values().filter_map(|e| e.refresh_at).min()
    }

    /// Bump and return refresh records for every entry that is due.
    /// The returned values are value-less (ttl/ttl-version only).
    pub fn take_due_refreshes(&mut self, now: Instant) -> Vec<(String, Value)> {
        let mut due = Vec::new();
        for (key, entry) in self.entries.iter_mut() {
            let Some(at) = entry.refresh_at else { continue };
            if at > now {
                continue;
            }
            entry.value.ttl_version += 1;
            entry.refresh_at = refresh_deadline(&entry.value, now);
            due.push((
                key.clone(),
                Value::ttl_only(
                    entry.value.version,
                    entry.value.originator_id.clone(),
                    entry.value.ttl_ms,
                    entry.value.ttl_version,
                ),
            ));
        }
        due
    }

    /// Called when a merge displaced a key we originated.
    ///
    /// If the winner was minted under our own name at a higher version
    /// (residue of a previous incarnation of this node), we reclaim the
    /// key by re-advertising our payload above the winner's version.
    /// A winner from another node means the key changed hands; stop
    /// tracking it.
    pub fn handle_displaced(
        &mut self,
        key: &str,
        winner: &Value,
        now: Instant,
    ) -> Option<(String, Value)> {
        if !self.entries.contains_key(key) {
            return None;
        }
        if winner.originator_id != self.node_id {
            self.entries.remove(key);
            return None;
        }
        let entry = self.entries.get_mut(key)?;
        if winner.version <= entry.value.version {
            return None;
        }
        let payload = match &entry.value.body {
            ValueBody::Full { value, .. } => value.clone(),
            _ => return None,
        };
        entry.value = Value::full(
            winner.version + 1,
            self.node_id.clone(),
            payload,
            entry.value.ttl_ms,
            1,
        );
        entry.refresh_at = refresh_deadline(&entry.value, now);
        Some((key.to_string(), entry.value.clone()))
    }
}

fn refresh_deadline(value: &Value, now: Instant) -> Option<Instant> {
    if value.ttl_ms == lodestone_types::consts::TTL_INFINITY_MS {
        return None;
    }
    let refresh_after_ms = (value.ttl_ms as f64 * (1.0 - TTL_REFRESH_FACTOR)) as u64;
    Some(now + std::time::Duration::from_millis(refresh_after_ms))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn refresh_bumps_ttl_version_only() {
        let now = Instant::now();
        let mut table = SelfOriginatedTable::new("node-1");
        table.upsert("k", Value::full(3, "node-1", b"x".to_vec(), 10_000, 1), now);

        assert!(table.take_due_refreshes(now).is_empty(), "not due yet");

        let due_at = table.next_refresh().unwrap();
        let refreshed = table.take_due_refreshes(due_at + Duration::from_millis(1));
        assert_eq!(refreshed.len(), 1);
        let (key, value) = &refreshed[0];
        assert_eq!(key, "k");
        assert!(value.value().is_none(), "refresh is value-less");
        assert_eq!(value.version, 3);
        assert_eq!(value.ttl_version, 2);
    }

    #[test]
    fn reclaims_key_from_own_stale_residue() {
        let now = Instant::now();
        let mut table = SelfOriginatedTable::new("node-1");
        table.upsert("k", Value::full(1, "node-1", b"mine".to_vec(), 10_000, 1), now);

        let residue = Value::full(7, "node-1", b"old-boot".to_vec(), 10_000, 1);
        let (key, readvertised) = table.handle_displaced("k", &residue, now).unwrap();
        assert_eq!(key, "k");
        assert_eq!(readvertised.version, 8);
        assert_eq!(readvertised.value(), Some(&b"mine"[..]));
    }

    #[test]
    fn foreign_winner_releases_the_key() {
        let now = Instant::now();
        let mut table = SelfOriginatedTable::new("node-1");
        table.upsert("k", Value::full(1, "node-1", b"mine".to_vec(), 10_000, 1), now);

        let foreign = Value::full(2, "node-2", b"theirs".to_vec(), 10_000, 1);
        assert!(table.handle_displaced("k", &foreign, now).is_none());
        assert!(!table.contains("k"));
    }
}
