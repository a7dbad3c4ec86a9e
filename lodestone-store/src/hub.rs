//! Fan-out of merge deltas to in-process subscribers.
//!
//! Each area actor owns one hub, so snapshot-then-stream registration is
//! atomic with respect to that area's merges and delivery order matches
//! merge order. A subscription spanning several areas registers with each
//! of their hubs under one shared queue and cancellation flag.

use crate::error::StoreError;
use lodestone_types::consts::SUBSCRIBER_QUEUE_BOUND;
use lodestone_types::{AreaId, KeyFilters, Value, ValueBody};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// One batch of changes delivered to subscribers.
#[derive(Clone, Debug)]
pub struct Publication {
    pub area: AreaId,
    pub key_vals: HashMap<String, Value>,
    pub expired_keys: Vec<String>,
    pub timestamp_ms: i64,
}

/// What a subscriber asked for.
#[derive(Clone, Debug)]
pub struct SubscriptionSpec {
    pub filters: KeyFilters,
    /// Empty set subscribes to every configured area.
    pub areas: HashSet<AreaId>,
    /// Drop value-less TTL refreshes instead of delivering them.
    pub ignore_ttl: bool,
    /// Deliver digests instead of payloads.
    pub do_not_publish_value: bool,
}

/// Consumer side of a subscription.
pub struct SubscriptionHandle {
    rx: mpsc::Receiver<Publication>,
    cancelled: Arc<AtomicBool>,
    lagged: Arc<AtomicBool>,
}

impl std::fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("cancelled", &self.cancelled.load(Ordering::Relaxed))
            .field("lagged", &self.lagged.load(Ordering::Relaxed))
            .finish()
    }
}

impl SubscriptionHandle {
    /// Next publication. After the stream ends, returns `Lagged` if the
    /// hub cancelled us for falling behind, `None` on clean shutdown.
    pub async fn recv(&mut self) -> Result<Option<Publication>, StoreError> {
        match self.rx.recv().await {
            Some(p) => Ok(Some(p)),
            None if self.lagged.load(Ordering::Acquire) => Err(StoreError::Lagged),
            None => Ok(None),
        }
    }

    /// Cancel from the consumer side.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.cancelled.store(true, Ordering::Release);
    }
}

/// Producer-side registration shared with area hubs.
#[derive(Clone)]
pub struct Subscription {
    pub spec: Arc<SubscriptionSpec>,
    tx: mpsc::Sender<Publication>,
    cancelled: Arc<AtomicBool>,
    lagged: Arc<AtomicBool>,
}

impl Subscription {
    /// Create the shared pipe between one consumer and the area hubs.
    pub fn create(spec: SubscriptionSpec) -> (Subscription, SubscriptionHandle) {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_QUEUE_BOUND);
        let cancelled = Arc::new(AtomicBool::new(false));
        let lagged = Arc::new(AtomicBool::new(false));
        (
            Subscription {
                spec: Arc::new(spec),
                tx,
                cancelled: cancelled.clone(),
                lagged: lagged.clone(),
            },
            SubscriptionHandle {
                rx,
                cancelled,
                lagged,
            },
        )
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    fn mark_lagged(&self) {
        self.lagged.store(true, Ordering::Release);
        self.cancelled.store(true, Ordering::Release);
    }
}

/// Project a publication through a subscription's filter and flags.
/// Returns None when nothing survives.
pub fn project(spec: &SubscriptionSpec, publication: &Publication) -> Option<Publication> {
    if !spec.areas.is_empty() && !spec.areas.contains(&publication.area) {
        return None;
    }
    let key_vals: HashMap<String, Value> = publication
        .key_vals
        .iter()
        .filter(|(k, v)| spec.filters.matches(k, v))
        .filter(|(_, v)| !(spec.ignore_ttl && matches!(v.body, ValueBody::TtlOnly)))
        .map(|(k, v)| {
            let value = if spec.do_not_publish_value {
                v.to_hash_only().unwrap_or_else(|| v.clone())
            } else {
                v.clone()
            };
            (k.clone(), value)
        })
        .collect();
    let expired_keys: Vec<String> = publication
        .expired_keys
        .iter()
        .filter(|k| spec.filters.matches_key_only(k))
        .cloned()
        .collect();

    if key_vals.is_empty() && expired_keys.is_empty() {
        return None;
    }
    Some(Publication {
        area: publication.area.clone(),
        key_vals,
        expired_keys,
        timestamp_ms: publication.timestamp_ms,
    })
}

/// The per-area registry.
#[derive(Default)]
pub struct AreaHub {
    subscriptions: Vec<Subscription>,
}

impl AreaHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, subscription: Subscription) {
        self.subscriptions.push(subscription);
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscriptions.len()
    }

    /// Deliver a publication to every matching live subscriber.
    ///
    /// A full queue cancels that subscription alone; other subscribers
    /// and the merge path are unaffected.
    pub fn publish(&mut self, publication: &Publication) {
        self.subscriptions.retain(|sub| {
            if sub.is_cancelled() {
                return false;
            }
            let Some(projected) = project(&sub.spec, publication) else {
                return true;
            };
            match sub.tx.try_send(projected) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::warn!(
                        area = %publication.area,
                        "subscriber lagged, cancelling subscription"
                    );
                    sub.mark_lagged();
                    false
                }
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            }
        });
    }
}
