//! Per-area peer table and sync state machine.
//!
//! A peer moves Idle -> Syncing -> Established; any transport failure or
//! sync timeout sends it back to Idle with an exponential backoff before
//! the next attempt. Flood traffic rides a bounded per-peer queue owned
//! by the peer's link task; overflow drops the link and forces a resync.

use lodestone_types::consts::{BACKOFF_MAX, BACKOFF_MIN};
use lodestone_types::wire::{StoreRequest, WirePeerInfo};
use rand::Rng;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PeerSyncState {
    Idle,
    Syncing,
    Established,
}

impl PeerSyncState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PeerSyncState::Idle => "idle",
            PeerSyncState::Syncing => "syncing",
            PeerSyncState::Established => "established",
        }
    }
}

/// Exponential backoff with +/-25% jitter.
#[derive(Debug)]
pub struct Backoff {
    current: Duration,
}

impl Backoff {
    pub fn new() -> Self {
        Self {
            current: BACKOFF_MIN,
        }
    }

    pub fn reset(&mut self) {
        self.current = BACKOFF_MIN;
    }

    /// The next wait, growing the window for the attempt after it.
    pub fn next_wait(&mut self) -> Duration {
        let base = self.current;
        self.current = (self.current * 2).min(BACKOFF_MAX);
        let jitter = rand::thread_rng().gen_range(0.75..1.25);
        base.mul_f64(jitter)
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
pub struct Peer {
    pub name: String,
    pub addr: SocketAddr,
    pub state: PeerSyncState,
    pub backoff: Backoff,
    /// Next moment a sync attempt is allowed.
    pub retry_at: Instant,
    /// Bounded queue into the peer's link task; None until spawned.
    pub flood_tx: Option<mpsc::Sender<StoreRequest>>,
}

impl Peer {
    pub fn new(name: String, addr: SocketAddr) -> Self {
        Self {
            name,
            addr,
            state: PeerSyncState::Idle,
            backoff: Backoff::new(),
            retry_at: Instant::now(),
            flood_tx: None,
        }
    }

    pub fn info(&self) -> WirePeerInfo {
        WirePeerInfo {
            peer_name: self.name.clone(),
            addr: self.addr.to_string(),
            state: self.state.as_str().to_string(),
        }
    }

    /// Record a failed sync or a dropped link: back to Idle, next attempt
    /// after the backoff window.
    pub fn mark_failed(&mut self, now: Instant) {
        self.state = PeerSyncState::Idle;
        self.retry_at = now + self.backoff.next_wait();
    }

    pub fn mark_established(&mut self) {
        self.state = PeerSyncState::Established;
        self.backoff.reset();
    }

    pub fn sync_due(&self, now: Instant) -> bool {
        self.state == PeerSyncState::Idle && self.retry_at <= now
    }
}

#[derive(Debug, Default)]
pub struct PeerTable {
    peers: HashMap<String, Peer>,
}

impl PeerTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, peer: Peer) -> Option<Peer> {
        self.peers.insert(peer.name.clone(), peer)
    }

    pub fn remove(&mut self, name: &str) -> Option<Peer> {
        self.peers.remove(name)
    }

    pub fn get(&self, name: &str) -> Option<&Peer> {
        self.peers.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Peer> {
        self.peers.get_mut(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Peer> {
        self.peers.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Peer> {
        self.peers.values_mut()
    }

    pub fn names(&self) -> Vec<String> {
        self.peers.keys().cloned().collect()
    }

    pub fn infos(&self) -> Vec<WirePeerInfo> {
        let mut infos: Vec<_> = self.peers.values().map(Peer::info).collect();
        infos.sort_by(|a, b| a.peer_name.cmp(&b.peer_name));
        infos
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}
