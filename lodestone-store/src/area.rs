//! The per-area actor.
//!
//! One tokio task owns everything an area holds: database, TTL countdown,
//! self-originated table, peer table, spanning-tree state and subscriber
//! hub. All mutation happens on this loop; callers talk to it through
//! [`AreaCmd`] messages, and background work (peer links, full syncs)
//! reports back through [`AreaEvent`]s.

use crate::db::{
    self, dump_all_with_filters, dump_difference, dump_hash_with_filters, keys_to_request,
    merge_key_values, KeyValMap, MergeStats,
};
use crate::dual::{Dual, DualIn, DualOut};
use crate::hub::{AreaHub, Publication, Subscription};
use crate::peers::{Peer, PeerSyncState, PeerTable};
use crate::self_originated::SelfOriginatedTable;
use crate::ttl::TtlCountdownQueue;
use lodestone_net::{connect, Connection, NetError};
use lodestone_types::consts::{
    CONNECT_TIMEOUT, FLOOD_QUEUE_BOUND, PROCESS_TIMEOUT, SYNC_TIMEOUT,
};
use lodestone_types::wire::{
    store_reply, store_request, DumpHashesRequest, GetKeysRequest, SptInfosReply, StoreReply,
    StoreRequest, WireDualMessage, WireFilterParams, WirePeerInfo, WirePublication, WireValue,
};
use lodestone_types::{AreaId, KeyFilters, Value};
use rand::Rng;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

/// Where a merge batch came from; drives admission filtering and
/// split-horizon flooding.
#[derive(Clone, Debug)]
pub enum MergeSource {
    Local,
    Peer {
        sender_id: String,
        node_ids: Vec<String>,
        flood_root_id: Option<String>,
    },
}

/// Commands accepted by an area loop.
pub enum AreaCmd {
    Merge {
        key_vals: KeyValMap,
        source: MergeSource,
        resp: Option<oneshot::Sender<MergeStats>>,
    },
    GetKeyVals {
        keys: Vec<String>,
        resp: oneshot::Sender<KeyValMap>,
    },
    DumpKeyVals {
        filters: Option<KeyFilters>,
        do_not_publish_value: bool,
        resp: oneshot::Sender<KeyValMap>,
    },
    DumpHashes {
        filters: Option<KeyFilters>,
        resp: oneshot::Sender<KeyValMap>,
    },
    GetPeers {
        resp: oneshot::Sender<Vec<WirePeerInfo>>,
    },
    AddPeers {
        peers: Vec<(String, SocketAddr)>,
        resp: oneshot::Sender<()>,
    },
    DelPeers {
        names: Vec<String>,
        resp: oneshot::Sender<()>,
    },
    DualMessages {
        from: String,
        msgs: Vec<WireDualMessage>,
        resp: oneshot::Sender<()>,
    },
    FloodTopoSet {
        root_id: String,
        peer_name: String,
        set_child: bool,
        resp: oneshot::Sender<()>,
    },
    GetSptInfos {
        resp: oneshot::Sender<SptInfosReply>,
    },
    Subscribe {
        subscription: Subscription,
        resp: oneshot::Sender<Publication>,
    },
    Counters {
        resp: oneshot::Sender<AreaCounters>,
    },
    Shutdown,
}

/// Reports from off-loop tasks back to the area.
enum AreaEvent {
    SyncOutcome {
        peer: String,
        result: Result<SyncStats, NetError>,
    },
    LinkDown {
        peer: String,
    },
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SyncStats {
    pub keys_received: usize,
    pub keys_sent: usize,
}

#[derive(Clone, Debug, Default)]
pub struct AreaCounters {
    pub keys: usize,
    pub merges: u64,
    pub floods_tx: u64,
    pub publications_rx: u64,
    pub expired_keys: u64,
    pub full_syncs_ok: u64,
    pub full_syncs_failed: u64,
    pub subscribers: usize,
    pub peers: usize,
}

/// Per-area knobs, distilled from the node config.
#[derive(Clone, Debug)]
pub struct AreaOptions {
    pub sync_interval: Duration,
    pub enable_flood_optimization: bool,
    pub is_flood_root: bool,
    pub ttl_decrement_ms: i64,
    pub admission_filters: Option<KeyFilters>,
}

pub struct AreaActor {
    area_id: AreaId,
    node_id: String,
    opts: AreaOptions,
    db: KeyValMap,
    ttl_queue: TtlCountdownQueue,
    self_originated: SelfOriginatedTable,
    peers: PeerTable,
    dual: Dual,
    hub: AreaHub,
    counters: AreaCounters,
    cmd_tx: mpsc::Sender<AreaCmd>,
    cmd_rx: mpsc::Receiver<AreaCmd>,
    event_tx: mpsc::UnboundedSender<AreaEvent>,
    event_rx: mpsc::UnboundedReceiver<AreaEvent>,
}

impl AreaActor {
    /// Build an actor and the sender used to reach it. The actor runs
    /// once [`AreaActor::run`] is spawned.
    pub fn new(area_id: AreaId, node_id: String, opts: AreaOptions) -> (Self, mpsc::Sender<AreaCmd>) {
        let (cmd_tx, cmd_rx) = mpsc::channel(256);
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let dual = Dual::new(node_id.clone(), opts.is_flood_root);
        let actor = Self {
            area_id,
            node_id: node_id.clone(),
            opts,
            db: KeyValMap::new(),
            ttl_queue: TtlCountdownQueue::new(),
            self_originated: SelfOriginatedTable::new(node_id),
            peers: PeerTable::new(),
            dual,
            hub: AreaHub::new(),
            counters: AreaCounters::default(),
            cmd_tx: cmd_tx.clone(),
            cmd_rx,
            event_tx,
            event_rx,
        };
        (actor, cmd_tx)
    }

    pub async fn run(mut self) {
        // Stagger periodic syncs a little so a domain-wide restart does
        // not thunder onto one node.
        let jitter = rand::thread_rng().gen_range(0..=self.opts.sync_interval.as_millis() / 10 + 1);
        let mut sync_tick = tokio::time::interval_at(
            Instant::now() + self.opts.sync_interval + Duration::from_millis(jitter as u64),
            self.opts.sync_interval,
        );
        sync_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        tracing::info!(area = %self.area_id, "area loop started");
        loop {
            let ttl_deadline = self.ttl_queue.next_deadline();
            let refresh_deadline = self.self_originated.next_refresh();
            let far = Instant::now() + Duration::from_secs(3600);

            tokio::select! {
                cmd = self.cmd_rx.recv() => {
                    match cmd {
                        None | Some(AreaCmd::Shutdown) => break,
                        Some(cmd) => self.handle_cmd(cmd),
                    }
                }
                Some(event) = self.event_rx.recv() => self.handle_event(event),
                _ = tokio::time::sleep_until(ttl_deadline.unwrap_or(far)),
                    if ttl_deadline.is_some() => self.handle_ttl_expiry(),
                _ = tokio::time::sleep_until(refresh_deadline.unwrap_or(far)),
                    if refresh_deadline.is_some() => self.handle_self_refresh(),
                _ = sync_tick.tick() => self.start_due_syncs(),
            }
        }
        tracing::info!(area = %self.area_id, "area loop stopped");
    }

    fn handle_cmd(&mut self, cmd: AreaCmd) {
        match cmd {
            AreaCmd::Merge {
                key_vals,
                source,
                resp,
            } => {
                if matches!(source, MergeSource::Peer { .. }) {
                    self.counters.publications_rx += 1;
                }
                let stats = self.apply_merge(key_vals, source);
                if let Some(resp) = resp {
                    let _ = resp.send(stats);
                }
            }
            AreaCmd::GetKeyVals { keys, resp } => {
                let now = Instant::now();
                let mut out = KeyValMap::new();
                for key in keys {
                    if let Some(v) = self.db.get(&key) {
                        out.insert(key, v.clone());
                    }
                }
                self.restamp_ttls(&mut out, now, 0);
                let _ = resp.send(out);
            }
            AreaCmd::DumpKeyVals {
                filters,
                do_not_publish_value,
                resp,
            } => {
                let now = Instant::now();
                let filters = filters.unwrap_or_else(KeyFilters::match_all);
                let mut out = dump_all_with_filters(&self.db, &filters, do_not_publish_value);
                self.restamp_ttls(&mut out, now, 0);
                let _ = resp.send(out);
            }
            AreaCmd::DumpHashes { filters, resp } => {
                let filters = filters.unwrap_or_else(KeyFilters::match_all);
                let _ = resp.send(dump_hash_with_filters(&self.db, &filters));
            }
            AreaCmd::GetPeers { resp } => {
                let _ = resp.send(self.peers.infos());
            }
            AreaCmd::AddPeers { peers, resp } => {
                for (name, addr) in peers {
                    self.add_peer(name, addr);
                }
                let _ = resp.send(());
            }
            AreaCmd::DelPeers { names, resp } => {
                for name in names {
                    self.del_peer(&name);
                }
                let _ = resp.send(());
            }
            AreaCmd::DualMessages { from, msgs, resp } => {
                let out = self.dual.handle(DualIn::Messages { from, msgs });
                self.send_dual(out);
                let _ = resp.send(());
            }
            AreaCmd::FloodTopoSet {
                root_id,
                peer_name,
                set_child,
                resp,
            } => {
                self.dual.set_pinned_child(&root_id, &peer_name, set_child);
                let _ = resp.send(());
            }
            AreaCmd::GetSptInfos { resp } => {
                let infos = self.dual.spt_infos();
                let flood_peers = self
                    .dual
                    .current_root()
                    .map(|root| {
                        let mut peers: Vec<String> =
                            self.dual.flood_peers(root).into_iter().collect();
                        peers.sort();
                        peers
                    })
                    .unwrap_or_default();
                let counters = self.dual.counters.clone();
                let _ = resp.send(SptInfosReply {
                    infos,
                    flood_peers,
                    updates_rx: counters.updates_rx,
                    queries_rx: counters.queries_rx,
                    replies_rx: counters.replies_rx,
                });
            }
            AreaCmd::Subscribe { subscription, resp } => {
                let snapshot = self.snapshot_for(&subscription);
                self.hub.register(subscription);
                self.counters.subscribers = self.hub.subscriber_count();
                let _ = resp.send(snapshot);
            }
            AreaCmd::Counters { resp } => {
                let mut counters = self.counters.clone();
                counters.keys = self.db.len();
                counters.subscribers = self.hub.subscriber_count();
                counters.peers = self.peers.len();
                let _ = resp.send(counters);
            }
            AreaCmd::Shutdown => unreachable!("handled by the run loop"),
        }
    }

    fn handle_event(&mut self, event: AreaEvent) {
        let now = Instant::now();
        match event {
            AreaEvent::SyncOutcome { peer, result } => match result {
                Ok(stats) => {
                    self.counters.full_syncs_ok += 1;
                    tracing::debug!(
                        area = %self.area_id,
                        peer,
                        received = stats.keys_received,
                        sent = stats.keys_sent,
                        "full sync finished"
                    );
                    if let Some(p) = self.peers.get_mut(&peer) {
                        p.mark_established();
                    }
                }
                Err(e) => {
                    self.counters.full_syncs_failed += 1;
                    tracing::info!(area = %self.area_id, peer, error = %e, "full sync failed");
                    if let Some(p) = self.peers.get_mut(&peer) {
                        p.mark_failed(now);
                    }
                }
            },
            AreaEvent::LinkDown { peer } => {
                if let Some(p) = self.peers.get_mut(&peer) {
                    if p.state == PeerSyncState::Established {
                        tracing::info!(area = %self.area_id, peer, "flood link dropped, scheduling resync");
                        p.mark_failed(now);
                    }
                }
            }
        }
    }

    // ==================== merge pipeline ====================

    fn apply_merge(&mut self, key_vals: KeyValMap, source: MergeSource) -> MergeStats {
        let now = Instant::now();
        let filters = match source {
            MergeSource::Peer { .. } => self.opts.admission_filters.as_ref(),
            MergeSource::Local => None,
        };
        let (delta, stats) = merge_key_values(&mut self.db, key_vals, filters);
        self.counters.merges += 1;
        if delta.is_empty() {
            return stats;
        }

        for key in delta.keys() {
            let stored = self.db.get(key).expect("merged key present");
            self.ttl_queue.upsert(key, stored, now);
        }

        let mut reclaims = KeyValMap::new();
        match &source {
            MergeSource::Local => {
                for (key, value) in &delta {
                    if value.body.is_full() && value.originator_id == self.node_id {
                        let stored = self.db.get(key).expect("merged key present").clone();
                        self.self_originated.upsert(key, stored, now);
                    }
                }
            }
            MergeSource::Peer { .. } => {
                // A peer record displacing one of our keys under our own
                // name is stale residue; reclaim by outbidding it.
                for (key, value) in &delta {
                    if value.body.is_full() {
                        if let Some((k, v)) = self.self_originated.handle_displaced(key, value, now)
                        {
                            reclaims.insert(k, v);
                        }
                    }
                }
            }
        }

        self.distribute(delta, &source, now);

        if !reclaims.is_empty() {
            self.apply_merge(reclaims, MergeSource::Local);
        }
        stats
    }

    /// Fan a merge delta out: subscribers first, then peers.
    fn distribute(&mut self, delta: KeyValMap, source: &MergeSource, now: Instant) {
        let publication = Publication {
            area: self.area_id.clone(),
            key_vals: delta.clone(),
            expired_keys: Vec::new(),
            timestamp_ms: unix_now_ms(),
        };
        self.hub.publish(&publication);
        self.counters.subscribers = self.hub.subscriber_count();

        let mut flood_kvs = delta;
        self.restamp_ttls(&mut flood_kvs, now, self.opts.ttl_decrement_ms);
        if flood_kvs.is_empty() {
            return;
        }

        let (source_peer, mut node_ids, flood_root_id) = match source {
            MergeSource::Local => (None, Vec::new(), None),
            MergeSource::Peer {
                sender_id,
                node_ids,
                flood_root_id,
            } => (
                Some(sender_id.as_str()),
                node_ids.clone(),
                flood_root_id.clone(),
            ),
        };
        if !node_ids.contains(&self.node_id) {
            node_ids.push(self.node_id.clone());
        }

        let targets = self.flood_targets(source_peer, &node_ids, flood_root_id.as_deref());
        if targets.is_empty() {
            return;
        }

        let wire_pub = WirePublication {
            area: self.area_id.as_str().to_string(),
            key_vals: flood_kvs
                .into_iter()
                .map(|(k, v)| (k, WireValue::from(v)))
                .collect(),
            expired_keys: Vec::new(),
            node_ids,
            flood_root_id: flood_root_id.or_else(|| {
                self.opts
                    .enable_flood_optimization
                    .then(|| self.dual.current_root().map(str::to_string))
                    .flatten()
            }),
            timestamp_ms: unix_now_ms(),
        };
        let request = StoreRequest {
            sender_id: self.node_id.clone(),
            request: Some(store_request::Request::Publication(wire_pub)),
        };

        for name in targets {
            self.send_to_peer(&name, request.clone(), now);
        }
        self.counters.floods_tx += 1;
    }

    /// Peers a publication should reach, honoring split-horizon, the
    /// flood-path list, and (when converged) the spanning tree.
    fn flood_targets(
        &self,
        source_peer: Option<&str>,
        node_ids: &[String],
        flood_root: Option<&str>,
    ) -> Vec<String> {
        let tree = if self.opts.enable_flood_optimization {
            flood_root
                .map(str::to_string)
                .or_else(|| self.dual.current_root().map(str::to_string))
                .filter(|root| self.dual.converged(root))
                .map(|root| self.dual.flood_peers(&root))
        } else {
            None
        };
        self.peers
            .iter()
            .filter(|p| Some(p.name.as_str()) != source_peer)
            .filter(|p| !node_ids.iter().any(|n| n == &p.name))
            .filter(|p| tree.as_ref().is_none_or(|t| t.contains(&p.name)))
            .map(|p| p.name.clone())
            .collect()
    }

    fn send_to_peer(&mut self, name: &str, request: StoreRequest, now: Instant) {
        let Some(peer) = self.peers.get_mut(name) else {
            return;
        };
        let Some(tx) = peer.flood_tx.as_ref() else {
            return;
        };
        match tx.try_send(request) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(
                    area = %self.area_id,
                    peer = name,
                    "flood queue overflow, forcing resync"
                );
                peer.mark_failed(now);
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                peer.mark_failed(now);
            }
        }
    }

    /// Rewrite batch TTLs to the actual time remaining, minus the given
    /// per-hop decrement; drops entries that would arrive dead.
    fn restamp_ttls(&self, key_vals: &mut KeyValMap, now: Instant, decrement_ms: i64) {
        let queue = &self.ttl_queue;
        db::update_publication_ttl(
            |key, value| queue.remaining_ms(key, value, now),
            decrement_ms,
            key_vals,
        );
    }

    // ==================== timers ====================

    fn handle_ttl_expiry(&mut self) {
        let now = Instant::now();
        let mut expired_keys = Vec::new();
        for (key, record) in self.ttl_queue.pop_expired(now) {
            let still_current = self.db.get(&key).is_some_and(|cur| {
                cur.version == record.version
                    && cur.originator_id == record.originator_id
                    && cur.ttl_version == record.ttl_version
            });
            if still_current {
                self.db.remove(&key);
                self.self_originated.remove(&key);
                expired_keys.push(key);
            }
        }
        if expired_keys.is_empty() {
            return;
        }
        self.counters.expired_keys += expired_keys.len() as u64;
        tracing::debug!(area = %self.area_id, count = expired_keys.len(), "evicted expired keys");
        // Eviction is local: subscribers hear about it, peers do not.
        let publication = Publication {
            area: self.area_id.clone(),
            key_vals: KeyValMap::new(),
            expired_keys,
            timestamp_ms: unix_now_ms(),
        };
        self.hub.publish(&publication);
    }

    fn handle_self_refresh(&mut self) {
        let now = Instant::now();
        let due = self.self_originated.take_due_refreshes(now);
        if due.is_empty() {
            return;
        }
        tracing::trace!(area = %self.area_id, count = due.len(), "refreshing self-originated keys");
        let key_vals: KeyValMap = due.into_iter().collect();
        self.apply_merge(key_vals, MergeSource::Local);
    }

    // ==================== peers and sync ====================

    fn add_peer(&mut self, name: String, addr: SocketAddr) {
        if name == self.node_id {
            return;
        }
        let mut peer = Peer::new(name.clone(), addr);
        peer.flood_tx = Some(self.spawn_peer_link(name.clone(), addr));
        self.peers.insert(peer);
        let out = self.dual.handle(DualIn::PeerUp { peer: name.clone() });
        self.send_dual(out);
        self.start_sync(&name);
    }

    fn del_peer(&mut self, name: &str) {
        if self.peers.remove(name).is_some() {
            let out = self.dual.handle(DualIn::PeerDown {
                peer: name.to_string(),
            });
            self.send_dual(out);
        }
    }

    fn spawn_peer_link(
        &self,
        name: String,
        addr: SocketAddr,
    ) -> mpsc::Sender<StoreRequest> {
        let (tx, rx) = mpsc::channel(FLOOD_QUEUE_BOUND);
        let event_tx = self.event_tx.clone();
        tokio::spawn(peer_link_task(name, addr, rx, event_tx));
        tx
    }

    fn start_due_syncs(&mut self) {
        let now = Instant::now();
        let due: Vec<String> = self
            .peers
            .iter()
            .filter(|p| p.sync_due(now))
            .map(|p| p.name.clone())
            .collect();
        for name in due {
            self.start_sync(&name);
        }
    }

    fn start_sync(&mut self, name: &str) {
        let Some(peer) = self.peers.get_mut(name) else {
            return;
        };
        if peer.state == PeerSyncState::Syncing {
            return;
        }
        peer.state = PeerSyncState::Syncing;
        tracing::debug!(area = %self.area_id, peer = name, "starting full sync");
        tokio::spawn(run_full_sync(SyncContext {
            area_id: self.area_id.clone(),
            node_id: self.node_id.clone(),
            peer_name: name.to_string(),
            peer_addr: peer.addr,
            filters: self.opts.admission_filters.as_ref().map(|f| f.to_wire()),
            cmd_tx: self.cmd_tx.clone(),
            event_tx: self.event_tx.clone(),
        }));
    }

    fn send_dual(&mut self, out: Vec<DualOut>) {
        for DualOut::Send { to, msgs } in out {
            let Some(peer) = self.peers.get(&to) else {
                continue;
            };
            let addr = peer.addr;
            let request = StoreRequest {
                sender_id: self.node_id.clone(),
                request: Some(store_request::Request::DualMessages(
                    lodestone_types::wire::DualMessagesRequest {
                        area: self.area_id.as_str().to_string(),
                        messages: Some(lodestone_types::wire::WireDualMessages {
                            sender_id: self.node_id.clone(),
                            messages: msgs,
                        }),
                    },
                )),
            };
            // Low-rate control traffic; a lost message is repaired by the
            // next peer event, so fire and forget.
            tokio::spawn(async move {
                if let Err(e) =
                    lodestone_net::request(addr, &request, CONNECT_TIMEOUT, PROCESS_TIMEOUT).await
                {
                    tracing::debug!(peer = %to, error = %e, "dual message send failed");
                }
            });
        }
    }

    fn snapshot_for(&self, subscription: &Subscription) -> Publication {
        let spec = &subscription.spec;
        let mut key_vals =
            dump_all_with_filters(&self.db, &spec.filters, spec.do_not_publish_value);
        self.restamp_ttls(&mut key_vals, Instant::now(), 0);
        Publication {
            area: self.area_id.clone(),
            key_vals,
            expired_keys: Vec::new(),
            timestamp_ms: unix_now_ms(),
        }
    }
}

/// Owns the outbound flood connection for one peer. Reconnects lazily;
/// failures surface as LinkDown events and are repaired by full sync.
async fn peer_link_task(
    peer_name: String,
    addr: SocketAddr,
    mut rx: mpsc::Receiver<StoreRequest>,
    event_tx: mpsc::UnboundedSender<AreaEvent>,
) {
    let mut conn: Option<Connection> = None;
    while let Some(request) = rx.recv().await {
        if conn.is_none() {
            conn = match connect(addr, CONNECT_TIMEOUT).await {
                Ok(c) => Some(c),
                Err(e) => {
                    tracing::debug!(peer = %peer_name, error = %e, "flood connect failed");
                    let _ = event_tx.send(AreaEvent::LinkDown {
                        peer: peer_name.clone(),
                    });
                    continue;
                }
            };
        }
        if let Some(c) = conn.as_mut() {
            if let Err(e) = c.send(&request).await {
                tracing::debug!(peer = %peer_name, error = %e, "flood send failed");
                conn = None;
                let _ = event_tx.send(AreaEvent::LinkDown {
                    peer: peer_name.clone(),
                });
            }
        }
    }
}

struct SyncContext {
    area_id: AreaId,
    node_id: String,
    peer_name: String,
    peer_addr: SocketAddr,
    filters: Option<WireFilterParams>,
    cmd_tx: mpsc::Sender<AreaCmd>,
    event_tx: mpsc::UnboundedSender<AreaEvent>,
}

/// Requester side of a full sync: hash dump, diff, targeted fetch, push.
async fn run_full_sync(ctx: SyncContext) {
    let peer = ctx.peer_name.clone();
    let result = match tokio::time::timeout(SYNC_TIMEOUT, full_sync_exchange(&ctx)).await {
        Ok(result) => result,
        Err(_) => Err(NetError::ProcessTimeout),
    };
    let _ = ctx.event_tx.send(AreaEvent::SyncOutcome { peer, result });
}

async fn full_sync_exchange(ctx: &SyncContext) -> Result<SyncStats, NetError> {
    let mut conn = connect(ctx.peer_addr, CONNECT_TIMEOUT).await?;
    let area = ctx.area_id.as_str().to_string();

    // 1. The peer's view, as hashes.
    let reply = conn
        .request(
            &StoreRequest {
                sender_id: ctx.node_id.clone(),
                request: Some(store_request::Request::DumpHashes(DumpHashesRequest {
                    area: area.clone(),
                    filters: ctx.filters.clone(),
                })),
            },
            PROCESS_TIMEOUT,
        )
        .await?;
    let peer_hashes = expect_key_vals(reply)?;

    // 2. Our own view.
    let local_hashes = local_dump(ctx, true).await?;
    let need = keys_to_request(&local_hashes, &peer_hashes);
    let keys_received = need.len();

    // 3. Fetch what the peer knows better and merge it.
    if !need.is_empty() {
        let reply = conn
            .request(
                &StoreRequest {
                    sender_id: ctx.node_id.clone(),
                    request: Some(store_request::Request::GetKeys(GetKeysRequest {
                        area: area.clone(),
                        keys: need,
                    })),
                },
                PROCESS_TIMEOUT,
            )
            .await?;
        let fetched = expect_key_vals(reply)?;
        if !fetched.is_empty() {
            let (resp_tx, resp_rx) = oneshot::channel();
            ctx.cmd_tx
                .send(AreaCmd::Merge {
                    key_vals: fetched,
                    source: MergeSource::Peer {
                        sender_id: ctx.peer_name.clone(),
                        node_ids: vec![ctx.peer_name.clone()],
                        flood_root_id: None,
                    },
                    resp: Some(resp_tx),
                })
                .await
                .map_err(|_| NetError::Closed)?;
            resp_rx.await.map_err(|_| NetError::Closed)?;
        }
    }

    // 4. Push back what we know better.
    let local_full = local_dump(ctx, false).await?;
    let push = dump_difference(&local_full, &peer_hashes);
    let keys_sent = push.len();
    if !push.is_empty() {
        conn.send(&StoreRequest {
            sender_id: ctx.node_id.clone(),
            request: Some(store_request::Request::Publication(WirePublication {
                area,
                key_vals: push
                    .into_iter()
                    .map(|(k, v)| (k, WireValue::from(v)))
                    .collect(),
                expired_keys: Vec::new(),
                node_ids: vec![ctx.node_id.clone()],
                flood_root_id: None,
                timestamp_ms: unix_now_ms(),
            })),
        })
        .await?;
    }

    Ok(SyncStats {
        keys_received,
        keys_sent,
    })
}

async fn local_dump(ctx: &SyncContext, hashes: bool) -> Result<KeyValMap, NetError> {
    let (resp_tx, resp_rx) = oneshot::channel();
    let cmd = if hashes {
        AreaCmd::DumpHashes {
            filters: None,
            resp: resp_tx,
        }
    } else {
        AreaCmd::DumpKeyVals {
            filters: None,
            do_not_publish_value: false,
            resp: resp_tx,
        }
    };
    ctx.cmd_tx.send(cmd).await.map_err(|_| NetError::Closed)?;
    resp_rx.await.map_err(|_| NetError::Closed)
}

fn expect_key_vals(reply: StoreReply) -> Result<KeyValMap, NetError> {
    match reply.reply {
        Some(store_reply::Reply::Publication(p)) => Ok(p
            .key_vals
            .into_iter()
            .map(|(k, v)| (k, Value::from(v)))
            .collect()),
        Some(store_reply::Reply::Error(e)) => {
            Err(NetError::Protocol(format!("peer refused: {}", e.message)))
        }
        _ => Err(NetError::Protocol("unexpected reply to dump".into())),
    }
}

pub(crate) fn unix_now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
