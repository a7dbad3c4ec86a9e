//! Spanning-tree election via a diffusing update algorithm.
//!
//! Pure state machine: inputs are peer events and dual messages, outputs
//! are messages to send. The area actor does the IO. Per root we track a
//! distance, a parent (the successor towards the root), and the set of
//! peers that elected us as their parent; publications then ride only
//! parent/child edges instead of every adjacency.
//!
//! Passive/active follows DUAL: a node stays passive while a feasible
//! successor exists, and otherwise goes active, queries all neighbors,
//! and re-elects once every reply is in.

use lodestone_types::wire::{DualMessageType, WireDualMessage, WireSptInfo};
use std::collections::{HashMap, HashSet};

const UNREACHABLE: i64 = i64::MAX;
/// Every adjacency counts one hop.
const LINK_COST: i64 = 1;

#[derive(Debug)]
pub enum DualIn {
    PeerUp { peer: String },
    PeerDown { peer: String },
    Messages { from: String, msgs: Vec<WireDualMessage> },
}

#[derive(Debug, PartialEq)]
pub enum DualOut {
    Send { to: String, msgs: Vec<WireDualMessage> },
}

#[derive(Debug)]
struct RootState {
    /// Distances neighbors reported for this root.
    reported: HashMap<String, i64>,
    distance: i64,
    feasible_distance: i64,
    parent: Option<String>,
    /// Peers whose updates elected us as their parent.
    children: HashSet<String>,
    /// Empty when passive; outstanding repliers when active.
    pending_replies: HashSet<String>,
}

impl RootState {
    fn new() -> Self {
        Self {
            reported: HashMap::new(),
            distance: UNREACHABLE,
            feasible_distance: UNREACHABLE,
            parent: None,
            children: HashSet::new(),
            pending_replies: HashSet::new(),
        }
    }

    fn passive(&self) -> bool {
        self.pending_replies.is_empty()
    }
}

#[derive(Debug)]
pub struct Dual {
    node_id: String,
    peers: HashSet<String>,
    roots: HashMap<String, RootState>,
    /// Manual child pins from the flood-topo operation: true forces a
    /// child edge, false forbids one.
    pinned_children: HashMap<String, HashMap<String, bool>>,
    pub counters: DualCounters,
}

#[derive(Debug, Default, Clone)]
pub struct DualCounters {
    pub updates_rx: u64,
    pub queries_rx: u64,
    pub replies_rx: u64,
}

impl Dual {
    pub fn new(node_id: impl Into<String>, is_flood_root: bool) -> Self {
        let node_id = node_id.into();
        let mut dual = Self {
            node_id: node_id.clone(),
            peers: HashSet::new(),
            roots: HashMap::new(),
            pinned_children: HashMap::new(),
            counters: DualCounters::default(),
        };
        if is_flood_root {
            let state = dual.roots.entry(node_id).or_insert_with(RootState::new);
            state.distance = 0;
            state.feasible_distance = 0;
        }
        dual
    }

    /// Feed one input; returns the messages to send.
    pub fn handle(&mut self, input: DualIn) -> Vec<DualOut> {
        match input {
            DualIn::PeerUp { peer } => self.on_peer_up(peer),
            DualIn::PeerDown { peer } => self.on_peer_down(&peer),
            DualIn::Messages { from, msgs } => {
                let mut out = Vec::new();
                for msg in msgs {
                    out.extend(self.on_message(&from, msg));
                }
                out
            }
        }
    }

    pub fn set_pinned_child(&mut self, root: &str, peer: &str, set_child: bool) {
        self.pinned_children
            .entry(root.to_string())
            .or_default()
            .insert(peer.to_string(), set_child);
    }

    /// The root whose tree floods currently follow: lowest-named root
    /// with a known finite distance.
    pub fn current_root(&self) -> Option<&str> {
        self.roots
            .iter()
            .filter(|(_, s)| s.distance != UNREACHABLE)
            .map(|(r, _)| r.as_str())
            .min()
    }

    /// True when the election for this root has settled.
    pub fn converged(&self, root: &str) -> bool {
        self.roots.get(root).is_some_and(|s| s.passive())
    }

    /// Peers publications for this root's tree are sent to.
    pub fn flood_peers(&self, root: &str) -> HashSet<String> {
        let mut peers = HashSet::new();
        if let Some(state) = self.roots.get(root) {
            peers.extend(state.children.iter().cloned());
            if let Some(parent) = &state.parent {
                peers.insert(parent.clone());
            }
        }
        if let Some(pins) = self.pinned_children.get(root) {
            for (peer, &set_child) in pins {
                if set_child {
                    peers.insert(peer.clone());
                } else {
                    peers.remove(peer);
                }
            }
        }
        peers
    }

    pub fn spt_infos(&self) -> Vec<WireSptInfo> {
        let mut infos: Vec<_> = self
            .roots
            .iter()
            .map(|(root, s)| {
                let mut children: Vec<String> = s.children.iter().cloned().collect();
                children.sort();
                WireSptInfo {
                    root_id: root.clone(),
                    passive: s.passive(),
                    cost: s.distance,
                    parent: s.parent.clone(),
                    children,
                }
            })
            .collect();
        infos.sort_by(|a, b| a.root_id.cmp(&b.root_id));
        infos
    }

    fn on_peer_up(&mut self, peer: String) -> Vec<DualOut> {
        self.peers.insert(peer.clone());
        // Introduce every root we know to the new peer.
        let mut msgs = Vec::new();
        for (root, state) in &self.roots {
            if state.distance != UNREACHABLE {
                let is_parent = state.parent.as_deref() == Some(peer.as_str());
                msgs.push(update_msg(root, state.distance, is_parent));
            }
        }
        if msgs.is_empty() {
            Vec::new()
        } else {
            vec![DualOut::Send { to: peer, msgs }]
        }
    }

    fn on_peer_down(&mut self, peer: &str) -> Vec<DualOut> {
        self.peers.remove(peer);
        let roots: Vec<String> = self.roots.keys().cloned().collect();
        let mut out = Vec::new();
        for root in roots {
            {
                let state = self.roots.get_mut(&root).expect("listed");
                state.reported.remove(peer);
                state.children.remove(peer);
                state.pending_replies.remove(peer);
            }
            out.extend(self.reelect(&root));
        }
        out
    }

    fn on_message(&mut self, from: &str, msg: WireDualMessage) -> Vec<DualOut> {
        if !self.peers.contains(from) {
            // Unknown sender: adjacency raced the message; count it in.
            self.peers.insert(from.to_string());
        }
        let root = msg.root_id.clone();
        let state = self.roots.entry(root.clone()).or_insert_with(RootState::new);

        match msg.msg_type() {
            DualMessageType::Update => {
                self.counters.updates_rx += 1;
                state.reported.insert(from.to_string(), msg.distance);
                if msg.you_are_parent {
                    state.children.insert(from.to_string());
                } else {
                    state.children.remove(from);
                }
                self.reelect(&root)
            }
            DualMessageType::Query => {
                self.counters.queries_rx += 1;
                state.reported.insert(from.to_string(), msg.distance);
                let reply = WireDualMessage {
                    root_id: root.clone(),
                    msg_type: DualMessageType::Reply as i32,
                    distance: state.distance,
                    you_are_parent: false,
                };
                let mut out = vec![DualOut::Send {
                    to: from.to_string(),
                    msgs: vec![reply],
                }];
                out.extend(self.reelect(&root));
                out
            }
            DualMessageType::Reply => {
                self.counters.replies_rx += 1;
                state.reported.insert(from.to_string(), msg.distance);
                state.pending_replies.remove(from);
                if state.passive() {
                    // Diffusion finished: lift the feasibility bar and
                    // settle on the best remaining candidate.
                    state.feasible_distance = UNREACHABLE;
                    self.reelect(&root)
                } else {
                    Vec::new()
                }
            }
        }
    }

    /// Re-run successor selection for a root; emits updates or queries.
    fn reelect(&mut self, root: &str) -> Vec<DualOut> {
        let node_id = self.node_id.clone();
        let peers: Vec<String> = self.peers.iter().cloned().collect();
        let state = self.roots.get_mut(root).expect("root exists");

        if root == node_id {
            // We are the root; nothing to elect.
            state.distance = 0;
            state.feasible_distance = 0;
            state.parent = None;
            return Vec::new();
        }
        if !state.passive() {
            // Active: wait for outstanding replies.
            return Vec::new();
        }

        let old_distance = state.distance;
        let old_parent = state.parent.clone();

        // Best neighbor meeting the feasibility condition.
        let feasible: Option<(String, i64)> = state
            .reported
            .iter()
            .filter(|(_, &d)| d != UNREACHABLE && d < state.feasible_distance)
            .min_by_key(|(peer, &d)| (d, (*peer).clone()))
            .map(|(peer, &d)| (peer.clone(), d));

        match feasible {
            Some((peer, d)) => {
                state.parent = Some(peer);
                state.distance = d + LINK_COST;
                state.feasible_distance = state.feasible_distance.min(state.distance);
            }
            None => {
                let any_route = state
                    .reported
                    .values()
                    .any(|&d| d != UNREACHABLE);
                state.parent = None;
                state.distance = UNREACHABLE;
                if any_route && !peers.is_empty() {
                    // No feasible successor but the root is out there:
                    // diffuse a computation.
                    state.feasible_distance = UNREACHABLE;
                    state.pending_replies = peers.iter().cloned().collect();
                    let query = WireDualMessage {
                        root_id: root.to_string(),
                        msg_type: DualMessageType::Query as i32,
                        distance: UNREACHABLE,
                        you_are_parent: false,
                    };
                    return peers
                        .into_iter()
                        .map(|to| DualOut::Send {
                            to,
                            msgs: vec![query.clone()],
                        })
                        .collect();
                }
            }
        }

        if state.distance == old_distance && state.parent == old_parent {
            return Vec::new();
        }

        // Advertise the new route; tell the new parent it was elected and
        // release the old one.
        let distance = state.distance;
        let parent = state.parent.clone();
        peers
            .into_iter()
            .map(|to| {
                let is_parent = parent.as_deref() == Some(to.as_str());
                DualOut::Send {
                    to,
                    msgs: vec![update_msg(root, distance, is_parent)],
                }
            })
            .collect()
    }
}

fn update_msg(root: &str, distance: i64, you_are_parent: bool) -> WireDualMessage {
    WireDualMessage {
        root_id: root.to_string(),
        msg_type: DualMessageType::Update as i32,
        distance,
        you_are_parent,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update(root: &str, distance: i64) -> WireDualMessage {
        update_msg(root, distance, false)
    }

    #[test]
    fn elects_parent_towards_root() {
        let mut dual = Dual::new("n3", false);
        dual.handle(DualIn::PeerUp { peer: "n1".into() });
        dual.handle(DualIn::PeerUp { peer: "n2".into() });

        // n1 is the root itself (distance 0), n2 one hop away
        dual.handle(DualIn::Messages {
            from: "n1".into(),
            msgs: vec![update("n1", 0)],
        });
        dual.handle(DualIn::Messages {
            from: "n2".into(),
            msgs: vec![update("n1", 1)],
        });

        let infos = dual.spt_infos();
        assert_eq!(infos.len(), 1);
        assert_eq!(infos[0].root_id, "n1");
        assert_eq!(infos[0].cost, 1);
        assert_eq!(infos[0].parent.as_deref(), Some("n1"));
        assert!(dual.converged("n1"));
    }

    #[test]
    fn parent_election_is_advertised() {
        let mut dual = Dual::new("n2", false);
        dual.handle(DualIn::PeerUp { peer: "n1".into() });
        let out = dual.handle(DualIn::Messages {
            from: "n1".into(),
            msgs: vec![update("n1", 0)],
        });

        // the update back to n1 must claim it as parent
        let claims_parent = out.iter().any(|DualOut::Send { to, msgs }| {
            to == "n1" && msgs.iter().any(|m| m.you_are_parent)
        });
        assert!(claims_parent, "got: {out:?}");
    }

    #[test]
    fn children_follow_peer_updates() {
        let mut dual = Dual::new("n1", true);
        dual.handle(DualIn::PeerUp { peer: "n2".into() });
        dual.handle(DualIn::Messages {
            from: "n2".into(),
            msgs: vec![WireDualMessage {
                root_id: "n1".into(),
                msg_type: DualMessageType::Update as i32,
                distance: 1,
                you_are_parent: true,
            }],
        });
        assert!(dual.flood_peers("n1").contains("n2"));

        dual.handle(DualIn::Messages {
            from: "n2".into(),
            msgs: vec![update("n1", 1)],
        });
        assert!(!dual.flood_peers("n1").contains("n2"));
    }

    #[test]
    fn losing_the_parent_goes_active_then_recovers() {
        let mut dual = Dual::new("n3", false);
        dual.handle(DualIn::PeerUp { peer: "n1".into() });
        dual.handle(DualIn::PeerUp { peer: "n2".into() });
        dual.handle(DualIn::Messages {
            from: "n1".into(),
            msgs: vec![update("n1", 0)],
        });
        // n2 sits behind us: its distance fails the feasibility condition
        dual.handle(DualIn::Messages {
            from: "n2".into(),
            msgs: vec![update("n1", 2)],
        });
        assert_eq!(dual.spt_infos()[0].parent.as_deref(), Some("n1"));

        // parent disappears: only infeasible n2 remains, so we diffuse
        let out = dual.handle(DualIn::PeerDown { peer: "n1".into() });
        let queried: Vec<_> = out
            .iter()
            .filter(|DualOut::Send { msgs, .. }| {
                msgs.iter().any(|m| m.msg_type == DualMessageType::Query as i32)
            })
            .collect();
        assert!(!queried.is_empty(), "expected queries, got {out:?}");
        assert!(!dual.converged("n1"));

        // n2 replies with its (still valid) route; we settle behind it
        dual.handle(DualIn::Messages {
            from: "n2".into(),
            msgs: vec![WireDualMessage {
                root_id: "n1".into(),
                msg_type: DualMessageType::Reply as i32,
                distance: 2,
                you_are_parent: false,
            }],
        });
        assert!(dual.converged("n1"));
        let info = &dual.spt_infos()[0];
        assert_eq!(info.parent.as_deref(), Some("n2"));
        assert_eq!(info.cost, 3);
    }

    #[test]
    fn pinned_children_override() {
        let mut dual = Dual::new("n1", true);
        dual.handle(DualIn::PeerUp { peer: "n2".into() });
        dual.set_pinned_child("n1", "n9", true);
        assert!(dual.flood_peers("n1").contains("n9"));
        dual.set_pinned_child("n1", "n9", false);
        assert!(!dual.flood_peers("n1").contains("n9"));
    }

    #[test]
    fn flood_root_advertises_itself() {
        let mut dual = Dual::new("root", true);
        let out = dual.handle(DualIn::PeerUp { peer: "n2".into() });
        assert_eq!(out.len(), 1);
        let DualOut::Send { to, msgs } = &out[0];
        assert_eq!(to, "n2");
        assert_eq!(msgs[0].distance, 0);
        assert_eq!(dual.current_root(), Some("root"));
    }
}
