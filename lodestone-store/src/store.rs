//! The store supervisor and its cloneable handle.
//!
//! The supervisor spawns one actor task per configured area and routes
//! every operation to the right loop; all cross-area state lives here.
//! [`KvStoreHandle`] is the in-process dispatcher surface: every remote
//! operation maps 1:1 onto one of its methods.

use crate::area::{AreaActor, AreaCmd, AreaCounters, AreaOptions, MergeSource};
use crate::config::Config;
use crate::db::{KeyValMap, MergeStats};
use crate::error::StoreError;
use crate::hub::{Publication, Subscription, SubscriptionHandle, SubscriptionSpec};
use lodestone_types::wire::{
    SptInfosReply, WireDualMessage, WireFilterParams, WirePeerInfo, WirePublication,
};
use lodestone_types::{AreaId, KeyFilters, Value};
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// A running store: one actor per area plus the handle to reach them.
pub struct KvStore {
    handle: KvStoreHandle,
    tasks: Vec<JoinHandle<()>>,
}

impl KvStore {
    /// Spawn area loops for every configured area.
    pub fn spawn(config: &Config) -> Result<Self, StoreError> {
        let admission_filters = config.kv.admission_filters()?;
        let opts = AreaOptions {
            sync_interval: Duration::from_secs(config.kv.sync_interval_secs.max(1)),
            enable_flood_optimization: config.kv.enable_flood_optimization,
            is_flood_root: config.kv.is_flood_root,
            ttl_decrement_ms: config.kv.ttl_decrement_ms,
            admission_filters,
        };

        let mut areas = HashMap::new();
        let mut tasks = Vec::new();
        for area in &config.areas {
            let area_id = AreaId::new(area.area_id.clone());
            if areas.contains_key(&area_id) {
                return Err(StoreError::InvalidArgument(format!(
                    "duplicate area: {area_id}"
                )));
            }
            let (actor, cmd_tx) =
                AreaActor::new(area_id.clone(), config.node_name.clone(), opts.clone());
            tasks.push(tokio::spawn(actor.run()));
            areas.insert(area_id, cmd_tx);
        }

        Ok(Self {
            handle: KvStoreHandle {
                node_id: Arc::new(config.node_name.clone()),
                areas: Arc::new(areas),
            },
            tasks,
        })
    }

    pub fn handle(&self) -> KvStoreHandle {
        self.handle.clone()
    }

    /// Stop every area loop and wait for them to drain.
    pub async fn shutdown(self) {
        for tx in self.handle.areas.values() {
            let _ = tx.send(AreaCmd::Shutdown).await;
        }
        for task in self.tasks {
            let _ = task.await;
        }
    }
}

/// Cloneable dispatcher over all areas of the local store.
#[derive(Clone)]
pub struct KvStoreHandle {
    node_id: Arc<String>,
    areas: Arc<HashMap<AreaId, mpsc::Sender<AreaCmd>>>,
}

impl KvStoreHandle {
    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn areas(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.areas.keys().map(|a| a.as_str().to_string()).collect();
        ids.sort();
        ids
    }

    fn area(&self, area: &str) -> Result<&mpsc::Sender<AreaCmd>, StoreError> {
        self.areas
            .get(&AreaId::from(area))
            .ok_or_else(|| StoreError::UnknownArea(area.to_string()))
    }

    async fn call<T>(
        &self,
        area: &str,
        make: impl FnOnce(oneshot::Sender<T>) -> AreaCmd,
    ) -> Result<T, StoreError> {
        let tx = self.area(area)?;
        let (resp_tx, resp_rx) = oneshot::channel();
        tx.send(make(resp_tx))
            .await
            .map_err(|_| StoreError::Internal("area loop terminated".into()))?;
        resp_rx
            .await
            .map_err(|_| StoreError::Internal("area loop dropped the request".into()))
    }

    /// Merge a batch written by a local publisher and flood the outcome.
    pub async fn set_key_vals(
        &self,
        area: &str,
        key_vals: HashMap<String, Value>,
    ) -> Result<(), StoreError> {
        if key_vals.is_empty() {
            return Err(StoreError::InvalidArgument("empty key-value batch".into()));
        }
        for (key, value) in &key_vals {
            if key.is_empty() {
                return Err(StoreError::InvalidArgument("empty key".into()));
            }
            if value.originator_id.is_empty() {
                return Err(StoreError::InvalidArgument(format!(
                    "key {key} has no originator"
                )));
            }
        }
        self.call(area, |resp| AreaCmd::Merge {
            key_vals,
            source: MergeSource::Local,
            resp: Some(resp),
        })
        .await
        .map(|_: MergeStats| ())
    }

    /// Merge a publication received from a peer store.
    pub async fn ingest_publication(
        &self,
        sender_id: String,
        publication: WirePublication,
    ) -> Result<MergeStats, StoreError> {
        let area = publication.area.clone();
        let key_vals: KeyValMap = publication
            .key_vals
            .into_iter()
            .map(|(k, v)| (k, Value::from(v)))
            .collect();
        if key_vals.is_empty() {
            return Ok(MergeStats::default());
        }
        self.call(&area, |resp| AreaCmd::Merge {
            key_vals,
            source: MergeSource::Peer {
                sender_id,
                node_ids: publication.node_ids,
                flood_root_id: publication.flood_root_id,
            },
            resp: Some(resp),
        })
        .await
    }

    /// The present subset of the requested keys.
    pub async fn get_key_vals(
        &self,
        area: &str,
        keys: Vec<String>,
    ) -> Result<KeyValMap, StoreError> {
        self.call(area, |resp| AreaCmd::GetKeyVals { keys, resp }).await
    }

    pub async fn dump_key_vals(
        &self,
        area: &str,
        filters: Option<&WireFilterParams>,
        do_not_publish_value: bool,
    ) -> Result<KeyValMap, StoreError> {
        let filters = compile_filters(filters)?;
        self.call(area, |resp| AreaCmd::DumpKeyVals {
            filters,
            do_not_publish_value,
            resp,
        })
        .await
    }

    pub async fn dump_hashes(
        &self,
        area: &str,
        filters: Option<&WireFilterParams>,
    ) -> Result<KeyValMap, StoreError> {
        let filters = compile_filters(filters)?;
        self.call(area, |resp| AreaCmd::DumpHashes { filters, resp })
            .await
    }

    pub async fn get_peers(&self, area: &str) -> Result<Vec<WirePeerInfo>, StoreError> {
        self.call(area, |resp| AreaCmd::GetPeers { resp }).await
    }

    pub async fn add_peers(
        &self,
        area: &str,
        peers: Vec<(String, SocketAddr)>,
    ) -> Result<(), StoreError> {
        for (name, _) in &peers {
            if name.is_empty() {
                return Err(StoreError::InvalidArgument("empty peer name".into()));
            }
        }
        self.call(area, |resp| AreaCmd::AddPeers { peers, resp }).await
    }

    pub async fn del_peers(&self, area: &str, names: Vec<String>) -> Result<(), StoreError> {
        self.call(area, |resp| AreaCmd::DelPeers { names, resp }).await
    }

    pub async fn process_dual_messages(
        &self,
        area: &str,
        from: String,
        msgs: Vec<WireDualMessage>,
    ) -> Result<(), StoreError> {
        self.call(area, |resp| AreaCmd::DualMessages { from, msgs, resp })
            .await
    }

    pub async fn update_flood_topo_child(
        &self,
        area: &str,
        root_id: String,
        peer_name: String,
        set_child: bool,
    ) -> Result<(), StoreError> {
        self.call(area, |resp| AreaCmd::FloodTopoSet {
            root_id,
            peer_name,
            set_child,
            resp,
        })
        .await
    }

    pub async fn get_spt_infos(&self, area: &str) -> Result<SptInfosReply, StoreError> {
        self.call(area, |resp| AreaCmd::GetSptInfos { resp }).await
    }

    pub async fn counters(&self, area: &str) -> Result<AreaCounters, StoreError> {
        self.call(area, |resp| AreaCmd::Counters { resp }).await
    }

    /// Register a snapshot-then-stream subscription.
    ///
    /// Returns one snapshot publication per selected area (sorted by
    /// area id) followed by a live handle. Each area's snapshot is
    /// atomic with its stream: every delta the handle yields for an area
    /// is strictly after that area's snapshot in merge order.
    pub async fn subscribe(
        &self,
        filters: Option<&WireFilterParams>,
        areas: Vec<String>,
        ignore_ttl: bool,
        do_not_publish_value: bool,
    ) -> Result<(Vec<Publication>, SubscriptionHandle), StoreError> {
        let filters = compile_filters(filters)?.unwrap_or_else(KeyFilters::match_all);
        let mut selected: Vec<AreaId> = if areas.is_empty() {
            self.areas.keys().cloned().collect()
        } else {
            let mut out = Vec::with_capacity(areas.len());
            for area in &areas {
                let id = AreaId::from(area.as_str());
                if !self.areas.contains_key(&id) {
                    return Err(StoreError::UnknownArea(area.clone()));
                }
                out.push(id);
            }
            out
        };
        selected.sort();
        selected.dedup();

        let spec = SubscriptionSpec {
            filters,
            areas: selected.iter().cloned().collect::<HashSet<_>>(),
            ignore_ttl,
            do_not_publish_value,
        };
        let (subscription, handle) = Subscription::create(spec);

        let mut snapshots = Vec::with_capacity(selected.len());
        for area_id in &selected {
            let subscription = subscription.clone();
            let snapshot = self
                .call(area_id.as_str(), |resp| AreaCmd::Subscribe {
                    subscription,
                    resp,
                })
                .await?;
            snapshots.push(snapshot);
        }
        Ok((snapshots, handle))
    }
}

fn compile_filters(params: Option<&WireFilterParams>) -> Result<Option<KeyFilters>, StoreError> {
    params
        .map(|p| KeyFilters::try_from(p).map_err(StoreError::from))
        .transpose()
}
