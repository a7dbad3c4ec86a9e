//! Client for talking to remote lodestone stores.
//!
//! [`StoreClient`] wraps the request surface of one store;
//! [`dump_all_from_multiple`] fetches snapshots from a set of stores
//! concurrently and folds them through the merge arbiter, reporting the
//! endpoints that could not be reached.

use lodestone_net::NetError;
use lodestone_types::wire::{
    store_reply, store_request, AddPeersRequest, DelPeersRequest, DumpHashesRequest,
    DumpKeyValsRequest, GetAreasRequest, GetKeysRequest, GetPeersRequest, GetSptInfosRequest,
    SetKeyValsRequest, SptInfosReply, StoreReply, StoreRequest, SubscribeRequest,
    WireErrorCode, WireFilterParams, WirePeerInfo, WirePeerSpec, WirePublication, WireValue,
};
use lodestone_types::{compare_values, consts, Value, ValueCompare};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Net(#[from] NetError),

    /// The store answered with an error reply.
    #[error("store error ({code:?}): {message}")]
    Store { code: WireErrorCode, message: String },

    #[error("unexpected reply")]
    UnexpectedReply,
}

impl ClientError {
    pub fn is_connect_timeout(&self) -> bool {
        matches!(self, ClientError::Net(NetError::ConnectTimeout(_)))
    }

    pub fn is_unknown_area(&self) -> bool {
        matches!(
            self,
            ClientError::Store {
                code: WireErrorCode::UnknownArea,
                ..
            }
        )
    }
}

/// One remote store, one request at a time.
#[derive(Clone, Debug)]
pub struct StoreClient {
    addr: SocketAddr,
    client_id: String,
    connect_timeout: Duration,
    process_timeout: Duration,
}

impl StoreClient {
    pub fn new(addr: SocketAddr, client_id: impl Into<String>) -> Self {
        Self {
            addr,
            client_id: client_id.into(),
            connect_timeout: consts::CONNECT_TIMEOUT,
            process_timeout: consts::PROCESS_TIMEOUT,
        }
    }

    pub fn with_timeouts(mut self, connect: Duration, process: Duration) -> Self {
        self.connect_timeout = connect;
        self.process_timeout = process;
        self
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    async fn request(&self, request: store_request::Request) -> Result<StoreReply, ClientError> {
        let envelope = StoreRequest {
            sender_id: self.client_id.clone(),
            request: Some(request),
        };
        let reply = lodestone_net::request(
            self.addr,
            &envelope,
            self.connect_timeout,
            self.process_timeout,
        )
        .await?;
        check_error(reply)
    }

    pub async fn get_key_vals(
        &self,
        area: &str,
        keys: Vec<String>,
    ) -> Result<HashMap<String, Value>, ClientError> {
        let reply = self
            .request(store_request::Request::GetKeys(GetKeysRequest {
                area: area.to_string(),
                keys,
            }))
            .await?;
        expect_key_vals(reply)
    }

    pub async fn set_key_vals(
        &self,
        area: &str,
        key_vals: HashMap<String, Value>,
    ) -> Result<(), ClientError> {
        let reply = self
            .request(store_request::Request::SetKeyVals(SetKeyValsRequest {
                area: area.to_string(),
                key_vals: key_vals
                    .into_iter()
                    .map(|(k, v)| (k, WireValue::from(v)))
                    .collect(),
            }))
            .await?;
        expect_ack(reply)
    }

    pub async fn dump_key_vals(
        &self,
        area: &str,
        filters: Option<WireFilterParams>,
        do_not_publish_value: bool,
    ) -> Result<HashMap<String, Value>, ClientError> {
        let reply = self
            .request(store_request::Request::DumpKeyVals(DumpKeyValsRequest {
                area: area.to_string(),
                filters,
                do_not_publish_value,
            }))
            .await?;
        expect_key_vals(reply)
    }

    pub async fn dump_hashes(
        &self,
        area: &str,
        filters: Option<WireFilterParams>,
    ) -> Result<HashMap<String, Value>, ClientError> {
        let reply = self
            .request(store_request::Request::DumpHashes(DumpHashesRequest {
                area: area.to_string(),
                filters,
            }))
            .await?;
        expect_key_vals(reply)
    }

    pub async fn get_peers(&self, area: &str) -> Result<Vec<WirePeerInfo>, ClientError> {
        let reply = self
            .request(store_request::Request::GetPeers(GetPeersRequest {
                area: area.to_string(),
            }))
            .await?;
        match reply.reply {
            Some(store_reply::Reply::Peers(p)) => Ok(p.peers),
            _ => Err(ClientError::UnexpectedReply),
        }
    }

    pub async fn add_peer(
        &self,
        area: &str,
        peer_name: &str,
        peer_addr: &str,
    ) -> Result<(), ClientError> {
        let reply = self
            .request(store_request::Request::AddPeers(AddPeersRequest {
                area: area.to_string(),
                peers: vec![WirePeerSpec {
                    peer_name: peer_name.to_string(),
                    addr: peer_addr.to_string(),
                }],
            }))
            .await?;
        expect_ack(reply)
    }

    pub async fn del_peer(&self, area: &str, peer_name: &str) -> Result<(), ClientError> {
        let reply = self
            .request(store_request::Request::DelPeers(DelPeersRequest {
                area: area.to_string(),
                peer_names: vec![peer_name.to_string()],
            }))
            .await?;
        expect_ack(reply)
    }

    pub async fn get_spt_infos(&self, area: &str) -> Result<SptInfosReply, ClientError> {
        let reply = self
            .request(store_request::Request::GetSptInfos(GetSptInfosRequest {
                area: area.to_string(),
            }))
            .await?;
        match reply.reply {
            Some(store_reply::Reply::SptInfos(infos)) => Ok(infos),
            _ => Err(ClientError::UnexpectedReply),
        }
    }

    pub async fn get_areas(&self) -> Result<Vec<String>, ClientError> {
        let reply = self
            .request(store_request::Request::GetAreas(GetAreasRequest {}))
            .await?;
        match reply.reply {
            Some(store_reply::Reply::Areas(a)) => Ok(a.areas),
            _ => Err(ClientError::UnexpectedReply),
        }
    }

    /// Open a snapshot-then-stream subscription. The connection stays
    /// dedicated to the stream until dropped.
    pub async fn subscribe(
        &self,
        areas: Vec<String>,
        filters: Option<WireFilterParams>,
        ignore_ttl: bool,
        do_not_publish_value: bool,
    ) -> Result<SubscriptionStream, ClientError> {
        let mut conn = lodestone_net::connect(self.addr, self.connect_timeout).await?;
        conn.send(&StoreRequest {
            sender_id: self.client_id.clone(),
            request: Some(store_request::Request::Subscribe(SubscribeRequest {
                areas,
                filters,
                ignore_ttl,
                do_not_publish_value,
            })),
        })
        .await?;
        Ok(SubscriptionStream { conn })
    }
}

/// Live subscription feed; each item is one publication.
pub struct SubscriptionStream {
    conn: lodestone_net::Connection,
}

impl SubscriptionStream {
    /// Next publication, None when the store hung up cleanly.
    pub async fn next(&mut self) -> Result<Option<WirePublication>, ClientError> {
        match self.conn.recv().await? {
            None => Ok(None),
            Some(reply) => match check_error(reply)?.reply {
                Some(store_reply::Reply::Publication(p)) => Ok(Some(p)),
                _ => Err(ClientError::UnexpectedReply),
            },
        }
    }
}

/// Dump from several stores at once and merge through the arbiter.
///
/// Returns the merged map (None only if every store failed) and the
/// endpoints that did not produce a usable snapshot.
pub async fn dump_all_from_multiple(
    area: &str,
    endpoints: &[SocketAddr],
    key_prefix: &str,
    connect_timeout: Duration,
    process_timeout: Duration,
) -> (Option<HashMap<String, Value>>, Vec<SocketAddr>) {
    let filters = prefix_filters(key_prefix);
    let dumps = fetch_all(area, endpoints, filters, connect_timeout, process_timeout).await;

    let mut merged: Option<HashMap<String, Value>> = None;
    let mut unreachable = Vec::new();
    for (addr, result) in dumps {
        match result {
            Ok(key_vals) => {
                merge_snapshot(merged.get_or_insert_with(HashMap::new), key_vals);
            }
            Err(e) => {
                tracing::info!(%addr, error = %e, "store dump failed");
                unreachable.push(addr);
            }
        }
    }
    (merged, unreachable)
}

/// Like [`dump_all_from_multiple`], decoding each payload as `T`.
/// A store whose payloads fail to decode counts as unreachable.
pub async fn dump_all_and_parse<T: prost::Message + Default>(
    area: &str,
    endpoints: &[SocketAddr],
    key_prefix: &str,
    connect_timeout: Duration,
    process_timeout: Duration,
) -> (Option<HashMap<String, T>>, Vec<SocketAddr>) {
    let filters = prefix_filters(key_prefix);
    let dumps = fetch_all(area, endpoints, filters, connect_timeout, process_timeout).await;

    let mut merged: Option<HashMap<String, Value>> = None;
    let mut unreachable = Vec::new();
    for (addr, result) in dumps {
        match result {
            Ok(key_vals) => {
                let undecodable = key_vals
                    .values()
                    .filter_map(|v| v.value())
                    .any(|bytes| T::decode(bytes).is_err());
                if undecodable {
                    tracing::info!(%addr, "store returned undecodable payloads");
                    unreachable.push(addr);
                    continue;
                }
                merge_snapshot(merged.get_or_insert_with(HashMap::new), key_vals);
            }
            Err(e) => {
                tracing::info!(%addr, error = %e, "store dump failed");
                unreachable.push(addr);
            }
        }
    }

    let parsed = merged.map(|merged| {
        merged
            .into_iter()
            .filter_map(|(key, value)| {
                let bytes = value.value()?;
                T::decode(bytes).ok().map(|decoded| (key, decoded))
            })
            .collect()
    });
    (parsed, unreachable)
}

async fn fetch_all(
    area: &str,
    endpoints: &[SocketAddr],
    filters: Option<WireFilterParams>,
    connect_timeout: Duration,
    process_timeout: Duration,
) -> Vec<(SocketAddr, Result<HashMap<String, Value>, ClientError>)> {
    let tasks: Vec<_> = endpoints
        .iter()
        .map(|&addr| {
            let area = area.to_string();
            let filters = filters.clone();
            let task = tokio::spawn(async move {
                let client = StoreClient::new(addr, "multi-dump")
                    .with_timeouts(connect_timeout, process_timeout);
                client.dump_key_vals(&area, filters, false).await
            });
            (addr, task)
        })
        .collect();

    // A task that fails to join still counts against its endpoint.
    let mut out = Vec::with_capacity(tasks.len());
    for (addr, task) in tasks {
        let result = match task.await {
            Ok(result) => result,
            Err(e) => Err(ClientError::Net(NetError::Protocol(format!(
                "dump task failed: {e}"
            )))),
        };
        out.push((addr, result));
    }
    out
}

fn merge_snapshot(acc: &mut HashMap<String, Value>, incoming: HashMap<String, Value>) {
    for (key, value) in incoming {
        match acc.get(&key) {
            Some(current)
                if !matches!(compare_values(&value, current), ValueCompare::Greater) => {}
            _ => {
                acc.insert(key, value);
            }
        }
    }
}

fn prefix_filters(key_prefix: &str) -> Option<WireFilterParams> {
    if key_prefix.is_empty() {
        None
    } else {
        Some(WireFilterParams {
            key_prefixes: vec![regex_escape(key_prefix)],
            originator_ids: Vec::new(),
            operator: 0,
        })
    }
}

/// Escape a literal prefix for use as an anchored pattern.
fn regex_escape(literal: &str) -> String {
    let mut out = String::with_capacity(literal.len());
    for c in literal.chars() {
        if c.is_ascii_alphanumeric() || matches!(c, ':' | '_' | '-' | '/' | ',' | '=') {
            out.push(c);
        } else {
            out.push('\\');
            out.push(c);
        }
    }
    out
}

fn check_error(reply: StoreReply) -> Result<StoreReply, ClientError> {
    if let Some(store_reply::Reply::Error(e)) = &reply.reply {
        return Err(ClientError::Store {
            code: e.code(),
            message: e.message.clone(),
        });
    }
    Ok(reply)
}

fn expect_key_vals(reply: StoreReply) -> Result<HashMap<String, Value>, ClientError> {
    match reply.reply {
        Some(store_reply::Reply::Publication(p)) => Ok(p
            .key_vals
            .into_iter()
            .map(|(k, v)| (k, Value::from(v)))
            .collect()),
        _ => Err(ClientError::UnexpectedReply),
    }
}

fn expect_ack(reply: StoreReply) -> Result<(), ClientError> {
    match reply.reply {
        Some(store_reply::Reply::Ack(_)) => Ok(()),
        _ => Err(ClientError::UnexpectedReply),
    }
}
