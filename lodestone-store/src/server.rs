//! Accept loop serving the store's message surface.
//!
//! One task per connection. Ordinary requests are request/reply on the
//! same stream; publications are fire-and-forget merges; a subscribe
//! request turns the connection into a one-way publication stream.

use crate::error::StoreError;
use crate::hub::Publication;
use crate::store::KvStoreHandle;
use lodestone_net::{MessageSink, MessageStream, NetError};
use lodestone_types::wire::{
    store_reply, store_request, AckReply, AreasReply, StoreReply, StoreRequest, SubscribeRequest,
    WireError, WireErrorCode, WirePublication, WireValue,
};
use std::net::SocketAddr;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};

/// Bind and serve until the task is dropped.
pub async fn serve(listener: TcpListener, handle: KvStoreHandle) {
    loop {
        match listener.accept().await {
            Ok((stream, peer_addr)) => {
                let handle = handle.clone();
                tokio::spawn(async move {
                    if let Err(e) = serve_connection(stream, peer_addr, handle).await {
                        tracing::debug!(%peer_addr, error = %e, "connection ended");
                    }
                });
            }
            Err(e) => {
                tracing::warn!(error = %e, "accept failed");
            }
        }
    }
}

async fn serve_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    handle: KvStoreHandle,
) -> Result<(), NetError> {
    stream.set_nodelay(true)?;
    let (read, write) = stream.into_split();
    let mut stream = MessageStream::new(read);
    let mut sink = MessageSink::new(write);

    while let Some(request) = stream.recv::<StoreRequest>().await? {
        let sender_id = request.sender_id;
        match request.request {
            None => {
                let reply = error_reply(&StoreError::InvalidArgument("empty request".into()));
                sink.send(&reply).await?;
            }
            Some(store_request::Request::Publication(publication)) => {
                // Flood traffic: merge, never reply.
                if let Err(e) = handle.ingest_publication(sender_id, publication).await {
                    tracing::debug!(%peer_addr, error = %e, "dropped publication");
                }
            }
            Some(store_request::Request::Subscribe(sub)) => {
                return serve_subscription(sub, stream, sink, handle).await;
            }
            Some(request) => {
                let reply = dispatch(&handle, sender_id, request).await;
                sink.send(&reply).await?;
            }
        }
    }
    Ok(())
}

async fn dispatch(
    handle: &KvStoreHandle,
    sender_id: String,
    request: store_request::Request,
) -> StoreReply {
    use store_request::Request;
    let result: Result<store_reply::Reply, StoreError> = match request {
        Request::GetKeys(req) => handle
            .get_key_vals(&req.area, req.keys)
            .await
            .map(|kvs| key_vals_reply(&req.area, kvs)),
        Request::SetKeyVals(req) => {
            let key_vals = req
                .key_vals
                .into_iter()
                .map(|(k, v)| (k, lodestone_types::Value::from(v)))
                .collect();
            handle
                .set_key_vals(&req.area, key_vals)
                .await
                .map(|()| store_reply::Reply::Ack(AckReply {}))
        }
        Request::DumpKeyVals(req) => handle
            .dump_key_vals(&req.area, req.filters.as_ref(), req.do_not_publish_value)
            .await
            .map(|kvs| key_vals_reply(&req.area, kvs)),
        Request::DumpHashes(req) => handle
            .dump_hashes(&req.area, req.filters.as_ref())
            .await
            .map(|kvs| key_vals_reply(&req.area, kvs)),
        Request::GetPeers(req) => handle
            .get_peers(&req.area)
            .await
            .map(|peers| store_reply::Reply::Peers(lodestone_types::wire::PeersReply { peers })),
        Request::AddPeers(req) => {
            let mut peers = Vec::with_capacity(req.peers.len());
            let mut parse_error = None;
            for spec in req.peers {
                match spec.addr.parse::<SocketAddr>() {
                    Ok(addr) => peers.push((spec.peer_name, addr)),
                    Err(e) => {
                        parse_error = Some(StoreError::InvalidArgument(format!(
                            "bad peer address {}: {e}",
                            spec.addr
                        )));
                        break;
                    }
                }
            }
            match parse_error {
                Some(e) => Err(e),
                None => handle
                    .add_peers(&req.area, peers)
                    .await
                    .map(|()| store_reply::Reply::Ack(AckReply {})),
            }
        }
        Request::DelPeers(req) => handle
            .del_peers(&req.area, req.peer_names)
            .await
            .map(|()| store_reply::Reply::Ack(AckReply {})),
        Request::DualMessages(req) => {
            let msgs = req.messages.clone();
            let from = msgs
                .as_ref()
                .map(|m| m.sender_id.clone())
                .unwrap_or(sender_id);
            handle
                .process_dual_messages(
                    &req.area,
                    from,
                    msgs.map(|m| m.messages).unwrap_or_default(),
                )
                .await
                .map(|()| store_reply::Reply::Ack(AckReply {}))
        }
        Request::FloodTopoSet(req) => handle
            .update_flood_topo_child(&req.area, req.root_id, req.peer_name, req.set_child)
            .await
            .map(|()| store_reply::Reply::Ack(AckReply {})),
        Request::GetSptInfos(req) => handle
            .get_spt_infos(&req.area)
            .await
            .map(store_reply::Reply::SptInfos),
        Request::GetAreas(_) => Ok(store_reply::Reply::Areas(AreasReply {
            areas: handle.areas(),
        })),
        Request::Subscribe(_) | Request::Publication(_) => {
            unreachable!("handled before dispatch")
        }
    };

    match result {
        Ok(reply) => StoreReply { reply: Some(reply) },
        Err(e) => error_reply(&e),
    }
}

async fn serve_subscription(
    request: SubscribeRequest,
    mut stream: MessageStream<OwnedReadHalf>,
    mut sink: MessageSink<OwnedWriteHalf>,
    handle: KvStoreHandle,
) -> Result<(), NetError> {
    let subscribed = handle
        .subscribe(
            request.filters.as_ref(),
            request.areas,
            request.ignore_ttl,
            request.do_not_publish_value,
        )
        .await;
    let (snapshots, mut subscription) = match subscribed {
        Ok(parts) => parts,
        Err(e) => {
            sink.send(&error_reply(&e)).await?;
            return Ok(());
        }
    };

    for snapshot in snapshots {
        sink.send(&publication_reply(snapshot)).await?;
    }

    loop {
        tokio::select! {
            publication = subscription.recv() => match publication {
                Ok(Some(publication)) => {
                    sink.send(&publication_reply(publication)).await?;
                }
                Ok(None) => return Ok(()),
                Err(e) => {
                    // Lagged: tell the consumer why the stream died.
                    sink.send(&error_reply(&e)).await?;
                    return Ok(());
                }
            },
            incoming = stream.recv::<StoreRequest>() => {
                // Any frame (or close) from the consumer ends the stream.
                subscription.cancel();
                return incoming.map(|_| ());
            }
        }
    }
}

fn key_vals_reply(area: &str, key_vals: crate::db::KeyValMap) -> store_reply::Reply {
    store_reply::Reply::Publication(WirePublication {
        area: area.to_string(),
        key_vals: key_vals
            .into_iter()
            .map(|(k, v)| (k, WireValue::from(v)))
            .collect(),
        expired_keys: Vec::new(),
        node_ids: Vec::new(),
        flood_root_id: None,
        timestamp_ms: crate::area::unix_now_ms(),
    })
}

fn publication_reply(publication: Publication) -> StoreReply {
    StoreReply {
        reply: Some(store_reply::Reply::Publication(WirePublication {
            area: publication.area.as_str().to_string(),
            key_vals: publication
                .key_vals
                .into_iter()
                .map(|(k, v)| (k, WireValue::from(v)))
                .collect(),
            expired_keys: publication.expired_keys,
            node_ids: Vec::new(),
            flood_root_id: None,
            timestamp_ms: publication.timestamp_ms,
        })),
    }
}

fn error_reply(e: &StoreError) -> StoreReply {
    let code = match e {
        StoreError::InvalidArgument(_) => WireErrorCode::InvalidArgument,
        StoreError::UnknownArea(_) => WireErrorCode::UnknownArea,
        StoreError::Lagged => WireErrorCode::Lagged,
        StoreError::Internal(_) => WireErrorCode::Internal,
    };
    StoreReply {
        reply: Some(store_reply::Reply::Error(WireError {
            code: code as i32,
            message: e.to_string(),
        })),
    }
}
