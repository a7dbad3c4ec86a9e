//! Connection setup and one-shot request/reply over framed TCP.

use crate::error::NetError;
use crate::framing::{MessageSink, MessageStream};
use lodestone_types::wire::{StoreReply, StoreRequest};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

/// A framed duplex connection to a remote store.
pub struct Connection {
    pub peer_addr: SocketAddr,
    pub sink: MessageSink<OwnedWriteHalf>,
    pub stream: MessageStream<OwnedReadHalf>,
}

impl Connection {
    /// Send a request and wait for a single reply.
    pub async fn request(
        &mut self,
        req: &StoreRequest,
        process_timeout: Duration,
    ) -> Result<StoreReply, NetError> {
        self.sink.send(req).await?;
        let reply = tokio::time::timeout(process_timeout, self.stream.recv::<StoreReply>())
            .await
            .map_err(|_| NetError::ProcessTimeout)??;
        reply.ok_or(NetError::Closed)
    }

    /// Send without waiting for a reply (floods).
    pub async fn send(&mut self, req: &StoreRequest) -> Result<(), NetError> {
        self.sink.send(req).await
    }

    /// Receive the next reply frame; used by subscription streams.
    pub async fn recv(&mut self) -> Result<Option<StoreReply>, NetError> {
        self.stream.recv::<StoreReply>().await
    }
}

/// Dial a store with a connect deadline.
pub async fn connect(addr: SocketAddr, connect_timeout: Duration) -> Result<Connection, NetError> {
    let stream = tokio::time::timeout(connect_timeout, TcpStream::connect(addr))
        .await
        .map_err(|_| NetError::ConnectTimeout(addr))??;
    stream.set_nodelay(true)?;
    let (read, write) = stream.into_split();
    Ok(Connection {
        peer_addr: addr,
        sink: MessageSink::new(write),
        stream: MessageStream::new(read),
    })
}

/// Dial, exchange one request/reply, hang up.
pub async fn request(
    addr: SocketAddr,
    req: &StoreRequest,
    connect_timeout: Duration,
    process_timeout: Duration,
) -> Result<StoreReply, NetError> {
    let mut conn = connect(addr, connect_timeout).await?;
    conn.request(req, process_timeout).await
}
