//! Message framing using tokio-util's LengthDelimitedCodec.
//!
//! Generic over any AsyncWrite/AsyncRead pair so tests can run the same
//! code over in-memory duplex streams.

use crate::error::NetError;
use futures_util::{SinkExt, StreamExt};
use prost::Message;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{FramedRead, FramedWrite, LengthDelimitedCodec};

/// Framed writer for length-prefixed prost messages.
pub struct MessageSink<W: AsyncWrite + Send + Unpin> {
    inner: FramedWrite<W, LengthDelimitedCodec>,
}

impl<W: AsyncWrite + Send + Unpin> MessageSink<W> {
    pub fn new(stream: W) -> Self {
        Self {
            inner: FramedWrite::new(stream, LengthDelimitedCodec::new()),
        }
    }

    pub async fn send<M: Message>(&mut self, msg: &M) -> Result<(), NetError> {
        let bytes = msg.encode_to_vec();
        self.inner.send(bytes.into()).await.map_err(NetError::Io)
    }

    pub fn into_inner(self) -> W {
        self.inner.into_inner()
    }
}

/// Framed reader for length-prefixed prost messages.
pub struct MessageStream<R: AsyncRead + Send + Unpin> {
    inner: FramedRead<R, LengthDelimitedCodec>,
}

impl<R: AsyncRead + Send + Unpin> MessageStream<R> {
    pub fn new(stream: R) -> Self {
        Self {
            inner: FramedRead::new(stream, LengthDelimitedCodec::new()),
        }
    }

    /// Receive the next message, or None when the stream has closed.
    pub async fn recv<M: Message + Default>(&mut self) -> Result<Option<M>, NetError> {
        match self.inner.next().await {
            Some(Ok(bytes)) => M::decode(&bytes[..]).map(Some).map_err(NetError::from),
            Some(Err(e)) => Err(NetError::Io(e)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lodestone_types::wire::{StoreRequest, GetKeysRequest, store_request};

    #[tokio::test]
    async fn round_trip_over_duplex() {
        let (client, server) = tokio::io::duplex(4096);
        let mut sink = MessageSink::new(client);
        let mut stream = MessageStream::new(server);

        let msg = StoreRequest {
            sender_id: "node-a".into(),
            request: Some(store_request::Request::GetKeys(GetKeysRequest {
                area: "spine".into(),
                keys: vec!["k1".into()],
            })),
        };
        sink.send(&msg).await.unwrap();
        let got: StoreRequest = stream.recv().await.unwrap().unwrap();
        assert_eq!(got, msg);

        drop(sink);
        let end: Option<StoreRequest> = stream.recv().await.unwrap();
        assert!(end.is_none());
    }
}
