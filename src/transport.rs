//! Transport adapters.
//!
//! The connection engine (`connection.rs`) is written once against a pair of small
//! traits, [`RawReader`] and [`RawWriter`], rather than against a concrete socket
//! type. The server side feeds it a split `axum` `WebSocket`; the client side feeds it
//! a split `tokio-tungstenite` `WebSocketStream` dialed over plain TCP or `tokio-rustls`
//! TLS. WebSocket framing itself is entirely delegated to those two libraries; this
//! module only adapts their message enums to the engine's minimal [`Frame`] type.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};

use crate::error::{Error, Result, TransportError};

/// The minimal set of frame kinds the connection engine cares about. Ping/Pong are
/// handled transparently by the adapters themselves and never surface as a [`Frame`].
#[derive(Debug)]
pub enum Frame {
    Text(String),
    Close,
}

/// The receive half of a transport.
#[async_trait]
pub trait RawReader: Send {
    /// Read the next frame. `Ok(None)` means the peer's stream ended cleanly.
    async fn recv(&mut self) -> Result<Option<Frame>>;
}

/// The send half of a transport.
#[async_trait]
pub trait RawWriter: Send {
    async fn send(&mut self, frame: Frame) -> Result<()>;
}

// ---- Server side: axum WebSocket --------------------------------------------------

pub struct AxumReader(pub futures_util::stream::SplitStream<axum::extract::ws::WebSocket>);
pub struct AxumWriter(
    pub futures_util::stream::SplitSink<axum::extract::ws::WebSocket, axum::extract::ws::Message>,
);

#[async_trait]
impl RawReader for AxumReader {
    async fn recv(&mut self) -> Result<Option<Frame>> {
        use axum::extract::ws::Message as M;
        loop {
            return match self.0.next().await {
                None => Ok(None),
                Some(Ok(M::Text(text))) => Ok(Some(Frame::Text(text))),
                Some(Ok(M::Close(_))) => Ok(Some(Frame::Close)),
                Some(Ok(M::Ping(_))) | Some(Ok(M::Pong(_))) => continue,
                Some(Ok(M::Binary(_))) => {
                    Err(Error::Protocol("binary frames are not supported".into()))
                }
                Some(Err(e)) => Err(Error::Transport(TransportError::WebSocket(e))),
            };
        }
    }
}

#[async_trait]
impl RawWriter for AxumWriter {
    async fn send(&mut self, frame: Frame) -> Result<()> {
        use axum::extract::ws::Message as M;
        let msg = match frame {
            Frame::Text(t) => M::Text(t),
            Frame::Close => M::Close(None),
        };
        self.0
            .send(msg)
            .await
            .map_err(|e| Error::Transport(TransportError::WebSocket(e)))
    }
}

// ---- Client side: tokio-tungstenite over plain TCP or tokio-rustls TLS ------------

/// A helper supertrait so a dialed stream (plain `TcpStream` or a `tokio-rustls`
/// `TlsStream<TcpStream>`) can be boxed into a single trait object before being handed
/// to `tokio-tungstenite`, which is itself generic over the underlying stream type.
pub trait AsyncStream: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send {}
impl<T: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send> AsyncStream for T {}

pub type BoxedStream = Box<dyn AsyncStream>;
pub type ClientWsStream = tokio_tungstenite::WebSocketStream<BoxedStream>;

pub struct TungsteniteReader(
    pub futures_util::stream::SplitStream<ClientWsStream>,
);
pub struct TungsteniteWriter(
    pub futures_util::stream::SplitSink<
        ClientWsStream,
        tokio_tungstenite::tungstenite::Message,
    >,
);

#[async_trait]
impl RawReader for TungsteniteReader {
    async fn recv(&mut self) -> Result<Option<Frame>> {
        use tokio_tungstenite::tungstenite::Message as M;
        loop {
            return match self.0.next().await {
                None => Ok(None),
                Some(Ok(M::Text(text))) => Ok(Some(Frame::Text(text))),
                Some(Ok(M::Close(_))) => Ok(Some(Frame::Close)),
                Some(Ok(M::Ping(_))) | Some(Ok(M::Pong(_))) | Some(Ok(M::Frame(_))) => continue,
                Some(Ok(M::Binary(_))) => {
                    Err(Error::Protocol("binary frames are not supported".into()))
                }
                Some(Err(e)) => Err(Error::Transport(TransportError::Client(e))),
            };
        }
    }
}

#[async_trait]
impl RawWriter for TungsteniteWriter {
    async fn send(&mut self, frame: Frame) -> Result<()> {
        use tokio_tungstenite::tungstenite::Message as M;
        let msg = match frame {
            Frame::Text(t) => M::Text(t),
            Frame::Close => M::Close(None),
        };
        self.0
            .send(msg)
            .await
            .map_err(|e| Error::Transport(TransportError::Client(e)))
    }
}

/// Split a server-accepted `axum` WebSocket into engine-facing reader/writer halves.
pub fn split_axum(
    socket: axum::extract::ws::WebSocket,
) -> (Box<dyn RawReader>, Box<dyn RawWriter>) {
    let (sink, stream) = socket.split();
    (Box::new(AxumReader(stream)), Box::new(AxumWriter(sink)))
}

/// Split a client `tokio-tungstenite` stream into engine-facing reader/writer halves.
pub fn split_client(stream: ClientWsStream) -> (Box<dyn RawReader>, Box<dyn RawWriter>) {
    let (sink, stream) = stream.split();
    (
        Box::new(TungsteniteReader(stream)),
        Box::new(TungsteniteWriter(sink)),
    )
}
