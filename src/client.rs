//! The client driver: dials a server (optionally over TLS), attaches the connection
//! engine, and starts its receive loop. Symmetric with the server dispatcher: both
//! sides hand a transport to the same [`Connection`] engine.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::net::TcpStream;
use tokio_tungstenite::client_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;

use crate::connection::{Connection, ConnectionConfig, ConnectionRole};
use crate::context::ResponseContext;
use crate::error::{Error, Result, TransportError};
use crate::middleware::{Middleware, MiddlewareVec};
use crate::tls::TlsClientConfig;
use crate::transport::{split_client, BoxedStream, ClientWsStream};

/// Builds a [`Client`] from a chain of middlewares and connection tunables, mirroring
/// [`crate::server::ServerBuilder`].
pub struct ClientBuilder {
    middlewares: MiddlewareVec,
    deadline: Duration,
    channel_size: usize,
    tls: Option<TlsClientConfig>,
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self {
            middlewares: Vec::new(),
            deadline: Duration::from_secs(300),
            channel_size: 100,
            tls: None,
        }
    }
}

impl ClientBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_middleware<M: Middleware + 'static>(mut self, middleware: M) -> Self {
        self.middlewares.push(Arc::new(middleware));
        self
    }

    #[must_use]
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    #[must_use]
    pub fn with_channel_size(mut self, size: usize) -> Self {
        self.channel_size = size;
        self
    }

    #[must_use]
    pub fn with_tls(mut self, tls: TlsClientConfig) -> Self {
        self.tls = Some(tls);
        self
    }

    pub fn build(self) -> Client {
        Client {
            middlewares: Arc::new(self.middlewares),
            config: ConnectionConfig {
                deadline: self.deadline,
                channel_size: self.channel_size,
            },
            tls: self.tls,
        }
    }
}

/// A dialer for a single outbound connection. Each `connect`/`use_transport` call
/// produces a fresh [`Connection`]; the client itself holds no state beyond its
/// configuration, so a single `Client` may dial several peers concurrently.
#[derive(Clone)]
pub struct Client {
    middlewares: Arc<MiddlewareVec>,
    config: ConnectionConfig,
    tls: Option<TlsClientConfig>,
}

impl Client {
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Dial `host:port`, wrap the TCP stream in TLS if a [`TlsClientConfig`] was
    /// supplied to the builder, perform the WebSocket handshake against `url`, and
    /// attach the resulting transport to a new connection engine.
    pub async fn connect(&self, url: &str) -> Result<Arc<Connection>> {
        let request = url
            .into_client_request()
            .map_err(|e| Error::Transport(TransportError::Client(e)))?;

        let host = request
            .uri()
            .host()
            .ok_or_else(|| Error::Protocol("url has no host".into()))?
            .to_string();
        let port = request
            .uri()
            .port_u16()
            .unwrap_or(if self.tls.is_some() { 443 } else { 80 });

        let tcp = TcpStream::connect((host.as_str(), port))
            .await
            .map_err(|e| Error::Transport(TransportError::Io(e)))?;

        let boxed: BoxedStream = match &self.tls {
            Some(tls) => {
                let rustls_config = tls.clone().into_rustls_config()?;
                let connector = tokio_rustls::TlsConnector::from(Arc::new(rustls_config));
                let server_name = rustls::pki_types::ServerName::try_from(host.clone())
                    .map_err(|e| Error::Tls(format!("invalid server name {host}: {e}")))?;
                let tls_stream = connector
                    .connect(server_name, tcp)
                    .await
                    .map_err(|e| Error::Transport(TransportError::Io(e)))?;
                Box::new(tls_stream)
            }
            None => Box::new(tcp),
        };

        let (ws_stream, _response) = client_async(request, boxed)
            .await
            .map_err(|e| Error::Transport(TransportError::Client(e)))?;

        self.use_transport(ws_stream)
    }

    /// Attach an already-established `tokio-tungstenite` client stream (e.g. dialed
    /// externally with a custom connector) to a new connection engine.
    pub fn use_transport(&self, stream: ClientWsStream) -> Result<Arc<Connection>> {
        let conn = Connection::new(
            ConnectionRole::ClientInitiated,
            self.middlewares.clone(),
            self.config.clone(),
        );
        let (reader, writer) = split_client(stream);
        conn.spawn(reader, writer);
        Ok(conn)
    }

    /// Convenience wrapper around [`Connection::send_request`] for callers that don't
    /// want to hold onto the `Arc<Connection>` themselves.
    pub async fn send_request(
        conn: &Arc<Connection>,
        method: impl Into<String>,
        params: Option<Value>,
    ) -> Result<ResponseContext> {
        conn.send_request(method, params).await
    }
}
