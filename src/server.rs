//! The server dispatcher: an `axum` accept loop, a connection registry, and a builder
//! that mirrors the transport layer's original `WebSocketBuilder` shape.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::connect_info::ConnectInfo;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use dashmap::DashMap;
use serde_json::Value;
use tokio_util::task::TaskTracker;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::connection::{Connection, ConnectionConfig, ConnectionRole};
use crate::context::ResponseContext;
use crate::error::{Error, Result};
use crate::middleware::{Middleware, MiddlewareVec};
use crate::tls::TlsServerConfig;
use crate::transport::split_axum;

/// Builds a [`Server`] from a chain of middlewares and connection tunables, mirroring
/// the transport layer's `WebSocketBuilder` fluent interface.
pub struct ServerBuilder {
    middlewares: MiddlewareVec,
    deadline: Duration,
    channel_size: usize,
    max_connections: Option<usize>,
    tls: Option<TlsServerConfig>,
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self {
            middlewares: Vec::new(),
            deadline: Duration::from_secs(300),
            channel_size: 100,
            max_connections: None,
            tls: None,
        }
    }
}

impl ServerBuilder {
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
    pub fn with_tls(mut self, tls: TlsServerConfig) -> Self {
        self.tls = Some(tls);
        self
    }

    /// Reject new connections once `max` are registered. Unset means unlimited.
    #[must_use]
    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = Some(max);
        self
    }

    pub fn build(self) -> Server {
        Server {
            inner: Arc::new(ServerInner {
                middlewares: Arc::new(self.middlewares),
                config: ConnectionConfig {
                    deadline: self.deadline,
                    channel_size: self.channel_size,
                },
                max_connections: self.max_connections,
                tls: self.tls,
                registry: DashMap::new(),
                tracker: TaskTracker::new(),
            }),
        }
    }
}

struct ServerInner {
    middlewares: Arc<MiddlewareVec>,
    config: ConnectionConfig,
    max_connections: Option<usize>,
    tls: Option<TlsServerConfig>,
    registry: DashMap<String, Arc<Connection>>,
    tracker: TaskTracker,
}

/// A running (or not-yet-bound) server: accepts WebSocket connections, dispatches each
/// through the shared middleware chain, and tracks every connection for graceful drain.
#[derive(Clone)]
pub struct Server {
    inner: Arc<ServerInner>,
}

impl Server {
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    fn router(&self) -> Router {
        Router::new()
            .route("/", get(upgrade_handler))
            .layer(TraceLayer::new_for_http())
            .with_state(self.inner.clone())
    }

    /// Bind and serve, plain TCP, until the returned future is dropped or `close()` is
    /// called from elsewhere. Mirrors `axum::serve`.
    pub async fn serve(&self, addr: SocketAddr) -> Result<()> {
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| Error::Transport(crate::error::TransportError::Io(e)))?;
        info!(%addr, "server listening");
        axum::serve(
            listener,
            self.router()
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .map_err(|e| Error::Transport(crate::error::TransportError::Io(e)))
    }

    /// Bind and serve over TLS, using the `TlsServerConfig` supplied to the builder.
    pub async fn serve_tls(&self, addr: SocketAddr) -> Result<()> {
        let tls = self
            .inner
            .tls
            .clone()
            .ok_or_else(|| Error::Tls("no TLS configuration supplied to the server builder".into()))?;
        let rustls_config = tls.into_rustls_config()?;
        let config = axum_server::tls_rustls::RustlsConfig::from_config(Arc::new(rustls_config));
        info!(%addr, "server listening (tls)");
        axum_server::bind_rustls(addr, config)
            .serve(
                self.router()
                    .into_make_service_with_connect_info::<SocketAddr>(),
            )
            .await
            .map_err(|e| Error::Transport(crate::error::TransportError::Io(e)))
    }

    /// Look up a live connection by its connection ID.
    pub fn connection(&self, conn_id: &str) -> Option<Arc<Connection>> {
        self.inner.registry.get(conn_id).map(|e| e.value().clone())
    }

    pub async fn send_request(
        &self,
        conn_id: &str,
        method: impl Into<String>,
        params: Option<Value>,
    ) -> Result<ResponseContext> {
        let conn = self.connection(conn_id).ok_or(Error::Closed)?;
        conn.send_request(method, params).await
    }

    pub async fn send_notification(
        &self,
        conn_id: &str,
        method: impl Into<String>,
        params: Option<Value>,
    ) -> Result<()> {
        let conn = self.connection(conn_id).ok_or(Error::Closed)?;
        conn.send_notification(method, params).await
    }

    /// Send the same notification to every currently connected peer. Best-effort: a
    /// failure on one connection does not abort the rest.
    pub async fn broadcast(&self, method: impl Into<String>, params: Option<Value>) {
        let method = method.into();
        let conns: Vec<Arc<Connection>> = self
            .inner
            .registry
            .iter()
            .map(|e| e.value().clone())
            .collect();
        for conn in conns {
            if let Err(e) = conn.send_notification(method.clone(), params.clone()).await {
                debug!(conn_id = conn.id(), error = %e, "broadcast delivery failed");
            }
        }
    }

    /// Gracefully close every tracked connection and wait for all of their tasks to
    /// finish. Does not stop `serve`/`serve_tls` themselves. Drop the serve future (or
    /// race it against a cancellation signal) to stop accepting new connections.
    pub async fn close(&self) {
        let conns: Vec<Arc<Connection>> = self
            .inner
            .registry
            .iter()
            .map(|e| e.value().clone())
            .collect();
        for conn in &conns {
            conn.close().await;
        }
        self.inner.tracker.close();
        self.inner.tracker.wait().await;
    }
}

async fn upgrade_handler(
    State(inner): State<Arc<ServerInner>>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |mut socket| async move {
        if let Some(max) = inner.max_connections {
            if inner.registry.len() >= max {
                warn!(%remote, max, "rejecting connection, at max_connections capacity");
                use axum::extract::ws::{CloseFrame, Message};
                let _ = socket
                    .send(Message::Close(Some(CloseFrame {
                        code: 1013,
                        reason: "server at capacity".into(),
                    })))
                    .await;
                return;
            }
        }

        let conn = Connection::new(
            ConnectionRole::ServerAccepted,
            inner.middlewares.clone(),
            inner.config.clone(),
        );
        let conn_id = conn.id().to_string();
        inner.registry.insert(conn_id.clone(), conn.clone());

        let span = info_span!("connection", conn_id = %conn_id, %remote);
        let registry_conn_id = conn_id.clone();
        let tracker_inner = inner.clone();
        let _handle = inner.tracker.spawn(
            async move {
                debug!("accepted websocket connection");
                let (reader, writer) = split_axum(socket);
                conn.spawn(reader, writer);
                conn.wait_closed().await;
                tracker_inner.registry.remove(&registry_conn_id);
                debug!("connection closed and removed from registry");
            }
            .instrument(span),
        );
    })
}
