//! The per-connection message engine, the core of this crate.
//!
//! A [`Connection`] owns one transport (split into [`RawReader`]/[`RawWriter`] halves by
//! the server dispatcher or client driver), a write-once middleware chain, a
//! pending-request table, and the bookkeeping that carries it through its lifecycle:
//! `Dialing`/`Accepted` -> `Open` -> `Draining` -> `Terminal`. [`Connection::spawn`]
//! starts one receive task and one dedicated writer task; every inbound request or
//! notification spawns a further, tracked task so the receive loop never blocks on
//! handler code.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot, RwLock};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, warn, Instrument};

use crate::context::{RequestContext, ResponseContext};
use crate::error::{Error, Result};
use crate::id;
use crate::message::{self, Classified, Envelope, ErrorObject};
use crate::middleware::MiddlewareVec;
use crate::pending::PendingTable;
use crate::session::Session;
use crate::transport::{Frame, RawReader, RawWriter};

/// Which side of the wire a connection represents. Purely descriptive: the engine
/// itself is symmetric; this only affects logging and how the transport was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionRole {
    ServerAccepted,
    ClientInitiated,
}

/// Coarse lifecycle state, derived from the open flag and the task tracker rather than
/// stored as its own field that could drift out of sync with them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Open,
    Draining,
    Terminal,
}

/// Per-connection tunables. A plain struct, not a layered config loader: the framework
/// carries no state across process restarts.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub deadline: Duration,
    pub channel_size: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            deadline: Duration::from_secs(300),
            channel_size: 100,
        }
    }
}

type CloseHook = Box<dyn Fn() + Send + Sync>;

pub struct Connection {
    id: String,
    role: ConnectionRole,
    session: Session,
    middlewares: Arc<MiddlewareVec>,
    pending: PendingTable,
    deadline: Duration,
    channel_size: usize,
    open: RwLock<bool>,
    outbound: RwLock<Option<mpsc::Sender<Envelope>>>,
    tracker: TaskTracker,
    /// Cancelled once, the moment the connection begins shutting down.
    token: CancellationToken,
    /// Cancelled once every tracked task has finished and the close hook has run.
    done: CancellationToken,
    on_close: RwLock<Option<CloseHook>>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("role", &self.role)
            .finish_non_exhaustive()
    }
}

impl Connection {
    pub(crate) fn new(
        role: ConnectionRole,
        middlewares: Arc<MiddlewareVec>,
        config: ConnectionConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: id::generate(),
            role,
            session: Session::new(),
            middlewares,
            pending: PendingTable::new(),
            deadline: config.deadline,
            channel_size: config.channel_size,
            open: RwLock::new(false),
            outbound: RwLock::new(None),
            tracker: TaskTracker::new(),
            token: CancellationToken::new(),
            done: CancellationToken::new(),
            on_close: RwLock::new(None),
        })
    }

    /// A connection with no middleware and no attached transport, for tests that only
    /// need a handle to put behind a context.
    #[doc(hidden)]
    pub fn new_detached(role: ConnectionRole, deadline: Duration) -> Arc<Self> {
        Self::new(
            role,
            Arc::new(Vec::new()),
            ConnectionConfig {
                deadline,
                channel_size: 100,
            },
        )
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn role(&self) -> ConnectionRole {
        self.role
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub async fn is_open(&self) -> bool {
        *self.open.read().await
    }

    pub fn state(&self) -> ConnectionState {
        if self.token.is_cancelled() {
            if self.done.is_cancelled() {
                ConnectionState::Terminal
            } else {
                ConnectionState::Draining
            }
        } else {
            ConnectionState::Open
        }
    }

    /// Register a callback invoked exactly once, after the connection has fully torn
    /// down (every tracked task finished). This is the documented escape valve for
    /// callers who need outstanding requests to fail fast on close. The pending table
    /// itself is drained without synthesizing a "connection closed" response.
    pub async fn on_close<F: Fn() + Send + Sync + 'static>(&self, hook: F) {
        *self.on_close.write().await = Some(Box::new(hook));
    }

    /// Attach a transport and start the receive loop and the dedicated writer task.
    /// Called exactly once per connection by the server dispatcher or client driver,
    /// once a transport has been split into engine-facing halves.
    pub(crate) fn spawn(self: &Arc<Self>, reader: Box<dyn RawReader>, writer: Box<dyn RawWriter>) {
        let (tx, rx) = mpsc::channel(self.channel_size);
        // No other task can be contending for these locks yet: spawn runs once,
        // synchronously, before any task below is scheduled.
        *self
            .outbound
            .try_write()
            .expect("connection already spawned") = Some(tx);
        *self.open.try_write().expect("connection already spawned") = true;

        let writer_conn = self.clone();
        let _writer_handle = self.tracker.spawn(
            Self::writer_loop(writer_conn, writer, rx)
                .instrument(tracing::info_span!("writer", conn_id = %self.id)),
        );

        let receive_conn = self.clone();
        let _receive_handle = self.tracker.spawn(
            Self::receive_loop(receive_conn, reader)
                .instrument(tracing::info_span!("receive", conn_id = %self.id)),
        );

        let supervisor = self.clone();
        tokio::spawn(async move {
            supervisor.token.cancelled().await;
            supervisor.tracker.close();
            supervisor.tracker.wait().await;
            *supervisor.outbound.write().await = None;
            if let Some(hook) = supervisor.on_close.write().await.take() {
                hook();
            }
            supervisor.done.cancel();
        });
    }

    /// Flip the open flag false and cancel the shutdown token, exactly once. Safe to
    /// call from any task, including ones the tracker itself is tracking. Unlike
    /// [`Connection::close`], this never awaits the tracker.
    fn begin_close(&self) {
        let mut open = match self.open.try_write() {
            Ok(guard) => guard,
            Err(_) => return,
        };
        if !*open {
            return;
        }
        *open = false;
        drop(open);
        self.token.cancel();
        for tx in self.pending.drain() {
            drop(tx);
        }
    }

    /// Begin (or join) a graceful shutdown and wait until every spawned task (receive
    /// loop, writer loop, and every in-flight handler) has finished. Must be
    /// called from outside the tasks this connection itself tracks (the server
    /// dispatcher, the client driver, or test code all qualify).
    pub async fn close(self: &Arc<Self>) {
        self.begin_close();
        self.done.cancelled().await;
    }

    /// Wait for the connection to terminate, however that comes about (peer close,
    /// transport error, deadline, or a caller elsewhere calling `close()`), without
    /// forcing shutdown itself. Unlike `close`, this never cancels the token.
    pub async fn wait_closed(self: &Arc<Self>) {
        self.done.cancelled().await;
    }

    /// Issue a request and wait for the matching response. Registers the pending
    /// continuation before the frame reaches the wire, so a fast peer can never race
    /// the registration.
    pub async fn send_request(
        self: &Arc<Self>,
        method: impl Into<String>,
        params: Option<Value>,
    ) -> Result<ResponseContext> {
        let id = id::generate();
        let (tx, rx) = oneshot::channel();
        self.pending.register(id.clone(), tx);
        let envelope = Envelope::request(id.clone(), method.into(), params);
        if let Err(e) = self.send_envelope(envelope).await {
            self.pending.take(&id);
            return Err(e);
        }
        rx.await.map_err(|_| Error::Closed)
    }

    pub async fn send_notification(
        &self,
        method: impl Into<String>,
        params: Option<Value>,
    ) -> Result<()> {
        self.send_envelope(Envelope::notification(method.into(), params))
            .await
    }

    pub(crate) async fn send_response(
        &self,
        id: String,
        result: Option<Value>,
        error: Option<ErrorObject>,
    ) -> Result<()> {
        self.send_envelope(Envelope::response(id, result, error))
            .await
    }

    async fn send_envelope(&self, envelope: Envelope) -> Result<()> {
        if !*self.open.read().await {
            return Err(Error::Closed);
        }
        let guard = self.outbound.read().await;
        let sender = guard.as_ref().ok_or(Error::Closed)?;
        sender.send(envelope).await.map_err(|_| Error::Closed)
    }

    async fn write_envelope(
        deadline: Duration,
        writer: &mut Box<dyn RawWriter>,
        envelope: &Envelope,
    ) -> Result<()> {
        let text = message::encode(envelope)?;
        match tokio::time::timeout(deadline, writer.send(Frame::Text(text))).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(Error::DeadlineExceeded),
        }
    }

    async fn writer_loop(
        conn: Arc<Self>,
        mut writer: Box<dyn RawWriter>,
        mut rx: mpsc::Receiver<Envelope>,
    ) {
        loop {
            tokio::select! {
                biased;
                _ = conn.token.cancelled() => {
                    while let Ok(envelope) = rx.try_recv() {
                        if Self::write_envelope(conn.deadline, &mut writer, &envelope).await.is_err() {
                            break;
                        }
                    }
                    break;
                }
                msg = rx.recv() => {
                    match msg {
                        Some(envelope) => {
                            if let Err(e) = Self::write_envelope(conn.deadline, &mut writer, &envelope).await {
                                error!(conn_id = %conn.id, error = %e, "write failed, closing connection");
                                conn.begin_close();
                                break;
                            }
                        }
                        None => break,
                    }
                }
            }
        }
        let _ = writer.send(Frame::Close).await;
        conn.begin_close();
    }

    async fn receive_loop(conn: Arc<Self>, mut reader: Box<dyn RawReader>) {
        loop {
            let outcome = tokio::select! {
                biased;
                _ = conn.token.cancelled() => None,
                result = tokio::time::timeout(conn.deadline, reader.recv()) => Some(result),
            };
            let Some(outcome) = outcome else { break };

            let frame = match outcome {
                Ok(Ok(Some(frame))) => frame,
                Ok(Ok(None)) => {
                    debug!(conn_id = %conn.id, "peer ended the stream");
                    break;
                }
                Ok(Err(e)) => {
                    error!(conn_id = %conn.id, error = %e, "transport read error, closing connection");
                    break;
                }
                Err(_) => {
                    warn!(conn_id = %conn.id, "read deadline exceeded, closing connection");
                    break;
                }
            };

            match frame {
                Frame::Close => {
                    debug!(conn_id = %conn.id, "received close frame");
                    break;
                }
                Frame::Text(text) => {
                    let envelope = match message::decode(&text) {
                        Ok(envelope) => envelope,
                        Err(e) => {
                            error!(conn_id = %conn.id, error = %e, "malformed envelope, closing connection");
                            break;
                        }
                    };
                    match envelope.classify() {
                        Ok(Classified::Response { id, result, error }) => {
                            conn.dispatch_response(id, result, error);
                        }
                        Ok(classified) => conn.dispatch_request(classified),
                        Err(e) => {
                            error!(conn_id = %conn.id, error = %e, "envelope matched no known shape, closing connection");
                            break;
                        }
                    }
                }
            }
        }
        conn.begin_close();
    }

    fn dispatch_response(self: &Arc<Self>, id: String, result: Option<Value>, error: Option<ErrorObject>) {
        match self.pending.take(&id) {
            Some(tx) => {
                let ctx = ResponseContext::new(self.clone(), id, result, error);
                // The awaiting `send_request` future may already have been dropped
                // (e.g. its caller went away); a failed send is not an error here.
                let _ = tx.send(ctx);
            }
            None => {
                error!(conn_id = %self.id, id = %id, "response with no matching pending request, closing connection");
                self.begin_close();
            }
        }
    }

    fn dispatch_request(self: &Arc<Self>, classified: Classified) {
        let (id, method, params) = match classified {
            Classified::Request { id, method, params } => (Some(id), method, params),
            Classified::Notification { method, params } => (None, method, params),
            Classified::Response { .. } => unreachable!("responses never reach dispatch_request"),
        };

        let conn = self.clone();
        let _handler_handle = self.tracker.spawn(
            async move {
                let middlewares = conn.middlewares.clone();
                let run_conn = conn.clone();
                let handle = tokio::spawn(async move {
                    let mut ctx = RequestContext::new(run_conn, id, method, params, &middlewares);
                    let outcome = ctx.next().await;
                    (outcome, ctx.id, ctx.result, ctx.error)
                });

                match handle.await {
                    Ok((Ok(()), Some(id), result, error)) if result.is_some() || error.is_some() => {
                        // setting both picks error: a reply is never ambiguous on the wire
                        let result = if error.is_some() { None } else { result };
                        if let Err(e) = conn.send_response(id, result, error).await {
                            error!(conn_id = %conn.id, error = %e, "failed to write response");
                        }
                    }
                    Ok((Ok(()), _, _, _)) => {}
                    Ok((Err(e), _, _, _)) => {
                        error!(conn_id = %conn.id, error = %e, "middleware chain returned an error, closing connection");
                        conn.begin_close();
                    }
                    Err(join_err) => {
                        if join_err.is_panic() {
                            error!(conn_id = %conn.id, "middleware panicked, closing connection");
                        } else {
                            warn!(conn_id = %conn.id, "handler task was cancelled");
                        }
                        conn.begin_close();
                    }
                }
            }
            .instrument(tracing::info_span!("handler", conn_id = %self.id)),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn new_detached_starts_closed() {
        let conn = Connection::new_detached(ConnectionRole::ClientInitiated, Duration::from_secs(1));
        assert!(!conn.is_open().await);
        assert_eq!(conn.state(), ConnectionState::Open);
    }

    #[tokio::test]
    async fn send_before_spawn_is_closed_error() {
        let conn = Connection::new_detached(ConnectionRole::ServerAccepted, Duration::from_secs(1));
        let err = conn.send_notification("ping", None).await.unwrap_err();
        assert!(matches!(err, Error::Closed));
    }
}
