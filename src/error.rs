//! Unified error type for the messaging engine.
//!
//! Mirrors the four failure domains called out in the design: transport, protocol,
//! application, and internal (panic) errors. Transport/protocol/internal errors always
//! close the connection; application errors placed into a response's error slot do not.

use thiserror::Error;

/// Errors produced by the connection engine, server dispatcher, and client driver.
#[derive(Error, Debug)]
pub enum Error {
    /// A read, write, or deadline failure on the underlying transport.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// A malformed envelope or a response with no matching pending request.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A middleware returned an error while processing a message.
    #[error("application error: {0}")]
    Application(#[source] anyhow::Error),

    /// A handler task panicked; the panic payload is captured as text where possible.
    #[error("internal error (handler panicked): {0}")]
    Internal(String),

    /// `send`/`send_request`/`send_notification` called after the connection closed.
    #[error("connection closed")]
    Closed,

    /// `connect`/`close` exceeded the connection's configured deadline.
    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// Failed to build a TLS configuration from the supplied certificate material.
    #[error("tls configuration error: {0}")]
    Tls(String),
}

/// Transport-level failures, distinct from protocol/application failures.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("websocket error: {0}")]
    WebSocket(#[from] axum::Error),

    #[error("websocket client error: {0}")]
    Client(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("connection ended")]
    Eof,
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Build an [`Error::Application`] from a middleware's returned error.
    pub fn application<E: Into<anyhow::Error>>(err: E) -> Self {
        Error::Application(err.into())
    }

    /// Build an [`Error::Internal`] from a joined task's panic payload.
    pub fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let msg = if let Some(s) = payload.downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        Error::Internal(msg)
    }
}
