//! Per-message contexts carried through the middleware chain.
//!
//! A [`RequestContext`] is created for every inbound request *and* every inbound
//! notification (a notification is a request context with an empty `id`, the data
//! flow the rest of the engine is built around). A [`ResponseContext`] is created once
//! per inbound response and handed to exactly one pending-request continuation; nothing
//! else ever sees it.

use std::collections::HashMap;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::connection::Connection;
use crate::error::Result;
use crate::message::ErrorObject;
use crate::middleware::MiddlewareVec;

/// The context threaded through a connection's inbound middleware chain.
///
/// `id` is `None` for notifications. Calling `next()` past the end of the chain is a
/// no-op; a middleware that never calls `next()` simply stops the chain there (valid
/// for notifications, and for requests whose reply will arrive asynchronously via a
/// later call to [`Connection::send`]).
pub struct RequestContext<'a> {
    pub connection: Arc<Connection>,
    pub id: Option<String>,
    pub method: String,
    params: Option<Value>,
    pub result: Option<Value>,
    pub error: Option<ErrorObject>,
    /// Message-scoped key/value store, distinct from the connection-scoped session
    /// reachable via `connection.session()`.
    pub session: HashMap<String, Value>,
    middlewares: &'a MiddlewareVec,
    index: usize,
}

impl<'a> RequestContext<'a> {
    pub(crate) fn new(
        connection: Arc<Connection>,
        id: Option<String>,
        method: String,
        params: Option<Value>,
        middlewares: &'a MiddlewareVec,
    ) -> Self {
        Self {
            connection,
            id,
            method,
            params,
            result: None,
            error: None,
            session: HashMap::new(),
            middlewares,
            index: 0,
        }
    }

    /// Whether this context represents a notification (no reply is ever written).
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }

    /// Decode the preserved `params` fragment into a caller-provided shape. A missing
    /// fragment decodes successfully only if `T` can be produced from JSON `null`
    /// (e.g. `Option<_>`, `()`, or a `Default`-friendly struct using `#[serde(default)]`
    /// fields); otherwise it surfaces as a protocol error.
    pub fn params<T: DeserializeOwned>(&self) -> Result<T> {
        let value = self.params.clone().unwrap_or(Value::Null);
        serde_json::from_value(value)
            .map_err(|e| crate::error::Error::Protocol(format!("invalid params: {e}")))
    }

    /// Advance the chain cursor and invoke the next middleware, if any remain.
    pub async fn next(&mut self) -> Result<()> {
        if self.index >= self.middlewares.len() {
            return Ok(());
        }
        let middleware = self.middlewares[self.index].clone();
        self.index += 1;
        middleware.handle(self).await
    }
}

/// The context handed to a pending request's continuation once its matching response
/// arrives. Created once, consumed once.
pub struct ResponseContext {
    pub connection: Arc<Connection>,
    pub id: String,
    result: Option<Value>,
    error: Option<ErrorObject>,
}

impl ResponseContext {
    pub(crate) fn new(
        connection: Arc<Connection>,
        id: String,
        result: Option<Value>,
        error: Option<ErrorObject>,
    ) -> Self {
        Self {
            connection,
            id,
            result,
            error,
        }
    }

    /// The error slot, if the peer replied with one.
    pub fn error(&self) -> Option<&ErrorObject> {
        self.error.as_ref()
    }

    /// Decode the preserved `result` fragment. Calling this when the response carried
    /// an error instead of a result is a protocol-shaped misuse; callers should check
    /// [`ResponseContext::error`] first.
    pub fn result<T: DeserializeOwned>(&self) -> Result<T> {
        let value = self.result.clone().unwrap_or(Value::Null);
        serde_json::from_value(value)
            .map_err(|e| crate::error::Error::Protocol(format!("invalid result: {e}")))
    }
}
