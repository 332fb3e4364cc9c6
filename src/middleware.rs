//! The middleware chain abstraction, used uniformly by both the server and the client.

use std::sync::Arc;

use async_trait::async_trait;

use crate::context::RequestContext;
use crate::error::Result;

/// A single entry in a connection's inbound middleware chain.
///
/// A middleware may inspect or mutate the context, call `ctx.next().await` to continue
/// the chain, call it and then act on the result, or skip it entirely to short-circuit.
/// The default implementation simply continues the chain, which makes "pass-through"
/// middlewares (loggers, metrics taps) a one-line impl.
#[async_trait]
pub trait Middleware: Send + Sync + std::fmt::Debug {
    async fn handle(&self, ctx: &mut RequestContext<'_>) -> Result<()> {
        ctx.next().await
    }
}

/// The immutable, write-once chain a connection walks for every inbound request or
/// notification. Built once by a server/client builder and shared (via `Arc`) across
/// every connection spawned from it.
pub type MiddlewareVec = Vec<Arc<dyn Middleware>>;
