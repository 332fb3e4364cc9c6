//! Bidirectional JSON-RPC-style messaging over a long-lived WebSocket transport.
//!
//! Both peers are symmetric: a [`server::Server`] accepts many connections, a
//! [`client::Client`] dials one, and both drive requests, responses, and notifications
//! through the same [`connection::Connection`] engine and [`middleware::Middleware`]
//! chain.

pub mod client;
pub mod connection;
pub mod context;
pub mod error;
pub mod id;
pub mod message;
pub mod middleware;
pub mod pending;
pub mod server;
pub mod session;
pub mod tls;
pub mod transport;

pub use client::{Client, ClientBuilder};
pub use connection::{Connection, ConnectionConfig, ConnectionRole, ConnectionState};
pub use context::{RequestContext, ResponseContext};
pub use error::{Error, Result, TransportError};
pub use message::{Classified, Envelope, ErrorObject};
pub use middleware::{Middleware, MiddlewareVec};
pub use server::{Server, ServerBuilder};
pub use session::Session;
pub use tls::{TlsClientConfig, TlsServerConfig};
