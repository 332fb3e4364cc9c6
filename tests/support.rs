//! Shared fixtures for the integration tests: a handful of illustrative middlewares
//! (echo, error, panic, bidirectional) and a small harness for standing up a server on
//! a fixed loopback port. These exist only to exercise the crate end to end; they are
//! not part of the public API.

use std::net::SocketAddr;
use std::sync::Once;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use duplex_rpc::{Connection, Error, ErrorObject, Middleware, RequestContext, Result, Server};

static TRACING: Once = Once::new();

pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    });
}

/// Echoes `params` into `result` for method `echo`; sets an application error for
/// `explode`; panics for `boom`; issues a nested `pong` request back to the peer for
/// `ping`, replying with whatever that nested request returns.
#[derive(Debug)]
pub struct DemoMiddleware;

#[async_trait]
impl Middleware for DemoMiddleware {
    async fn handle(&self, ctx: &mut RequestContext<'_>) -> Result<()> {
        match ctx.method.as_str() {
            "echo" => {
                ctx.result = Some(ctx.params::<Value>()?);
                Ok(())
            }
            "explode" => {
                ctx.error = Some(ErrorObject::new(1234, "much error").with_data(json!({"k": "v"})));
                Ok(())
            }
            "boom" => panic!("boom"),
            "ping" => {
                let params = ctx.params::<Value>()?;
                let reply = ctx.connection.send_request("pong", Some(params)).await?;
                ctx.result = Some(reply.result::<Value>()?);
                Ok(())
            }
            _ => ctx.next().await,
        }
    }
}

/// Replies to a `pong` request with `{"echo": <params>}`. Registered on the client
/// side for the bidirectional test, where the server calls back into the client.
#[derive(Debug)]
pub struct PongMiddleware;

#[async_trait]
impl Middleware for PongMiddleware {
    async fn handle(&self, ctx: &mut RequestContext<'_>) -> Result<()> {
        if ctx.method == "pong" {
            let params = ctx.params::<Value>()?;
            ctx.result = Some(json!({ "echo": params }));
            Ok(())
        } else {
            ctx.next().await
        }
    }
}

pub fn server_addr(port: u16) -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], port))
}

pub fn server_url(port: u16) -> String {
    format!("ws://127.0.0.1:{port}")
}

/// Start a server with `DemoMiddleware` in the background and give it a moment to bind
/// before returning, mirroring the transport layer's own test harness.
pub async fn spawn_demo_server(port: u16, deadline: Duration) -> Server {
    let server = Server::builder()
        .with_middleware(DemoMiddleware)
        .with_deadline(deadline)
        .build();
    let bound = server.clone();
    let addr = server_addr(port);
    tokio::spawn(async move {
        let _ = bound.serve(addr).await;
    });
    tokio::time::sleep(Duration::from_millis(150)).await;
    server
}

pub async fn connect_demo_client(port: u16) -> std::sync::Arc<Connection> {
    let client = duplex_rpc::Client::builder()
        .with_middleware(PongMiddleware)
        .build();
    client.connect(&server_url(port)).await.expect("client connect")
}

pub fn is_closed(err: &Error) -> bool {
    matches!(err, Error::Closed)
}
