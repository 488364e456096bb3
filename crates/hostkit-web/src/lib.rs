//! HTTP transport for the `hostkit` dispatcher.
//!
//! `hostkit-web` puts an axum server in front of a shared
//! [`Dispatcher`](hostkit::dispatch::Dispatcher). It adds no semantics of its
//! own: every call goes through the same validation and sandbox path as the
//! stdio transport and comes back as the same `ExecutionResult`.
//!
//! # Quick start
//!
//! ```ignore
//! use hostkit::prelude::*;
//! use hostkit_web::{WebConfig, spawn_web};
//! use std::sync::Arc;
//!
//! let config = Config::load(None)?;
//! let dispatcher = Arc::new(Dispatcher::new(config.policy).await);
//! let addr = spawn_web(dispatcher, WebConfig::default()).await?;
//! println!("hostkit on http://{addr}");
//! ```
//!
//! # Endpoints
//!
//! | Route | Response |
//! |-------|----------|
//! | `GET /health` | status, tool count, unavailable tools, live subprocesses |
//! | `GET /tools` | every tool with its input schema and availability |
//! | `POST /call` | `{tool, arguments, request_id?}` → `ExecutionResult` |
//!
//! A processed call answers `200` whether the tool succeeded or not; the
//! outcome is in the body's `status` field. Only a body that is not a tool
//! request at all gets a `4xx`.

mod api;
mod server;

pub use server::{build_router, start_server};

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use hostkit::dispatch::Dispatcher;

/// Configuration for the web server.
#[derive(Debug, Clone)]
pub struct WebConfig {
    /// Address to bind to. Default: `127.0.0.1:8000`.
    pub bind_addr: SocketAddr,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8000)),
        }
    }
}

/// Spawn the web server on a Tokio task and return the bound address.
///
/// Bind to port 0 to let the OS pick one. The server runs until the Tokio
/// runtime shuts down.
pub async fn spawn_web(dispatcher: Arc<Dispatcher>, config: WebConfig) -> io::Result<SocketAddr> {
    let router = build_router(dispatcher);
    start_server(router, config.bind_addr).await
}
