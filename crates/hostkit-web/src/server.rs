//! Axum server setup and router construction.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use hostkit::dispatch::Dispatcher;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::api::{self, AppState};

/// Build the full axum router.
pub fn build_router(dispatcher: Arc<Dispatcher>) -> Router {
    let state = AppState { dispatcher };

    // Browser-based clients on other origins.
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(api::get_health))
        .route("/tools", get(api::get_tools))
        .route("/call", post(api::post_call))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

/// Bind `bind_addr`, serve `router` on a background task and return the
/// bound address.
pub async fn start_server(router: Router, bind_addr: SocketAddr) -> io::Result<SocketAddr> {
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    let addr = listener.local_addr()?;
    info!("[http] listening on {addr}");

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router).await {
            error!("[http] server stopped: {e}");
        }
    });

    Ok(addr)
}
