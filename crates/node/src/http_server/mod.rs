use std::net::SocketAddr;

use axum::Router;
use http::header::{ACCEPT, CONTENT_TYPE, ORIGIN};
use http::Method;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::{DefaultOnFailure, DefaultOnResponse, TraceLayer};
use tower_http::LatencyUnit;

pub mod api;
mod error;
mod handlers;
mod health;

pub use error::ApiError;

use crate::NodeState;

const API_PREFIX: &str = "/api";
const STATUS_PREFIX: &str = "/_status";

/// Build the node router: `/api/v0/*` custody endpoints plus `/_status` health checks
pub fn router(state: NodeState, log_level: tracing::Level) -> Router {
    let trace_layer = TraceLayer::new_for_http()
        .on_response(
            DefaultOnResponse::new()
                .include_headers(false)
                .level(log_level)
                .latency_unit(LatencyUnit::Micros),
        )
        .on_failure(DefaultOnFailure::new().latency_unit(LatencyUnit::Micros));

    let cors_layer = CorsLayer::new()
        .allow_methods(vec![Method::GET, Method::POST])
        .allow_headers(vec![ACCEPT, CONTENT_TYPE, ORIGIN])
        .allow_origin(Any)
        .allow_credentials(false);

    Router::new()
        .nest(STATUS_PREFIX, health::router(state.clone()))
        .nest(API_PREFIX, api::router(state.clone()))
        .fallback(handlers::not_found_handler)
        .with_state(state)
        .layer(cors_layer)
        .layer(trace_layer)
}

/// Bind `listen_addr` and serve until `shutdown_rx` fires
pub async fn run(
    listen_addr: SocketAddr,
    state: NodeState,
    log_level: tracing::Level,
    shutdown_rx: watch::Receiver<()>,
) -> Result<(), HttpServerError> {
    let listener = TcpListener::bind(listen_addr).await?;
    serve(listener, state, log_level, shutdown_rx).await
}

/// Serve on an already bound listener until `shutdown_rx` fires
pub async fn serve(
    listener: TcpListener,
    state: NodeState,
    log_level: tracing::Level,
    mut shutdown_rx: watch::Receiver<()>,
) -> Result<(), HttpServerError> {
    let node_index = state.node().index();
    tracing::info!(addr = ?listener.local_addr()?, node = node_index, "custody node listening");

    axum::serve(listener, router(state, log_level))
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.changed().await;
        })
        .await?;

    tracing::info!(node = node_index, "custody node stopped");
    Ok(())
}

#[derive(Debug, thiserror::Error)]
pub enum HttpServerError {
    #[error("an error occurred running the HTTP server: {0}")]
    ServingFailed(#[from] std::io::Error),
}
