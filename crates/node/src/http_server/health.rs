use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};

use crate::NodeState;

pub fn router(state: NodeState) -> Router<NodeState> {
    Router::new()
        .route("/livez", get(livez_handler))
        .route("/readyz", get(readyz_handler))
        .with_state(state)
}

pub async fn livez_handler() -> Response {
    let msg = serde_json::json!({"status": "ok"});
    (StatusCode::OK, Json(msg)).into_response()
}

/// Ready once this node can tell requesters which network it belongs to
pub async fn readyz_handler(State(state): State<NodeState>) -> Response {
    let info = state.node().info();
    let msg = serde_json::json!({
        "status": "ok",
        "index": info.index,
        "threshold": info.threshold,
        "nodes": info.nodes,
    });
    (StatusCode::OK, Json(msg)).into_response()
}
