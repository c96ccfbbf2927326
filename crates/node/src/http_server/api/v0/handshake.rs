use axum::extract::{Json, State};

use common::custody::NodeInfo;

use crate::NodeState;

pub async fn handler(State(state): State<NodeState>) -> Json<NodeInfo> {
    let info = state.node().info();
    tracing::debug!(node = info.index, "handshake");
    Json(info)
}
