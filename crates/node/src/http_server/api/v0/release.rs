use axum::extract::{Json, State};

use common::custody::{ReleaseRequest, ReleaseResponse};

use crate::http_server::ApiError;
use crate::NodeState;

pub async fn handler(
    State(state): State<NodeState>,
    Json(req): Json<ReleaseRequest>,
) -> Result<Json<ReleaseResponse>, ApiError> {
    tracing::debug!(
        requester = %req.assertion.signer_address,
        chain = %req.policy.chain(),
        method = req.policy.method(),
        "release request"
    );
    let response = state.node().release(&req).await?;
    Ok(Json(response))
}
