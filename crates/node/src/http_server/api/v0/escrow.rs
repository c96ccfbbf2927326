use axum::extract::{Json, State};

use common::custody::{EscrowRequest, EscrowResponse};

use crate::http_server::ApiError;
use crate::NodeState;

pub async fn handler(
    State(state): State<NodeState>,
    Json(req): Json<EscrowRequest>,
) -> Result<Json<EscrowResponse>, ApiError> {
    tracing::debug!(
        requester = %req.assertion.signer_address,
        chain = %req.policy.chain(),
        "escrow request"
    );
    let response = state.node().escrow(&req)?;
    Ok(Json(response))
}
