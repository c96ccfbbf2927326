use axum::extract::{Json, State};

use common::custody::ChallengeResponse;

use crate::http_server::ApiError;
use crate::NodeState;

pub async fn handler(State(state): State<NodeState>) -> Result<Json<ChallengeResponse>, ApiError> {
    Ok(Json(state.node().challenge()?))
}
