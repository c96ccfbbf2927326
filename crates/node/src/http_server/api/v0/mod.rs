use axum::routing::{get, post};
use axum::Router;

pub mod challenge;
pub mod escrow;
pub mod handshake;
pub mod release;

use crate::NodeState;

pub fn router(state: NodeState) -> Router<NodeState> {
    Router::new()
        .route("/handshake", get(handshake::handler))
        .route("/challenge", get(challenge::handler))
        .route("/escrow", post(escrow::handler))
        .route("/release", post(release::handler))
        .with_state(state)
}
