use axum::Router;

pub mod v0;

use crate::NodeState;

pub fn router(state: NodeState) -> Router<NodeState> {
    Router::new()
        .nest("/v0", v0::router(state.clone()))
        .with_state(state)
}
