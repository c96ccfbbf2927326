use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use common::custody::{CustodyError, ErrorReply};

pub async fn not_found_handler() -> Response {
    let reply = ErrorReply {
        error: CustodyError::Network("no such custody endpoint".to_string()),
    };
    (StatusCode::NOT_FOUND, Json(reply)).into_response()
}
