use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use common::custody::{CustodyError, ErrorKind, ErrorReply};

/// A custody failure on its way back to the requester
#[derive(Debug, thiserror::Error)]
#[error(transparent)]
pub struct ApiError(#[from] pub CustodyError);

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match (&self.0, self.0.kind()) {
            (CustodyError::PolicyNotSatisfied, _) => StatusCode::FORBIDDEN,
            (_, ErrorKind::Policy) => StatusCode::UNPROCESSABLE_ENTITY,
            (_, ErrorKind::Assertion) => StatusCode::UNAUTHORIZED,
            (_, ErrorKind::CryptoIntegrity) => StatusCode::BAD_REQUEST,
            (_, ErrorKind::Connection) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status == StatusCode::SERVICE_UNAVAILABLE {
            tracing::error!(error = %self.0, "custody request failed");
        } else {
            tracing::warn!(error = %self.0, status = status.as_u16(), "custody request refused");
        }
        (status, Json(ErrorReply { error: self.0 })).into_response()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (CustodyError::PolicyNotSatisfied, StatusCode::FORBIDDEN),
            (CustodyError::PolicyMismatch, StatusCode::UNPROCESSABLE_ENTITY),
            (
                CustodyError::Unevaluable("method".into()),
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (CustodyError::AssertionExpired, StatusCode::UNAUTHORIZED),
            (
                CustodyError::Integrity("version".into()),
                StatusCode::BAD_REQUEST,
            ),
            (
                CustodyError::Network("rpc down".into()),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError(err).status(), status);
        }
    }

    #[test]
    fn test_body_is_error_reply() {
        let response = ApiError(CustodyError::PolicyNotSatisfied).into_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }
}
