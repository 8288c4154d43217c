//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use domain::{DomainError, ErrorKind};

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Resource not found.
    NotFound(String),
    /// Bad request from the client.
    BadRequest(String),
    /// Command error, mapped by its kind.
    Domain(DomainError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Domain(err) => domain_error_to_response(err),
        };

        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}

fn domain_error_to_response(err: DomainError) -> (StatusCode, String) {
    let status = match err.kind() {
        ErrorKind::Validation => StatusCode::BAD_REQUEST,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Conflict => StatusCode::CONFLICT,
        ErrorKind::Internal => {
            tracing::error!(error = %err, "internal server error");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (status, err.to_string())
}

impl From<DomainError> for ApiError {
    fn from(err: DomainError) -> Self {
        ApiError::Domain(err)
    }
}

impl From<saga::SagaError> for ApiError {
    fn from(err: saga::SagaError) -> Self {
        ApiError::Domain(err.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::{GatewayError, OrderCode, Payment};

    fn status_of(err: DomainError) -> StatusCode {
        ApiError::from(err).into_response().status()
    }

    #[test]
    fn kinds_map_to_status_codes() {
        assert_eq!(
            status_of(DomainError::Validation("bad".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(DomainError::not_found::<Payment>(OrderCode::new(9))),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_of(DomainError::Gateway(GatewayError::Unavailable("down".into()))),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(status_of(DomainError::Cancelled), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn saga_errors_are_bad_requests() {
        let err = saga::SagaError::PaymentNotPaid {
            status: domain::PaymentStatus::Pending,
        };
        assert_eq!(
            ApiError::from(err).into_response().status(),
            StatusCode::BAD_REQUEST
        );
    }
}
