//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use domain::DomainError;
use saga::SagaError;
use store::StoreError;

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Resource not found.
    NotFound(String),
    /// Bad request from the client.
    BadRequest(String),
    /// Domain validation error.
    Domain(DomainError),
    /// Reservation saga error.
    Saga(SagaError),
}

const INTERNAL_MESSAGE: &str = "internal server error";

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Domain(err) => domain_error_to_response(err),
            ApiError::Saga(err) => saga_error_to_response(err),
        };

        metrics::counter!("api_errors_total", "status" => status.as_u16().to_string())
            .increment(1);

        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}

fn domain_error_to_response(err: DomainError) -> (StatusCode, String) {
    match &err {
        DomainError::InvalidTransition { .. } => internal(&err),
        _ => (StatusCode::BAD_REQUEST, err.to_string()),
    }
}

fn saga_error_to_response(err: SagaError) -> (StatusCode, String) {
    match &err {
        SagaError::InsufficientCapacity { .. }
        | SagaError::ReservationClosed { .. }
        | SagaError::ShowtimeAlreadyRegistered(_) => (StatusCode::CONFLICT, err.to_string()),
        SagaError::Expired(_) => (StatusCode::GONE, err.to_string()),
        SagaError::PaymentFailed { .. } => (StatusCode::PAYMENT_REQUIRED, err.to_string()),
        SagaError::PaymentAdapterUnavailable(_) => {
            (StatusCode::SERVICE_UNAVAILABLE, err.to_string())
        }
        SagaError::ShowtimeNotFound(_) | SagaError::ReservationNotFound(_) => {
            (StatusCode::NOT_FOUND, err.to_string())
        }
        SagaError::InvalidRequest(_) => (StatusCode::BAD_REQUEST, err.to_string()),
        SagaError::Domain(DomainError::InvalidTransition { .. }) => internal(&err),
        SagaError::Domain(_) => (StatusCode::BAD_REQUEST, err.to_string()),
        SagaError::Store(StoreError::ShowtimeNotFound(_)) => {
            (StatusCode::NOT_FOUND, err.to_string())
        }
        SagaError::Store(StoreError::DuplicateReservation(_))
        | SagaError::Store(StoreError::ShowtimeAlreadyRegistered(_)) => {
            (StatusCode::CONFLICT, err.to_string())
        }
        SagaError::Conflict(_) | SagaError::Store(_) => internal(&err),
    }
}

fn internal(err: &dyn std::error::Error) -> (StatusCode, String) {
    tracing::error!(error = %err, "request failed");
    (StatusCode::INTERNAL_SERVER_ERROR, INTERNAL_MESSAGE.to_string())
}

impl From<DomainError> for ApiError {
    fn from(err: DomainError) -> Self {
        ApiError::Domain(err)
    }
}

impl From<SagaError> for ApiError {
    fn from(err: SagaError) -> Self {
        ApiError::Saga(err)
    }
}
