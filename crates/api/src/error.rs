//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use inventory::{LedgerError, ReservationError};
use orders::{OrderError, ValidationError};
use thiserror::Error;

/// API-level error type that maps to HTTP responses.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Malformed path or body the domain never saw.
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error(transparent)]
    Order(#[from] OrderError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> Self {
        ApiError::Order(OrderError::Validation(err))
    }
}

impl From<store::StoreError> for ApiError {
    fn from(err: store::StoreError) -> Self {
        ApiError::Order(OrderError::Store(err))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, "internal server error");
            "internal server error".to_string()
        } else {
            self.to_string()
        };

        let body = match self {
            ApiError::Order(OrderError::Unavailable(lines)) => {
                serde_json::json!({ "error": message, "unavailable": lines })
            }
            _ => serde_json::json!({ "error": message }),
        };
        (status, axum::Json(body)).into_response()
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Order(err) => order_status(err),
            ApiError::Ledger(err) => ledger_status(err),
        }
    }
}

fn order_status(err: &OrderError) -> StatusCode {
    match err {
        OrderError::Validation(_) | OrderError::UnknownProduct(_) => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        OrderError::Unavailable(_)
        | OrderError::HoldLapsed
        | OrderError::AlreadyResolved { .. } => StatusCode::CONFLICT,
        OrderError::NotFound(_)
        | OrderError::UnknownPaymentReference(_)
        | OrderError::ReconciliationNotFound(_) => StatusCode::NOT_FOUND,
        OrderError::GatewaySignatureInvalid => StatusCode::UNAUTHORIZED,
        OrderError::Gateway(_) => StatusCode::BAD_GATEWAY,
        OrderError::Reservation(err) => reservation_status(err),
        OrderError::Ledger(err) => ledger_status(err),
        OrderError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn reservation_status(err: &ReservationError) -> StatusCode {
    match err {
        ReservationError::InsufficientStock { .. } | ReservationError::AlreadyResolved { .. } => {
            StatusCode::CONFLICT
        }
        ReservationError::UnknownVariant(_) | ReservationError::NotFound(_) => {
            StatusCode::NOT_FOUND
        }
        ReservationError::InvalidQuantity(_) => StatusCode::UNPROCESSABLE_ENTITY,
        ReservationError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn ledger_status(err: &LedgerError) -> StatusCode {
    match err {
        LedgerError::InsufficientStock { .. } => StatusCode::CONFLICT,
        LedgerError::UnknownVariant(_) => StatusCode::NOT_FOUND,
        LedgerError::InvalidQuantity(_) => StatusCode::UNPROCESSABLE_ENTITY,
        LedgerError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}
