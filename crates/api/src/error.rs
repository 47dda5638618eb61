//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use checkout::CheckoutError;
use inventory::InventoryError;
use pricing::PricingError;
use thiserror::Error;

/// API-level error type that maps to HTTP responses.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Resource not found.
    #[error("{0}")]
    NotFound(String),
    /// Bad request from the client.
    #[error("{0}")]
    BadRequest(String),
    #[error(transparent)]
    Inventory(#[from] InventoryError),
    #[error(transparent)]
    Pricing(#[from] PricingError),
    #[error(transparent)]
    Checkout(#[from] CheckoutError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Inventory(err) => inventory_error_to_response(err),
            ApiError::Pricing(err) => pricing_error_to_response(err),
            ApiError::Checkout(err) => checkout_error_to_response(err),
        };
        if status.is_server_error() {
            tracing::error!(error = %message, "internal server error");
        }

        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}

fn inventory_error_to_response(err: InventoryError) -> (StatusCode, String) {
    let status = match &err {
        InventoryError::LevelNotFound(_) | InventoryError::ReservationNotFound(_) => {
            StatusCode::NOT_FOUND
        }
        InventoryError::InsufficientStock { .. }
        | InventoryError::LevelExists(_)
        | InventoryError::InvalidReservationState { .. }
        | InventoryError::ReservationExpired(_)
        | InventoryError::ConcurrencyConflict { .. } => StatusCode::CONFLICT,
        InventoryError::LockContention(_) => StatusCode::SERVICE_UNAVAILABLE,
        InventoryError::InvalidQuantity(_)
        | InventoryError::InvalidAdjustment(_)
        | InventoryError::NoWarehouse(_)
        | InventoryError::Reference(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, err.to_string())
}

fn pricing_error_to_response(err: PricingError) -> (StatusCode, String) {
    let status = match &err {
        PricingError::EmptyCart | PricingError::CurrencyMismatch { .. } => StatusCode::BAD_REQUEST,
        PricingError::SnapshotExists { .. } => StatusCode::CONFLICT,
        PricingError::Unavailable { .. } | PricingError::MissingExchangeRate { .. } => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, err.to_string())
}

fn checkout_error_to_response(err: CheckoutError) -> (StatusCode, String) {
    match err {
        CheckoutError::Inventory(inner) => inventory_error_to_response(inner),
        CheckoutError::Pricing(inner) => pricing_error_to_response(inner),
        other => {
            let status = match &other {
                CheckoutError::NotFound(_) => StatusCode::NOT_FOUND,
                CheckoutError::StateConflict { .. }
                | CheckoutError::InvalidTransition { .. }
                | CheckoutError::ActiveCheckoutExists { .. } => StatusCode::CONFLICT,
                CheckoutError::CartMismatch { .. } => StatusCode::BAD_REQUEST,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
            (status, other.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use common::{CheckoutId, VariantId};

    use super::*;

    #[test]
    fn test_status_mapping() {
        let shortage = ApiError::from(InventoryError::InsufficientStock {
            variant_id: VariantId::new("SKU"),
            warehouse_id: None,
            requested: 3,
            available: 1,
        });
        assert_eq!(shortage.into_response().status(), StatusCode::CONFLICT);

        let missing = ApiError::from(CheckoutError::NotFound(CheckoutId::new()));
        assert_eq!(missing.into_response().status(), StatusCode::NOT_FOUND);

        let nested = ApiError::from(CheckoutError::Inventory(InventoryError::InvalidQuantity(0)));
        assert_eq!(nested.into_response().status(), StatusCode::BAD_REQUEST);
    }
}
