//! Checkout error types.

use common::{CartId, CheckoutId};
use inventory::InventoryError;
use pricing::PricingError;
use thiserror::Error;

use crate::state::CheckoutState;

/// Errors returned to callers of the orchestrator and the checkout stores.
///
/// A checkout that fails for business reasons is not an error: it ends in
/// [`CheckoutState::Failed`] with a recorded `FailureReason`.
#[derive(Debug, Error)]
pub enum CheckoutError {
    #[error("Checkout not found: {0}")]
    NotFound(CheckoutId),

    /// Another writer advanced the checkout first.
    #[error("Checkout {checkout_id} is no longer {expected} at version {version}")]
    StateConflict {
        checkout_id: CheckoutId,
        expected: CheckoutState,
        version: i64,
    },

    #[error("Invalid checkout transition: {from} -> {to}")]
    InvalidTransition {
        from: CheckoutState,
        to: CheckoutState,
    },

    /// Cart already has a non-terminal checkout.
    #[error("Cart {cart_id} already has active checkout {checkout_id}")]
    ActiveCheckoutExists {
        cart_id: CartId,
        checkout_id: CheckoutId,
    },

    #[error("Checkout {checkout_id} belongs to cart {expected}, not {actual}")]
    CartMismatch {
        checkout_id: CheckoutId,
        expected: CartId,
        actual: CartId,
    },

    #[error("Inventory error: {0}")]
    Inventory(#[from] InventoryError),

    #[error("Pricing error: {0}")]
    Pricing(#[from] PricingError),

    #[error("Invalid stored row: {0}")]
    InvalidRow(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Convenience type alias for checkout results.
pub type Result<T> = std::result::Result<T, CheckoutError>;

/// Error returned by a collaborator (validator, payment gateway, order system).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServiceError {
    /// The collaborator answered and said no.
    #[error("Rejected: {0}")]
    Rejected(String),

    /// The collaborator could not answer.
    #[error("Unavailable: {0}")]
    Unavailable(String),
}
