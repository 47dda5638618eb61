//! Pricing error types.

use common::{CheckoutId, CurrencyCode, VariantId};
use thiserror::Error;

/// Errors raised while resolving, freezing or reading prices.
#[derive(Debug, Error)]
pub enum PricingError {
    /// The resolver could not price a variant.
    #[error("Price unavailable for variant {variant_id}: {reason}")]
    Unavailable { variant_id: VariantId, reason: String },

    #[error("No exchange rate from {from} to {to}")]
    MissingExchangeRate { from: CurrencyCode, to: CurrencyCode },

    #[error("Currency mismatch: expected {expected}, got {actual}")]
    CurrencyMismatch {
        expected: CurrencyCode,
        actual: CurrencyCode,
    },

    /// Snapshots are write-once per (checkout, scope).
    #[error("Price snapshot already frozen for checkout {checkout_id} ({scope})")]
    SnapshotExists { checkout_id: CheckoutId, scope: String },

    #[error("Line totals differ from cart total by {difference} cents (tolerance {tolerance})")]
    Reconciliation { difference: i64, tolerance: i64 },

    #[error("Nothing to price")]
    EmptyCart,

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for pricing operations.
pub type Result<T> = std::result::Result<T, PricingError>;
