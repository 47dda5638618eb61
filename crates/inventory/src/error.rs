//! Inventory error types.

use common::{ReferenceParseError, ReservationId, VariantId, WarehouseId};
use thiserror::Error;

use crate::level::InventoryKey;
use crate::reservation::ReservationStatus;

/// Errors raised by the ledger, the reservation manager and their stores.
#[derive(Debug, Error)]
pub enum InventoryError {
    /// Not enough stock to satisfy the request. Not retryable until restock.
    #[error(
        "Insufficient stock for variant {variant_id}: requested {requested}, available {available}"
    )]
    InsufficientStock {
        variant_id: VariantId,
        warehouse_id: Option<WarehouseId>,
        requested: i64,
        available: i64,
    },

    /// Another writer holds the level's lock token and the retry budget ran out.
    #[error("Lock contention on inventory level {0}")]
    LockContention(InventoryKey),

    /// A reserved-counter increment was attempted without the live lock token.
    #[error("Lock token not held for inventory level {0}")]
    TokenNotHeld(InventoryKey),

    /// Optimistic concurrency check failed.
    #[error("Concurrency conflict on {entity}: expected version {expected}")]
    ConcurrencyConflict { entity: String, expected: i64 },

    #[error("Inventory level not found: {0}")]
    LevelNotFound(InventoryKey),

    #[error("Inventory level already tracked: {0}")]
    LevelExists(InventoryKey),

    #[error("Reservation not found: {0}")]
    ReservationNotFound(ReservationId),

    #[error("Reservation {id} is {status}; cannot {operation}")]
    InvalidReservationState {
        id: ReservationId,
        status: ReservationStatus,
        operation: &'static str,
    },

    #[error("Reservation {0} has expired")]
    ReservationExpired(ReservationId),

    #[error("Invalid quantity: {0}")]
    InvalidQuantity(i64),

    #[error("Invalid adjustment: {0}")]
    InvalidAdjustment(String),

    #[error("No warehouse stocks variant {0}")]
    NoWarehouse(VariantId),

    #[error("Catalog error: {0}")]
    Catalog(String),

    #[error("Invalid stored row: {0}")]
    InvalidRow(String),

    #[error("Invalid reference: {0}")]
    Reference(#[from] ReferenceParseError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl InventoryError {
    /// True for errors a caller may retry after a short wait.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            InventoryError::LockContention(_) | InventoryError::ConcurrencyConflict { .. }
        )
    }
}

/// Result type for inventory operations.
pub type Result<T> = std::result::Result<T, InventoryError>;
