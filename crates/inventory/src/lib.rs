//! Inventory ledger and stock reservation manager.
//!
//! The [`InventoryLedger`] is the only writer of [`InventoryLevel`] counters:
//! every change is a compare-and-swap on the level's version that appends one
//! [`InventoryTransaction`]. The [`ReservationManager`] holds stock for
//! checkouts and operators on top of it, serializing reserved-counter
//! increments per level with short-lived [`LockToken`]s.

pub mod catalog;
pub mod error;
pub mod ledger;
pub mod level;
pub mod manager;
pub mod memory;
pub mod postgres;
pub mod report;
pub mod reservation;
pub mod retry;
pub mod store;
pub mod transaction;

pub use catalog::{Catalog, InMemoryCatalog};
pub use error::{InventoryError, Result};
pub use ledger::InventoryLedger;
pub use level::{InventoryKey, InventoryLevel, LevelSettings, LevelSnapshot, StockStatus};
pub use manager::{Allocation, ReservationConfig, ReservationManager, ReserveRequest};
pub use memory::{InMemoryLedgerStore, InMemoryReservationStore};
pub use postgres::{PostgresLedgerStore, PostgresReservationStore, run_migrations};
pub use report::{StockAlert, StockReport};
pub use reservation::{
    LockToken, PartialPolicy, ReservationOutcome, ReservationStatus, StockReservation,
};
pub use retry::RetryPolicy;
pub use store::{LedgerStore, ReservationStore, WriteGuard};
pub use transaction::{Adjustment, Counter, Counters, InventoryTransaction, TransactionKind};
