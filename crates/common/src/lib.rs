//! Shared types for the checkout and stock reservation engine.
//!
//! Identifiers, owner references, money, the cart value handed over by the
//! cart owner, and the injectable [`Clock`].

pub mod cart;
pub mod clock;
pub mod money;
pub mod reference;
pub mod types;

pub use cart::{Cart, CartLine};
pub use clock::{Clock, ManualClock, SystemClock, ttl};
pub use money::{CurrencyCode, InvalidCurrencyCode, Money};
pub use reference::{Reference, ReferenceKind, ReferenceParseError};
pub use types::{
    CartId, CheckoutId, LineId, OrderId, ReservationId, SnapshotId, TransactionId, VariantId,
    WarehouseId,
};
