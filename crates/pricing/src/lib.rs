//! Price snapshots.
//!
//! Prices are resolved once, after stock is held, and frozen against the
//! checkout attempt. Payment and order creation read the frozen values only.

pub mod error;
pub mod memory;
pub mod postgres;
pub mod resolver;
pub mod service;
pub mod snapshot;
pub mod store;

pub use error::{PricingError, Result};
pub use memory::InMemorySnapshotStore;
pub use postgres::PostgresSnapshotStore;
pub use resolver::{
    DiscountLine, ExchangeRateSource, InMemoryExchangeRates, InMemoryPricingResolver,
    PricingContext, PricingResolver, ResolvedPrice, TaxLine,
};
pub use service::{PriceRequest, PriceSnapshotService, SnapshotConfig};
pub use snapshot::{CurrencyConversion, FrozenPrices, PriceSnapshot, SnapshotScope, reconcile};
pub use store::SnapshotStore;
