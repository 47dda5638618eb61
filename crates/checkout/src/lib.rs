//! Checkout orchestration.
//!
//! A checkout attempt is a [`CheckoutLock`]: one per cart at a time, moving
//! through the states in [`CheckoutState`] in a fixed order. The
//! [`CheckoutOrchestrator`] runs each step against the stock reservation
//! manager, the price snapshot service and the external collaborators in
//! [`services`]. When a step fails the lock is marked failed and the work of
//! earlier steps is undone.
//!
//! The happy path:
//! 1. Validate the cart
//! 2. Reserve stock for every line
//! 3. Freeze prices at the held quantities
//! 4. Authorize payment
//! 5. Create the order
//! 6. Capture payment
//! 7. Confirm the reservations

pub mod config;
pub mod error;
pub mod failure;
pub mod lock;
pub mod memory;
pub mod orchestrator;
pub mod postgres;
pub mod services;
pub mod state;
pub mod store;
pub mod sweeper;

pub use config::CheckoutConfig;
pub use error::{CheckoutError, Result, ServiceError};
pub use failure::{FailureKind, FailureReason, UserOutcome};
pub use lock::{CheckoutLock, SessionIdentity};
pub use memory::InMemoryCheckoutStore;
pub use orchestrator::{CheckoutOrchestrator, CheckoutOutcome, Collaborators, SweepReport};
pub use postgres::PostgresCheckoutStore;
pub use services::{
    Authorization, Capture, CartValidator, InMemoryCartValidator, InMemoryOrderGateway,
    InMemoryPaymentGateway, OrderGateway, PaymentGateway, RecordedOrder,
};
pub use state::CheckoutState;
pub use store::CheckoutStore;
pub use sweeper::spawn_sweeper;
