//! Collaborators the orchestrator calls out to, with in-memory implementations.

pub mod orders;
pub mod payment;
pub mod validation;

pub use orders::{InMemoryOrderGateway, OrderGateway, RecordedOrder};
pub use payment::{Authorization, Capture, InMemoryPaymentGateway, PaymentGateway};
pub use validation::{CartValidator, InMemoryCartValidator};
