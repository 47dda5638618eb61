//! HTTP route handlers.

pub mod checkouts;
pub mod health;
pub mod inventory;
pub mod metrics;
pub mod reports;
pub mod reservations;
