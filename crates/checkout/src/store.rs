//! Storage trait for checkout locks.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{CartId, CheckoutId};

use crate::error::Result;
use crate::lock::CheckoutLock;
use crate::state::CheckoutState;

/// Persistence for checkout locks.
///
/// Implementations guarantee at most one non-terminal lock per cart and only
/// apply a transition if the stored state and version still match.
#[async_trait]
pub trait CheckoutStore: Send + Sync {
    /// Inserts a new lock. Fails with `ActiveCheckoutExists` if the cart
    /// already has a non-terminal lock.
    async fn create(&self, lock: CheckoutLock) -> Result<()>;

    async fn get(&self, id: CheckoutId) -> Result<Option<CheckoutLock>>;

    /// The cart's non-terminal lock, if any (expired or not).
    async fn active_for_cart(&self, cart_id: CartId) -> Result<Option<CheckoutLock>>;

    /// Replaces the lock if it is still in `expected_state` at
    /// `expected_version`. Fails with `StateConflict` otherwise.
    async fn transition(
        &self,
        next: &CheckoutLock,
        expected_state: CheckoutState,
        expected_version: i64,
    ) -> Result<()>;

    /// Every non-terminal lock, oldest first.
    async fn list_active(&self) -> Result<Vec<CheckoutLock>>;

    /// Non-terminal locks whose expiry is at or before `now`, oldest expiry first.
    async fn expired(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<CheckoutLock>>;

    /// Terminal locks last updated before `cutoff`.
    async fn terminal_before(&self, cutoff: DateTime<Utc>, limit: usize)
    -> Result<Vec<CheckoutId>>;

    /// Deletes a terminal lock. Returns false if it was missing or not terminal.
    async fn delete_terminal(&self, id: CheckoutId) -> Result<bool>;
}

#[async_trait]
impl<T: CheckoutStore + ?Sized> CheckoutStore for Arc<T> {
    async fn create(&self, lock: CheckoutLock) -> Result<()> {
        (**self).create(lock).await
    }

    async fn get(&self, id: CheckoutId) -> Result<Option<CheckoutLock>> {
        (**self).get(id).await
    }

    async fn active_for_cart(&self, cart_id: CartId) -> Result<Option<CheckoutLock>> {
        (**self).active_for_cart(cart_id).await
    }

    async fn transition(
        &self,
        next: &CheckoutLock,
        expected_state: CheckoutState,
        expected_version: i64,
    ) -> Result<()> {
        (**self)
            .transition(next, expected_state, expected_version)
            .await
    }

    async fn list_active(&self) -> Result<Vec<CheckoutLock>> {
        (**self).list_active().await
    }

    async fn expired(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<CheckoutLock>> {
        (**self).expired(now, limit).await
    }

    async fn terminal_before(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<CheckoutId>> {
        (**self).terminal_before(cutoff, limit).await
    }

    async fn delete_terminal(&self, id: CheckoutId) -> Result<bool> {
        (**self).delete_terminal(id).await
    }
}
