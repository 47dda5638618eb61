//! Storage traits for inventory levels and reservations.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{Reference, ReservationId};

use crate::error::Result;
use crate::level::{InventoryKey, InventoryLevel};
use crate::reservation::{LockToken, StockReservation};
use crate::transaction::InventoryTransaction;

/// Precondition attached to a level write on top of the version check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteGuard {
    /// Version check only. Used for everything except reserved-counter increments.
    Version,
    /// The writer must hold `token` and it must still be live at `at`.
    Token { token: LockToken, at: DateTime<Utc> },
}

/// Persistence for inventory levels, their lock tokens and the transaction log.
///
/// Implementations must make [`LedgerStore::commit`] atomic: the level row
/// and its transaction are written together or not at all.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Inserts a new level. Fails with `LevelExists` if the pairing is tracked.
    async fn insert_level(&self, level: InventoryLevel) -> Result<()>;

    async fn get_level(&self, key: &InventoryKey) -> Result<Option<InventoryLevel>>;

    async fn list_levels(&self) -> Result<Vec<InventoryLevel>>;

    /// Replaces the level if its stored version equals `expected_version`,
    /// appending `transaction` in the same atomic step.
    ///
    /// Fails with `ConcurrencyConflict` on a version mismatch and with
    /// `TokenNotHeld` if the guard's token is not the live holder.
    async fn commit(
        &self,
        expected_version: i64,
        next: InventoryLevel,
        transaction: InventoryTransaction,
        guard: WriteGuard,
    ) -> Result<()>;

    /// Transactions for one level, oldest first.
    async fn transactions(&self, key: &InventoryKey) -> Result<Vec<InventoryTransaction>>;

    /// Net reserved-counter delta recorded against `reservation_id` on `key`.
    ///
    /// This is what the reservation still holds on the level, whatever its
    /// row says.
    async fn reserved_for(&self, key: &InventoryKey, reservation_id: ReservationId) -> Result<i64>;

    /// Takes the level's lock token if it is free or its holder's token expired.
    ///
    /// Returns `false` when another live token holds the level.
    async fn acquire_token(
        &self,
        key: &InventoryKey,
        token: LockToken,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<bool>;

    /// Drops the token if `token` still holds it; no-op otherwise.
    async fn release_token(&self, key: &InventoryKey, token: LockToken) -> Result<()>;
}

/// Persistence for stock reservations.
#[async_trait]
pub trait ReservationStore: Send + Sync {
    async fn insert(&self, reservation: StockReservation) -> Result<()>;

    async fn get(&self, id: ReservationId) -> Result<Option<StockReservation>>;

    /// Replaces the reservation if its stored version equals `expected_version`.
    async fn update(&self, next: StockReservation, expected_version: i64) -> Result<()>;

    async fn for_owner(&self, owner: &Reference) -> Result<Vec<StockReservation>>;

    /// Unreleased, unconfirmed reservations whose expiry is at or before `now`,
    /// oldest expiry first, at most `limit`.
    async fn expired(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<StockReservation>>;
}

#[async_trait]
impl<T: LedgerStore + ?Sized> LedgerStore for Arc<T> {
    async fn insert_level(&self, level: InventoryLevel) -> Result<()> {
        (**self).insert_level(level).await
    }

    async fn get_level(&self, key: &InventoryKey) -> Result<Option<InventoryLevel>> {
        (**self).get_level(key).await
    }

    async fn list_levels(&self) -> Result<Vec<InventoryLevel>> {
        (**self).list_levels().await
    }

    async fn commit(
        &self,
        expected_version: i64,
        next: InventoryLevel,
        transaction: InventoryTransaction,
        guard: WriteGuard,
    ) -> Result<()> {
        (**self)
            .commit(expected_version, next, transaction, guard)
            .await
    }

    async fn transactions(&self, key: &InventoryKey) -> Result<Vec<InventoryTransaction>> {
        (**self).transactions(key).await
    }

    async fn reserved_for(&self, key: &InventoryKey, reservation_id: ReservationId) -> Result<i64> {
        (**self).reserved_for(key, reservation_id).await
    }

    async fn acquire_token(
        &self,
        key: &InventoryKey,
        token: LockToken,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<bool> {
        (**self).acquire_token(key, token, now, expires_at).await
    }

    async fn release_token(&self, key: &InventoryKey, token: LockToken) -> Result<()> {
        (**self).release_token(key, token).await
    }
}

#[async_trait]
impl<T: ReservationStore + ?Sized> ReservationStore for Arc<T> {
    async fn insert(&self, reservation: StockReservation) -> Result<()> {
        (**self).insert(reservation).await
    }

    async fn get(&self, id: ReservationId) -> Result<Option<StockReservation>> {
        (**self).get(id).await
    }

    async fn update(&self, next: StockReservation, expected_version: i64) -> Result<()> {
        (**self).update(next, expected_version).await
    }

    async fn for_owner(&self, owner: &Reference) -> Result<Vec<StockReservation>> {
        (**self).for_owner(owner).await
    }

    async fn expired(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<StockReservation>> {
        (**self).expired(now, limit).await
    }
}
