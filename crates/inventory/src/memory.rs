use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{Reference, ReservationId};
use tokio::sync::RwLock;

use crate::error::{InventoryError, Result};
use crate::level::{InventoryKey, InventoryLevel};
use crate::reservation::{LockToken, StockReservation};
use crate::store::{LedgerStore, ReservationStore, WriteGuard};
use crate::transaction::{Counter, InventoryTransaction};

#[derive(Default)]
struct LedgerState {
    levels: HashMap<InventoryKey, InventoryLevel>,
    tokens: HashMap<InventoryKey, (LockToken, DateTime<Utc>)>,
    transactions: Vec<InventoryTransaction>,
}

/// In-memory ledger store.
///
/// All state sits behind one write lock, so a commit's version check, token
/// check, level write and transaction append happen as a single step.
#[derive(Clone, Default)]
pub struct InMemoryLedgerStore {
    state: Arc<RwLock<LedgerState>>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of transactions across all levels.
    pub async fn transaction_count(&self) -> usize {
        self.state.read().await.transactions.len()
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn insert_level(&self, level: InventoryLevel) -> Result<()> {
        let mut state = self.state.write().await;
        if state.levels.contains_key(level.key()) {
            return Err(InventoryError::LevelExists(level.key().clone()));
        }
        state.levels.insert(level.key().clone(), level);
        Ok(())
    }

    async fn get_level(&self, key: &InventoryKey) -> Result<Option<InventoryLevel>> {
        Ok(self.state.read().await.levels.get(key).cloned())
    }

    async fn list_levels(&self) -> Result<Vec<InventoryLevel>> {
        let state = self.state.read().await;
        let mut levels: Vec<_> = state.levels.values().cloned().collect();
        levels.sort_by(|a, b| a.key().cmp(b.key()));
        Ok(levels)
    }

    async fn commit(
        &self,
        expected_version: i64,
        next: InventoryLevel,
        transaction: InventoryTransaction,
        guard: WriteGuard,
    ) -> Result<()> {
        let mut state = self.state.write().await;
        let key = next.key().clone();

        let current = state
            .levels
            .get(&key)
            .ok_or_else(|| InventoryError::LevelNotFound(key.clone()))?;
        if current.version() != expected_version {
            return Err(InventoryError::ConcurrencyConflict {
                entity: format!("inventory level {key}"),
                expected: expected_version,
            });
        }

        if let WriteGuard::Token { token, at } = guard {
            let holds = state
                .tokens
                .get(&key)
                .is_some_and(|(held, expires_at)| *held == token && *expires_at > at);
            if !holds {
                return Err(InventoryError::TokenNotHeld(key));
            }
        }

        state.levels.insert(key, next);
        state.transactions.push(transaction);
        Ok(())
    }

    async fn transactions(&self, key: &InventoryKey) -> Result<Vec<InventoryTransaction>> {
        let state = self.state.read().await;
        Ok(state
            .transactions
            .iter()
            .filter(|t| &t.key == key)
            .cloned()
            .collect())
    }

    async fn reserved_for(&self, key: &InventoryKey, reservation_id: ReservationId) -> Result<i64> {
        let state = self.state.read().await;
        Ok(state
            .transactions
            .iter()
            .filter(|t| {
                &t.key == key
                    && t.counter == Counter::Reserved
                    && t.reservation_id == Some(reservation_id)
            })
            .map(|t| t.delta)
            .sum())
    }

    async fn acquire_token(
        &self,
        key: &InventoryKey,
        token: LockToken,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<bool> {
        let mut state = self.state.write().await;
        if !state.levels.contains_key(key) {
            return Err(InventoryError::LevelNotFound(key.clone()));
        }
        if let Some((_, held_until)) = state.tokens.get(key)
            && *held_until > now
        {
            return Ok(false);
        }
        state.tokens.insert(key.clone(), (token, expires_at));
        Ok(true)
    }

    async fn release_token(&self, key: &InventoryKey, token: LockToken) -> Result<()> {
        let mut state = self.state.write().await;
        if state.tokens.get(key).is_some_and(|(held, _)| *held == token) {
            state.tokens.remove(key);
        }
        Ok(())
    }
}

/// In-memory reservation store.
#[derive(Clone, Default)]
pub struct InMemoryReservationStore {
    reservations: Arc<RwLock<HashMap<ReservationId, StockReservation>>>,
}

impl InMemoryReservationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn count(&self) -> usize {
        self.reservations.read().await.len()
    }
}

#[async_trait]
impl ReservationStore for InMemoryReservationStore {
    async fn insert(&self, reservation: StockReservation) -> Result<()> {
        self.reservations
            .write()
            .await
            .insert(reservation.id(), reservation);
        Ok(())
    }

    async fn get(&self, id: ReservationId) -> Result<Option<StockReservation>> {
        Ok(self.reservations.read().await.get(&id).cloned())
    }

    async fn update(&self, next: StockReservation, expected_version: i64) -> Result<()> {
        let mut reservations = self.reservations.write().await;
        let current = reservations
            .get(&next.id())
            .ok_or(InventoryError::ReservationNotFound(next.id()))?;
        if current.version() != expected_version {
            return Err(InventoryError::ConcurrencyConflict {
                entity: format!("reservation {}", next.id()),
                expected: expected_version,
            });
        }
        reservations.insert(next.id(), next);
        Ok(())
    }

    async fn for_owner(&self, owner: &Reference) -> Result<Vec<StockReservation>> {
        let reservations = self.reservations.read().await;
        let mut owned: Vec<_> = reservations
            .values()
            .filter(|r| r.owner() == owner)
            .cloned()
            .collect();
        owned.sort_by_key(|r| r.created_at());
        Ok(owned)
    }

    async fn expired(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<StockReservation>> {
        let reservations = self.reservations.read().await;
        let mut expired: Vec<_> = reservations
            .values()
            .filter(|r| r.is_sweepable(now))
            .cloned()
            .collect();
        expired.sort_by_key(|r| r.expires_at());
        expired.truncate(limit);
        Ok(expired)
    }
}
