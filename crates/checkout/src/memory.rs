use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{CartId, CheckoutId};
use tokio::sync::RwLock;

use crate::error::{CheckoutError, Result};
use crate::lock::CheckoutLock;
use crate::state::CheckoutState;
use crate::store::CheckoutStore;

/// In-memory checkout store.
///
/// Every write runs under one write lock, which is what makes the
/// one-active-lock-per-cart check and the state/version check atomic.
#[derive(Clone, Default)]
pub struct InMemoryCheckoutStore {
    locks: Arc<RwLock<HashMap<CheckoutId, CheckoutLock>>>,
}

impl InMemoryCheckoutStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn count(&self) -> usize {
        self.locks.read().await.len()
    }
}

#[async_trait]
impl CheckoutStore for InMemoryCheckoutStore {
    async fn create(&self, lock: CheckoutLock) -> Result<()> {
        let mut locks = self.locks.write().await;
        if let Some(active) = locks
            .values()
            .find(|l| l.cart_id() == lock.cart_id() && !l.is_terminal())
        {
            return Err(CheckoutError::ActiveCheckoutExists {
                cart_id: lock.cart_id(),
                checkout_id: active.id(),
            });
        }
        locks.insert(lock.id(), lock);
        Ok(())
    }

    async fn get(&self, id: CheckoutId) -> Result<Option<CheckoutLock>> {
        Ok(self.locks.read().await.get(&id).cloned())
    }

    async fn active_for_cart(&self, cart_id: CartId) -> Result<Option<CheckoutLock>> {
        Ok(self
            .locks
            .read()
            .await
            .values()
            .find(|l| l.cart_id() == cart_id && !l.is_terminal())
            .cloned())
    }

    async fn transition(
        &self,
        next: &CheckoutLock,
        expected_state: CheckoutState,
        expected_version: i64,
    ) -> Result<()> {
        let mut locks = self.locks.write().await;
        let current = locks
            .get_mut(&next.id())
            .ok_or(CheckoutError::NotFound(next.id()))?;
        if current.state() != expected_state || current.version() != expected_version {
            return Err(CheckoutError::StateConflict {
                checkout_id: next.id(),
                expected: expected_state,
                version: expected_version,
            });
        }
        *current = next.clone();
        Ok(())
    }

    async fn list_active(&self) -> Result<Vec<CheckoutLock>> {
        let mut active: Vec<_> = self
            .locks
            .read()
            .await
            .values()
            .filter(|l| !l.is_terminal())
            .cloned()
            .collect();
        active.sort_by_key(|l| l.locked_at());
        Ok(active)
    }

    async fn expired(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<CheckoutLock>> {
        let mut expired: Vec<_> = self
            .locks
            .read()
            .await
            .values()
            .filter(|l| !l.is_terminal() && l.is_expired(now))
            .cloned()
            .collect();
        expired.sort_by_key(|l| l.expires_at());
        expired.truncate(limit);
        Ok(expired)
    }

    async fn terminal_before(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<CheckoutId>> {
        let locks = self.locks.read().await;
        let mut old: Vec<_> = locks
            .values()
            .filter(|l| l.is_terminal() && l.updated_at() < cutoff)
            .collect();
        old.sort_by_key(|l| l.updated_at());
        Ok(old.into_iter().take(limit).map(|l| l.id()).collect())
    }

    async fn delete_terminal(&self, id: CheckoutId) -> Result<bool> {
        let mut locks = self.locks.write().await;
        match locks.get(&id) {
            Some(lock) if lock.is_terminal() => {
                locks.remove(&id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::lock::SessionIdentity;

    fn lock(cart_id: CartId) -> CheckoutLock {
        CheckoutLock::new(
            cart_id,
            SessionIdentity::anonymous("s"),
            Utc::now(),
            Duration::minutes(30),
        )
    }

    #[tokio::test]
    async fn test_one_active_lock_per_cart() {
        let store = InMemoryCheckoutStore::new();
        let cart = CartId::new();
        let first = lock(cart);
        store.create(first.clone()).await.unwrap();

        let err = store.create(lock(cart)).await.unwrap_err();
        assert!(matches!(
            err,
            CheckoutError::ActiveCheckoutExists { checkout_id, .. } if checkout_id == first.id()
        ));

        // once the first is terminal the cart is free again
        let failed = first
            .failed(
                crate::failure::FailureReason::new(
                    crate::failure::FailureKind::Abandoned,
                    first.phase(),
                    "gone",
                    Utc::now(),
                ),
                Utc::now(),
            )
            .unwrap();
        store
            .transition(&failed, CheckoutState::Pending, 1)
            .await
            .unwrap();
        store.create(lock(cart)).await.unwrap();
        assert_eq!(store.count().await, 2);
    }

    #[tokio::test]
    async fn test_transition_checks_state_and_version() {
        let store = InMemoryCheckoutStore::new();
        let lock = lock(CartId::new());
        store.create(lock.clone()).await.unwrap();
        let next = lock.advanced(CheckoutState::Validating, Utc::now()).unwrap();

        store
            .transition(&next, CheckoutState::Pending, 1)
            .await
            .unwrap();
        let err = store
            .transition(&next, CheckoutState::Pending, 1)
            .await
            .unwrap_err();
        assert!(matches!(err, CheckoutError::StateConflict { .. }));
    }

    #[tokio::test]
    async fn test_only_terminal_locks_are_deleted() {
        let store = InMemoryCheckoutStore::new();
        let lock = lock(CartId::new());
        store.create(lock.clone()).await.unwrap();
        assert!(!store.delete_terminal(lock.id()).await.unwrap());
        assert!(
            store
                .terminal_before(Utc::now() + Duration::days(1), 10)
                .await
                .unwrap()
                .is_empty()
        );
    }
}
