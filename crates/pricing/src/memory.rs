use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use common::CheckoutId;
use tokio::sync::RwLock;

use crate::error::{PricingError, Result};
use crate::snapshot::PriceSnapshot;
use crate::store::SnapshotStore;

/// In-memory snapshot store, keyed by checkout then scope key.
#[derive(Clone, Default)]
pub struct InMemorySnapshotStore {
    snapshots: Arc<RwLock<HashMap<CheckoutId, Vec<PriceSnapshot>>>>,
}

impl InMemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn count(&self) -> usize {
        self.snapshots.read().await.values().map(Vec::len).sum()
    }
}

#[async_trait]
impl SnapshotStore for InMemorySnapshotStore {
    async fn insert_all(&self, snapshots: Vec<PriceSnapshot>) -> Result<()> {
        let mut stored = self.snapshots.write().await;

        for (i, snapshot) in snapshots.iter().enumerate() {
            let key = snapshot.scope().key();
            let duplicate_in_batch = snapshots[..i]
                .iter()
                .any(|s| s.checkout_id() == snapshot.checkout_id() && s.scope().key() == key);
            let already_stored = stored
                .get(&snapshot.checkout_id())
                .is_some_and(|existing| existing.iter().any(|s| s.scope().key() == key));
            if duplicate_in_batch || already_stored {
                return Err(PricingError::SnapshotExists {
                    checkout_id: snapshot.checkout_id(),
                    scope: key,
                });
            }
        }

        for snapshot in snapshots {
            stored.entry(snapshot.checkout_id()).or_default().push(snapshot);
        }
        Ok(())
    }

    async fn for_checkout(&self, checkout_id: CheckoutId) -> Result<Vec<PriceSnapshot>> {
        Ok(self
            .snapshots
            .read()
            .await
            .get(&checkout_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn delete_for_checkout(&self, checkout_id: CheckoutId) -> Result<u64> {
        let removed = self.snapshots.write().await.remove(&checkout_id);
        Ok(removed.map_or(0, |s| s.len() as u64))
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use common::{CurrencyCode, Money};

    use super::*;
    use crate::resolver::ResolvedPrice;
    use crate::snapshot::SnapshotScope;

    fn snapshot(checkout_id: CheckoutId, scope: SnapshotScope) -> PriceSnapshot {
        let resolved = ResolvedPrice {
            currency: CurrencyCode::new("USD").unwrap(),
            unit_price: Money::from_cents(100),
            quantity: 1,
            discounts: vec![],
            taxes: vec![],
            promotion_metadata: serde_json::Map::new(),
        };
        PriceSnapshot::capture(checkout_id, scope, &resolved, None, None, Utc::now())
    }

    #[tokio::test]
    async fn test_existing_scope_is_never_overwritten() {
        let store = InMemorySnapshotStore::new();
        let checkout = CheckoutId::new();
        store
            .insert_all(vec![snapshot(checkout, SnapshotScope::Cart)])
            .await
            .unwrap();

        let err = store
            .insert_all(vec![
                snapshot(checkout, SnapshotScope::line("l1", "A", 1)),
                snapshot(checkout, SnapshotScope::Cart),
            ])
            .await
            .unwrap_err();

        assert!(matches!(err, PricingError::SnapshotExists { .. }));
        // the batch was rejected as a whole
        assert_eq!(store.count().await, 1);
    }

    #[tokio::test]
    async fn test_delete_removes_one_checkout_only() {
        let store = InMemorySnapshotStore::new();
        let (a, b) = (CheckoutId::new(), CheckoutId::new());
        store
            .insert_all(vec![
                snapshot(a, SnapshotScope::Cart),
                snapshot(a, SnapshotScope::line("l1", "A", 1)),
                snapshot(b, SnapshotScope::Cart),
            ])
            .await
            .unwrap();

        assert_eq!(store.delete_for_checkout(a).await.unwrap(), 2);
        assert!(store.for_checkout(a).await.unwrap().is_empty());
        assert_eq!(store.for_checkout(b).await.unwrap().len(), 1);
    }
}
