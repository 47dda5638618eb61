//! Storage trait for price snapshots.

use std::sync::Arc;

use async_trait::async_trait;
use common::CheckoutId;

use crate::error::Result;
use crate::snapshot::PriceSnapshot;

/// Write-once persistence for price snapshots.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Inserts every snapshot or none of them.
    ///
    /// Fails with `SnapshotExists` if any `(checkout, scope)` is already stored.
    async fn insert_all(&self, snapshots: Vec<PriceSnapshot>) -> Result<()>;

    async fn for_checkout(&self, checkout_id: CheckoutId) -> Result<Vec<PriceSnapshot>>;

    /// Removes a checkout's snapshots, returning how many were deleted.
    async fn delete_for_checkout(&self, checkout_id: CheckoutId) -> Result<u64>;
}

#[async_trait]
impl<T: SnapshotStore + ?Sized> SnapshotStore for Arc<T> {
    async fn insert_all(&self, snapshots: Vec<PriceSnapshot>) -> Result<()> {
        (**self).insert_all(snapshots).await
    }

    async fn for_checkout(&self, checkout_id: CheckoutId) -> Result<Vec<PriceSnapshot>> {
        (**self).for_checkout(checkout_id).await
    }

    async fn delete_for_checkout(&self, checkout_id: CheckoutId) -> Result<u64> {
        (**self).delete_for_checkout(checkout_id).await
    }
}
