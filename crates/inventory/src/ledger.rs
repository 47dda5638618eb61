//! The inventory ledger: the only writer of inventory level counters.

use std::sync::Arc;

use common::{Clock, Reference, VariantId, WarehouseId};

use crate::catalog::Catalog;
use crate::error::{InventoryError, Result};
use crate::level::{InventoryKey, InventoryLevel, LevelSettings, LevelSnapshot};
use crate::reservation::LockToken;
use crate::store::{LedgerStore, WriteGuard};
use crate::transaction::{Adjustment, Counter, Counters, InventoryTransaction, TransactionKind};

const DEFAULT_CONFLICT_RETRIES: u32 = 16;

/// Applies adjustments to inventory levels.
///
/// Each write reads the level, applies the adjustment in memory and commits
/// it with a compare-and-swap on the level's version, appending exactly one
/// transaction. Version conflicts re-read and retry a bounded number of times.
pub struct InventoryLedger<S: LedgerStore> {
    store: S,
    catalog: Arc<dyn Catalog>,
    clock: Arc<dyn Clock>,
    conflict_retries: u32,
}

impl<S: LedgerStore + Clone> Clone for InventoryLedger<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            catalog: Arc::clone(&self.catalog),
            clock: Arc::clone(&self.clock),
            conflict_retries: self.conflict_retries,
        }
    }
}

impl<S: LedgerStore> InventoryLedger<S> {
    /// Creates a ledger over `store`, consulting `catalog` for backorder flags.
    pub fn new(store: S, catalog: Arc<dyn Catalog>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            catalog,
            clock,
            conflict_retries: DEFAULT_CONFLICT_RETRIES,
        }
    }

    /// Overrides how many times a version conflict is retried.
    pub fn with_conflict_retries(mut self, retries: u32) -> Self {
        self.conflict_retries = retries;
        self
    }

    /// The underlying level store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Catalog used for backorder flags and warehouse priority.
    pub fn catalog(&self) -> &Arc<dyn Catalog> {
        &self.catalog
    }

    /// Clock stamping every transaction.
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Starts tracking a (variant, warehouse) pairing with all counters at zero.
    #[tracing::instrument(skip(self, settings))]
    pub async fn track(&self, key: InventoryKey, settings: LevelSettings) -> Result<LevelSnapshot> {
        let level = InventoryLevel::new(key, settings, self.clock.now());
        self.store.insert_level(level.clone()).await?;
        tracing::info!(key = %level.key(), "inventory level tracked");
        self.snapshot(level).await
    }

    /// Current counters of a level together with its derived status.
    pub async fn get(
        &self,
        variant_id: &VariantId,
        warehouse_id: &WarehouseId,
    ) -> Result<LevelSnapshot> {
        let key = InventoryKey::new(variant_id.clone(), warehouse_id.clone());
        let level = self.level(&key).await?;
        self.snapshot(level).await
    }

    /// Raw level, without status derivation.
    pub async fn level(&self, key: &InventoryKey) -> Result<InventoryLevel> {
        self.store
            .get_level(key)
            .await?
            .ok_or_else(|| InventoryError::LevelNotFound(key.clone()))
    }

    /// Every tracked level with its derived status.
    pub async fn levels(&self) -> Result<Vec<LevelSnapshot>> {
        let mut snapshots = Vec::new();
        for level in self.store.list_levels().await? {
            snapshots.push(self.snapshot(level).await?);
        }
        Ok(snapshots)
    }

    /// Moves physical stock in or out.
    pub async fn adjust(
        &self,
        variant_id: &VariantId,
        warehouse_id: &WarehouseId,
        delta: i64,
        kind: TransactionKind,
        reference: Option<Reference>,
    ) -> Result<(Counters, Counters)> {
        let key = InventoryKey::new(variant_id.clone(), warehouse_id.clone());
        let mut adjustment = Adjustment::stock(key, delta, kind);
        adjustment.reference = reference;
        self.adjust_counter(adjustment).await
    }

    /// Adjusts any counter except `reserved`, which goes through
    /// [`InventoryLedger::adjust_reserved`].
    pub async fn adjust_counter(&self, adjustment: Adjustment) -> Result<(Counters, Counters)> {
        if adjustment.counter == Counter::Reserved {
            return Err(InventoryError::InvalidAdjustment(
                "reserved counter changes must go through adjust_reserved".to_string(),
            ));
        }
        self.write(adjustment, None).await
    }

    /// Changes the reserved counter.
    ///
    /// Increments require the caller to hold the level's live lock `token`.
    /// Decrements (releases) never need one.
    pub async fn adjust_reserved(
        &self,
        adjustment: Adjustment,
        token: Option<LockToken>,
    ) -> Result<(Counters, Counters)> {
        if adjustment.counter != Counter::Reserved {
            return Err(InventoryError::InvalidAdjustment(format!(
                "adjust_reserved cannot change the {} counter",
                adjustment.counter
            )));
        }
        if adjustment.delta > 0 && token.is_none() {
            return Err(InventoryError::TokenNotHeld(adjustment.key));
        }
        let token = if adjustment.delta > 0 { token } else { None };
        self.write(adjustment, token).await
    }

    /// Audit trail of one level, oldest first.
    pub async fn transactions(
        &self,
        variant_id: &VariantId,
        warehouse_id: &WarehouseId,
    ) -> Result<Vec<InventoryTransaction>> {
        let key = InventoryKey::new(variant_id.clone(), warehouse_id.clone());
        self.store.transactions(&key).await
    }

    /// Returns whatever the reservation named by `release.reservation_id`
    /// still holds on its level, as one reserved-counter decrement.
    ///
    /// The held amount is the net of the reserved-counter transactions tagged
    /// with that reservation, so settling twice is a no-op and a reservation
    /// whose row never recorded its grant is still settled in full. The
    /// adjustment's own delta is ignored. Returns the units released.
    #[tracing::instrument(skip(self, release), fields(key = %release.key))]
    pub async fn settle_reservation(&self, mut release: Adjustment) -> Result<i64> {
        let Some(reservation_id) = release.reservation_id else {
            return Err(InventoryError::InvalidAdjustment(
                "settling needs a reservation id".to_string(),
            ));
        };
        if release.counter != Counter::Reserved {
            return Err(InventoryError::InvalidAdjustment(format!(
                "settling cannot change the {} counter",
                release.counter
            )));
        }
        self.check_kind(&release)?;
        let allows_backorder = self.catalog.allows_backorder(&release.key.variant_id).await?;

        let mut attempt = 0;
        loop {
            attempt += 1;
            // Level first: any settle that lands after this read bumps the
            // version, so the commit below cannot decrement twice.
            let current = self.level(&release.key).await?;
            let held = self.store.reserved_for(&release.key, reservation_id).await?;
            if held <= 0 {
                return Ok(0);
            }
            release.delta = -held;

            match self.commit(&release, &current, allows_backorder, None).await {
                Ok(_) => return Ok(held),
                Err(InventoryError::ConcurrencyConflict { .. }) if attempt <= self.conflict_retries => {
                    tracing::debug!(attempt, "version conflict, re-reading level");
                    tokio::task::yield_now().await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn snapshot(&self, level: InventoryLevel) -> Result<LevelSnapshot> {
        let allows_backorder = self
            .catalog
            .allows_backorder(&level.key().variant_id)
            .await?;
        Ok(LevelSnapshot::new(level, allows_backorder))
    }

    fn check_kind(&self, adjustment: &Adjustment) -> Result<()> {
        if !adjustment.kind.allows(adjustment.counter) {
            return Err(InventoryError::InvalidAdjustment(format!(
                "{} transactions cannot change the {} counter",
                adjustment.kind, adjustment.counter
            )));
        }
        Ok(())
    }

    #[tracing::instrument(
        skip(self, adjustment, token),
        fields(key = %adjustment.key, counter = %adjustment.counter, delta = adjustment.delta)
    )]
    async fn write(
        &self,
        adjustment: Adjustment,
        token: Option<LockToken>,
    ) -> Result<(Counters, Counters)> {
        self.check_kind(&adjustment)?;
        let allows_backorder = self
            .catalog
            .allows_backorder(&adjustment.key.variant_id)
            .await?;

        let mut attempt = 0;
        loop {
            attempt += 1;
            let current = self.level(&adjustment.key).await?;
            match self.commit(&adjustment, &current, allows_backorder, token).await {
                Ok(counters) => return Ok(counters),
                Err(InventoryError::ConcurrencyConflict { .. }) if attempt <= self.conflict_retries => {
                    tracing::debug!(attempt, "version conflict, re-reading level");
                    tokio::task::yield_now().await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// One compare-and-swap attempt of `adjustment` against `current`.
    async fn commit(
        &self,
        adjustment: &Adjustment,
        current: &InventoryLevel,
        allows_backorder: bool,
        token: Option<LockToken>,
    ) -> Result<(Counters, Counters)> {
        let now = self.clock.now();
        let next = match current.apply(adjustment, allows_backorder, now) {
            Ok(next) => next,
            Err(e) => {
                if matches!(e, InventoryError::InsufficientStock { .. }) {
                    metrics::counter!("inventory_insufficient_stock_total").increment(1);
                }
                return Err(e);
            }
        };
        let transaction = InventoryTransaction::record(adjustment, current, &next, now);
        let guard = match token {
            Some(token) => WriteGuard::Token { token, at: now },
            None => WriteGuard::Version,
        };

        self.store
            .commit(current.version(), next.clone(), transaction, guard)
            .await?;
        metrics::counter!("inventory_adjustments_total", "kind" => adjustment.kind.as_str())
            .increment(1);
        tracing::debug!(
            before = current.quantity(),
            after = next.quantity(),
            reserved = next.reserved_quantity(),
            "inventory adjusted"
        );
        Ok((current.counters(), next.counters()))
    }
}

#[cfg(test)]
mod tests {
    use common::ManualClock;

    use super::*;
    use crate::catalog::InMemoryCatalog;
    use crate::memory::InMemoryLedgerStore;
    use crate::level::StockStatus;

    fn ledger() -> (InventoryLedger<InMemoryLedgerStore>, InMemoryCatalog) {
        let catalog = InMemoryCatalog::new();
        let ledger = InventoryLedger::new(
            InMemoryLedgerStore::new(),
            Arc::new(catalog.clone()),
            Arc::new(ManualClock::starting_now()),
        );
        (ledger, catalog)
    }

    fn sku() -> VariantId {
        VariantId::new("SKU-1")
    }

    fn wh() -> WarehouseId {
        WarehouseId::new("WH-1")
    }

    async fn tracked(ledger: &InventoryLedger<InMemoryLedgerStore>, quantity: i64) {
        ledger
            .track(InventoryKey::new(sku(), wh()), LevelSettings::default())
            .await
            .unwrap();
        if quantity > 0 {
            ledger
                .adjust(&sku(), &wh(), quantity, TransactionKind::Receipt, None)
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_adjust_returns_before_and_after() {
        let (ledger, _) = ledger();
        tracked(&ledger, 10).await;

        let (before, after) = ledger
            .adjust(
                &sku(),
                &wh(),
                -3,
                TransactionKind::Shipment,
                Some(Reference::order("ORD-1")),
            )
            .await
            .unwrap();

        assert_eq!(before.quantity, 10);
        assert_eq!(after.quantity, 7);
    }

    #[tokio::test]
    async fn test_every_write_appends_one_transaction() {
        let (ledger, _) = ledger();
        tracked(&ledger, 10).await;
        ledger
            .adjust_counter(Adjustment::counter(
                InventoryKey::new(sku(), wh()),
                Counter::Damaged,
                2,
                TransactionKind::Damage,
            ))
            .await
            .unwrap();

        let transactions = ledger.transactions(&sku(), &wh()).await.unwrap();
        assert_eq!(transactions.len(), 2);
        assert_eq!(transactions[0].kind, TransactionKind::Receipt);
        assert_eq!(transactions[1].kind, TransactionKind::Damage);
        assert_eq!(transactions[1].before.damaged, 0);
        assert_eq!(transactions[1].after.damaged, 2);
    }

    #[tokio::test]
    async fn test_failed_write_leaves_no_trace() {
        let (ledger, _) = ledger();
        tracked(&ledger, 2).await;

        let err = ledger
            .adjust(&sku(), &wh(), -5, TransactionKind::Shipment, None)
            .await
            .unwrap_err();
        assert!(matches!(err, InventoryError::InvalidAdjustment(_)));

        let snapshot = ledger.get(&sku(), &wh()).await.unwrap();
        assert_eq!(snapshot.level.quantity(), 2);
        assert_eq!(ledger.transactions(&sku(), &wh()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_kind_must_match_counter() {
        let (ledger, _) = ledger();
        tracked(&ledger, 2).await;

        let err = ledger
            .adjust(&sku(), &wh(), 1, TransactionKind::Damage, None)
            .await
            .unwrap_err();
        assert!(matches!(err, InventoryError::InvalidAdjustment(_)));
    }

    #[tokio::test]
    async fn test_reserved_counter_is_a_separate_operation() {
        let (ledger, _) = ledger();
        tracked(&ledger, 5).await;
        let key = InventoryKey::new(sku(), wh());

        let err = ledger
            .adjust_counter(Adjustment::reserved(key.clone(), 1, TransactionKind::Reserve))
            .await
            .unwrap_err();
        assert!(matches!(err, InventoryError::InvalidAdjustment(_)));

        let err = ledger
            .adjust_reserved(Adjustment::reserved(key, 1, TransactionKind::Reserve), None)
            .await
            .unwrap_err();
        assert!(matches!(err, InventoryError::TokenNotHeld(_)));
    }

    #[tokio::test]
    async fn test_reserved_increment_requires_live_token() {
        let (ledger, _) = ledger();
        tracked(&ledger, 5).await;
        let key = InventoryKey::new(sku(), wh());
        let token = LockToken::new();
        let now = ledger.clock().now();

        // Token not acquired in the store.
        let err = ledger
            .adjust_reserved(
                Adjustment::reserved(key.clone(), 2, TransactionKind::Reserve),
                Some(token),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, InventoryError::TokenNotHeld(_)));

        ledger
            .store()
            .acquire_token(&key, token, now, now + chrono::Duration::seconds(5))
            .await
            .unwrap();
        let (_, after) = ledger
            .adjust_reserved(
                Adjustment::reserved(key.clone(), 2, TransactionKind::Reserve),
                Some(token),
            )
            .await
            .unwrap();
        assert_eq!(after.reserved, 2);

        // Releases go through without a token.
        let (_, after) = ledger
            .adjust_reserved(Adjustment::reserved(key, -2, TransactionKind::Release), None)
            .await
            .unwrap();
        assert_eq!(after.reserved, 0);
    }

    #[tokio::test]
    async fn test_status_follows_catalog_flag() {
        let (ledger, catalog) = ledger();
        tracked(&ledger, 0).await;

        let snapshot = ledger.get(&sku(), &wh()).await.unwrap();
        assert_eq!(snapshot.status, StockStatus::OutOfStock);

        let key = InventoryKey::new(VariantId::new("SKU-2"), wh());
        ledger
            .track(
                key,
                LevelSettings {
                    backorder_limit: 5,
                    ..LevelSettings::default()
                },
            )
            .await
            .unwrap();
        catalog.set_allows_backorder("SKU-2", true);
        let snapshot = ledger.get(&VariantId::new("SKU-2"), &wh()).await.unwrap();
        assert_eq!(snapshot.status, StockStatus::Backorder);
    }

    #[tokio::test]
    async fn test_tracking_twice_fails() {
        let (ledger, _) = ledger();
        tracked(&ledger, 0).await;
        let err = ledger
            .track(InventoryKey::new(sku(), wh()), LevelSettings::default())
            .await
            .unwrap_err();
        assert!(matches!(err, InventoryError::LevelExists(_)));
    }

    #[tokio::test]
    async fn test_unknown_level_is_not_found() {
        let (ledger, _) = ledger();
        let err = ledger.get(&sku(), &wh()).await.unwrap_err();
        assert!(matches!(err, InventoryError::LevelNotFound(_)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_receipts_are_not_lost() {
        let (ledger, _) = ledger();
        tracked(&ledger, 0).await;
        let ledger = ledger.with_conflict_retries(1_000);

        let mut handles = Vec::new();
        for _ in 0..20 {
            let ledger = ledger.clone();
            handles.push(tokio::spawn(async move {
                ledger
                    .adjust(&sku(), &wh(), 1, TransactionKind::Receipt, None)
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let snapshot = ledger.get(&sku(), &wh()).await.unwrap();
        assert_eq!(snapshot.level.quantity(), 20);
        assert_eq!(ledger.transactions(&sku(), &wh()).await.unwrap().len(), 20);
    }
}
