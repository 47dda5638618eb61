//! Read-only stock reporting.

use chrono::{DateTime, Utc};
use common::Clock;
use serde::Serialize;

use crate::error::Result;
use crate::ledger::InventoryLedger;
use crate::level::{InventoryKey, LevelSnapshot, StockStatus};
use crate::store::LedgerStore;

/// A level whose derived status is anything but in stock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StockAlert {
    pub key: InventoryKey,
    pub status: StockStatus,
    pub quantity: i64,
    pub reserved: i64,
    pub available: i64,
    pub reorder_point: i64,
    pub incoming: i64,
}

impl From<&LevelSnapshot> for StockAlert {
    fn from(snapshot: &LevelSnapshot) -> Self {
        let level = &snapshot.level;
        Self {
            key: level.key().clone(),
            status: snapshot.status,
            quantity: level.quantity(),
            reserved: level.reserved_quantity(),
            available: snapshot.available,
            reorder_point: level.reorder_point(),
            incoming: level.incoming_quantity(),
        }
    }
}

/// Low, out-of-stock, backorder and preorder levels at one point in time.
#[derive(Debug, Clone, Serialize)]
pub struct StockReport {
    pub generated_at: DateTime<Utc>,
    pub alerts: Vec<StockAlert>,
}

impl StockReport {
    /// Recomputes every level's status and keeps the ones needing attention.
    pub async fn build<S: LedgerStore>(ledger: &InventoryLedger<S>) -> Result<Self> {
        let alerts = ledger
            .levels()
            .await?
            .iter()
            .filter(|snapshot| snapshot.status.needs_attention())
            .map(StockAlert::from)
            .collect();
        Ok(Self {
            generated_at: ledger.clock().now(),
            alerts,
        })
    }

    pub fn count(&self, status: StockStatus) -> usize {
        self.alerts.iter().filter(|a| a.status == status).count()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use common::{SystemClock, VariantId, WarehouseId};

    use super::*;
    use crate::catalog::InMemoryCatalog;
    use crate::level::LevelSettings;
    use crate::memory::InMemoryLedgerStore;
    use crate::transaction::TransactionKind;

    #[tokio::test]
    async fn test_report_lists_levels_needing_attention() {
        let ledger = InventoryLedger::new(
            InMemoryLedgerStore::new(),
            Arc::new(InMemoryCatalog::new()),
            Arc::new(SystemClock),
        );
        let settings = LevelSettings {
            reorder_point: 3,
            ..LevelSettings::default()
        };
        for (variant, quantity) in [("PLENTY", 50), ("LOW", 2), ("EMPTY", 0)] {
            ledger
                .track(InventoryKey::new(variant, "WH"), settings)
                .await
                .unwrap();
            if quantity > 0 {
                ledger
                    .adjust(
                        &VariantId::new(variant),
                        &WarehouseId::new("WH"),
                        quantity,
                        TransactionKind::Receipt,
                        None,
                    )
                    .await
                    .unwrap();
            }
        }

        let report = StockReport::build(&ledger).await.unwrap();

        assert_eq!(report.alerts.len(), 2);
        assert_eq!(report.count(StockStatus::LowStock), 1);
        assert_eq!(report.count(StockStatus::OutOfStock), 1);
        assert!(report.alerts.iter().all(|a| a.key.variant_id.as_str() != "PLENTY"));
    }
}
