//! Inventory levels and derived stock status.

use chrono::{DateTime, Utc};
use common::{VariantId, WarehouseId};
use serde::{Deserialize, Serialize};

use crate::error::{InventoryError, Result};
use crate::transaction::{Adjustment, Counter, Counters};

/// Identifies one inventory level: a variant stocked in a warehouse.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InventoryKey {
    pub variant_id: VariantId,
    pub warehouse_id: WarehouseId,
}

impl InventoryKey {
    pub fn new(variant_id: impl Into<VariantId>, warehouse_id: impl Into<WarehouseId>) -> Self {
        Self {
            variant_id: variant_id.into(),
            warehouse_id: warehouse_id.into(),
        }
    }
}

impl std::fmt::Display for InventoryKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.variant_id, self.warehouse_id)
    }
}

/// Stock status, derived from counters on every read.
///
/// Never persisted: the counters are the only source of truth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StockStatus {
    InStock,
    /// Available, but at or below the reorder point / safety stock.
    LowStock,
    OutOfStock,
    /// Nothing available, but the variant may be sold against the backorder limit.
    Backorder,
    /// Nothing available, preorder units announced.
    Preorder,
}

impl StockStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StockStatus::InStock => "in_stock",
            StockStatus::LowStock => "low_stock",
            StockStatus::OutOfStock => "out_of_stock",
            StockStatus::Backorder => "backorder",
            StockStatus::Preorder => "preorder",
        }
    }

    /// True for statuses that should show up in stock alert reports.
    pub fn needs_attention(&self) -> bool {
        !matches!(self, StockStatus::InStock)
    }
}

impl std::fmt::Display for StockStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Thresholds set when a level is first tracked.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelSettings {
    #[serde(default)]
    pub backorder_limit: i64,
    #[serde(default)]
    pub reorder_point: i64,
    #[serde(default)]
    pub safety_stock: i64,
}

/// Counters for one (variant, warehouse) pairing.
///
/// Fields are only changed by [`InventoryLevel::apply`], which the ledger
/// calls inside its compare-and-swap write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryLevel {
    pub(crate) key: InventoryKey,
    pub(crate) quantity: i64,
    pub(crate) reserved_quantity: i64,
    pub(crate) damaged_quantity: i64,
    pub(crate) incoming_quantity: i64,
    pub(crate) preorder_quantity: i64,
    pub(crate) backorder_limit: i64,
    pub(crate) reorder_point: i64,
    pub(crate) safety_stock: i64,
    pub(crate) version: i64,
    pub(crate) updated_at: DateTime<Utc>,
}

impl InventoryLevel {
    /// A freshly tracked level with all counters at zero.
    pub fn new(key: InventoryKey, settings: LevelSettings, now: DateTime<Utc>) -> Self {
        Self {
            key,
            quantity: 0,
            reserved_quantity: 0,
            damaged_quantity: 0,
            incoming_quantity: 0,
            preorder_quantity: 0,
            backorder_limit: settings.backorder_limit.max(0),
            reorder_point: settings.reorder_point.max(0),
            safety_stock: settings.safety_stock.max(0),
            version: 1,
            updated_at: now,
        }
    }

    pub fn key(&self) -> &InventoryKey {
        &self.key
    }

    pub fn quantity(&self) -> i64 {
        self.quantity
    }

    pub fn reserved_quantity(&self) -> i64 {
        self.reserved_quantity
    }

    pub fn damaged_quantity(&self) -> i64 {
        self.damaged_quantity
    }

    pub fn incoming_quantity(&self) -> i64 {
        self.incoming_quantity
    }

    pub fn preorder_quantity(&self) -> i64 {
        self.preorder_quantity
    }

    pub fn backorder_limit(&self) -> i64 {
        self.backorder_limit
    }

    pub fn reorder_point(&self) -> i64 {
        self.reorder_point
    }

    pub fn safety_stock(&self) -> i64 {
        self.safety_stock
    }

    pub fn version(&self) -> i64 {
        self.version
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn counters(&self) -> Counters {
        Counters {
            quantity: self.quantity,
            reserved: self.reserved_quantity,
            damaged: self.damaged_quantity,
        }
    }

    /// `max(0, quantity − reserved − damaged)`.
    pub fn available(&self) -> i64 {
        (self.quantity - self.reserved_quantity - self.damaged_quantity).max(0)
    }

    /// Units held beyond physical stock (backorders).
    fn overdraft(&self) -> i64 {
        (self.reserved_quantity + self.damaged_quantity - self.quantity).max(0)
    }

    /// How many more units may be reserved right now.
    pub fn reservable(&self, allows_backorder: bool) -> i64 {
        let backorder_headroom = if allows_backorder {
            (self.backorder_limit - self.overdraft()).max(0)
        } else {
            0
        };
        self.available() + backorder_headroom
    }

    pub fn status(&self, allows_backorder: bool) -> StockStatus {
        let available = self.available();
        if available > 0 {
            if available <= self.reorder_point.max(self.safety_stock) {
                StockStatus::LowStock
            } else {
                StockStatus::InStock
            }
        } else if self.preorder_quantity > 0 {
            StockStatus::Preorder
        } else if allows_backorder && self.reservable(true) > 0 {
            StockStatus::Backorder
        } else {
            StockStatus::OutOfStock
        }
    }

    /// Returns the level after `adjustment`, with the version bumped.
    ///
    /// Fails without side effects if any counter would go negative, or if an
    /// adjustment that shrinks availability would leave
    /// `reserved + damaged > quantity (+ backorder allowance)`.
    pub(crate) fn apply(
        &self,
        adjustment: &Adjustment,
        allows_backorder: bool,
        now: DateTime<Utc>,
    ) -> Result<InventoryLevel> {
        let delta = adjustment.delta;
        if delta == 0 {
            return Err(InventoryError::InvalidQuantity(0));
        }

        let mut next = self.clone();
        let slot = match adjustment.counter {
            Counter::OnHand => &mut next.quantity,
            Counter::Reserved => &mut next.reserved_quantity,
            Counter::Damaged => &mut next.damaged_quantity,
            Counter::Incoming => &mut next.incoming_quantity,
            Counter::Preorder => &mut next.preorder_quantity,
        };
        *slot += delta;
        if *slot < 0 {
            return Err(InventoryError::InvalidAdjustment(format!(
                "{} counter of {} would drop below zero",
                adjustment.counter, self.key
            )));
        }

        let shrinks_availability = match adjustment.counter {
            Counter::OnHand => delta < 0,
            Counter::Reserved | Counter::Damaged => delta > 0,
            Counter::Incoming | Counter::Preorder => false,
        };
        if shrinks_availability {
            let allowance = if adjustment.counter == Counter::Reserved && allows_backorder {
                self.backorder_limit
            } else {
                0
            };
            if next.reserved_quantity + next.damaged_quantity > next.quantity + allowance {
                return Err(InventoryError::InsufficientStock {
                    variant_id: self.key.variant_id.clone(),
                    warehouse_id: Some(self.key.warehouse_id.clone()),
                    requested: delta.abs(),
                    available: self.reservable(allows_backorder),
                });
            }
        }

        next.version += 1;
        next.updated_at = now;
        Ok(next)
    }
}

/// A level together with its derived status, as returned to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LevelSnapshot {
    pub level: InventoryLevel,
    pub available: i64,
    pub status: StockStatus,
}

impl LevelSnapshot {
    pub fn new(level: InventoryLevel, allows_backorder: bool) -> Self {
        Self {
            available: level.available(),
            status: level.status(allows_backorder),
            level,
        }
    }
}
