//! Catalog collaborator: the capability flags inventory needs from the catalog.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use common::{VariantId, WarehouseId};

use crate::error::InventoryError;

/// Read-only view of catalog data owned elsewhere.
#[async_trait]
pub trait Catalog: Send + Sync {
    /// Whether the variant may be sold beyond available stock.
    async fn allows_backorder(&self, variant_id: &VariantId) -> Result<bool, InventoryError>;

    /// Warehouses to fulfil the variant from, most preferred first.
    async fn warehouse_priority(
        &self,
        variant_id: &VariantId,
    ) -> Result<Vec<WarehouseId>, InventoryError>;
}

#[derive(Debug, Default, Clone)]
struct CatalogEntry {
    allows_backorder: bool,
    warehouses: Vec<WarehouseId>,
}

#[derive(Debug, Default)]
struct InMemoryCatalogState {
    entries: HashMap<VariantId, CatalogEntry>,
    default_warehouses: Vec<WarehouseId>,
}

/// In-memory catalog for tests and the demo server.
///
/// Unknown variants disallow backorder and use the default warehouse order.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCatalog {
    state: Arc<RwLock<InMemoryCatalogState>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_allows_backorder(&self, variant_id: impl Into<VariantId>, allows: bool) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state
            .entries
            .entry(variant_id.into())
            .or_default()
            .allows_backorder = allows;
    }

    pub fn set_warehouse_priority(
        &self,
        variant_id: impl Into<VariantId>,
        warehouses: Vec<WarehouseId>,
    ) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.entries.entry(variant_id.into()).or_default().warehouses = warehouses;
    }

    /// Warehouse order used for variants without their own priority list.
    pub fn set_default_warehouses(&self, warehouses: Vec<WarehouseId>) {
        self.state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .default_warehouses = warehouses;
    }
}

#[async_trait]
impl Catalog for InMemoryCatalog {
    async fn allows_backorder(&self, variant_id: &VariantId) -> Result<bool, InventoryError> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        Ok(state
            .entries
            .get(variant_id)
            .is_some_and(|e| e.allows_backorder))
    }

    async fn warehouse_priority(
        &self,
        variant_id: &VariantId,
    ) -> Result<Vec<WarehouseId>, InventoryError> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        Ok(state
            .entries
            .get(variant_id)
            .map(|e| e.warehouses.clone())
            .filter(|w| !w.is_empty())
            .unwrap_or_else(|| state.default_warehouses.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unknown_variant_uses_defaults() {
        let catalog = InMemoryCatalog::new();
        catalog.set_default_warehouses(vec![WarehouseId::new("WH-1")]);
        let variant = VariantId::new("SKU-X");

        assert!(!catalog.allows_backorder(&variant).await.unwrap());
        assert_eq!(
            catalog.warehouse_priority(&variant).await.unwrap(),
            vec![WarehouseId::new("WH-1")]
        );
    }

    #[tokio::test]
    async fn test_variant_overrides_are_returned() {
        let catalog = InMemoryCatalog::new();
        catalog.set_allows_backorder("SKU-1", true);
        catalog.set_warehouse_priority(
            "SKU-1",
            vec![WarehouseId::new("WH-B"), WarehouseId::new("WH-A")],
        );
        let variant = VariantId::new("SKU-1");

        assert!(catalog.allows_backorder(&variant).await.unwrap());
        assert_eq!(
            catalog.warehouse_priority(&variant).await.unwrap(),
            vec![WarehouseId::new("WH-B"), WarehouseId::new("WH-A")]
        );
    }
}
