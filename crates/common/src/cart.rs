//! The cart as the engine sees it: plain data handed over by the cart owner.

use serde::{Deserialize, Serialize};

use crate::money::CurrencyCode;
use crate::types::{CartId, LineId, VariantId, WarehouseId};

/// A cart submitted for checkout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cart {
    pub id: CartId,
    pub currency: CurrencyCode,
    pub lines: Vec<CartLine>,
    #[serde(default)]
    pub coupon_code: Option<String>,
}

/// One line of a cart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartLine {
    pub line_id: LineId,
    pub variant_id: VariantId,
    pub quantity: u32,
    /// Pins the line to a warehouse; otherwise the catalog's priority order decides.
    #[serde(default)]
    pub warehouse_id: Option<WarehouseId>,
}

impl Cart {
    pub fn new(id: CartId, currency: CurrencyCode) -> Self {
        Self {
            id,
            currency,
            lines: Vec::new(),
            coupon_code: None,
        }
    }

    /// Appends a line; builder style.
    pub fn with_line(mut self, line: CartLine) -> Self {
        self.lines.push(line);
        self
    }

    pub fn with_coupon(mut self, code: impl Into<String>) -> Self {
        self.coupon_code = Some(code.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn line(&self, line_id: &LineId) -> Option<&CartLine> {
        self.lines.iter().find(|l| &l.line_id == line_id)
    }
}

impl CartLine {
    pub fn new(line_id: impl Into<LineId>, variant_id: impl Into<VariantId>, quantity: u32) -> Self {
        Self {
            line_id: line_id.into(),
            variant_id: variant_id.into(),
            quantity,
            warehouse_id: None,
        }
    }

    pub fn from_warehouse(mut self, warehouse_id: impl Into<WarehouseId>) -> Self {
        self.warehouse_id = Some(warehouse_id.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_collects_lines() {
        let cart = Cart::new(CartId::new(), CurrencyCode::new("USD").unwrap())
            .with_line(CartLine::new("l1", "SKU-1", 2))
            .with_line(CartLine::new("l2", "SKU-2", 1).from_warehouse("WH-EAST"))
            .with_coupon("SPRING");

        assert_eq!(cart.lines.len(), 2);
        assert_eq!(cart.coupon_code.as_deref(), Some("SPRING"));
        assert_eq!(
            cart.line(&LineId::new("l2")).and_then(|l| l.warehouse_id.clone()),
            Some(WarehouseId::new("WH-EAST"))
        );
    }

    #[test]
    fn test_deserializes_without_optional_fields() {
        let json = serde_json::json!({
            "id": CartId::new(),
            "currency": "usd",
            "lines": [{ "line_id": "l1", "variant_id": "SKU-1", "quantity": 3 }]
        });
        let cart: Cart = serde_json::from_value(json).unwrap();
        assert_eq!(cart.currency.as_str(), "USD");
        assert!(cart.coupon_code.is_none());
        assert!(cart.lines[0].warehouse_id.is_none());
    }
}
