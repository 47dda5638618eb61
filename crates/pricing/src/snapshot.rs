//! Frozen prices.
//!
//! A [`PriceSnapshot`] is built once from a resolver result and never changes
//! afterwards: fields are private and only readable through getters.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use common::{CheckoutId, CurrencyCode, LineId, Money, SnapshotId, VariantId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{PricingError, Result};
use crate::resolver::{DiscountLine, ResolvedPrice, TaxLine, convert};

/// What a snapshot prices.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SnapshotScope {
    Cart,
    Line {
        line_id: LineId,
        variant_id: VariantId,
        quantity: u32,
    },
}

impl SnapshotScope {
    pub fn line(line_id: impl Into<LineId>, variant_id: impl Into<VariantId>, quantity: u32) -> Self {
        Self::Line {
            line_id: line_id.into(),
            variant_id: variant_id.into(),
            quantity,
        }
    }

    /// Storage key, unique per checkout.
    pub fn key(&self) -> String {
        match self {
            Self::Cart => "cart".to_string(),
            Self::Line { line_id, .. } => format!("line:{line_id}"),
        }
    }

    pub fn is_cart(&self) -> bool {
        matches!(self, Self::Cart)
    }
}

/// Grand total re-expressed in a comparison currency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrencyConversion {
    pub currency: CurrencyCode,
    pub rate: Decimal,
    pub grand_total: Money,
}

impl CurrencyConversion {
    pub fn new(currency: CurrencyCode, rate: Decimal, amount: Money) -> Self {
        Self {
            currency,
            rate,
            grand_total: convert(amount, rate),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceSnapshot {
    id: SnapshotId,
    checkout_id: CheckoutId,
    scope: SnapshotScope,
    currency: CurrencyCode,
    unit_price: Option<Money>,
    subtotal: Money,
    discount_total: Money,
    tax_total: Money,
    grand_total: Money,
    discounts: Vec<DiscountLine>,
    taxes: Vec<TaxLine>,
    conversion: Option<CurrencyConversion>,
    coupon_code: Option<String>,
    promotion_metadata: serde_json::Map<String, serde_json::Value>,
    captured_at: DateTime<Utc>,
}

impl PriceSnapshot {
    /// Freezes one resolver result.
    pub fn capture(
        checkout_id: CheckoutId,
        scope: SnapshotScope,
        resolved: &ResolvedPrice,
        coupon_code: Option<String>,
        conversion: Option<CurrencyConversion>,
        captured_at: DateTime<Utc>,
    ) -> Self {
        let unit_price = match scope {
            SnapshotScope::Cart => None,
            SnapshotScope::Line { .. } => Some(resolved.unit_price),
        };
        Self {
            id: SnapshotId::new(),
            checkout_id,
            scope,
            currency: resolved.currency.clone(),
            unit_price,
            subtotal: resolved.subtotal(),
            discount_total: resolved.discount_total(),
            tax_total: resolved.tax_total(),
            grand_total: resolved.total(),
            discounts: resolved.discounts.clone(),
            taxes: resolved.taxes.clone(),
            conversion,
            coupon_code,
            promotion_metadata: resolved.promotion_metadata.clone(),
            captured_at,
        }
    }

    /// Builds the cart snapshot from already frozen line snapshots.
    ///
    /// Discounts are merged by code and taxes by name and rate. The cart
    /// totals come from the lines' unit prices, quantities and merged
    /// breakdowns, never from the lines' own totals, so [`reconcile`] can
    /// catch a line whose total disagrees with its components.
    pub fn aggregate(
        checkout_id: CheckoutId,
        currency: CurrencyCode,
        lines: &[PriceSnapshot],
        coupon_code: Option<String>,
        comparison: Option<(CurrencyCode, Decimal)>,
        captured_at: DateTime<Utc>,
    ) -> Result<Self> {
        if lines.is_empty() {
            return Err(PricingError::EmptyCart);
        }
        if let Some(line) = lines.iter().find(|l| l.currency != currency) {
            return Err(PricingError::CurrencyMismatch {
                expected: currency,
                actual: line.currency.clone(),
            });
        }

        let mut discounts: BTreeMap<String, DiscountLine> = BTreeMap::new();
        let mut taxes: BTreeMap<(String, u32), TaxLine> = BTreeMap::new();
        let mut promotion_metadata = serde_json::Map::new();
        for line in lines {
            for discount in &line.discounts {
                discounts
                    .entry(discount.code.clone())
                    .and_modify(|d| d.amount += discount.amount)
                    .or_insert_with(|| discount.clone());
            }
            for tax in &line.taxes {
                taxes
                    .entry((tax.name.clone(), tax.rate_bps))
                    .and_modify(|t| t.amount += tax.amount)
                    .or_insert_with(|| tax.clone());
            }
            for (key, value) in &line.promotion_metadata {
                promotion_metadata
                    .entry(key.clone())
                    .or_insert_with(|| value.clone());
            }
        }

        let subtotal: Money = lines.iter().map(PriceSnapshot::extended_price).sum();
        let discount_total: Money = discounts.values().map(|d| d.amount).sum();
        let tax_total: Money = taxes.values().map(|t| t.amount).sum();
        let grand_total = subtotal - discount_total + tax_total;
        Ok(Self {
            id: SnapshotId::new(),
            checkout_id,
            scope: SnapshotScope::Cart,
            currency,
            unit_price: None,
            subtotal,
            discount_total,
            tax_total,
            grand_total,
            discounts: discounts.into_values().collect(),
            taxes: taxes.into_values().collect(),
            conversion: comparison
                .map(|(currency, rate)| CurrencyConversion::new(currency, rate, grand_total)),
            coupon_code,
            promotion_metadata,
            captured_at,
        })
    }

    /// Unit price times quantity for a line; the stored subtotal otherwise.
    fn extended_price(&self) -> Money {
        match (&self.scope, self.unit_price) {
            (SnapshotScope::Line { quantity, .. }, Some(unit_price)) => unit_price.times(*quantity),
            _ => self.subtotal,
        }
    }

    pub fn id(&self) -> SnapshotId {
        self.id
    }

    pub fn checkout_id(&self) -> CheckoutId {
        self.checkout_id
    }

    pub fn scope(&self) -> &SnapshotScope {
        &self.scope
    }

    pub fn currency(&self) -> &CurrencyCode {
        &self.currency
    }

    pub fn unit_price(&self) -> Option<Money> {
        self.unit_price
    }

    pub fn subtotal(&self) -> Money {
        self.subtotal
    }

    pub fn discount_total(&self) -> Money {
        self.discount_total
    }

    pub fn tax_total(&self) -> Money {
        self.tax_total
    }

    pub fn grand_total(&self) -> Money {
        self.grand_total
    }

    pub fn discounts(&self) -> &[DiscountLine] {
        &self.discounts
    }

    pub fn taxes(&self) -> &[TaxLine] {
        &self.taxes
    }

    pub fn conversion(&self) -> Option<&CurrencyConversion> {
        self.conversion.as_ref()
    }

    pub fn coupon_code(&self) -> Option<&str> {
        self.coupon_code.as_deref()
    }

    pub fn promotion_metadata(&self) -> &serde_json::Map<String, serde_json::Value> {
        &self.promotion_metadata
    }

    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }
}

/// Every snapshot frozen for one checkout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FrozenPrices {
    pub cart: PriceSnapshot,
    pub lines: Vec<PriceSnapshot>,
}

impl FrozenPrices {
    /// Splits a checkout's stored snapshots into cart and lines.
    ///
    /// Returns `None` when no cart snapshot exists.
    pub fn from_snapshots(snapshots: Vec<PriceSnapshot>) -> Option<Self> {
        let (carts, mut lines): (Vec<_>, Vec<_>) =
            snapshots.into_iter().partition(|s| s.scope.is_cart());
        let cart = carts.into_iter().next()?;
        lines.sort_by_key(|s| s.scope.key());
        Some(Self { cart, lines })
    }

    pub fn grand_total(&self) -> Money {
        self.cart.grand_total
    }

    pub fn line(&self, line_id: &LineId) -> Option<&PriceSnapshot> {
        self.lines.iter().find(|s| match &s.scope {
            SnapshotScope::Line { line_id: id, .. } => id == line_id,
            SnapshotScope::Cart => false,
        })
    }
}

/// Checks that line snapshots add up to the cart snapshot.
///
/// Both the sum of line grand totals and the cart's own
/// subtotal/discount/tax arithmetic must be within `tolerance_cents`.
pub fn reconcile(cart: &PriceSnapshot, lines: &[PriceSnapshot], tolerance_cents: i64) -> Result<()> {
    let line_total: Money = lines.iter().map(|l| l.grand_total).sum();
    let computed = cart.subtotal - cart.discount_total + cart.tax_total;
    let difference = line_total
        .abs_diff(cart.grand_total)
        .max(computed.abs_diff(cart.grand_total));
    if difference > tolerance_cents {
        return Err(PricingError::Reconciliation {
            difference,
            tolerance: tolerance_cents,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usd() -> CurrencyCode {
        CurrencyCode::new("USD").unwrap()
    }

    fn resolved(unit: i64, quantity: u32, discount: i64, tax: i64) -> ResolvedPrice {
        let mut discounts = Vec::new();
        if discount > 0 {
            discounts.push(DiscountLine {
                code: "TEN".to_string(),
                description: "10% off".to_string(),
                amount: Money::from_cents(discount),
                promotion_id: None,
            });
        }
        ResolvedPrice {
            currency: usd(),
            unit_price: Money::from_cents(unit),
            quantity,
            discounts,
            taxes: vec![TaxLine {
                name: "sales tax".to_string(),
                rate_bps: 800,
                amount: Money::from_cents(tax),
            }],
            promotion_metadata: serde_json::Map::new(),
        }
    }

    #[test]
    fn test_scope_keys_are_unique_per_line() {
        assert_eq!(SnapshotScope::Cart.key(), "cart");
        assert_eq!(SnapshotScope::line("l1", "SKU", 2).key(), "line:l1");
    }

    #[test]
    fn test_aggregate_merges_lines() {
        let checkout = CheckoutId::new();
        let now = Utc::now();
        let lines = vec![
            PriceSnapshot::capture(
                checkout,
                SnapshotScope::line("l1", "A", 2),
                &resolved(1000, 2, 200, 144),
                None,
                None,
                now,
            ),
            PriceSnapshot::capture(
                checkout,
                SnapshotScope::line("l2", "B", 1),
                &resolved(550, 1, 55, 40),
                None,
                None,
                now,
            ),
        ];

        let cart = PriceSnapshot::aggregate(checkout, usd(), &lines, None, None, now).unwrap();

        assert_eq!(cart.subtotal(), Money::from_cents(2550));
        assert_eq!(cart.discount_total(), Money::from_cents(255));
        assert_eq!(cart.tax_total(), Money::from_cents(184));
        assert_eq!(cart.grand_total(), Money::from_cents(2479));
        assert_eq!(cart.discounts().len(), 1);
        assert_eq!(cart.taxes().len(), 1);
        assert!(cart.unit_price().is_none());
        reconcile(&cart, &lines, 1).unwrap();
    }

    #[test]
    fn test_reconcile_catches_a_line_total_off_its_breakdown() {
        let checkout = CheckoutId::new();
        let now = Utc::now();
        let mut drifted = PriceSnapshot::capture(
            checkout,
            SnapshotScope::line("l1", "A", 2),
            &resolved(1000, 2, 200, 144),
            None,
            None,
            now,
        );
        drifted.grand_total = drifted.grand_total + Money::from_cents(3);
        let lines = vec![
            drifted,
            PriceSnapshot::capture(
                checkout,
                SnapshotScope::line("l2", "B", 1),
                &resolved(550, 1, 55, 40),
                None,
                None,
                now,
            ),
        ];

        let cart = PriceSnapshot::aggregate(checkout, usd(), &lines, None, None, now).unwrap();

        assert_eq!(cart.grand_total(), Money::from_cents(2479));
        let err = reconcile(&cart, &lines, 1).unwrap_err();
        assert!(matches!(err, PricingError::Reconciliation { difference: 3, .. }));
    }

    #[test]
    fn test_reconcile_rejects_drift_beyond_tolerance() {
        let checkout = CheckoutId::new();
        let now = Utc::now();
        let line = PriceSnapshot::capture(
            checkout,
            SnapshotScope::line("l1", "A", 1),
            &resolved(1000, 1, 0, 80),
            None,
            None,
            now,
        );
        let cart = PriceSnapshot::capture(
            checkout,
            SnapshotScope::Cart,
            &resolved(1005, 1, 0, 80),
            None,
            None,
            now,
        );

        let err = reconcile(&cart, std::slice::from_ref(&line), 1).unwrap_err();
        assert!(matches!(err, PricingError::Reconciliation { difference: 5, .. }));
        reconcile(&cart, &[line], 5).unwrap();
    }

    #[test]
    fn test_aggregate_rejects_mixed_currencies() {
        let checkout = CheckoutId::new();
        let line = PriceSnapshot::capture(
            checkout,
            SnapshotScope::line("l1", "A", 1),
            &resolved(1000, 1, 0, 80),
            None,
            None,
            Utc::now(),
        );
        let eur = CurrencyCode::new("EUR").unwrap();
        let err = PriceSnapshot::aggregate(checkout, eur, &[line], None, None, Utc::now())
            .unwrap_err();
        assert!(matches!(err, PricingError::CurrencyMismatch { .. }));
    }

    #[test]
    fn test_snapshot_survives_json() {
        let snapshot = PriceSnapshot::capture(
            CheckoutId::new(),
            SnapshotScope::line("l1", "A", 3),
            &resolved(333, 3, 0, 80),
            Some("TEN".to_string()),
            Some(CurrencyConversion::new(
                CurrencyCode::new("EUR").unwrap(),
                Decimal::new(92, 2),
                Money::from_cents(1079),
            )),
            Utc::now(),
        );
        let json = serde_json::to_value(&snapshot).unwrap();
        let back: PriceSnapshot = serde_json::from_value(json).unwrap();
        assert_eq!(back, snapshot);
    }
}
