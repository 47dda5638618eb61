//! Pricing resolver collaborator and exchange rates.
//!
//! How a price is computed is not this crate's concern; it only freezes
//! whatever the resolver returns.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use common::{CurrencyCode, Money, VariantId};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::error::{PricingError, Result};

/// One discount applied to a price.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscountLine {
    pub code: String,
    pub description: String,
    pub amount: Money,
    #[serde(default)]
    pub promotion_id: Option<String>,
}

/// One tax applied to a price.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaxLine {
    pub name: String,
    /// Rate in basis points (825 = 8.25%).
    pub rate_bps: u32,
    pub amount: Money,
}

/// Everything the resolver knows about the buyer and the cart.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricingContext {
    #[serde(default)]
    pub coupon_code: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    /// Also express totals in this currency, using the service's rate source.
    #[serde(default)]
    pub comparison_currency: Option<CurrencyCode>,
}

/// Raw resolver output for one variant and quantity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedPrice {
    pub currency: CurrencyCode,
    pub unit_price: Money,
    pub quantity: u32,
    pub discounts: Vec<DiscountLine>,
    pub taxes: Vec<TaxLine>,
    /// Free-form promotion data passed through untouched.
    #[serde(default)]
    pub promotion_metadata: serde_json::Map<String, serde_json::Value>,
}

impl ResolvedPrice {
    pub fn subtotal(&self) -> Money {
        self.unit_price.times(self.quantity)
    }

    pub fn discount_total(&self) -> Money {
        self.discounts.iter().map(|d| d.amount).sum()
    }

    pub fn tax_total(&self) -> Money {
        self.taxes.iter().map(|t| t.amount).sum()
    }

    pub fn total(&self) -> Money {
        self.subtotal() - self.discount_total() + self.tax_total()
    }
}

/// Prices one variant at one quantity.
#[async_trait]
pub trait PricingResolver: Send + Sync {
    async fn resolve(
        &self,
        variant_id: &VariantId,
        quantity: u32,
        currency: &CurrencyCode,
        context: &PricingContext,
    ) -> Result<ResolvedPrice>;
}

/// Exchange rates for the optional comparison currency.
#[async_trait]
pub trait ExchangeRateSource: Send + Sync {
    /// How many units of `to` one unit of `from` buys.
    async fn rate(&self, from: &CurrencyCode, to: &CurrencyCode) -> Result<Decimal>;
}

/// Applies `rate` to an amount in cents with banker's rounding.
pub fn convert(amount: Money, rate: Decimal) -> Money {
    let converted = (Decimal::from(amount.cents()) * rate)
        .round_dp_with_strategy(0, RoundingStrategy::MidpointNearestEven);
    Money::from_cents(converted.to_i64().unwrap_or(i64::MAX))
}

/// `amount * rate_bps / 10_000`, banker's rounding to cents.
pub fn basis_points(amount: Money, rate_bps: u32) -> Money {
    convert(amount, Decimal::new(i64::from(rate_bps), 4))
}

#[derive(Debug, Default)]
struct ResolverState {
    prices: HashMap<VariantId, Money>,
    coupons: HashMap<String, u32>,
    tax_rate_bps: u32,
    fail: bool,
}

/// Table-driven resolver for tests and the demo server.
///
/// Unit price per variant, percentage coupons, one flat sales tax on the
/// discounted subtotal.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPricingResolver {
    state: Arc<RwLock<ResolverState>>,
}

impl InMemoryPricingResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_price(&self, variant_id: impl Into<VariantId>, unit_price: Money) {
        self.write().prices.insert(variant_id.into(), unit_price);
    }

    /// Registers a coupon taking `percent_bps` basis points off the subtotal.
    pub fn set_coupon(&self, code: impl Into<String>, percent_bps: u32) {
        self.write().coupons.insert(code.into(), percent_bps);
    }

    pub fn set_tax_rate(&self, rate_bps: u32) {
        self.write().tax_rate_bps = rate_bps;
    }

    /// Makes every subsequent `resolve` fail.
    pub fn set_fail(&self, fail: bool) {
        self.write().fail = fail;
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, ResolverState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl PricingResolver for InMemoryPricingResolver {
    async fn resolve(
        &self,
        variant_id: &VariantId,
        quantity: u32,
        currency: &CurrencyCode,
        context: &PricingContext,
    ) -> Result<ResolvedPrice> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        if state.fail {
            return Err(PricingError::Unavailable {
                variant_id: variant_id.clone(),
                reason: "pricing backend unavailable".to_string(),
            });
        }
        let unit_price = *state
            .prices
            .get(variant_id)
            .ok_or_else(|| PricingError::Unavailable {
                variant_id: variant_id.clone(),
                reason: "no price list entry".to_string(),
            })?;

        let subtotal = unit_price.times(quantity);
        let mut discounts = Vec::new();
        let mut promotion_metadata = serde_json::Map::new();
        if let Some(code) = &context.coupon_code
            && let Some(&percent_bps) = state.coupons.get(code)
        {
            discounts.push(DiscountLine {
                code: code.clone(),
                description: format!("{:.2}% off", f64::from(percent_bps) / 100.0),
                amount: basis_points(subtotal, percent_bps),
                promotion_id: Some(format!("coupon:{code}")),
            });
            promotion_metadata.insert("coupon".to_string(), serde_json::json!(code));
        }

        let discounted = subtotal - discounts.iter().map(|d| d.amount).sum();
        let mut taxes = Vec::new();
        if state.tax_rate_bps > 0 {
            taxes.push(TaxLine {
                name: "sales tax".to_string(),
                rate_bps: state.tax_rate_bps,
                amount: basis_points(discounted, state.tax_rate_bps),
            });
        }

        Ok(ResolvedPrice {
            currency: currency.clone(),
            unit_price,
            quantity,
            discounts,
            taxes,
            promotion_metadata,
        })
    }
}

/// Fixed exchange-rate table.
#[derive(Debug, Clone, Default)]
pub struct InMemoryExchangeRates {
    rates: Arc<RwLock<HashMap<(CurrencyCode, CurrencyCode), Decimal>>>,
}

impl InMemoryExchangeRates {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_rate(&self, from: CurrencyCode, to: CurrencyCode, rate: Decimal) {
        self.rates
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((from, to), rate);
    }
}

#[async_trait]
impl ExchangeRateSource for InMemoryExchangeRates {
    async fn rate(&self, from: &CurrencyCode, to: &CurrencyCode) -> Result<Decimal> {
        if from == to {
            return Ok(Decimal::ONE);
        }
        self.rates
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(from.clone(), to.clone()))
            .copied()
            .ok_or_else(|| PricingError::MissingExchangeRate {
                from: from.clone(),
                to: to.clone(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usd() -> CurrencyCode {
        CurrencyCode::new("USD").unwrap()
    }

    #[test]
    fn test_basis_points_round_half_to_even() {
        // 8.25% of 10.00 = 82.5 cents -> 82
        assert_eq!(basis_points(Money::from_cents(1000), 825), Money::from_cents(82));
        // 8.25% of 10.20 = 84.15 -> 84
        assert_eq!(basis_points(Money::from_cents(1020), 825), Money::from_cents(84));
        // 50% of 0.03 = 1.5 -> 2
        assert_eq!(basis_points(Money::from_cents(3), 5000), Money::from_cents(2));
    }

    #[test]
    fn test_conversion_uses_decimal_rate() {
        let rate = Decimal::new(92, 2); // 0.92
        assert_eq!(convert(Money::from_cents(1999), rate), Money::from_cents(1839));
    }

    #[tokio::test]
    async fn test_resolver_applies_coupon_then_tax() {
        let resolver = InMemoryPricingResolver::new();
        resolver.set_price("SKU", Money::from_cents(2500));
        resolver.set_coupon("TEN", 1000);
        resolver.set_tax_rate(800);

        let context = PricingContext {
            coupon_code: Some("TEN".to_string()),
            ..PricingContext::default()
        };
        let price = resolver
            .resolve(&VariantId::new("SKU"), 2, &usd(), &context)
            .await
            .unwrap();

        assert_eq!(price.subtotal(), Money::from_cents(5000));
        assert_eq!(price.discount_total(), Money::from_cents(500));
        assert_eq!(price.tax_total(), Money::from_cents(360));
        assert_eq!(price.total(), Money::from_cents(4860));
    }

    #[tokio::test]
    async fn test_unknown_variant_is_unavailable() {
        let resolver = InMemoryPricingResolver::new();
        let err = resolver
            .resolve(&VariantId::new("NOPE"), 1, &usd(), &PricingContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, PricingError::Unavailable { .. }));
    }

    #[tokio::test]
    async fn test_same_currency_rate_is_one() {
        let rates = InMemoryExchangeRates::new();
        assert_eq!(rates.rate(&usd(), &usd()).await.unwrap(), Decimal::ONE);
        let eur = CurrencyCode::new("EUR").unwrap();
        assert!(rates.rate(&usd(), &eur).await.is_err());
    }
}
