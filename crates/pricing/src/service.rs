//! The price snapshot service.

use std::sync::Arc;

use common::{CartLine, CheckoutId, Clock, CurrencyCode, LineId, VariantId};
use futures_util::future::try_join_all;
use metrics::counter;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{PricingError, Result};
use crate::resolver::{ExchangeRateSource, PricingContext, PricingResolver, ResolvedPrice};
use crate::snapshot::{CurrencyConversion, FrozenPrices, PriceSnapshot, SnapshotScope, reconcile};
use crate::store::SnapshotStore;

/// Snapshot service settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotConfig {
    /// Allowed rounding drift between line totals and the cart total.
    pub tolerance_cents: i64,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self { tolerance_cents: 1 }
    }
}

/// One line to price, at the quantity actually held.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceRequest {
    pub line_id: LineId,
    pub variant_id: VariantId,
    pub quantity: u32,
}

impl From<&CartLine> for PriceRequest {
    fn from(line: &CartLine) -> Self {
        Self {
            line_id: line.line_id.clone(),
            variant_id: line.variant_id.clone(),
            quantity: line.quantity,
        }
    }
}

/// Resolves prices once and freezes them against a checkout.
///
/// Reads never consult the resolver again, so a price change after freezing
/// does not reach an in-flight checkout.
pub struct PriceSnapshotService<S: SnapshotStore> {
    store: S,
    resolver: Arc<dyn PricingResolver>,
    rates: Option<Arc<dyn ExchangeRateSource>>,
    clock: Arc<dyn Clock>,
    config: SnapshotConfig,
}

impl<S: SnapshotStore + Clone> Clone for PriceSnapshotService<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            resolver: Arc::clone(&self.resolver),
            rates: self.rates.clone(),
            clock: Arc::clone(&self.clock),
            config: self.config,
        }
    }
}

impl<S: SnapshotStore> PriceSnapshotService<S> {
    /// Creates a snapshot service pricing through `resolver`.
    pub fn new(store: S, resolver: Arc<dyn PricingResolver>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            resolver,
            rates: None,
            clock,
            config: SnapshotConfig::default(),
        }
    }

    /// Adds a rate source for comparison-currency totals.
    pub fn with_exchange_rates(mut self, rates: Arc<dyn ExchangeRateSource>) -> Self {
        self.rates = Some(rates);
        self
    }

    /// Overrides the default tunables.
    pub fn with_config(mut self, config: SnapshotConfig) -> Self {
        self.config = config;
        self
    }

    /// The snapshot store.
    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> SnapshotConfig {
        self.config
    }

    /// Freezes and stores a single resolver result.
    #[tracing::instrument(skip(self, scope, resolved, context), fields(scope = %scope.key()))]
    pub async fn snapshot(
        &self,
        checkout_id: CheckoutId,
        scope: SnapshotScope,
        resolved: &ResolvedPrice,
        context: &PricingContext,
    ) -> Result<PriceSnapshot> {
        let comparison = self.comparison_rate(&resolved.currency, context).await?;
        let snapshot = PriceSnapshot::capture(
            checkout_id,
            scope,
            resolved,
            context.coupon_code.clone(),
            comparison.map(|(currency, rate)| {
                CurrencyConversion::new(currency, rate, resolved.total())
            }),
            self.clock.now(),
        );
        self.store.insert_all(vec![snapshot.clone()]).await?;
        counter!("price_snapshots_created_total").increment(1);
        Ok(snapshot)
    }

    /// Resolves every line concurrently, then freezes the lines and the cart
    /// aggregate in one store write.
    #[tracing::instrument(skip(self, lines, context), fields(lines = lines.len()))]
    pub async fn freeze(
        &self,
        checkout_id: CheckoutId,
        currency: &CurrencyCode,
        lines: &[PriceRequest],
        context: &PricingContext,
    ) -> Result<FrozenPrices> {
        if lines.is_empty() {
            return Err(PricingError::EmptyCart);
        }

        let resolved = try_join_all(lines.iter().map(|line| {
            self.resolver
                .resolve(&line.variant_id, line.quantity, currency, context)
        }))
        .await?;

        let comparison = self.comparison_rate(currency, context).await?;
        let now = self.clock.now();

        let mut line_snapshots = Vec::with_capacity(lines.len());
        for (request, price) in lines.iter().zip(&resolved) {
            if &price.currency != currency {
                return Err(PricingError::CurrencyMismatch {
                    expected: currency.clone(),
                    actual: price.currency.clone(),
                });
            }
            line_snapshots.push(PriceSnapshot::capture(
                checkout_id,
                SnapshotScope::line(
                    request.line_id.clone(),
                    request.variant_id.clone(),
                    request.quantity,
                ),
                price,
                context.coupon_code.clone(),
                comparison
                    .clone()
                    .map(|(code, rate)| CurrencyConversion::new(code, rate, price.total())),
                now,
            ));
        }

        let cart = PriceSnapshot::aggregate(
            checkout_id,
            currency.clone(),
            &line_snapshots,
            context.coupon_code.clone(),
            comparison,
            now,
        )?;
        reconcile(&cart, &line_snapshots, self.config.tolerance_cents)?;

        let mut all = line_snapshots.clone();
        all.push(cart.clone());
        let created = all.len() as u64;
        self.store.insert_all(all).await?;

        counter!("price_snapshots_created_total").increment(created);
        info!(
            %checkout_id,
            grand_total = %cart.grand_total(),
            currency = %currency,
            "Prices frozen"
        );
        Ok(FrozenPrices {
            cart,
            lines: line_snapshots,
        })
    }

    /// The frozen prices for a checkout, if any were captured.
    pub async fn for_checkout(&self, checkout_id: CheckoutId) -> Result<Option<FrozenPrices>> {
        let snapshots = self.store.for_checkout(checkout_id).await?;
        Ok(FrozenPrices::from_snapshots(snapshots))
    }

    /// Re-checks stored line totals against the cart total.
    pub fn reconcile(&self, frozen: &FrozenPrices) -> Result<()> {
        reconcile(&frozen.cart, &frozen.lines, self.config.tolerance_cents)
    }

    /// Drops every snapshot of a checkout; returns how many were removed.
    pub async fn delete_for_checkout(&self, checkout_id: CheckoutId) -> Result<u64> {
        let deleted = self.store.delete_for_checkout(checkout_id).await?;
        debug!(%checkout_id, deleted, "Price snapshots deleted");
        Ok(deleted)
    }

    async fn comparison_rate(
        &self,
        currency: &CurrencyCode,
        context: &PricingContext,
    ) -> Result<Option<(CurrencyCode, Decimal)>> {
        let Some(target) = &context.comparison_currency else {
            return Ok(None);
        };
        let rates = self
            .rates
            .as_ref()
            .ok_or_else(|| PricingError::MissingExchangeRate {
                from: currency.clone(),
                to: target.clone(),
            })?;
        let rate = rates.rate(currency, target).await?;
        Ok(Some((target.clone(), rate)))
    }
}

#[cfg(test)]
mod tests {
    use common::{ManualClock, Money};

    use super::*;
    use crate::memory::InMemorySnapshotStore;
    use crate::resolver::{InMemoryExchangeRates, InMemoryPricingResolver};

    fn usd() -> CurrencyCode {
        CurrencyCode::new("USD").unwrap()
    }

    fn request(line: &str, variant: &str, quantity: u32) -> PriceRequest {
        PriceRequest {
            line_id: LineId::new(line),
            variant_id: VariantId::new(variant),
            quantity,
        }
    }

    fn service() -> (PriceSnapshotService<InMemorySnapshotStore>, InMemoryPricingResolver) {
        let resolver = InMemoryPricingResolver::new();
        resolver.set_price("A", Money::from_cents(1999));
        resolver.set_price("B", Money::from_cents(350));
        resolver.set_tax_rate(825);
        let service = PriceSnapshotService::new(
            InMemorySnapshotStore::new(),
            Arc::new(resolver.clone()),
            Arc::new(ManualClock::starting_now()),
        );
        (service, resolver)
    }

    #[tokio::test]
    async fn test_freeze_stores_lines_and_cart() {
        let (service, _) = service();
        let checkout = CheckoutId::new();

        let frozen = service
            .freeze(
                checkout,
                &usd(),
                &[request("l1", "A", 2), request("l2", "B", 3)],
                &PricingContext::default(),
            )
            .await
            .unwrap();

        assert_eq!(frozen.lines.len(), 2);
        assert_eq!(frozen.cart.subtotal(), Money::from_cents(3998 + 1050));
        service.reconcile(&frozen).unwrap();
        assert_eq!(service.store().count().await, 3);

        let reread = service.for_checkout(checkout).await.unwrap().unwrap();
        assert_eq!(reread.cart, frozen.cart);
    }

    #[tokio::test]
    async fn test_freezing_twice_is_refused() {
        let (service, _) = service();
        let checkout = CheckoutId::new();
        let lines = [request("l1", "A", 1)];
        service
            .freeze(checkout, &usd(), &lines, &PricingContext::default())
            .await
            .unwrap();

        let err = service
            .freeze(checkout, &usd(), &lines, &PricingContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, PricingError::SnapshotExists { .. }));
    }

    #[tokio::test]
    async fn test_resolver_failure_stores_nothing() {
        let (service, resolver) = service();
        resolver.set_fail(true);

        let err = service
            .freeze(
                CheckoutId::new(),
                &usd(),
                &[request("l1", "A", 1)],
                &PricingContext::default(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, PricingError::Unavailable { .. }));
        assert_eq!(service.store().count().await, 0);
    }

    #[tokio::test]
    async fn test_comparison_currency_needs_a_rate_source() {
        let (service, _) = service();
        let eur = CurrencyCode::new("EUR").unwrap();
        let context = PricingContext {
            comparison_currency: Some(eur.clone()),
            ..PricingContext::default()
        };

        let err = service
            .freeze(CheckoutId::new(), &usd(), &[request("l1", "B", 1)], &context)
            .await
            .unwrap_err();
        assert!(matches!(err, PricingError::MissingExchangeRate { .. }));

        let rates = InMemoryExchangeRates::new();
        rates.set_rate(usd(), eur.clone(), Decimal::new(5, 1));
        let service = service.with_exchange_rates(Arc::new(rates));
        let frozen = service
            .freeze(CheckoutId::new(), &usd(), &[request("l1", "B", 1)], &context)
            .await
            .unwrap();

        // 3.50 + 8.25% tax (28.875 -> 29) = 3.79, at 0.5 -> 189.5 -> 190
        let conversion = frozen.cart.conversion().unwrap();
        assert_eq!(conversion.currency, eur);
        assert_eq!(frozen.cart.grand_total(), Money::from_cents(379));
        assert_eq!(conversion.grand_total, Money::from_cents(190));
    }

    #[tokio::test]
    async fn test_single_snapshot_is_stored() {
        let (service, resolver) = service();
        let checkout = CheckoutId::new();
        let resolved = resolver
            .resolve(&VariantId::new("A"), 1, &usd(), &PricingContext::default())
            .await
            .unwrap();

        let snapshot = service
            .snapshot(
                checkout,
                SnapshotScope::line("l1", "A", 1),
                &resolved,
                &PricingContext::default(),
            )
            .await
            .unwrap();

        assert_eq!(snapshot.unit_price(), Some(Money::from_cents(1999)));
        // no cart snapshot yet, so nothing is "frozen" for the checkout
        assert!(service.for_checkout(checkout).await.unwrap().is_none());
    }
}
